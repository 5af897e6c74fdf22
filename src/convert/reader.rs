use std::{fs, path::Path};

use byteorder::{ByteOrder, LittleEndian};
use gltf::{Document, binary::Glb, buffer::Source};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ConvertError;

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

// ─── Source asset ─────────────────────────────────────────────────────────────

/// Parsed binary glTF: the JSON scene graph and the BIN payload.
#[derive(Debug, Clone)]
pub struct SourceAsset {
    pub json: Value,
    pub bin: Vec<u8>,
}

/// Read and parse a `.vrm`/`.glb` file.
pub fn read_source(path: &Path) -> Result<SourceAsset, ConvertError> {
    let bytes = fs::read(path)?;
    parse_glb(&bytes)
}

/// Parse a binary glTF container held in memory.
pub fn parse_glb(bytes: &[u8]) -> Result<SourceAsset, ConvertError> {
    validate_container(bytes)?;

    let glb = Glb::from_slice(bytes).map_err(|error| ConvertError::Format(error.to_string()))?;
    let json: Value = serde_json::from_slice(glb.json.as_ref())?;
    if !json.is_object() {
        return Err(ConvertError::Format(
            "JSON chunk is not an object".to_string(),
        ));
    }
    let bin = glb.bin.map(|chunk| chunk.into_owned()).unwrap_or_default();

    Ok(SourceAsset { json, bin })
}

/// Check signature and chunk lengths before handing the bytes to `gltf`, so
/// that truncation is reported distinctly from a wrong format.
fn validate_container(bytes: &[u8]) -> Result<(), ConvertError> {
    if bytes.len() < GLB_HEADER_LEN {
        if bytes.len() >= 4 && &bytes[0..4] != GLB_MAGIC {
            return Err(ConvertError::Format("bad magic".to_string()));
        }
        return Err(ConvertError::Truncated {
            chunk: "header",
            declared: GLB_HEADER_LEN,
            remaining: bytes.len(),
        });
    }
    if &bytes[0..4] != GLB_MAGIC {
        return Err(ConvertError::Format(format!(
            "bad magic {:02x?}",
            &bytes[0..4]
        )));
    }
    let version = LittleEndian::read_u32(&bytes[4..8]);
    if version != 2 {
        return Err(ConvertError::Format(format!(
            "unsupported container version {version}"
        )));
    }
    let declared_total = LittleEndian::read_u32(&bytes[8..12]) as usize;
    if declared_total > bytes.len() {
        return Err(ConvertError::Truncated {
            chunk: "container",
            declared: declared_total,
            remaining: bytes.len(),
        });
    }

    let end = declared_total.max(GLB_HEADER_LEN);
    let mut offset = GLB_HEADER_LEN;
    for (position, (expected_type, name)) in [(CHUNK_JSON, "JSON"), (CHUNK_BIN, "BIN")]
        .into_iter()
        .enumerate()
    {
        if offset >= end && position > 0 {
            break;
        }
        if end - offset < CHUNK_HEADER_LEN {
            return Err(ConvertError::Truncated {
                chunk: name,
                declared: CHUNK_HEADER_LEN,
                remaining: end - offset,
            });
        }
        let length = LittleEndian::read_u32(&bytes[offset..offset + 4]) as usize;
        let chunk_type = LittleEndian::read_u32(&bytes[offset + 4..offset + 8]);
        if chunk_type != expected_type {
            return Err(ConvertError::Format(format!(
                "expected {name} chunk, found type {chunk_type:#010x}"
            )));
        }
        offset += CHUNK_HEADER_LEN;
        if length > end - offset {
            return Err(ConvertError::Truncated {
                chunk: name,
                declared: length,
                remaining: end - offset,
            });
        }
        offset += length;
    }

    Ok(())
}

impl SourceAsset {
    pub fn array(&self, key: &str) -> &[Value] {
        self.json
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn nodes(&self) -> &[Value] {
        self.array("nodes")
    }

    pub fn node_name(&self, index: usize) -> Option<&str> {
        self.nodes()
            .get(index)
            .and_then(|node| node.get("name"))
            .and_then(Value::as_str)
    }

    /// Raw bytes of a buffer view, e.g. an embedded image.
    pub fn buffer_view(&self, index: usize) -> Option<&[u8]> {
        let view = self.array("bufferViews").get(index)?;
        let offset = view.get("byteOffset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let length = view.get("byteLength").and_then(Value::as_u64)? as usize;
        self.bin.get(offset..offset.checked_add(length)?)
    }

    /// Validated `gltf` view of the scene graph, used to read geometry.
    ///
    /// Besides `gltf`'s own reference checks, every buffer view and accessor
    /// must fit the BIN payload so that the primitive readers never index
    /// outside it.
    pub fn document(&self) -> Result<Document, ConvertError> {
        let root = gltf::json::Root::deserialize(&self.json)
            .map_err(|error| ConvertError::Document(error.to_string()))?;
        let document =
            Document::from_json(root).map_err(|error| ConvertError::Document(error.to_string()))?;
        check_extents(&document, self.bin.len())?;
        Ok(document)
    }

    /// Buffer lookup for [`gltf::Primitive::reader`]. Only the GLB's own BIN
    /// chunk is available; external URIs are never fetched.
    pub fn buffer_data(&self, buffer: gltf::Buffer<'_>) -> Option<&[u8]> {
        match buffer.source() {
            Source::Bin => Some(self.bin.as_slice()),
            Source::Uri(_) => None,
        }
    }
}

fn check_extents(document: &Document, bin_len: usize) -> Result<(), ConvertError> {
    for view in document.views() {
        let end = view.offset().checked_add(view.length());
        if matches!(view.buffer().source(), Source::Bin) && end.is_none_or(|end| end > bin_len) {
            return Err(ConvertError::Document(format!(
                "bufferView {} reaches past the {bin_len}-byte BIN chunk",
                view.index()
            )));
        }
    }

    for accessor in document.accessors() {
        let invalid = |reason: String| ConvertError::Accessor {
            index: accessor.index(),
            reason,
        };
        if accessor.count() == 0 {
            return Err(invalid("count must be at least 1".to_string()));
        }
        if accessor.sparse().is_some_and(|sparse| sparse.count() == 0) {
            return Err(invalid("sparse count must be at least 1".to_string()));
        }
        if accessor.view().is_some() {
            let bytes = accessor.count().checked_mul(accessor.size());
            if accessor.offset() > bin_len || bytes.is_none_or(|bytes| bytes > bin_len) {
                return Err(invalid(format!(
                    "{} elements cannot fit the {bin_len}-byte BIN chunk",
                    accessor.count()
                )));
            }
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::test_support::GlbBuilder;
    use super::*;

    #[test]
    fn given_wrong_magic_when_parsing_then_format_error_is_returned() {
        let mut bytes = GlbBuilder::new(json!({"asset": {"version": "2.0"}})).build();
        bytes[0..4].copy_from_slice(b"PMX ");

        let error = parse_glb(&bytes).expect_err("bad magic must fail");

        assert!(matches!(error, ConvertError::Format(_)));
    }

    #[test]
    fn given_bin_chunk_longer_than_file_when_parsing_then_truncated_error_names_chunk() {
        let mut builder = GlbBuilder::new(json!({"asset": {"version": "2.0"}}));
        builder.accessor_f32("VEC3", &[0.0, 1.0, 2.0]);
        let mut bytes = builder.build();
        // Drop the tail of BIN but keep the declared lengths.
        let total = bytes.len();
        bytes.truncate(total - 4);
        let shortened = bytes.len() as u32;
        bytes[8..12].copy_from_slice(&shortened.to_le_bytes());

        let error = parse_glb(&bytes).expect_err("short BIN must fail");

        match error {
            ConvertError::Truncated {
                chunk,
                declared,
                remaining,
            } => {
                assert_eq!(chunk, "BIN");
                assert_eq!(declared, 12);
                assert_eq!(remaining, 8);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn given_tiny_file_when_parsing_then_header_is_reported_truncated() {
        let error = parse_glb(b"glTF").expect_err("short header must fail");

        assert!(matches!(
            error,
            ConvertError::Truncated {
                chunk: "header",
                ..
            }
        ));
    }

    #[test]
    fn given_malformed_json_chunk_when_parsing_then_json_error_is_returned() {
        let mut bytes = GlbBuilder::new(json!({"asset": {"version": "2.0"}})).build();
        bytes[20] = b'[';
        bytes[21] = b'[';

        let error = parse_glb(&bytes).expect_err("broken JSON must fail");

        assert!(matches!(error, ConvertError::Json(_)));
    }

    /// One triangle with float positions and `u8` weights in a single mesh.
    fn triangle_builder() -> GlbBuilder {
        let mut builder = GlbBuilder::new(json!({}));
        let positions = builder.accessor_f32("VEC3", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let weights = builder.accessor_u8("VEC4", &[255, 0, 0, 0, 128, 127, 0, 0, 0, 0, 0, 255]);
        let indices = builder.accessor_u16("SCALAR", &[0, 1, 2]);
        builder.json["accessors"][weights]["normalized"] = json!(true);
        builder.json["meshes"] = json!([{
            "primitives": [{
                "attributes": {"POSITION": positions, "WEIGHTS_0": weights},
                "indices": indices
            }]
        }]);
        builder
    }

    #[test]
    fn given_built_glb_when_reading_primitive_then_gltf_reader_decodes_attributes() {
        let asset = parse_glb(&triangle_builder().build()).expect("parse fixture");
        let document = asset.document().expect("document");
        let mesh = document.meshes().next().expect("mesh");
        let primitive = mesh.primitives().next().expect("primitive");
        let reader = primitive.reader(|buffer| asset.buffer_data(buffer));

        let positions: Vec<[f32; 3]> = reader.read_positions().expect("positions").collect();
        assert_eq!(positions, vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);

        let weights: Vec<[f32; 4]> = reader.read_weights(0).expect("weights").into_f32().collect();
        assert!((weights[0][0] - 1.0).abs() < 1e-6);
        assert!((weights[1][0] + weights[1][1] - 1.0).abs() < 1e-2);

        let indices: Vec<u32> = reader.read_indices().expect("indices").into_u32().collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn given_count_beyond_bin_when_building_document_then_accessor_error_is_returned() {
        let mut builder = triangle_builder();
        builder.json["accessors"][0]["count"] = json!(1_000_000);

        let error = builder.asset().document().expect_err("overrun must fail");

        assert!(matches!(error, ConvertError::Accessor { index: 0, .. }));
    }

    #[test]
    fn given_zero_count_accessor_when_building_document_then_accessor_error_is_returned() {
        let mut builder = triangle_builder();
        builder.json["accessors"][2]["count"] = json!(0);

        let error = builder.asset().document().expect_err("empty accessor must fail");

        assert!(matches!(error, ConvertError::Accessor { index: 2, .. }));
    }

    #[test]
    fn given_view_past_bin_when_building_document_then_document_error_is_returned() {
        let mut builder = triangle_builder();
        builder.json["bufferViews"][1]["byteLength"] = json!(4096);

        let error = builder.asset().document().expect_err("view overrun must fail");

        assert!(matches!(error, ConvertError::Document(_)));
    }

    #[test]
    fn given_position_without_bounds_when_building_document_then_gltf_validation_rejects_it() {
        let mut builder = triangle_builder();
        let accessor = builder.json["accessors"][0]
            .as_object_mut()
            .expect("accessor");
        accessor.remove("min");
        accessor.remove("max");

        let error = builder.asset().document().expect_err("unbounded POSITION must fail");

        assert!(matches!(error, ConvertError::Document(_)));
    }

    #[test]
    fn given_dangling_mesh_reference_when_building_document_then_document_error_is_returned() {
        let mut builder = triangle_builder();
        builder.json["meshes"][0]["primitives"][0]["attributes"]["NORMAL"] = json!(42);

        let error = builder.asset().document().expect_err("dangling index must fail");

        assert!(matches!(error, ConvertError::Document(_)));
    }
}
