use std::{
    collections::HashMap,
    path::Path,
};

use gltf::{
    Accessor, Primitive, Semantic,
    accessor::{DataType, Dimensions},
};
use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;
use serde_json::Value;

use super::gltf_utils::{collect_parent_index_map_from_json, to_pmx_direction, to_pmx_position};
use super::morph::panel_for_name;
use super::reader::SourceAsset;
use super::skeleton::Skeleton;
use super::skinning::{WeightRemapper, enclosing_bone, joint_bone_table};
use super::types::{TEXTURE_SKIPPED, VERTEX_WEIGHT_FALLBACK, ValidationIssue};
use crate::error::ConvertError;
use crate::pipeline::CancelToken;
use crate::pmx::{
    Material, MaterialFlags, Morph, MorphKind, SkinDeform, SphereMode, Toon, Vertex, VertexOffset,
};
use crate::texture::{
    HairBlendNames, ResizeInterpolation, hair_blend, hair_blend_names, mime_extension,
    write_texture_file, write_toon_ramp,
};

const DEFAULT_MATERIAL: &str = "default";
const SHARED_TOON: u8 = 1;
const EDGE_SCALE: f32 = 1.0;

// ─── Context and output ───────────────────────────────────────────────────────

/// Everything the assembler reads besides the source asset.
pub struct MeshContext<'a> {
    pub skeleton: &'a Skeleton,
    pub remapper: &'a WeightRemapper,
    /// `<output dir>/<texture dir name>`; no texture files are written when absent.
    pub texture_dir: Option<&'a Path>,
    pub scratch_dir: Option<&'a Path>,
    pub texture_dir_name: &'a str,
    pub interpolation: ResizeInterpolation,
    pub pool: &'a rayon::ThreadPool,
    pub cancel: &'a CancelToken,
}

#[derive(Debug, Default)]
pub struct MeshAssembly {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub materials: Vec<Material>,
    pub textures: Vec<String>,
    pub vertex_morphs: Vec<Morph>,
    /// `(mesh, target)` → index into `vertex_morphs`.
    pub target_morphs: HashMap<(usize, usize), usize>,
    pub issues: Vec<ValidationIssue>,
}

// ─── Textures ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SourceImage<'a> {
    file_name: String,
    bytes: Option<&'a [u8]>,
}

enum TextureJob<'a> {
    Extract {
        file_name: String,
        bytes: &'a [u8],
    },
    Toon {
        file_name: String,
        shade: [f32; 3],
    },
    HairBlend {
        file_name: String,
        main: &'a [u8],
        specular: &'a [u8],
        color: [f32; 4],
        emissive: [f32; 3],
    },
}

impl TextureJob<'_> {
    fn file_name(&self) -> &str {
        match self {
            TextureJob::Extract { file_name, .. }
            | TextureJob::Toon { file_name, .. }
            | TextureJob::HairBlend { file_name, .. } => file_name,
        }
    }

    fn run(&self, texture_dir: &Path, scratch_dir: Option<&Path>, interpolation: ResizeInterpolation) -> anyhow::Result<()> {
        match self {
            TextureJob::Extract { file_name, bytes } => {
                let mut dirs = vec![texture_dir];
                dirs.extend(scratch_dir);
                write_texture_file(&dirs, file_name, bytes)
            }
            TextureJob::Toon { file_name, shade } => {
                std::fs::create_dir_all(texture_dir)?;
                write_toon_ramp(&texture_dir.join(file_name), *shade)
            }
            TextureJob::HairBlend {
                file_name,
                main,
                specular,
                color,
                emissive,
            } => {
                let main = image::load_from_memory(main)?;
                let specular = image::load_from_memory(specular)?;
                let blended = hair_blend(&main, &specular, *color, *emissive, interpolation);
                std::fs::create_dir_all(texture_dir)?;
                blended.save(texture_dir.join(file_name))?;
                Ok(())
            }
        }
    }
}

fn run_texture_jobs(jobs: &[TextureJob<'_>], ctx: &MeshContext<'_>) -> Vec<ValidationIssue> {
    let Some(texture_dir) = ctx.texture_dir else {
        return Vec::new();
    };
    ctx.pool.install(|| {
        jobs.par_iter()
            .filter_map(|job| {
                job.run(texture_dir, ctx.scratch_dir, ctx.interpolation)
                    .err()
                    .map(|error| {
                        ValidationIssue::warning(
                            TEXTURE_SKIPPED,
                            format!("{}: {error:#}", job.file_name()),
                        )
                    })
            })
            .collect()
    })
}

/// Make a material name usable as a file name.
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

fn collect_images(asset: &SourceAsset) -> (Vec<SourceImage<'_>>, Vec<ValidationIssue>) {
    let mut issues = Vec::new();
    let images = asset
        .array("images")
        .iter()
        .enumerate()
        .map(|(index, image)| {
            let stem = image
                .get("name")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(file_safe)
                .unwrap_or_else(|| format!("image_{index}"));
            let mime = image.get("mimeType").and_then(Value::as_str).unwrap_or("");
            let extension = mime_extension(mime).unwrap_or_else(|| {
                issues.push(ValidationIssue::warning(
                    TEXTURE_SKIPPED,
                    format!("image {index} has unknown MIME type `{mime}`"),
                ));
                "bin"
            });
            let bytes = image
                .get("bufferView")
                .and_then(Value::as_u64)
                .and_then(|view| asset.buffer_view(view as usize));
            if bytes.is_none() {
                issues.push(ValidationIssue::warning(
                    TEXTURE_SKIPPED,
                    format!("image {index} has no readable buffer view"),
                ));
            }
            SourceImage {
                file_name: format!("{stem}.{extension}"),
                bytes,
            }
        })
        .collect();
    (images, issues)
}

/// glTF texture index → PMX texture index (image index + 1).
fn resolve_texture(asset: &SourceAsset, texture: usize, image_count: usize) -> Option<usize> {
    asset
        .array("textures")
        .get(texture)
        .and_then(|texture| texture.get("source"))
        .and_then(Value::as_u64)
        .map(|source| source as usize)
        .filter(|source| *source < image_count)
        .map(|source| source + 1)
}

// ─── Materials ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum DrawBlock {
    Opaque,
    Mask,
    Blend,
    /// Eye materials draw after everything else.
    Eye,
}

impl DrawBlock {
    pub(crate) fn classify(name: &str, alpha_mode: &str) -> Self {
        if name.contains("Eye") {
            return DrawBlock::Eye;
        }
        match alpha_mode {
            "MASK" => DrawBlock::Mask,
            "BLEND" => DrawBlock::Blend,
            _ => DrawBlock::Opaque,
        }
    }
}

#[derive(Debug, Clone)]
struct MaterialDraft {
    material: Material,
    block: DrawBlock,
    faces: Vec<u32>,
}

/// Stable ordering by draw block, keeping input order within each block.
pub(crate) fn order_by_block<T>(items: Vec<T>, block: impl Fn(&T) -> DrawBlock) -> Vec<T> {
    let mut keyed: Vec<(DrawBlock, T)> = items.into_iter().map(|item| (block(&item), item)).collect();
    keyed.sort_by_key(|(block, _)| *block);
    keyed.into_iter().map(|(_, item)| item).collect()
}

struct VrmMaterialProperties<'a>(Option<&'a Value>);

impl<'a> VrmMaterialProperties<'a> {
    fn find(asset: &'a SourceAsset, name: &str) -> Self {
        Self(
            asset
                .json
                .pointer("/extensions/VRM/materialProperties")
                .and_then(Value::as_array)
                .and_then(|properties| {
                    properties
                        .iter()
                        .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
                }),
        )
    }

    fn vector(&self, key: &str) -> Option<Vec<f32>> {
        self.0?
            .get("vectorProperties")?
            .get(key)?
            .as_array()
            .map(|values| values.iter().map(|value| value.as_f64().unwrap_or(0.0) as f32).collect())
    }

    fn float(&self, key: &str) -> Option<f32> {
        self.0?
            .get("floatProperties")?
            .get(key)?
            .as_f64()
            .map(|value| value as f32)
    }

    fn texture(&self, key: &str) -> Option<usize> {
        self.0?
            .get("textureProperties")?
            .get(key)?
            .as_u64()
            .map(|value| value as usize)
    }
}

fn rgb(values: &[f32]) -> Option<[f32; 3]> {
    (values.len() >= 3).then(|| [values[0], values[1], values[2]])
}

fn rgba(values: &[f32]) -> Option<[f32; 4]> {
    (values.len() >= 4).then(|| [values[0], values[1], values[2], values[3]])
}

fn json_floats(value: Option<&Value>) -> Vec<f32> {
    value
        .and_then(Value::as_array)
        .map(|values| values.iter().map(|value| value.as_f64().unwrap_or(0.0) as f32).collect())
        .unwrap_or_default()
}

/// Builds one material draft per distinct material name and registers the
/// derived textures it needs.
struct MaterialBuilder<'a, 'b> {
    asset: &'a SourceAsset,
    images: &'b [SourceImage<'a>],
    texture_dir_name: &'b str,
    textures: Vec<String>,
    jobs: Vec<TextureJob<'a>>,
}

impl<'a> MaterialBuilder<'a, '_> {
    fn push_texture(&mut self, file_name: &str) -> usize {
        self.textures
            .push(format!("{}/{}", self.texture_dir_name, file_name));
        self.textures.len() - 1
    }

    fn draft(&mut self, material_index: Option<usize>) -> (String, MaterialDraft) {
        let source = material_index.and_then(|index| self.asset.array("materials").get(index));
        let name = match (source, material_index) {
            (Some(source), Some(index)) => source
                .get("name")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("material_{index}")),
            _ => DEFAULT_MATERIAL.to_string(),
        };
        let empty = Value::Null;
        let source = source.unwrap_or(&empty);
        let properties = VrmMaterialProperties::find(self.asset, &name);

        let base_color = rgba(&json_floats(source.pointer("/pbrMetallicRoughness/baseColorFactor")))
            .unwrap_or([1.0, 1.0, 1.0, 1.0]);
        let mut diffuse = [base_color[0], base_color[1], base_color[2]];
        let alpha = base_color[3];
        let emissive = rgb(&json_floats(source.get("emissiveFactor"))).unwrap_or([0.0; 3]);
        let shade = properties.vector("_ShadeColor").as_deref().and_then(rgb);
        let mut ambient = shade.unwrap_or(diffuse.map(|channel| channel / 2.0));

        let edge_size = properties.float("_OutlineWidth").unwrap_or(0.0);
        let edge_color = properties
            .vector("_OutlineColor")
            .as_deref()
            .and_then(rgba)
            .unwrap_or([0.0, 0.0, 0.0, 1.0]);
        let mut flags =
            MaterialFlags::GROUND_SHADOW | MaterialFlags::SELF_SHADOW_MAP | MaterialFlags::SELF_SHADOW;
        if source.get("doubleSided").and_then(Value::as_bool).unwrap_or(false) {
            flags |= MaterialFlags::DOUBLE_SIDED;
        }
        if edge_size > 0.0 {
            flags |= MaterialFlags::EDGE;
        }

        let image_count = self.images.len();
        let main_texture = properties
            .texture("_MainTex")
            .or_else(|| {
                source
                    .pointer("/pbrMetallicRoughness/baseColorTexture/index")
                    .and_then(Value::as_u64)
                    .map(|index| index as usize)
            })
            .and_then(|texture| resolve_texture(self.asset, texture, image_count));
        let mut texture = main_texture;

        if let Some(HairBlendNames { blend, specular }) = hair_blend_names(&name) {
            let main_bytes = main_texture
                .and_then(|index| self.images.get(index - 1))
                .and_then(|image| image.bytes);
            let specular_bytes = self
                .images
                .iter()
                .find(|image| image.file_name == specular)
                .and_then(|image| image.bytes);
            if let (Some(main), Some(specular)) = (main_bytes, specular_bytes) {
                let color = properties
                    .vector("_Color")
                    .as_deref()
                    .and_then(rgba)
                    .unwrap_or([1.0; 4]);
                texture = Some(self.push_texture(&blend));
                self.jobs.push(TextureJob::HairBlend {
                    file_name: blend,
                    main,
                    specular,
                    color,
                    emissive,
                });
                diffuse = [1.0; 3];
                ambient = [0.5; 3];
            }
        }

        let (sphere_texture, sphere_mode) = match properties
            .texture("_SphereAdd")
            .and_then(|texture| resolve_texture(self.asset, texture, image_count))
        {
            Some(index) => (Some(index), SphereMode::Add),
            None => (None, SphereMode::Disabled),
        };

        let toon = match shade {
            Some(shade) => {
                let file_name = format!("{}_TOON.bmp", file_safe(&name));
                let index = self.push_texture(&file_name);
                self.jobs.push(TextureJob::Toon { file_name, shade });
                Toon::Texture(Some(index))
            }
            None => Toon::Shared(SHARED_TOON),
        };

        let alpha_mode = source
            .get("alphaMode")
            .and_then(Value::as_str)
            .unwrap_or("OPAQUE");
        let draft = MaterialDraft {
            material: Material {
                name: name.clone(),
                english_name: name.clone(),
                diffuse,
                alpha,
                specular: emissive,
                specular_factor: 0.0,
                ambient,
                flags,
                edge_color,
                edge_size,
                texture,
                sphere_texture,
                sphere_mode,
                toon,
                comment: String::new(),
                face_count: 0,
            },
            block: DrawBlock::classify(&name, alpha_mode),
            faces: Vec::new(),
        };
        (name, draft)
    }
}

// ─── Geometry ─────────────────────────────────────────────────────────────────

/// Mesh index → (skin index, carrying node), from the node list.
fn mesh_bindings(asset: &SourceAsset) -> HashMap<usize, (Option<usize>, usize)> {
    let mut bindings = HashMap::new();
    for (node_index, node) in asset.nodes().iter().enumerate() {
        let Some(mesh) = node.get("mesh").and_then(Value::as_u64) else {
            continue;
        };
        let skin = node.get("skin").and_then(Value::as_u64).map(|skin| skin as usize);
        bindings.entry(mesh as usize).or_insert((skin, node_index));
    }
    bindings
}

fn target_name(mesh: &Value, primitive: &Value, mesh_index: usize, target: usize) -> String {
    let from = |value: &Value| {
        value
            .pointer("/extras/targetNames")
            .and_then(Value::as_array)
            .and_then(|names| names.get(target))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    };
    from(primitive).or_else(|| from(mesh)).unwrap_or_else(|| {
        let mesh_name = mesh
            .get("name")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("mesh_{mesh_index}"));
        format!("{mesh_name}_{target}")
    })
}

fn check_layout(
    accessor: &Accessor<'_>,
    dimensions: Dimensions,
    data_types: &[DataType],
) -> Result<(), ConvertError> {
    if accessor.dimensions() == dimensions && data_types.contains(&accessor.data_type()) {
        return Ok(());
    }
    Err(ConvertError::Accessor {
        index: accessor.index(),
        reason: format!(
            "expected {dimensions:?} of {data_types:?}, found {:?} of {:?}",
            accessor.dimensions(),
            accessor.data_type()
        ),
    })
}

/// Reject encodings the primitive reader has no decoder for before any
/// attribute is read.
fn check_primitive(primitive: &Primitive<'_>) -> Result<(), ConvertError> {
    use DataType::{F32, U8, U16, U32};

    for (semantic, accessor) in primitive.attributes() {
        match semantic {
            Semantic::Positions | Semantic::Normals => {
                check_layout(&accessor, Dimensions::Vec3, &[F32])?
            }
            Semantic::TexCoords(0) => check_layout(&accessor, Dimensions::Vec2, &[U8, U16, F32])?,
            Semantic::Joints(0) => check_layout(&accessor, Dimensions::Vec4, &[U8, U16])?,
            Semantic::Weights(0) => check_layout(&accessor, Dimensions::Vec4, &[U8, U16, F32])?,
            _ => {}
        }
    }
    if let Some(indices) = primitive.indices() {
        check_layout(&indices, Dimensions::Scalar, &[U8, U16, U32])?;
    }
    for target in primitive.morph_targets() {
        for accessor in [target.positions(), target.normals(), target.tangents()]
            .into_iter()
            .flatten()
        {
            check_layout(&accessor, Dimensions::Vec3, &[F32])?;
        }
    }
    Ok(())
}

/// Collect one attribute read through `gltf`. An absent attribute is empty
/// and an accessor without any buffer data reads as zeros.
fn decode<T, I>(accessor: Option<Accessor<'_>>, read: Option<I>) -> Result<Vec<T>, ConvertError>
where
    T: Clone + Default,
    I: Iterator<Item = T>,
{
    let Some(accessor) = accessor else {
        return Ok(Vec::new());
    };
    match read {
        Some(values) => Ok(values.collect()),
        None if accessor.view().is_none() && accessor.sparse().is_none() => {
            Ok(vec![T::default(); accessor.count()])
        }
        None => Err(ConvertError::Accessor {
            index: accessor.index(),
            reason: "data lies outside the BIN chunk".to_string(),
        }),
    }
}

/// Where a `POSITION` accessor's vertices landed in the shared vertex list.
#[derive(Debug, Clone, Copy)]
struct VertexBlock {
    start: usize,
    count: usize,
}

impl VertexBlock {
    /// Offset a primitive-local corner into the shared list. Corners must stay
    /// inside this block, never reaching into a neighbouring mesh.
    fn resolve(&self, corner: usize, accessor: usize) -> Result<u32, ConvertError> {
        if corner >= self.count {
            return Err(ConvertError::Accessor {
                index: accessor,
                reason: format!(
                    "face index {corner} exceeds the {} vertices of its POSITION accessor",
                    self.count
                ),
            });
        }
        self.start
            .checked_add(corner)
            .and_then(|vertex| u32::try_from(vertex).ok())
            .ok_or_else(|| ConvertError::Accessor {
                index: accessor,
                reason: format!("vertex index {} + {corner} overflows", self.start),
            })
    }
}

/// Assemble vertices, faces, materials, textures and vertex morphs.
///
/// Geometry is decoded with `gltf`'s primitive reader over the BIN chunk.
/// Primitives sharing a `POSITION` accessor share one vertex block, so the
/// vertex list holds each source vertex once; faces are grouped per material
/// and ordered by draw block afterwards.
pub fn assemble_mesh(asset: &SourceAsset, ctx: &MeshContext<'_>) -> Result<MeshAssembly, ConvertError> {
    let document = asset.document()?;
    let (images, mut issues) = collect_images(asset);

    let mut textures = vec![String::new()];
    textures.extend(
        images
            .iter()
            .map(|image| format!("{}/{}", ctx.texture_dir_name, image.file_name)),
    );
    let extract_jobs: Vec<TextureJob<'_>> = images
        .iter()
        .filter_map(|image| {
            image.bytes.map(|bytes| TextureJob::Extract {
                file_name: image.file_name.clone(),
                bytes,
            })
        })
        .collect();
    issues.extend(run_texture_jobs(&extract_jobs, ctx));

    let mut builder = MaterialBuilder {
        asset,
        images: &images,
        texture_dir_name: ctx.texture_dir_name,
        textures,
        jobs: Vec::new(),
    };

    let parent_map = collect_parent_index_map_from_json(&asset.json);
    let bindings = mesh_bindings(asset);
    let mut skin_tables: HashMap<usize, Vec<Option<usize>>> = HashMap::new();

    let mut vertices: Vec<Vertex> = Vec::new();
    let mut blocks: HashMap<usize, VertexBlock> = HashMap::new();
    let mut drafts: Vec<MaterialDraft> = Vec::new();
    let mut draft_slots: HashMap<String, usize> = HashMap::new();
    let mut vertex_morphs: Vec<Morph> = Vec::new();
    let mut morph_slots: HashMap<String, usize> = HashMap::new();
    let mut target_morphs: HashMap<(usize, usize), usize> = HashMap::new();
    let mut fallback_count = 0usize;

    for mesh in document.meshes() {
        ctx.cancel.check()?;

        let mesh_index = mesh.index();
        let mesh_json = asset.array("meshes").get(mesh_index).unwrap_or(&Value::Null);
        let (skin, carrier) = bindings
            .get(&mesh_index)
            .copied()
            .map(|(skin, node)| (skin, Some(node)))
            .unwrap_or((None, None));
        let static_bone = carrier.and_then(|node| enclosing_bone(node, &parent_map, ctx.skeleton));
        let table = match skin {
            Some(skin) => Some(
                skin_tables
                    .entry(skin)
                    .or_insert_with(|| joint_bone_table(asset, skin, ctx.skeleton))
                    .clone(),
            ),
            None => None,
        };

        let mut primitives: Vec<Primitive<'_>> = mesh.primitives().collect();
        primitives.sort_by_key(|primitive| primitive.material().index().unwrap_or(usize::MAX));

        for primitive in primitives {
            let Some(position_accessor) = primitive.get(&Semantic::Positions) else {
                continue;
            };
            check_primitive(&primitive)?;
            let reader = primitive.reader(|buffer| asset.buffer_data(buffer));
            let primitive_json = mesh_json
                .get("primitives")
                .and_then(|primitives| primitives.get(primitive.index()))
                .unwrap_or(&Value::Null);

            let block = match blocks.get(&position_accessor.index()) {
                Some(block) => *block,
                None => {
                    let positions: Vec<[f32; 3]> =
                        decode(Some(position_accessor.clone()), reader.read_positions())?;
                    let normals: Vec<[f32; 3]> =
                        decode(primitive.get(&Semantic::Normals), reader.read_normals())?;
                    let uvs: Vec<[f32; 2]> = decode(
                        primitive.get(&Semantic::TexCoords(0)),
                        reader.read_tex_coords(0).map(|uvs| uvs.into_f32()),
                    )?;
                    let joints: Vec<[u16; 4]> = decode(
                        primitive.get(&Semantic::Joints(0)),
                        reader.read_joints(0).map(|joints| joints.into_u16()),
                    )?;
                    let weights: Vec<[f32; 4]> = decode(
                        primitive.get(&Semantic::Weights(0)),
                        reader.read_weights(0).map(|weights| weights.into_f32()),
                    )?;

                    let block = VertexBlock {
                        start: vertices.len(),
                        count: positions.len(),
                    };
                    blocks.insert(position_accessor.index(), block);

                    for (index, source) in positions.iter().enumerate() {
                        let position = to_pmx_position(&Vector3::from(*source));
                        let skinned = match (&table, joints.get(index), weights.get(index)) {
                            (Some(table), Some(joints), Some(weights)) => {
                                ctx.remapper.remap_quad(*joints, *weights, table, &position)
                            }
                            _ => static_bone.map(|bone| SkinDeform::Bdef1 { bone }),
                        };
                        let deform = skinned.unwrap_or_else(|| {
                            fallback_count += 1;
                            ctx.remapper.fallback()
                        });
                        vertices.push(Vertex {
                            position,
                            normal: normals
                                .get(index)
                                .map(|normal| to_pmx_direction(&Vector3::from(*normal)))
                                .unwrap_or_else(Vector3::zeros),
                            uv: uvs.get(index).map(|uv| Vector2::from(*uv)).unwrap_or_else(Vector2::zeros),
                            deform,
                            edge_scale: EDGE_SCALE,
                        });
                    }

                    let targets = primitive.morph_targets().zip(reader.read_morph_targets());
                    for (target_index, (target, (displacements, _, _))) in targets.enumerate() {
                        let Some(accessor) = target.positions() else {
                            continue;
                        };
                        let name = target_name(mesh_json, primitive_json, mesh_index, target_index);
                        let slot = *morph_slots.entry(name.clone()).or_insert_with(|| {
                            vertex_morphs.push(Morph {
                                name: name.clone(),
                                english_name: name.clone(),
                                panel: panel_for_name(&name),
                                kind: MorphKind::Vertex(Vec::new()),
                            });
                            vertex_morphs.len() - 1
                        });
                        target_morphs.insert((mesh_index, target_index), slot);

                        let deltas: Vec<[f32; 3]> = decode(Some(accessor), displacements)?;
                        let offsets: Vec<VertexOffset> = deltas
                            .into_iter()
                            .take(block.count)
                            .map(Vector3::from)
                            .enumerate()
                            .filter(|(_, delta)| delta.norm() > 1e-7)
                            .map(|(index, delta)| VertexOffset {
                                vertex: block.start + index,
                                delta: to_pmx_position(&delta),
                            })
                            .collect();
                        if let MorphKind::Vertex(existing) = &mut vertex_morphs[slot].kind {
                            existing.extend(offsets);
                        }
                    }

                    block
                }
            };

            let material_index = primitive.material().index();
            let material_name = material_index
                .and_then(|index| asset.array("materials").get(index))
                .and_then(|material| material.get("name"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| match material_index {
                    Some(index) if index < asset.array("materials").len() => {
                        format!("material_{index}")
                    }
                    _ => DEFAULT_MATERIAL.to_string(),
                });
            let slot = match draft_slots.get(&material_name) {
                Some(slot) => *slot,
                None => {
                    let (name, draft) = builder.draft(material_index);
                    drafts.push(draft);
                    draft_slots.insert(name, drafts.len() - 1);
                    drafts.len() - 1
                }
            };

            let corners: Vec<usize> = match primitive.indices() {
                Some(accessor) => {
                    let indices: Vec<u32> =
                        decode(Some(accessor), reader.read_indices().map(|indices| indices.into_u32()))?;
                    indices.into_iter().map(|corner| corner as usize).collect()
                }
                None => (0..block.count).collect(),
            };
            let corners = corners
                .into_iter()
                .map(|corner| block.resolve(corner, position_accessor.index()))
                .collect::<Result<Vec<u32>, _>>()?;
            let faces = &mut drafts[slot].faces;
            for triangle in corners.chunks_exact(3) {
                faces.extend_from_slice(&[triangle[2], triangle[1], triangle[0]]);
            }
        }
    }

    issues.extend(run_texture_jobs(&builder.jobs, ctx));

    if fallback_count > 0 {
        issues.push(ValidationIssue::warning(
            VERTEX_WEIGHT_FALLBACK,
            format!(
                "{fallback_count} vertices had no valid influence and were bound to bone {}",
                ctx.remapper.fallback_bone()
            ),
        ));
    }

    let drafts = order_by_block(drafts, |draft| draft.block);
    let mut indices = Vec::new();
    let mut materials = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let mut material = draft.material;
        material.face_count = draft.faces.len() as u32;
        indices.extend(draft.faces);
        materials.push(material);
    }

    Ok(MeshAssembly {
        vertices,
        indices,
        materials,
        textures: builder.textures,
        vertex_morphs,
        target_morphs,
        issues,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::convert::{reader::test_support::GlbBuilder, skeleton::build_skeleton, taxonomy::Taxonomy};

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .expect("pool")
    }

    fn triangle_fixture() -> GlbBuilder {
        let mut builder = GlbBuilder::new(json!({
            "nodes": [
                {"name": "J_Bip_C_Hips", "children": [1, 2]},
                {"name": "J_Bip_C_Head", "translation": [0.0, 1.5, 0.0]},
                {"name": "Face", "mesh": 0, "skin": 0}
            ],
            "skins": [{"joints": [0, 1]}],
            "extensions": {"VRM": {
                "humanoid": {"humanBones": [
                    {"bone": "hips", "node": 0},
                    {"bone": "head", "node": 1}
                ]},
                "materialProperties": [{
                    "name": "Skin",
                    "floatProperties": {"_OutlineWidth": 0.2},
                    "vectorProperties": {"_OutlineColor": [0.1, 0.2, 0.3, 1.0]},
                    "textureProperties": {}
                }]
            }},
            "materials": [{
                "name": "Skin",
                "alphaMode": "OPAQUE",
                "doubleSided": true,
                "pbrMetallicRoughness": {"baseColorFactor": [0.8, 0.6, 0.4, 1.0]}
            }]
        }));
        let position = builder.accessor_f32(
            "VEC3",
            &[0.0, 1.5, 0.0, 0.1, 1.5, 0.0, 0.0, 1.6, 0.0],
        );
        let joints = builder.accessor_u8("VEC4", &[1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0]);
        let weights = builder.accessor_f32(
            "VEC4",
            &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
        );
        let indices = builder.accessor_u16("SCALAR", &[0, 1, 2]);
        let target = builder.accessor_f32("VEC3", &[0.0, 0.0, 0.0, 0.0, 0.1, 0.0, 0.0, 0.0, 0.0]);
        builder.json["meshes"] = json!([{
            "name": "Face",
            "primitives": [{
                "attributes": {"POSITION": position, "JOINTS_0": joints, "WEIGHTS_0": weights},
                "indices": indices,
                "material": 0,
                "targets": [{"POSITION": target}],
                "extras": {"targetNames": ["Fcl_MTH_A"]}
            }]
        }]);
        builder
    }

    fn try_assemble(asset: &SourceAsset) -> (Skeleton, Result<MeshAssembly, ConvertError>) {
        let taxonomy = Taxonomy::default();
        let skeleton = build_skeleton(asset, &taxonomy).expect("skeleton");
        let remapper = WeightRemapper::new(&skeleton, &taxonomy).expect("remapper");
        let pool = pool();
        let cancel = CancelToken::new();
        let ctx = MeshContext {
            skeleton: &skeleton,
            remapper: &remapper,
            texture_dir: None,
            scratch_dir: None,
            texture_dir_name: "tex",
            interpolation: ResizeInterpolation::Bilinear,
            pool: &pool,
            cancel: &cancel,
        };
        let assembly = assemble_mesh(asset, &ctx);
        (skeleton, assembly)
    }

    fn assemble(asset: &SourceAsset) -> (Skeleton, MeshAssembly) {
        let (skeleton, assembly) = try_assemble(asset);
        (skeleton, assembly.expect("assembly"))
    }

    #[test]
    fn given_single_triangle_when_assembling_then_winding_is_reversed_and_head_owns_vertices() {
        let asset = triangle_fixture().asset();

        let (skeleton, assembly) = assemble(&asset);

        let head = skeleton.index_of("頭").expect("head");
        assert_eq!(assembly.vertices.len(), 3);
        for vertex in &assembly.vertices {
            assert_eq!(vertex.deform, SkinDeform::Bdef1 { bone: head });
        }
        assert_eq!(assembly.indices, vec![2, 1, 0]);
        assert_eq!(assembly.materials.len(), 1);
        assert_eq!(assembly.materials[0].face_count, 3);
        assert!((assembly.vertices[1].position.x + 1.25).abs() < 1e-5);
    }

    #[test]
    fn given_vrm_material_properties_when_assembling_then_fields_follow_them() {
        let asset = triangle_fixture().asset();

        let (_, assembly) = assemble(&asset);

        let material = &assembly.materials[0];
        assert_eq!(material.diffuse, [0.8, 0.6, 0.4]);
        assert_eq!(material.ambient, [0.4, 0.3, 0.2]);
        assert_eq!(material.edge_color, [0.1, 0.2, 0.3, 1.0]);
        assert!(material.flags.contains(MaterialFlags::DOUBLE_SIDED | MaterialFlags::EDGE));
        assert_eq!(material.toon, Toon::Shared(1));
        assert_eq!(material.sphere_mode, SphereMode::Disabled);
        assert_eq!(assembly.textures, vec![String::new()]);
    }

    #[test]
    fn given_morph_target_when_assembling_then_named_vertex_morph_keeps_nonzero_offsets() {
        let asset = triangle_fixture().asset();

        let (_, assembly) = assemble(&asset);

        assert_eq!(assembly.vertex_morphs.len(), 1);
        let morph = &assembly.vertex_morphs[0];
        assert_eq!(morph.name, "Fcl_MTH_A");
        assert_eq!(morph.panel, crate::pmx::MorphPanel::Mouth);
        match &morph.kind {
            MorphKind::Vertex(offsets) => {
                assert_eq!(offsets.len(), 1);
                assert_eq!(offsets[0].vertex, 1);
                assert!((offsets[0].delta.y - 1.25).abs() < 1e-5);
            }
            other => panic!("unexpected morph kind {other:?}"),
        }
        assert_eq!(assembly.target_morphs.get(&(0, 0)), Some(&0));
    }

    #[test]
    fn given_two_primitives_sharing_positions_when_assembling_then_vertices_are_not_duplicated() {
        let mut builder = triangle_fixture();
        let second_indices = builder.accessor_u16("SCALAR", &[0, 2, 1]);
        let first = builder.json["meshes"][0]["primitives"][0].clone();
        let mut second = first.clone();
        second["indices"] = json!(second_indices);
        second.as_object_mut().expect("primitive").remove("targets");
        builder.json["meshes"][0]["primitives"] = json!([first, second]);

        let (_, assembly) = assemble(&builder.asset());

        assert_eq!(assembly.vertices.len(), 3);
        assert_eq!(assembly.indices, vec![2, 1, 0, 1, 2, 0]);
        assert_eq!(assembly.materials[0].face_count, 6);
    }

    #[test]
    fn given_primitive_reusing_positions_with_index_past_block_when_assembling_then_accessor_error() {
        let mut builder = triangle_fixture();
        let other_positions = builder.accessor_f32(
            "VEC3",
            &[0.0, 1.0, 0.0, 0.1, 1.0, 0.0, 0.0, 1.1, 0.0],
        );
        let own_indices = builder.accessor_u16("SCALAR", &[0, 1, 2]);
        let stray_indices = builder.accessor_u16("SCALAR", &[0, 1, 4]);
        let shared_positions = builder.json["meshes"][0]["primitives"][0]["attributes"]["POSITION"].clone();
        let meshes = builder.json["meshes"].as_array_mut().expect("meshes");
        meshes.push(json!({
            "name": "Body",
            "primitives": [
                {"attributes": {"POSITION": other_positions}, "indices": own_indices, "material": 0},
                {"attributes": {"POSITION": shared_positions}, "indices": stray_indices, "material": 0}
            ]
        }));

        let (_, assembly) = try_assemble(&builder.asset());

        let error = assembly.expect_err("index 4 is outside the 3-vertex block");
        assert!(matches!(error, ConvertError::Accessor { index: 0, .. }));
    }

    #[test]
    fn given_block_near_u32_limit_when_resolving_corner_then_overflow_is_an_error() {
        let block = VertexBlock {
            start: u32::MAX as usize,
            count: 3,
        };

        assert!(matches!(block.resolve(0, 7), Ok(u32::MAX)));
        assert!(matches!(
            block.resolve(1, 7),
            Err(ConvertError::Accessor { index: 7, .. })
        ));
        assert!(matches!(
            block.resolve(3, 7),
            Err(ConvertError::Accessor { index: 7, .. })
        ));
    }

    #[test]
    fn given_float_joint_indices_when_assembling_then_accessor_error_names_them() {
        let mut builder = triangle_fixture();
        let joints = builder.accessor_f32("VEC4", &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        builder.json["meshes"][0]["primitives"][0]["attributes"]["JOINTS_0"] = json!(joints);

        let (_, assembly) = try_assemble(&builder.asset());

        let error = assembly.expect_err("float joints have no decoder");
        assert!(matches!(error, ConvertError::Accessor { index, .. } if index == joints));
    }

    #[test]
    fn given_u16_texture_coordinates_when_assembling_then_uvs_are_normalized() {
        let mut builder = triangle_fixture();
        let uvs = builder.accessor_u16("VEC2", &[0, 0, 65535, 0, 0, 65535]);
        builder.json["accessors"][uvs]["normalized"] = json!(true);
        builder.json["meshes"][0]["primitives"][0]["attributes"]["TEXCOORD_0"] = json!(uvs);

        let (_, assembly) = assemble(&builder.asset());

        assert_eq!(assembly.vertices[1].uv, Vector2::new(1.0, 0.0));
        assert_eq!(assembly.vertices[2].uv, Vector2::new(0.0, 1.0));
    }

    #[test]
    fn given_scrambled_alpha_modes_when_ordering_then_blocks_follow_draw_order() {
        let input = vec![
            ("Hair", "BLEND"),
            ("EyeWhite", "OPAQUE"),
            ("Face", "MASK"),
            ("Body", "OPAQUE"),
            ("Cloth", "BLEND"),
            ("Shoes", "OPAQUE"),
        ];

        let ordered = order_by_block(input, |(name, mode)| DrawBlock::classify(name, mode));

        let names: Vec<&str> = ordered.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["Body", "Shoes", "Face", "Hair", "Cloth", "EyeWhite"]);
    }

    #[test]
    fn given_embedded_image_when_assembling_then_texture_table_and_file_follow() {
        let mut builder = triangle_fixture();
        let view = builder.push_view(&[0x89, b'P', b'N', b'G']);
        builder.json["images"] = json!([{"name": "Body", "mimeType": "image/png", "bufferView": view}]);
        builder.json["textures"] = json!([{"source": 0}]);
        builder.json["extensions"]["VRM"]["materialProperties"][0]["textureProperties"] =
            json!({"_MainTex": 0, "_SphereAdd": 0});
        builder.json["extensions"]["VRM"]["materialProperties"][0]["vectorProperties"]["_ShadeColor"] =
            json!([0.5, 0.5, 0.5, 1.0]);
        let asset = builder.asset();
        let taxonomy = Taxonomy::default();
        let skeleton = build_skeleton(&asset, &taxonomy).expect("skeleton");
        let remapper = WeightRemapper::new(&skeleton, &taxonomy).expect("remapper");
        let out = tempfile::tempdir().expect("tempdir");
        let texture_dir = out.path().join("tex");
        let pool = pool();
        let cancel = CancelToken::new();
        let ctx = MeshContext {
            skeleton: &skeleton,
            remapper: &remapper,
            texture_dir: Some(&texture_dir),
            scratch_dir: None,
            texture_dir_name: "tex",
            interpolation: ResizeInterpolation::Bilinear,
            pool: &pool,
            cancel: &cancel,
        };

        let assembly = assemble_mesh(&asset, &ctx).expect("assembly");

        assert_eq!(assembly.textures, vec!["", "tex/Body.png", "tex/Skin_TOON.bmp"]);
        let material = &assembly.materials[0];
        assert_eq!(material.texture, Some(1));
        assert_eq!(material.sphere_texture, Some(1));
        assert_eq!(material.sphere_mode, SphereMode::Add);
        assert_eq!(material.toon, Toon::Texture(Some(2)));
        assert_eq!(material.ambient, [0.5, 0.5, 0.5]);
        assert!(texture_dir.join("Body.png").exists());
        assert!(texture_dir.join("Skin_TOON.bmp").exists());
    }

    #[test]
    fn given_cancelled_token_when_assembling_then_cancelled_error_is_returned() {
        let asset = triangle_fixture().asset();
        let taxonomy = Taxonomy::default();
        let skeleton = build_skeleton(&asset, &taxonomy).expect("skeleton");
        let remapper = WeightRemapper::new(&skeleton, &taxonomy).expect("remapper");
        let pool = pool();
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = MeshContext {
            skeleton: &skeleton,
            remapper: &remapper,
            texture_dir: None,
            scratch_dir: None,
            texture_dir_name: "tex",
            interpolation: ResizeInterpolation::Bilinear,
            pool: &pool,
            cancel: &cancel,
        };

        let error = assemble_mesh(&asset, &ctx).expect_err("cancelled");

        assert!(error.is_cancelled());
    }
}
