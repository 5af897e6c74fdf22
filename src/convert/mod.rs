mod gltf_utils;
pub mod mesh;
pub mod morph;
pub mod physics;
pub mod reader;
mod scratch;
pub mod skeleton;
pub mod skinning;
pub mod taxonomy;
mod types;

use std::{
    fs,
    io::BufWriter,
    path::{Path, PathBuf},
};

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::ConvertError;
use crate::logging::ConversionLog;
use crate::pipeline::{CancelToken, Stage, StageError, StageResultExt};
use crate::pmx::{PmxModel, writer::write_pmx};
use crate::{log_debug, log_info, log_warn};

// Re-export public types for callers of this module.
pub use types::{
    AnalysisReport, ConversionReport, ConvertOptions, HumanoidAssignment, LONG_OUTPUT_PATH,
    MORPH_BIND_UNRESOLVED, NO_HUMANOID, SCRATCH_WRITE_FAILED, Severity, TEXT_PLACEHOLDER,
    TEXTURE_SKIPPED, VERTEX_WEIGHT_FALLBACK, ValidationIssue,
};

use gltf_utils::{extract_author, extract_humanoid_bone_nodes, extract_model_name};
use mesh::{MeshContext, assemble_mesh};
use morph::{build_display_frames, build_morphs};
use physics::synthesize_physics;
use reader::{SourceAsset, read_source};
use scratch::{scratch_dir_for_output, scratch_issue, write_skeleton_dump, write_source_dump};
use skeleton::build_skeleton;
use skinning::WeightRemapper;
use taxonomy::{Taxonomy, TuningTables};

/// Paths at or above this length trip up the target viewer on some systems.
const LONG_PATH_CHARS: usize = 255;

// ─── Public API ───────────────────────────────────────────────────────────────

/// Summarize a VRM file without writing anything.
pub fn analyze_vrm(input_path: &Path) -> Result<AnalysisReport, ConvertError> {
    analyze_vrm_with_tables(input_path, &Taxonomy::default())
}

/// Summarize a VRM file against a specific bone taxonomy.
pub fn analyze_vrm_with_tables(input_path: &Path, taxonomy: &Taxonomy) -> Result<AnalysisReport, ConvertError> {
    let asset = read_source(input_path)?;
    let json = &asset.json;

    let mut humanoid_bones: Vec<HumanoidAssignment> = extract_humanoid_bone_nodes(json)
        .into_iter()
        .map(|(role, node)| HumanoidAssignment {
            role,
            node,
            node_name: asset.node_name(node).map(ToOwned::to_owned),
        })
        .collect();
    humanoid_bones.sort_by(|a, b| a.node.cmp(&b.node).then_with(|| a.role.cmp(&b.role)));

    let mut issues = Vec::new();
    if humanoid_bones.is_empty() {
        issues.push(ValidationIssue::warning(
            NO_HUMANOID,
            "no humanoid bone assignments found; bones keep their node names",
        ));
    }

    let skeleton = build_skeleton(&asset, taxonomy)?;
    let (total_vertices, total_polygons) = collect_mesh_statistics(&asset);

    Ok(AnalysisReport {
        model_name: model_name(json, input_path),
        author: extract_author(json),
        node_count: asset.nodes().len(),
        mesh_count: asset.array("meshes").len(),
        material_count: asset.array("materials").len(),
        total_vertices,
        total_polygons,
        humanoid_bones,
        missing_canonical_bones: skeleton.missing_sources(),
        issues,
    })
}

/// Convert a VRM file to PMX.
pub fn convert_vrm_to_pmx(
    input_path: &Path,
    output_path: &Path,
    options: &ConvertOptions,
    tables: &TuningTables,
    cancel: &CancelToken,
) -> Result<ConversionReport, StageError> {
    let log = ConversionLog::new();
    convert_vrm_to_pmx_with_observer(input_path, output_path, options, tables, cancel, &log, &mut |_| {})
}

/// Convert a VRM file to PMX, calling `observer` after each completed stage.
///
/// Cancellation is checked before every stage and once per mesh. The output
/// file only appears after the final stage succeeds.
pub fn convert_vrm_to_pmx_with_observer(
    input_path: &Path,
    output_path: &Path,
    options: &ConvertOptions,
    tables: &TuningTables,
    cancel: &CancelToken,
    log: &ConversionLog,
    observer: &mut dyn FnMut(Stage),
) -> Result<ConversionReport, StageError> {
    let mut issues = Vec::<ValidationIssue>::new();
    let scratch_dir = options
        .write_scratch
        .then(|| scratch_dir_for_output(output_path, options.scratch_dir.as_deref()));

    // ── Read ──
    cancel.check().in_stage(Stage::Read, input_path)?;
    let asset = read_source(input_path).in_stage(Stage::Read, input_path)?;
    log_info!(
        log,
        "read {}: {} nodes, {} meshes, {} bytes of buffer data",
        input_path.display(),
        asset.nodes().len(),
        asset.array("meshes").len(),
        asset.bin.len()
    );
    if let Some(dir) = &scratch_dir {
        issues.extend(scratch_issue(write_source_dump(dir, &asset), "scratch source dump"));
    }
    finish_stage(Stage::Read, log, observer);

    // ── Skeleton ──
    cancel.check().in_stage(Stage::Skeleton, input_path)?;
    let skeleton = build_skeleton(&asset, &tables.taxonomy).in_stage(Stage::Skeleton, input_path)?;
    log_info!(
        log,
        "skeleton: {} bones ({} unclassified)",
        skeleton.bones.len(),
        skeleton.unclassified().count()
    );
    let missing = skeleton.missing_sources();
    if !missing.is_empty() {
        log_debug!(log, "canonical bones without source node: {}", missing.join(", "));
    }
    if let Some(dir) = &scratch_dir {
        issues.extend(scratch_issue(
            write_skeleton_dump(dir, &asset, &skeleton),
            "skeleton diagnostic",
        ));
    }
    finish_stage(Stage::Skeleton, log, observer);

    // ── Weights ──
    cancel.check().in_stage(Stage::Weights, input_path)?;
    let remapper = WeightRemapper::new(&skeleton, &tables.taxonomy).in_stage(Stage::Weights, input_path)?;
    finish_stage(Stage::Weights, log, observer);

    // ── Mesh ──
    cancel.check().in_stage(Stage::Mesh, input_path)?;
    let workers = options.worker_count();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|error| ConvertError::WorkerPool(error.to_string()))
        .in_stage(Stage::Mesh, input_path)?;
    log_debug!(log, "texture workers: {workers}");

    let output_dir = output_dir_of(output_path);
    let texture_dir = output_dir.join(&options.texture_dir_name);
    let ctx = MeshContext {
        skeleton: &skeleton,
        remapper: &remapper,
        texture_dir: Some(&texture_dir),
        scratch_dir: scratch_dir.as_deref(),
        texture_dir_name: &options.texture_dir_name,
        interpolation: options.texture_resize_method,
        pool: &pool,
        cancel,
    };
    let mesh = assemble_mesh(&asset, &ctx).in_stage(Stage::Mesh, input_path)?;
    issues.extend(mesh.issues);
    let (morphs, morph_issues) = build_morphs(&asset, mesh.vertex_morphs, &mesh.target_morphs, &tables.taxonomy)
        .in_stage(Stage::Mesh, input_path)?;
    issues.extend(morph_issues);
    let display_frames = build_display_frames(&skeleton, &morphs, &tables.taxonomy);
    log_info!(
        log,
        "mesh: {} vertices, {} faces, {} materials, {} textures, {} morphs",
        mesh.vertices.len(),
        mesh.indices.len() / 3,
        mesh.materials.len(),
        mesh.textures.len(),
        morphs.len()
    );
    finish_stage(Stage::Mesh, log, observer);

    // ── Physics ──
    cancel.check().in_stage(Stage::Physics, input_path)?;
    let physics = synthesize_physics(&skeleton, &mesh.vertices, &tables.physics);
    log_info!(
        log,
        "physics: {} rigid bodies, {} joints",
        physics.rigid_bodies.len(),
        physics.joints.len()
    );
    finish_stage(Stage::Physics, log, observer);

    // ── Write ──
    cancel.check().in_stage(Stage::Write, output_path)?;
    let name = model_name(&asset.json, input_path);
    let author = extract_author(&asset.json);
    let comment = model_comment(author.as_deref(), input_path);
    let model = PmxModel {
        name: name.clone(),
        english_name: name.clone(),
        comment: comment.clone(),
        english_comment: comment,
        vertices: mesh.vertices,
        indices: mesh.indices,
        textures: mesh.textures,
        materials: mesh.materials,
        bones: skeleton.bones,
        morphs,
        display_frames,
        rigid_bodies: physics.rigid_bodies,
        joints: physics.joints,
    };

    if output_path.as_os_str().len() >= LONG_PATH_CHARS {
        issues.push(ValidationIssue::warning(
            LONG_OUTPUT_PATH,
            format!(
                "output path is {} characters long; some viewers cannot open it",
                output_path.as_os_str().len()
            ),
        ));
    }

    let bytes_written = write_atomically(&model, output_path, cancel, &mut issues)
        .in_stage(Stage::Write, output_path)?;
    finish_stage(Stage::Write, log, observer);

    for issue in &issues {
        match issue.severity {
            Severity::Info => log_info!(log, "[{}] {}", issue.code, issue.message),
            _ => log_warn!(log, "[{}] {}", issue.code, issue.message),
        }
    }

    Ok(ConversionReport {
        model_name: name,
        author,
        output_path: output_path.to_path_buf(),
        bone_count: model.bones.len(),
        vertex_count: model.vertices.len(),
        face_count: model.indices.len() / 3,
        material_count: model.materials.len(),
        texture_count: model.textures.len(),
        morph_count: model.morphs.len(),
        rigid_body_count: model.rigid_bodies.len(),
        joint_count: model.joints.len(),
        bytes_written,
        issues,
    })
}

// ─── Private orchestration ────────────────────────────────────────────────────

fn finish_stage(stage: Stage, log: &ConversionLog, observer: &mut dyn FnMut(Stage)) {
    log_debug!(log, "{stage} stage complete");
    observer(stage);
}

fn output_dir_of(output_path: &Path) -> PathBuf {
    match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Write to a temp file beside the output, then rename it into place.
fn write_atomically(
    model: &PmxModel,
    output_path: &Path,
    cancel: &CancelToken,
    issues: &mut Vec<ValidationIssue>,
) -> Result<u64, ConvertError> {
    let output_dir = output_dir_of(output_path);
    fs::create_dir_all(&output_dir)?;

    let mut temp = NamedTempFile::new_in(&output_dir)?;
    let summary = write_pmx(model, BufWriter::new(temp.as_file_mut()))?;
    for field in &summary.placeholders {
        issues.push(ValidationIssue::warning(
            TEXT_PLACEHOLDER,
            format!("{field} could not be encoded and was replaced"),
        ));
    }

    cancel.check()?;
    temp.persist(output_path).map_err(|error| ConvertError::Io(error.error))?;
    Ok(summary.bytes_written as u64)
}

fn model_name(json: &Value, input_path: &Path) -> String {
    extract_model_name(json).unwrap_or_else(|| {
        input_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| input_path.to_string_lossy().to_string())
    })
}

fn model_comment(author: Option<&str>, input_path: &Path) -> String {
    let source = input_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    match author {
        Some(author) => format!("author: {author}\nsource: {source}"),
        None => format!("source: {source}"),
    }
}

/// Vertex count from `POSITION` accessors; polygons from indices (or vertices / 3).
fn collect_mesh_statistics(asset: &SourceAsset) -> (usize, usize) {
    let accessor_count = |index: Option<u64>| {
        index
            .and_then(|index| asset.array("accessors").get(index as usize))
            .and_then(|accessor| accessor.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    };

    let mut total_vertices = 0usize;
    let mut total_polygons = 0usize;
    for mesh in asset.array("meshes") {
        let primitives = mesh
            .get("primitives")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for primitive in primitives {
            let vertex_count = accessor_count(primitive.pointer("/attributes/POSITION").and_then(Value::as_u64));
            total_vertices += vertex_count;

            let index_count = accessor_count(primitive.get("indices").and_then(Value::as_u64));
            if index_count > 0 {
                total_polygons += index_count / 3;
            } else {
                total_polygons += vertex_count / 3;
            }
        }
    }
    (total_vertices, total_polygons)
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use serde_json::json;

    use super::reader::test_support::GlbBuilder;

    /// Hips and head, one skinned triangle weighted fully to the head, one
    /// opaque material.
    pub(crate) fn minimal_vrm_builder() -> GlbBuilder {
        let mut builder = GlbBuilder::new(json!({
            "asset": {"version": "2.0"},
            "scenes": [{"nodes": [0]}],
            "nodes": [
                {"name": "J_Bip_C_Hips", "translation": [0.0, 1.0, 0.0], "children": [1, 2]},
                {"name": "J_Bip_C_Head", "translation": [0.0, 0.5, 0.0]},
                {"name": "Body", "mesh": 0, "skin": 0}
            ],
            "skins": [{"joints": [0, 1]}],
            "materials": [{
                "name": "Body",
                "alphaMode": "OPAQUE",
                "pbrMetallicRoughness": {"baseColorFactor": [1.0, 1.0, 1.0, 1.0]}
            }],
            "extensions": {"VRM": {
                "meta": {"title": "Minimal", "author": "tester"},
                "humanoid": {"humanBones": [
                    {"bone": "hips", "node": 0},
                    {"bone": "head", "node": 1}
                ]}
            }}
        }));
        let position = builder.accessor_f32(
            "VEC3",
            &[0.0, 1.5, 0.0, 0.1, 1.5, 0.0, 0.0, 1.6, 0.0],
        );
        let normal = builder.accessor_f32("VEC3", &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        let joints = builder.accessor_u8("VEC4", &[1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0]);
        let weights = builder.accessor_f32(
            "VEC4",
            &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
        );
        let indices = builder.accessor_u16("SCALAR", &[0, 1, 2]);
        builder.json["meshes"] = json!([{
            "name": "Body",
            "primitives": [{
                "attributes": {
                    "POSITION": position,
                    "NORMAL": normal,
                    "JOINTS_0": joints,
                    "WEIGHTS_0": weights
                },
                "indices": indices,
                "material": 0
            }]
        }]);
        builder
    }

    pub(crate) fn minimal_vrm() -> Vec<u8> {
        minimal_vrm_builder().build()
    }
}
