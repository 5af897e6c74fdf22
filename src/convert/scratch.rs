use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;

use super::reader::SourceAsset;
use super::skeleton::Skeleton;
use super::taxonomy::BoneRole;
use super::types::{SCRATCH_WRITE_FAILED, ValidationIssue};

const SCRATCH_DIR_NAME: &str = "glTF";

// ─── Diagnostic structs ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
struct BoneDiagnostic<'a> {
    index: usize,
    name: &'a str,
    source_node: Option<usize>,
    source_name: Option<&'a str>,
    parent: Option<usize>,
    parent_name: Option<&'a str>,
    role: BoneRole,
    hidden: bool,
}

#[derive(Debug, Clone, Serialize)]
struct SkeletonDiagnostic<'a> {
    bone_count: usize,
    unclassified_count: usize,
    missing_sources: Vec<String>,
    bones: Vec<BoneDiagnostic<'a>>,
}

// ─── Path helper ──────────────────────────────────────────────────────────────

/// `<output dir>/glTF` unless a scratch directory was configured.
pub(crate) fn scratch_dir_for_output(output_path: &Path, configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(dir) => dir.to_path_buf(),
        None => output_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SCRATCH_DIR_NAME),
    }
}

// ─── Writers ──────────────────────────────────────────────────────────────────

/// Dump the re-serialized source JSON and the raw BIN chunk.
pub(crate) fn write_source_dump(dir: &Path, asset: &SourceAsset) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create scratch dir: {}", dir.display()))?;

    let json_path = dir.join("gltf.json");
    let json = serde_json::to_vec_pretty(&asset.json).context("failed to serialize glTF JSON")?;
    fs::write(&json_path, json)
        .with_context(|| format!("failed to write scratch JSON: {}", json_path.display()))?;

    let bin_path = dir.join("data.bin");
    fs::write(&bin_path, &asset.bin)
        .with_context(|| format!("failed to write scratch BIN: {}", bin_path.display()))?;
    Ok(())
}

/// Write `bones.json`: one entry per output bone with its source node and role.
pub(crate) fn write_skeleton_dump(dir: &Path, asset: &SourceAsset, skeleton: &Skeleton) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create scratch dir: {}", dir.display()))?;

    let bones = skeleton
        .bones
        .iter()
        .zip(&skeleton.info)
        .enumerate()
        .map(|(index, (bone, info))| BoneDiagnostic {
            index,
            name: &bone.name,
            source_node: info.source_node,
            source_name: info.source_node.and_then(|node| asset.node_name(node)),
            parent: bone.parent,
            parent_name: bone
                .parent
                .and_then(|parent| skeleton.bones.get(parent))
                .map(|parent| parent.name.as_str()),
            role: info.role,
            hidden: info.hidden,
        })
        .collect::<Vec<_>>();

    let diagnostic = SkeletonDiagnostic {
        bone_count: skeleton.bones.len(),
        unclassified_count: skeleton.unclassified().count(),
        missing_sources: skeleton.missing_sources(),
        bones,
    };

    let path = dir.join("bones.json");
    let text = serde_json::to_string_pretty(&diagnostic).context("failed to serialize bones.json")?;
    fs::write(&path, text)
        .with_context(|| format!("failed to write skeleton diagnostic: {}", path.display()))?;
    Ok(())
}

/// Turn a failed scratch write into a recoverable issue.
pub(crate) fn scratch_issue(result: Result<()>, what: &str) -> Option<ValidationIssue> {
    result
        .err()
        .map(|error| ValidationIssue::warning(SCRATCH_WRITE_FAILED, format!("{what}: {error:#}")))
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::convert::{skeleton::build_skeleton, taxonomy::Taxonomy};

    fn asset() -> SourceAsset {
        SourceAsset {
            json: json!({
                "nodes": [
                    {"name": "J_Bip_C_Hips", "children": [1]},
                    {"name": "J_Bip_C_Head", "translation": [0.0, 0.5, 0.0]}
                ],
                "extensions": {"VRM": {"humanoid": {"humanBones": [
                    {"bone": "hips", "node": 0},
                    {"bone": "head", "node": 1}
                ]}}},
                "asset": {"version": "2.0"}
            }),
            bin: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn given_no_configured_dir_when_resolving_scratch_then_gltf_sits_next_to_output() {
        let dir = scratch_dir_for_output(Path::new("out/model/model.pmx"), None);

        assert_eq!(dir, Path::new("out/model/glTF"));
        assert_eq!(
            scratch_dir_for_output(Path::new("model.pmx"), Some(Path::new("/tmp/work"))),
            Path::new("/tmp/work")
        );
    }

    #[test]
    fn given_asset_when_dumping_source_then_json_keys_are_sorted_and_bin_is_raw() {
        let dir = tempfile::tempdir().expect("tempdir");

        write_source_dump(dir.path(), &asset()).expect("dump");

        let text = fs::read_to_string(dir.path().join("gltf.json")).expect("json");
        let asset_at = text.find("\"asset\"").expect("asset key");
        let nodes_at = text.find("\"nodes\"").expect("nodes key");
        assert!(asset_at < nodes_at);
        assert!(text.contains('\n'));
        assert_eq!(fs::read(dir.path().join("data.bin")).expect("bin"), vec![1, 2, 3, 4]);
    }

    #[test]
    fn given_skeleton_when_dumping_bones_then_entries_carry_source_and_role() {
        let dir = tempfile::tempdir().expect("tempdir");
        let asset = asset();
        let skeleton = build_skeleton(&asset, &Taxonomy::default()).expect("skeleton");

        write_skeleton_dump(dir.path(), &asset, &skeleton).expect("dump");

        let text = fs::read_to_string(dir.path().join("bones.json")).expect("bones");
        let value: Value = serde_json::from_str(&text).expect("parse");
        let bones = value["bones"].as_array().expect("bones array");
        assert_eq!(bones.len(), skeleton.bones.len());
        let head = bones
            .iter()
            .find(|bone| bone["name"] == "頭")
            .expect("head entry");
        assert_eq!(head["source_node"], 1);
        assert_eq!(head["source_name"], "J_Bip_C_Head");
        assert_eq!(value["bone_count"], skeleton.bones.len());
    }

    #[test]
    fn given_unwritable_dir_when_dumping_then_failure_becomes_warning_issue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file").expect("blocker");

        let issue = scratch_issue(write_source_dump(&blocker.join("glTF"), &asset()), "scratch dump")
            .expect("issue");

        assert_eq!(issue.code, SCRATCH_WRITE_FAILED);
        assert!(issue.message.starts_with("scratch dump"));
    }
}
