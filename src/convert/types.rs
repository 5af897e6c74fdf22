use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::texture::ResizeInterpolation;

// ─── Issue codes ──────────────────────────────────────────────────────────────

pub const VERTEX_WEIGHT_FALLBACK: &str = "VERTEX_WEIGHT_FALLBACK";
pub const TEXT_PLACEHOLDER: &str = "TEXT_PLACEHOLDER";
pub const TEXTURE_SKIPPED: &str = "TEXTURE_SKIPPED";
pub const SCRATCH_WRITE_FAILED: &str = "SCRATCH_WRITE_FAILED";
pub const MORPH_BIND_UNRESOLVED: &str = "MORPH_BIND_UNRESOLVED";
pub const NO_HUMANOID: &str = "NO_HUMANOID";
pub const LONG_OUTPUT_PATH: &str = "LONG_OUTPUT_PATH";

/// Worker cap applied when output must be saved immediately.
pub(crate) const SAVE_IMMEDIATELY_WORKERS: usize = 5;

// ─── Public types ─────────────────────────────────────────────────────────────

/// Conversion options shared by the CLI and library callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConvertOptions {
    /// Caps the texture worker pool for deterministic, prompt output.
    pub save_immediately: bool,
    /// Explicit worker pool size; defaults to the number of cores.
    pub max_workers: Option<usize>,
    /// Scratch directory; defaults to `<output dir>/glTF`.
    pub scratch_dir: Option<PathBuf>,
    /// Texture folder name relative to the output PMX.
    pub texture_dir_name: String,
    pub write_scratch: bool,
    /// Interpolation used when a specular layer must match the base texture size.
    pub texture_resize_method: ResizeInterpolation,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            save_immediately: false,
            max_workers: None,
            scratch_dir: None,
            texture_dir_name: "tex".to_string(),
            write_scratch: true,
            texture_resize_method: ResizeInterpolation::Bilinear,
        }
    }
}

impl ConvertOptions {
    /// Worker pool size for parallel texture work.
    pub fn worker_count(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        let requested = self.max_workers.unwrap_or(cores).max(1);
        if self.save_immediately {
            requested.min(SAVE_IMMEDIATELY_WORKERS)
        } else {
            requested
        }
    }
}

/// Severity level used by validation issues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single recoverable issue produced during analysis/conversion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn info(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Humanoid role assignment found in the source asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HumanoidAssignment {
    pub role: String,
    pub node: usize,
    pub node_name: Option<String>,
}

/// Analysis-only report generated without writing output files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub model_name: String,
    pub author: Option<String>,
    pub node_count: usize,
    pub mesh_count: usize,
    pub material_count: usize,
    pub total_vertices: usize,
    pub total_polygons: usize,
    pub humanoid_bones: Vec<HumanoidAssignment>,
    /// Canonical bones whose source node is absent.
    pub missing_canonical_bones: Vec<String>,
    pub issues: Vec<ValidationIssue>,
}

/// Full conversion report returned after export.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub model_name: String,
    pub author: Option<String>,
    pub output_path: PathBuf,
    pub bone_count: usize,
    pub vertex_count: usize,
    pub face_count: usize,
    pub material_count: usize,
    pub texture_count: usize,
    pub morph_count: usize,
    pub rigid_body_count: usize,
    pub joint_count: usize,
    pub bytes_written: u64,
    pub issues: Vec<ValidationIssue>,
}
