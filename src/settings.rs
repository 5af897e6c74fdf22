use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::convert::{ConvertOptions, taxonomy::TuningTables};

/// Persisted project settings used by CLI/UI workflows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    pub options: ConvertOptions,
    /// Tuning tables JSON; the built-in tables are used when absent.
    pub tables_path: Option<String>,
}

impl ProjectSettings {
    /// Tables named by `tables_path`, or the defaults.
    pub fn resolve_tables(&self) -> Result<TuningTables> {
        match &self.tables_path {
            Some(path) => load_tuning_tables(Path::new(path)),
            None => Ok(TuningTables::default()),
        }
    }
}

/// Save project settings to a JSON file.
pub fn save_project_settings(path: &Path, settings: &ProjectSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)
        .context("failed to serialize project settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save project settings: {}", path.display()))?;
    Ok(())
}

/// Load project settings from a JSON file.
pub fn load_project_settings(path: &Path) -> Result<ProjectSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load project settings: {}", path.display()))?;
    let settings: ProjectSettings =
        serde_json::from_str(&content).context("failed to parse project settings JSON")?;
    Ok(settings)
}

/// Export the tuning tables as pretty JSON.
pub fn save_tuning_tables(path: &Path, tables: &TuningTables) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create tables dir: {}", parent.display()))?;
    }
    let content =
        serde_json::to_string_pretty(tables).context("failed to serialize tuning tables as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save tuning tables: {}", path.display()))?;
    Ok(())
}

/// Import tuning tables; omitted sections keep their built-in values.
pub fn load_tuning_tables(path: &Path) -> Result<TuningTables> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load tuning tables: {}", path.display()))?;
    let tables: TuningTables = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse tuning tables JSON: {}", path.display()))?;
    Ok(tables)
}
