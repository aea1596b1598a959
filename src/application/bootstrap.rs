use crate::infrastructure::config::{ensure_default_configs, load_configs};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};

const DATABASE_FILE: &str = "timegrid.sqlite";

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
}

/// Creates `config/`, `state/` and `logs/` under the workspace, writes
/// default configs and applies the SQLite schema. Safe to run repeatedly.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join(DATABASE_FILE);

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let _ = load_configs(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_creates_layout_and_is_repeatable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = bootstrap_workspace(dir.path()).expect("first bootstrap");
        assert!(first.config_dir.join("app.json").exists());
        assert!(first.config_dir.join("backend.json").exists());
        assert!(first.logs_dir.is_dir());
        assert!(first.database_path.exists());

        let second = bootstrap_workspace(dir.path()).expect("second bootstrap");
        assert_eq!(second.database_path, first.database_path);
    }
}
