use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use launcher_core::{LauncherConfig, CONFIG_FILE};

/// Configuration plus the directory every command runs in.
pub struct Loaded {
    pub config: LauncherConfig,
    pub project_root: PathBuf,
    /// `launcher.toml` was found
    pub from_file: bool,
}

/// Read `launcher.toml` from `dir`, or fall back to the stock pipeline.
///
/// The project root is `[project] root` resolved against `dir`, or `dir`
/// itself.
pub async fn load(dir: &Path) -> Result<Loaded> {
    let path = dir.join(CONFIG_FILE);
    let (config, from_file) = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = LauncherConfig::from_toml_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        (config, true)
    } else {
        (LauncherConfig::default(), false)
    };

    let project_root = match &config.project.root {
        Some(root) if root.is_absolute() => root.clone(),
        Some(root) => dir.join(root),
        None => dir.to_path_buf(),
    };

    Ok(Loaded {
        config,
        project_root,
        from_file,
    })
}

/// Write the default `launcher.toml` into `dir`. Returns `false` when one
/// already exists and `force` is not set.
pub async fn write_default(dir: &Path, project_name: &str, force: bool) -> Result<bool> {
    let path = dir.join(CONFIG_FILE);
    if !force && tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(false);
    }

    let mut config = LauncherConfig::default();
    config.project.name = Some(project_name.to_string());
    let content = config
        .to_toml_string()
        .context("Failed to serialize default configuration")?;

    tokio::fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_without_file_uses_defaults() {
        let dir = TempDir::new().unwrap();

        let loaded = load(dir.path()).await.unwrap();

        assert!(!loaded.from_file);
        assert_eq!(loaded.config.phases.len(), 7);
        assert_eq!(loaded.project_root, dir.path());
    }

    #[tokio::test]
    async fn test_written_default_loads_back() {
        let dir = TempDir::new().unwrap();

        assert!(write_default(dir.path(), "fonoster", false).await.unwrap());
        let loaded = load(dir.path()).await.unwrap();

        assert!(loaded.from_file);
        assert_eq!(loaded.config.project.name.as_deref(), Some("fonoster"));
        assert_eq!(loaded.config.server.port, 3001);
        assert_eq!(loaded.config.phases.len(), 7);
    }

    #[tokio::test]
    async fn test_write_default_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[server]\nport = 4000\n").unwrap();

        assert!(!write_default(dir.path(), "x", false).await.unwrap());
        let loaded = load(dir.path()).await.unwrap();
        assert_eq!(loaded.config.server.port, 4000);
    }

    #[tokio::test]
    async fn test_relative_root_resolves_against_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[project]\nroot = \"app\"\n").unwrap();

        let loaded = load(dir.path()).await.unwrap();
        assert_eq!(loaded.project_root, dir.path().join("app"));
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[[phases]]\nid = 1\nname = \"A\"\ncommand = \"a\"\n\n[[phases]]\nid = 1\nname = \"B\"\ncommand = \"b\"\n",
        )
        .unwrap();

        assert!(load(dir.path()).await.is_err());
    }
}
