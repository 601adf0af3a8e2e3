use super::ProjectConfig;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding all beads state inside a project.
pub const BEADS_DIR: &str = ".beads";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

impl ProjectConfig {
    /// Load `.beads/config.yaml` under `root`. A missing file yields defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(BEADS_DIR).join(CONFIG_FILE_NAME);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                )))
            }
        };

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Find the project root: the nearest ancestor of `start` containing `.beads/`.
pub fn find_project_root(start: &Path) -> Result<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    let mut dir = Some(start.as_path());
    while let Some(current) = dir {
        if current.join(BEADS_DIR).is_dir() {
            return Ok(current.to_path_buf());
        }
        dir = current.parent();
    }

    Err(Error::Config(format!(
        "Could not find a {} directory in {} or any parent",
        BEADS_DIR,
        start.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::load(dir.path()).unwrap();
        assert!(config.server.port.is_none());
    }

    #[test]
    fn loads_config_from_beads_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(BEADS_DIR)).unwrap();
        fs::write(
            dir.path().join(BEADS_DIR).join(CONFIG_FILE_NAME),
            "server:\n  database: tracker\n",
        )
        .unwrap();
        let config = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(config.server.database(), "tracker");
    }

    #[test]
    fn finds_root_from_nested_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(BEADS_DIR)).unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let root = find_project_root(&nested).unwrap();
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn missing_root_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = find_project_root(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
