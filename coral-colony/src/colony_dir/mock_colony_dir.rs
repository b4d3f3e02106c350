use super::{ColonyConfig, ColonyDir};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// A colony directory in a temp dir, removed on drop. Tests only.
#[derive(Debug, Clone)]
pub struct MockColonyDir {
    config: ColonyConfig,
    path: PathBuf,
    /// Keeps the temporary directory alive for the lifetime of the mock.
    _temp_dir: Arc<tempfile::TempDir>,
}

impl MockColonyDir {
    /// A fresh temp-backed directory with the given colony id.
    pub fn new(colony_id: &str) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().to_path_buf();
        Self {
            config: ColonyConfig::with_id(colony_id),
            path,
            _temp_dir: Arc::new(temp_dir),
        }
    }

    /// A fresh temp-backed directory with a fixed test colony id.
    pub fn test() -> Self {
        Self::new("test-colony-0000")
    }

    /// Mutable access to the config before the context is built.
    pub fn config_mut(&mut self) -> &mut ColonyConfig {
        &mut self.config
    }
}

impl ColonyDir for MockColonyDir {
    fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_dir_exists_and_is_writable(&self) -> anyhow::Result<()> {
        // The temp dir already exists and is writable.
        Ok(())
    }

    fn read_or_create_config(&self) -> anyhow::Result<ColonyConfig> {
        Ok(self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_dir_is_isolated_and_cleaned_up() {
        let path;
        {
            let dir = MockColonyDir::test();
            path = dir.path().to_path_buf();
            assert!(path.exists());
            assert_eq!(dir.read_or_create_config().unwrap().id, "test-colony-0000");
        }
        assert!(!path.exists());
    }
}
