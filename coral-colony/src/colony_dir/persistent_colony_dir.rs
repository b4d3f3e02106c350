use super::{config_yaml::SAMPLE_CONFIG, paths, ColonyConfig, ColonyDir};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    io::Write,
    path::{Path, PathBuf},
};

/// The persistent state directory of a colony:
/// `<config_dir>/colonies/<colony_id>/`.
#[derive(Debug, Clone)]
pub struct PersistentColonyDir {
    expanded_path: PathBuf,
}

impl PersistentColonyDir {
    /// A directory rooted at an explicit path.
    /// `path` will be expanded to the home directory if it starts with "~".
    pub fn new(path: PathBuf) -> Self {
        Self {
            expanded_path: Self::expand_home_dir(path),
        }
    }

    /// The conventional location for `colony_id` under the user's config
    /// directory (`~/.config/coral/colonies/<colony_id>` on linux).
    pub fn for_colony(colony_id: &str) -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("~/.config"));
        Self::new(base.join("coral").join("colonies").join(colony_id))
    }

    /// Expands the directory to the home directory if it starts with "~".
    fn expand_home_dir(path: PathBuf) -> PathBuf {
        let path = match path.to_str() {
            Some(path) => path,
            None => {
                // Path not valid utf-8 so we can't expand it.
                return path;
            }
        };

        if path.starts_with("~/") {
            if let Some(home) = dirs::home_dir() {
                let without_home = path.strip_prefix("~/").expect("Invalid ~ prefix");
                return home.join(without_home);
            }
        }
        PathBuf::from(path)
    }

    /// Returns the config file path in this directory.
    pub fn config_file_path(&self) -> PathBuf {
        self.expanded_path.join(paths::CONFIG_FILE)
    }

    fn write_sample_config_file(&self) -> anyhow::Result<()> {
        let config_file_path = self.config_file_path();
        let mut config_file = std::fs::File::create(config_file_path)?;
        config_file.write_all(SAMPLE_CONFIG.as_bytes())?;
        Ok(())
    }
}

impl ColonyDir for PersistentColonyDir {
    fn path(&self) -> &Path {
        &self.expanded_path
    }

    /// Makes sure the colony directory exists with owner-only permissions.
    fn ensure_dir_exists_and_is_writable(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.expanded_path)?;
        #[cfg(unix)]
        {
            std::fs::set_permissions(
                &self.expanded_path,
                std::fs::Permissions::from_mode(0o700),
            )?;
        }

        // Check if we can write to the colony directory
        let test_file_path = self
            .expanded_path
            .join("test_write_4c1f2d0a92e145d2b6a7c58e3f90a113"); // random file name to not conflict with anything
        std::fs::write(test_file_path.clone(), b"test")
            .map_err(|err| anyhow::anyhow!("Failed to write to colony directory: {}", err))?;
        std::fs::remove_file(test_file_path)
            .map_err(|err| anyhow::anyhow!("Failed to write to colony directory: {}", err))?;
        Ok(())
    }

    /// Reads the config file from the colony directory.
    /// Creates a sample config file if it doesn't exist.
    fn read_or_create_config(&self) -> anyhow::Result<ColonyConfig> {
        let config_file_path = self.config_file_path();
        if !config_file_path.exists() {
            self.write_sample_config_file()?;
        }
        let config = ColonyConfig::from_file(config_file_path)?;
        Ok(config)
    }
}
