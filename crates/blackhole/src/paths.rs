use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories_next::BaseDirs;

pub const ENV_CONFIG_DIR: &str = "BLACKHOLE_CONFIG_DIR";

const APPLICATION_DIR: &str = "blackhole";
const CONFIG_FILE: &str = "blackhole.toml";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        if let Some(config_dir) = env_override(ENV_CONFIG_DIR) {
            return Ok(Self { config_dir });
        }
        let base = BaseDirs::new().ok_or_else(|| anyhow!("failed to determine user directories"))?;
        Ok(Self {
            config_dir: base.config_dir().join(APPLICATION_DIR),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.as_os_str().is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}
