use crate::resource::VersionRange;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 运行时配置 (Runtime Configuration)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Catalog files registered at start-up, in order.
    pub catalogs: Vec<PathBuf>,
    pub cache: CacheConfig,
    pub download: DownloadConfig,
    pub versions: VersionRange,
    pub resolve_timeout_secs: Option<u64>,
    pub execution_timeout_secs: Option<u64>,
}

impl RuntimeConfig {
    pub fn resolve_timeout(&self) -> Option<Duration> {
        self.resolve_timeout_secs.map(Duration::from_secs)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    None,
    #[default]
    Memory,
    Disk,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub kind: CacheKind,
    /// Disk cache root; the platform cache directory when unset.
    pub path: Option<PathBuf>,
    /// Redis URL for `kind: redis`.
    pub url: Option<String>,
    pub prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::Memory,
            path: None,
            url: None,
            prefix: "skein:blob".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    /// Base directory for relative file URIs.
    pub file_root: Option<PathBuf>,
}

impl DownloadConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let path = path.as_ref();
    let yaml_content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file from {}", path.display()))?;

    let mut config: RuntimeConfig = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))?;

    // Relative catalog paths are relative to the config file.
    if let Some(base) = path.parent() {
        for catalog in &mut config.catalogs {
            if catalog.is_relative() {
                *catalog = base.join(&*catalog);
            }
        }
    }

    Ok(config)
}
