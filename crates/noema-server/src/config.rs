use noema_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// `noema.toml`: a `[server]` section plus the engine sections
/// (`[store]`, `[semantic]`, `[reasoning]`, `[pipeline]`, `[learning]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NoemaConfig {
    pub server: ServerConfig,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address
    pub http_addr: SocketAddr,

    /// Data directory; overrides `[store] data_dir` when set
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 9191)),
            data_dir: None,
        }
    }
}

impl NoemaConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Ok(toml::from_str(&text)?)
    }

    /// Load `path` when it exists, defaults otherwise. A file that exists
    /// but does not parse is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply command-line / environment overrides.
    pub fn with_overrides(mut self, data_dir: Option<PathBuf>, http_addr: Option<SocketAddr>) -> Self {
        if let Some(dir) = data_dir {
            self.server.data_dir = Some(dir);
        }
        if let Some(addr) = http_addr {
            self.server.http_addr = addr;
        }
        self
    }

    pub fn data_dir(&self) -> &Path {
        self.server
            .data_dir
            .as_deref()
            .unwrap_or(&self.engine.store.data_dir)
    }

    /// Engine configuration with the server's data directory applied.
    pub fn engine_config(&self) -> EngineConfig {
        self.engine.clone().with_data_dir(self.data_dir())
    }

    pub fn db_path(&self) -> PathBuf {
        self.engine_config().store.db_path()
    }

    pub fn validate(&self) -> Vec<String> {
        self.engine_config().validate()
    }
}
