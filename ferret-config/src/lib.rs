//! Ferret configuration.

pub mod error;
pub mod general;
pub mod pool;

pub use error::Error;
pub use general::General;
pub use pool::Pool;

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::info;

static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Top-level configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub pool: Pool,
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        info!("loaded configuration from {:?}", path);
        Ok(config)
    }
}

/// The process-wide configuration.
pub fn config() -> Arc<Config> {
    CONFIG.load_full()
}

/// Install a new process-wide configuration.
pub fn set(config: Config) {
    CONFIG.store(Arc::new(config));
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_config_serializable() {
        let config = Config::default();
        toml::to_string(&config).unwrap();
    }

    #[test]
    fn test_load_round_trip() {
        let config = Config::default();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.general.remote_port, config.general.remote_port);
        assert_eq!(parsed.pool.max_databases, config.pool.max_databases);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [general]
            node_name = "searcher-1"

            [pool]
            max_database_readers = 10
            "#,
        )
        .unwrap();

        assert_eq!(parsed.general.node_name, "searcher-1");
        assert_eq!(parsed.general.remote_port, 8880);
        assert_eq!(parsed.pool.max_database_readers, 10);
        assert_eq!(parsed.pool.max_databases, 400);
    }
}
