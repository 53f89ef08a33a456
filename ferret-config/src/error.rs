//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("configuration syntax: {0}")]
    Toml(#[from] toml::de::Error),
}
