//! Error types for TLS identity loading

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the TLS client identity.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// A PEM file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A certificate file held no certificates.
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    /// The key file held no private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    /// rustls rejected the identity.
    #[error("invalid TLS identity: {0}")]
    Tls(#[from] rustls::Error),

    /// The reloader was built from a fixed config and has nothing to reload.
    #[error("reloader has no identity files configured")]
    NoSource,
}
