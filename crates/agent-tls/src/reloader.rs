//! Reloadable TLS client identity.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::CertificateDer;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ReloadError;

/// Locations of the PEM files making up the client identity.
#[derive(Clone, Debug)]
pub struct IdentityPaths {
    /// CA bundle used to verify agents.
    pub ca: PathBuf,
    /// Client certificate chain.
    pub cert: PathBuf,
    /// Client private key.
    pub key: PathBuf,
}

/// Holds the current TLS client config.
///
/// Readers take a snapshot without locking; a reload replaces the whole
/// config atomically, so a reader sees either the old or the new identity,
/// never a mix.
#[derive(Debug)]
pub struct Reloader {
    config: ArcSwap<ClientConfig>,
    paths: Option<IdentityPaths>,
}

impl Reloader {
    /// Creates a reloader serving a fixed config.
    #[must_use]
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config: ArcSwap::new(config),
            paths: None,
        }
    }

    /// Loads the identity from PEM files; `reload` re-reads the same files.
    ///
    /// # Errors
    ///
    /// Returns an error if any file is unreadable or the identity is invalid.
    pub fn from_pem_files(paths: IdentityPaths) -> Result<Self, ReloadError> {
        let config = load_client_config(&paths)?;
        info!("loaded TLS client identity from {}", paths.cert.display());

        Ok(Self {
            config: ArcSwap::from_pointee(config),
            paths: Some(paths),
        })
    }

    /// Snapshot of the current client config.
    #[must_use]
    pub fn tls_client_config(&self) -> Arc<ClientConfig> {
        self.config.load_full()
    }

    /// Replaces the current config.
    pub fn replace(&self, config: Arc<ClientConfig>) {
        self.config.store(config);
    }

    /// Re-reads the identity files. On failure the previous identity stays
    /// in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the reloader has no files or they fail to load.
    pub fn reload(&self) -> Result<(), ReloadError> {
        let paths = self.paths.as_ref().ok_or(ReloadError::NoSource)?;
        let config = load_client_config(paths)?;
        self.config.store(Arc::new(config));
        debug!("reloaded TLS client identity");

        Ok(())
    }

    /// Reloads the identity every `interval` until `token` is cancelled.
    pub fn spawn_watch(self: Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; the identity is already fresh.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.reload() {
                            warn!("keeping previous TLS identity: {}", e);
                        }
                    }
                    () = token.cancelled() => {
                        debug!("TLS identity watcher shutting down");
                        break;
                    }
                }
            }
        })
    }
}

fn open(path: &Path) -> Result<BufReader<File>, ReloadError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ReloadError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ReloadError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ReloadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(ReloadError::NoCertificates(path.to_path_buf()));
    }

    Ok(certs)
}

fn load_client_config(paths: &IdentityPaths) -> Result<ClientConfig, ReloadError> {
    let mut roots = RootCertStore::empty();
    for ca in read_certs(&paths.ca)? {
        roots.add(ca)?;
    }

    let chain = read_certs(&paths.cert)?;
    let key = rustls_pemfile::private_key(&mut open(&paths.key)?)
        .map_err(|source| ReloadError::Io {
            path: paths.key.clone(),
            source,
        })?
        .ok_or_else(|| ReloadError::NoPrivateKey(paths.key.clone()))?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)?;

    Ok(config)
}
