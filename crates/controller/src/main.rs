//! Controller binary reconciling one replicated MySQL cluster.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod manifest;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use replicant_agent_tls::{
    DnsResolver, IdentityPaths, ReloadError, Reloader, Resolver, TlsAgentFactory,
    TlsFactoryConfig,
};
use replicant_cluster::{LogSink, ReconcileConfig, Reconciler, StaticSecrets};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::manifest::Manifest;

/// Controller error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Manifest file could not be read
    #[error("failed to read manifest {path}: {source}")]
    Manifest {
        /// Manifest path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Manifest is not valid JSON for a cluster
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    /// Manifest parsed but is unusable
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// TLS identity error
    #[error(transparent)]
    Tls(#[from] ReloadError),

    /// Reconcile error
    #[error(transparent)]
    Reconcile(#[from] replicant_cluster::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON manifest declaring the cluster, its secrets and optional static addresses
    #[arg(long, env = "REPLICANT_MANIFEST")]
    manifest: PathBuf,

    /// CA bundle used to verify agents
    #[arg(long, env = "REPLICANT_TLS_CA")]
    tls_ca: PathBuf,

    /// Client certificate chain presented to agents
    #[arg(long, env = "REPLICANT_TLS_CERT")]
    tls_cert: PathBuf,

    /// Client private key
    #[arg(long, env = "REPLICANT_TLS_KEY")]
    tls_key: PathBuf,

    /// Seconds between TLS identity reloads
    #[arg(long, default_value_t = 60, env = "REPLICANT_TLS_RELOAD_INTERVAL_SECS")]
    tls_reload_interval_secs: u64,

    /// Port agents listen on
    #[arg(long, default_value_t = replicant_agent::AGENT_PORT, env = "REPLICANT_AGENT_PORT")]
    agent_port: u16,

    /// Seconds allowed for one reconcile pass
    #[arg(long, default_value_t = 30, env = "REPLICANT_PASS_TIMEOUT_SECS")]
    pass_timeout_secs: u64,

    /// Seconds allowed for one instance's status query
    #[arg(long, default_value_t = 5, env = "REPLICANT_INSTANCE_TIMEOUT_SECS")]
    instance_timeout_secs: u64,

    /// Seconds between reconcile passes
    #[arg(long, default_value_t = 15, env = "REPLICANT_RESYNC_INTERVAL_SECS")]
    resync_interval_secs: u64,

    /// Unreachable instances tolerated before the cluster is reported degraded
    #[arg(long, default_value_t = 0, env = "REPLICANT_UNREACHABLE_TOLERANCE")]
    unreachable_tolerance: usize,

    /// Run a single pass, print the cluster status as JSON and exit
    #[arg(long)]
    once: bool,
}

impl Args {
    const fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            pass_timeout: Duration::from_secs(self.pass_timeout_secs),
            instance_timeout: Duration::from_secs(self.instance_timeout_secs),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            unreachable_tolerance: self.unreachable_tolerance,
        }
    }

    fn factory_config(&self) -> TlsFactoryConfig {
        TlsFactoryConfig {
            agent_port: self.agent_port,
            ..TlsFactoryConfig::default()
        }
    }

    fn identity_paths(&self) -> IdentityPaths {
        IdentityPaths {
            ca: self.tls_ca.clone(),
            cert: self.tls_cert.clone(),
            key: self.tls_key.clone(),
        }
    }
}

async fn wait_for_shutdown(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received interrupt signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt signal");
    }

    info!("Shutting down");
    token.cancel();
}

async fn run<R>(
    args: &Args,
    manifest: &Manifest,
    secrets: StaticSecrets,
    resolver: R,
    reloader: Arc<Reloader>,
    token: CancellationToken,
) -> Result<(), Error>
where
    R: Resolver,
{
    let factory = TlsAgentFactory::with_config(resolver, reloader, args.factory_config());
    let reconciler = Reconciler::with_config(
        Arc::new(factory),
        Arc::new(secrets),
        Arc::new(LogSink),
        args.reconcile_config(),
    );

    if args.once {
        let report = reconciler.reconcile(&manifest.cluster).await?;
        println!("{}", serde_json::to_string_pretty(&report.status.summary())?);
        return Ok(());
    }

    reconciler
        .run_until_cancelled(&manifest.cluster, token)
        .await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let manifest = Manifest::load(&args.manifest)?;
    let secrets = manifest.secrets();
    info!(
        "managing cluster {} with {} instances (intermediate: {})",
        manifest.cluster,
        manifest.cluster.replicas,
        manifest.cluster.is_intermediate()
    );

    let shutdown_token = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown_token.clone()));

    let reloader = Arc::new(Reloader::from_pem_files(args.identity_paths())?);
    let watcher = Arc::clone(&reloader).spawn_watch(
        Duration::from_secs(args.tls_reload_interval_secs),
        shutdown_token.clone(),
    );

    let result = match manifest.static_resolver() {
        Some(resolver) => {
            run(&args, &manifest, secrets, resolver, reloader, shutdown_token.clone()).await
        }
        None => {
            run(&args, &manifest, secrets, DnsResolver, reloader, shutdown_token.clone()).await
        }
    };

    shutdown_token.cancel();
    if let Err(e) = watcher.await {
        warn!("TLS identity watcher failed: {}", e);
    }

    result
}
