mod config;
mod handlers;
mod http_error;

use std::{
    net::{AddrParseError, IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use diagnostics_bundle::{
    builder::{BuilderConfig, BundleBuilder},
    factory::{CollectorFactory, EndpointsConfig},
    node::{NodeIdentity, Role, UrlBuilder},
    store::BundleStore,
};
use diagnostics_coordinator::{ClusterCoordinator, CoordinatorConfig, NodeClient};
use futures::{future, pin_mut, FutureExt};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::handlers::AppState;

pub const APP_NAME: &str = "diagnostics-server";

#[derive(clap::Parser)]
pub struct Args {
    /// Directory holding bundle state and archives.
    #[clap(long, env)]
    work_dir: PathBuf,

    /// Endpoints configuration document (JSON).
    #[clap(long, env)]
    endpoints_config: PathBuf,

    /// JSON file enumerating the cluster's nodes.
    #[clap(long, env)]
    nodes_file: PathBuf,

    /// Address and port of this node, also used to reach its local
    /// services.
    #[clap(long, env)]
    node_ip: IpAddr,

    /// Role of this node: master, agent or public_agent.
    #[clap(long, env)]
    node_role: Role,

    #[clap(long, env, default_value = "0.0.0.0:1050")]
    listen_addr: String,

    /// Diagnostics port of master nodes.
    #[clap(long, env, default_value_t = 1050)]
    master_port: u16,

    /// Diagnostics port of agent nodes.
    #[clap(long, env, default_value_t = 61001)]
    agent_port: u16,

    /// Reach peers over https.
    #[clap(long, env)]
    force_tls: bool,

    /// Concurrent collectors per bundle.
    #[clap(long, env, default_value_t = diagnostics_bundle::builder::DEFAULT_WORKERS)]
    workers: usize,

    /// Per-bundle deadline in seconds.
    #[clap(long, env, default_value_t = 12 * 60 * 60)]
    bundle_timeout_secs: u64,

    /// Per-collector deadline in seconds.
    #[clap(long, env, default_value_t = 60)]
    collector_timeout_secs: u64,

    /// Interval between status polls against peers, in seconds.
    #[clap(long, env, default_value_t = 1)]
    poll_interval_secs: u64,
}

#[derive(Debug, Snafu)]
enum StartupError {
    #[snafu(display("unable to read endpoints configuration from {path:?}"))]
    ReadEndpointsConfig {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("unable to parse endpoints configuration"))]
    ParseEndpointsConfig { source: serde_json::Error },

    #[snafu(display("failed to open bundle store"))]
    OpenStore {
        source: diagnostics_bundle::store::Error,
    },

    #[snafu(display("failed to parse listen address"))]
    ParseListenAddr { source: AddrParseError },

    #[snafu(display("failed to register SIGTERM handler"))]
    RegisterSigterm { source: std::io::Error },

    #[snafu(display("failed to bind listener"))]
    BindListener { source: std::io::Error },

    #[snafu(display("failed to run server"))]
    RunServer { source: std::io::Error },
}

async fn read_endpoints_config(path: &Path) -> Result<EndpointsConfig, StartupError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .context(ReadEndpointsConfigSnafu { path })?;
    serde_json::from_str(&raw).context(ParseEndpointsConfigSnafu)
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let shutdown_requested = tokio::signal::ctrl_c().map(|_| ());
    #[cfg(unix)]
    let shutdown_requested = {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context(RegisterSigtermSnafu)?;
        async move {
            let sigterm = sigterm.recv().map(|_| ());
            pin_mut!(shutdown_requested, sigterm);
            future::select(shutdown_requested, sigterm).await;
        }
    };

    let endpoints = read_endpoints_config(&args.endpoints_config).await?;
    let store = BundleStore::open(&args.work_dir).context(OpenStoreSnafu)?;
    let http = reqwest::Client::default();
    let identity = NodeIdentity {
        ip: args.node_ip,
        role: args.node_role,
    };

    let factory = CollectorFactory::new(
        endpoints,
        http.clone(),
        args.node_ip,
        Duration::from_secs(args.collector_timeout_secs),
    );
    let builder = BundleBuilder::new(
        store.clone(),
        identity.clone(),
        BuilderConfig {
            workers: args.workers,
            bundle_timeout: Duration::from_secs(args.bundle_timeout_secs),
        },
    );
    let coordinator = ClusterCoordinator::new(
        store,
        NodeClient::new(http),
        UrlBuilder::new(args.master_port, args.agent_port, args.force_tls),
        identity,
        CoordinatorConfig {
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            node_deadline: Duration::from_secs(args.bundle_timeout_secs),
            unknown_grace: diagnostics_coordinator::coordinator::DEFAULT_UNKNOWN_GRACE,
        },
    );
    let state = AppState {
        builder,
        coordinator,
        factory: Arc::new(factory),
        nodes: Arc::new(config::FileNodeProvider::new(&args.nodes_file)),
        local_role: args.node_role,
    };

    let listen_addr: SocketAddr = args.listen_addr.parse().context(ParseListenAddrSnafu)?;
    let listener = TcpListener::bind(listen_addr)
        .await
        .context(BindListenerSnafu)?;
    let address = listener.local_addr().context(BindListenerSnafu)?;
    tracing::info!(%address, app = APP_NAME, node.role = %args.node_role, "listening");

    axum::serve(listener, handlers::router(state).into_make_service())
        .with_graceful_shutdown(shutdown_requested)
        .await
        .context(RunServerSnafu)
}
