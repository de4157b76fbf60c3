use std::{net::IpAddr, sync::Arc};

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use diagnostics_bundle::{
    builder::{self, BundleBuilder},
    bundle::Bundle,
    factory::CollectorFactory,
    node::Role,
    store,
};
use diagnostics_coordinator::{coordinator, ClusterCoordinator};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tokio_util::io::ReaderStream;

use crate::{
    config::{self, NodeProvider},
    http_error::{self, JsonResponse},
};

#[derive(Clone)]
pub struct AppState {
    pub builder: Arc<BundleBuilder>,
    pub coordinator: Arc<ClusterCoordinator>,
    pub factory: Arc<CollectorFactory>,
    pub nodes: Arc<dyn NodeProvider>,
    pub local_role: Role,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/diagnostics", get(list_bundles))
        .route(
            "/diagnostics/{id}",
            put(create_bundle).get(get_bundle).delete(delete_bundle),
        )
        .route("/diagnostics/{id}/file", get(get_bundle_file))
        .with_state(state)
}

#[derive(Debug, Snafu)]
pub enum ApiError {
    #[snafu(display("bundle {id:?} not found"))]
    NotFound { id: String },

    #[snafu(display("bundle {id:?} already exists"))]
    Conflict { id: String },

    #[snafu(display("invalid bundle id {id:?}"))]
    InvalidId { id: String },

    #[snafu(display("invalid request body"))]
    InvalidBody { source: serde_json::Error },

    #[snafu(display("node discovery failed"))]
    Discovery { source: config::ProviderError },

    #[snafu(display("bundle store is unavailable"))]
    StoreUnavailable { source: store::Error },

    #[snafu(display("{message}"))]
    Internal { message: String },
}

impl http_error::Error for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::InvalidId { .. } | ApiError::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            ApiError::Discovery { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::StoreUnavailable { .. } => StatusCode::INSUFFICIENT_STORAGE,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn internal(error: &(dyn std::error::Error + 'static)) -> ApiError {
    ApiError::Internal {
        message: std::iter::successors(Some(error), |error| error.source())
            .map(|error| error.to_string())
            .collect::<Vec<_>>()
            .join(": "),
    }
}

/// Work-directory trouble (unreadable, unwritable, out of space) is 507
/// wherever it surfaces, not just on enumeration.
fn store_error(id: &str, error: store::Error) -> ApiError {
    match error {
        store::Error::NotFound { .. } => ApiError::NotFound { id: id.to_string() },
        store::Error::Conflict { .. } => ApiError::Conflict { id: id.to_string() },
        error @ (store::Error::EnumerateWorkDir { .. }
        | store::Error::ReserveBundleDir { .. }
        | store::Error::WriteState { .. }
        | store::Error::WorkDirNotADirectory { .. }) => {
            ApiError::StoreUnavailable { source: error }
        }
        error => internal(&error),
    }
}

fn builder_error(id: &str, error: builder::Error) -> ApiError {
    match error {
        builder::Error::Store { source } => store_error(id, source),
        builder::Error::NoArchive { .. } => ApiError::NotFound { id: id.to_string() },
        error => internal(&error),
    }
}

fn coordinator_error(id: &str, error: coordinator::Error) -> ApiError {
    match error {
        coordinator::Error::Store { source } => store_error(id, source),
        error => internal(&error),
    }
}

/// Ids double as directory names in the store, so they must be one safe
/// path segment. Deployments may layer stricter validators on top.
fn validate_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
    {
        return Err(ApiError::InvalidId { id: id.to_string() });
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum CreateType {
    Local,
    Cluster,
}

#[derive(Deserialize)]
struct CreateRequest {
    #[serde(rename = "type")]
    bundle_type: CreateType,
    #[serde(default)]
    nodes: Option<Vec<IpAddr>>,
}

async fn list_bundles(
    State(state): State<AppState>,
) -> Result<Json<Vec<Bundle>>, JsonResponse<ApiError>> {
    let bundles = state.builder.list().map_err(|error| match error {
        builder::Error::Store { source } => ApiError::StoreUnavailable { source },
        error => internal(&error),
    })?;
    Ok(Json(bundles))
}

async fn create_bundle(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Bundle>, JsonResponse<ApiError>> {
    validate_id(&id)?;
    let request: CreateRequest =
        serde_json::from_slice(&body).context(InvalidBodySnafu)?;
    let bundle = match request.bundle_type {
        CreateType::Local => {
            let collectors = state.factory.collectors_for(state.local_role);
            state
                .builder
                .create(&id, collectors)
                .map_err(|error| builder_error(&id, error))?
        }
        CreateType::Cluster => {
            let mut nodes = state.nodes.nodes().context(DiscoverySnafu)?;
            if let Some(wanted) = request.nodes {
                nodes.retain(|node| wanted.contains(&node.ip));
            }
            state
                .coordinator
                .create_cluster(&id, nodes)
                .map_err(|error| coordinator_error(&id, error))?
        }
    };
    Ok(Json(bundle))
}

async fn get_bundle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Bundle>, JsonResponse<ApiError>> {
    validate_id(&id)?;
    let bundle = state
        .builder
        .get(&id)
        .map_err(|error| builder_error(&id, error))?;
    Ok(Json(bundle))
}

async fn get_bundle_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, JsonResponse<ApiError>> {
    validate_id(&id)?;
    let (_, file) = state
        .builder
        .open_archive(&id)
        .await
        .map_err(|error| builder_error(&id, error))?;
    Ok((
        [(
            header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/zip"),
        )],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn delete_bundle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, JsonResponse<ApiError>> {
    validate_id(&id)?;
    // a running cluster build is torn down first; its Canceled record is
    // then tombstoned as part of this delete
    let cluster_was_running = state.coordinator.stop(&id).await;
    let (bundle, modified) = state
        .builder
        .delete(&id, cluster_was_running)
        .await
        .map_err(|error| builder_error(&id, error))?;
    let status = if modified {
        StatusCode::OK
    } else {
        StatusCode::NOT_MODIFIED
    };
    Ok((status, Json(bundle)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnostics_bundle::{
        builder::BuilderConfig,
        bundle::BundleStatus,
        factory::EndpointsConfig,
        node::{NodeDescriptor, NodeIdentity, UrlBuilder},
        store::BundleStore,
    };
    use diagnostics_coordinator::{CoordinatorConfig, NodeClient};
    use std::{io::Read, net::SocketAddr, time::Duration};
    use tempfile::TempDir;

    struct StaticNodes(Vec<NodeDescriptor>);

    impl NodeProvider for StaticNodes {
        fn nodes(&self) -> Result<Vec<NodeDescriptor>, config::ProviderError> {
            Ok(self.0.clone())
        }
    }

    struct TestApp {
        addr: SocketAddr,
        state: AppState,
        _work_dir: TempDir,
    }

    impl TestApp {
        fn url(&self, path: &str) -> String {
            format!("http://{}{path}", self.addr)
        }
    }

    /// Boots a full diagnostics server on `bind_ip`, with collectors taken
    /// from `endpoints` and peers resolved against the given ports.
    async fn spawn_app(
        bind_ip: IpAddr,
        bind_port: u16,
        role: Role,
        endpoints: EndpointsConfig,
        nodes: Vec<NodeDescriptor>,
        master_port: u16,
        agent_port: u16,
    ) -> TestApp {
        let work_dir = TempDir::new().unwrap();
        let store = BundleStore::open(work_dir.path()).unwrap();
        let http = reqwest::Client::new();
        let identity = NodeIdentity { ip: bind_ip, role };
        let factory = CollectorFactory::new(
            endpoints,
            http.clone(),
            bind_ip,
            Duration::from_secs(10),
        );
        let builder = BundleBuilder::new(store.clone(), identity.clone(), BuilderConfig::default());
        let coordinator = ClusterCoordinator::new(
            store,
            NodeClient::new(http),
            UrlBuilder::new(master_port, agent_port, false),
            identity,
            CoordinatorConfig {
                poll_interval: Duration::from_millis(50),
                node_deadline: Duration::from_secs(20),
                unknown_grace: Duration::from_secs(5),
            },
        );
        let state = AppState {
            builder,
            coordinator,
            factory: Arc::new(factory),
            nodes: Arc::new(StaticNodes(nodes)),
            local_role: role,
        };

        let listener = tokio::net::TcpListener::bind((bind_ip, bind_port))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .await
                .unwrap();
        });
        TestApp {
            addr,
            state,
            _work_dir: work_dir,
        }
    }

    async fn simple_app() -> TestApp {
        spawn_app(
            "127.0.0.1".parse().unwrap(),
            0,
            Role::Master,
            EndpointsConfig::default(),
            Vec::new(),
            1050,
            61001,
        )
        .await
    }

    async fn wait_done(app: &TestApp, id: &str) -> Bundle {
        let http = reqwest::Client::new();
        for _ in 0..600 {
            let bundle: Bundle = http
                .get(app.url(&format!("/diagnostics/{id}")))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if bundle.status.is_terminal() {
                return bundle;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("bundle {id} never reached a terminal status");
    }

    #[tokio::test]
    async fn empty_work_dir_lists_empty_array() {
        let app = simple_app().await;
        let response = reqwest::get(app.url("/diagnostics")).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn bare_directory_lists_as_unknown_with_zero_timestamps() {
        let app = simple_app().await;
        std::fs::create_dir(app._work_dir.path().join("bundle-0")).unwrap();

        let bundles: serde_json::Value = reqwest::get(app.url("/diagnostics"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(bundles[0]["id"], "bundle-0");
        assert_eq!(bundles[0]["status"], "Unknown");
        assert_eq!(bundles[0]["started_at"], "0001-01-01T00:00:00Z");
        assert_eq!(bundles[0]["stopped_at"], "0001-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn local_bundle_lifecycle_over_http() {
        let app = simple_app().await;
        let http = reqwest::Client::new();

        let response = http
            .put(app.url("/diagnostics/bundle-1"))
            .json(&serde_json::json!({"type": "local"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let created: Bundle = response.json().await.unwrap();
        assert_eq!(created.status, BundleStatus::Started);

        let done = wait_done(&app, "bundle-1").await;
        assert_eq!(done.status, BundleStatus::Done);

        let file = http
            .get(app.url("/diagnostics/bundle-1/file"))
            .send()
            .await
            .unwrap();
        assert_eq!(file.status(), 200);
        assert_eq!(
            file.headers()[axum::http::header::CONTENT_TYPE.as_str()],
            "application/zip"
        );
        let bytes = file.bytes().await.unwrap();
        let mut archive =
            zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
        assert!(archive.by_name("summaryReport.txt").is_ok());
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let app = simple_app().await;
        let http = reqwest::Client::new();
        let put_local = || {
            http.put(app.url("/diagnostics/bundle-1"))
                .json(&serde_json::json!({"type": "local"}))
                .send()
        };
        assert_eq!(put_local().await.unwrap().status(), 200);

        let response = put_local().await.unwrap();
        assert_eq!(response.status(), 409);
        let envelope: serde_json::Value = response.json().await.unwrap();
        assert_eq!(envelope["code"], 409);
        assert!(envelope["error"]
            .as_str()
            .unwrap()
            .contains("already exists"));
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = simple_app().await;
        let response = reqwest::Client::new()
            .put(app.url("/diagnostics/bundle-1"))
            .body("{\"type\": \"sideways\"}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let envelope: serde_json::Value = response.json().await.unwrap();
        assert_eq!(envelope["code"], 400);
    }

    #[tokio::test]
    async fn malformed_id_is_bad_request() {
        let app = simple_app().await;
        let response = reqwest::Client::new()
            .get(app.url("/diagnostics/bad%5Cid"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn missing_bundle_is_not_found() {
        let app = simple_app().await;
        let response = reqwest::get(app.url("/diagnostics/missing")).await.unwrap();
        assert_eq!(response.status(), 404);
        let envelope: serde_json::Value = response.json().await.unwrap();
        assert_eq!(envelope["code"], 404);

        let file = reqwest::get(app.url("/diagnostics/missing/file"))
            .await
            .unwrap();
        assert_eq!(file.status(), 404);
    }

    #[tokio::test]
    async fn delete_terminal_bundle_is_not_modified() {
        let app = simple_app().await;
        let store = app.state.builder.store();
        store.reserve("bundle-9").unwrap();
        let mut bundle = Bundle::new("bundle-9", Default::default());
        bundle.status = BundleStatus::Deleted;
        store.write_state(&bundle).unwrap();

        let response = reqwest::Client::new()
            .delete(app.url("/diagnostics/bundle-9"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 304);

        // the stored record is untouched
        let after = store.get("bundle-9").unwrap();
        assert_eq!(after.status, BundleStatus::Deleted);
    }

    #[tokio::test]
    async fn delete_done_bundle_succeeds_then_file_is_gone() {
        let app = simple_app().await;
        let http = reqwest::Client::new();
        http.put(app.url("/diagnostics/bundle-1"))
            .json(&serde_json::json!({"type": "local"}))
            .send()
            .await
            .unwrap();
        wait_done(&app, "bundle-1").await;

        let response = http
            .delete(app.url("/diagnostics/bundle-1"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let deleted: Bundle = response.json().await.unwrap();
        assert_eq!(deleted.status, BundleStatus::Deleted);

        let file = http
            .get(app.url("/diagnostics/bundle-1/file"))
            .send()
            .await
            .unwrap();
        assert_eq!(file.status(), 404);
    }

    #[tokio::test]
    async fn unreadable_work_dir_is_insufficient_storage() {
        let app = simple_app().await;
        std::fs::remove_dir_all(app._work_dir.path()).unwrap();
        let response = reqwest::get(app.url("/diagnostics")).await.unwrap();
        assert_eq!(response.status(), 507);
    }

    #[tokio::test]
    async fn create_with_unusable_work_dir_is_insufficient_storage() {
        let app = simple_app().await;
        std::fs::remove_dir_all(app._work_dir.path()).unwrap();
        let response = reqwest::Client::new()
            .put(app.url("/diagnostics/bundle-1"))
            .json(&serde_json::json!({"type": "local"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 507);
        let envelope: serde_json::Value = response.json().await.unwrap();
        assert_eq!(envelope["code"], 507);
    }

    #[tokio::test]
    async fn unavailable_discovery_is_service_unavailable() {
        struct BrokenNodes;
        impl NodeProvider for BrokenNodes {
            fn nodes(&self) -> Result<Vec<NodeDescriptor>, config::ProviderError> {
                crate::config::FileNodeProvider::new("/does/not/exist.json").nodes()
            }
        }

        let mut app = simple_app().await;
        app.state.nodes = Arc::new(BrokenNodes);
        // rebuild the router with the broken provider on a fresh listener
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = router(app.state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .await
                .unwrap();
        });

        let response = reqwest::Client::new()
            .put(format!("http://{addr}/diagnostics/cluster-1"))
            .json(&serde_json::json!({"type": "cluster"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);
    }

    /// End-to-end cluster scenario: a coordinator drives three peers, each
    /// of which collects one endpoint named `ping`, and the merged archive
    /// carries one `<ip>_<role>/ping` entry per peer.
    #[tokio::test]
    async fn cluster_bundle_merges_three_peers() {
        use axum::routing::get as axum_get;

        // the collected endpoint, reachable from every peer address
        let ping_listener = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        let ping_port = ping_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let app = Router::new().route("/ping", axum_get(|| async { "pong" }));
            axum::serve(ping_listener, app.into_make_service())
                .await
                .unwrap();
        });

        let endpoints: EndpointsConfig = serde_json::from_value(serde_json::json!({
            "HTTPEndpoints": [
                {"Port": ping_port, "URI": "/ping", "FileName": "ping"}
            ]
        }))
        .unwrap();

        let peer_specs: Vec<(IpAddr, Role)> = vec![
            ("127.0.0.5".parse().unwrap(), Role::Master),
            ("127.0.0.3".parse().unwrap(), Role::Agent),
            ("127.0.0.4".parse().unwrap(), Role::Agent),
        ];

        // peers first: the master peer picks its port, the first agent
        // picks the shared agent port, the second agent reuses it
        let peer_master = spawn_app(
            peer_specs[0].0,
            0,
            Role::Master,
            endpoints.clone(),
            Vec::new(),
            1050,
            61001,
        )
        .await;
        let peer_agent_one = spawn_app(
            peer_specs[1].0,
            0,
            Role::Agent,
            endpoints.clone(),
            Vec::new(),
            1050,
            61001,
        )
        .await;
        let agent_port = peer_agent_one.addr.port();
        let peer_agent_two = spawn_app(
            peer_specs[2].0,
            agent_port,
            Role::Agent,
            endpoints.clone(),
            Vec::new(),
            1050,
            61001,
        )
        .await;

        let nodes: Vec<NodeDescriptor> = peer_specs
            .iter()
            .map(|(ip, role)| NodeDescriptor {
                ip: *ip,
                role: *role,
                hostname: None,
                mesos_id: None,
                leader: *role == Role::Master,
            })
            .collect();

        // the coordinator is its own box, outside the collected set
        let coordinator_app = spawn_app(
            "127.0.0.2".parse().unwrap(),
            0,
            Role::Master,
            EndpointsConfig::default(),
            nodes,
            peer_master.addr.port(),
            agent_port,
        )
        .await;

        let http = reqwest::Client::new();
        let response = http
            .put(coordinator_app.url("/diagnostics/cluster-0"))
            .json(&serde_json::json!({"type": "cluster"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let done = wait_done(&coordinator_app, "cluster-0").await;
        assert_eq!(done.status, BundleStatus::Done, "{:?}", done.errors);
        assert!(done.errors.is_empty(), "{:?}", done.errors);

        let bytes = http
            .get(coordinator_app.url("/diagnostics/cluster-0/file"))
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let mut archive =
            zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
        for prefix in [
            "127.0.0.5_master",
            "127.0.0.3_agent",
            "127.0.0.4_agent",
        ] {
            let mut ping = String::new();
            archive
                .by_name(&format!("{prefix}/ping"))
                .unwrap_or_else(|_| panic!("missing {prefix}/ping"))
                .read_to_string(&mut ping)
                .unwrap();
            assert_eq!(ping, "pong");
        }
        assert!(archive.by_name("summaryReport.txt").is_ok());

        // best-effort cleanup reclaimed the peer-scoped local bundles
        for (peer, ip) in [
            (&peer_master, "127.0.0.5"),
            (&peer_agent_one, "127.0.0.3"),
            (&peer_agent_two, "127.0.0.4"),
        ] {
            let bundle = peer.state.builder.get(&format!("cluster-0-{ip}")).unwrap();
            assert_eq!(bundle.status, BundleStatus::Deleted);
        }
    }

    /// The coordinating node is an ordinary peer of its own cluster
    /// bundle: its self-addressed CREATE uses the peer-scoped id and never
    /// collides with the cluster record in the shared store.
    #[tokio::test]
    async fn cluster_bundle_includes_the_coordinating_node() {
        use axum::routing::get as axum_get;

        let ping_listener = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        let ping_port = ping_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let app = Router::new().route("/ping", axum_get(|| async { "pong" }));
            axum::serve(ping_listener, app.into_make_service())
                .await
                .unwrap();
        });

        let endpoints: EndpointsConfig = serde_json::from_value(serde_json::json!({
            "HTTPEndpoints": [
                {"Port": ping_port, "URI": "/ping", "FileName": "ping"}
            ]
        }))
        .unwrap();

        // the server must know its own master port up front, so reserve one
        let ip: IpAddr = "127.0.0.6".parse().unwrap();
        let probe = tokio::net::TcpListener::bind((ip, 0)).await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let node = NodeDescriptor {
            ip,
            role: Role::Master,
            hostname: None,
            mesos_id: None,
            leader: true,
        };
        let app = spawn_app(ip, port, Role::Master, endpoints, vec![node], port, 61001).await;

        let http = reqwest::Client::new();
        let response = http
            .put(app.url("/diagnostics/cluster-0"))
            .json(&serde_json::json!({"type": "cluster"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let done = wait_done(&app, "cluster-0").await;
        assert_eq!(done.status, BundleStatus::Done, "{:?}", done.errors);
        assert!(done.errors.is_empty(), "{:?}", done.errors);

        let bytes = http
            .get(app.url("/diagnostics/cluster-0/file"))
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let mut archive =
            zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
        let mut ping = String::new();
        archive
            .by_name("127.0.0.6_master/ping")
            .unwrap()
            .read_to_string(&mut ping)
            .unwrap();
        assert_eq!(ping, "pong");

        // the node's own local bundle lived beside the cluster record and
        // was reclaimed by the cleanup pass
        let local = app.state.builder.get("cluster-0-127.0.0.6").unwrap();
        assert_eq!(local.status, BundleStatus::Deleted);
    }
}
