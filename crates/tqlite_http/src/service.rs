//! Endpoint dispatch, leader redirection, and status composition.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::{RawQuery, Request, State};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinSet;

use tqlite_command::{ExecuteRequest, QueryRequest, Request as CommandRequest, Statement};
use tqlite_observability::Registry;

use crate::params::QueryOpts;
use crate::store::{BackupFormat, Cluster, Statuser, Store, StoreError, Suffrage};

/// HTTP header carrying the build version on every response.
pub const VERSION_HTTP_HEADER: &str = "X-TQLITE-VERSION";

const NUM_EXECUTIONS: &str = "http.executions";
const NUM_QUERIES: &str = "http.queries";
const NUM_BACKUPS: &str = "http.backups";
const NUM_LOADS: &str = "http.loads";
const NUM_JOINS: &str = "http.joins";

/// Default bound on a single `/nodes` reachability probe.
const DEFAULT_NODES_TIMEOUT: Duration = Duration::from_secs(10);

/// The JSON envelope wrapping endpoint results.
#[derive(Debug, Default, Serialize)]
struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<f64>,
}

/// The HTTP service. Construct, configure with the `set_*` methods, then
/// wrap in an [`Arc`] and call [`Service::serve`].
pub struct Service {
    store: Arc<dyn Store>,
    cluster: Arc<dyn Cluster>,
    start: Instant,
    start_time: SystemTime,
    local_addr: OnceLock<SocketAddr>,
    last_backup: Mutex<Option<SystemTime>>,
    statuses: RwLock<HashMap<String, Arc<dyn Statuser>>>,
    expvar: bool,
    pprof: bool,
    build_info: serde_json::Value,
    version: HeaderValue,
    metrics: Arc<Registry>,
}

impl Service {
    pub fn new(store: Arc<dyn Store>, cluster: Arc<dyn Cluster>, metrics: Arc<Registry>) -> Service {
        for name in [NUM_EXECUTIONS, NUM_QUERIES, NUM_BACKUPS, NUM_LOADS, NUM_JOINS] {
            metrics.register(name);
        }
        Service {
            store,
            cluster,
            start: Instant::now(),
            start_time: SystemTime::now(),
            local_addr: OnceLock::new(),
            last_backup: Mutex::new(None),
            statuses: RwLock::new(HashMap::new()),
            expvar: false,
            pprof: false,
            build_info: serde_json::Value::Null,
            version: HeaderValue::from_static("unknown"),
            metrics,
        }
    }

    /// Serve the counter registry on `/debug/vars`.
    pub fn set_expvar(&mut self, enabled: bool) {
        self.expvar = enabled;
    }

    /// Serve runtime profiling snapshots on `/debug/pprof`.
    pub fn set_pprof(&mut self, enabled: bool) {
        self.pprof = enabled;
    }

    /// Build metadata reported by `/status`. A `version` key also feeds the
    /// `X-TQLITE-VERSION` response header.
    pub fn set_build_info(&mut self, info: serde_json::Value) {
        if let Some(v) = info.get("version").and_then(|v| v.as_str()) {
            if let Ok(value) = HeaderValue::from_str(v) {
                self.version = value;
            }
        }
        self.build_info = info;
    }

    /// Register an extra status provider under `key`.
    pub fn register_status(
        &self,
        key: impl Into<String>,
        stat: Arc<dyn Statuser>,
    ) -> Result<(), StoreError> {
        let key = key.into();
        let mut statuses = self.statuses.write();
        if statuses.contains_key(&key) {
            return Err(StoreError::Internal(format!(
                "status already registered with key {key}"
            )));
        }
        statuses.insert(key, stat);
        Ok(())
    }

    /// The bound address, available once [`Service::serve`] has started.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Serve HTTP on `ln` until `shutdown` resolves.
    pub async fn serve(
        self: Arc<Self>,
        ln: tokio::net::TcpListener,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> io::Result<()> {
        let addr = ln.local_addr()?;
        let _ = self.local_addr.set(addr);
        tracing::info!(%addr, "http service listening");

        let router = self.router();
        axum::serve(ln, router)
            .with_graceful_shutdown(shutdown)
            .await
    }

    fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/db/execute", post(handle_execute))
            .route("/db/query", get(handle_query).post(handle_query))
            .route("/db/backup", get(handle_backup))
            .route("/db/load", post(handle_load))
            .route("/join", post(handle_join))
            .route("/remove", delete(handle_remove))
            .route("/status", get(handle_status))
            .route("/nodes", get(handle_nodes))
            .route("/debug/vars", get(handle_expvar))
            .route("/debug/pprof", get(handle_pprof))
            .route("/debug/pprof/{*profile}", get(handle_pprof))
            .fallback(|| async { StatusCode::NOT_FOUND })
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self),
                version_header,
            ))
            .with_state(self)
    }

    /// The leader's HTTP API address, resolved through the cluster service.
    /// `None` when the leader or its API address is unknown.
    async fn leader_api_addr(&self) -> Option<String> {
        let leader_addr = self.store.leader_addr().await.ok()?;
        if leader_addr.is_empty() {
            return None;
        }
        match self.cluster.get_node_api_addr(&leader_addr).await {
            Ok(url) if !url.is_empty() => Some(url),
            _ => None,
        }
    }
}

/// Add the version header to every response.
async fn version_header(
    State(svc): State<Arc<Service>>,
    req: Request,
    next: Next,
) -> Response {
    let mut resp = next.run(req).await;
    resp.headers_mut()
        .insert(HeaderName::from_static("x-tqlite-version"), svc.version.clone());
    resp
}

// ── Response helpers ─────────────────────────────────────────────────────

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, format!("{}\n", msg.into())).into_response()
}

/// Serialize `value`, honoring four-space pretty indentation.
fn json_body<T: Serialize>(value: &T, pretty: bool) -> Result<String, serde_json::Error> {
    if pretty {
        let mut buf = Vec::new();
        let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
        value.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    } else {
        serde_json::to_string(value)
    }
}

fn json_response<T: Serialize>(value: &T, pretty: bool) -> Response {
    match json_body(value, pretty) {
        Ok(body) => (
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn envelope_response(opts: &QueryOpts, mut env: Envelope, start: Instant) -> Response {
    if opts.timings {
        env.time = Some(start.elapsed().as_secs_f64());
    }
    json_response(&env, opts.pretty)
}

/// The Location value for a 301: the leader's API base plus the original
/// path and query.
fn form_redirect(leader_api: &str, uri: &Uri) -> String {
    match uri.query() {
        Some(q) if !q.is_empty() => format!("{}{}?{}", leader_api, uri.path(), q),
        _ => format!("{}{}", leader_api, uri.path()),
    }
}

fn redirect_response(location: String) -> Response {
    match HeaderValue::from_str(&location) {
        Ok(loc) => {
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, loc)], ()).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// A leader-only operation landed on a non-leader: redirect to the leader,
/// or 503 when it cannot be resolved. The status code is 301 by contract;
/// administrative clients match on it.
async fn not_leader_response(svc: &Service, uri: &Uri) -> Response {
    match svc.leader_api_addr().await {
        Some(leader) => redirect_response(form_redirect(&leader, uri)),
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            StoreError::NotLeader.to_string(),
        ),
    }
}

/// Parse a JSON statement list: either `["sql", ...]` or
/// `{"statements": ["sql", ...]}`.
fn parse_statements(body: &[u8]) -> Result<Vec<Statement>, String> {
    #[derive(serde::Deserialize)]
    struct Wrapper {
        statements: Vec<String>,
    }

    let stmts: Vec<String> = match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Array(_)) => {
            serde_json::from_slice(body).map_err(|e| e.to_string())?
        }
        Ok(serde_json::Value::Object(_)) => serde_json::from_slice::<Wrapper>(body)
            .map(|w| w.statements)
            .map_err(|e| e.to_string())?,
        Ok(_) => return Err("invalid statement list".to_string()),
        Err(e) => return Err(e.to_string()),
    };
    Ok(stmts.into_iter().map(Statement::new).collect())
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn handle_execute(
    State(svc): State<Arc<Service>>,
    uri: Uri,
    RawQuery(raw): RawQuery,
    body: Bytes,
) -> Response {
    svc.metrics.add(NUM_EXECUTIONS, 1);
    let start = Instant::now();
    let opts = QueryOpts::parse(raw.as_deref());

    let stmts = match parse_statements(&body) {
        Ok(stmts) => stmts,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let er = ExecuteRequest {
        request: Some(CommandRequest {
            transaction: opts.transaction,
            statements: stmts,
        }),
        timings: opts.timings,
    };

    let mut env = Envelope::default();
    match svc.store.execute(&er).await {
        Ok(results) => match serde_json::to_value(&results) {
            Ok(v) => env.results = Some(v),
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Err(StoreError::NotLeader) => return not_leader_response(&svc, &uri).await,
        Err(e) => env.error = Some(e.to_string()),
    }
    envelope_response(&opts, env, start)
}

async fn handle_query(
    State(svc): State<Arc<Service>>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
    body: Bytes,
) -> Response {
    svc.metrics.add(NUM_QUERIES, 1);
    let start = Instant::now();
    let opts = QueryOpts::parse(raw.as_deref());

    let freshness = match opts.freshness() {
        Ok(f) => f,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let stmts = if method == Method::GET {
        match opts.q.as_deref() {
            Some(q) if !q.is_empty() => vec![Statement::new(q)],
            _ => return error_response(StatusCode::BAD_REQUEST, "bad query GET request"),
        }
    } else {
        match parse_statements(&body) {
            Ok(stmts) => stmts,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "bad query POST request"),
        }
    };

    let qr = QueryRequest {
        request: Some(CommandRequest {
            transaction: opts.transaction,
            statements: stmts,
        }),
        timings: opts.timings,
        level: opts.level() as i32,
        freshness: freshness.as_nanos() as i64,
    };

    let mut env = Envelope::default();
    match svc.store.query(&qr).await {
        Ok(results) => match serde_json::to_value(&results) {
            Ok(v) => env.results = Some(v),
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Err(StoreError::NotLeader) => return not_leader_response(&svc, &uri).await,
        Err(e) => env.error = Some(e.to_string()),
    }
    envelope_response(&opts, env, start)
}

async fn handle_backup(
    State(svc): State<Arc<Service>>,
    uri: Uri,
    RawQuery(raw): RawQuery,
) -> Response {
    svc.metrics.add(NUM_BACKUPS, 1);
    let opts = QueryOpts::parse(raw.as_deref());

    let (format, content_type) = match opts.fmt.as_deref() {
        Some("sql") => (BackupFormat::Sql, "application/sql"),
        _ => (BackupFormat::Binary, "application/octet-stream"),
    };

    match svc.store.backup(!opts.no_leader, format).await {
        Ok(data) => {
            *svc.last_backup.lock() = Some(SystemTime::now());
            ([(header::CONTENT_TYPE, content_type)], data).into_response()
        }
        Err(StoreError::NotLeader) => not_leader_response(&svc, &uri).await,
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Load a SQL dump. Unlike the other endpoints the body is one raw SQL
/// program, not JSON.
async fn handle_load(
    State(svc): State<Arc<Service>>,
    uri: Uri,
    RawQuery(raw): RawQuery,
    body: Bytes,
) -> Response {
    svc.metrics.add(NUM_LOADS, 1);
    let start = Instant::now();
    let opts = QueryOpts::parse(raw.as_deref());

    let program = String::from_utf8_lossy(&body).into_owned();
    let er = ExecuteRequest {
        request: Some(CommandRequest {
            transaction: false,
            statements: vec![Statement::new(program)],
        }),
        timings: opts.timings,
    };

    let mut env = Envelope::default();
    match svc.store.execute_or_abort(&er).await {
        Ok(results) => match serde_json::to_value(&results) {
            Ok(v) => env.results = Some(v),
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Err(StoreError::NotLeader) => return not_leader_response(&svc, &uri).await,
        Err(e) => env.error = Some(e.to_string()),
    }
    envelope_response(&opts, env, start)
}

async fn handle_join(State(svc): State<Arc<Service>>, uri: Uri, body: Bytes) -> Response {
    svc.metrics.add(NUM_JOINS, 1);

    #[derive(serde::Deserialize)]
    struct JoinRequest {
        id: String,
        addr: String,
        #[serde(default = "default_voter")]
        voter: bool,
    }
    fn default_voter() -> bool {
        true
    }

    let req: JoinRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    match svc.store.join(&req.id, &req.addr, req.voter).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(StoreError::NotLeader) => not_leader_response(&svc, &uri).await,
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn handle_remove(State(svc): State<Arc<Service>>, uri: Uri, body: Bytes) -> Response {
    // The body must be exactly {"id": "..."}.
    let m: HashMap<String, String> = match serde_json::from_slice(&body) {
        Ok(m) => m,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    if m.len() != 1 {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let Some(id) = m.get("id") else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match svc.store.remove(id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(StoreError::NotLeader) => not_leader_response(&svc, &uri).await,
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn handle_status(State(svc): State<Arc<Service>>, RawQuery(raw): RawQuery) -> Response {
    let opts = QueryOpts::parse(raw.as_deref());

    let store_status = match svc.store.stats().await {
        Ok(v) => v,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let rt = tokio::runtime::Handle::current().metrics();
    let runtime = serde_json::json!({
        "arch": std::env::consts::ARCH,
        "os": std::env::consts::OS,
        "num_cpu": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        "num_workers": rt.num_workers(),
        "num_alive_tasks": rt.num_alive_tasks(),
    });

    let http_status = serde_json::json!({
        "addr": svc.addr().map(|a| a.to_string()).unwrap_or_default(),
    });

    let node_status = serde_json::json!({
        "start_time": unix_secs(svc.start_time),
        "uptime": format!("{:?}", svc.start.elapsed()),
    });

    let mut status = serde_json::Map::new();
    status.insert("runtime".into(), runtime);
    status.insert("cluster".into(), svc.cluster.stats());
    status.insert("store".into(), store_status);
    status.insert("http".into(), http_status);
    status.insert("node".into(), node_status);
    if let Some(t) = *svc.last_backup.lock() {
        status.insert("last_backup_time".into(), serde_json::json!(unix_secs(t)));
    }
    if !svc.build_info.is_null() {
        status.insert("build".into(), svc.build_info.clone());
    }
    {
        let statuses = svc.statuses.read();
        for (k, v) in statuses.iter() {
            status.insert(k.clone(), v.stats());
        }
    }

    json_response(&serde_json::Value::Object(status), opts.pretty)
}

/// Per-node API reachability. Probes run concurrently so the total wall
/// time is bounded by the slowest probe, not the sum.
async fn handle_nodes(State(svc): State<Arc<Service>>, RawQuery(raw): RawQuery) -> Response {
    let opts = QueryOpts::parse(raw.as_deref());
    let timeout = opts.timeout(DEFAULT_NODES_TIMEOUT);

    let nodes = match svc.store.nodes().await {
        Ok(nodes) => nodes,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let filtered: Vec<_> = nodes
        .into_iter()
        .filter(|n| opts.non_voters || n.suffrage == Suffrage::Voter)
        .collect();

    let leader_addr = match svc.store.leader_addr().await {
        Ok(addr) => addr,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let mut probes: JoinSet<(String, Option<String>)> = JoinSet::new();
    for n in &filtered {
        let cluster = Arc::clone(&svc.cluster);
        let id = n.id.clone();
        let raft_addr = n.addr.clone();
        probes.spawn(async move {
            let api = match tokio::time::timeout(timeout, cluster.get_node_api_addr(&raft_addr))
                .await
            {
                Ok(Ok(url)) if !url.is_empty() => Some(url),
                _ => None,
            };
            (id, api)
        });
    }
    let mut api_addrs: HashMap<String, String> = HashMap::new();
    while let Some(res) = probes.join_next().await {
        if let Ok((id, Some(api))) = res {
            api_addrs.insert(id, api);
        }
    }

    #[derive(Serialize)]
    struct NodeStatus {
        #[serde(skip_serializing_if = "Option::is_none")]
        api_addr: Option<String>,
        addr: String,
        reachable: bool,
        leader: bool,
    }

    let mut resp: BTreeMap<String, NodeStatus> = BTreeMap::new();
    for n in filtered {
        let api_addr = api_addrs.get(&n.id).cloned();
        resp.insert(
            n.id.clone(),
            NodeStatus {
                reachable: api_addr.is_some(),
                api_addr,
                leader: n.addr == leader_addr,
                addr: n.addr,
            },
        );
    }

    json_response(&resp, opts.pretty)
}

/// Expose the counter registry, expvar-style.
async fn handle_expvar(State(svc): State<Arc<Service>>, RawQuery(raw): RawQuery) -> Response {
    if !svc.expvar {
        return StatusCode::NOT_FOUND.into_response();
    }
    let opts = QueryOpts::parse(raw.as_deref());
    json_response(&svc.metrics.snapshot(), opts.pretty)
}

/// Profiling surface. Serves a snapshot of runtime facts; a CPU profiler
/// is not wired in.
async fn handle_pprof(State(svc): State<Arc<Service>>) -> Response {
    if !svc.pprof {
        return StatusCode::NOT_FOUND.into_response();
    }
    let rt = tokio::runtime::Handle::current().metrics();
    let snapshot = serde_json::json!({
        "num_workers": rt.num_workers(),
        "num_alive_tasks": rt.num_alive_tasks(),
        "num_cpu": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
    });
    json_response(&snapshot, false)
}
