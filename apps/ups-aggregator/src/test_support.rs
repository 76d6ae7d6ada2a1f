use crate::error::WriteError;
use crate::powerpanel::PowerPanelClient;
use crate::readings::Reading;
use crate::store::{ReadingBatch, ReadingStore};
use anyhow::Result;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

pub const SAMPLE_TREE: &str = r#"{"childrenNodeList":[{"id":5,"type":4,"name":"UPS-A","nodeBrief":{"outputLoad":{"percentage":40,"currentWatts":120.5}}},{"id":6,"type":2,"name":"Group-1","nodeBrief":{}}]}"#;

#[derive(Default)]
struct MockState {
    logins: AtomicUsize,
    trees: AtomicUsize,
    login_status: Mutex<Option<StatusCode>>,
    login_body: Mutex<Option<String>>,
    last_login_body: Mutex<Option<JsonValue>>,
    tree_status: Mutex<Option<StatusCode>>,
    tree_body: Mutex<Option<String>>,
    tree_delay: Mutex<Duration>,
    last_authorization: Mutex<Option<String>>,
    revoked: Mutex<HashSet<String>>,
    tree_requested: Notify,
}

/// Scripted PowerPanel appliance served over loopback HTTP.
///
/// Logins hand out `token-1`, `token-2`, ... in order. The tree endpoint
/// accepts any `token-*` bearer that has not been revoked.
pub struct MockPowerPanel {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockPowerPanel {
    pub async fn start() -> Result<Self> {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/management/rest/v1/login/verify", post(login))
            .route("/management/rest/v1/equipment/management_tree", get(tree))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, state })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/management", self.addr)
    }

    pub fn client(&self) -> PowerPanelClient {
        PowerPanelClient::new(
            reqwest::Client::new(),
            &self.base_url(),
            "hashed-user",
            "hashed-pass",
        )
    }

    pub fn login_count(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    pub fn tree_count(&self) -> usize {
        self.state.trees.load(Ordering::SeqCst)
    }

    pub fn last_login_body(&self) -> Option<JsonValue> {
        self.state.last_login_body.lock().unwrap().clone()
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().unwrap().clone()
    }

    pub fn set_login_status(&self, status: StatusCode) {
        *self.state.login_status.lock().unwrap() = Some(status);
    }

    pub fn set_login_body(&self, body: &str) {
        *self.state.login_body.lock().unwrap() = Some(body.to_string());
    }

    pub fn set_tree_status(&self, status: StatusCode) {
        *self.state.tree_status.lock().unwrap() = Some(status);
    }

    pub fn set_tree_body(&self, body: &str) {
        *self.state.tree_body.lock().unwrap() = Some(body.to_string());
    }

    pub fn set_tree_delay(&self, delay: Duration) {
        *self.state.tree_delay.lock().unwrap() = delay;
    }

    pub fn revoke(&self, token: &str) {
        self.state.revoked.lock().unwrap().insert(token.to_string());
    }

    /// Resolves once the next tree request reaches the mock.
    pub async fn tree_requested(&self) {
        self.state.tree_requested.notified().await;
    }
}

async fn login(State(state): State<Arc<MockState>>, body: String) -> (StatusCode, String) {
    let n = state.logins.fetch_add(1, Ordering::SeqCst) + 1;
    *state.last_login_body.lock().unwrap() = serde_json::from_str(&body).ok();

    if let Some(status) = *state.login_status.lock().unwrap() {
        return (status, String::new());
    }
    let body = state
        .login_body
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| format!("\"Bearer token-{n}\""));
    (StatusCode::OK, body)
}

async fn tree(State(state): State<Arc<MockState>>, headers: HeaderMap) -> (StatusCode, String) {
    state.trees.fetch_add(1, Ordering::SeqCst);
    state.tree_requested.notify_one();

    let authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    *state.last_authorization.lock().unwrap() = authorization.clone();

    let delay = *state.tree_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let token = authorization
        .as_deref()
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();
    let revoked = state.revoked.lock().unwrap().contains(token);
    if !token.starts_with("token-") || revoked {
        return (StatusCode::UNAUTHORIZED, "\"unauthorized\"".to_string());
    }

    if let Some(status) = *state.tree_status.lock().unwrap() {
        return (status, String::new());
    }
    let body = state
        .tree_body
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| SAMPLE_TREE.to_string());
    (StatusCode::OK, body)
}

#[derive(Default)]
struct MemoryInner {
    committed: Vec<Reading>,
    opened: usize,
    commits: usize,
    fail_append: HashSet<u32>,
    fail_commit: bool,
    fail_open: bool,
}

/// In-memory [`ReadingStore`] with scriptable failures.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed(&self) -> Vec<Reading> {
        self.inner.lock().unwrap().committed.clone()
    }

    pub fn batches_opened(&self) -> usize {
        self.inner.lock().unwrap().opened
    }

    pub fn commits(&self) -> usize {
        self.inner.lock().unwrap().commits
    }

    pub fn fail_append_for(&self, device_id: u32) {
        self.inner.lock().unwrap().fail_append.insert(device_id);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.inner.lock().unwrap().fail_commit = fail;
    }

    pub fn fail_open(&self, fail: bool) {
        self.inner.lock().unwrap().fail_open = fail;
    }
}

pub struct MemoryBatch {
    inner: Arc<Mutex<MemoryInner>>,
    pending: Vec<Reading>,
}

#[async_trait]
impl ReadingStore for MemoryStore {
    type Batch = MemoryBatch;

    async fn open_batch(&self) -> Result<Self::Batch, WriteError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_open {
            return Err(WriteError::Unavailable("scripted open failure".to_string()));
        }
        inner.opened += 1;
        Ok(MemoryBatch {
            inner: self.inner.clone(),
            pending: Vec::new(),
        })
    }
}

#[async_trait]
impl ReadingBatch for MemoryBatch {
    async fn append(&mut self, reading: &Reading) -> Result<(), WriteError> {
        if self
            .inner
            .lock()
            .unwrap()
            .fail_append
            .contains(&reading.device_id)
        {
            return Err(WriteError::Append {
                device_id: reading.device_id,
                reason: "scripted append failure".to_string(),
            });
        }
        self.pending.push(reading.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<u64, WriteError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_commit {
            return Err(WriteError::Commit(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "scripted commit failure",
            ))));
        }
        let rows = self.pending.len() as u64;
        inner.committed.append(&mut self.pending);
        inner.commits += 1;
        Ok(rows)
    }
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Collects formatted log lines emitted on the current thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Routes this thread's events into the capture until the guard drops.
    pub fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        let buf = self.buf.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
