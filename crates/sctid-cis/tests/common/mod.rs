//! An in-process identifier authority speaking the bulk-job protocol.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::Mutex;
use sctid::{Namespace, Partition, Sctid};
use sctid_cis::CisConfig;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

#[derive(Debug)]
pub struct Job {
    pub operation: String,
    pub polls: usize,
    pub records: Vec<Value>,
}

/// Everything the authority has seen, plus knobs that script its answers.
#[derive(Debug)]
pub struct AuthorityState {
    /// Status reported by the n-th poll of a job; the last entry repeats.
    pub status_script: Vec<i64>,
    pub job_log: String,
    /// Status polls still to be rejected with 404.
    pub reject_polls: usize,
    /// Token required by `/authenticate`, if any.
    pub valid_token: Option<String>,
    pub credentials: (String, String),
    /// Records every reserve job answers with, in place of freshly minted
    /// identifiers.
    pub reserve_records: Option<Vec<Value>>,
    /// Identifiers `bulk/ids` leaves out of its answer.
    pub unlisted: HashSet<String>,
    /// Records `bulk/ids` appends to every answer.
    pub extra_listed: Vec<Value>,

    pub jobs: HashMap<u64, Job>,
    pub next_job: u64,
    pub next_item: HashMap<(u32, String), u64>,
    /// Current status of every identifier the authority knows.
    pub statuses: HashMap<String, String>,
    pub reserve_quantities: Vec<usize>,
    pub registered: Vec<Vec<u64>>,
    pub scheme_names: Vec<Option<String>>,
    pub tokens_seen: Vec<String>,
    pub logins: usize,
}

impl Default for AuthorityState {
    fn default() -> Self {
        Self {
            status_script: vec![2],
            job_log: String::new(),
            reject_polls: 0,
            valid_token: None,
            credentials: ("snowstorm".into(), "secret".into()),
            reserve_records: None,
            unlisted: HashSet::new(),
            extra_listed: Vec::new(),
            jobs: HashMap::new(),
            next_job: 1,
            next_item: HashMap::new(),
            statuses: HashMap::new(),
            reserve_quantities: Vec::new(),
            registered: Vec::new(),
            scheme_names: Vec::new(),
            tokens_seen: Vec::new(),
            logins: 0,
        }
    }
}

type Shared = Arc<Mutex<AuthorityState>>;

pub struct MockAuthority {
    pub state: Shared,
    pub base_url: Url,
    handle: JoinHandle<()>,
}

impl MockAuthority {
    pub async fn start() -> Self {
        Self::start_with(AuthorityState::default()).await
    }

    pub async fn start_with(state: AuthorityState) -> Self {
        let state: Shared = Arc::new(Mutex::new(state));
        let app = Router::new()
            .route("/api/authenticate", post(authenticate))
            .route("/api/login", post(login))
            .route("/api/bulk/ids", post(bulk_ids))
            .route("/api/bulk/{operation}", post(submit))
            .route("/api/bulk/jobs/{id}", get(job_status))
            .route("/api/bulk/jobs/{id}/records", get(job_records))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            base_url: format!("http://{addr}/api/").parse().unwrap(),
            handle,
        }
    }

    /// A client configuration with timings short enough for tests.
    pub fn config(&self) -> CisConfig {
        let mut config = CisConfig::new(self.base_url.clone(), "t0k3n");
        config.timeout = Duration::from_secs(5);
        config.poll_interval = Duration::from_millis(10);
        config.transient_cooldown = Duration::from_millis(10);
        config
    }

    pub fn jobs(&self, operation: &str) -> usize {
        self.state
            .lock()
            .jobs
            .values()
            .filter(|job| job.operation == operation)
            .count()
    }

    pub fn set_status(&self, sctid: &Sctid, status: &str) {
        self.state
            .lock()
            .statuses
            .insert(sctid.to_string(), status.to_string());
    }
}

impl Drop for MockAuthority {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn token_of(state: &mut AuthorityState, query: &HashMap<String, String>) {
    if let Some(token) = query.get("token") {
        state.tokens_seen.push(token.clone());
    }
}

async fn authenticate(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let state = state.lock();
    let token = body["token"].as_str().unwrap_or_default();
    match &state.valid_token {
        Some(valid) if valid != token => StatusCode::UNAUTHORIZED.into_response(),
        _ => Json(json!({"user": state.credentials.0})).into_response(),
    }
}

async fn login(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock();
    let (username, password) = state.credentials.clone();
    if body["username"] != username.as_str() || body["password"] != password.as_str() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.logins += 1;
    let token = state.valid_token.clone().unwrap_or_else(|| "issued".into());
    Json(json!({ "token": token })).into_response()
}

async fn submit(
    State(state): State<Shared>,
    Path(operation): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock();
    token_of(&mut state, &query);

    let records = match operation.as_str() {
        "reserve" => {
            let namespace = body["namespace"].as_u64().unwrap() as u32;
            let partition_id = body["partitionId"].as_str().unwrap().to_string();
            let quantity = body["quantity"].as_u64().unwrap() as usize;
            let partition: Partition = partition_id.parse().unwrap();
            state.reserve_quantities.push(quantity);
            if let Some(records) = state.reserve_records.clone() {
                return finish_submit(&mut state, "reserve".into(), records);
            }

            let next = state
                .next_item
                .entry((namespace, partition_id))
                .or_insert(Sctid::min_item(partition));
            let first = *next;
            *next += quantity as u64;

            (first..first + quantity as u64)
                .map(|item| {
                    let id = Sctid::from_parts(item, Namespace::new(namespace), partition).unwrap();
                    state.statuses.insert(id.to_string(), "Reserved".into());
                    json!({ "sctid": id.to_string(), "status": "Reserved" })
                })
                .collect()
        }
        "register" => {
            state.scheme_names.push(query.get("schemeName").cloned());
            let ids: Vec<u64> = body["ids"]
                .as_array()
                .unwrap()
                .iter()
                .map(|id| id.as_u64().unwrap())
                .collect();
            for id in &ids {
                state.statuses.insert(id.to_string(), "Assigned".into());
            }
            let records = ids
                .iter()
                .map(|id| json!({ "sctid": id, "status": "Assigned" }))
                .collect();
            state.registered.push(ids);
            records
        }
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    finish_submit(&mut state, operation, records)
}

fn finish_submit(state: &mut AuthorityState, operation: String, records: Vec<Value>) -> Response {
    let id = state.next_job;
    state.next_job += 1;
    state.jobs.insert(
        id,
        Job {
            operation,
            polls: 0,
            records,
        },
    );
    // Job ids come back as numbers; the client must cope.
    Json(json!({ "id": id })).into_response()
}

async fn job_status(
    State(state): State<Shared>,
    Path(id): Path<u64>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut state = state.lock();
    token_of(&mut state, &query);
    if state.reject_polls > 0 {
        state.reject_polls -= 1;
        return StatusCode::NOT_FOUND.into_response();
    }

    let script = state.status_script.clone();
    let log = state.job_log.clone();
    let Some(job) = state.jobs.get_mut(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let status = script[job.polls.min(script.len() - 1)];
    job.polls += 1;
    // Statuses come back as strings; the client must cope.
    Json(json!({ "status": status.to_string(), "log": log })).into_response()
}

async fn job_records(State(state): State<Shared>, Path(id): Path<u64>) -> Response {
    let state = state.lock();
    match state.jobs.get(&id) {
        Some(job) => Json(Value::Array(job.records.clone())).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn bulk_ids(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock();
    token_of(&mut state, &query);
    let mut records: Vec<Value> = body["sctids"]
        .as_str()
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty() && !state.unlisted.contains(*s))
        .map(|sctid| {
            let status = state
                .statuses
                .get(sctid)
                .cloned()
                .unwrap_or_else(|| "Available".into());
            json!({ "sctid": sctid, "status": status })
        })
        .collect();
    records.extend(state.extra_listed.iter().cloned());
    Json(Value::Array(records)).into_response()
}
