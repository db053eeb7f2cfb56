//! Remote identifier authority client.
//!
//! Every reservation and registration is a bulk job on the authority:
//!
//! 1. `POST bulk/{operation}` submits the job and returns its id.
//! 2. `GET bulk/jobs/{id}` is polled until the status reaches success or
//!    failure, or the configured timeout passes.
//! 3. `GET bulk/jobs/{id}/records` returns the identifiers the job produced.
//!
//! Requests larger than the configured bulk size are split into several
//! jobs. A job whose status poll is answered with a 4xx is abandoned and the
//! operation retried after a cooldown.

use crate::CisConfig;
use crate::wire::{
    AuthenticateRequest, BulkIdsRequest, JobCreated, JobStatus, LoginRequest, LoginResponse,
    Record, RegisterRequest, ReserveRequest, STATUS_FAIL, STATUS_SUCCESS,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Response, StatusCode};
use sctid::{Error, IdentifierSource, Namespace, Partition, Result, Sctid};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;
use url::Url;

const RESERVE: &str = "reserve";
const REGISTER: &str = "register";

const ACCEPTABLE_STATUSES: [&str; 3] = ["Available", "Reserved", "Assigned"];
const ASSIGNED: &str = "Assigned";
/// Status reported for an identifier the authority returned no record for.
const MISSING: &str = "Missing";

/// Outcome of one attempt at a bulk job.
enum JobError {
    /// The authority rejected a status poll with a 4xx; the whole operation
    /// may be retried.
    Transient(String),
    Fatal(Error),
}

impl From<Error> for JobError {
    fn from(e: Error) -> Self {
        Self::Fatal(e)
    }
}

/// An [`IdentifierSource`] backed by a remote identifier authority.
///
/// `generate` and `reserve` both reserve identifiers on the authority;
/// nothing is ever minted locally.
#[derive(Debug)]
pub struct CisClient {
    http: reqwest::Client,
    config: CisConfig,
    token: RwLock<String>,
}

impl CisClient {
    /// Builds a client and, when credentials are configured, checks them
    /// against the authority straight away.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if the configuration does not validate.
    /// - Any authentication error.
    pub async fn connect(config: CisConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| transport("connect", &e))?;

        let client = Self {
            http,
            token: RwLock::new(config.token.clone()),
            config,
        };
        client.authenticate().await?;
        Ok(client)
    }

    pub fn config(&self) -> &CisConfig {
        &self.config
    }

    fn token(&self) -> String {
        self.token.read().clone()
    }

    /// `base_url` extended with `segments`, carrying the session token.
    fn endpoint(&self, operation: &str, segments: &[&str]) -> Result<Url> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                Error::InvalidConfig(format!("base_url {} cannot be a base", self.config.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("token", &self.token());
        tracing::trace!("{operation}: {}", url.path());
        Ok(url)
    }

    /// Confirms the current token and logs in again if the authority
    /// rejects it. Does nothing without credentials.
    async fn authenticate(&self) -> Result<()> {
        let Some((username, password)) = self.config.credentials() else {
            return Ok(());
        };

        let url = self.endpoint("authenticate", &["authenticate"])?;
        let token = self.token();
        let response = self
            .http
            .post(url)
            .json(&AuthenticateRequest { token: &token })
            .send()
            .await
            .map_err(|e| transport("authenticate", &e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => self.login(username, password).await,
            status if status.is_success() => Ok(()),
            _ => Err(authority_error("authenticate", response).await),
        }
    }

    async fn login(&self, username: &str, password: &str) -> Result<()> {
        tracing::debug!("Logging in to identifier authority as {username}");
        let url = self.endpoint("login", &["login"])?;
        let response = self
            .http
            .post(url)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| transport("login", &e))?;
        let LoginResponse { token } = read_json("login", response).await?;
        *self.token.write() = token;
        Ok(())
    }

    /// Runs one bulk job, retrying the whole job while status polls are
    /// answered with a 4xx.
    async fn call_bulk<B>(
        &self,
        operation: &str,
        body: &B,
        size: usize,
        with_scheme: bool,
    ) -> Result<Vec<Record>>
    where
        B: Serialize + Sync,
    {
        let mut retries = 0;
        loop {
            match self.run_job(operation, body, size, with_scheme).await {
                Ok(records) => return Ok(records),
                Err(JobError::Fatal(e)) => return Err(e),
                Err(JobError::Transient(reason))
                    if retries < self.config.max_transient_retries =>
                {
                    retries += 1;
                    tracing::warn!(
                        "Identifier authority rejected a status poll during {operation} ({reason}), retry {retries}/{} in {:?}",
                        self.config.max_transient_retries,
                        self.config.transient_cooldown
                    );
                    tokio::time::sleep(self.config.transient_cooldown).await;
                }
                Err(JobError::Transient(reason)) => {
                    return Err(Error::Authority {
                        operation: operation.to_string(),
                        reason: format!("gave up after {retries} retries: {reason}"),
                    });
                }
            }
        }
    }

    async fn run_job<B>(
        &self,
        operation: &str,
        body: &B,
        size: usize,
        with_scheme: bool,
    ) -> core::result::Result<Vec<Record>, JobError>
    where
        B: Serialize + Sync,
    {
        let started = Instant::now();

        let mut url = self.endpoint(operation, &["bulk", operation])?;
        if with_scheme {
            url.query_pairs_mut()
                .append_pair("schemeName", &self.config.scheme_name);
        }
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport(operation, &e))?;
        let JobCreated { id: job_id } = read_json(operation, response).await?;

        let job_info = format!("{operation}. JobID:{job_id} ({size} records)");
        tracing::info!("Identifier authority call started for {job_info}");

        let warning_after = self.config.timeout / 3;
        let mut warned = false;
        let status = loop {
            let url = self.endpoint(operation, &["bulk", "jobs", job_id.as_str()])?;
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| transport(operation, &e))?;
            if response.status().is_client_error() {
                return Err(JobError::Transient(format!(
                    "status {} polling job {job_id}",
                    response.status()
                )));
            }
            let status: JobStatus = read_json(operation, response).await?;
            if status.status >= STATUS_SUCCESS {
                break status;
            }

            let elapsed = started.elapsed();
            if elapsed > self.config.timeout {
                return Err(Error::JobTimeout {
                    operation: operation.to_string(),
                    job_id,
                }
                .into());
            }
            if !warned && elapsed > warning_after {
                tracing::warn!(
                    "Identifier authority call taking longer than expected for {job_info}. Last status {}, {:?}",
                    status.status,
                    status.log.as_deref().unwrap_or_default()
                );
                warned = true;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        };

        if status.status == STATUS_FAIL {
            return Err(Error::JobFailed {
                operation: operation.to_string(),
                job_id,
                log: status.log.unwrap_or_default(),
            }
            .into());
        }

        let url = self.endpoint(operation, &["bulk", "jobs", job_id.as_str(), "records"])?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport(operation, &e))?;
        let records: Vec<Record> = read_json(operation, response).await?;
        tracing::info!(
            "Identifier authority call completed for {job_info} in {:?}",
            started.elapsed()
        );
        Ok(records)
    }

    /// Current status of each of `ids` according to the authority.
    async fn statuses(&self, ids: &[Sctid]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.config.max_bulk_size) {
            let sctids = chunk
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let url = self.endpoint(REGISTER, &["bulk", "ids"])?;
            let response = self
                .http
                .post(url)
                .json(&BulkIdsRequest { sctids })
                .send()
                .await
                .map_err(|e| transport(REGISTER, &e))?;
            let mut page: Vec<Record> = read_json(REGISTER, response).await?;
            records.append(&mut page);
        }
        Ok(records)
    }
}

#[async_trait]
impl IdentifierSource for CisClient {
    async fn generate(
        &self,
        namespace: Namespace,
        partition: Partition,
        quantity: usize,
    ) -> Result<Vec<Sctid>> {
        self.reserve(namespace, partition, quantity).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn reserve(
        &self,
        namespace: Namespace,
        partition: Partition,
        quantity: usize,
    ) -> Result<Vec<Sctid>> {
        if quantity == 0 {
            return Ok(Vec::new());
        }
        self.authenticate().await?;

        let mut reserved = Vec::with_capacity(quantity);
        let mut seen = HashSet::with_capacity(quantity);
        while reserved.len() < quantity {
            let chunk = (quantity - reserved.len()).min(self.config.max_bulk_size);
            let request = ReserveRequest {
                namespace: namespace.id(),
                partition_id: partition.to_string(),
                quantity: chunk,
                software: &self.config.software_name,
            };
            let records = self.call_bulk(RESERVE, &request, chunk, false).await?;
            if records.is_empty() || records.len() > chunk {
                return Err(malformed(
                    RESERVE,
                    format!(
                        "job for {chunk} identifiers returned {} records",
                        records.len()
                    ),
                ));
            }
            for record in records {
                let id = parse_sctid(RESERVE, &record.sctid)?;
                if id.partition() != partition || id.namespace() != namespace {
                    return Err(malformed(
                        RESERVE,
                        format!("{id} is outside namespace {namespace}, partition {partition}"),
                    ));
                }
                if !seen.insert(id) {
                    return Err(malformed(RESERVE, format!("{id} was returned twice")));
                }
                reserved.push(id);
            }
        }
        Ok(reserved)
    }

    #[tracing::instrument(level = "debug", skip(self, ids), fields(count = ids.len()))]
    async fn register_identifiers(&self, namespace: Namespace, ids: &[Sctid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.authenticate().await?;

        let records = self.statuses(ids).await?;
        let statuses: HashMap<&str, &str> = records
            .iter()
            .map(|record| {
                (
                    record.sctid.as_str(),
                    record.status.as_deref().unwrap_or_default(),
                )
            })
            .collect();

        let mut offenders = Vec::new();
        let mut to_register = Vec::with_capacity(ids.len());
        for id in ids {
            let raw = id.to_string();
            match statuses.get(raw.as_str()) {
                None => offenders.push((raw, MISSING.to_string())),
                Some(&status) if !ACCEPTABLE_STATUSES.contains(&status) => {
                    offenders.push((raw, status.to_string()));
                }
                Some(&ASSIGNED) => {}
                Some(_) => to_register.push(u64::from(*id)),
            }
        }
        if !offenders.is_empty() {
            return Err(Error::UnacceptableStatus { offenders });
        }
        if to_register.len() < ids.len() {
            tracing::debug!(
                "Skipping {} identifiers that are already assigned",
                ids.len() - to_register.len()
            );
        }

        for chunk in to_register.chunks(self.config.max_bulk_size) {
            let request = RegisterRequest {
                namespace: namespace.id(),
                ids: chunk,
            };
            self.call_bulk(REGISTER, &request, chunk.len(), true).await?;
        }
        Ok(())
    }
}

fn transport(operation: &str, e: &reqwest::Error) -> Error {
    Error::Transport {
        operation: operation.to_string(),
        reason: e.to_string(),
    }
}

async fn authority_error(operation: &str, response: Response) -> Error {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Error::Authority {
        operation: operation.to_string(),
        reason: format!("status {status}: {text}"),
    }
}

async fn read_json<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(authority_error(operation, response).await);
    }
    response
        .json()
        .await
        .map_err(|e| malformed(operation, e.to_string()))
}

fn malformed(operation: &str, reason: String) -> Error {
    Error::MalformedResponse {
        operation: operation.to_string(),
        reason,
    }
}

fn parse_sctid(operation: &str, raw: &str) -> Result<Sctid> {
    raw.parse()
        .map_err(|e: Error| malformed(operation, e.to_string()))
}
