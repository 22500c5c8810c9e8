//! Request store adapter.
//!
//! The relational store is an external collaborator; the engine only needs
//! the narrow [`RequestStore`] interface. All writes are single-row and
//! independent, so concurrent network workers never contend on the same
//! request id. Any store failure is classified [`Error::StoreUnavailable`]
//! and is fatal to the process (crash-only recovery: `Unresolved` is always
//! a safe resumable state).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::logging::targets;
use crate::req::JsonClient;
use crate::types::RegistrationRequest;

/// Query/update interface the engine requires from the request store.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Startup connectivity probe.
    async fn ping(&self) -> Result<()>;

    /// Fetch requests eligible for scheduling at `now`: not deleted,
    /// unresolved, inside their validity window, joined with the owning
    /// account. Filtering happens server-side.
    async fn fetch_eligible(&self, now: DateTime<Utc>) -> Result<Vec<RegistrationRequest>>;

    /// Record a successful admission. Sets the resolved timestamp and the
    /// assigned identifier exactly once.
    async fn mark_succeeded(
        &self,
        id: u64,
        assigned_uid: Option<u64>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Record a failed attempt. The request returns to unresolved and is
    /// picked up again on a later cycle.
    async fn mark_failed(&self, id: u64) -> Result<()>;

    /// Permanently exclude a request (soft-delete), e.g. on a blacklist
    /// match. The row is never physically deleted by the engine.
    async fn mark_deleted(&self, id: u64) -> Result<()>;
}

#[derive(Serialize)]
struct EligibleQuery {
    now: DateTime<Utc>,
}

#[derive(Serialize)]
struct SucceededUpdate {
    id: u64,
    assigned_uid: Option<u64>,
    resolved_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct IdOnly {
    id: u64,
}

#[derive(Deserialize)]
struct Ack {
    #[allow(dead_code)]
    ok: bool,
}

/// HTTP client for the management console's internal store surface.
#[derive(Debug, Clone)]
pub struct HttpRequestStore {
    client: JsonClient,
}

impl HttpRequestStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: JsonClient::new(base_url)?,
        })
    }
}

fn store_err(err: Error) -> Error {
    match err {
        Error::StoreUnavailable(_) => err,
        other => Error::store_unavailable(other.to_string()),
    }
}

#[async_trait]
impl RequestStore for HttpRequestStore {
    async fn ping(&self) -> Result<()> {
        let _: Ack = self
            .client
            .post("/internal/ping", &serde_json::json!({}))
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn fetch_eligible(&self, now: DateTime<Utc>) -> Result<Vec<RegistrationRequest>> {
        let rows: Vec<RegistrationRequest> = self
            .client
            .post("/internal/requests/eligible", &EligibleQuery { now })
            .await
            .map_err(store_err)?;
        debug!(target: targets::STORE, count = rows.len(), "fetched eligible requests");
        Ok(rows)
    }

    async fn mark_succeeded(
        &self,
        id: u64,
        assigned_uid: Option<u64>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let _: Ack = self
            .client
            .post(
                "/internal/requests/succeeded",
                &SucceededUpdate {
                    id,
                    assigned_uid,
                    resolved_at: at,
                },
            )
            .await
            .map_err(store_err)?;
        debug!(target: targets::STORE, id, ?assigned_uid, "marked succeeded");
        Ok(())
    }

    async fn mark_failed(&self, id: u64) -> Result<()> {
        let _: Ack = self
            .client
            .post("/internal/requests/failed", &IdOnly { id })
            .await
            .map_err(store_err)?;
        debug!(target: targets::STORE, id, "marked failed");
        Ok(())
    }

    async fn mark_deleted(&self, id: u64) -> Result<()> {
        let _: Ack = self
            .client
            .post("/internal/requests/deleted", &IdOnly { id })
            .await
            .map_err(store_err)?;
        debug!(target: targets::STORE, id, "marked deleted");
        Ok(())
    }
}
