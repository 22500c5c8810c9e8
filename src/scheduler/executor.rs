//! Sequential submission of a ready fee group.
//!
//! Submissions within a group are strictly sequential and separated by a
//! fixed spacing delay to respect chain-side rate limits — reliability is
//! deliberately preferred over throughput. One account's failure never
//! aborts its siblings; only store write failures (fatal) propagate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::chain::ChainClient;
use crate::errors::{Error, Result};
use crate::logging::targets;
use crate::store::RequestStore;
use crate::types::RegistrationRequest;
use crate::vault::CredentialVault;

use super::sleep_cancellable;

/// Executes submissions for groups the estimator deemed ready.
pub struct SubmissionEngine<'a> {
    chain: &'a dyn ChainClient,
    store: &'a dyn RequestStore,
    vault: &'a CredentialVault,
    spacing: Duration,
}

impl<'a> SubmissionEngine<'a> {
    pub fn new(
        chain: &'a dyn ChainClient,
        store: &'a dyn RequestStore,
        vault: &'a CredentialVault,
        spacing: Duration,
    ) -> Self {
        Self {
            chain,
            store,
            vault,
            spacing,
        }
    }

    /// Submit every request in the group, in order.
    ///
    /// Outcome handling per request:
    /// - admitted: record success with the assigned identifier;
    /// - explicit rejection: record failure, the request retries next cycle;
    /// - transport error: no status write, the outcome is unknown and the
    ///   request stays unresolved;
    /// - undecryptable secret: skip, an operator must re-set it.
    ///
    /// Request state is only mutated after the submission call returns, so
    /// a shutdown mid-group never leaves a half-submitted request.
    pub async fn submit_group(
        &self,
        group: &[RegistrationRequest],
        shutdown: &AtomicBool,
    ) -> Result<()> {
        for (i, request) in group.iter().enumerate() {
            if shutdown.load(Ordering::SeqCst) {
                info!(
                    target: targets::EXECUTION,
                    submitted = i,
                    remaining = group.len() - i,
                    "shutdown requested, leaving remaining requests unresolved"
                );
                break;
            }

            self.submit_one(request).await?;

            // Inter-submission spacing, skipped after the last account.
            if i + 1 < group.len() && !sleep_cancellable(self.spacing, shutdown).await {
                break;
            }
        }
        Ok(())
    }

    async fn submit_one(&self, request: &RegistrationRequest) -> Result<()> {
        let account = &request.account;

        let Some(blob) = account.encrypted_secret.as_deref() else {
            warn!(
                target: targets::EXECUTION,
                id = request.id,
                account = %account.name,
                "account has no stored secret, skipping"
            );
            return Ok(());
        };

        let secret = match self.vault.decrypt(blob, account.id) {
            Ok(secret) => secret,
            Err(Error::CorruptOrTampered) => {
                error!(
                    target: targets::EXECUTION,
                    id = request.id,
                    account = %account.name,
                    "stored secret failed to decrypt, operator must re-set it"
                );
                return Ok(());
            }
            Err(other) => return Err(other),
        };

        info!(
            target: targets::EXECUTION,
            id = request.id,
            account = %account.name,
            partition = request.partition,
            "submitting registration"
        );

        match self
            .chain
            .submit(&account.address, &secret, request.partition)
            .await
        {
            Ok(outcome) if outcome.admitted => {
                info!(
                    target: targets::EXECUTION,
                    id = request.id,
                    account = %account.name,
                    assigned_uid = ?outcome.assigned_uid,
                    "registration admitted"
                );
                self.store
                    .mark_succeeded(request.id, outcome.assigned_uid, Utc::now())
                    .await
            }
            Ok(_) => {
                warn!(
                    target: targets::EXECUTION,
                    id = request.id,
                    account = %account.name,
                    "registration rejected on-chain, will retry"
                );
                self.store.mark_failed(request.id).await
            }
            Err(err) if err.is_transient() => {
                warn!(
                    target: targets::EXECUTION,
                    id = request.id,
                    account = %account.name,
                    error = %err,
                    "submission outcome unknown, leaving unresolved for next cycle"
                );
                Ok(())
            }
            Err(Error::OnChainRejection(reason)) => {
                warn!(
                    target: targets::EXECUTION,
                    id = request.id,
                    account = %account.name,
                    reason,
                    "registration rejected on-chain, will retry"
                );
                self.store.mark_failed(request.id).await
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                // Unexpected adapter failure: count it as a failed attempt
                // and continue with the next account.
                error!(
                    target: targets::EXECUTION,
                    id = request.id,
                    account = %account.name,
                    error = %err,
                    "submission failed"
                );
                self.store.mark_failed(request.id).await
            }
        }
    }
}
