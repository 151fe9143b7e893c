//! The idempotency gate.
//!
//! Every externally-retriable mutation (chiefly payment gateway webhooks) passes through [`IdempotencyGate::admit`]
//! before it is allowed to do anything. The gate guarantees that the underlying computation runs exactly once per
//! key, no matter how many times — or how concurrently — the gateway retries the delivery, and that every retry
//! receives the byte-identical stored response.
use std::future::Future;

use chrono::{Duration, Utc};
use log::{debug, trace, warn};
use sha2::{Digest, Sha256};

use crate::{
    cache::TtlCache,
    db_types::StoredResponse,
    traits::{PaymentGatewayError, PledgeGatewayDatabase},
};

/// Derives a deterministic idempotency key from the raw request body, for callers that did not supply one.
/// Byte-identical retries collide; any payload difference does not.
pub fn derive_idempotency_key(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("{digest:x}")
}

/// How long a losing concurrent request polls for the winner's result before giving up.
const CLAIM_WAIT_ATTEMPTS: u32 = 40;
const CLAIM_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

pub struct IdempotencyGate<B> {
    db: B,
    fast_tier: TtlCache<StoredResponse>,
    retention: Duration,
}

impl<B> IdempotencyGate<B> {
    /// `fast_tier` is the volatile cache shared across request handlers; `retention` is the lifetime of durable
    /// records and must cover the gateway's retry window.
    pub fn new(db: B, fast_tier: TtlCache<StoredResponse>, retention: Duration) -> Self {
        Self { db, fast_tier, retention }
    }
}

impl<B> IdempotencyGate<B>
where B: PledgeGatewayDatabase
{
    /// Admits one logical request.
    ///
    /// * Fast-tier hit: the stored response is returned immediately, `was_duplicate = true`.
    /// * Durable-tier hit: the fast tier is warmed and the stored response returned, `was_duplicate = true`.
    /// * Neither: the key is claimed atomically (insert-if-absent on the durable tier), `compute` runs exactly
    ///   once, and its result is persisted before being returned with `was_duplicate = false`. A concurrent loser
    ///   waits for the winner's stored result instead of computing again.
    ///
    /// If `compute` fails, the claim is released and the error propagated — a hard failure is not a recorded
    /// outcome, so the gateway's next retry reprocesses.
    pub async fn admit<F, Fut>(&self, key: &str, compute: F) -> Result<(StoredResponse, bool), PaymentGatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StoredResponse, PaymentGatewayError>>,
    {
        if let Some(response) = self.fast_tier.get(key).await {
            trace!("🔁️ Idempotency fast-tier hit for key {key}");
            return Ok((response, true));
        }
        if let Some(record) = self.db.fetch_idempotency_record(key).await? {
            return match record.response() {
                Some(response) => {
                    debug!("🔁️ Idempotency durable-tier hit for key {key}");
                    self.fast_tier.insert(key, response.clone()).await;
                    Ok((response, true))
                },
                // A pending claim: someone else is processing this key right now.
                None => Ok((self.await_winner(key).await?, true)),
            };
        }
        let expires_at = Utc::now() + self.retention;
        match self.db.claim_idempotency_key(key, expires_at).await? {
            None => {
                trace!("🔁️ Key {key} claimed; running the computation");
                match compute().await {
                    Ok(response) => {
                        self.db.complete_idempotency_key(key, &response).await?;
                        self.fast_tier.insert(key, response.clone()).await;
                        Ok((response, false))
                    },
                    Err(e) => {
                        warn!("🔁️ Computation for key {key} failed; releasing the claim. {e}");
                        self.db.release_idempotency_key(key).await?;
                        Err(e)
                    },
                }
            },
            Some(record) => match record.response() {
                Some(response) => {
                    self.fast_tier.insert(key, response.clone()).await;
                    Ok((response, true))
                },
                None => Ok((self.await_winner(key).await?, true)),
            },
        }
    }

    /// Polls the durable tier until the concurrent winner stores its response. If the winner's claim disappears
    /// (its computation failed), this request does not take over; the caller's retry will.
    async fn await_winner(&self, key: &str) -> Result<StoredResponse, PaymentGatewayError> {
        for _ in 0..CLAIM_WAIT_ATTEMPTS {
            tokio::time::sleep(CLAIM_POLL_INTERVAL).await;
            match self.db.fetch_idempotency_record(key).await? {
                Some(record) => {
                    if let Some(response) = record.response() {
                        debug!("🔁️ Winner finished; replaying stored response for key {key}");
                        self.fast_tier.insert(key, response.clone()).await;
                        return Ok(response);
                    }
                },
                None => break,
            }
        }
        Err(PaymentGatewayError::IdempotencyContention(key.to_string()))
    }
}
