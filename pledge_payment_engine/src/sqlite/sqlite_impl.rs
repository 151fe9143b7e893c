//! `SqliteDatabase` is a concrete implementation of a pledge payment gateway backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements the traits defined in the [`crate::traits`] module.
//! Multi-statement operations (the outbox write path, intent creation, the state machine) run inside a single
//! `sqlx` transaction; in SQLite the write transaction is also what serialises concurrent webhook deliveries for
//! the same payment row.
use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use sqlx::SqlitePool;

use super::db::{idempotency, lease, new_pool, outbox, payments, pledges, totals};
use crate::{
    db_types::{
        CampaignTotals,
        IdempotencyRecord,
        NewOutboxEvent,
        NewPaymentIntent,
        NewPledge,
        OutboxEvent,
        PaymentEventOutcome,
        PaymentStatus,
        PaymentTransaction,
        Pledge,
        PledgeId,
        PledgeStatus,
        StateTransition,
        StoredResponse,
    },
    events::{OutboxEventType, PaymentCapturedPayload, PledgeCreatedPayload},
    state_machine,
    traits::{PaymentGatewayError, PledgeGatewayDatabase, TotalsReporting},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, PaymentGatewayError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Brings the schema up to date. Called once at startup, and by the test environment helpers.
    pub async fn migrate(&self) -> Result<(), PaymentGatewayError> {
        sqlx::migrate!("./src/sqlite/db/migrations").run(&self.pool).await?;
        info!("🚀️ Database migrations complete");
        Ok(())
    }
}

impl PledgeGatewayDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_pledge(&self, pledge: NewPledge) -> Result<(Pledge, bool), PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        if let Some(existing) = pledges::fetch_pledge_by_pledge_id(&pledge.pledge_id, &mut tx).await? {
            debug!("🪙️ Pledge [{}] already exists. Returning the stored record.", existing.pledge_id);
            return Ok((existing, false));
        }
        let pledge = pledges::insert_pledge(pledge, &mut tx).await?;
        let payload = PledgeCreatedPayload::from(&pledge);
        let event = NewOutboxEvent::new(pledge.pledge_id.as_str(), OutboxEventType::PledgeCreated, &payload)?;
        outbox::insert_event(event, &mut tx).await?;
        tx.commit().await?;
        Ok((pledge, true))
    }

    async fn fetch_pledge(&self, pledge_id: &PledgeId) -> Result<Option<Pledge>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let pledge = pledges::fetch_pledge_by_pledge_id(pledge_id, &mut conn).await?;
        Ok(pledge)
    }

    async fn create_payment_intent(
        &self,
        intent: NewPaymentIntent,
        external_reference: &str,
    ) -> Result<PaymentTransaction, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let pledge_id = intent.pledge_id.clone();
        if pledges::fetch_pledge_by_pledge_id(&pledge_id, &mut tx).await?.is_none() {
            return Err(PaymentGatewayError::PledgeNotFound(pledge_id));
        }
        let payment = payments::insert_payment(intent, external_reference, &mut tx).await?;
        pledges::link_payment_reference(&pledge_id, external_reference, &mut tx).await?;
        tx.commit().await?;
        Ok(payment)
    }

    async fn fetch_payment_by_reference(
        &self,
        external_reference: &str,
    ) -> Result<Option<PaymentTransaction>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_payment_by_reference(external_reference, &mut conn).await?;
        Ok(payment)
    }

    async fn fetch_payment_history(&self, payment_id: i64) -> Result<Vec<StateTransition>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let log = payments::fetch_state_log(payment_id, &mut conn).await?;
        Ok(log)
    }

    async fn apply_payment_event(
        &self,
        external_reference: &str,
        new_status: PaymentStatus,
        event_timestamp: DateTime<Utc>,
        event_id: &str,
    ) -> Result<PaymentEventOutcome, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let payment = payments::fetch_payment_by_reference(external_reference, &mut tx)
            .await?
            .ok_or_else(|| PaymentGatewayError::PaymentNotFound(external_reference.to_string()))?;
        // Strictly-earlier events are stale. An event carrying the same timestamp as the current state is a
        // *different* event (identical retries never get this far; the gate absorbs them) and is admitted.
        if event_timestamp < payment.updated_at {
            debug!(
                "⏮️ Ignoring out-of-order event for payment [{external_reference}]: event at {event_timestamp} is \
                 older than the current state at {}",
                payment.updated_at
            );
            return Ok(PaymentEventOutcome::Ignored);
        }
        if !state_machine::is_valid_transition(payment.status, new_status) {
            debug!(
                "🚫️ Rejecting invalid transition {} -> {new_status} for payment [{external_reference}]",
                payment.status
            );
            return Ok(PaymentEventOutcome::Rejected { from: payment.status, to: new_status });
        }
        let old_status = payment.status;
        let version = payment.version + 1;
        let payment = payments::update_payment_status(payment.id, new_status, version, event_timestamp, &mut tx).await?;
        payments::insert_state_transition(
            payment.id,
            old_status,
            new_status,
            event_id,
            event_timestamp,
            version,
            &mut tx,
        )
        .await?;
        if new_status == PaymentStatus::Captured {
            let pledge =
                pledges::update_pledge_status(&payment.pledge_id, PledgeStatus::Completed, event_timestamp, &mut tx)
                    .await?;
            let payload = PaymentCapturedPayload::new(&payment, &pledge, event_id);
            let event = NewOutboxEvent::new(pledge.pledge_id.as_str(), OutboxEventType::PaymentCaptured, &payload)?;
            outbox::insert_event(event, &mut tx).await?;
        }
        tx.commit().await?;
        info!("💳️ Payment [{external_reference}] moved {old_status} -> {new_status} (version {version})");
        Ok(PaymentEventOutcome::Processed { old_status, new_status, version })
    }

    async fn fetch_unpublished_events(
        &self,
        limit: i64,
        max_retries: i64,
    ) -> Result<Vec<OutboxEvent>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let events = outbox::fetch_unpublished(limit, max_retries, &mut conn).await?;
        Ok(events)
    }

    async fn mark_event_processed(&self, event_id: i64) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        outbox::mark_processed(event_id, Utc::now(), &mut conn).await
    }

    async fn record_publish_failure(&self, event_id: i64) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        outbox::record_failure(event_id, &mut conn).await
    }

    async fn purge_processed_events(&self, older_than: Duration) -> Result<u64, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        outbox::purge_processed(older_than, &mut conn).await
    }

    async fn claim_idempotency_key(
        &self,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        idempotency::claim_key(key, expires_at, &mut conn).await
    }

    async fn complete_idempotency_key(
        &self,
        key: &str,
        response: &StoredResponse,
    ) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        idempotency::complete_key(key, response, &mut conn).await
    }

    async fn release_idempotency_key(&self, key: &str) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        idempotency::release_key(key, &mut conn).await
    }

    async fn fetch_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let record = idempotency::fetch_record(key, &mut conn).await?;
        Ok(record)
    }

    async fn purge_expired_idempotency_keys(&self) -> Result<u64, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        idempotency::purge_expired(&mut conn).await
    }

    async fn try_acquire_relay_lease(&self, holder: &str, ttl: Duration) -> Result<bool, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        lease::try_acquire(holder, ttl, &mut conn).await
    }

    async fn release_relay_lease(&self, holder: &str) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        lease::release(holder, &mut conn).await
    }
}

impl TotalsReporting for SqliteDatabase {
    async fn compute_campaign_totals(&self, campaign_id: &str) -> Result<CampaignTotals, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        totals::compute_totals(campaign_id, &mut conn).await
    }

    async fn fetch_totals_snapshot(&self, campaign_id: &str) -> Result<Option<CampaignTotals>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let snapshot = totals::fetch_snapshot(campaign_id, &mut conn).await?;
        Ok(snapshot)
    }

    async fn upsert_totals_snapshot(&self, totals: &CampaignTotals) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        totals::upsert_snapshot(totals, &mut conn).await
    }
}
