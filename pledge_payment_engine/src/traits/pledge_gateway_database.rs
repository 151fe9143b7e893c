use chrono::{DateTime, Duration, Utc};

use crate::{
    db_types::{
        IdempotencyRecord,
        NewPaymentIntent,
        NewPledge,
        OutboxEvent,
        PaymentEventOutcome,
        PaymentStatus,
        PaymentTransaction,
        Pledge,
        PledgeId,
        StateTransition,
        StoredResponse,
    },
    traits::PaymentGatewayError,
};

/// The primary backend contract for the pledge payment gateway.
///
/// It covers the four reliability mechanisms of the core:
/// * The transactional outbox write path and the relay's view of the outbox table.
/// * The payment state machine, executed inside a single backend transaction.
/// * The durable tier of the idempotency gate, including the atomic claim step.
/// * The relay lease that keeps the outbox poller effectively single-writer.
#[allow(async_fn_in_trait)]
pub trait PledgeGatewayDatabase: Clone {
    /// The URL of the database.
    fn url(&self) -> &str;

    //----------------------------------------- Outbox write path -----------------------------------------------------

    /// Stores a new pledge and its `PledgeCreated` outbox event in one atomic transaction: after this call either
    /// both rows exist or neither does. The call is idempotent on `pledge_id`; the boolean is `false` when the
    /// pledge already existed (in which case no new outbox event is written).
    async fn insert_pledge(&self, pledge: NewPledge) -> Result<(Pledge, bool), PaymentGatewayError>;

    async fn fetch_pledge(&self, pledge_id: &PledgeId) -> Result<Option<Pledge>, PaymentGatewayError>;

    //----------------------------------------- Payment lifecycle -----------------------------------------------------

    /// Creates the payment transaction for a pledge in `Initiated` status and links the external reference back to
    /// the pledge row, atomically. Fails if the pledge does not exist or already has a payment intent.
    async fn create_payment_intent(
        &self,
        intent: NewPaymentIntent,
        external_reference: &str,
    ) -> Result<PaymentTransaction, PaymentGatewayError>;

    async fn fetch_payment_by_reference(
        &self,
        external_reference: &str,
    ) -> Result<Option<PaymentTransaction>, PaymentGatewayError>;

    /// The audit trail for one payment, oldest first.
    async fn fetch_payment_history(&self, payment_id: i64) -> Result<Vec<StateTransition>, PaymentGatewayError>;

    /// Drives the payment state machine with one event, inside a single transaction:
    ///
    /// 1. The payment row is fetched and the write transaction serialises concurrent deliveries for the same
    ///    payment.
    /// 2. An event timestamp strictly earlier than the row's `updated_at` is stale: nothing is mutated and
    ///    [`PaymentEventOutcome::Ignored`] is returned.
    /// 3. A transition that is not in the table is [`PaymentEventOutcome::Rejected`]: nothing is mutated, no audit
    ///    row is written.
    /// 4. Otherwise the status, version and `updated_at` are advanced, an audit row is appended, and — when the new
    ///    status is `Captured` — the owning pledge is marked `Completed` and a `PaymentCaptured` outbox event is
    ///    written, all in the same transaction.
    ///
    /// Unknown `external_reference` is an error ([`PaymentGatewayError::PaymentNotFound`]), not an outcome.
    async fn apply_payment_event(
        &self,
        external_reference: &str,
        new_status: PaymentStatus,
        event_timestamp: DateTime<Utc>,
        event_id: &str,
    ) -> Result<PaymentEventOutcome, PaymentGatewayError>;

    //----------------------------------------- Outbox relay view -----------------------------------------------------

    /// Unprocessed events with a retry count below the ceiling, oldest first, at most `limit` of them.
    async fn fetch_unpublished_events(
        &self,
        limit: i64,
        max_retries: i64,
    ) -> Result<Vec<OutboxEvent>, PaymentGatewayError>;

    /// Marks an event processed. Only called after a positive broker acknowledgment; `processed_at` is set exactly
    /// once and never unset.
    async fn mark_event_processed(&self, event_id: i64) -> Result<(), PaymentGatewayError>;

    /// Records a failed publish attempt: the retry count is incremented and the event stays unprocessed.
    async fn record_publish_failure(&self, event_id: i64) -> Result<(), PaymentGatewayError>;

    /// Deletes processed events older than the retention window. Returns the number of rows removed.
    async fn purge_processed_events(&self, older_than: Duration) -> Result<u64, PaymentGatewayError>;

    //----------------------------------------- Idempotency durable tier ----------------------------------------------

    /// The atomic claim step of the idempotency gate. Exactly one concurrent caller per key gets `None` (the claim)
    /// and must go on to compute and [`Self::complete_idempotency_key`] the response; every other caller gets the
    /// existing live record, which may still be pending. An expired record is treated as absent and replaced.
    async fn claim_idempotency_key(
        &self,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, PaymentGatewayError>;

    /// Stores the computed response on a claimed key. Set exactly once per key lifetime.
    async fn complete_idempotency_key(
        &self,
        key: &str,
        response: &StoredResponse,
    ) -> Result<(), PaymentGatewayError>;

    /// Releases a claim whose computation failed, so a later retry of the request can reprocess.
    async fn release_idempotency_key(&self, key: &str) -> Result<(), PaymentGatewayError>;

    /// The live record for a key, if any. Expired records are treated as absent.
    async fn fetch_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>, PaymentGatewayError>;

    /// Deletes expired idempotency records. Returns the number of rows removed.
    async fn purge_expired_idempotency_keys(&self) -> Result<u64, PaymentGatewayError>;

    //----------------------------------------- Relay lease ------------------------------------------------------------

    /// Attempts to acquire (or renew) the single-writer lease for the outbox relay. Returns `true` when `holder` now
    /// owns the lease. A different holder can only take the lease over once it has expired.
    async fn try_acquire_relay_lease(&self, holder: &str, ttl: Duration) -> Result<bool, PaymentGatewayError>;

    /// Releases the lease if `holder` owns it.
    async fn release_relay_lease(&self, holder: &str) -> Result<(), PaymentGatewayError>;
}
