use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use ppg_common::{Money, DEFAULT_CURRENCY_CODE};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid status value: {0}")]
pub struct StatusConversionError(String);

//--------------------------------------      PledgeId       ---------------------------------------------------------
/// A lightweight wrapper around the opaque pledge identifier assigned at intake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct PledgeId(pub String);

impl FromStr for PledgeId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for PledgeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for PledgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PledgeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------    PledgeStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum PledgeStatus {
    /// The pledge has been recorded, but no payment has been captured for it.
    Pending,
    /// A payment for the pledge has been captured in full. Completed pledges count towards campaign totals.
    Completed,
    /// The payment for the pledge failed terminally.
    Failed,
}

impl Display for PledgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PledgeStatus::Pending => write!(f, "Pending"),
            PledgeStatus::Completed => write!(f, "Completed"),
            PledgeStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for PledgeStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            s => Err(StatusConversionError(format!("Invalid pledge status: {s}"))),
        }
    }
}

impl From<String> for PledgeStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid pledge status: {value}. But this conversion cannot fail. Defaulting to Pending");
            PledgeStatus::Pending
        })
    }
}

//--------------------------------------    PaymentStatus    ---------------------------------------------------------
/// The closed set of payment lifecycle states. Unknown status strings are rejected at the boundary by [`FromStr`];
/// the allowed movements between states live in [`crate::state_machine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// A payment intent exists, but the gateway has not confirmed anything yet.
    Initiated,
    /// The gateway authorized the payment; funds are reserved.
    Authorized,
    /// The funds were captured. This is the aggregate-relevant state.
    Captured,
    /// The payment failed. Terminal.
    Failed,
    /// The payment was refunded. Terminal.
    Refunded,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Initiated => write!(f, "INITIATED"),
            PaymentStatus::Authorized => write!(f, "AUTHORIZED"),
            PaymentStatus::Captured => write!(f, "CAPTURED"),
            PaymentStatus::Failed => write!(f, "FAILED"),
            PaymentStatus::Refunded => write!(f, "REFUNDED"),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIATED" => Ok(Self::Initiated),
            "AUTHORIZED" => Ok(Self::Authorized),
            "CAPTURED" => Ok(Self::Captured),
            "FAILED" => Ok(Self::Failed),
            "REFUNDED" => Ok(Self::Refunded),
            s => Err(StatusConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

impl From<String> for PaymentStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid payment status: {value}. But this conversion cannot fail. Defaulting to Initiated");
            PaymentStatus::Initiated
        })
    }
}

//--------------------------------------       Pledge        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Pledge {
    pub id: i64,
    pub pledge_id: PledgeId,
    pub campaign_id: String,
    pub donor_email: String,
    pub amount: Money,
    pub currency: String,
    pub status: PledgeStatus,
    /// The external reference of the payment intent backing this pledge, once one has been created.
    pub payment_reference: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------      NewPledge      ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewPledge {
    /// The opaque pledge identifier assigned by the intake collaborator.
    pub pledge_id: PledgeId,
    /// The campaign this pledge contributes to. This is the aggregate key for totals.
    pub campaign_id: String,
    pub donor_email: String,
    pub amount: Money,
    pub currency: String,
}

impl NewPledge {
    pub fn new<S1, S2>(pledge_id: PledgeId, campaign_id: S1, donor_email: S2, amount: Money) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            pledge_id,
            campaign_id: campaign_id.into(),
            donor_email: donor_email.into(),
            amount,
            currency: DEFAULT_CURRENCY_CODE.to_string(),
        }
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into();
        self
    }
}

//--------------------------------------  PaymentTransaction ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentTransaction {
    pub id: i64,
    pub pledge_id: PledgeId,
    /// The gateway-facing identifier for this payment. Webhook deliveries reference payments by this value.
    pub external_reference: String,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    /// Increases by exactly one per accepted transition.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentIntent {
    pub pledge_id: PledgeId,
    pub amount: Money,
    pub currency: String,
}

//--------------------------------------   StateTransition   ---------------------------------------------------------
/// One accepted payment state transition. Rows are append-only and written in the same transaction as the
/// [`PaymentTransaction`] mutation they describe.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StateTransition {
    pub id: i64,
    pub payment_id: i64,
    pub from_status: PaymentStatus,
    pub to_status: PaymentStatus,
    pub event_id: String,
    pub event_timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub version: i64,
}

//-------------------------------------- PaymentEventOutcome ---------------------------------------------------------
/// The result of driving the payment state machine with one event. Expected, frequent outcomes are values here, not
/// errors: only infrastructure failures and unknown payments surface as [`crate::traits::PaymentGatewayError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventOutcome {
    /// The transition was accepted and persisted.
    Processed { old_status: PaymentStatus, new_status: PaymentStatus, version: i64 },
    /// The event is older than the payment's current state and was soft-ignored without any mutation.
    Ignored,
    /// The requested transition is not in the transition table. Nothing was mutated and no audit row was written.
    Rejected { from: PaymentStatus, to: PaymentStatus },
}

//--------------------------------------     OutboxEvent     ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct OutboxEvent {
    pub id: i64,
    pub aggregate_id: String,
    pub event_type: String,
    /// JSON-serialized event payload. Parsed (and validated) by the relay just before publication.
    pub payload: String,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, when the broker acknowledged the publish. Never unset.
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i64,
}

#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_id: String,
    pub event_type: crate::events::OutboxEventType,
    pub payload: String,
}

impl NewOutboxEvent {
    pub fn new<S, P>(aggregate_id: S, event_type: crate::events::OutboxEventType, payload: &P) -> Result<Self, serde_json::Error>
    where
        S: Into<String>,
        P: Serialize,
    {
        Ok(Self { aggregate_id: aggregate_id.into(), event_type, payload: serde_json::to_string(payload)? })
    }
}

//--------------------------------------  IdempotencyRecord  ---------------------------------------------------------
/// A durable idempotency entry. A row with a `NULL` body is a claim: some request is currently computing the response
/// for this key. A row with a body is a completed record and is replayed verbatim for the key's lifetime.
#[derive(Debug, Clone, FromRow)]
pub struct IdempotencyRecord {
    pub key: String,
    pub response_body: Option<String>,
    pub response_status: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// The stored response, if the winning request has completed.
    pub fn response(&self) -> Option<StoredResponse> {
        match (&self.response_body, self.response_status) {
            (Some(body), Some(status)) => Some(StoredResponse { body: body.clone(), status: status as u16 }),
            _ => None,
        }
    }
}

//--------------------------------------    StoredResponse   ---------------------------------------------------------
/// The response captured for an idempotency key: the exact body bytes and status code of the first execution,
/// replayed verbatim for every retry of the same logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: u16,
    pub body: String,
}

impl StoredResponse {
    pub fn new<S: Into<String>>(status: u16, body: S) -> Self {
        Self { status, body: body.into() }
    }
}

//--------------------------------------   CampaignTotals    ---------------------------------------------------------
/// Aggregate totals for one campaign. Snapshot rows of this shape are advisory: they can always be recomputed from
/// the pledge history.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct CampaignTotals {
    pub campaign_id: String,
    pub pledge_count: i64,
    pub total_amount: Money,
    pub unique_donors: i64,
    pub computed_at: DateTime<Utc>,
}
