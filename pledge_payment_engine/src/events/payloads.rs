use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use ppg_common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{PaymentTransaction, Pledge, PledgeStatus};

//--------------------------------------   OutboxEventType   ---------------------------------------------------------
/// The closed set of event types this core produces. Consumers reject anything else at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxEventType {
    PledgeCreated,
    PaymentCaptured,
}

impl Display for OutboxEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxEventType::PledgeCreated => write!(f, "PledgeCreated"),
            OutboxEventType::PaymentCaptured => write!(f, "PaymentCaptured"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventType(String);

impl FromStr for OutboxEventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PledgeCreated" => Ok(Self::PledgeCreated),
            "PaymentCaptured" => Ok(Self::PaymentCaptured),
            s => Err(UnknownEventType(s.to_string())),
        }
    }
}

//-------------------------------------- PledgeCreatedPayload ---------------------------------------------------------
/// Announces a new pledge to downstream collaborators (notification service, analytics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PledgeCreatedPayload {
    pub pledge_id: String,
    pub campaign_id: String,
    pub donor_email: String,
    pub amount: Money,
    pub currency: String,
    pub status: PledgeStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Pledge> for PledgeCreatedPayload {
    fn from(pledge: &Pledge) -> Self {
        Self {
            pledge_id: pledge.pledge_id.as_str().to_string(),
            campaign_id: pledge.campaign_id.clone(),
            donor_email: pledge.donor_email.clone(),
            amount: pledge.amount,
            currency: pledge.currency.clone(),
            status: pledge.status,
            created_at: pledge.created_at,
        }
    }
}

//-------------------------------------- PaymentCapturedPayload -------------------------------------------------------
/// The completion event: a payment reached `Captured`. `campaign_id` is the aggregate key the totals tier
/// invalidates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCapturedPayload {
    pub campaign_id: String,
    pub pledge_id: String,
    pub external_reference: String,
    pub amount: Money,
    /// The idempotency key of the webhook delivery that produced the capture.
    pub event_id: String,
}

impl PaymentCapturedPayload {
    pub fn new(payment: &PaymentTransaction, pledge: &Pledge, event_id: &str) -> Self {
        Self {
            campaign_id: pledge.campaign_id.clone(),
            pledge_id: pledge.pledge_id.as_str().to_string(),
            external_reference: payment.external_reference.clone(),
            amount: payment.amount,
            event_id: event_id.to_string(),
        }
    }
}
