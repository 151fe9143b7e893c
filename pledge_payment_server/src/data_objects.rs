use std::fmt::Display;

use chrono::{DateTime, Utc};
use pledge_payment_engine::{
    db_types::{PaymentEventOutcome, StoredResponse},
    ppe_api::totals_api::{DataSource, TotalsResult},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

//-------------------------------------------------  Pledge intake  ---------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPledgeRequest {
    /// Client-supplied pledge identifier. Resubmitting the same id is idempotent. Generated when absent.
    #[serde(default)]
    pub pledge_id: Option<String>,
    pub campaign_id: String,
    pub donor_email: String,
    /// Amount in integer minor units (e.g. cents).
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentRequest {
    pub pledge_id: String,
}

//-------------------------------------------------  Webhook ingestion  -----------------------------------------------
/// The body of a payment gateway webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRequest {
    pub event_type: String,
    pub external_reference: String,
    /// The target payment status. Must parse into the closed status set; anything else is a 400.
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Renders a state machine outcome as the response the gateway sees. The result is also what the idempotency gate
/// stores, so retries replay these exact bytes.
pub fn stored_response_for(outcome: &PaymentEventOutcome) -> StoredResponse {
    match outcome {
        PaymentEventOutcome::Processed { old_status, new_status, version } => StoredResponse::new(
            200,
            serde_json::json!({
                "status": "processed",
                "old_status": old_status.to_string(),
                "new_status": new_status.to_string(),
                "version": version,
            })
            .to_string(),
        ),
        PaymentEventOutcome::Ignored => StoredResponse::new(
            200,
            serde_json::json!({
                "status": "ignored",
                "reason": "out_of_order",
                "message": "Event is older than current state",
            })
            .to_string(),
        ),
        PaymentEventOutcome::Rejected { from, to } => StoredResponse::new(
            400,
            serde_json::json!({
                "status": "rejected",
                "reason": "invalid_transition",
                "message": format!("Invalid state transition: {from} -> {to}"),
            })
            .to_string(),
        ),
    }
}

pub fn payment_not_found_response(external_reference: &str) -> StoredResponse {
    StoredResponse::new(
        404,
        serde_json::json!({
            "status": "error",
            "reason": "payment_not_found",
            "message": format!("No payment with reference {external_reference}"),
        })
        .to_string(),
    )
}

//-------------------------------------------------  Totals  ----------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalsResponse {
    pub campaign_id: String,
    pub count: i64,
    /// Sum of completed pledge amounts, in minor units.
    pub sum: i64,
    pub unique_count: i64,
    pub data_source: DataSource,
    pub last_updated: DateTime<Utc>,
}

impl From<TotalsResult> for TotalsResponse {
    fn from(result: TotalsResult) -> Self {
        Self {
            campaign_id: result.totals.campaign_id,
            count: result.totals.pledge_count,
            sum: result.totals.total_amount.value(),
            unique_count: result.totals.unique_donors,
            data_source: result.data_source,
            last_updated: result.totals.computed_at,
        }
    }
}

#[cfg(test)]
mod test {
    use pledge_payment_engine::db_types::PaymentStatus;

    use super::*;

    #[test]
    fn processed_outcome_serializes_with_transition_details() {
        let outcome = PaymentEventOutcome::Processed {
            old_status: PaymentStatus::Initiated,
            new_status: PaymentStatus::Authorized,
            version: 2,
        };
        let stored = stored_response_for(&outcome);
        assert_eq!(stored.status, 200);
        let body: serde_json::Value = serde_json::from_str(&stored.body).unwrap();
        assert_eq!(body["status"], "processed");
        assert_eq!(body["old_status"], "INITIATED");
        assert_eq!(body["new_status"], "AUTHORIZED");
        assert_eq!(body["version"], 2);
    }

    #[test]
    fn rejected_outcome_is_a_client_error() {
        let outcome =
            PaymentEventOutcome::Rejected { from: PaymentStatus::Initiated, to: PaymentStatus::Captured };
        let stored = stored_response_for(&outcome);
        assert_eq!(stored.status, 400);
        let body: serde_json::Value = serde_json::from_str(&stored.body).unwrap();
        assert_eq!(body["reason"], "invalid_transition");
    }
}
