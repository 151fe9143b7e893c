use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewPaymentIntent, PaymentStatus, PaymentTransaction, StateTransition},
    traits::PaymentGatewayError,
};

/// Inserts the payment transaction for a pledge in `INITIATED` status. The unique constraint on
/// `external_reference` (and on the pledge's `payment_reference`) keeps intent creation single-shot per pledge.
pub async fn insert_payment(
    intent: NewPaymentIntent,
    external_reference: &str,
    conn: &mut SqliteConnection,
) -> Result<PaymentTransaction, PaymentGatewayError> {
    let pledge_id = intent.pledge_id.clone();
    let payment: PaymentTransaction = sqlx::query_as(
        r#"
            INSERT INTO payment_transactions (pledge_id, external_reference, amount, currency)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(intent.pledge_id)
    .bind(external_reference)
    .bind(intent.amount.value())
    .bind(intent.currency)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            PaymentGatewayError::PaymentIntentAlreadyExists(pledge_id)
        },
        _ => PaymentGatewayError::from(e),
    })?;
    debug!("💳️ Payment intent [{}] created for pledge {}", external_reference, payment.pledge_id);
    Ok(payment)
}

pub async fn fetch_payment_by_reference(
    external_reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentTransaction>, sqlx::Error> {
    let payment = sqlx::query_as("SELECT * FROM payment_transactions WHERE external_reference = $1")
        .bind(external_reference)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}

/// Advances a payment to its next state. Only called after the state machine has validated the transition; the
/// version is passed in explicitly so the caller controls the increment-by-one invariant.
pub async fn update_payment_status(
    payment_id: i64,
    status: PaymentStatus,
    version: i64,
    event_timestamp: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PaymentTransaction, PaymentGatewayError> {
    let result: Option<PaymentTransaction> = sqlx::query_as(
        "UPDATE payment_transactions SET status = $1, version = $2, updated_at = $3 WHERE id = $4 RETURNING *",
    )
    .bind(status.to_string())
    .bind(version)
    .bind(event_timestamp)
    .bind(payment_id)
    .fetch_optional(conn)
    .await?;
    result.ok_or_else(|| PaymentGatewayError::PaymentNotFound(payment_id.to_string()))
}

/// Appends one audit row. Runs in the same transaction as [`update_payment_status`].
pub async fn insert_state_transition(
    payment_id: i64,
    from_status: PaymentStatus,
    to_status: PaymentStatus,
    event_id: &str,
    event_timestamp: DateTime<Utc>,
    version: i64,
    conn: &mut SqliteConnection,
) -> Result<StateTransition, PaymentGatewayError> {
    let transition = sqlx::query_as(
        r#"
            INSERT INTO payment_state_log (payment_id, from_status, to_status, event_id, event_timestamp, version)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(payment_id)
    .bind(from_status.to_string())
    .bind(to_status.to_string())
    .bind(event_id)
    .bind(event_timestamp)
    .bind(version)
    .fetch_one(conn)
    .await?;
    Ok(transition)
}

pub async fn fetch_state_log(
    payment_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<StateTransition>, sqlx::Error> {
    let log = sqlx::query_as("SELECT * FROM payment_state_log WHERE payment_id = $1 ORDER BY version ASC")
        .bind(payment_id)
        .fetch_all(conn)
        .await?;
    Ok(log)
}
