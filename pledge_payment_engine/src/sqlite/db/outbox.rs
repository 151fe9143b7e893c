use chrono::{DateTime, Duration, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOutboxEvent, OutboxEvent},
    traits::PaymentGatewayError,
};

/// Appends an outbox event. Callers embed this in the same transaction as the domain write it announces; that
/// transaction is what makes the outbox guarantee hold.
pub async fn insert_event(
    event: NewOutboxEvent,
    conn: &mut SqliteConnection,
) -> Result<OutboxEvent, PaymentGatewayError> {
    let event: OutboxEvent = sqlx::query_as(
        r#"
            INSERT INTO outbox_events (aggregate_id, event_type, payload)
            VALUES ($1, $2, $3)
            RETURNING *;
        "#,
    )
    .bind(event.aggregate_id)
    .bind(event.event_type.to_string())
    .bind(event.payload)
    .fetch_one(conn)
    .await?;
    trace!("📨️ Outbox event {} ({}) recorded", event.id, event.event_type);
    Ok(event)
}

/// Unprocessed events below the retry ceiling, oldest first. Events at the ceiling stay in the table but are no
/// longer fetched; they are surfaced through the relay's error log.
pub async fn fetch_unpublished(
    limit: i64,
    max_retries: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<OutboxEvent>, sqlx::Error> {
    let events = sqlx::query_as(
        r#"
            SELECT * FROM outbox_events
            WHERE processed_at IS NULL AND retry_count < $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2;
        "#,
    )
    .bind(max_retries)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(events)
}

/// Sets `processed_at`. The `IS NULL` guard makes the call a no-op on an already-processed event, so the timestamp
/// is set exactly once even if a relay crash causes a republish.
pub async fn mark_processed(
    event_id: i64,
    processed_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    sqlx::query("UPDATE outbox_events SET processed_at = $1 WHERE id = $2 AND processed_at IS NULL")
        .bind(processed_at)
        .bind(event_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn record_failure(event_id: i64, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query("UPDATE outbox_events SET retry_count = retry_count + 1 WHERE id = $1 AND processed_at IS NULL")
        .bind(event_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Deletes processed events older than the retention window.
pub async fn purge_processed(older_than: Duration, conn: &mut SqliteConnection) -> Result<u64, PaymentGatewayError> {
    let cutoff = Utc::now() - older_than;
    let result = sqlx::query("DELETE FROM outbox_events WHERE processed_at IS NOT NULL AND processed_at < $1")
        .bind(cutoff)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
