use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{IdempotencyRecord, StoredResponse},
    traits::PaymentGatewayError,
};

/// The atomic claim step. `INSERT OR IGNORE` against the primary key is the whole race arbiter: exactly one
/// concurrent caller inserts the pending row and gets `None` back; everyone else reads the existing live record.
/// An expired record counts as absent and is cleared first so the key can be reused for a new logical request.
pub async fn claim_key(
    key: &str,
    expires_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<IdempotencyRecord>, PaymentGatewayError> {
    let now = Utc::now();
    sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND expires_at <= $2")
        .bind(key)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    let result = sqlx::query(
        "INSERT OR IGNORE INTO idempotency_keys (key, created_at, expires_at) VALUES ($1, $2, $3)",
    )
    .bind(key)
    .bind(now)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 1 {
        trace!("🔁️ Claimed idempotency key {key}");
        return Ok(None);
    }
    let existing = fetch_record(key, &mut *conn).await?;
    Ok(existing)
}

/// Stores the computed response on a claimed key.
pub async fn complete_key(
    key: &str,
    response: &StoredResponse,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    sqlx::query("UPDATE idempotency_keys SET response_body = $1, response_status = $2 WHERE key = $3")
        .bind(&response.body)
        .bind(i64::from(response.status))
        .bind(key)
        .execute(conn)
        .await?;
    Ok(())
}

/// Drops a claim whose computation failed, so the next retry of the request starts fresh.
pub async fn release_key(key: &str, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND response_body IS NULL")
        .bind(key)
        .execute(conn)
        .await?;
    Ok(())
}

/// The live record for a key. Expired records are invisible here; [`purge_expired`] removes them for real.
pub async fn fetch_record(
    key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
    let record = sqlx::query_as("SELECT * FROM idempotency_keys WHERE key = $1 AND expires_at > $2")
        .bind(key)
        .bind(Utc::now())
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

pub async fn purge_expired(conn: &mut SqliteConnection) -> Result<u64, PaymentGatewayError> {
    let result =
        sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1").bind(Utc::now()).execute(conn).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;
    use crate::SqliteDatabase;

    async fn test_db() -> SqliteDatabase {
        let url = crate::sqlite::sqlite_impl::test_support::random_db_url();
        crate::sqlite::sqlite_impl::test_support::create_test_database(&url).await
    }

    #[tokio::test]
    async fn first_claim_wins_second_sees_pending_record() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let expires = Utc::now() + Duration::hours(24);
        assert!(claim_key("k1", expires, &mut conn).await.unwrap().is_none());
        let existing = claim_key("k1", expires, &mut conn).await.unwrap().expect("claim must be visible");
        assert!(existing.response().is_none());
    }

    #[tokio::test]
    async fn completed_key_replays_stored_response() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let expires = Utc::now() + Duration::hours(24);
        claim_key("k2", expires, &mut conn).await.unwrap();
        complete_key("k2", &StoredResponse::new(200, r#"{"status":"processed"}"#), &mut conn).await.unwrap();
        let record = fetch_record("k2", &mut conn).await.unwrap().unwrap();
        assert_eq!(record.response(), Some(StoredResponse::new(200, r#"{"status":"processed"}"#)));
    }

    #[tokio::test]
    async fn released_claim_can_be_reclaimed() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let expires = Utc::now() + Duration::hours(24);
        claim_key("k3", expires, &mut conn).await.unwrap();
        release_key("k3", &mut conn).await.unwrap();
        assert!(claim_key("k3", expires, &mut conn).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_never_drops_a_completed_record() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let expires = Utc::now() + Duration::hours(24);
        claim_key("k4", expires, &mut conn).await.unwrap();
        complete_key("k4", &StoredResponse::new(200, "{}"), &mut conn).await.unwrap();
        release_key("k4", &mut conn).await.unwrap();
        assert!(fetch_record("k4", &mut conn).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_keys_are_invisible_and_reusable() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let expired = Utc::now() - Duration::seconds(1);
        claim_key("k5", expired, &mut conn).await.unwrap();
        complete_key("k5", &StoredResponse::new(200, "{}"), &mut conn).await.unwrap();
        assert!(fetch_record("k5", &mut conn).await.unwrap().is_none());
        // a new logical request may claim the key again
        assert!(claim_key("k5", Utc::now() + Duration::hours(24), &mut conn).await.unwrap().is_none());
        let purged = purge_expired(&mut conn).await.unwrap();
        assert_eq!(purged, 0); // the expired row was already replaced by the re-claim
    }
}
