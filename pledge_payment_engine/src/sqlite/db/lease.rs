use chrono::{Duration, Utc};
use sqlx::SqliteConnection;

use crate::traits::PaymentGatewayError;

/// Attempts to take or renew the relay lease in one atomic UPDATE. The guard clause admits the current holder
/// (renewal), a vacant lease, or an expired one; anything else leaves the row untouched and returns `false`.
pub async fn try_acquire(
    holder: &str,
    ttl: Duration,
    conn: &mut SqliteConnection,
) -> Result<bool, PaymentGatewayError> {
    let now = Utc::now();
    let expires_at = now + ttl;
    let result = sqlx::query(
        r#"
            UPDATE relay_lease SET holder = $1, expires_at = $2
            WHERE id = 1 AND (holder IS NULL OR holder = $1 OR expires_at <= $3);
        "#,
    )
    .bind(holder)
    .bind(expires_at)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn release(holder: &str, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query("UPDATE relay_lease SET holder = NULL, expires_at = NULL WHERE id = 1 AND holder = $1")
        .bind(holder)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::SqliteDatabase;

    async fn test_db() -> SqliteDatabase {
        let url = crate::sqlite::sqlite_impl::test_support::random_db_url();
        crate::sqlite::sqlite_impl::test_support::create_test_database(&url).await
    }

    #[tokio::test]
    async fn only_one_holder_at_a_time() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        assert!(try_acquire("relay-a", Duration::seconds(30), &mut conn).await.unwrap());
        assert!(!try_acquire("relay-b", Duration::seconds(30), &mut conn).await.unwrap());
        // the holder can renew its own lease
        assert!(try_acquire("relay-a", Duration::seconds(30), &mut conn).await.unwrap());
    }

    #[tokio::test]
    async fn released_or_expired_lease_changes_hands() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        assert!(try_acquire("relay-a", Duration::seconds(30), &mut conn).await.unwrap());
        release("relay-a", &mut conn).await.unwrap();
        assert!(try_acquire("relay-b", Duration::seconds(30), &mut conn).await.unwrap());
        // an expired lease is up for grabs without an explicit release
        assert!(try_acquire("relay-b", Duration::seconds(-1), &mut conn).await.unwrap());
        assert!(try_acquire("relay-c", Duration::seconds(30), &mut conn).await.unwrap());
    }

    #[tokio::test]
    async fn release_by_non_holder_is_a_noop() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        assert!(try_acquire("relay-a", Duration::seconds(30), &mut conn).await.unwrap());
        release("relay-b", &mut conn).await.unwrap();
        assert!(!try_acquire("relay-b", Duration::seconds(30), &mut conn).await.unwrap());
    }
}
