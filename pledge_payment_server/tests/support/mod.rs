use pledge_payment_engine::SqliteDatabase;
use sqlx::{migrate::MigrateDatabase, Sqlite};

pub fn random_db_url() -> String {
    let dir = std::env::temp_dir();
    format!("sqlite://{}/ppg_server_test_{}.sqlite", dir.display(), rand::random::<u64>())
}

/// Creates a fresh throwaway SQLite database, migrates it, and hands back a connected backend.
pub async fn prepare_test_env() -> SqliteDatabase {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let url = random_db_url();
    let _ = Sqlite::drop_database(&url).await;
    Sqlite::create_database(&url).await.expect("Error creating test database");
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error connecting to test database");
    db.migrate().await.expect("Error running migrations");
    db
}
