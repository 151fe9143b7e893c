use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use log::info;
use pledge_payment_engine::{
    cache::TtlCache,
    db_types::{CampaignTotals, StoredResponse},
    events::InMemoryBroker,
    IdempotencyGate,
    PledgeFlowApi,
    SqliteDatabase,
    TotalsApi,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    relay_worker::start_relay_worker,
    routes::{
        campaign_totals,
        create_payment_intent,
        create_pledge,
        get_pledge,
        health,
        payment_status,
        payment_webhook,
        refresh_totals,
    },
    totals_worker::start_totals_worker,
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;

    // The caches and the broker are constructed once per process and handed to everything that needs them: the
    // request handlers, the relay, and the invalidation worker all share these exact instances.
    let broker = InMemoryBroker::new(128);
    let idempotency_cache = TtlCache::new(config.idempotency.fast_ttl);
    let totals_cache = TtlCache::new(config.totals_cache_ttl);

    let totals_api = TotalsApi::new(db.clone(), totals_cache.clone());
    start_totals_worker(totals_api.clone(), broker.subscribe());
    if config.relay.enabled {
        start_relay_worker(db.clone(), broker, config.relay.clone());
    } else {
        info!("📨️ Outbox relay is disabled on this replica");
    }

    let srv = create_server_instance(config, db, idempotency_cache, totals_cache)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    idempotency_cache: TtlCache<StoredResponse>,
    totals_cache: TtlCache<CampaignTotals>,
) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let srv = HttpServer::new(move || {
        let flow_api = PledgeFlowApi::new(db.clone());
        let gate = IdempotencyGate::new(db.clone(), idempotency_cache.clone(), config.idempotency.retention);
        let totals_api = TotalsApi::new(db.clone(), totals_cache.clone());
        let api_scope = web::scope("/api")
            .route("/pledges", web::post().to(create_pledge::<SqliteDatabase>))
            .route("/pledges/{pledge_id}", web::get().to(get_pledge::<SqliteDatabase>))
            .route("/payments/intent", web::post().to(create_payment_intent::<SqliteDatabase>))
            .route("/payments/webhook", web::post().to(payment_webhook::<SqliteDatabase>))
            .route("/payments/{reference}/status", web::get().to(payment_status::<SqliteDatabase>))
            .route("/totals/{campaign_id}", web::get().to(campaign_totals::<SqliteDatabase>))
            .route("/totals/{campaign_id}/refresh", web::post().to(refresh_totals));
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("ppg::access_log"))
            .app_data(web::Data::new(flow_api))
            .app_data(web::Data::new(gate))
            .app_data(web::Data::new(totals_api))
            .service(health)
            .service(api_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}
