//! Request handler definitions
//!
//! Define each route and its handler here. Handlers that are more than a line or two MUST go into a separate
//! function. Keep this module neat and tidy 🙏
//!
//! Handlers are generic over the backend trait so the endpoint tests can run them against whatever backend the test
//! environment provides; the server assembly in [`crate::server`] instantiates them for [`SqliteDatabase`].
use actix_web::{get, http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use log::*;
use pledge_payment_engine::{
    db_types::{NewPledge, PaymentStatus, PledgeId},
    IdempotencyGate,
    PaymentGatewayError,
    PledgeFlowApi,
    PledgeGatewayDatabase,
    SqliteDatabase,
    TotalsApi,
    TotalsReporting,
};
use ppg_common::Money;
use rand::Rng;
use serde::Deserialize;

use crate::{
    data_objects::{
        payment_not_found_response,
        stored_response_for,
        JsonResponse,
        NewPledgeRequest,
        PaymentIntentRequest,
        TotalsResponse,
        WebhookEventRequest,
    },
    errors::ServerError,
};

/// Marks replayed idempotent responses. The body is always the stored original, verbatim.
pub const IDEMPOTENT_REPLAY_HEADER: &str = "x-idempotent-replay";

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

//-------------------------------------------------  Pledges  ---------------------------------------------------------

/// `POST /api/pledges`. The pledge row and its `PledgeCreated` outbox event are committed atomically.
pub async fn create_pledge<B: PledgeGatewayDatabase>(
    body: web::Json<NewPledgeRequest>,
    api: web::Data<PledgeFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    if request.amount <= 0 {
        return Err(ServerError::InvalidRequestBody("Pledge amount must be positive".to_string()));
    }
    let pledge_id = PledgeId::from(request.pledge_id.unwrap_or_else(new_pledge_id));
    let mut pledge =
        NewPledge::new(pledge_id, request.campaign_id, request.donor_email, Money::from(request.amount));
    if let Some(currency) = request.currency {
        pledge = pledge.with_currency(currency);
    }
    let (pledge, created) = api.submit_pledge(pledge).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok(HttpResponse::build(status).json(pledge))
}

/// `GET /api/pledges/{pledge_id}`.
pub async fn get_pledge<B: PledgeGatewayDatabase>(
    path: web::Path<String>,
    api: web::Data<PledgeFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let pledge_id = PledgeId::from(path.into_inner());
    match api.pledge(&pledge_id).await? {
        Some(pledge) => Ok(HttpResponse::Ok().json(pledge)),
        None => Err(ServerError::NoRecordFound(format!("Pledge {pledge_id}"))),
    }
}

//-------------------------------------------------  Payments  --------------------------------------------------------

/// `POST /api/payments/intent`.
pub async fn create_payment_intent<B: PledgeGatewayDatabase>(
    body: web::Json<PaymentIntentRequest>,
    api: web::Data<PledgeFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let pledge_id = PledgeId::from(body.into_inner().pledge_id);
    let payment = api.create_payment_intent(&pledge_id).await?;
    Ok(HttpResponse::Created().json(payment))
}

/// `GET /api/payments/{reference}/status`. Includes the audit trail.
pub async fn payment_status<B: PledgeGatewayDatabase>(
    path: web::Path<String>,
    api: web::Data<PledgeFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let reference = path.into_inner();
    let (payment, history) = api.payment_status(&reference).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "payment": payment, "history": history })))
}

/// `POST /api/payments/webhook`. The only path into the payment state machine for gateway events, and it runs
/// entirely behind the idempotency gate: the key is the `X-Idempotency-Key` header when present, otherwise a hash
/// of the exact body bytes, and retried deliveries replay the stored response without touching the machine again.
pub async fn payment_webhook<B: PledgeGatewayDatabase>(
    req: HttpRequest,
    body: web::Bytes,
    api: web::Data<PledgeFlowApi<B>>,
    gate: web::Data<IdempotencyGate<B>>,
) -> Result<HttpResponse, ServerError> {
    let key = req
        .headers()
        .get("X-Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| pledge_payment_engine::derive_idempotency_key(&body));
    let event: WebhookEventRequest =
        serde_json::from_slice(&body).map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
    // Reject unknown statuses at the boundary, before the gate burns the key.
    let new_status = event
        .status
        .parse::<PaymentStatus>()
        .map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
    trace!("🪝️ Webhook {} for payment [{}] with key {key}", event.event_type, event.external_reference);

    let flow = api.clone();
    let event_id = key.clone();
    let (stored, was_duplicate) = gate
        .admit(&key, move || async move {
            let outcome = flow
                .process_payment_event(&event.external_reference, new_status, event.timestamp, &event_id)
                .await;
            match outcome {
                Ok(outcome) => Ok(stored_response_for(&outcome)),
                // A webhook for a payment we do not know is a well-defined, cacheable outcome: a retry within the
                // key's lifetime replays the 404 instead of reprocessing.
                Err(PaymentGatewayError::PaymentNotFound(reference)) => {
                    warn!("🪝️ Webhook for unknown payment [{reference}]");
                    Ok(payment_not_found_response(&reference))
                },
                Err(e) => Err(e),
            }
        })
        .await?;

    if was_duplicate {
        debug!("🪝️ Duplicate webhook delivery for key {key}; replaying the stored response");
    }
    let status = StatusCode::from_u16(stored.status)
        .map_err(|e| ServerError::Unspecified(format!("Invalid stored status code: {e}")))?;
    let mut response = HttpResponse::build(status);
    response.content_type("application/json");
    if was_duplicate {
        response.insert_header((IDEMPOTENT_REPLAY_HEADER, "true"));
    }
    Ok(response.body(stored.body))
}

//-------------------------------------------------  Totals  ----------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TotalsQuery {
    #[serde(default)]
    pub realtime: bool,
}

/// `GET /api/totals/{campaign_id}?realtime=bool`. The default path is eventually consistent (cache → snapshot →
/// base); `realtime=true` bypasses every tier.
pub async fn campaign_totals<B: TotalsReporting>(
    path: web::Path<String>,
    query: web::Query<TotalsQuery>,
    api: web::Data<TotalsApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let campaign_id = path.into_inner();
    let result = api.campaign_totals(&campaign_id, query.realtime).await?;
    Ok(HttpResponse::Ok().json(TotalsResponse::from(result)))
}

/// `POST /api/totals/{campaign_id}/refresh`. Schedules an asynchronous snapshot rebuild.
pub async fn refresh_totals(
    path: web::Path<String>,
    api: web::Data<TotalsApi<SqliteDatabase>>,
) -> Result<HttpResponse, ServerError> {
    let campaign_id = path.into_inner();
    let api = api.get_ref().clone();
    tokio::spawn(async move {
        if let Err(e) = api.refresh_snapshot(&campaign_id).await {
            error!("📊️ Scheduled snapshot refresh for campaign {campaign_id} failed. {e}");
        }
    });
    Ok(HttpResponse::Accepted().json(JsonResponse::success("Snapshot refresh scheduled")))
}

/// An opaque pledge identifier for clients that did not supply one.
fn new_pledge_id() -> String {
    format!("pl_{:016x}{:08x}", rand::thread_rng().gen::<u64>(), rand::thread_rng().gen::<u32>())
}
