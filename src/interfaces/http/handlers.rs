use super::models::{
    DraftRequest, DraftResponse, ListQuery, OrderUpdate, OrderView, PayloadRequest, PayloadResponse,
};
use super::{ApiError, ApiResult, ApiState};
use crate::application::seed::{seal_credentials, seed_patch};
use crate::domain::catalog::{MAX_TEST_COUNT, PayoutTier};
use crate::domain::order::{
    Identity, OrderDraft, OrderFilter, OrderId, OrderStatus, Origin, generate_token,
};
use crate::domain::workflow::StepContext;
use crate::interfaces::payload::signature::sha256_hex;
use crate::interfaces::payload::{
    DecodedFields, Grammar, build_payload_hash, decode_resolving, is_reference_token,
};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

const PAYLOAD_MAX_LEN: usize = 4096;
const TOKEN_MAX_LEN: usize = 128;
const DEFAULT_LIST_LIMIT: usize = 200;

fn is_email(raw: &str) -> bool {
    let Some((local, domain)) = raw.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !raw.chars().any(char::is_whitespace)
}

fn requester_identity(request: &DraftRequest) -> ApiResult<Identity> {
    let email = request
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty());
    if let Some(email) = email
        && !is_email(email)
    {
        return Err(ApiError::bad_request("invalid_email", "email is not valid"));
    }
    match (request.chat_user_id, email) {
        (Some(id), email) => {
            let mut identity = Identity::chat(id, request.username.clone());
            identity.email = email.map(str::to_lowercase);
            Ok(identity)
        }
        (None, Some(email)) => Ok(Identity::email(email)),
        (None, None) => Err(ApiError::bad_request(
            "identity_required",
            "email or chatUserId is required",
        )),
    }
}

fn overlay(fields: &mut DecodedFields, request: &DraftRequest) -> ApiResult<()> {
    if let Some(tests) = request.tests {
        if !(1..=MAX_TEST_COUNT).contains(&tests) {
            return Err(ApiError::bad_request(
                "invalid_tests",
                format!("tests must be between 1 and {}", MAX_TEST_COUNT),
            ));
        }
        fields.test_count = Some(tests);
    }
    if let Some(raw) = request.payout.as_deref() {
        fields.payout = Some(
            PayoutTier::from_key(raw)
                .ok_or_else(|| ApiError::bad_request("invalid_payout", "unknown payout option"))?,
        );
    }
    let texts = [
        (&mut fields.geo, &request.geo),
        (&mut fields.payment_method, &request.payment_method),
        (&mut fields.comments, &request.comments),
        (&mut fields.site_url, &request.site_url),
        (&mut fields.login, &request.login),
        (&mut fields.password, &request.password),
    ];
    for (field, value) in texts {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            *field = Some(value.to_string());
        }
    }
    Ok(())
}

/// `POST /api/drafts`: creates or updates the active draft of an identity.
///
/// A request whose payload hash matches an already submitted order of the same
/// identity returns that order instead of writing anything.
pub async fn create_draft(
    State(state): State<ApiState>,
    Json(request): Json<DraftRequest>,
) -> ApiResult<(StatusCode, Json<DraftResponse>)> {
    let identity = requester_identity(&request)?;
    let key = identity
        .key()
        .ok_or_else(|| ApiError::bad_request("identity_required", "identity is empty"))?;
    let intake = &state.settings.intake;

    let payload = request
        .payload
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let mut fields = match payload {
        Some(raw) => {
            decode_resolving(raw, intake.signing_secret.as_deref(), &*state.references).await?
        }
        None => DecodedFields::empty(Grammar::Envelope),
    };
    overlay(&mut fields, &request)?;

    let payload_hash = request.payload_hash.clone().or_else(|| {
        payload.map(|raw| match fields.fingerprint.as_deref() {
            Some(fingerprint) => build_payload_hash(fingerprint, &key),
            None => sha256_hex(raw),
        })
    });
    if let Some(hash) = payload_hash.as_deref()
        && let Some(existing) = state.orders.find_by_payload_hash(&key, hash).await?
    {
        info!(order_id = existing.id, identity = %key, "draft request matches a submitted order");
        return Ok((
            StatusCode::OK,
            Json(DraftResponse {
                order: OrderView::new(existing, &*state.cipher),
                duplicate: true,
            }),
        ));
    }

    let ctx = StepContext {
        geo_whitelist: &intake.geo_whitelist,
        catalog: &intake.catalog,
    };
    let mut patch = seed_patch(&fields, &ctx);
    patch.payload_hash = payload_hash;
    patch.payment_network = Some(intake.payment_network.clone());
    patch.payment_wallet.clone_from(&intake.wallet);
    seal_credentials(&mut patch, &*state.cipher)?;

    let order = state
        .orders
        .upsert_draft(
            OrderDraft {
                identity,
                origin: Origin::WebConfigurator,
                patch,
            },
            &key,
        )
        .await?;
    info!(order_id = order.id, identity = %key, "draft saved from the web");
    Ok((
        StatusCode::CREATED,
        Json(DraftResponse {
            order: OrderView::new(order, &*state.cipher),
            duplicate: false,
        }),
    ))
}

pub async fn get_draft(
    State(state): State<ApiState>,
    Path(token): Path<String>,
) -> ApiResult<Json<OrderView>> {
    let token = token
        .strip_prefix(crate::domain::order::RESUME_PREFIX)
        .unwrap_or(&token);
    let order = state
        .orders
        .find_by_resume_token(token)
        .await?
        .ok_or_else(|| ApiError::not_found("no order for this resumption token"))?;
    Ok(Json(OrderView::new(order, &*state.cipher)))
}

fn parse_status(raw: &str) -> ApiResult<OrderStatus> {
    OrderStatus::parse(raw)
        .ok_or_else(|| ApiError::bad_request("invalid_status", format!("unknown status {}", raw)))
}

pub async fn list_orders(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_status(raw)?),
        None => None,
    };
    let filter = OrderFilter {
        status,
        identity: None,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
    };
    let orders: Vec<OrderView> = state
        .orders
        .list(&filter)
        .await?
        .into_iter()
        .map(|order| OrderView::new(order, &*state.cipher))
        .collect();
    Ok(Json(json!({ "orders": orders })))
}

pub async fn get_order(
    State(state): State<ApiState>,
    Path(id): Path<OrderId>,
) -> ApiResult<Json<OrderView>> {
    let order = state.orders.get(id).await?;
    Ok(Json(OrderView::new(order, &*state.cipher)))
}

/// `PATCH /api/orders/:id`: operator status change and claimed txid.
pub async fn update_order(
    State(state): State<ApiState>,
    Path(id): Path<OrderId>,
    Json(update): Json<OrderUpdate>,
) -> ApiResult<Response> {
    let status = match update.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_status(raw)?),
        None => None,
    };
    if status.is_none() && update.payment_txid.is_none() {
        return Ok(Json(json!({ "updated": false })).into_response());
    }

    let mut order = state.orders.get(id).await?;
    if let Some(txid) = update.payment_txid {
        order = state.orders.set_payment_txid(id, txid).await?;
    }
    if let Some(status) = status {
        order = state.orders.set_status(id, status).await?;
        info!(order_id = id, status = %status, "order status changed by operator");
    }
    Ok(Json(OrderView::new(order, &*state.cipher)).into_response())
}

pub async fn stats(State(state): State<ApiState>) -> ApiResult<Json<serde_json::Value>> {
    let counts = state.orders.status_counts().await?;
    let stats: BTreeMap<&'static str, u64> = OrderStatus::ALL
        .iter()
        .map(|status| (status.as_str(), counts.get(status).copied().unwrap_or(0)))
        .collect();
    Ok(Json(json!({ "stats": stats })))
}

/// `POST /api/payloads`: stores a long payload behind a short `calc_ref_` token.
pub async fn create_payload(
    State(state): State<ApiState>,
    Json(request): Json<PayloadRequest>,
) -> ApiResult<Json<PayloadResponse>> {
    let payload = request.payload.trim();
    if payload.is_empty() {
        return Err(ApiError::bad_request("payload_required", "payload is required"));
    }
    if payload.len() > PAYLOAD_MAX_LEN {
        return Err(ApiError::bad_request(
            "payload_too_large",
            format!("payload exceeds {} bytes", PAYLOAD_MAX_LEN),
        ));
    }
    let token = match request.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => token.to_string(),
        None => generate_token(),
    };
    if token.len() > TOKEN_MAX_LEN {
        return Err(ApiError::bad_request(
            "token_too_long",
            format!("token exceeds {} characters", TOKEN_MAX_LEN),
        ));
    }
    if !is_reference_token(&token) {
        return Err(ApiError::bad_request(
            "invalid_token",
            "token may only contain letters, digits, '-' and '_'",
        ));
    }

    state.references.save(&token, payload).await?;
    let removed = state
        .references
        .cleanup(state.settings.payload_retention)
        .await?;
    debug!(removed, "expired payload references removed");
    Ok(Json(PayloadResponse { token }))
}

pub async fn delete_payload(
    State(state): State<ApiState>,
    Path(token): Path<String>,
) -> ApiResult<StatusCode> {
    if state.references.delete(&token).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("no payload for this token"))
    }
}
