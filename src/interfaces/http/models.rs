use crate::domain::catalog::Money;
use crate::domain::order::{Order, OrderId, OrderStatus, Origin, Slot};
use crate::domain::ports::CredentialCipher;
use crate::domain::workflow::{Step, first_unsatisfied};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// `POST /api/drafts` body. Explicit fields override whatever `payload` carries.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRequest {
    pub email: Option<String>,
    pub chat_user_id: Option<i64>,
    pub username: Option<String>,
    pub payload: Option<String>,
    pub payload_hash: Option<String>,
    pub geo: Option<String>,
    pub tests: Option<u32>,
    pub payment_method: Option<String>,
    /// Payout key (`withdraw`) or code (`W`).
    pub payout: Option<String>,
    pub comments: Option<String>,
    pub site_url: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftResponse {
    pub order: OrderView,
    /// True when an already submitted order with the same payload hash was returned.
    pub duplicate: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub status: Option<String>,
    pub payment_txid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayloadRequest {
    #[serde(default)]
    pub payload: String,
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PayloadResponse {
    pub token: String,
}

/// An order as the dashboard sees it, credentials decrypted.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: OrderId,
    pub status: OrderStatus,
    pub origin: Origin,
    pub chat_user_id: Option<i64>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub geo: Option<String>,
    pub payment_method: Option<String>,
    pub tests_count: Option<u32>,
    pub payout_option: Option<&'static str>,
    pub withdraw_required: bool,
    pub kyc_required: bool,
    pub custom_test_required: bool,
    pub package_type: Option<String>,
    pub comments: Option<String>,
    pub site_url: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub price_eur: Option<Money>,
    pub payment_network: Option<String>,
    pub payment_wallet: Option<String>,
    pub payment_txid: Option<String>,
    pub proof_ref: Option<String>,
    pub payload_hash: Option<String>,
    pub resume_link: String,
    /// Next question the chat would ask; only for orders still collecting fields.
    pub next_step: Option<Step>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn reveal(slot: &Slot<String>, cipher: &dyn CredentialCipher) -> Option<String> {
    let sealed = slot.as_option()?;
    match cipher.decrypt(sealed) {
        Ok(plain) => Some(plain),
        Err(e) => {
            warn!(error = %e, "stored credential could not be decrypted");
            None
        }
    }
}

impl OrderView {
    pub fn new(order: Order, cipher: &dyn CredentialCipher) -> Self {
        let next_step = order
            .status
            .is_active()
            .then(|| first_unsatisfied(&order));
        Self {
            id: order.id,
            status: order.status,
            origin: order.origin,
            login: reveal(&order.login, cipher),
            password: reveal(&order.password, cipher),
            chat_user_id: order.identity.chat_user_id,
            email: order.identity.email,
            username: order.identity.username,
            geo: order.geo,
            payment_method: order.payment_method,
            tests_count: order.test_count,
            payout_option: order.payout.map(|p| p.key()),
            withdraw_required: order.withdraw_required,
            kyc_required: order.kyc_required,
            custom_test_required: order.custom_test_required,
            package_type: order.package_type,
            comments: order.comments.as_option().cloned(),
            site_url: order.site_url.as_option().cloned(),
            price_eur: order.price,
            payment_network: order.payment.network,
            payment_wallet: order.payment.wallet,
            payment_txid: order.payment.txid,
            proof_ref: order.payment.proof_ref,
            payload_hash: order.payload_hash,
            resume_link: format!("{}{}", crate::domain::order::RESUME_PREFIX, order.resume_token),
            next_step,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}
