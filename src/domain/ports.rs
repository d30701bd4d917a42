use super::catalog::Money;
use super::order::{
    Identity, IdentityKey, Order, OrderDraft, OrderFilter, OrderId, OrderPatch, OrderStatus, PaymentProof,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Durable order records with identity-scoped draft lookup.
///
/// Every mutating call is a single atomic record write. Lookups of unknown ids
/// return `IntakeError::NotFound`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, id: OrderId) -> Result<Order>;
    /// Most recently updated draft / in-progress order of the identity.
    async fn find_active(&self, key: &IdentityKey) -> Result<Option<Order>>;
    /// Merges into the active order of the identity, or inserts a new draft.
    async fn upsert_draft(&self, candidate: OrderDraft, key: &IdentityKey) -> Result<Order>;
    /// Applies a chat-collected patch and moves `draft → in_progress`.
    async fn advance_from_chat(&self, id: OrderId, patch: OrderPatch) -> Result<Order>;
    /// Idempotent: an already submitted order is returned unchanged.
    async fn submit(&self, id: OrderId, price: Money) -> Result<Order>;
    /// Only active orders are cancelled; anything else is returned unchanged.
    async fn cancel(&self, id: OrderId) -> Result<Order>;
    /// Most recent submitted (not cancelled) order of the identity with this hash.
    async fn find_by_payload_hash(&self, key: &IdentityKey, hash: &str) -> Result<Option<Order>>;
    async fn find_by_resume_token(&self, token: &str) -> Result<Option<Order>>;
    /// Merges `identity` into the order, binding a link opened on another surface.
    async fn claim(&self, id: OrderId, identity: Identity) -> Result<Order>;
    /// Stores the proof and moves `awaiting_payment → proof_received`.
    async fn record_proof(&self, id: OrderId, proof: PaymentProof) -> Result<Order>;
    /// Operator-driven lifecycle change, validated against the state machine.
    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<Order>;
    async fn set_payment_txid(&self, id: OrderId, txid: String) -> Result<Order>;
    async fn latest_for(&self, key: &IdentityKey) -> Result<Option<Order>>;
    /// Newest first.
    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>>;
    async fn status_counts(&self) -> Result<BTreeMap<OrderStatus, u64>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadReference {
    pub token: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Short tokens standing in for payloads too long for a start parameter.
#[async_trait]
pub trait PayloadReferenceStore: Send + Sync {
    async fn save(&self, token: &str, payload: &str) -> Result<()>;
    async fn get(&self, token: &str) -> Result<Option<PayloadReference>>;
    async fn delete(&self, token: &str) -> Result<bool>;
    /// Drops references older than `max_age`, returning how many were removed.
    async fn cleanup(&self, max_age: Duration) -> Result<usize>;
}

/// Best-effort messages to operator identities.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, operator_id: i64, text: &str) -> Result<()>;
}

/// Encryption-at-rest capability for credential fields.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plain: &str) -> Result<String>;
    fn decrypt(&self, token: &str) -> Result<String>;
}

pub type OrderStoreBox = Box<dyn OrderStore>;
pub type PayloadReferenceStoreBox = Box<dyn PayloadReferenceStore>;
pub type NotifierBox = Box<dyn Notifier>;
pub type CredentialCipherBox = Box<dyn CredentialCipher>;
