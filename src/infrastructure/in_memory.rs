use crate::domain::catalog::Money;
use crate::domain::order::{
    Identity, IdentityKey, Order, OrderDraft, OrderFilter, OrderId, OrderPatch, OrderStatus, PaymentProof,
    generate_token,
};
use crate::domain::ports::{OrderStore, PayloadReference, PayloadReferenceStore};
use crate::error::{IntakeError, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct OrderTable {
    orders: BTreeMap<OrderId, Order>,
    last_id: OrderId,
}

impl OrderTable {
    fn get_mut(&mut self, id: OrderId) -> Result<&mut Order> {
        self.orders
            .get_mut(&id)
            .ok_or_else(|| IntakeError::NotFound(format!("order #{}", id)))
    }

    fn fresh_token(&self) -> String {
        loop {
            let token = generate_token();
            if !self.orders.values().any(|o| o.resume_token == token) {
                return token;
            }
        }
    }
}

/// A thread-safe in-memory order store.
///
/// Uses `Arc<RwLock<…>>` so clones share the same table. Each operation holds the
/// write lock for the whole read-modify-write, which makes every mutation atomic.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    table: Arc<RwLock<OrderTable>>,
}

impl InMemoryOrderStore {
    /// Creates a new, empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(a: &Order, b: &Order) -> std::cmp::Ordering {
    b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id))
}

fn latest<'a>(orders: impl Iterator<Item = &'a Order>) -> Option<Order> {
    orders.min_by(|a, b| newest_first(a, b)).cloned()
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get(&self, id: OrderId) -> Result<Order> {
        let table = self.table.read().await;
        table
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| IntakeError::NotFound(format!("order #{}", id)))
    }

    async fn find_active(&self, key: &IdentityKey) -> Result<Option<Order>> {
        let table = self.table.read().await;
        Ok(latest(
            table
                .orders
                .values()
                .filter(|o| o.status.is_active() && o.identity.matches(key)),
        ))
    }

    async fn upsert_draft(&self, candidate: OrderDraft, key: &IdentityKey) -> Result<Order> {
        let mut table = self.table.write().await;
        let now = Utc::now();
        let active_id = latest(
            table
                .orders
                .values()
                .filter(|o| o.status.is_active() && o.identity.matches(key)),
        )
        .map(|o| o.id);

        if let Some(id) = active_id {
            let order = table.get_mut(id)?;
            let mut updated = order.clone();
            updated.apply(&candidate.patch, now)?;
            updated.identity.merge(&candidate.identity);
            *order = updated.clone();
            return Ok(updated);
        }

        let token = table.fresh_token();
        let id = table.last_id + 1;
        let order = Order::new_draft(id, token, &candidate, now)?;
        table.last_id = id;
        table.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn advance_from_chat(&self, id: OrderId, patch: OrderPatch) -> Result<Order> {
        let mut table = self.table.write().await;
        let order = table.get_mut(id)?;
        let mut updated = order.clone();
        updated.advance(&patch, Utc::now())?;
        *order = updated.clone();
        Ok(updated)
    }

    async fn submit(&self, id: OrderId, price: Money) -> Result<Order> {
        let mut table = self.table.write().await;
        let order = table.get_mut(id)?;
        let mut updated = order.clone();
        if updated.submit(price, Utc::now())? {
            *order = updated.clone();
        }
        Ok(updated)
    }

    async fn cancel(&self, id: OrderId) -> Result<Order> {
        let mut table = self.table.write().await;
        let order = table.get_mut(id)?;
        order.cancel(Utc::now());
        Ok(order.clone())
    }

    async fn find_by_payload_hash(&self, key: &IdentityKey, hash: &str) -> Result<Option<Order>> {
        let table = self.table.read().await;
        Ok(latest(table.orders.values().filter(|o| {
            o.status.is_submitted()
                && o.identity.matches(key)
                && o.payload_hash.as_deref() == Some(hash)
        })))
    }

    async fn find_by_resume_token(&self, token: &str) -> Result<Option<Order>> {
        let table = self.table.read().await;
        Ok(table
            .orders
            .values()
            .find(|o| o.resume_token == token)
            .cloned())
    }

    async fn claim(&self, id: OrderId, identity: Identity) -> Result<Order> {
        let mut table = self.table.write().await;
        let order = table.get_mut(id)?;
        order.identity.merge(&identity);
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn record_proof(&self, id: OrderId, proof: PaymentProof) -> Result<Order> {
        let mut table = self.table.write().await;
        let order = table.get_mut(id)?;
        let mut updated = order.clone();
        updated.record_proof(proof, Utc::now())?;
        *order = updated.clone();
        Ok(updated)
    }

    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<Order> {
        let mut table = self.table.write().await;
        let order = table.get_mut(id)?;
        let mut updated = order.clone();
        updated.operator_transition(status, Utc::now())?;
        *order = updated.clone();
        Ok(updated)
    }

    async fn set_payment_txid(&self, id: OrderId, txid: String) -> Result<Order> {
        let mut table = self.table.write().await;
        let order = table.get_mut(id)?;
        order.payment.txid = Some(txid);
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn latest_for(&self, key: &IdentityKey) -> Result<Option<Order>> {
        let table = self.table.read().await;
        Ok(latest(
            table.orders.values().filter(|o| o.identity.matches(key)),
        ))
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let table = self.table.read().await;
        let mut orders: Vec<Order> = table
            .orders
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        orders.sort_by(newest_first);
        if let Some(limit) = filter.limit {
            orders.truncate(limit);
        }
        Ok(orders)
    }

    async fn status_counts(&self) -> Result<BTreeMap<OrderStatus, u64>> {
        let table = self.table.read().await;
        let mut counts = BTreeMap::new();
        for order in table.orders.values() {
            *counts.entry(order.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// A thread-safe in-memory store for payload references.
#[derive(Default, Clone)]
pub struct InMemoryPayloadReferenceStore {
    references: Arc<RwLock<HashMap<String, PayloadReference>>>,
}

impl InMemoryPayloadReferenceStore {
    /// Creates a new, empty in-memory payload reference store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayloadReferenceStore for InMemoryPayloadReferenceStore {
    async fn save(&self, token: &str, payload: &str) -> Result<()> {
        let mut references = self.references.write().await;
        references.insert(
            token.to_string(),
            PayloadReference {
                token: token.to_string(),
                payload: payload.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<PayloadReference>> {
        let references = self.references.read().await;
        Ok(references.get(token).cloned())
    }

    async fn delete(&self, token: &str) -> Result<bool> {
        let mut references = self.references.write().await;
        Ok(references.remove(token).is_some())
    }

    async fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let mut references = self.references.write().await;
        let cutoff = Utc::now() - max_age;
        let before = references.len();
        references.retain(|_, r| r.created_at >= cutoff);
        Ok(before - references.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::PayoutTier;
    use crate::domain::order::{Origin, Slot};

    fn chat_draft(user: i64, patch: OrderPatch) -> OrderDraft {
        OrderDraft {
            identity: Identity::chat(user, None),
            origin: Origin::Chat,
            patch,
        }
    }

    #[tokio::test]
    async fn test_upsert_merges_into_active_draft() {
        let store = InMemoryOrderStore::new();
        let key = IdentityKey::Chat(1);

        let first = store
            .upsert_draft(
                chat_draft(
                    1,
                    OrderPatch {
                        geo: Some("IN".into()),
                        test_count: Some(2),
                        ..Default::default()
                    },
                ),
                &key,
            )
            .await
            .unwrap();
        let second = store
            .upsert_draft(
                chat_draft(
                    1,
                    OrderPatch {
                        test_count: Some(5),
                        comments: Slot::Set("hi".into()),
                        ..Default::default()
                    },
                ),
                &key,
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.resume_token, second.resume_token);
        assert_eq!(second.geo.as_deref(), Some("IN"));
        assert_eq!(second.test_count, Some(5));
        assert_eq!(store.list(&OrderFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_after_submit_creates_new_draft() {
        let store = InMemoryOrderStore::new();
        let key = IdentityKey::Chat(1);
        let first = store
            .upsert_draft(chat_draft(1, OrderPatch::default()), &key)
            .await
            .unwrap();
        store.submit(first.id, Money::from_eur(85)).await.unwrap();

        let second = store
            .upsert_draft(chat_draft(1, OrderPatch::default()), &key)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_ne!(first.resume_token, second.resume_token);
        assert_eq!(store.find_active(&key).await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_submit_twice_returns_same_total() {
        let store = InMemoryOrderStore::new();
        let key = IdentityKey::Chat(3);
        let order = store
            .upsert_draft(chat_draft(3, OrderPatch::default()), &key)
            .await
            .unwrap();

        let a = store.submit(order.id, Money::from_eur(265)).await.unwrap();
        let b = store.submit(order.id, Money::from_eur(999)).await.unwrap();
        assert_eq!(a.price, b.price);
        assert_eq!(b.status, OrderStatus::AwaitingPayment);
        assert_eq!(store.list(&OrderFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_only_affects_active_orders() {
        let store = InMemoryOrderStore::new();
        let key = IdentityKey::Chat(4);
        let order = store
            .upsert_draft(chat_draft(4, OrderPatch::default()), &key)
            .await
            .unwrap();
        store.submit(order.id, Money::from_eur(85)).await.unwrap();

        let after = store.cancel(order.id).await.unwrap();
        assert_eq!(after.status, OrderStatus::AwaitingPayment);

        let other = store
            .upsert_draft(chat_draft(4, OrderPatch::default()), &key)
            .await
            .unwrap();
        let cancelled = store.cancel(other.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(store.find_active(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let store = InMemoryOrderStore::new();
        assert!(matches!(store.get(42).await, Err(IntakeError::NotFound(_))));
        assert!(matches!(
            store.cancel(42).await,
            Err(IntakeError::NotFound(_))
        ));
        assert!(store.find_by_resume_token("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_payload_hash_ignores_drafts_and_other_identities() {
        let store = InMemoryOrderStore::new();
        let key = IdentityKey::Chat(5);
        let patch = OrderPatch {
            payload_hash: Some("h1".into()),
            payout: Some(PayoutTier::None),
            ..Default::default()
        };
        let order = store
            .upsert_draft(chat_draft(5, patch), &key)
            .await
            .unwrap();
        assert!(store.find_by_payload_hash(&key, "h1").await.unwrap().is_none());

        store.submit(order.id, Money::from_eur(85)).await.unwrap();
        let found = store.find_by_payload_hash(&key, "h1").await.unwrap();
        assert_eq!(found.map(|o| o.id), Some(order.id));
        assert!(
            store
                .find_by_payload_hash(&IdentityKey::Chat(6), "h1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_status_counts_and_operator_transitions() {
        let store = InMemoryOrderStore::new();
        let key = IdentityKey::email("a@b.co");
        let draft = OrderDraft {
            identity: Identity::email("a@b.co"),
            origin: Origin::WebConfigurator,
            patch: OrderPatch::default(),
        };
        let order = store.upsert_draft(draft, &key).await.unwrap();
        assert!(matches!(
            store.set_status(order.id, OrderStatus::Completed).await,
            Err(IntakeError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.set_status(order.id, OrderStatus::AwaitingPayment).await,
            Err(IntakeError::InvalidTransition { .. })
        ));
        assert_eq!(store.get(order.id).await.unwrap().price, None);
        store.submit(order.id, Money::from_eur(85)).await.unwrap();
        store.set_status(order.id, OrderStatus::Paid).await.unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.get(&OrderStatus::Paid), Some(&1));
        assert_eq!(counts.get(&OrderStatus::Draft), None);
    }

    #[tokio::test]
    async fn test_payload_reference_store() {
        let store = InMemoryPayloadReferenceStore::new();
        store.save("abcd1234", "calc_v1_geoIN_tests1_payoutN").await.unwrap();

        let found = store.get("abcd1234").await.unwrap().unwrap();
        assert_eq!(found.payload, "calc_v1_geoIN_tests1_payoutN");
        assert_eq!(store.cleanup(Duration::hours(72)).await.unwrap(), 0);
        assert_eq!(store.cleanup(Duration::seconds(-1)).await.unwrap(), 1);
        assert!(store.get("abcd1234").await.unwrap().is_none());
        assert!(!store.delete("abcd1234").await.unwrap());
    }
}
