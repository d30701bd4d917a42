use crate::domain::catalog::Money;
use crate::domain::order::{
    Identity, IdentityKey, Order, OrderDraft, OrderFilter, OrderId, OrderPatch, OrderStatus, PaymentProof,
    generate_token,
};
use crate::domain::ports::{OrderStore, PayloadReference, PayloadReferenceStore};
use crate::error::{IntakeError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for order records, keyed by big-endian order id.
pub const CF_ORDERS: &str = "orders";
/// Column Family for payload references, keyed by token.
pub const CF_PAYLOAD_REFS: &str = "payload_refs";
/// Column Family for counters.
pub const CF_META: &str = "meta";

const LAST_ID_KEY: &[u8] = b"last_order_id";

#[derive(Serialize, Deserialize)]
struct StoredReference {
    payload: String,
    created_at: DateTime<Utc>,
}

/// A persistent store implementation using RocksDB.
///
/// Orders and payload references live in separate Column Families. Every
/// read-modify-write goes through `write_lock`, so concurrent callers never
/// interleave between reading a record and writing it back.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_ORDERS, CF_PAYLOAD_REFS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            IntakeError::Internal(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn load(&self, id: OrderId) -> Result<Option<Order>> {
        let cf = self.cf(CF_ORDERS)?;
        match self.db.get_cf(cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_existing(&self, id: OrderId) -> Result<Order> {
        self.load(id)?
            .ok_or_else(|| IntakeError::NotFound(format!("order #{}", id)))
    }

    fn save(&self, order: &Order) -> Result<()> {
        let cf = self.cf(CF_ORDERS)?;
        self.db
            .put_cf(cf, order.id.to_be_bytes(), serde_json::to_vec(order)?)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Order>> {
        let cf = self.cf(CF_ORDERS)?;
        let mut orders = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            orders.push(serde_json::from_slice(&value)?);
        }
        Ok(orders)
    }

    /// The id the next draft takes. The counter itself is written together
    /// with that draft in [`RocksDBStore::insert`].
    fn next_id(&self) -> Result<OrderId> {
        let cf = self.cf(CF_META)?;
        let last = match self.db.get_cf(cf, LAST_ID_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    IntakeError::Internal(Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "corrupt order id counter",
                    )))
                })?;
                OrderId::from_be_bytes(raw)
            }
            None => 0,
        };
        Ok(last + 1)
    }

    fn insert(&self, order: &Order) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_META)?, LAST_ID_KEY, order.id.to_be_bytes());
        batch.put_cf(
            self.cf(CF_ORDERS)?,
            order.id.to_be_bytes(),
            serde_json::to_vec(order)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    fn latest_where(&self, predicate: impl Fn(&Order) -> bool) -> Result<Option<Order>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|o| predicate(o))
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id))))
    }

    async fn update(
        &self,
        id: OrderId,
        mutate: impl FnOnce(&mut Order) -> Result<bool> + Send,
    ) -> Result<Order> {
        let _guard = self.write_lock.lock().await;
        let mut order = self.load_existing(id)?;
        if mutate(&mut order)? {
            self.save(&order)?;
        }
        Ok(order)
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn get(&self, id: OrderId) -> Result<Order> {
        self.load_existing(id)
    }

    async fn find_active(&self, key: &IdentityKey) -> Result<Option<Order>> {
        self.latest_where(|o| o.status.is_active() && o.identity.matches(key))
    }

    async fn upsert_draft(&self, candidate: OrderDraft, key: &IdentityKey) -> Result<Order> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        if let Some(mut order) =
            self.latest_where(|o| o.status.is_active() && o.identity.matches(key))?
        {
            order.apply(&candidate.patch, now)?;
            order.identity.merge(&candidate.identity);
            self.save(&order)?;
            return Ok(order);
        }

        let existing = self.scan()?;
        let token = loop {
            let token = generate_token();
            if !existing.iter().any(|o| o.resume_token == token) {
                break token;
            }
        };
        let order = Order::new_draft(self.next_id()?, token, &candidate, now)?;
        self.insert(&order)?;
        Ok(order)
    }

    async fn advance_from_chat(&self, id: OrderId, patch: OrderPatch) -> Result<Order> {
        self.update(id, |order| {
            order.advance(&patch, Utc::now())?;
            Ok(true)
        })
        .await
    }

    async fn submit(&self, id: OrderId, price: Money) -> Result<Order> {
        self.update(id, |order| order.submit(price, Utc::now()))
            .await
    }

    async fn cancel(&self, id: OrderId) -> Result<Order> {
        self.update(id, |order| Ok(order.cancel(Utc::now()))).await
    }

    async fn find_by_payload_hash(&self, key: &IdentityKey, hash: &str) -> Result<Option<Order>> {
        self.latest_where(|o| {
            o.status.is_submitted()
                && o.identity.matches(key)
                && o.payload_hash.as_deref() == Some(hash)
        })
    }

    async fn find_by_resume_token(&self, token: &str) -> Result<Option<Order>> {
        Ok(self.scan()?.into_iter().find(|o| o.resume_token == token))
    }

    async fn claim(&self, id: OrderId, identity: Identity) -> Result<Order> {
        self.update(id, |order| {
            order.identity.merge(&identity);
            order.updated_at = Utc::now();
            Ok(true)
        })
        .await
    }

    async fn record_proof(&self, id: OrderId, proof: PaymentProof) -> Result<Order> {
        self.update(id, |order| {
            order.record_proof(proof, Utc::now())?;
            Ok(true)
        })
        .await
    }

    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<Order> {
        self.update(id, |order| {
            order.operator_transition(status, Utc::now())?;
            Ok(true)
        })
        .await
    }

    async fn set_payment_txid(&self, id: OrderId, txid: String) -> Result<Order> {
        self.update(id, |order| {
            order.payment.txid = Some(txid);
            order.updated_at = Utc::now();
            Ok(true)
        })
        .await
    }

    async fn latest_for(&self, key: &IdentityKey) -> Result<Option<Order>> {
        self.latest_where(|o| o.identity.matches(key))
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .scan()?
            .into_iter()
            .filter(|o| filter.matches(o))
            .collect();
        orders.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            orders.truncate(limit);
        }
        Ok(orders)
    }

    async fn status_counts(&self) -> Result<BTreeMap<OrderStatus, u64>> {
        let mut counts = BTreeMap::new();
        for order in self.scan()? {
            *counts.entry(order.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl PayloadReferenceStore for RocksDBStore {
    async fn save(&self, token: &str, payload: &str) -> Result<()> {
        let cf = self.cf(CF_PAYLOAD_REFS)?;
        let value = serde_json::to_vec(&StoredReference {
            payload: payload.to_string(),
            created_at: Utc::now(),
        })?;
        self.db.put_cf(cf, token.as_bytes(), value)?;
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<PayloadReference>> {
        let cf = self.cf(CF_PAYLOAD_REFS)?;
        match self.db.get_cf(cf, token.as_bytes())? {
            Some(bytes) => {
                let stored: StoredReference = serde_json::from_slice(&bytes)?;
                Ok(Some(PayloadReference {
                    token: token.to_string(),
                    payload: stored.payload,
                    created_at: stored.created_at,
                }))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, token: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_PAYLOAD_REFS)?;
        // Just check if the key exists without retrieving the value
        let existed = self.db.get_pinned_cf(cf, token.as_bytes())?.is_some();
        if existed {
            self.db.delete_cf(cf, token.as_bytes())?;
        }
        Ok(existed)
    }

    async fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_PAYLOAD_REFS)?;
        let cutoff = Utc::now() - max_age;

        let mut expired = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let stored: StoredReference = serde_json::from_slice(&value)?;
            if stored.created_at < cutoff {
                expired.push(key);
            }
        }
        for key in &expired {
            self.db.delete_cf(cf, key)?;
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{Origin, Slot};
    use tempfile::tempdir;

    fn draft(user: i64, patch: OrderPatch) -> OrderDraft {
        OrderDraft {
            identity: Identity::chat(user, Some("tester".into())),
            origin: Origin::Chat,
            patch,
        }
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_ORDERS).is_some());
        assert!(store.db.cf_handle(CF_PAYLOAD_REFS).is_some());
        assert!(store.db.cf_handle(CF_META).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_order_lifecycle() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let key = IdentityKey::Chat(9);

        let order = store
            .upsert_draft(
                draft(
                    9,
                    OrderPatch {
                        geo: Some("PK".into()),
                        ..Default::default()
                    },
                ),
                &key,
            )
            .await
            .unwrap();
        assert_eq!(order.id, 1);

        let order = store
            .advance_from_chat(
                order.id,
                OrderPatch {
                    comments: Slot::Skipped,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::InProgress);

        store.submit(order.id, Money::from_eur(85)).await.unwrap();
        let proof = store
            .record_proof(order.id, PaymentProof::Txid("abcdef".into()))
            .await
            .unwrap();
        assert_eq!(proof.status, OrderStatus::ProofReceived);

        let next = store
            .upsert_draft(draft(9, OrderPatch::default()), &key)
            .await
            .unwrap();
        assert_eq!(next.id, 2);
        assert_eq!(
            store
                .find_by_resume_token(&order.resume_token)
                .await
                .unwrap()
                .map(|o| o.id),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_rocksdb_rejected_draft_keeps_counter() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            let key = IdentityKey::Chat(3);
            let rejected = store
                .upsert_draft(
                    draft(
                        3,
                        OrderPatch {
                            geo: Some("ZZZ".into()),
                            ..Default::default()
                        },
                    ),
                    &key,
                )
                .await;
            assert!(matches!(rejected, Err(IntakeError::Validation(_))));
            assert!(store.scan().unwrap().is_empty());

            let order = store
                .upsert_draft(draft(3, OrderPatch::default()), &key)
                .await
                .unwrap();
            assert_eq!(order.id, 1);
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        let stored = store
            .db
            .get_cf(store.cf(CF_META).unwrap(), LAST_ID_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(stored, 1u64.to_be_bytes().to_vec());
        let next = store
            .upsert_draft(draft(4, OrderPatch::default()), &IdentityKey::Chat(4))
            .await
            .unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store
                .upsert_draft(draft(1, OrderPatch::default()), &IdentityKey::Chat(1))
                .await
                .unwrap();
            PayloadReferenceStore::save(&store, "tok12345", "o1_xyz")
                .await
                .unwrap();
        }
        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(OrderStore::get(&store, 1).await.unwrap().id, 1);
        let reference = PayloadReferenceStore::get(&store, "tok12345")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reference.payload, "o1_xyz");

        let order = store
            .upsert_draft(draft(2, OrderPatch::default()), &IdentityKey::Chat(2))
            .await
            .unwrap();
        assert_eq!(order.id, 2);
    }

    #[tokio::test]
    async fn test_rocksdb_payload_cleanup() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        PayloadReferenceStore::save(&store, "a", "one").await.unwrap();
        PayloadReferenceStore::save(&store, "b", "two").await.unwrap();

        assert_eq!(store.cleanup(Duration::hours(72)).await.unwrap(), 0);
        assert!(store.delete("a").await.unwrap());
        assert_eq!(store.cleanup(Duration::seconds(-1)).await.unwrap(), 1);
        assert!(PayloadReferenceStore::get(&store, "b").await.unwrap().is_none());
    }
}
