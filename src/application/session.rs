use crate::domain::catalog::Language;
use crate::domain::order::{IdentityKey, OrderId};
use crate::domain::workflow::{Mode, Step};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Where a requester currently is in the order conversation.
///
/// Only the position lives here. Every answered field is already on the bound
/// order, so losing a session loses nothing but the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub step: Step,
    pub mode: Mode,
    /// `None` until the first answer creates the draft.
    pub order_id: Option<OrderId>,
    /// Total shown by the configurator, compared against the computed price.
    pub price_hint: Option<u64>,
}

impl Session {
    pub fn linear() -> Self {
        Self {
            step: Step::Geo,
            mode: Mode::Linear,
            order_id: None,
            price_hint: None,
        }
    }

    pub fn gap_fill(order_id: OrderId, step: Step) -> Self {
        Self {
            step,
            mode: Mode::GapFill,
            order_id: Some(order_id),
            price_hint: None,
        }
    }
}

#[derive(Debug)]
pub struct Conversation {
    pub session: Option<Session>,
    pub language: Language,
}

/// Per-requester conversation state.
///
/// Each requester gets their own lock, held for a whole turn, so one requester's
/// messages are handled strictly one after another while different requesters
/// proceed in parallel.
#[derive(Clone)]
pub struct SessionRegistry {
    conversations: Arc<RwLock<HashMap<IdentityKey, Arc<Mutex<Conversation>>>>>,
    default_language: Language,
}

impl SessionRegistry {
    pub fn new(default_language: Language) -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            default_language,
        }
    }

    /// Returns the conversation of `key`, creating an idle one on first contact.
    pub async fn conversation(&self, key: &IdentityKey) -> Arc<Mutex<Conversation>> {
        if let Some(existing) = self.conversations.read().await.get(key) {
            return existing.clone();
        }
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Conversation {
                    session: None,
                    language: self.default_language,
                }))
            })
            .clone()
    }

    /// Forgets the conversation of `key` when nothing distinguishes it from a
    /// fresh one. An entry that is borrowed by a running turn stays.
    pub async fn release(&self, key: &IdentityKey) {
        let mut conversations = self.conversations.write().await;
        let idle = match conversations.get(key) {
            Some(entry) if Arc::strong_count(entry) == 1 => match entry.try_lock() {
                Ok(conversation) => {
                    conversation.session.is_none()
                        && conversation.language == self.default_language
                }
                Err(_) => false,
            },
            _ => false,
        };
        if idle {
            conversations.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) async fn is_tracked(&self, key: &IdentityKey) -> bool {
        self.conversations.read().await.contains_key(key)
    }
}
