use crate::domain::ports::Notifier;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Delivers operator notifications to the log. Chat transports wrap or replace it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, operator_id: i64, text: &str) -> Result<()> {
        info!(target: "notify", operator_id, "{}", text);
        Ok(())
    }
}

/// Keeps every notification in memory. The interactive chat console prints
/// these after each turn.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<(i64, String)>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything sent so far.
    pub async fn drain(&self) -> Vec<(i64, String)> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, operator_id: i64, text: &str) -> Result<()> {
        self.sent.lock().await.push((operator_id, text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_notifier_drains() {
        let notifier = MemoryNotifier::new();
        notifier.notify(1, "hello").await.unwrap();
        notifier.notify(2, "world").await.unwrap();

        let sent = notifier.drain().await;
        assert_eq!(sent, vec![(1, "hello".into()), (2, "world".into())]);
        assert!(notifier.drain().await.is_empty());
        assert!(LogNotifier.notify(1, "ok").await.is_ok());
    }
}
