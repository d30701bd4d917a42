use super::{parse_line, render};
use crate::application::engine::IntakeEngine;
use crate::application::turn::Requester;
use crate::error::Result;
use crate::infrastructure::notifier::MemoryNotifier;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Drives the engine from a line stream, one message per line, on behalf of a
/// single requester. Operator notifications are echoed after each turn.
pub struct Console {
    engine: IntakeEngine,
    requester: Requester,
    operators: Option<MemoryNotifier>,
}

impl Console {
    pub fn new(engine: IntakeEngine, requester: Requester) -> Self {
        Self {
            engine,
            requester,
            operators: None,
        }
    }

    /// Echoes whatever the engine sent to operators through `notifier`.
    pub fn with_operator_echo(mut self, notifier: MemoryNotifier) -> Self {
        self.operators = Some(notifier);
        self
    }

    /// Reads until end of input. Returns the number of messages handled.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut handled = 0;
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let message = parse_line(&line);
            debug!(?message, "console input");
            let turn = self.engine.handle(&self.requester, message).await?;
            for reply in &turn.replies {
                output
                    .write_all(format!("{}\n\n", render(reply, turn.language)).as_bytes())
                    .await?;
            }
            if let Some(operators) = &self.operators {
                for (operator, text) in operators.drain().await {
                    output
                        .write_all(format!("[operator {}] {}\n\n", operator, text).as_bytes())
                        .await?;
                }
            }
            output.flush().await?;
            handled += 1;
        }
        Ok(handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::EngineSettings;
    use crate::infrastructure::cipher::PassthroughCipher;
    use crate::infrastructure::in_memory::{InMemoryOrderStore, InMemoryPayloadReferenceStore};

    #[tokio::test]
    async fn test_console_runs_a_full_order() {
        let notifier = MemoryNotifier::new();
        let engine = IntakeEngine::new(
            Box::new(InMemoryOrderStore::new()),
            Box::new(InMemoryPayloadReferenceStore::new()),
            Box::new(notifier.clone()),
            Box::new(PassthroughCipher),
            EngineSettings {
                operator_ids: vec![1],
                ..Default::default()
            },
        );
        let console = Console::new(engine, Requester::new(42, Some("qa".into())))
            .with_operator_echo(notifier);

        let script = "/start\nIN\nUPI\n3\nwithdraw\nskip\nskip\nconfirm\n";
        let mut out = Vec::new();
        let handled = console.run(script.as_bytes(), &mut out).await.unwrap();
        assert_eq!(handled, 8);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Total: €265"));
        assert!(text.contains("✅ Order #1 created."));
        assert!(text.contains("[operator 1] 🆕 Order #1"));
    }
}
