use async_trait::async_trait;
use client_core::Confirmer;
use dialoguer::Confirm;
use tracing::warn;

/// Asks on the terminal; anything but an explicit yes declines.
pub struct TerminalConfirmer;

#[async_trait]
impl Confirmer for TerminalConfirmer {
    async fn confirm(&self, prompt: &str) -> bool {
        let prompt = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(confirmed)) => confirmed,
            Ok(Err(err)) => {
                warn!(error = %err, "prompt: confirmation unavailable, declining");
                false
            }
            Err(err) => {
                warn!(error = %err, "prompt: confirmation task failed, declining");
                false
            }
        }
    }
}
