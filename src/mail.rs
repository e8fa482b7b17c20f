use async_trait::async_trait;
use tracing::{debug, info};

/// Outbound mail. Delivery failures are reported to the caller, which logs
/// them; they never roll back account changes.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, to: &str, nickname: &str, link: &str) -> anyhow::Result<()>;
}

/// Development mailer: writes the message to the log instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, to: &str, nickname: &str, link: &str) -> anyhow::Result<()> {
        info!(%to, %nickname, "verification email queued");
        debug!(%to, %link, "verification link");
        Ok(())
    }
}
