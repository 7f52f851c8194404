use async_trait::async_trait;
use tracing::info;

use super::ResetMailer;

/// Logs the reset link instead of sending it (development).
#[derive(Debug, Default, Clone)]
pub struct ConsoleMailer;

impl ConsoleMailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResetMailer for ConsoleMailer {
    async fn send_password_reset(&self, email: &str, reset_link: &str) -> bool {
        info!(email = %email, reset_link = %reset_link, "password reset link");
        true
    }
}
