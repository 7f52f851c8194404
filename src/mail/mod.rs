//! Reset email dispatch. Delivery is best-effort and bounded by a timeout.

mod console;
mod smtp;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

pub use console::ConsoleMailer;
pub use smtp::SmtpMailer;

#[async_trait]
pub trait ResetMailer: Send + Sync {
    /// Deliver a reset link. Returns whether delivery succeeded.
    async fn send_password_reset(&self, email: &str, reset_link: &str) -> bool;
}

/// Race delivery against `timeout`. A late or failed send is never retried.
pub async fn dispatch_with_timeout(
    mailer: &dyn ResetMailer,
    email: &str,
    reset_link: &str,
    timeout: Duration,
) -> bool {
    match tokio::time::timeout(timeout, mailer.send_password_reset(email, reset_link)).await {
        Ok(sent) => sent,
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "reset email dispatch timed out");
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::ResetMailer;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Delivery {
        Deliver,
        Fail,
        Hang,
    }

    /// Captures (email, link) pairs instead of sending.
    #[derive(Clone)]
    pub struct RecordingMailer {
        pub sent: Arc<Mutex<Vec<(String, String)>>>,
        delivery: Arc<Mutex<Delivery>>,
    }

    impl RecordingMailer {
        pub fn new() -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                delivery: Arc::new(Mutex::new(Delivery::Deliver)),
            }
        }

        pub fn set_delivery(&self, delivery: Delivery) {
            *self.delivery.lock().unwrap() = delivery;
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        /// Token at the end of the last link sent to `email`.
        pub fn last_token(&self, email: &str) -> Option<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(e, _)| e == email)
                .and_then(|(_, link)| link.rsplit('/').next().map(str::to_string))
        }
    }

    #[async_trait]
    impl ResetMailer for RecordingMailer {
        async fn send_password_reset(&self, email: &str, reset_link: &str) -> bool {
            self.sent
                .lock()
                .unwrap()
                .push((email.to_string(), reset_link.to_string()));
            let delivery = *self.delivery.lock().unwrap();
            match delivery {
                Delivery::Deliver => true,
                Delivery::Fail => false,
                Delivery::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    true
                }
            }
        }
    }
}
