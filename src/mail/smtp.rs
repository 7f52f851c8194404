use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use tracing::{error, info};

use super::ResetMailer;
use crate::config::SmtpConfig;

const SUBJECT: &str = "Reset your password";

/// Sends reset links over SMTP. The blocking transport runs on the blocking pool.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| anyhow::anyhow!("failed to create SMTP transport: {e}"))?
            .port(config.port)
            .credentials(creds)
            .build();

        let from = match &config.from_name {
            Some(name) => format!("{} <{}>", name, config.from_email),
            None => config.from_email.clone(),
        };
        let from = from
            .parse::<Mailbox>()
            .map_err(|e| anyhow::anyhow!("invalid from address: {e}"))?;

        info!(host = %config.host, port = config.port, "SMTP mailer configured");
        Ok(Self { transport, from })
    }

    fn build(&self, to: &str, reset_link: &str) -> anyhow::Result<Message> {
        let to = to
            .parse::<Mailbox>()
            .map_err(|e| anyhow::anyhow!("invalid recipient address: {e}"))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(SUBJECT)
            .multipart(MultiPart::alternative_plain_html(
                text_body(reset_link),
                html_body(reset_link),
            ))?;
        Ok(message)
    }
}

fn text_body(reset_link: &str) -> String {
    format!(
        "We received a request to reset your password.\n\n\
         To choose a new password, visit:\n{reset_link}\n\n\
         This link expires in 1 hour.\n\n\
         If you didn't request a password reset, you can ignore this email."
    )
}

fn html_body(reset_link: &str) -> String {
    format!(
        "<p>We received a request to reset your password.</p>\
         <p><a href=\"{reset_link}\">Reset password</a></p>\
         <p>Or paste this link into your browser:<br>{reset_link}</p>\
         <p><strong>This link expires in 1 hour.</strong></p>\
         <p>If you didn't request a password reset, you can ignore this email.</p>"
    )
}

#[async_trait]
impl ResetMailer for SmtpMailer {
    async fn send_password_reset(&self, email: &str, reset_link: &str) -> bool {
        let message = match self.build(email, reset_link) {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "failed to build reset email");
                return false;
            }
        };
        let transport = self.transport.clone();
        let sent = tokio::task::spawn_blocking(move || transport.send(&message)).await;
        match sent {
            Ok(Ok(_)) => {
                info!(email = %email, "password reset email sent");
                true
            }
            Ok(Err(e)) => {
                error!(email = %email, error = %e, "failed to send reset email");
                false
            }
            Err(e) => {
                error!(error = %e, "reset email task failed");
                false
            }
        }
    }
}
