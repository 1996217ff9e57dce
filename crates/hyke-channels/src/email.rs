//! Transactional email: SMTP delivery via async lettre.
//!
//! Templates are looked up by name in `[email.templates]`; the template name
//! doubles as the subject line. `{email}` in a body is replaced with the
//! recipient address.

use async_trait::async_trait;
use hyke_core::config::EmailConfig;
use hyke_core::error::{HykeError, Result};
use hyke_scheduler::Mailer;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Sends templated emails through an SMTP STARTTLS relay.
pub struct SmtpMailer {
    config: EmailConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| HykeError::Email(format!("SMTP relay: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();
        Ok(Self { config, transport })
    }

    /// Body for `template`, falling back to the template name itself.
    fn render(&self, to: &str, template: &str) -> String {
        match self.config.templates.get(template) {
            Some(body) => body.replace("{email}", to),
            None => {
                tracing::debug!("No body configured for template '{template}', sending subject only");
                template.to_string()
            }
        }
    }

    fn build_message(&self, to: &str, template: &str) -> Result<Message> {
        let from: Mailbox = format!("{} <{}>", self.config.display_name, self.config.from_address)
            .parse()
            .map_err(|e| HykeError::Email(format!("Invalid from: {e}")))?;
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| HykeError::Email(format!("Invalid to '{to}': {e}")))?;

        Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(template)
            .header(ContentType::TEXT_PLAIN)
            .body(self.render(to, template))
            .map_err(|e| HykeError::Email(format!("Build email: {e}")))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_template(&self, email: &str, template: &str) -> Result<()> {
        let message = self.build_message(email, template)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| HykeError::Email(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email '{template}' sent to: {email}");
        Ok(())
    }
}

/// Mailer used when delivery is disabled: logs what would have been sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_template(&self, email: &str, template: &str) -> Result<()> {
        tracing::info!("📭 Email delivery disabled, skipping '{template}' for {email}");
        Ok(())
    }
}
