//! Outbound email and the `send_email` capability.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::MailSettings;
use crate::functions::Capability;
use crate::models::{FunctionDescriptor, ParameterSpec};

/// Delivers a single plain-text message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// SMTP delivery with STARTTLS and login authentication.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpMailer {
    /// Build the transport. No connection is made until the first send.
    pub fn new(settings: &MailSettings) -> Result<Self> {
        let sender: Mailbox = settings
            .sender
            .parse()
            .with_context(|| format!("invalid sender address '{}'", settings.sender))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)
            .with_context(|| format!("invalid SMTP host '{}'", settings.smtp_host))?
            .port(settings.smtp_port)
            .credentials(Credentials::new(
                settings.sender.clone(),
                settings.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(settings.timeout_secs)))
            .build();

        Ok(Self { transport, sender })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let recipient: Mailbox = to
            .trim()
            .parse()
            .with_context(|| format!("invalid recipient address '{}'", to))?;

        let message = Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("failed to build email")?;

        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;

        tracing::info!(to = %to, "email sent");
        Ok(())
    }
}

/// The `send_email` function offered to the model.
pub struct SendEmail {
    descriptor: FunctionDescriptor,
    transport: Arc<dyn MailTransport>,
}

impl SendEmail {
    pub const NAME: &'static str = "send_email";

    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self {
            descriptor: send_email_descriptor(),
            transport,
        }
    }
}

fn string_param(name: &str, description: &str) -> (String, ParameterSpec) {
    (
        name.to_string(),
        ParameterSpec {
            kind: "string".to_string(),
            description: description.to_string(),
        },
    )
}

/// Descriptor for `send_email`: all three parameters are required strings.
pub fn send_email_descriptor() -> FunctionDescriptor {
    FunctionDescriptor {
        name: SendEmail::NAME.to_string(),
        description: "Send an email to the patient".to_string(),
        parameters: vec![
            string_param("to_email", "The recipient's email address"),
            string_param("subject", "The email subject"),
            string_param("body", "The email body"),
        ],
        required: vec!["to_email".into(), "subject".into(), "body".into()],
    }
}

#[async_trait]
impl Capability for SendEmail {
    fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<String> {
        let field = |name: &str| {
            arguments
                .get(name)
                .and_then(|v| v.as_str())
                .with_context(|| format!("argument '{}' must be a string", name))
        };
        let to = field("to_email")?;
        let subject = field("subject")?;
        let body = field("body")?;

        self.transport.send(to, subject, body).await?;
        Ok(format!("Email sent to {}", to))
    }
}
