use std::time::Duration;

use async_trait::async_trait;
use mail_builder::MessageBuilder;
use uuid::Uuid;

use crate::config::EmailConfig;

/// Fully rendered message handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("email transport unavailable: {0}")]
    Transport(String),
    #[error("email rejected: {0}")]
    Rejected(String),
    #[error("email delivery timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, NotificationError>;
}

/// SMTP transport built on mail-send; one connection per message.
pub struct SmtpNotificationSender {
    config: EmailConfig,
    timeout: Duration,
}

impl SmtpNotificationSender {
    pub fn new(config: EmailConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    fn message_id(&self) -> String {
        let domain = self
            .config
            .from
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("localhost");
        format!("{}@{}", Uuid::new_v4().simple(), domain)
    }
}

#[async_trait]
impl NotificationSender for SmtpNotificationSender {
    #[tracing::instrument(skip(self, email), fields(to = %email.to))]
    async fn send(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, NotificationError> {
        let message_id = self.message_id();
        let mut message = MessageBuilder::new()
            .from(self.config.from.as_str())
            .to(email.to.as_str())
            .subject(email.subject.as_str())
            .message_id(message_id.as_str())
            .text_body(email.body_text.as_str())
            .html_body(email.body_html.as_str());
        if let Some(reply_to) = &email.reply_to {
            message = message.reply_to(reply_to.as_str());
        }

        let delivery = async {
            mail_send::SmtpClientBuilder::new(self.config.host.as_str(), self.config.port)
                .implicit_tls(self.config.implicit_tls)
                .credentials((self.config.username.as_str(), self.config.password.as_str()))
                .timeout(self.timeout)
                .connect()
                .await
                .map_err(|err| NotificationError::Transport(format!("{err:?}")))?
                .send(message)
                .await
                .map_err(|err| NotificationError::Rejected(format!("{err:?}")))
        };

        tokio::time::timeout(self.timeout, delivery)
            .await
            .map_err(|_| NotificationError::Timeout(self.timeout))??;

        tracing::info!(%message_id, "email delivered");
        Ok(DeliveryReceipt { message_id })
    }
}
