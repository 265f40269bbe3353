//! Outbound message delivery via the messaging provider's REST API.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::GatewayError;
use crate::services::otp::mask_phone;

/// Seam to the messaging provider. Production posts to the provider's
/// Messages API; tests substitute a recording stand-in.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), GatewayError>;
}

#[derive(Clone)]
pub struct MessagingService {
    client: Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
}

impl MessagingService {
    pub fn new(
        account_sid: String,
        auth_token: String,
        from_number: String,
        base_url: String,
        timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            account_sid,
            auth_token,
            from_number,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MessageSender for MessagingService {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), GatewayError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("From", format!("whatsapp:{}", self.from_number)),
                ("To", format!("whatsapp:{}", to)),
                ("Body", body.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("Message delivery to {} failed: {}", mask_phone(to), text);
            return Err(GatewayError::Api {
                code: status.as_u16().to_string(),
                message: text,
            });
        }

        tracing::info!("Message delivered to {}", mask_phone(to));
        Ok(())
    }
}
