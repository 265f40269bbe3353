use serde::{Deserialize, Serialize};

/// Inbound message webhook from the messaging provider (form-encoded).
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body", default)]
    pub body: String,
}

/// Transaction status callback from the custody gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletWebhookEvent {
    pub event: String,
    #[serde(default)]
    pub data: WalletWebhookData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletWebhookData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}
