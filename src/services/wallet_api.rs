//! Client for the external Bitcoin custody API.
//!
//! Every request is signed HMAC-SHA256 over `timestamp + METHOD + path +
//! body`; the provider's business errors come back as `GatewayError::Api`
//! with the upstream code attached so the dialogue layer can surface retry
//! guidance.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use moka::future::Cache;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

use crate::error::GatewayError;
use crate::models::session::WalletAccount;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSummary {
    pub direction: String,
    pub amount: Decimal,
    pub status: String,
    pub reference: String,
    pub timestamp: String,
}

/// Seam to the custody provider. Production uses `WalletApiService`; tests
/// substitute deterministic stand-ins.
#[async_trait]
pub trait WalletGateway: Send + Sync {
    async fn create_account(
        &self,
        full_name: &str,
        email: &str,
        phone: &str,
    ) -> Result<WalletAccount, GatewayError>;

    async fn get_balance(&self, wallet_id: &str) -> Result<Decimal, GatewayError>;

    async fn get_history(
        &self,
        wallet_id: &str,
        limit: usize,
    ) -> Result<Vec<TransferSummary>, GatewayError>;

    async fn estimate_fee(&self, amount: Decimal) -> Result<Decimal, GatewayError>;

    async fn create_transfer(
        &self,
        wallet_id: &str,
        address: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<TransferReceipt, GatewayError>;
}

#[derive(Clone)]
pub struct WalletApiService {
    client: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    balance_cache: Arc<Cache<String, Decimal>>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WalletData {
    id: String,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    balance: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct AddressData {
    address: String,
}

#[derive(Debug, Deserialize)]
struct FeeData {
    fee: Decimal,
}

impl WalletApiService {
    pub fn new(api_key: String, secret_key: String, base_url: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        // Short TTL: balances change under us, this only absorbs bursts
        let balance_cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(30))
            .build();

        Self {
            client,
            api_key,
            secret_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            balance_cache: Arc::new(balance_cache),
        }
    }

    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        let message = format!("{}{}{}{}", timestamp, method, path, body);
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn signed_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<T, GatewayError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&timestamp, "GET", path, "");

        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("accept", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Timestamp", timestamp)
            .header("X-Signature", signature)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn signed_post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<T, GatewayError> {
        let body = payload.to_string();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&timestamp, "POST", path, &body);

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Timestamp", timestamp)
            .header("X-Signature", signature)
            .body(body)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let parsed: ApiErrorBody = serde_json::from_str(&text).unwrap_or(ApiErrorBody {
                code: None,
                message: None,
            });
            return Err(GatewayError::Api {
                code: parsed.code.unwrap_or_else(|| status.as_u16().to_string()),
                message: parsed.message.unwrap_or(text),
            });
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;

        envelope.data.ok_or_else(|| {
            GatewayError::BadResponse(
                envelope
                    .message
                    .unwrap_or_else(|| "missing data field".to_string()),
            )
        })
    }

    /// The provider keeps one custodial Bitcoin wallet per tenant; find it.
    async fn find_bitcoin_wallet(&self) -> Result<WalletData, GatewayError> {
        let wallets: Vec<WalletData> = self.signed_get("/api/v1/wallets").await?;
        wallets
            .into_iter()
            .find(|w| {
                w.currency
                    .as_deref()
                    .map(|c| c.eq_ignore_ascii_case("btc"))
                    .unwrap_or(false)
            })
            .ok_or_else(|| GatewayError::Api {
                code: "no_wallet".to_string(),
                message: "no Bitcoin wallet configured for this account".to_string(),
            })
    }
}

#[async_trait]
impl WalletGateway for WalletApiService {
    async fn create_account(
        &self,
        full_name: &str,
        email: &str,
        phone: &str,
    ) -> Result<WalletAccount, GatewayError> {
        let mut parts = full_name.split_whitespace();
        let first_name = parts.next().unwrap_or_default();
        let last_name = parts.collect::<Vec<_>>().join(" ");

        tracing::info!("Creating custody account for {}", super::otp::mask_phone(phone));

        let customer: CustomerData = self
            .signed_post(
                "/api/v1/customers",
                json!({
                    "firstName": first_name,
                    "lastName": last_name,
                    "email": email,
                    "phoneNumber": phone,
                    "type": "individual",
                }),
            )
            .await?;

        let wallet = self.find_bitcoin_wallet().await?;

        let address: AddressData = self
            .signed_post(
                "/api/v1/addresses/generate",
                json!({ "customerEmail": email }),
            )
            .await?;

        tracing::info!("Custody account created: customer {}", customer.id);

        Ok(WalletAccount {
            customer_id: customer.id,
            wallet_id: wallet.id,
            bitcoin_address: address.address,
        })
    }

    async fn get_balance(&self, wallet_id: &str) -> Result<Decimal, GatewayError> {
        if let Some(cached) = self.balance_cache.get(wallet_id).await {
            tracing::debug!("Balance cache hit for wallet {}", wallet_id);
            return Ok(cached);
        }

        let wallets: Vec<WalletData> = self.signed_get("/api/v1/wallets").await?;
        let balance = wallets
            .into_iter()
            .find(|w| w.id == wallet_id)
            .and_then(|w| w.balance)
            .ok_or_else(|| GatewayError::Api {
                code: "wallet_not_found".to_string(),
                message: format!("wallet {} not found", wallet_id),
            })?;

        self.balance_cache
            .insert(wallet_id.to_string(), balance)
            .await;
        Ok(balance)
    }

    async fn get_history(
        &self,
        wallet_id: &str,
        limit: usize,
    ) -> Result<Vec<TransferSummary>, GatewayError> {
        let path = format!("/api/v1/transactions?walletId={}&limit={}", wallet_id, limit);
        self.signed_get(&path).await
    }

    async fn estimate_fee(&self, amount: Decimal) -> Result<Decimal, GatewayError> {
        let fee: FeeData = self
            .signed_post(
                "/api/v1/transactions/estimate-fee",
                json!({ "amount": amount.to_string(), "currency": "BTC" }),
            )
            .await?;
        Ok(fee.fee)
    }

    async fn create_transfer(
        &self,
        wallet_id: &str,
        address: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<TransferReceipt, GatewayError> {
        tracing::info!(
            "Submitting transfer of {} BTC, reference {}",
            amount,
            reference
        );
        let receipt: TransferReceipt = self
            .signed_post(
                "/api/v1/transactions/send",
                json!({
                    "walletId": wallet_id,
                    "address": address,
                    "amount": amount.to_string(),
                    "currency": "BTC",
                    "reference": reference,
                }),
            )
            .await?;

        // The cached balance is stale the moment a transfer is accepted
        self.balance_cache.invalidate(wallet_id).await;

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic_hex() {
        let service = WalletApiService::new(
            "key".to_string(),
            "secret".to_string(),
            "https://api.example.com".to_string(),
            10,
        );
        let a = service.sign("1700000000", "POST", "/api/v1/customers", "{}");
        let b = service.sign("1700000000", "POST", "/api/v1/customers", "{}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_varies_with_input() {
        let service = WalletApiService::new(
            "key".to_string(),
            "secret".to_string(),
            "https://api.example.com".to_string(),
            10,
        );
        let a = service.sign("1700000000", "POST", "/api/v1/customers", "{}");
        let b = service.sign("1700000001", "POST", "/api/v1/customers", "{}");
        let c = service.sign("1700000000", "GET", "/api/v1/customers", "{}");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let service = WalletApiService::new(
            "key".to_string(),
            "secret".to_string(),
            "https://api.example.com/".to_string(),
            10,
        );
        assert_eq!(service.base_url, "https://api.example.com");
    }
}
