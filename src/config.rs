use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Runtime configuration, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,

    // Messaging provider (WhatsApp/SMS delivery)
    pub messaging_account_sid: String,
    pub messaging_auth_token: String,
    pub messaging_from_number: String,
    pub messaging_base_url: String,

    // Wallet custody provider
    pub wallet_api_key: String,
    pub wallet_api_secret: String,
    pub wallet_base_url: String,

    // Signature check for the custody provider's status webhook
    pub webhook_signing_secret: String,

    // OTP settings
    pub otp_expiry_minutes: i64,
    pub otp_max_attempts: u32,
    pub otp_issue_limit: usize,
    pub otp_issue_window_secs: u64,

    // Dialogue settings
    pub lockout_cooldown_minutes: i64,
    pub session_idle_timeout_minutes: i64,
    pub min_transaction_amount: Decimal,
    pub max_transaction_amount: Decimal,

    pub http_timeout_secs: u64,
    pub admin_token: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            messaging_account_sid: env::var("MESSAGING_ACCOUNT_SID").unwrap_or_default(),
            messaging_auth_token: env::var("MESSAGING_AUTH_TOKEN").unwrap_or_default(),
            messaging_from_number: env::var("MESSAGING_FROM_NUMBER")
                .unwrap_or_else(|_| "+14155238886".to_string()),
            messaging_base_url: env::var("MESSAGING_BASE_URL")
                .unwrap_or_else(|_| "https://api.twilio.com".to_string()),

            wallet_api_key: env::var("WALLET_API_KEY").unwrap_or_default(),
            wallet_api_secret: env::var("WALLET_API_SECRET").unwrap_or_default(),
            wallet_base_url: env::var("WALLET_BASE_URL")
                .unwrap_or_else(|_| "https://api.bitnob.co".to_string()),

            webhook_signing_secret: env::var("WEBHOOK_SIGNING_SECRET").unwrap_or_default(),

            otp_expiry_minutes: parse_env("OTP_EXPIRY_MINUTES", 5),
            otp_max_attempts: parse_env("OTP_MAX_ATTEMPTS", 3),
            otp_issue_limit: parse_env("OTP_ISSUE_LIMIT", 5),
            otp_issue_window_secs: parse_env("OTP_ISSUE_WINDOW_SECS", 300),

            lockout_cooldown_minutes: parse_env("LOCKOUT_COOLDOWN_MINUTES", 30),
            session_idle_timeout_minutes: parse_env("SESSION_IDLE_TIMEOUT_MINUTES", 30),
            min_transaction_amount: parse_env_decimal("MIN_TRANSACTION_AMOUNT", "0.0001"),
            max_transaction_amount: parse_env_decimal("MAX_TRANSACTION_AMOUNT", "1.0"),

            http_timeout_secs: parse_env("HTTP_TIMEOUT_SECS", 10),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_default(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_decimal(key: &str, default: &str) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str(&v).ok())
        .unwrap_or_else(|| Decimal::from_str(default).unwrap())
}
