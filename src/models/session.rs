use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current step of a user's multi-turn conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogState {
    New,
    AwaitingRegistrationConfirm,
    AwaitingName,
    AwaitingEmail,
    RegisteredIdle,
    AwaitingSendConfirm,
    AwaitingOtp,
    Locked,
}

/// Name/email collected during registration, before the wallet exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationDraft {
    pub full_name: Option<String>,
    pub email: Option<String>,
}

/// Unconfirmed transfer parameters held between the send command and
/// OTP-authorized execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub amount: Decimal,
    pub address: String,
    pub currency: String,
    pub fee: Option<Decimal>,
    pub reference: String,
}

/// Wallet identity returned by the custody gateway at account creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub customer_id: String,
    pub wallet_id: String,
    pub bitcoin_address: String,
}

/// Per-user conversation state, keyed by phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    pub phone: String,
    pub state: DialogState,
    pub registration: Option<RegistrationDraft>,
    pub draft: Option<TransactionDraft>,
    pub wallet: Option<WalletAccount>,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl UserSession {
    pub fn new(phone: String, now: DateTime<Utc>) -> Self {
        Self {
            phone,
            state: DialogState::New,
            registration: None,
            draft: None,
            wallet: None,
            locked_until: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.wallet.is_some()
    }

    /// Idle sessions fall back to their resting state on next contact:
    /// registered users to `RegisteredIdle` with drafts dropped, unregistered
    /// users to `New`. The wallet identity always survives.
    pub fn reset_if_stale(&mut self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        if now - self.last_activity <= idle_timeout {
            return false;
        }
        self.draft = None;
        self.locked_until = None;
        self.state = if self.is_registered() {
            DialogState::RegisteredIdle
        } else {
            self.registration = None;
            DialogState::New
        };
        true
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn session_with_wallet(now: DateTime<Utc>) -> UserSession {
        let mut s = UserSession::new("+15550001111".to_string(), now);
        s.wallet = Some(WalletAccount {
            customer_id: "c1".to_string(),
            wallet_id: "w1".to_string(),
            bitcoin_address: "bc1qtest".to_string(),
        });
        s
    }

    #[test]
    fn test_stale_registered_session_resets_to_idle() {
        let now = Utc::now();
        let mut s = session_with_wallet(now);
        s.state = DialogState::AwaitingOtp;
        s.draft = Some(TransactionDraft {
            amount: dec!(0.001),
            address: "1ABCxyz".to_string(),
            currency: "BTC".to_string(),
            fee: None,
            reference: "ref".to_string(),
        });

        let later = now + Duration::minutes(45);
        assert!(s.reset_if_stale(later, Duration::minutes(30)));
        assert_eq!(s.state, DialogState::RegisteredIdle);
        assert!(s.draft.is_none());
        assert!(s.wallet.is_some());
    }

    #[test]
    fn test_stale_unregistered_session_resets_to_new() {
        let now = Utc::now();
        let mut s = UserSession::new("+15550001111".to_string(), now);
        s.state = DialogState::AwaitingEmail;
        s.registration = Some(RegistrationDraft {
            full_name: Some("Jane Doe".to_string()),
            email: None,
        });

        let later = now + Duration::minutes(31);
        assert!(s.reset_if_stale(later, Duration::minutes(30)));
        assert_eq!(s.state, DialogState::New);
        assert!(s.registration.is_none());
    }

    #[test]
    fn test_fresh_session_not_reset() {
        let now = Utc::now();
        let mut s = session_with_wallet(now);
        s.state = DialogState::AwaitingSendConfirm;
        assert!(!s.reset_if_stale(now + Duration::minutes(5), Duration::minutes(30)));
        assert_eq!(s.state, DialogState::AwaitingSendConfirm);
    }
}
