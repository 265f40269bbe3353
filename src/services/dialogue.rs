//! The conversational state machine.
//!
//! Each inbound message is one turn: take the per-phone lock, load the
//! session, run a deterministic step that may emit at most one gateway
//! effect, persist the committed state *before* the external call, execute
//! the effect, fold its outcome back into the session, persist again, reply.
//! Errors never escape this layer as anything but user-visible text.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{OtpError, ParseError, ValidationError};
use crate::models::session::{
    DialogState, RegistrationDraft, TransactionDraft, UserSession,
};
use crate::services::command_parser::{self, Intent, SendRequest};
use crate::services::messaging::MessageSender;
use crate::services::otp::{mask_phone, OtpPurpose, OtpService};
use crate::services::replies::{self, HistoryEntry};
use crate::services::session_store::SessionStore;
use crate::services::transaction_log::TransactionLog;
use crate::services::wallet_api::WalletGateway;

#[derive(Clone)]
pub struct DialogueSettings {
    pub otp_expiry_minutes: i64,
    pub lockout_cooldown: Duration,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub history_limit: usize,
}

impl DialogueSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            otp_expiry_minutes: config.otp_expiry_minutes,
            lockout_cooldown: Duration::minutes(config.lockout_cooldown_minutes),
            min_amount: config.min_transaction_amount,
            max_amount: config.max_transaction_amount,
            history_limit: 5,
        }
    }
}

/// The single allowed gateway call for a turn, described as data so the
/// step logic stays deterministic and stub-testable.
#[derive(Debug)]
enum Effect {
    CreateAccount { full_name: String, email: String },
    FetchBalance { greeting: bool },
    FetchHistory,
    EstimateFee { request: SendRequest },
    SubmitTransfer { draft: TransactionDraft },
    DeliverOtp { code: String },
}

enum StepResult {
    Reply(String),
    Run(Effect),
}

use StepResult::{Reply, Run};

#[derive(Clone)]
pub struct DialogueEngine {
    store: SessionStore,
    otp: OtpService,
    tx_log: TransactionLog,
    wallet: Arc<dyn WalletGateway>,
    messaging: Arc<dyn MessageSender>,
    settings: DialogueSettings,
}

impl DialogueEngine {
    pub fn new(
        store: SessionStore,
        otp: OtpService,
        tx_log: TransactionLog,
        wallet: Arc<dyn WalletGateway>,
        messaging: Arc<dyn MessageSender>,
        settings: DialogueSettings,
    ) -> Self {
        Self {
            store,
            otp,
            tx_log,
            wallet,
            messaging,
            settings,
        }
    }

    /// Handle one inbound message and produce the reply text.
    pub async fn handle_message(&self, phone: &str, text: &str) -> String {
        let phone = normalize_phone(phone);
        let _guard = self.store.lock(&phone).await;

        let now = Utc::now();
        let mut session = self.store.get_or_create(&phone, now);
        session.touch(now);

        let result = self.step(&mut session, text, now);

        // Commit the transition before any external call leaves the process
        self.store.upsert(session.clone());

        match result {
            Reply(reply) => reply,
            Run(effect) => {
                let reply = self.run_effect(&mut session, effect).await;
                self.store.upsert(session);
                reply
            }
        }
    }

    fn step(&self, session: &mut UserSession, text: &str, now: DateTime<Utc>) -> StepResult {
        // Lockout gate comes before any parsing
        if session.state == DialogState::Locked {
            if let Some(until) = session.locked_until {
                if now < until {
                    let minutes_left = (until - now).num_minutes();
                    return Reply(replies::locked(minutes_left));
                }
            }
            session.locked_until = None;
            session.state = DialogState::RegisteredIdle;
            tracing::info!("Lockout elapsed for {}", mask_phone(&session.phone));
        }

        let intent = command_parser::parse(text);

        match session.state {
            DialogState::New => self.step_new(session, &intent),
            DialogState::AwaitingRegistrationConfirm => self.step_reg_confirm(session, &intent),
            DialogState::AwaitingName => self.step_name(session, text),
            DialogState::AwaitingEmail => self.step_email(session, text),
            DialogState::RegisteredIdle => self.step_idle(session, &intent),
            DialogState::AwaitingSendConfirm => self.step_send_confirm(session, &intent),
            DialogState::AwaitingOtp => self.step_otp(session, &intent, now),
            DialogState::Locked => unreachable!("lockout handled above"),
        }
    }

    fn step_new(&self, session: &mut UserSession, intent: &Result<Intent, ParseError>) -> StepResult {
        match intent {
            Ok(Intent::Greeting) => {
                session.state = DialogState::AwaitingRegistrationConfirm;
                Reply(replies::welcome())
            }
            // "yes" from an unseen number is registration consent
            Ok(Intent::Affirmative) => {
                session.state = DialogState::AwaitingName;
                session.registration = Some(RegistrationDraft::default());
                Reply(replies::ask_name())
            }
            Ok(Intent::Help) => Reply(replies::help()),
            _ => Reply(replies::welcome()),
        }
    }

    fn step_reg_confirm(
        &self,
        session: &mut UserSession,
        intent: &Result<Intent, ParseError>,
    ) -> StepResult {
        match intent {
            Ok(Intent::Affirmative) => {
                session.state = DialogState::AwaitingName;
                session.registration = Some(RegistrationDraft::default());
                Reply(replies::ask_name())
            }
            Ok(Intent::Negative) => {
                session.state = DialogState::New;
                session.registration = None;
                Reply(replies::registration_declined())
            }
            Ok(Intent::Greeting) => Reply(replies::welcome()),
            _ => {
                session.state = DialogState::New;
                session.registration = None;
                Reply(replies::welcome())
            }
        }
    }

    fn step_name(&self, session: &mut UserSession, text: &str) -> StepResult {
        let name = match command_parser::validate_full_name(text) {
            Ok(name) => name,
            Err(_) => return Reply(replies::invalid_name()),
        };
        session
            .registration
            .get_or_insert_with(RegistrationDraft::default)
            .full_name = Some(name);
        session.state = DialogState::AwaitingEmail;
        Reply(replies::ask_email())
    }

    fn step_email(&self, session: &mut UserSession, text: &str) -> StepResult {
        let email = match command_parser::validate_email(text) {
            Ok(email) => email,
            Err(_) => return Reply(replies::invalid_email()),
        };
        let registration = session
            .registration
            .get_or_insert_with(RegistrationDraft::default);
        registration.email = Some(email.clone());
        let full_name = registration.full_name.clone().unwrap_or_default();

        // State stays AwaitingEmail until the gateway succeeds
        Run(Effect::CreateAccount { full_name, email })
    }

    fn step_idle(&self, session: &mut UserSession, intent: &Result<Intent, ParseError>) -> StepResult {
        let Some(wallet) = session.wallet.clone() else {
            // A session can only be idle with a wallet; recover if not
            session.state = DialogState::New;
            return Reply(replies::not_registered());
        };

        match intent {
            Ok(Intent::Greeting) => Run(Effect::FetchBalance { greeting: true }),
            Ok(Intent::Balance) => Run(Effect::FetchBalance { greeting: false }),
            Ok(Intent::History) => Run(Effect::FetchHistory),
            Ok(Intent::Address) => Reply(replies::your_address(&wallet.bitcoin_address)),
            Ok(Intent::Help) => Reply(replies::help()),
            Ok(Intent::Send(request)) => {
                if let Err(e) = self.check_amount_limits(request.amount) {
                    return Reply(format!("Couldn't accept that transfer: {}.", e));
                }
                Run(Effect::EstimateFee {
                    request: request.clone(),
                })
            }
            Err(ParseError::MalformedSend)
            | Err(ParseError::InvalidAmount(_))
            | Err(ParseError::InvalidAddress(_)) => {
                let reason = intent.as_ref().err().map(|e| e.to_string()).unwrap_or_default();
                Reply(format!(
                    "Couldn't read that transfer: {}.\n\nUse: Send 0.001 BTC to <address>",
                    reason
                ))
            }
            _ => Reply(replies::unknown_command()),
        }
    }

    fn check_amount_limits(&self, amount: Decimal) -> Result<(), ValidationError> {
        if amount < self.settings.min_amount {
            return Err(ValidationError::AmountBelowMinimum(replies::format_btc(
                self.settings.min_amount,
            )));
        }
        if amount > self.settings.max_amount {
            return Err(ValidationError::AmountAboveMaximum(replies::format_btc(
                self.settings.max_amount,
            )));
        }
        Ok(())
    }

    fn step_send_confirm(
        &self,
        session: &mut UserSession,
        intent: &Result<Intent, ParseError>,
    ) -> StepResult {
        match intent {
            Ok(Intent::Affirmative) => match self.otp.issue(&session.phone, OtpPurpose::Transaction) {
                Ok(code) => Run(Effect::DeliverOtp { code }),
                Err(OtpError::RateLimitExceeded) => Reply(
                    "Too many codes requested. Please wait a few minutes and reply *YES* again."
                        .to_string(),
                ),
                Err(e) => {
                    tracing::error!(
                        "Unexpected OTP issue failure for {}: {}",
                        mask_phone(&session.phone),
                        e
                    );
                    Reply(replies::gateway_unavailable())
                }
            },
            Ok(Intent::Negative) => {
                session.draft = None;
                session.state = DialogState::RegisteredIdle;
                self.otp.invalidate(&session.phone, OtpPurpose::Transaction);
                Reply(replies::transaction_cancelled())
            }
            _ => Reply(replies::need_confirmation()),
        }
    }

    fn step_otp(
        &self,
        session: &mut UserSession,
        intent: &Result<Intent, ParseError>,
        now: DateTime<Utc>,
    ) -> StepResult {
        match intent {
            Ok(Intent::OtpCode(code)) => {
                match self.otp.validate(&session.phone, OtpPurpose::Transaction, code) {
                    Ok(()) => {
                        // Authorization spent: detach the draft and leave the
                        // OTP flow before the transfer call goes out
                        let Some(draft) = session.draft.take() else {
                            session.state = DialogState::RegisteredIdle;
                            return Reply(replies::transaction_cancelled());
                        };
                        session.state = DialogState::RegisteredIdle;
                        Run(Effect::SubmitTransfer { draft })
                    }
                    Err(OtpError::Mismatch { remaining }) => {
                        Reply(replies::otp_mismatch(remaining))
                    }
                    Err(OtpError::Exhausted) => {
                        session.draft = None;
                        session.state = DialogState::Locked;
                        session.locked_until = Some(now + self.settings.lockout_cooldown);
                        tracing::warn!(
                            "Locked {} after exhausting OTP attempts",
                            mask_phone(&session.phone)
                        );
                        Reply(replies::locked(self.settings.lockout_cooldown.num_minutes()))
                    }
                    Err(OtpError::Expired) | Err(OtpError::NotFound) => {
                        session.state = DialogState::AwaitingSendConfirm;
                        Reply(replies::otp_expired())
                    }
                    Err(OtpError::RateLimitExceeded) => Reply(replies::need_otp()),
                }
            }
            Ok(Intent::Negative) => {
                session.draft = None;
                session.state = DialogState::RegisteredIdle;
                self.otp.invalidate(&session.phone, OtpPurpose::Transaction);
                Reply(replies::transaction_cancelled())
            }
            _ => Reply(replies::need_otp()),
        }
    }

    async fn run_effect(&self, session: &mut UserSession, effect: Effect) -> String {
        match effect {
            Effect::CreateAccount { full_name, email } => {
                match self
                    .wallet
                    .create_account(&full_name, &email, &session.phone)
                    .await
                {
                    Ok(account) => {
                        let address = account.bitcoin_address.clone();
                        session.wallet = Some(account);
                        session.registration = None;
                        session.state = DialogState::RegisteredIdle;
                        tracing::info!(
                            "Registration completed for {}",
                            mask_phone(&session.phone)
                        );
                        replies::account_created(&address)
                    }
                    Err(e) => {
                        tracing::error!(
                            "Account creation failed for {}: {}",
                            mask_phone(&session.phone),
                            e
                        );
                        replies::registration_failed()
                    }
                }
            }

            Effect::FetchBalance { greeting } => {
                let wallet_id = session
                    .wallet
                    .as_ref()
                    .map(|w| w.wallet_id.clone())
                    .unwrap_or_default();
                match self.wallet.get_balance(&wallet_id).await {
                    Ok(balance) if greeting => replies::welcome_back(Some(balance)),
                    Ok(balance) => {
                        let address = session
                            .wallet
                            .as_ref()
                            .map(|w| w.bitcoin_address.as_str())
                            .unwrap_or_default();
                        replies::balance(balance, address)
                    }
                    Err(e) if greeting => {
                        tracing::warn!("Balance fetch failed on greeting: {}", e);
                        replies::welcome_back(None)
                    }
                    Err(e) => {
                        tracing::error!("Balance fetch failed: {}", e);
                        replies::gateway_unavailable()
                    }
                }
            }

            Effect::FetchHistory => {
                let wallet_id = session
                    .wallet
                    .as_ref()
                    .map(|w| w.wallet_id.clone())
                    .unwrap_or_default();
                match self
                    .wallet
                    .get_history(&wallet_id, self.settings.history_limit)
                    .await
                {
                    Ok(transfers) if transfers.is_empty() => replies::history_empty(),
                    Ok(transfers) => {
                        let entries: Vec<HistoryEntry> = transfers
                            .iter()
                            .map(|t| HistoryEntry {
                                status_marker: match t.status.as_str() {
                                    "success" | "succeeded" | "completed" => "[ok]",
                                    "failed" => "[failed]",
                                    _ => "[pending]",
                                },
                                direction: if t.direction == "receive" {
                                    "Received".to_string()
                                } else {
                                    "Sent".to_string()
                                },
                                amount: replies::format_btc(t.amount),
                                when: t.timestamp.clone(),
                                reference: t.reference.clone(),
                            })
                            .collect();
                        replies::history(&entries)
                    }
                    Err(e) => {
                        tracing::error!("History fetch failed: {}", e);
                        replies::gateway_unavailable()
                    }
                }
            }

            Effect::EstimateFee { request } => {
                // Fee is best-effort decoration; the draft survives without it
                let fee = match self.wallet.estimate_fee(request.amount).await {
                    Ok(fee) => Some(fee),
                    Err(e) => {
                        tracing::warn!("Fee estimate unavailable: {}", e);
                        None
                    }
                };
                let draft = TransactionDraft {
                    amount: request.amount,
                    address: request.address,
                    currency: request.currency,
                    fee,
                    reference: generate_reference(),
                };
                let reply = replies::confirm_transaction(&draft);
                session.draft = Some(draft);
                session.state = DialogState::AwaitingSendConfirm;
                reply
            }

            Effect::DeliverOtp { code } => {
                let message = replies::otp_message(&code, self.settings.otp_expiry_minutes);
                match self.messaging.send_text(&session.phone, &message).await {
                    Ok(()) => {
                        session.state = DialogState::AwaitingOtp;
                        replies::otp_prompt(self.settings.otp_expiry_minutes)
                    }
                    Err(e) => {
                        tracing::error!(
                            "OTP delivery failed for {}: {}",
                            mask_phone(&session.phone),
                            e
                        );
                        self.otp.invalidate(&session.phone, OtpPurpose::Transaction);
                        "We couldn't deliver your code. Reply *YES* to try again or *NO* to cancel."
                            .to_string()
                    }
                }
            }

            Effect::SubmitTransfer { draft } => {
                match self
                    .wallet
                    .create_transfer(
                        session
                            .wallet
                            .as_ref()
                            .map(|w| w.wallet_id.as_str())
                            .unwrap_or_default(),
                        &draft.address,
                        draft.amount,
                        &draft.reference,
                    )
                    .await
                {
                    Ok(receipt) => {
                        self.tx_log.record_submission(
                            &receipt.id,
                            &session.phone,
                            draft.amount,
                            &draft.address,
                            &draft.reference,
                        );
                        tracing::info!(
                            "Transfer {} submitted for {} (reference {})",
                            receipt.id,
                            mask_phone(&session.phone),
                            draft.reference
                        );
                        replies::transaction_submitted(&draft)
                    }
                    Err(e) => {
                        // Recoverable: restore the draft so the user can
                        // reconfirm instead of being stuck mid-call
                        if e.is_timeout() {
                            tracing::warn!(
                                "Transfer submission timed out for {}, draft restored",
                                mask_phone(&session.phone)
                            );
                        } else {
                            tracing::error!(
                                "Transfer submission failed for {}: {}",
                                mask_phone(&session.phone),
                                e
                            );
                        }
                        session.draft = Some(draft);
                        session.state = DialogState::AwaitingSendConfirm;
                        replies::transaction_failed_retry()
                    }
                }
            }
        }
    }
}

fn generate_reference() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("SL-{}", id[..10].to_uppercase())
}

/// Bring provider-formatted sender ids down to a bare E.164-ish number.
pub fn normalize_phone(raw: &str) -> String {
    let stripped = raw.trim().trim_start_matches("whatsapp:");
    let digits: String = stripped.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return stripped.to_string();
    }
    format!("+{}", digits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::models::session::WalletAccount;
    use crate::services::wallet_api::{TransferReceipt, TransferSummary, WalletGateway};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    const PHONE: &str = "+15550001111";

    /// Deterministic custody gateway stand-in.
    struct StubWallet {
        fail_create_account: bool,
        fail_transfer: bool,
        transfers: Mutex<Vec<(String, Decimal)>>,
    }

    impl StubWallet {
        fn ok() -> Self {
            Self {
                fail_create_account: false,
                fail_transfer: false,
                transfers: Mutex::new(Vec::new()),
            }
        }

        fn err() -> GatewayError {
            GatewayError::Api {
                code: "503".to_string(),
                message: "unavailable".to_string(),
            }
        }
    }

    #[async_trait]
    impl WalletGateway for StubWallet {
        async fn create_account(
            &self,
            _full_name: &str,
            _email: &str,
            _phone: &str,
        ) -> Result<WalletAccount, GatewayError> {
            if self.fail_create_account {
                return Err(Self::err());
            }
            Ok(WalletAccount {
                customer_id: "cust-1".to_string(),
                wallet_id: "wallet-1".to_string(),
                bitcoin_address: "bc1qstubaddress".to_string(),
            })
        }

        async fn get_balance(&self, _wallet_id: &str) -> Result<Decimal, GatewayError> {
            Ok(dec!(0.5))
        }

        async fn get_history(
            &self,
            _wallet_id: &str,
            _limit: usize,
        ) -> Result<Vec<TransferSummary>, GatewayError> {
            Ok(vec![])
        }

        async fn estimate_fee(&self, _amount: Decimal) -> Result<Decimal, GatewayError> {
            Ok(dec!(0.00001))
        }

        async fn create_transfer(
            &self,
            _wallet_id: &str,
            address: &str,
            amount: Decimal,
            _reference: &str,
        ) -> Result<TransferReceipt, GatewayError> {
            if self.fail_transfer {
                return Err(Self::err());
            }
            self.transfers.lock().push((address.to_string(), amount));
            Ok(TransferReceipt {
                id: format!("tx-{}", self.transfers.lock().len()),
            })
        }
    }

    /// Captures outbound messages instead of delivering them.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSender {
        fn last_code(&self) -> Option<String> {
            let sent = self.sent.lock();
            let body = &sent.last()?.1;
            let re = regex::Regex::new(r"\d{6}").unwrap();
            re.find(body).map(|m| m.as_str().to_string())
        }
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send_text(&self, to: &str, body: &str) -> Result<(), GatewayError> {
            self.sent.lock().push((to.to_string(), body.to_string()));
            Ok(())
        }
    }

    struct Harness {
        engine: DialogueEngine,
        store: SessionStore,
        tx_log: TransactionLog,
        sender: Arc<RecordingSender>,
        wallet: Arc<StubWallet>,
    }

    fn harness_with(wallet: StubWallet) -> Harness {
        let store = SessionStore::new(30);
        let otp = OtpService::new(5, 3, 10, 300);
        let tx_log = TransactionLog::new();
        let sender = Arc::new(RecordingSender::default());
        let wallet = Arc::new(wallet);
        let settings = DialogueSettings {
            otp_expiry_minutes: 5,
            lockout_cooldown: Duration::minutes(30),
            min_amount: dec!(0.0001),
            max_amount: dec!(1.0),
            history_limit: 5,
        };
        let engine = DialogueEngine::new(
            store.clone(),
            otp,
            tx_log.clone(),
            wallet.clone(),
            sender.clone(),
            settings,
        );
        Harness {
            engine,
            store,
            tx_log,
            sender,
            wallet,
        }
    }

    fn harness() -> Harness {
        harness_with(StubWallet::ok())
    }

    async fn register(h: &Harness) {
        h.engine.handle_message(PHONE, "Hi").await;
        h.engine.handle_message(PHONE, "yes").await;
        h.engine.handle_message(PHONE, "Jane Doe").await;
        h.engine.handle_message(PHONE, "jane@example.com").await;
    }

    fn state_of(h: &Harness) -> DialogState {
        h.store.get(PHONE).unwrap().state
    }

    #[tokio::test]
    async fn test_registration_flow() {
        let h = harness();

        h.engine.handle_message(PHONE, "Hi").await;
        assert_eq!(state_of(&h), DialogState::AwaitingRegistrationConfirm);

        h.engine.handle_message(PHONE, "yes").await;
        assert_eq!(state_of(&h), DialogState::AwaitingName);

        h.engine.handle_message(PHONE, "Jane Doe").await;
        assert_eq!(state_of(&h), DialogState::AwaitingEmail);

        let reply = h.engine.handle_message(PHONE, "jane@example.com").await;
        assert_eq!(state_of(&h), DialogState::RegisteredIdle);
        assert!(reply.contains("bc1qstubaddress"));

        let session = h.store.get(PHONE).unwrap();
        assert_eq!(
            session.wallet.unwrap().bitcoin_address,
            "bc1qstubaddress"
        );
    }

    #[tokio::test]
    async fn test_registration_declined() {
        let h = harness();
        h.engine.handle_message(PHONE, "Hi").await;
        h.engine.handle_message(PHONE, "no").await;
        assert_eq!(state_of(&h), DialogState::New);
        assert!(h.store.get(PHONE).unwrap().wallet.is_none());
    }

    #[tokio::test]
    async fn test_registration_gateway_failure_stays_awaiting_email() {
        let h = harness_with(StubWallet {
            fail_create_account: true,
            ..StubWallet::ok()
        });
        h.engine.handle_message(PHONE, "Hi").await;
        h.engine.handle_message(PHONE, "yes").await;
        h.engine.handle_message(PHONE, "Jane Doe").await;
        let reply = h.engine.handle_message(PHONE, "jane@example.com").await;
        assert_eq!(state_of(&h), DialogState::AwaitingEmail);
        assert!(reply.contains("try again"));
    }

    #[tokio::test]
    async fn test_invalid_email_reprompts() {
        let h = harness();
        h.engine.handle_message(PHONE, "Hi").await;
        h.engine.handle_message(PHONE, "yes").await;
        h.engine.handle_message(PHONE, "Jane Doe").await;
        h.engine.handle_message(PHONE, "not-an-email").await;
        assert_eq!(state_of(&h), DialogState::AwaitingEmail);
    }

    #[tokio::test]
    async fn test_send_flow_with_otp() {
        let h = harness();
        register(&h).await;

        let reply = h
            .engine
            .handle_message(PHONE, "send 0.001 BTC to 1ABCxyz")
            .await;
        assert_eq!(state_of(&h), DialogState::AwaitingSendConfirm);
        assert!(reply.contains("0.00100000"));

        h.engine.handle_message(PHONE, "yes").await;
        assert_eq!(state_of(&h), DialogState::AwaitingOtp);

        let code = h.sender.last_code().expect("OTP was delivered");
        let reply = h.engine.handle_message(PHONE, &code).await;
        assert_eq!(state_of(&h), DialogState::RegisteredIdle);
        assert!(reply.contains("submitted"));

        assert_eq!(
            h.wallet.transfers.lock().as_slice(),
            &[("1ABCxyz".to_string(), dec!(0.001))]
        );
        assert_eq!(h.tx_log.total(), 1);
        assert!(h.store.get(PHONE).unwrap().draft.is_none());
    }

    #[tokio::test]
    async fn test_send_cancelled_at_confirmation() {
        let h = harness();
        register(&h).await;
        h.engine
            .handle_message(PHONE, "send 0.001 BTC to 1ABCxyz")
            .await;
        let reply = h.engine.handle_message(PHONE, "no").await;
        assert_eq!(state_of(&h), DialogState::RegisteredIdle);
        assert!(reply.contains("cancelled"));
        assert!(h.store.get(PHONE).unwrap().draft.is_none());
        assert!(h.wallet.transfers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_otp_exhaustion_locks_account() {
        let h = harness();
        register(&h).await;
        h.engine
            .handle_message(PHONE, "send 0.001 BTC to 1ABCxyz")
            .await;
        h.engine.handle_message(PHONE, "yes").await;

        let code = h.sender.last_code().unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        h.engine.handle_message(PHONE, wrong).await;
        h.engine.handle_message(PHONE, wrong).await;
        let reply = h.engine.handle_message(PHONE, wrong).await;

        assert_eq!(state_of(&h), DialogState::Locked);
        assert!(reply.contains("locked"));
        assert!(h.store.get(PHONE).unwrap().draft.is_none());

        // Even the correct code is refused while locked
        let reply = h.engine.handle_message(PHONE, &code).await;
        assert!(reply.contains("locked"));
        assert!(h.wallet.transfers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_lockout_elapses() {
        let h = harness();
        register(&h).await;
        let mut session = h.store.get(PHONE).unwrap();
        session.state = DialogState::Locked;
        session.locked_until = Some(Utc::now() - Duration::minutes(1));
        h.store.upsert(session);

        let reply = h.engine.handle_message(PHONE, "balance").await;
        assert_eq!(state_of(&h), DialogState::RegisteredIdle);
        assert!(reply.contains("0.50000000"));
    }

    #[tokio::test]
    async fn test_transfer_failure_restores_draft() {
        let h = harness_with(StubWallet {
            fail_transfer: true,
            ..StubWallet::ok()
        });
        register(&h).await;
        h.engine
            .handle_message(PHONE, "send 0.001 BTC to 1ABCxyz")
            .await;
        h.engine.handle_message(PHONE, "yes").await;

        let code = h.sender.last_code().unwrap();
        let reply = h.engine.handle_message(PHONE, &code).await;

        assert_eq!(state_of(&h), DialogState::AwaitingSendConfirm);
        assert!(h.store.get(PHONE).unwrap().draft.is_some());
        assert!(reply.contains("try again"));
        assert_eq!(h.tx_log.total(), 0);
    }

    #[tokio::test]
    async fn test_used_otp_cannot_authorize_twice() {
        let h = harness();
        register(&h).await;
        h.engine
            .handle_message(PHONE, "send 0.001 BTC to 1ABCxyz")
            .await;
        h.engine.handle_message(PHONE, "yes").await;
        let code = h.sender.last_code().unwrap();
        h.engine.handle_message(PHONE, &code).await;
        assert_eq!(h.wallet.transfers.lock().len(), 1);

        // Start a second draft and replay the first code
        h.engine
            .handle_message(PHONE, "send 0.002 BTC to 1ABCxyz")
            .await;
        h.engine.handle_message(PHONE, "yes").await;
        let second_code = h.sender.last_code().unwrap();
        if second_code != code {
            let reply = h.engine.handle_message(PHONE, &code).await;
            assert_eq!(h.wallet.transfers.lock().len(), 1);
            assert!(reply.contains("attempts remaining"));
        }
    }

    #[tokio::test]
    async fn test_send_parse_error_keeps_state() {
        let h = harness();
        register(&h).await;
        let reply = h.engine.handle_message(PHONE, "send abc to 1ABC").await;
        assert_eq!(state_of(&h), DialogState::RegisteredIdle);
        assert!(reply.contains("Couldn't read that transfer"));
    }

    #[tokio::test]
    async fn test_amount_limits_enforced() {
        let h = harness();
        register(&h).await;
        let reply = h
            .engine
            .handle_message(PHONE, "send 0.00001 btc to 1ABCxyz")
            .await;
        assert!(reply.contains("below minimum"));
        let reply = h.engine.handle_message(PHONE, "send 2 btc to 1ABCxyz").await;
        assert!(reply.contains("above maximum"));
        assert_eq!(state_of(&h), DialogState::RegisteredIdle);
    }

    #[tokio::test]
    async fn test_unrecognized_input_is_harmless() {
        let h = harness();
        register(&h).await;
        let before = h.store.get(PHONE).unwrap();
        let reply = h.engine.handle_message(PHONE, "gibberish words").await;
        let after = h.store.get(PHONE).unwrap();
        assert_eq!(before.state, after.state);
        assert!(reply.contains("didn't understand"));
    }

    #[tokio::test]
    async fn test_interleaved_messages_serialize() {
        let h = harness();
        register(&h).await;

        // Fire two sends concurrently for the same phone; per-phone locking
        // means both turns complete with a coherent state + draft combination
        let (a, b) = tokio::join!(
            h.engine.handle_message(PHONE, "send 0.001 BTC to 1ABCxyz"),
            h.engine.handle_message(PHONE, "send 0.002 BTC to 1ABCxyz"),
        );
        assert!(!a.is_empty());
        assert!(!b.is_empty());

        let session = h.store.get(PHONE).unwrap();
        assert_eq!(session.state, DialogState::AwaitingSendConfirm);
        let draft = session.draft.expect("draft exists in confirm state");
        assert!(draft.amount == dec!(0.001) || draft.amount == dec!(0.002));
    }

    #[tokio::test]
    async fn test_greeting_when_registered_shows_balance() {
        let h = harness();
        register(&h).await;
        let reply = h.engine.handle_message(PHONE, "hi").await;
        assert!(reply.contains("Welcome back"));
        assert!(reply.contains("0.50000000"));
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("whatsapp:+1 555 000 1111"), "+15550001111");
        assert_eq!(normalize_phone("+15550001111"), "+15550001111");
        assert_eq!(normalize_phone("15550001111"), "+15550001111");
    }
}
