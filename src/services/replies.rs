//! Outbound reply copy. WhatsApp markdown (*bold*, `mono`), kept in one
//! place so the dialogue engine stays free of string soup.

use rust_decimal::Decimal;

use crate::models::session::TransactionDraft;
use crate::models::transaction::TransactionRecord;

pub fn welcome() -> String {
    "*Welcome to SatLink!*\n\n\
     Bitcoin in your pocket, on WhatsApp.\n\n\
     I can help you:\n\
     • Create a Bitcoin wallet\n\
     • Send Bitcoin to anyone\n\
     • Check your balance and history\n\n\
     Reply *YES* to create your account, or *HELP* for assistance."
        .to_string()
}

pub fn registration_declined() -> String {
    "No problem. Message *HI* whenever you want to set up your wallet.".to_string()
}

pub fn ask_name() -> String {
    "Great! Let's create your Bitcoin wallet.\n\nPlease send your full name (first and last):"
        .to_string()
}

pub fn ask_email() -> String {
    "Thank you! Now please send your email address:".to_string()
}

pub fn invalid_name() -> String {
    "That doesn't look like a full name.\n\nPlease send your first and last name:".to_string()
}

pub fn invalid_email() -> String {
    "That doesn't look like a valid email.\n\nPlease send your email address:".to_string()
}

pub fn account_created(address: &str) -> String {
    format!(
        "*Account created!*\n\n\
         Your Bitcoin wallet is ready:\n\
         Address: `{}`\n\
         Balance: 0.00000000 BTC\n\n\
         Try: \"Send 0.001 BTC to <address>\", *BALANCE*, or *HELP*.\n\n\
         _Every transfer is protected by a one-time code._",
        address
    )
}

pub fn registration_failed() -> String {
    "We couldn't create your wallet right now. Please resend your email address to try again."
        .to_string()
}

pub fn welcome_back(balance: Option<Decimal>) -> String {
    match balance {
        Some(b) => format!(
            "Hello! Welcome back to SatLink. Your balance is {} BTC. How can I help?",
            format_btc(b)
        ),
        None => "Hello! Welcome back to SatLink. How can I help?".to_string(),
    }
}

pub fn balance(amount: Decimal, address: &str) -> String {
    format!(
        "*Your Bitcoin balance*\n\n\
         Balance: {} BTC\n\
         Address: `{}`\n\n\
         To receive Bitcoin, share your address with the sender.",
        format_btc(amount),
        address
    )
}

pub fn your_address(address: &str) -> String {
    format!(
        "*Your Bitcoin address*\n\n\
         `{}`\n\n\
         Share this address to receive Bitcoin.\n\
         Only send Bitcoin (BTC) to this address.",
        address
    )
}

pub fn history_empty() -> String {
    "*Transaction history*\n\nNo transactions yet. Your wallet is ready to send and receive."
        .to_string()
}

pub fn history(records: &[HistoryEntry]) -> String {
    let mut text = String::from("*Transaction history*\n\n");
    for entry in records {
        text.push_str(&format!(
            "{} {} {} BTC\n   {}\n   Ref: {}\n\n",
            entry.status_marker, entry.direction, entry.amount, entry.when, entry.reference
        ));
    }
    text.trim_end().to_string()
}

pub struct HistoryEntry {
    pub status_marker: &'static str,
    pub direction: String,
    pub amount: String,
    pub when: String,
    pub reference: String,
}

pub fn confirm_transaction(draft: &TransactionDraft) -> String {
    let fee_line = draft
        .fee
        .map(|f| format!("\nNetwork fee: {} BTC", format_btc(f)))
        .unwrap_or_default();
    format!(
        "*Confirm transaction*\n\n\
         Amount: {} {}\n\
         To: `{}`\n\
         Reference: {}{}\n\n\
         Check the address carefully.\n\
         Reply *YES* to confirm or *NO* to cancel.",
        format_btc(draft.amount),
        draft.currency,
        truncate_address(&draft.address),
        draft.reference,
        fee_line
    )
}

pub fn otp_prompt(expiry_minutes: i64) -> String {
    format!(
        "*Security check*\n\n\
         A one-time code has been sent to your number.\n\
         Enter the 6-digit code to authorize the transfer.\n\n\
         The code expires in {} minutes. Reply *CANCEL* to abort.",
        expiry_minutes
    )
}

pub fn otp_message(code: &str, expiry_minutes: i64) -> String {
    format!(
        "*SatLink security code*\n\n\
         Your transaction code is: *{}*\n\n\
         It expires in {} minutes. Never share this code.",
        code, expiry_minutes
    )
}

pub fn transaction_submitted(draft: &TransactionDraft) -> String {
    format!(
        "*Transfer submitted*\n\n\
         Sent: {} {}\n\
         To: `{}`\n\
         Reference: {}\n\n\
         You'll get a confirmation as soon as it settles.",
        format_btc(draft.amount),
        draft.currency,
        truncate_address(&draft.address),
        draft.reference
    )
}

pub fn transaction_cancelled() -> String {
    "Transaction cancelled. Your Bitcoin stays in your wallet.".to_string()
}

pub fn transaction_failed_retry() -> String {
    "The transfer could not be submitted. Your draft is still here — reply *YES* to try again or *NO* to cancel."
        .to_string()
}

pub fn transaction_confirmed(record: &TransactionRecord) -> String {
    format!(
        "*Transaction confirmed!*\n\n\
         Reference: {}\n\
         Status: completed",
        record.reference
    )
}

pub fn transaction_failed_notice(record: &TransactionRecord, reason: Option<&str>) -> String {
    format!(
        "*Transaction failed*\n\n\
         Reference: {}\n\
         Reason: {}",
        record.reference,
        reason.unwrap_or("unknown")
    )
}

pub fn locked(minutes_left: i64) -> String {
    format!(
        "Too many incorrect codes. Your account is locked for about {} more minutes. Please try again later.",
        minutes_left.max(1)
    )
}

pub fn otp_mismatch(remaining: u32) -> String {
    format!(
        "Incorrect code, {} attempts remaining.\n\nEnter the 6-digit code, or reply *CANCEL*.",
        remaining
    )
}

pub fn otp_expired() -> String {
    "That code has expired. Reply *YES* to get a new code or *NO* to cancel.".to_string()
}

pub fn need_confirmation() -> String {
    "Please reply *YES* to confirm the transaction or *NO* to cancel.".to_string()
}

pub fn need_otp() -> String {
    "Please enter the 6-digit code sent to your number, or reply *CANCEL*.".to_string()
}

pub fn gateway_unavailable() -> String {
    "We couldn't reach the wallet service. Please try again in a moment.".to_string()
}

pub fn help() -> String {
    "*SatLink help*\n\n\
     Commands:\n\
     • Send 0.001 BTC to <address> — send Bitcoin\n\
     • *BALANCE* — check your balance\n\
     • *HISTORY* — recent transactions\n\
     • *ADDRESS* — your receive address\n\
     • *HELP* — this message\n\n\
     Every transfer needs a one-time code. Never share your codes."
        .to_string()
}

pub fn unknown_command() -> String {
    "I didn't understand that.\n\nTry *BALANCE*, *HISTORY*, \"Send 0.001 BTC to <address>\", or *HELP*."
        .to_string()
}

pub fn not_registered() -> String {
    "You don't have a wallet yet. Message *HI* to create one.".to_string()
}

pub fn format_btc(amount: Decimal) -> String {
    format!("{:.8}", amount)
}

pub fn truncate_address(address: &str) -> String {
    if address.len() <= 13 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}
