use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{ParseError, ValidationError};

lazy_static! {
    // "send 0.001 btc to 1ABCxyz" / "transfer 50000 sats to bc1q..."
    static ref SEND_REGEX: Regex = Regex::new(
        r"(?i)^(?:send|transfer|pay)\s+(\S+)\s*(btc|sats?)?\s+to\s+(\S+)$"
    ).unwrap();

    static ref OTP_REGEX: Regex = Regex::new(r"^\d{6}$").unwrap();

    // Shape check only; real validation belongs to the custody gateway
    static ref ADDRESS_REGEX: Regex = Regex::new(r"^[A-Za-z0-9]{4,90}$").unwrap();
}

const SATS_PER_BTC: u64 = 100_000_000;

/// Parsed user intent. Produced by `parse`, consumed exhaustively by the
/// dialogue state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Greeting,
    Affirmative,
    Negative,
    Balance,
    History,
    Address,
    Help,
    OtpCode(String),
    Send(SendRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub amount: Decimal,
    pub address: String,
    pub currency: String,
}

/// Extract an intent from free text. Case-insensitive, whitespace-tolerant.
/// Anything ambiguous or malformed is a `ParseError`, never a guess.
pub fn parse(text: &str) -> Result<Intent, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    if OTP_REGEX.is_match(trimmed) {
        return Ok(Intent::OtpCode(trimmed.to_string()));
    }

    if let Some(caps) = SEND_REGEX.captures(trimmed) {
        return parse_send(&caps[1], caps.get(2).map(|m| m.as_str()), &caps[3]).map(Intent::Send);
    }

    let lower = trimmed.to_lowercase();

    // Single-token commands match on the whole word, not substrings
    match lower.as_str() {
        "hi" | "hello" | "hey" | "start" | "begin" => return Ok(Intent::Greeting),
        "yes" | "y" | "ok" | "okay" | "confirm" | "sure" => return Ok(Intent::Affirmative),
        "no" | "n" | "cancel" | "stop" => return Ok(Intent::Negative),
        "balance" | "bal" | "funds" => return Ok(Intent::Balance),
        "history" | "transactions" | "activity" => return Ok(Intent::History),
        "address" | "receive" | "deposit" => return Ok(Intent::Address),
        "help" | "support" | "menu" => return Ok(Intent::Help),
        _ => {}
    }

    // A send-ish verb that failed the full pattern deserves a format hint
    if lower.starts_with("send ") || lower.starts_with("transfer ") || lower.starts_with("pay ") {
        return Err(ParseError::MalformedSend);
    }

    Err(ParseError::Unrecognized)
}

fn parse_send(
    amount_str: &str,
    unit: Option<&str>,
    address: &str,
) -> Result<SendRequest, ParseError> {
    let raw = Decimal::from_str(amount_str)
        .map_err(|_| ParseError::InvalidAmount(format!("'{}' is not a number", amount_str)))?;

    let unit_lower = unit.map(|u| u.to_lowercase());
    let amount = match unit_lower.as_deref() {
        Some("sat") | Some("sats") => {
            if raw.fract() != Decimal::ZERO {
                return Err(ParseError::InvalidAmount(
                    "satoshi amounts must be whole numbers".to_string(),
                ));
            }
            raw / Decimal::from(SATS_PER_BTC)
        }
        _ => raw,
    };

    if amount <= Decimal::ZERO {
        return Err(ParseError::InvalidAmount(
            "amount must be greater than zero".to_string(),
        ));
    }
    // Satoshi precision, no silent rounding
    if amount.normalize().scale() > 8 {
        return Err(ParseError::InvalidAmount(
            "too many decimal places (maximum 8)".to_string(),
        ));
    }
    if amount > Decimal::from(21_000_000u32) {
        return Err(ParseError::InvalidAmount(
            "amount exceeds total supply".to_string(),
        ));
    }

    if !ADDRESS_REGEX.is_match(address) {
        return Err(ParseError::InvalidAddress(format!(
            "'{}' does not look like a Bitcoin address",
            address
        )));
    }

    Ok(SendRequest {
        amount,
        address: address.to_string(),
        currency: "BTC".to_string(),
    })
}

/// Syntactic email check; the gateway does its own verification. Returns the
/// trimmed, lowercased address.
pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    lazy_static! {
        static ref EMAIL_REGEX: Regex =
            Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
    }
    let email = email.trim().to_lowercase();
    if email.len() > 254 || email.contains("..") || !EMAIL_REGEX.is_match(&email) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(email)
}

/// Full names need at least two parts of plausible characters.
pub fn validate_full_name(name: &str) -> Result<String, ValidationError> {
    lazy_static! {
        static ref NAME_REGEX: Regex = Regex::new(r"^[a-zA-Z\s\-']+$").unwrap();
    }
    let name = name.trim();
    if name.len() < 2
        || name.len() > 100
        || !NAME_REGEX.is_match(name)
        || name.split_whitespace().count() < 2
    {
        return Err(ValidationError::InvalidName);
    }
    Ok(name.to_string())
}
