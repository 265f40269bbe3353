//! One-time code issuance and validation for sensitive actions.
//!
//! Challenges are keyed by (phone, purpose). At most one challenge is active
//! per key; issuing a new code invalidates the previous one. Validation is
//! single-use: a code that verified once can never verify again.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::Rng;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::OtpError;

pub const OTP_LENGTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtpPurpose {
    Transaction,
    Registration,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Transaction => "transaction",
            OtpPurpose::Registration => "registration",
        }
    }
}

#[derive(Debug, Clone)]
struct OtpChallenge {
    code: String,
    expires_at: DateTime<Utc>,
    remaining_attempts: u32,
    consumed: bool,
}

#[derive(Clone)]
pub struct OtpService {
    expiry: Duration,
    max_attempts: u32,
    issue_limit: usize,
    issue_window: Duration,
    challenges: Arc<RwLock<HashMap<(String, OtpPurpose), OtpChallenge>>>,
    issue_log: Arc<RwLock<HashMap<String, Vec<DateTime<Utc>>>>>,
}

impl OtpService {
    pub fn new(
        expiry_minutes: i64,
        max_attempts: u32,
        issue_limit: usize,
        issue_window_secs: u64,
    ) -> Self {
        Self {
            expiry: Duration::minutes(expiry_minutes),
            max_attempts,
            issue_limit,
            issue_window: Duration::seconds(issue_window_secs as i64),
            challenges: Arc::new(RwLock::new(HashMap::new())),
            issue_log: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Issue a fresh code, invalidating any prior active challenge for the
    /// same (phone, purpose). Abuse-guarded by a rolling per-phone window.
    pub fn issue(&self, phone: &str, purpose: OtpPurpose) -> Result<String, OtpError> {
        self.issue_at(phone, purpose, Utc::now())
    }

    fn issue_at(
        &self,
        phone: &str,
        purpose: OtpPurpose,
        now: DateTime<Utc>,
    ) -> Result<String, OtpError> {
        {
            let mut log = self.issue_log.write();
            let issued = log.entry(phone.to_string()).or_default();
            issued.retain(|t| now - *t < self.issue_window);
            if issued.len() >= self.issue_limit {
                tracing::warn!("OTP issue rate limit hit for {}", mask_phone(phone));
                return Err(OtpError::RateLimitExceeded);
            }
            issued.push(now);
        }

        let code = generate_code();
        let challenge = OtpChallenge {
            code: code.clone(),
            expires_at: now + self.expiry,
            remaining_attempts: self.max_attempts,
            consumed: false,
        };

        // Insert replaces any previous challenge for the key
        self.challenges
            .write()
            .insert((phone.to_string(), purpose), challenge);

        tracing::info!(
            "Issued {} OTP for {}",
            purpose.as_str(),
            mask_phone(phone)
        );
        Ok(code)
    }

    /// Validate a candidate code. Success consumes the challenge; any
    /// subsequent validation for the same key fails with `NotFound`.
    pub fn validate(
        &self,
        phone: &str,
        purpose: OtpPurpose,
        candidate: &str,
    ) -> Result<(), OtpError> {
        self.validate_at(phone, purpose, candidate, Utc::now())
    }

    fn validate_at(
        &self,
        phone: &str,
        purpose: OtpPurpose,
        candidate: &str,
        now: DateTime<Utc>,
    ) -> Result<(), OtpError> {
        let key = (phone.to_string(), purpose);
        let mut challenges = self.challenges.write();

        let challenge = match challenges.get_mut(&key) {
            Some(c) if !c.consumed => c,
            _ => return Err(OtpError::NotFound),
        };

        if now > challenge.expires_at {
            challenges.remove(&key);
            tracing::warn!("Expired OTP presented by {}", mask_phone(phone));
            return Err(OtpError::Expired);
        }

        if challenge.code != candidate {
            challenge.remaining_attempts = challenge.remaining_attempts.saturating_sub(1);
            let remaining = challenge.remaining_attempts;
            if remaining == 0 {
                challenges.remove(&key);
                tracing::warn!("OTP attempts exhausted for {}", mask_phone(phone));
                return Err(OtpError::Exhausted);
            }
            return Err(OtpError::Mismatch { remaining });
        }

        challenge.consumed = true;
        tracing::info!("OTP verified for {}", mask_phone(phone));
        Ok(())
    }

    /// Drop the active challenge for a key, if any (e.g. on cancel).
    pub fn invalidate(&self, phone: &str, purpose: OtpPurpose) {
        self.challenges
            .write()
            .remove(&(phone.to_string(), purpose));
    }

    /// Sweep consumed and expired challenges. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut challenges = self.challenges.write();
        let before = challenges.len();
        challenges.retain(|_, c| !c.consumed && now <= c.expires_at);
        before - challenges.len()
    }

    pub fn active_count(&self) -> usize {
        self.challenges.read().len()
    }
}

fn generate_code() -> String {
    let n: u32 = OsRng.gen_range(0..1_000_000);
    format!("{:0width$}", n, width = OTP_LENGTH)
}

/// Show only the last four digits in logs.
pub fn mask_phone(phone: &str) -> String {
    if phone.len() <= 4 {
        return "*".repeat(phone.len());
    }
    format!("{}{}", "*".repeat(phone.len() - 4), &phone[phone.len() - 4..])
}
