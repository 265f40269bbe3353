use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Succeeded | TransactionStatus::Failed)
    }
}

/// A transfer the custody gateway has accepted, keyed by its external
/// transaction id. Updated by the gateway's status webhook; immutable once
/// terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub external_id: String,
    pub phone: String,
    pub amount: Decimal,
    pub address: String,
    pub reference: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
