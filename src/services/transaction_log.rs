//! Record of transfers accepted by the custody gateway, keyed by the
//! gateway's transaction id. Status webhooks apply idempotently: a record
//! that reached a terminal status never changes again, so duplicate or
//! out-of-order deliveries are harmless.

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::transaction::{TransactionRecord, TransactionStatus};

#[derive(Clone, Default)]
pub struct TransactionLog {
    records: Arc<RwLock<HashMap<String, TransactionRecord>>>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly submitted transfer as pending. If the id is already
    /// known (gateway retried our submission), the existing record wins.
    pub fn record_submission(
        &self,
        external_id: &str,
        phone: &str,
        amount: Decimal,
        address: &str,
        reference: &str,
    ) {
        let mut records = self.records.write();
        if records.contains_key(external_id) {
            return;
        }
        let now = Utc::now();
        records.insert(
            external_id.to_string(),
            TransactionRecord {
                external_id: external_id.to_string(),
                phone: phone.to_string(),
                amount,
                address: address.to_string(),
                reference: reference.to_string(),
                status: TransactionStatus::Pending,
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Apply a status update from the gateway webhook. Returns the updated
    /// record when the transition was applied, `None` when it was a no-op
    /// (unknown id or already terminal).
    pub fn apply_status(
        &self,
        external_id: &str,
        status: TransactionStatus,
    ) -> Option<TransactionRecord> {
        let mut records = self.records.write();
        let record = records.get_mut(external_id)?;
        if record.status.is_terminal() {
            tracing::debug!(
                "Ignoring status update for terminal transaction {}",
                external_id
            );
            return None;
        }
        record.status = status;
        record.updated_at = Utc::now();
        Some(record.clone())
    }

    pub fn get(&self, external_id: &str) -> Option<TransactionRecord> {
        self.records.read().get(external_id).cloned()
    }

    pub fn total(&self) -> usize {
        self.records.read().len()
    }

    pub fn pending(&self) -> usize {
        self.records
            .read()
            .values()
            .filter(|r| r.status == TransactionStatus::Pending)
            .count()
    }
}
