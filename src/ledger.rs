// ===============================
// src/ledger.rs (Payment Ledger)
// ===============================
//
// Append-only, in-memory. Satu instance dimiliki main.rs lalu di-share (Arc)
// ke consumer, HTTP handler dan health reporter.
//
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::{PaymentRecord, PaymentStatus};
use crate::metrics::{PAYMENTS, PAYMENTS_AMOUNT};

/// Result of an append. The ledger is idempotent by `order_id`: a second
/// append for the same order returns the record already stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Appended {
    New(PaymentRecord),
    Existing(PaymentRecord),
}

impl Appended {
    pub fn record(&self) -> &PaymentRecord {
        match self {
            Appended::New(r) | Appended::Existing(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Appended::New(_))
    }
}

#[derive(Debug, Default)]
pub struct PaymentLedger {
    records: RwLock<Vec<PaymentRecord>>,
}

impl PaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<PaymentRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<PaymentRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a payment. Ids are `last.id + 1` (1 when empty). Counters are
    /// updated here so HTTP and broker appends look the same on /metrics.
    pub fn append(
        &self,
        order_id: i64,
        amount: f64,
        method: impl Into<String>,
        status: PaymentStatus,
    ) -> Appended {
        let mut records = self.write();
        if let Some(existing) = records.iter().find(|r| r.order_id == order_id) {
            return Appended::Existing(existing.clone());
        }

        let id = records.last().map(|r| r.id + 1).unwrap_or(1);
        let record = PaymentRecord { id, order_id, amount, status, method: method.into() };
        records.push(record.clone());

        let total: f64 = records.iter().map(|r| r.amount).sum();
        drop(records);

        PAYMENTS.with_label_values(&[status.as_str()]).inc();
        PAYMENTS_AMOUNT.set(total);
        Appended::New(record)
    }

    /// Snapshot in insertion order.
    pub fn all(&self) -> Vec<PaymentRecord> {
        self.read().clone()
    }

    pub fn find_by_order(&self, order_id: i64) -> Option<PaymentRecord> {
        self.read().iter().find(|r| r.order_id == order_id).cloned()
    }

    pub fn total_amount(&self) -> f64 {
        self.read().iter().map(|r| r.amount).sum()
    }

    pub fn count_by_status(&self, status: PaymentStatus) -> usize {
        self.read().iter().filter(|r| r.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
