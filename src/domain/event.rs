use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LoanId;

pub type LoanEventId = Uuid;

/// Domain events emitted by successful lifecycle transitions.
/// `request_loan` emits nothing; the fresh id is the caller's receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanEventKind {
    LoanFunded,
    LoanRepaid,
    CollateralClaimed,
}

impl LoanEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanEventKind::LoanFunded => "loan_funded",
            LoanEventKind::LoanRepaid => "loan_repaid",
            LoanEventKind::CollateralClaimed => "collateral_claimed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "loan_funded" => Some(LoanEventKind::LoanFunded),
            "loan_repaid" => Some(LoanEventKind::LoanRepaid),
            "collateral_claimed" => Some(LoanEventKind::CollateralClaimed),
            _ => None,
        }
    }
}

impl std::fmt::Display for LoanEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in the append-only event log, written in the same transaction
/// as the state mutation it records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanEvent {
    pub id: LoanEventId,
    pub loan_id: LoanId,
    pub kind: LoanEventKind,
    pub at: DateTime<Utc>,
}

impl LoanEvent {
    pub fn new(loan_id: LoanId, kind: LoanEventKind, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            kind,
            at,
        }
    }
}
