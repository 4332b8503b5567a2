use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, LoanId, PartyId};

pub type CustodyTransferId = Uuid;

/// Who holds value at either end of a custody move.
///
/// `Escrow` is the ledger's own custody account: collateral lives there from
/// request until exactly one of return (repayment) or forfeiture (claim).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Holder {
    Escrow,
    Party(PartyId),
}

impl Holder {
    /// Encode for storage: "escrow" or the party uuid.
    pub fn as_db_str(&self) -> String {
        match self {
            Holder::Escrow => "escrow".to_string(),
            Holder::Party(id) => id.to_string(),
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        if s == "escrow" {
            Some(Holder::Escrow)
        } else {
            Uuid::parse_str(s).ok().map(Holder::Party)
        }
    }
}

/// Why a custody move happened. One reason per lifecycle transfer leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyReason {
    /// Borrower -> escrow, at request.
    CollateralDeposit,
    /// Lender -> borrower, at funding.
    PrincipalDisbursement,
    /// Borrower -> lender, at repayment.
    Repayment,
    /// Escrow -> borrower, at repayment.
    CollateralReturn,
    /// Escrow -> lender, at claim.
    CollateralForfeiture,
}

impl CustodyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustodyReason::CollateralDeposit => "collateral_deposit",
            CustodyReason::PrincipalDisbursement => "principal_disbursement",
            CustodyReason::Repayment => "repayment",
            CustodyReason::CollateralReturn => "collateral_return",
            CustodyReason::CollateralForfeiture => "collateral_forfeiture",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "collateral_deposit" => Some(CustodyReason::CollateralDeposit),
            "principal_disbursement" => Some(CustodyReason::PrincipalDisbursement),
            "repayment" => Some(CustodyReason::Repayment),
            "collateral_return" => Some(CustodyReason::CollateralReturn),
            "collateral_forfeiture" => Some(CustodyReason::CollateralForfeiture),
            _ => None,
        }
    }
}

impl std::fmt::Display for CustodyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An atomic "debit source, credit destination" record. The custody log is
/// append-only; balances are derived by folding it, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyTransfer {
    pub id: CustodyTransferId,
    /// The loan whose lifecycle produced this move.
    pub loan_id: LoanId,
    pub from: Holder,
    pub to: Holder,
    /// Always positive.
    pub amount_cents: Cents,
    pub reason: CustodyReason,
    pub at: DateTime<Utc>,
}

impl CustodyTransfer {
    pub fn new(
        loan_id: LoanId,
        from: Holder,
        to: Holder,
        amount_cents: Cents,
        reason: CustodyReason,
        at: DateTime<Utc>,
    ) -> Self {
        assert!(amount_cents > 0, "custody transfer amount must be positive");
        Self {
            id: Uuid::new_v4(),
            loan_id,
            from,
            to,
            amount_cents,
            reason,
            at,
        }
    }
}

/// Fold the custody log into the balance of a single holder.
pub fn compute_balance(holder: Holder, transfers: &[CustodyTransfer]) -> Cents {
    transfers.iter().fold(0, |balance, t| {
        if t.to == holder {
            balance + t.amount_cents
        } else if t.from == holder {
            balance - t.amount_cents
        } else {
            balance
        }
    })
}

/// Fold the custody log into a balance per holder. Since every transfer
/// debits one holder and credits another, the balances always sum to zero.
pub fn compute_all_balances(transfers: &[CustodyTransfer]) -> HashMap<Holder, Cents> {
    let mut balances: HashMap<Holder, Cents> = HashMap::new();
    for t in transfers {
        *balances.entry(t.from).or_insert(0) -= t.amount_cents;
        *balances.entry(t.to).or_insert(0) += t.amount_cents;
    }
    balances
}
