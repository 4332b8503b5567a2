use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, PartyId};

/// Loan identifiers are chosen by the requester. Once used, an id is occupied
/// forever: terminal loans stay queryable and their ids are never recycled.
pub type LoanId = u64;

/// Derived lifecycle state. REQUESTED and FUNDED are the only non-terminal
/// states; REPAID and FORFEITED are terminal and mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Requested,
    Funded,
    Repaid,
    Forfeited,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Requested => "requested",
            LoanStatus::Funded => "funded",
            LoanStatus::Repaid => "repaid",
            LoanStatus::Forfeited => "forfeited",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "requested" => Some(LoanStatus::Requested),
            "funded" => Some(LoanStatus::Funded),
            "repaid" => Some(LoanStatus::Repaid),
            "forfeited" => Some(LoanStatus::Forfeited),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Repaid | LoanStatus::Forfeited)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One collateral-backed loan. Created by a request, mutated in place by the
/// lifecycle transitions, never deleted.
///
/// Flags are monotone: `is_funded`, `is_repaid` and `is_discharged` only ever
/// flip from false to true. Exactly one of repayment or forfeiture discharges
/// a loan; `is_repaid` distinguishes the two terminal outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    /// Party that escrowed collateral and requested the loan.
    pub borrower: PartyId,
    /// Party that funded the loan. None until funding, immutable after.
    pub lender: Option<PartyId>,
    /// Value escrowed at request time.
    pub collateral_cents: Cents,
    /// Principal disbursed at funding and owed back at repayment.
    pub principal_cents: Cents,
    /// Repayment window, measured from funding.
    pub duration_secs: i64,
    /// Deadline, computed once when the loan is funded.
    pub due_at: Option<DateTime<Utc>>,
    pub is_funded: bool,
    pub is_repaid: bool,
    pub is_discharged: bool,
    pub requested_at: DateTime<Utc>,
}

impl Loan {
    /// Create a loan in the REQUESTED state.
    ///
    /// The principal equals the collateral: this ledger has no interest model,
    /// so the amount disbursed at funding is also the amount owed back.
    pub fn request(
        id: LoanId,
        borrower: PartyId,
        collateral_cents: Cents,
        duration_secs: i64,
        requested_at: DateTime<Utc>,
    ) -> Result<Self, LoanError> {
        if collateral_cents <= 0 {
            return Err(LoanError::InvalidAmount {
                amount: collateral_cents,
            });
        }
        if duration_secs <= 0 {
            return Err(LoanError::InvalidDuration {
                duration_secs,
            });
        }

        Ok(Self {
            id,
            borrower,
            lender: None,
            collateral_cents,
            principal_cents: collateral_cents,
            duration_secs,
            due_at: None,
            is_funded: false,
            is_repaid: false,
            is_discharged: false,
            requested_at,
        })
    }

    pub fn status(&self) -> LoanStatus {
        if self.is_repaid {
            LoanStatus::Repaid
        } else if self.is_discharged {
            LoanStatus::Forfeited
        } else if self.is_funded {
            LoanStatus::Funded
        } else {
            LoanStatus::Requested
        }
    }

    /// Amount the borrower owes at repayment. Equal to the principal.
    pub fn repayment_due_cents(&self) -> Cents {
        self.principal_cents
    }

    /// REQUESTED -> FUNDED. Records the lender, starts the repayment window
    /// and marks the principal as disbursed. Exact principal required;
    /// partial funding is rejected.
    pub fn fund(
        &mut self,
        lender: PartyId,
        amount_cents: Cents,
        now: DateTime<Utc>,
    ) -> Result<(), LoanError> {
        if self.is_funded {
            return Err(LoanError::AlreadyFunded);
        }
        if amount_cents != self.principal_cents {
            return Err(LoanError::AmountMismatch {
                expected: self.principal_cents,
                actual: amount_cents,
            });
        }

        self.lender = Some(lender);
        self.due_at = Some(now + Duration::seconds(self.duration_secs));
        self.is_funded = true;
        Ok(())
    }

    /// FUNDED -> REPAID. Exact repayment required. The caller settles the
    /// custody moves (repayment to lender, collateral back to borrower)
    /// atomically with this flag update.
    pub fn repay(&mut self, amount_cents: Cents) -> Result<(), LoanError> {
        if !self.is_funded {
            return Err(LoanError::NotFunded);
        }
        if self.is_discharged {
            return Err(LoanError::AlreadyDischarged);
        }
        if amount_cents != self.repayment_due_cents() {
            return Err(LoanError::AmountMismatch {
                expected: self.repayment_due_cents(),
                actual: amount_cents,
            });
        }

        self.is_repaid = true;
        self.is_discharged = true;
        Ok(())
    }

    /// FUNDED -> FORFEITED. Only the recorded lender may claim, and only once
    /// the deadline has passed. `is_repaid` stays false so the two terminal
    /// outcomes remain distinguishable.
    pub fn claim_collateral(
        &mut self,
        claimant: PartyId,
        now: DateTime<Utc>,
    ) -> Result<(), LoanError> {
        if !self.is_funded {
            return Err(LoanError::NotFunded);
        }
        if self.is_discharged {
            return Err(LoanError::AlreadyDischarged);
        }
        if self.lender != Some(claimant) {
            return Err(LoanError::NotLender);
        }
        // Invariant: is_funded implies due_at is set.
        let due_at = self.due_at.ok_or(LoanError::NotFunded)?;
        if now < due_at {
            return Err(LoanError::RepaymentNotYetDue { due_at });
        }

        self.is_discharged = true;
        Ok(())
    }
}

/// Guard failures of the loan state machine. Each variant maps to one
/// rejection the caller can match on; none of them leave the loan mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanError {
    InvalidAmount { amount: Cents },
    InvalidDuration { duration_secs: i64 },
    AlreadyFunded,
    NotFunded,
    AlreadyDischarged,
    AmountMismatch { expected: Cents, actual: Cents },
    RepaymentNotYetDue { due_at: DateTime<Utc> },
    NotLender,
}

impl std::fmt::Display for LoanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoanError::InvalidAmount { amount } => {
                write!(f, "amount must be positive, got {}", amount)
            }
            LoanError::InvalidDuration { duration_secs } => {
                write!(f, "duration must be positive, got {}s", duration_secs)
            }
            LoanError::AlreadyFunded => write!(f, "loan is already funded"),
            LoanError::NotFunded => write!(f, "loan is not funded"),
            LoanError::AlreadyDischarged => write!(f, "loan is already discharged"),
            LoanError::AmountMismatch { expected, actual } => {
                write!(f, "expected exact amount {}, got {}", expected, actual)
            }
            LoanError::RepaymentNotYetDue { due_at } => {
                write!(f, "loan repayment date not attained (due {})", due_at)
            }
            LoanError::NotLender => write!(f, "only the recorded lender may claim collateral"),
        }
    }
}

impl std::error::Error for LoanError {}
