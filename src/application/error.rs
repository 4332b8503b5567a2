use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Cents, LoanError, LoanId};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Loan not found: {0}")]
    LoanNotFound(LoanId),

    #[error("Loan already exists: {0}")]
    DuplicateLoan(LoanId),

    #[error("Party not found: {0}")]
    PartyNotFound(String),

    #[error("Party already exists: {0}")]
    PartyAlreadyExists(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(Cents),

    #[error("Invalid duration: {0} seconds")]
    InvalidDuration(i64),

    #[error("Loan is already funded")]
    AlreadyFunded,

    #[error("Loan is not funded")]
    NotFunded,

    #[error("Loan is already discharged")]
    AlreadyDischarged,

    #[error("Expected exact amount {expected}, got {actual}")]
    AmountMismatch { expected: Cents, actual: Cents },

    #[error("Loan repayment date not attained (due {due_at})")]
    RepaymentNotYetDue { due_at: DateTime<Utc> },

    #[error("Only the recorded lender may claim collateral")]
    NotLender,

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl From<LoanError> for AppError {
    fn from(err: LoanError) -> Self {
        match err {
            LoanError::InvalidAmount { amount } => AppError::InvalidAmount(amount),
            LoanError::InvalidDuration { duration_secs } => AppError::InvalidDuration(duration_secs),
            LoanError::AlreadyFunded => AppError::AlreadyFunded,
            LoanError::NotFunded => AppError::NotFunded,
            LoanError::AlreadyDischarged => AppError::AlreadyDischarged,
            LoanError::AmountMismatch { expected, actual } => {
                AppError::AmountMismatch { expected, actual }
            }
            LoanError::RepaymentNotYetDue { due_at } => AppError::RepaymentNotYetDue { due_at },
            LoanError::NotLender => AppError::NotLender,
        }
    }
}
