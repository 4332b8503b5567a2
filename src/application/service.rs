use std::sync::Arc;

use crate::domain::{
    compute_all_balances, Cents, Clock, CustodyReason, CustodyTransfer, Holder, Loan, LoanEvent,
    LoanEventKind, LoanId, LoanStatus, Party, SystemClock,
};
use crate::storage::Repository;

use super::AppError;

/// Application service providing the loan lifecycle operations.
/// This is the primary interface for any client (CLI, API, TUI, etc.).
///
/// Each lifecycle call is one database transaction: the loan state change,
/// the custody moves it implies and the emitted event commit together or not
/// at all. Rejected calls leave no trace.
pub struct LoanService {
    repo: Repository,
    clock: Arc<dyn Clock>,
}

/// Result of requesting a loan. No event is emitted; the id is the receipt.
#[derive(Debug)]
pub struct RequestResult {
    pub loan: Loan,
    pub borrower_name: String,
}

/// Result of funding a loan.
#[derive(Debug)]
pub struct FundResult {
    pub loan: Loan,
    pub event: LoanEvent,
    pub lender_name: String,
}

/// Result of repaying a loan.
#[derive(Debug)]
pub struct RepayResult {
    pub loan: Loan,
    pub event: LoanEvent,
}

/// Result of claiming collateral on an expired loan.
#[derive(Debug)]
pub struct ClaimResult {
    pub loan: Loan,
    pub event: LoanEvent,
}

/// Loan snapshot enriched with party names and event history.
pub struct LoanInfo {
    pub loan: Loan,
    pub status: LoanStatus,
    pub borrower_name: String,
    pub lender_name: Option<String>,
    pub events: Vec<LoanEvent>,
}

/// Balance entry for a party.
pub struct BalanceEntry {
    pub party: Party,
    pub balance: Cents,
}

/// Ledger-wide consistency report.
pub struct IntegrityReport {
    pub party_count: i64,
    pub loan_count: i64,
    pub transfer_count: i64,
    pub event_count: i64,
    pub flag_violations: i64,
    pub invalid_amounts: i64,
    /// Sum over all holders including escrow; zero for a closed system.
    pub custody_sum: Cents,
    pub escrow_balance: Cents,
    /// Collateral of loans not yet discharged; must equal the escrow balance.
    pub outstanding_collateral: Cents,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.flag_violations == 0
            && self.invalid_amounts == 0
            && self.custody_sum == 0
            && self.escrow_balance == self.outstanding_collateral
    }
}

impl LoanService {
    /// Create a new service with the given repository and the system clock.
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source. Tests use this with a manual clock to drive
    /// deadlines deterministically.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }

    // ========================
    // Party operations
    // ========================

    /// Register a new party.
    pub async fn register_party(&self, name: String) -> Result<Party, AppError> {
        if self.repo.get_party_by_name(&name).await?.is_some() {
            return Err(AppError::PartyAlreadyExists(name));
        }

        let party = Party::new(name);
        self.repo.save_party(&party).await?;
        Ok(party)
    }

    /// Get a party by name.
    pub async fn get_party(&self, name: &str) -> Result<Party, AppError> {
        self.repo
            .get_party_by_name(name)
            .await?
            .ok_or_else(|| AppError::PartyNotFound(name.to_string()))
    }

    /// List all parties.
    pub async fn list_parties(&self) -> Result<Vec<Party>, AppError> {
        Ok(self.repo.list_parties().await?)
    }

    // ========================
    // Lifecycle operations
    // ========================

    /// Escrow collateral and create a loan in the REQUESTED state.
    ///
    /// The repayment window is anchored at funding, not here: the deadline is
    /// computed when capital actually changes hands.
    pub async fn request_loan(
        &self,
        borrower_name: &str,
        id: LoanId,
        collateral_cents: Cents,
        duration_secs: i64,
    ) -> Result<RequestResult, AppError> {
        let borrower = self.get_party(borrower_name).await?;
        let now = self.clock.now();
        let loan = Loan::request(id, borrower.id, collateral_cents, duration_secs, now)?;

        let mut tx = self.repo.begin().await?;
        if self.repo.get_loan_in_tx(&mut tx, id).await?.is_some() {
            return Err(AppError::DuplicateLoan(id));
        }

        self.repo.insert_loan(&mut tx, &loan).await?;
        let deposit = CustodyTransfer::new(
            id,
            Holder::Party(borrower.id),
            Holder::Escrow,
            collateral_cents,
            CustodyReason::CollateralDeposit,
            now,
        );
        self.repo.insert_custody_transfer(&mut tx, &deposit).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(RequestResult {
            loan,
            borrower_name: borrower.name,
        })
    }

    /// Fund a requested loan with the exact principal. Starts the repayment
    /// window and disburses the principal to the borrower.
    pub async fn fund_loan(
        &self,
        id: LoanId,
        lender_name: &str,
        amount_cents: Cents,
    ) -> Result<FundResult, AppError> {
        let lender = self.get_party(lender_name).await?;
        let now = self.clock.now();

        let mut tx = self.repo.begin().await?;
        let mut loan = self
            .repo
            .get_loan_in_tx(&mut tx, id)
            .await?
            .ok_or(AppError::LoanNotFound(id))?;

        loan.fund(lender.id, amount_cents, now)?;

        self.repo.update_loan(&mut tx, &loan).await?;
        let disbursement = CustodyTransfer::new(
            id,
            Holder::Party(lender.id),
            Holder::Party(loan.borrower),
            amount_cents,
            CustodyReason::PrincipalDisbursement,
            now,
        );
        self.repo
            .insert_custody_transfer(&mut tx, &disbursement)
            .await?;

        let event = LoanEvent::new(id, LoanEventKind::LoanFunded, now);
        self.repo.insert_loan_event(&mut tx, &event).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(FundResult {
            loan,
            event,
            lender_name: lender.name,
        })
    }

    /// Repay a funded loan in full. The repayment goes to the lender and the
    /// escrowed collateral returns to the borrower.
    pub async fn repay_loan(
        &self,
        id: LoanId,
        payer_name: &str,
        amount_cents: Cents,
    ) -> Result<RepayResult, AppError> {
        let payer = self.get_party(payer_name).await?;
        let now = self.clock.now();

        let mut tx = self.repo.begin().await?;
        let mut loan = self
            .repo
            .get_loan_in_tx(&mut tx, id)
            .await?
            .ok_or(AppError::LoanNotFound(id))?;

        loan.repay(amount_cents)?;

        // repay() only passes on funded loans, so the lender is set.
        let lender_id = loan.lender.ok_or(AppError::NotFunded)?;

        self.repo.update_loan(&mut tx, &loan).await?;
        let repayment = CustodyTransfer::new(
            id,
            Holder::Party(payer.id),
            Holder::Party(lender_id),
            amount_cents,
            CustodyReason::Repayment,
            now,
        );
        self.repo.insert_custody_transfer(&mut tx, &repayment).await?;

        let collateral_return = CustodyTransfer::new(
            id,
            Holder::Escrow,
            Holder::Party(loan.borrower),
            loan.collateral_cents,
            CustodyReason::CollateralReturn,
            now,
        );
        self.repo
            .insert_custody_transfer(&mut tx, &collateral_return)
            .await?;

        let event = LoanEvent::new(id, LoanEventKind::LoanRepaid, now);
        self.repo.insert_loan_event(&mut tx, &event).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(RepayResult { loan, event })
    }

    /// Forfeit the collateral of an expired loan to its lender.
    pub async fn claim_collateral(
        &self,
        id: LoanId,
        claimant_name: &str,
    ) -> Result<ClaimResult, AppError> {
        let claimant = self.get_party(claimant_name).await?;
        let now = self.clock.now();

        let mut tx = self.repo.begin().await?;
        let mut loan = self
            .repo
            .get_loan_in_tx(&mut tx, id)
            .await?
            .ok_or(AppError::LoanNotFound(id))?;

        loan.claim_collateral(claimant.id, now)?;

        self.repo.update_loan(&mut tx, &loan).await?;
        let forfeiture = CustodyTransfer::new(
            id,
            Holder::Escrow,
            Holder::Party(claimant.id),
            loan.collateral_cents,
            CustodyReason::CollateralForfeiture,
            now,
        );
        self.repo
            .insert_custody_transfer(&mut tx, &forfeiture)
            .await?;

        let event = LoanEvent::new(id, LoanEventKind::CollateralClaimed, now);
        self.repo.insert_loan_event(&mut tx, &event).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(ClaimResult { loan, event })
    }

    // ========================
    // Read operations
    // ========================

    /// Get a loan snapshot. Never mutates, never emits.
    pub async fn get_loan(&self, id: LoanId) -> Result<Loan, AppError> {
        self.repo
            .get_loan(id)
            .await?
            .ok_or(AppError::LoanNotFound(id))
    }

    /// Get a loan with party names and its event history.
    pub async fn get_loan_info(&self, id: LoanId) -> Result<LoanInfo, AppError> {
        let loan = self.get_loan(id).await?;

        let borrower = self
            .repo
            .get_party(loan.borrower)
            .await?
            .ok_or_else(|| AppError::PartyNotFound(loan.borrower.to_string()))?;

        let lender_name = match loan.lender {
            Some(lender_id) => Some(
                self.repo
                    .get_party(lender_id)
                    .await?
                    .ok_or_else(|| AppError::PartyNotFound(lender_id.to_string()))?
                    .name,
            ),
            None => None,
        };

        let events = self.repo.list_events_for_loan(id).await?;
        let status = loan.status();

        Ok(LoanInfo {
            loan,
            status,
            borrower_name: borrower.name,
            lender_name,
            events,
        })
    }

    /// List loans, optionally filtered by derived status.
    pub async fn list_loans(&self, status: Option<LoanStatus>) -> Result<Vec<Loan>, AppError> {
        let loans = self.repo.list_loans().await?;
        Ok(match status {
            Some(s) => loans.into_iter().filter(|l| l.status() == s).collect(),
            None => loans,
        })
    }

    /// Event history for a loan.
    pub async fn events_for_loan(&self, id: LoanId) -> Result<Vec<LoanEvent>, AppError> {
        // Surface LoanNotFound for unknown ids rather than an empty history.
        self.get_loan(id).await?;
        Ok(self.repo.list_events_for_loan(id).await?)
    }

    /// Custody history for a loan.
    pub async fn custody_for_loan(&self, id: LoanId) -> Result<Vec<CustodyTransfer>, AppError> {
        self.get_loan(id).await?;
        Ok(self.repo.list_custody_transfers_for_loan(id).await?)
    }

    /// Balance of a single party, folded from the custody log.
    pub async fn get_balance(&self, name: &str) -> Result<BalanceEntry, AppError> {
        let party = self.get_party(name).await?;
        let balance = self
            .repo
            .compute_holder_balance(&Holder::Party(party.id))
            .await?;
        Ok(BalanceEntry { party, balance })
    }

    /// Balances of all parties.
    pub async fn get_all_balances(&self) -> Result<Vec<BalanceEntry>, AppError> {
        let parties = self.repo.list_parties().await?;
        let transfers = self.repo.list_custody_transfers().await?;
        let balances = compute_all_balances(&transfers);

        Ok(parties
            .into_iter()
            .map(|party| {
                let balance = balances.get(&Holder::Party(party.id)).copied().unwrap_or(0);
                BalanceEntry { party, balance }
            })
            .collect())
    }

    /// Value currently held in escrow.
    pub async fn escrow_balance(&self) -> Result<Cents, AppError> {
        Ok(self.repo.compute_holder_balance(&Holder::Escrow).await?)
    }

    /// Check ledger integrity and return a report.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let stats = self.repo.get_integrity_stats().await?;
        let transfers = self.repo.list_custody_transfers().await?;
        let loans = self.repo.list_loans().await?;

        let balances = compute_all_balances(&transfers);
        let custody_sum: Cents = balances.values().sum();
        let escrow_balance = balances.get(&Holder::Escrow).copied().unwrap_or(0);
        let outstanding_collateral: Cents = loans
            .iter()
            .filter(|l| !l.is_discharged)
            .map(|l| l.collateral_cents)
            .sum();

        Ok(IntegrityReport {
            party_count: stats.party_count,
            loan_count: stats.loan_count,
            transfer_count: stats.transfer_count,
            event_count: stats.event_count,
            flag_violations: stats.flag_violations,
            invalid_amounts: stats.invalid_amounts,
            custody_sum,
            escrow_balance,
            outstanding_collateral,
        })
    }
}
