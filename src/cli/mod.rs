use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::application::{LoanInfo, LoanService};
use crate::domain::{format_cents, parse_cents, LoanId, LoanStatus};

/// Lienbook - Collateral-backed loan ledger
#[derive(Parser)]
#[command(name = "lienbook")]
#[command(about = "A collateral-backed loan ledger: escrow, fund, repay or forfeit")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "lienbook.db")]
    pub database: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Party management commands
    #[command(subcommand)]
    Party(PartyCommands),

    /// Escrow collateral and request a loan
    Request {
        /// Loan identifier (caller-chosen, must be unused)
        id: LoanId,

        /// Borrower party name
        #[arg(long)]
        borrower: String,

        /// Collateral to escrow (e.g., "0.50" or "50")
        #[arg(long)]
        collateral: String,

        /// Repayment window in seconds, measured from funding
        #[arg(long)]
        duration: i64,
    },

    /// Fund a requested loan with the exact principal
    Fund {
        /// Loan identifier
        id: LoanId,

        /// Lender party name
        #[arg(long)]
        lender: String,

        /// Principal to disburse (must match the loan exactly)
        #[arg(long)]
        amount: String,
    },

    /// Repay a funded loan in full
    Repay {
        /// Loan identifier
        id: LoanId,

        /// Paying party name
        #[arg(long)]
        from: String,

        /// Repayment amount (must match the amount due exactly)
        #[arg(long)]
        amount: String,
    },

    /// Claim the collateral of an expired loan
    Claim {
        /// Loan identifier
        id: LoanId,

        /// Claiming lender party name
        #[arg(long)]
        lender: String,
    },

    /// Show a loan record
    Show {
        /// Loan identifier
        id: LoanId,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List loans
    Loans {
        /// Filter by status: requested, funded, repaid, forfeited
        #[arg(long)]
        status: Option<String>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show balance for a party, or all parties and escrow
    Balance {
        /// Party name (omit for all)
        party: Option<String>,
    },

    /// Show the event history of a loan
    Events {
        /// Loan identifier
        id: LoanId,
    },

    /// Show the custody history of a loan
    Custody {
        /// Loan identifier
        id: LoanId,
    },

    /// Verify ledger integrity
    Check,
}

#[derive(Subcommand)]
pub enum PartyCommands {
    /// Register a new party
    Add {
        /// Party name
        name: String,
    },

    /// List registered parties
    List,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                LoanService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Party(party_cmd) => {
                let service = LoanService::connect(&self.database).await?;
                run_party_command(&service, party_cmd).await?;
            }

            Commands::Request {
                id,
                borrower,
                collateral,
                duration,
            } => {
                let service = LoanService::connect(&self.database).await?;
                let collateral_cents = parse_cents(&collateral)
                    .context("Invalid collateral format. Use '0.50' or '50'")?;

                let result = service
                    .request_loan(&borrower, id, collateral_cents, duration)
                    .await?;

                println!(
                    "Loan {} requested by {}: {} escrowed, {}s window",
                    result.loan.id,
                    result.borrower_name,
                    format_cents(result.loan.collateral_cents),
                    result.loan.duration_secs
                );
            }

            Commands::Fund { id, lender, amount } => {
                let service = LoanService::connect(&self.database).await?;
                let amount_cents =
                    parse_cents(&amount).context("Invalid amount format. Use '0.50' or '50'")?;

                let result = service.fund_loan(id, &lender, amount_cents).await?;

                println!(
                    "Loan {} funded by {}: {} disbursed, due {}",
                    result.loan.id,
                    result.lender_name,
                    format_cents(result.loan.principal_cents),
                    result.loan.due_at.map_or_else(
                        || "-".to_string(),
                        |dt| dt.to_rfc3339()
                    )
                );
                println!("Event: {}({})", result.event.kind, result.event.loan_id);
            }

            Commands::Repay { id, from, amount } => {
                let service = LoanService::connect(&self.database).await?;
                let amount_cents =
                    parse_cents(&amount).context("Invalid amount format. Use '0.50' or '50'")?;

                let result = service.repay_loan(id, &from, amount_cents).await?;

                println!(
                    "Loan {} repaid: {} to lender, {} collateral returned",
                    result.loan.id,
                    format_cents(result.loan.principal_cents),
                    format_cents(result.loan.collateral_cents)
                );
                println!("Event: {}({})", result.event.kind, result.event.loan_id);
            }

            Commands::Claim { id, lender } => {
                let service = LoanService::connect(&self.database).await?;
                let result = service.claim_collateral(id, &lender).await?;

                println!(
                    "Loan {} forfeited: {} collateral claimed by lender",
                    result.loan.id,
                    format_cents(result.loan.collateral_cents)
                );
                println!("Event: {}({})", result.event.kind, result.event.loan_id);
            }

            Commands::Show { id, json } => {
                let service = LoanService::connect(&self.database).await?;
                let info = service.get_loan_info(id).await?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&info.loan)?);
                } else {
                    print_loan_info(&info);
                }
            }

            Commands::Loans { status, json } => {
                let service = LoanService::connect(&self.database).await?;

                let filter = match status {
                    Some(s) => Some(LoanStatus::from_str(&s).with_context(|| {
                        format!(
                            "Unknown status '{}'. Use requested, funded, repaid or forfeited",
                            s
                        )
                    })?),
                    None => None,
                };

                let loans = service.list_loans(filter).await?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&loans)?);
                } else if loans.is_empty() {
                    println!("No loans.");
                } else {
                    for loan in loans {
                        println!(
                            "{:>6}  {:<10} collateral {:>10}  principal {:>10}",
                            loan.id,
                            loan.status().as_str(),
                            format_cents(loan.collateral_cents),
                            format_cents(loan.principal_cents)
                        );
                    }
                }
            }

            Commands::Balance { party } => {
                let service = LoanService::connect(&self.database).await?;
                match party {
                    Some(name) => {
                        let entry = service.get_balance(&name).await?;
                        println!("{}: {}", entry.party.name, format_cents(entry.balance));
                    }
                    None => {
                        for entry in service.get_all_balances().await? {
                            println!("{}: {}", entry.party.name, format_cents(entry.balance));
                        }
                        let escrow = service.escrow_balance().await?;
                        println!("(escrow): {}", format_cents(escrow));
                    }
                }
            }

            Commands::Events { id } => {
                let service = LoanService::connect(&self.database).await?;
                let events = service.events_for_loan(id).await?;

                if events.is_empty() {
                    println!("No events for loan {}.", id);
                } else {
                    for event in events {
                        println!("{}  {}({})", event.at.to_rfc3339(), event.kind, event.loan_id);
                    }
                }
            }

            Commands::Custody { id } => {
                let service = LoanService::connect(&self.database).await?;
                let transfers = service.custody_for_loan(id).await?;

                for t in transfers {
                    println!(
                        "{}  {:<24} {} -> {}: {}",
                        t.at.to_rfc3339(),
                        t.reason.as_str(),
                        t.from.as_db_str(),
                        t.to.as_db_str(),
                        format_cents(t.amount_cents)
                    );
                }
            }

            Commands::Check => {
                let service = LoanService::connect(&self.database).await?;
                let report = service.check_integrity().await?;

                println!("Parties:            {}", report.party_count);
                println!("Loans:              {}", report.loan_count);
                println!("Custody transfers:  {}", report.transfer_count);
                println!("Events:             {}", report.event_count);
                println!("Custody sum:        {}", format_cents(report.custody_sum));
                println!("Escrow balance:     {}", format_cents(report.escrow_balance));
                println!(
                    "Outstanding collateral: {}",
                    format_cents(report.outstanding_collateral)
                );

                if report.is_ok() {
                    println!("Ledger OK.");
                } else {
                    println!(
                        "Ledger INCONSISTENT: {} flag violations, {} invalid amounts",
                        report.flag_violations, report.invalid_amounts
                    );
                }
            }
        }

        Ok(())
    }
}

async fn run_party_command(service: &LoanService, cmd: PartyCommands) -> Result<()> {
    match cmd {
        PartyCommands::Add { name } => {
            let party = service.register_party(name).await?;
            println!("Registered party: {} ({})", party.name, party.id);
        }
        PartyCommands::List => {
            let parties = service.list_parties().await?;
            if parties.is_empty() {
                println!("No parties.");
            } else {
                for party in parties {
                    println!("{}  {}", party.name, party.id);
                }
            }
        }
    }
    Ok(())
}

fn print_loan_info(info: &LoanInfo) {
    let loan = &info.loan;
    println!("Loan {}", loan.id);
    println!("  Status:     {}", info.status);
    println!("  Borrower:   {}", info.borrower_name);
    println!(
        "  Lender:     {}",
        info.lender_name.as_deref().unwrap_or("-")
    );
    println!("  Collateral: {}", format_cents(loan.collateral_cents));
    println!("  Principal:  {}", format_cents(loan.principal_cents));
    println!("  Duration:   {}s", loan.duration_secs);
    println!(
        "  Due:        {}",
        loan.due_at
            .map_or_else(|| "-".to_string(), |dt| dt.to_rfc3339())
    );
    println!(
        "  Flags:      funded={} repaid={} discharged={}",
        loan.is_funded, loan.is_repaid, loan.is_discharged
    );
    if !info.events.is_empty() {
        println!("  Events:");
        for event in &info.events {
            println!("    {}  {}", event.at.to_rfc3339(), event.kind);
        }
    }
}
