// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use lienbook::application::LoanService;
use lienbook::domain::ManualClock;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database and a manual
/// clock, so tests can advance time deterministically.
pub async fn test_service() -> Result<(LoanService, Arc<ManualClock>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = LoanService::init(db_path.to_str().unwrap())
        .await?
        .with_clock(clock.clone());
    Ok((service, clock, temp_dir))
}

/// Register the standard borrower/lender pair used by most scenarios.
pub async fn register_parties(service: &LoanService) -> Result<()> {
    service.register_party("borrower".into()).await?;
    service.register_party("lender".into()).await?;
    Ok(())
}
