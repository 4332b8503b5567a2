mod common;

use anyhow::Result;
use common::{register_parties, test_service};
use lienbook::application::AppError;
use lienbook::domain::{LoanEventKind, LoanStatus};

#[tokio::test]
async fn test_request_creates_loan_with_all_flags_clear() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 1).await?;

    let loan = service.get_loan(1).await?;
    assert!(!loan.is_funded);
    assert!(!loan.is_repaid);
    assert!(!loan.is_discharged);
    assert!(loan.lender.is_none());
    assert!(loan.due_at.is_none());
    assert_eq!(loan.status(), LoanStatus::Requested);
    Ok(())
}

#[tokio::test]
async fn test_request_rejects_invalid_inputs() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    let err = service.request_loan("borrower", 1, 0, 3600).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(0)));

    let err = service.request_loan("borrower", 1, 50, 0).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidDuration(0)));

    let err = service
        .request_loan("nobody", 1, 50, 3600)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PartyNotFound(_)));

    // No loan was created by any of the rejected requests.
    assert!(matches!(
        service.get_loan(1).await.unwrap_err(),
        AppError::LoanNotFound(1)
    ));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_loan_id_is_rejected() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    let err = service
        .request_loan("borrower", 1, 70, 60)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateLoan(1)));

    // The original record is untouched.
    let loan = service.get_loan(1).await?;
    assert_eq!(loan.collateral_cents, 50);
    assert_eq!(loan.duration_secs, 3600);
    Ok(())
}

#[tokio::test]
async fn test_terminal_loan_ids_are_never_reused() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    service.fund_loan(1, "lender", 50).await?;
    service.repay_loan(1, "borrower", 50).await?;

    // The id stays occupied after discharge.
    let err = service
        .request_loan("borrower", 1, 50, 3600)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateLoan(1)));
    Ok(())
}

// End-to-end scenario A: request -> fund, loan is funded but not repaid.
#[tokio::test]
async fn test_fund_requested_loan() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 1).await?;
    let result = service.fund_loan(1, "lender", 50).await?;
    assert_eq!(result.event.kind, LoanEventKind::LoanFunded);
    assert_eq!(result.event.loan_id, 1);

    let loan = service.get_loan(1).await?;
    assert!(loan.is_funded);
    assert!(!loan.is_repaid);
    assert!(loan.due_at.is_some());
    assert_eq!(loan.status(), LoanStatus::Funded);

    // LoanFunded was emitted exactly once.
    let events = service.events_for_loan(1).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, LoanEventKind::LoanFunded);
    Ok(())
}

#[tokio::test]
async fn test_fund_twice_fails() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;
    register_parties(&service).await?;
    service.register_party("other_lender".into()).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    service.fund_loan(1, "lender", 50).await?;

    let err = service.fund_loan(1, "other_lender", 50).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyFunded));

    // The recorded lender did not change and no second event was written.
    let info = service.get_loan_info(1).await?;
    assert_eq!(info.lender_name.as_deref(), Some("lender"));
    assert_eq!(info.events.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_fund_requires_exact_principal() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;

    let err = service.fund_loan(1, "lender", 49).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::AmountMismatch {
            expected: 50,
            actual: 49
        }
    ));

    let loan = service.get_loan(1).await?;
    assert!(!loan.is_funded);
    Ok(())
}

#[tokio::test]
async fn test_fund_unknown_loan_fails() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    let err = service.fund_loan(99, "lender", 50).await.unwrap_err();
    assert!(matches!(err, AppError::LoanNotFound(99)));
    Ok(())
}

// End-to-end scenario B: request -> fund -> repay.
#[tokio::test]
async fn test_repay_funded_loan() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    service.fund_loan(1, "lender", 50).await?;
    let result = service.repay_loan(1, "borrower", 50).await?;
    assert_eq!(result.event.kind, LoanEventKind::LoanRepaid);

    let loan = service.get_loan(1).await?;
    assert!(loan.is_repaid);
    assert!(loan.is_funded);
    assert!(loan.is_discharged);
    assert_eq!(loan.status(), LoanStatus::Repaid);
    Ok(())
}

// End-to-end scenario C: repaying an unfunded loan is rejected as "not funded".
#[tokio::test]
async fn test_repay_unfunded_loan_fails() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;

    let err = service.repay_loan(1, "borrower", 50).await.unwrap_err();
    assert!(matches!(err, AppError::NotFunded));

    // Nothing mutated, nothing emitted.
    let loan = service.get_loan(1).await?;
    assert!(!loan.is_funded);
    assert!(!loan.is_repaid);
    assert!(!loan.is_discharged);
    assert_eq!(service.events_for_loan(1).await?.len(), 0);
    Ok(())
}

#[tokio::test]
async fn test_repay_requires_exact_amount() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    service.fund_loan(1, "lender", 50).await?;

    let err = service.repay_loan(1, "borrower", 20).await.unwrap_err();
    assert!(matches!(err, AppError::AmountMismatch { .. }));

    let loan = service.get_loan(1).await?;
    assert!(!loan.is_repaid);
    Ok(())
}

// End-to-end scenario D: an expired loan forfeits its collateral.
#[tokio::test]
async fn test_claim_collateral_after_deadline() -> Result<()> {
    let (service, clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    service.fund_loan(1, "lender", 50).await?;

    clock.advance_secs(36000);

    let result = service.claim_collateral(1, "lender").await?;
    assert_eq!(result.event.kind, LoanEventKind::CollateralClaimed);

    let loan = service.get_loan(1).await?;
    assert!(!loan.is_repaid);
    assert!(loan.is_funded);
    assert!(loan.is_discharged);
    assert_eq!(loan.status(), LoanStatus::Forfeited);
    Ok(())
}

// End-to-end scenario E: claiming before the deadline is rejected.
#[tokio::test]
async fn test_claim_before_deadline_fails() -> Result<()> {
    let (service, clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    service.fund_loan(1, "lender", 50).await?;

    clock.advance_secs(360);

    let err = service.claim_collateral(1, "lender").await.unwrap_err();
    assert!(matches!(err, AppError::RepaymentNotYetDue { .. }));
    assert!(
        err.to_string().contains("repayment date not attained"),
        "unexpected message: {}",
        err
    );

    let loan = service.get_loan(1).await?;
    assert!(!loan.is_discharged);
    Ok(())
}

#[tokio::test]
async fn test_claim_exactly_at_deadline_succeeds() -> Result<()> {
    let (service, clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    service.fund_loan(1, "lender", 50).await?;

    clock.advance_secs(3600);

    service.claim_collateral(1, "lender").await?;
    assert_eq!(service.get_loan(1).await?.status(), LoanStatus::Forfeited);
    Ok(())
}

#[tokio::test]
async fn test_claim_unfunded_loan_fails() -> Result<()> {
    let (service, clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    clock.advance_secs(36000);

    let err = service.claim_collateral(1, "lender").await.unwrap_err();
    assert!(matches!(err, AppError::NotFunded));
    Ok(())
}

#[tokio::test]
async fn test_claim_by_non_lender_fails() -> Result<()> {
    let (service, clock, _temp) = test_service().await?;
    register_parties(&service).await?;
    service.register_party("stranger".into()).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    service.fund_loan(1, "lender", 50).await?;
    clock.advance_secs(36000);

    let err = service.claim_collateral(1, "stranger").await.unwrap_err();
    assert!(matches!(err, AppError::NotLender));

    let loan = service.get_loan(1).await?;
    assert!(!loan.is_discharged);
    Ok(())
}

#[tokio::test]
async fn test_deadline_is_anchored_at_funding() -> Result<()> {
    let (service, clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;

    // The window has not started: funding an hour later pushes the deadline
    // an hour further out.
    clock.advance_secs(3600);
    service.fund_loan(1, "lender", 50).await?;

    clock.advance_secs(3599);
    let err = service.claim_collateral(1, "lender").await.unwrap_err();
    assert!(matches!(err, AppError::RepaymentNotYetDue { .. }));

    clock.advance_secs(1);
    service.claim_collateral(1, "lender").await?;
    Ok(())
}

#[tokio::test]
async fn test_discharged_loans_reject_repay_and_claim() -> Result<()> {
    let (service, clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    // Discharged by repayment.
    service.request_loan("borrower", 1, 50, 3600).await?;
    service.fund_loan(1, "lender", 50).await?;
    service.repay_loan(1, "borrower", 50).await?;

    let err = service.repay_loan(1, "borrower", 50).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyDischarged));

    clock.advance_secs(36000);
    let err = service.claim_collateral(1, "lender").await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyDischarged));

    // Discharged by forfeiture.
    service.request_loan("borrower", 2, 50, 3600).await?;
    service.fund_loan(2, "lender", 50).await?;
    clock.advance_secs(36000);
    service.claim_collateral(2, "lender").await?;

    let err = service.claim_collateral(2, "lender").await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyDischarged));

    let err = service.repay_loan(2, "borrower", 50).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyDischarged));

    // Terminal outcomes stay mutually exclusive.
    assert_eq!(service.get_loan(1).await?.status(), LoanStatus::Repaid);
    let forfeited = service.get_loan(2).await?;
    assert_eq!(forfeited.status(), LoanStatus::Forfeited);
    assert!(!forfeited.is_repaid);
    Ok(())
}

#[tokio::test]
async fn test_terminal_records_remain_queryable() -> Result<()> {
    let (service, clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    service.fund_loan(1, "lender", 50).await?;
    clock.advance_secs(36000);
    service.claim_collateral(1, "lender").await?;

    let info = service.get_loan_info(1).await?;
    assert_eq!(info.status, LoanStatus::Forfeited);
    assert_eq!(info.borrower_name, "borrower");
    assert_eq!(info.lender_name.as_deref(), Some("lender"));
    assert_eq!(info.events.len(), 2);
    assert_eq!(info.events[0].kind, LoanEventKind::LoanFunded);
    assert_eq!(info.events[1].kind, LoanEventKind::CollateralClaimed);
    Ok(())
}

#[tokio::test]
async fn test_list_loans_filters_by_status() -> Result<()> {
    let (service, clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;

    service.request_loan("borrower", 2, 50, 3600).await?;
    service.fund_loan(2, "lender", 50).await?;

    service.request_loan("borrower", 3, 50, 3600).await?;
    service.fund_loan(3, "lender", 50).await?;
    service.repay_loan(3, "borrower", 50).await?;

    service.request_loan("borrower", 4, 50, 3600).await?;
    service.fund_loan(4, "lender", 50).await?;
    clock.advance_secs(36000);
    service.claim_collateral(4, "lender").await?;

    assert_eq!(service.list_loans(None).await?.len(), 4);

    for (status, expected_id) in [
        (LoanStatus::Requested, 1),
        (LoanStatus::Funded, 2),
        (LoanStatus::Repaid, 3),
        (LoanStatus::Forfeited, 4),
    ] {
        let loans = service.list_loans(Some(status)).await?;
        assert_eq!(loans.len(), 1, "expected one {} loan", status);
        assert_eq!(loans[0].id, expected_id);
    }
    Ok(())
}

#[tokio::test]
async fn test_independent_loans_do_not_interfere() -> Result<()> {
    let (service, clock, _temp) = test_service().await?;
    register_parties(&service).await?;

    service.request_loan("borrower", 1, 50, 3600).await?;
    service.request_loan("borrower", 2, 120, 60).await?;

    service.fund_loan(1, "lender", 50).await?;
    service.fund_loan(2, "lender", 120).await?;

    clock.advance_secs(60);
    service.claim_collateral(2, "lender").await?;

    // Loan 1 is unaffected by loan 2's forfeiture.
    let loan = service.get_loan(1).await?;
    assert_eq!(loan.status(), LoanStatus::Funded);
    service.repay_loan(1, "borrower", 50).await?;
    assert_eq!(service.get_loan(1).await?.status(), LoanStatus::Repaid);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_party_registration_fails() -> Result<()> {
    let (service, _clock, _temp) = test_service().await?;

    service.register_party("alice".into()).await?;
    let err = service.register_party("alice".into()).await.unwrap_err();
    assert!(matches!(err, AppError::PartyAlreadyExists(_)));
    Ok(())
}
