mod common;

use anyhow::Result;
use common::{assert_funds, book, customer, test_service};
use waybill::application::{AppError, NewShipment, ShipmentFilter, ShipmentUpdate};
use waybill::domain::{LedgerEntryKind, ShipmentDetails, CREDIT_LIMIT_EXCEEDED, MAX_AMOUNT};

#[tokio::test]
async fn test_wallet_covers_shipment() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", -500, 1000).await?;

    let result = book(&service, "ACME", 300).await?;
    assert!(!result.shipment.is_hold);
    assert_eq!(result.customer.left_over_balance, -200);
    assert_eq!(result.customer.credit_limit, 1000);
    assert_funds(&service, "ACME", -200, 1000).await;

    Ok(())
}

#[tokio::test]
async fn test_wallet_then_credit_covers_shipment() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", -200, 1000).await?;

    let result = book(&service, "ACME", 500).await?;
    assert!(!result.shipment.is_hold);
    assert_funds(&service, "ACME", 0, 700).await;

    Ok(())
}

#[tokio::test]
async fn test_insufficient_credit_books_on_hold() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 100).await?;

    let result = book(&service, "ACME", 500).await?;
    assert!(result.shipment.is_hold);
    assert_eq!(
        result.shipment.hold_reason.as_deref(),
        Some(CREDIT_LIMIT_EXCEEDED)
    );

    // Outstanding charge is still recorded in full
    assert_funds(&service, "ACME", 500, 100).await;

    let stored = service.get_shipment(&result.shipment.awb_no).await?;
    assert!(stored.is_hold);
    assert!(stored.is_credit_hold());

    Ok(())
}

#[tokio::test]
async fn test_shipment_writes_ledger_entry() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 10000).await?;

    let details = ShipmentDetails {
        consignee: Some("Jane Doe".into()),
        origin: Some("DEL".into()),
        destination: Some("BOM".into()),
        sector: Some("WEST".into()),
        service: Some("express".into()),
        pieces: 3,
        weight_kg: 12.5,
    };
    let result = service
        .create_shipment(NewShipment::new("ACME", 2500).with_details(details.clone()))
        .await?;
    assert_eq!(result.shipment.details, details);

    let entries = service.list_ledger_entries(Some("ACME")).await?;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.kind, LedgerEntryKind::Shipment);
    assert_eq!(entry.awb_no.as_deref(), Some(result.shipment.awb_no.as_str()));
    assert_eq!(entry.amount, 2500);
    assert_eq!(entry.balance_after, 2500);
    assert_eq!(entry.credit_after, 7500);
    assert_eq!(entry.destination.as_deref(), Some("BOM"));
    assert_eq!(entry.sector.as_deref(), Some("WEST"));
    assert_eq!(entry.pieces, 3);
    assert_eq!(entry.weight_kg, 12.5);

    Ok(())
}

#[tokio::test]
async fn test_unknown_customer_changes_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = book(&service, "NOPE", 100).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AppError>(),
        Some(AppError::CustomerNotFound(_))
    ));

    assert!(service.list_shipments(ShipmentFilter::default()).await?.is_empty());
    assert!(service.list_ledger_entries(None).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_negative_amount_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 1000).await?;

    let err = service
        .create_shipment(NewShipment::new("ACME", -1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let err = service
        .update_shipment("WB00000001", ShipmentUpdate::amount(-5))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    assert_funds(&service, "ACME", 0, 1000).await;
    Ok(())
}

#[tokio::test]
async fn test_amount_above_ceiling_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 1, 0).await?;

    let err = service
        .create_shipment(NewShipment::new("ACME", i64::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));
    assert_funds(&service, "ACME", 1, 0).await;
    assert!(service.list_shipments(ShipmentFilter::default()).await?.is_empty());

    // The ceiling itself is still bookable, on hold
    let held = book(&service, "ACME", MAX_AMOUNT).await?;
    assert!(held.shipment.is_hold);
    assert_funds(&service, "ACME", MAX_AMOUNT + 1, 0).await;

    let err = service
        .update_shipment(&held.shipment.awb_no, ShipmentUpdate::amount(MAX_AMOUNT + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));
    assert_eq!(service.get_shipment(&held.shipment.awb_no).await?.total_amt, MAX_AMOUNT);

    Ok(())
}

#[tokio::test]
async fn test_generated_awb_numbers_are_sequential() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 10000).await?;

    let first = book(&service, "ACME", 100).await?;
    let second = book(&service, "ACME", 100).await?;
    assert_eq!(first.shipment.awb_no, "WB00000001");
    assert_eq!(second.shipment.awb_no, "WB00000002");

    Ok(())
}

#[tokio::test]
async fn test_manual_awb_advances_generator() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 10000).await?;

    service
        .create_shipment(NewShipment::new("ACME", 100).with_awb("WB00000007"))
        .await?;
    let next = book(&service, "ACME", 100).await?;
    assert_eq!(next.shipment.awb_no, "WB00000008");

    // Numbers outside the configured prefix don't touch the counter
    service
        .create_shipment(NewShipment::new("ACME", 100).with_awb("EXT-42"))
        .await?;
    let next = book(&service, "ACME", 100).await?;
    assert_eq!(next.shipment.awb_no, "WB00000009");

    Ok(())
}

#[tokio::test]
async fn test_duplicate_awb_rejected_without_charge() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 10000).await?;

    service
        .create_shipment(NewShipment::new("ACME", 1000).with_awb("EXT-1"))
        .await?;
    let err = service
        .create_shipment(NewShipment::new("ACME", 1000).with_awb("EXT-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AwbAlreadyExists(ref awb) if awb == "EXT-1"));

    assert_funds(&service, "ACME", 1000, 9000).await;
    assert_eq!(service.list_ledger_entries(Some("ACME")).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_update_decrease_restores_credit() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 1000).await?;
    let awb = book(&service, "ACME", 500).await?.shipment.awb_no;
    assert_funds(&service, "ACME", 500, 500).await;

    let result = service
        .update_shipment(&awb, ShipmentUpdate::amount(300))
        .await?;
    assert_eq!(result.shipment.total_amt, 300);
    assert!(!result.shipment.is_hold);
    assert_funds(&service, "ACME", 300, 700).await;

    Ok(())
}

#[tokio::test]
async fn test_update_increase_charges_difference() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 1000).await?;
    let awb = book(&service, "ACME", 500).await?.shipment.awb_no;

    let result = service
        .update_shipment(&awb, ShipmentUpdate::amount(800))
        .await?;
    assert!(!result.shipment.is_hold);
    assert_funds(&service, "ACME", 800, 200).await;

    // The shipment keeps a single ledger row, now at the new amount
    let entries = service.list_ledger_entries(Some("ACME")).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount, 800);
    assert_eq!(entries[0].balance_after, 800);
    assert_eq!(entries[0].credit_after, 200);

    Ok(())
}

#[tokio::test]
async fn test_update_increase_beyond_credit_moves_to_hold() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 1000).await?;
    let awb = book(&service, "ACME", 500).await?.shipment.awb_no;

    let result = service
        .update_shipment(&awb, ShipmentUpdate::amount(1200))
        .await?;
    assert!(result.shipment.is_hold);
    assert_eq!(
        result.shipment.hold_reason.as_deref(),
        Some(CREDIT_LIMIT_EXCEEDED)
    );
    assert_funds(&service, "ACME", 1200, 500).await;

    Ok(())
}

#[tokio::test]
async fn test_held_shipment_never_rechecks_credit() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 100).await?;
    let awb = book(&service, "ACME", 500).await?.shipment.awb_no;
    assert_funds(&service, "ACME", 500, 100).await;

    // Increase accumulates without touching credit
    let result = service
        .update_shipment(&awb, ShipmentUpdate::amount(550))
        .await?;
    assert!(result.shipment.is_hold);
    assert_funds(&service, "ACME", 550, 100).await;

    // Decrease on a held shipment does not restore credit either
    let result = service
        .update_shipment(&awb, ShipmentUpdate::amount(400))
        .await?;
    assert!(result.shipment.is_hold);
    assert_funds(&service, "ACME", 400, 100).await;

    Ok(())
}

#[tokio::test]
async fn test_update_details_only_keeps_funds() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", -1000, 1000).await?;
    let awb = book(&service, "ACME", 400).await?.shipment.awb_no;

    let update = ShipmentUpdate {
        destination: Some("MAA".into()),
        pieces: Some(2),
        ..ShipmentUpdate::default()
    };
    let result = service.update_shipment(&awb, update).await?;
    assert_eq!(result.shipment.total_amt, 400);
    assert_eq!(result.shipment.details.destination.as_deref(), Some("MAA"));
    assert_eq!(result.shipment.details.pieces, 2);
    assert_funds(&service, "ACME", -600, 1000).await;

    let entries = service.list_ledger_entries(Some("ACME")).await?;
    assert_eq!(entries[0].destination.as_deref(), Some("MAA"));

    Ok(())
}

#[tokio::test]
async fn test_update_unknown_shipment() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service
        .update_shipment("WB99999999", ShipmentUpdate::amount(100))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ShipmentNotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_delete_wallet_funded_restores_exactly() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", -500, 1000).await?;
    let awb = book(&service, "ACME", 300).await?.shipment.awb_no;

    service.delete_shipment(&awb).await?;
    assert_funds(&service, "ACME", -500, 1000).await;

    Ok(())
}

#[tokio::test]
async fn test_delete_restores_partial_credit() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 200, 1000).await?;

    let awb = book(&service, "ACME", 500).await?.shipment.awb_no;
    assert_funds(&service, "ACME", 700, 500).await;

    let result = service.delete_shipment(&awb).await?;
    assert_eq!(result.customer.left_over_balance, 0);
    assert_eq!(result.customer.credit_limit, 700);
    assert_funds(&service, "ACME", 0, 700).await;

    Ok(())
}

#[tokio::test]
async fn test_delete_held_shipment_removes_outstanding() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 100).await?;
    let awb = book(&service, "ACME", 500).await?.shipment.awb_no;

    service.delete_shipment(&awb).await?;
    assert_funds(&service, "ACME", 0, 100).await;

    Ok(())
}

#[tokio::test]
async fn test_delete_twice_refunds_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", -500, 1000).await?;
    let awb = book(&service, "ACME", 300).await?.shipment.awb_no;

    service.delete_shipment(&awb).await?;
    let err = service.delete_shipment(&awb).await.unwrap_err();
    assert!(matches!(err, AppError::ShipmentNotFound(_)));
    assert_funds(&service, "ACME", -500, 1000).await;

    assert!(service.list_ledger_entries(Some("ACME")).await?.is_empty());
    let err = service.get_shipment(&awb).await.unwrap_err();
    assert!(matches!(err, AppError::ShipmentNotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_list_shipments_filters() -> Result<()> {
    let (service, _temp) = test_service().await?;
    customer(&service, "ACME", 0, 1000).await?;
    customer(&service, "GLOBEX", 0, 0).await?;

    book(&service, "ACME", 100).await?;
    book(&service, "ACME", 200).await?;
    book(&service, "GLOBEX", 300).await?;

    let all = service.list_shipments(ShipmentFilter::default()).await?;
    assert_eq!(all.len(), 3);

    let acme = service
        .list_shipments(ShipmentFilter {
            customer: Some("ACME".into()),
            ..ShipmentFilter::default()
        })
        .await?;
    assert_eq!(acme.len(), 2);
    assert!(acme.iter().all(|s| s.customer_code == "ACME"));

    let held = service
        .list_shipments(ShipmentFilter {
            on_hold_only: true,
            ..ShipmentFilter::default()
        })
        .await?;
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].customer_code, "GLOBEX");

    let limited = service
        .list_shipments(ShipmentFilter {
            limit: Some(2),
            ..ShipmentFilter::default()
        })
        .await?;
    assert_eq!(limited.len(), 2);

    let err = service
        .list_shipments(ShipmentFilter {
            customer: Some("NOPE".into()),
            ..ShipmentFilter::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CustomerNotFound(_)));

    Ok(())
}
