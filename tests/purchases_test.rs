mod common;

use assert_matches::assert_matches;
use common::*;
use nutrient_ledger::{
    errors::MissingEntity,
    services::purchases::{NewItem, NewPurchase, PurchaseCorrection},
    ChangeKind, Channel, ServiceError, SubjectKind,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn ph_up_purchase(greenhouse_id: i32) -> NewPurchase {
    NewPurchase {
        greenhouse_id,
        item_name: "pH Up 1L".into(),
        resource_kind: "pH Up".into(),
        quantity: 1,
        unit_price: dec!(150.00),
        package_capacity: Some(1000),
        actor: GROWER.into(),
    }
}

#[tokio::test]
async fn first_purchase_creates_and_fills_the_container() {
    let mut t = TestLedger::new().await;
    assert!(t
        .ledger
        .containers()
        .find_by_greenhouse(EMPTY_GREENHOUSE)
        .await
        .unwrap()
        .is_none());

    let recorded = t
        .ledger
        .purchases()
        .record_purchase(ph_up_purchase(EMPTY_GREENHOUSE))
        .await
        .expect("purchase should be recorded");

    assert!(recorded.container_created);
    let container = t
        .ledger
        .containers()
        .find_by_greenhouse(EMPTY_GREENHOUSE)
        .await
        .unwrap()
        .expect("container should exist");
    assert_eq!(recorded.purchase.container_id, Some(container.id));
    assert_eq!(container.ph_up, 1000);
    assert_eq!(container.ph_down, 0);
    assert_eq!(recorded.purchase.total_price, dec!(150.00));

    let change = recorded.stock_change.expect("stock should move");
    assert_eq!((change.old_value, change.new_value), (0, 1000));

    let container_log = t
        .ledger
        .audit()
        .entries_for(SubjectKind::Container, container.id)
        .await
        .unwrap();
    let kinds: Vec<ChangeKind> = container_log.iter().map(|e| e.change_kind).collect();
    assert_eq!(kinds, vec![ChangeKind::Create, ChangeKind::AddStock]);
    assert_eq!(container_log[1].delta(), Some(1000));

    let purchase_log = t
        .ledger
        .audit()
        .entries_for(SubjectKind::Purchase, recorded.purchase.id)
        .await
        .unwrap();
    assert_eq!(purchase_log.len(), 1);
    assert_eq!(purchase_log[0].change_kind, ChangeKind::Create);

    let channels: Vec<Channel> = t.drain_notifications().iter().map(|n| n.channel).collect();
    assert_eq!(
        channels,
        vec![
            Channel::ContainerUpdated,
            Channel::ContainerUpdated,
            Channel::PurchaseLogged
        ]
    );
}

#[tokio::test]
async fn later_purchases_reuse_the_container() {
    let t = TestLedger::new().await;
    let container = t.seed_container(100).await;

    let recorded = t
        .ledger
        .purchases()
        .record_purchase(NewPurchase {
            resource_kind: "solution_b".into(),
            quantity: 4,
            package_capacity: None,
            ..ph_up_purchase(GREENHOUSE)
        })
        .await
        .unwrap();

    assert!(!recorded.container_created);
    assert_eq!(recorded.purchase.container_id, Some(container.id));
    assert_eq!(recorded.purchase.total_price, dec!(600.00));
    assert_eq!(t.reload(container.id).await.solution_b, 104);
}

#[tokio::test]
async fn price_correction_recomputes_total_without_touching_stock() {
    let t = TestLedger::new().await;
    let recorded = t
        .ledger
        .purchases()
        .record_purchase(ph_up_purchase(EMPTY_GREENHOUSE))
        .await
        .unwrap();
    let container_id = recorded.purchase.container_id.unwrap();
    let before = t.reload(container_id).await;

    let updated = t
        .ledger
        .purchases()
        .update_purchase(
            recorded.purchase.id,
            PurchaseCorrection {
                unit_price: Some(dec!(160.00)),
                ..Default::default()
            },
            GROWER,
        )
        .await
        .unwrap();

    assert_eq!(updated.unit_price, dec!(160.00));
    assert_eq!(updated.total_price, dec!(160.00));
    assert!(updated.updated_at.is_some());

    let after = t.reload(container_id).await;
    assert_eq!(
        (after.ph_up, after.ph_down, after.solution_a, after.solution_b),
        (before.ph_up, before.ph_down, before.solution_a, before.solution_b)
    );

    let log = t
        .ledger
        .audit()
        .entries_for(SubjectKind::Purchase, recorded.purchase.id)
        .await
        .unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].change_kind, ChangeKind::Update);
    assert!(log[1].description.contains("unit_price"));
}

#[tokio::test]
async fn quantity_correction_is_logged_with_values() {
    let t = TestLedger::new().await;
    let recorded = t
        .ledger
        .purchases()
        .record_purchase(ph_up_purchase(EMPTY_GREENHOUSE))
        .await
        .unwrap();

    let updated = t
        .ledger
        .purchases()
        .update_purchase(
            recorded.purchase.id,
            PurchaseCorrection {
                quantity: Some(3),
                ..Default::default()
            },
            GROWER,
        )
        .await
        .unwrap();
    assert_eq!(updated.total_price, dec!(450.00));

    let container_id = recorded.purchase.container_id.unwrap();
    assert_eq!(t.reload(container_id).await.ph_up, 1000);

    let log = t
        .ledger
        .audit()
        .entries_for(SubjectKind::Purchase, recorded.purchase.id)
        .await
        .unwrap();
    let last = log.last().unwrap();
    assert_eq!(last.field.as_deref(), Some("quantity"));
    assert_eq!((last.old_value, last.new_value), (Some(1), Some(3)));
}

#[tokio::test]
async fn unchanged_correction_writes_nothing() {
    let t = TestLedger::new().await;
    let recorded = t
        .ledger
        .purchases()
        .record_purchase(ph_up_purchase(EMPTY_GREENHOUSE))
        .await
        .unwrap();

    let same = t
        .ledger
        .purchases()
        .update_purchase(
            recorded.purchase.id,
            PurchaseCorrection {
                quantity: Some(1),
                unit_price: Some(dec!(150)),
                ..Default::default()
            },
            GROWER,
        )
        .await
        .unwrap();
    assert!(same.updated_at.is_none());

    let log = t
        .ledger
        .audit()
        .entries_for(SubjectKind::Purchase, recorded.purchase.id)
        .await
        .unwrap();
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn deleting_a_purchase_keeps_the_stock_it_added() {
    let mut t = TestLedger::new().await;
    let recorded = t
        .ledger
        .purchases()
        .record_purchase(ph_up_purchase(EMPTY_GREENHOUSE))
        .await
        .unwrap();
    t.drain_notifications();

    let receipt = t
        .ledger
        .purchases()
        .delete_purchase(recorded.purchase.id, GROWER)
        .await
        .unwrap();

    assert_eq!(receipt.subject, SubjectKind::Purchase);
    assert_eq!(receipt.subject_id, recorded.purchase.id);
    assert_eq!(receipt.removed_log_entries, 1);
    assert_eq!(receipt.actor.id, GROWER_ID);

    assert_matches!(
        t.ledger.purchases().get(recorded.purchase.id).await,
        Err(ServiceError::NotFound {
            entity: MissingEntity::Purchase,
            ..
        })
    );
    assert!(t
        .ledger
        .audit()
        .entries_for(SubjectKind::Purchase, recorded.purchase.id)
        .await
        .unwrap()
        .is_empty());

    let container_id = recorded.purchase.container_id.unwrap();
    assert_eq!(t.reload(container_id).await.ph_up, 1000);

    let notifications = t.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].channel, Channel::PurchaseLogged);
    assert_eq!(notifications[0].action, ChangeKind::Delete);
}

#[tokio::test]
async fn non_consumable_purchases_are_not_linked() {
    let t = TestLedger::new().await;

    let recorded = t
        .ledger
        .purchases()
        .record_purchase(NewPurchase {
            item_name: "Grow bags".into(),
            resource_kind: "Supplies".into(),
            quantity: 20,
            unit_price: dec!(1.25),
            package_capacity: None,
            ..ph_up_purchase(EMPTY_GREENHOUSE)
        })
        .await
        .unwrap();

    assert_eq!(recorded.purchase.container_id, None);
    assert!(recorded.stock_change.is_none());
    assert_eq!(recorded.purchase.total_price, dec!(25.00));
    assert!(t
        .ledger
        .containers()
        .find_by_greenhouse(EMPTY_GREENHOUSE)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        t.ledger
            .audit()
            .entries_for(SubjectKind::Purchase, recorded.purchase.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn invalid_purchases_are_rejected() {
    let t = TestLedger::new().await;
    let purchases = t.ledger.purchases();

    assert_matches!(
        purchases
            .record_purchase(NewPurchase {
                quantity: 0,
                ..ph_up_purchase(GREENHOUSE)
            })
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        purchases
            .record_purchase(NewPurchase {
                unit_price: dec!(-1),
                ..ph_up_purchase(GREENHOUSE)
            })
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        purchases.record_purchase(ph_up_purchase(404)).await,
        Err(ServiceError::NotFound {
            entity: MissingEntity::Greenhouse,
            ..
        })
    );
    assert_matches!(
        purchases
            .update_purchase(777, PurchaseCorrection::default(), GROWER)
            .await,
        Err(ServiceError::NotFound {
            entity: MissingEntity::Purchase,
            ..
        })
    );
    assert!(purchases.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn purchases_are_listed_per_greenhouse() {
    let t = TestLedger::new().await;
    let purchases = t.ledger.purchases();
    let first = purchases
        .record_purchase(ph_up_purchase(GREENHOUSE))
        .await
        .unwrap();
    let second = purchases
        .record_purchase(ph_up_purchase(EMPTY_GREENHOUSE))
        .await
        .unwrap();

    assert_eq!(purchases.list(None).await.unwrap().len(), 2);
    let own = purchases.list(Some(GREENHOUSE)).await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].id, first.purchase.id);
    assert_eq!(
        purchases.get(second.purchase.id).await.unwrap().greenhouse_id,
        EMPTY_GREENHOUSE
    );
}

#[tokio::test]
async fn items_never_touch_a_container() {
    let mut t = TestLedger::new().await;

    let item = t
        .ledger
        .purchases()
        .record_item(NewItem {
            greenhouse_id: EMPTY_GREENHOUSE,
            name: "Rockwool cubes".into(),
            description: Some("4cm starter cubes".into()),
            count: 3,
            unit: "bag".into(),
            unit_price: dec!(4.50),
            actor: GROWER.into(),
        })
        .await
        .unwrap();

    assert_eq!(item.user_id, GROWER_ID);
    assert_eq!(item.total_price, Decimal::new(1350, 2));
    assert!(t
        .ledger
        .containers()
        .find_by_greenhouse(EMPTY_GREENHOUSE)
        .await
        .unwrap()
        .is_none());

    let log = t
        .ledger
        .audit()
        .entries_for(SubjectKind::Item, item.id)
        .await
        .unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].new_value, Some(3));

    let listed = t
        .ledger
        .purchases()
        .list_items(Some(EMPTY_GREENHOUSE))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(
        t.ledger.purchases().get_item(item.id).await.unwrap().name,
        "Rockwool cubes"
    );

    let notifications = t.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].channel, Channel::ItemLogged);
}
