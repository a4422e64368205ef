//! Property-based checks of the stock invariants.
//!
//! Random delta sequences are replayed against a fresh ledger; whatever the
//! sequence, levels never go negative and every committed change is logged
//! with `new - old == delta`.

mod common;

use common::*;
use nutrient_ledger::{
    services::stock_ledger::StockDelta, Actor, ChangeKind, ResourceKind, ServiceError,
    SubjectKind,
};
use proptest::prelude::*;

fn kind_strategy() -> impl Strategy<Value = ResourceKind> {
    prop_oneof![
        Just(ResourceKind::PhUp),
        Just(ResourceKind::PhDown),
        Just(ResourceKind::SolutionA),
        Just(ResourceKind::SolutionB),
    ]
}

fn delta_strategy() -> impl Strategy<Value = i32> {
    prop_oneof![-500i32..=-1, 1i32..=500]
}

/// Replays the deltas on a fresh ledger and checks levels and log against a
/// shadow copy.
async fn replay(initial: i32, steps: &[(ResourceKind, i32)]) -> Result<(), TestCaseError> {
    let t = TestLedger::new().await;
    let container = t.seed_container(initial).await;
    let stock = t.ledger.stock();
    let mut expected = [initial; 4];
    let mut applied = Vec::new();

    for (kind, delta) in steps {
        let slot = ResourceKind::ALL
            .iter()
            .position(|k| k == kind)
            .expect("known kind");
        let result = stock
            .apply_delta(StockDelta {
                container_id: container.id,
                kind: *kind,
                delta: *delta,
                actor: Actor::system(),
                change_kind: if *delta > 0 {
                    ChangeKind::AddStock
                } else {
                    ChangeKind::Usage
                },
                description: format!("{} {}", kind, delta),
            })
            .await;

        match result {
            Ok(change) => {
                prop_assert_eq!(change.old_value, expected[slot]);
                prop_assert_eq!(change.new_value - change.old_value, *delta);
                expected[slot] += delta;
                applied.push((*kind, *delta));
            }
            Err(ServiceError::InsufficientStock {
                available,
                requested,
                ..
            }) => {
                prop_assert_eq!(available, expected[slot]);
                prop_assert!(requested > available);
            }
            Err(other) => return Err(TestCaseError::fail(other.to_string())),
        }
    }

    let stored = t.reload(container.id).await;
    for kind in ResourceKind::ALL {
        prop_assert!(kind.level(&stored) >= 0);
    }
    let levels: Vec<i32> = ResourceKind::ALL.iter().map(|k| k.level(&stored)).collect();
    prop_assert_eq!(levels, expected.to_vec());

    let log = t
        .ledger
        .audit()
        .entries_for(SubjectKind::Container, container.id)
        .await
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    // First entry is the creation.
    let logged: Vec<(String, i64)> = log[1..]
        .iter()
        .map(|e| (e.field.clone().unwrap_or_default(), e.delta().unwrap_or(0)))
        .collect();
    let wanted: Vec<(String, i64)> = applied
        .iter()
        .map(|(k, d)| (k.column_name().to_string(), i64::from(*d)))
        .collect();
    prop_assert_eq!(logged, wanted);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn levels_stay_non_negative_and_every_change_is_logged(
        initial in 0i32..1_000,
        steps in prop::collection::vec((kind_strategy(), delta_strategy()), 1..20),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(replay(initial, &steps))?;
    }
}
