//! Item-code integrity tests
//!
//! Tests for the duplicate-code maintenance pass including:
//! - Case-insensitive duplicate detection
//! - Numeric and suffixed code proposals
//! - Atomic, collision-checked renames

use proptest::prelude::*;
use uuid::Uuid;

use shared::{LedgerFilter, NewStockItem};
use weldstock::{AppError, MemoryStore, StockEngine};

async fn add_item(engine: &StockEngine<MemoryStore>, code: &str, opening: i64) -> Uuid {
    engine
        .create_item(NewStockItem {
            item_code: code.to_string(),
            description: format!("Item {}", code),
            unit: "ea".to_string(),
            min_level: None,
            max_level: None,
            category: None,
            average_unit_cost: None,
            opening_quantity: Some(opening),
        })
        .await
        .unwrap()
        .id
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[tokio::test]
    async fn test_three_duplicates_proposed_and_applied() {
        let engine = StockEngine::in_memory();
        let first = add_item(&engine, "100", 1).await;
        let second = add_item(&engine, "100", 2).await;
        let third = add_item(&engine, "100", 3).await;

        let groups = engine.find_duplicate_codes().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 3);
        assert_eq!(groups[0].members[0].id, first);

        let proposals = engine.propose_code(&groups[0]).await.unwrap();
        let codes: Vec<&str> = proposals.iter().map(|p| p.proposed_code.as_str()).collect();
        assert_eq!(codes, vec!["100", "101", "102"]);

        let renamed = engine.integrity.apply_fixes(&proposals).await.unwrap();
        assert_eq!(renamed, 2);
        assert!(engine.find_duplicate_codes().await.unwrap().is_empty());

        assert_eq!(engine.get_item(first).await.unwrap().item_code, "100");
        assert_eq!(engine.get_item(second).await.unwrap().item_code, "101");
        assert_eq!(engine.get_item(third).await.unwrap().item_code, "102");

        // Ledger history follows the item id, not the code
        let history = engine
            .ledger
            .history(third, &LedgerFilter::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].running_balance, 3);
    }

    #[tokio::test]
    async fn test_case_insensitive_group_gets_suffixes() {
        let engine = StockEngine::in_memory();
        add_item(&engine, "Wire-ER70S", 0).await;
        add_item(&engine, "WIRE-er70s", 0).await;

        let proposals = engine.integrity.propose_fixes().await.unwrap();
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].proposed_code, "Wire-ER70S");
        assert_eq!(proposals[1].proposed_code, "Wire-ER70S-A");
    }

    #[tokio::test]
    async fn test_rename_onto_existing_code_refused() {
        let engine = StockEngine::in_memory();
        let a = add_item(&engine, "100", 0).await;
        add_item(&engine, "ABC", 0).await;

        let err = engine.apply_rename(a, "abc").await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateEntry(_)));
        assert_eq!(engine.get_item(a).await.unwrap().item_code, "100");

        engine.apply_rename(a, " 200 ").await.unwrap();
        assert_eq!(engine.get_item(a).await.unwrap().item_code, "200");
    }

    #[tokio::test]
    async fn test_rename_invalid_code_refused() {
        let engine = StockEngine::in_memory();
        let a = add_item(&engine, "100", 0).await;

        assert!(matches!(
            engine.apply_rename(a, "   ").await,
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            engine.apply_rename(Uuid::new_v4(), "300").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_proposals_do_not_apply() {
        let engine = StockEngine::in_memory();
        add_item(&engine, "100", 0).await;
        add_item(&engine, "100", 0).await;

        let proposals = engine.integrity.propose_fixes().await.unwrap();
        // Someone takes the proposed code before the fixes are applied
        add_item(&engine, "101", 0).await;

        let err = engine.integrity.apply_fixes(&proposals).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateEntry(_)));
        assert_eq!(engine.find_duplicate_codes().await.unwrap().len(), 1);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn code_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            (100u32..110).prop_map(|n| n.to_string()),
            Just("ROD".to_string()),
            Just("rod".to_string()),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Applying every proposal always leaves no duplicate codes
        #[test]
        fn prop_fixes_remove_all_duplicates(codes in prop::collection::vec(code_strategy(), 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let engine = StockEngine::in_memory();
                for code in &codes {
                    add_item(&engine, code, 0).await;
                }

                let proposals = engine.integrity.propose_fixes().await.unwrap();
                engine.integrity.apply_fixes(&proposals).await.unwrap();

                prop_assert!(engine.find_duplicate_codes().await.unwrap().is_empty());
                prop_assert_eq!(engine.list_items(None).await.unwrap().len(), codes.len());
                Ok(())
            })?;
        }
    }
}
