//! Item-code integrity pass
//!
//! Never runs inside stock operations. An operator lists duplicate groups,
//! reviews the proposed codes and applies them as one rename.

use shared::{find_duplicate_codes, propose_fixes, CodeAllocator, CodeProposal, DuplicateGroup};
use tracing::instrument;
use uuid::Uuid;

use crate::error::AppResult;
use crate::store::StockStore;

/// Integrity service for duplicate item codes
#[derive(Clone)]
pub struct IntegrityService<S> {
    store: S,
}

impl<S: StockStore> IntegrityService<S> {
    /// Create a new IntegrityService instance
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Groups of items whose codes collide case-insensitively
    pub async fn find_duplicate_codes(&self) -> AppResult<Vec<DuplicateGroup>> {
        let items = self.store.list_items().await?;
        let groups = find_duplicate_codes(&items);
        if !groups.is_empty() {
            tracing::warn!(groups = groups.len(), "Duplicate item codes found");
        }
        Ok(groups)
    }

    /// Proposed codes for one group, avoiding every code currently in use
    pub async fn propose_code(&self, group: &DuplicateGroup) -> AppResult<Vec<CodeProposal>> {
        let items = self.store.list_items().await?;
        Ok(CodeAllocator::from_items(&items).propose(group))
    }

    /// Proposals for every duplicate group, with no code handed out twice
    pub async fn propose_fixes(&self) -> AppResult<Vec<CodeProposal>> {
        let items = self.store.list_items().await?;
        Ok(propose_fixes(&items))
    }

    /// Rename one item's code, refusing a code another item already uses
    #[instrument(skip(self))]
    pub async fn apply_rename(&self, item_id: Uuid, code: &str) -> AppResult<()> {
        self.store
            .rename_codes(vec![(item_id, code.trim().to_string())])
            .await?;
        tracing::info!(item_id = %item_id, code = %code.trim(), "Item code renamed");
        Ok(())
    }

    /// Apply every proposal that changes a code, as one atomic rename.
    ///
    /// Returns the number of items renamed.
    #[instrument(skip(self, proposals), fields(count = proposals.len()))]
    pub async fn apply_fixes(&self, proposals: &[CodeProposal]) -> AppResult<usize> {
        let renames: Vec<(Uuid, String)> = proposals
            .iter()
            .filter(|p| p.is_change())
            .map(|p| (p.id, p.proposed_code.clone()))
            .collect();

        if renames.is_empty() {
            return Ok(0);
        }

        let count = renames.len();
        self.store.rename_codes(renames).await?;
        tracing::info!(renamed = count, "Duplicate item codes resolved");
        Ok(count)
    }
}
