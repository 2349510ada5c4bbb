//! In-memory store for embedding and tests
//!
//! Tables live behind one `RwLock`; writes of a transaction happen inside a
//! single write-locked section, so readers never see half a change. The
//! read-check-write sequence is serialized per entity by async mutexes,
//! taken item first, then project, each with a bounded wait. An entity's
//! mutex is dropped from the lock table once nobody holds or awaits it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use shared::{
    check_rename, LedgerEntry, ProjectFinancials, ProjectStockAllocation, ProjectStockUsage,
    StockItem,
};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::{ItemLedger, LedgerSnapshot, StockChange, StockSnapshot, StockStore};
use crate::error::{AppError, AppResult};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Tables {
    items: HashMap<Uuid, StockItem>,
    projects: HashMap<Uuid, ProjectFinancials>,
    ledger: Vec<LedgerEntry>,
    usages: Vec<ProjectStockUsage>,
    allocations: Vec<ProjectStockAllocation>,
}

struct Inner {
    tables: RwLock<Tables>,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Duration,
}

impl Inner {
    /// Forget `id`'s mutex if the lock table holds the only reference.
    ///
    /// References are only cloned under the table lock, so a count of one
    /// here means no holder and no waiter.
    fn release(&self, id: Uuid) {
        let mut locks = self.locks.lock();
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }
}

/// A held entity lock
struct EntityGuard {
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    inner: Arc<Inner>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.inner.release(self.id);
    }
}

/// Store keeping every table in process memory
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    fn entity_lock(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .locks
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn acquire(&self, id: Uuid, what: &str) -> AppResult<EntityGuard> {
        let lock = self.entity_lock(id);
        match tokio::time::timeout(self.inner.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(EntityGuard {
                id,
                guard: Some(guard),
                inner: self.inner.clone(),
            }),
            Err(_) => {
                self.inner.release(id);
                tracing::warn!(entity_id = %id, "Timed out waiting for {} lock", what);
                Err(AppError::Busy(format!("timed out waiting for {} {}", what, id)))
            }
        }
    }

    fn read_snapshot(&self, item_id: Uuid, project_id: Option<Uuid>) -> AppResult<StockSnapshot> {
        let tables = self.inner.tables.read();

        let item = tables
            .items
            .get(&item_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Stock item {}", item_id)))?;

        let project = match project_id {
            Some(id) => Some(
                tables
                    .projects
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| AppError::NotFound(format!("Project {}", id)))?,
            ),
            None => None,
        };

        let net_issued = match project_id {
            Some(id) => tables
                .usages
                .iter()
                .filter(|u| u.project_id == id && u.stock_item_id == item_id)
                .fold(0i64, |total, u| total.saturating_add(u.quantity)),
            None => 0,
        };

        Ok(StockSnapshot {
            item,
            project,
            net_issued,
        })
    }

    fn commit(&self, change: &StockChange) {
        let mut tables = self.inner.tables.write();

        tables.items.insert(change.item.id, change.item.clone());
        if let Some(entry) = &change.ledger_entry {
            tables.ledger.push(entry.clone());
        }
        if let Some(usage) = &change.usage {
            tables.usages.push(usage.clone());
        }
        if let Some(allocation) = &change.allocation {
            tables.allocations.push(allocation.clone());
        }
        if let Some(project) = &change.project {
            tables.projects.insert(project.id, project.clone());
        }
    }
}

impl StockStore for MemoryStore {
    async fn create_item(&self, item: StockItem, opening: Option<LedgerEntry>) -> AppResult<StockItem> {
        let mut tables = self.inner.tables.write();

        if tables.items.contains_key(&item.id) {
            return Err(AppError::DuplicateEntry(item.id.to_string()));
        }
        if let Some(entry) = opening {
            tables.ledger.push(entry);
        }
        tables.items.insert(item.id, item.clone());

        Ok(item)
    }

    async fn get_item(&self, id: Uuid) -> AppResult<Option<StockItem>> {
        Ok(self.inner.tables.read().items.get(&id).cloned())
    }

    async fn list_items(&self) -> AppResult<Vec<StockItem>> {
        Ok(self.inner.tables.read().items.values().cloned().collect())
    }

    async fn rename_codes(&self, renames: Vec<(Uuid, String)>) -> AppResult<()> {
        let mut ids: Vec<Uuid> = renames.iter().map(|(id, _)| *id).collect();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            guards.push(self.acquire(*id, "stock item").await?);
        }

        let mut tables = self.inner.tables.write();

        // Check against the state as each rename lands, then write all at once
        let mut staged: Vec<StockItem> = tables.items.values().cloned().collect();
        for (id, code) in &renames {
            check_rename(&staged, *id, code)?;
            let item = staged
                .iter_mut()
                .find(|i| i.id == *id)
                .ok_or_else(|| AppError::NotFound(format!("Stock item {}", id)))?;
            item.item_code = code.trim().to_string();
        }

        let now = chrono::Utc::now();
        for (id, code) in renames {
            if let Some(item) = tables.items.get_mut(&id) {
                item.item_code = code.trim().to_string();
                item.updated_at = now;
            }
        }

        drop(tables);
        drop(guards);
        Ok(())
    }

    async fn save_project(&self, project: ProjectFinancials) -> AppResult<ProjectFinancials> {
        let _guard = self.acquire(project.id, "project").await?;
        self.inner
            .tables
            .write()
            .projects
            .insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: Uuid) -> AppResult<Option<ProjectFinancials>> {
        Ok(self.inner.tables.read().projects.get(&id).cloned())
    }

    async fn item_with_ledger(&self, item_id: Uuid) -> AppResult<Option<ItemLedger>> {
        let tables = self.inner.tables.read();

        Ok(tables.items.get(&item_id).map(|item| ItemLedger {
            item: item.clone(),
            entries: tables
                .ledger
                .iter()
                .filter(|e| e.stock_item_id == item_id)
                .cloned()
                .collect(),
        }))
    }

    async fn ledger_snapshot(&self) -> AppResult<LedgerSnapshot> {
        let tables = self.inner.tables.read();

        Ok(LedgerSnapshot {
            items: tables.items.values().cloned().collect(),
            entries: tables.ledger.clone(),
        })
    }

    async fn get_usage(&self, id: Uuid) -> AppResult<Option<ProjectStockUsage>> {
        Ok(self
            .inner
            .tables
            .read()
            .usages
            .iter()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn usages_for_project(&self, project_id: Uuid) -> AppResult<Vec<ProjectStockUsage>> {
        Ok(self
            .inner
            .tables
            .read()
            .usages
            .iter()
            .filter(|u| u.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn allocations_for_project(
        &self,
        project_id: Uuid,
    ) -> AppResult<Vec<ProjectStockAllocation>> {
        Ok(self
            .inner
            .tables
            .read()
            .allocations
            .iter()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn transact<F>(
        &self,
        item_id: Uuid,
        project_id: Option<Uuid>,
        plan: F,
    ) -> AppResult<StockChange>
    where
        F: FnOnce(StockSnapshot) -> AppResult<StockChange> + Send,
    {
        let _item_guard = self.acquire(item_id, "stock item").await?;
        let _project_guard = match project_id {
            Some(id) => Some(self.acquire(id, "project").await?),
            None => None,
        };

        let snapshot = self.read_snapshot(item_id, project_id)?;
        let change = plan(snapshot)?;
        change.verify(item_id, project_id)?;
        self.commit(&change);

        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use shared::{MovementDirection, DEFAULT_CATEGORY};

    fn item(code: &str) -> StockItem {
        let now = Utc::now();
        StockItem {
            id: Uuid::new_v4(),
            item_code: code.to_string(),
            description: String::new(),
            unit: "ea".to_string(),
            quantity: 0,
            min_level: None,
            max_level: None,
            category: DEFAULT_CATEGORY.to_string(),
            average_unit_cost: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_failed_plan_writes_nothing() {
        let store = MemoryStore::new();
        let created = store.create_item(item("100"), None).await.unwrap();

        let result = store
            .transact(created.id, None, |snapshot| {
                let mut item = snapshot.item;
                item.quantity = 99;
                Err::<StockChange, _>(AppError::Internal(format!("abort {}", item.quantity)))
            })
            .await;

        assert!(result.is_err());
        let stored = store.get_item(created.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 0);
        let ledger = store.item_with_ledger(created.id).await.unwrap().unwrap();
        assert!(ledger.entries.is_empty());
        assert_eq!(ledger.item.quantity, 0);
    }

    #[tokio::test]
    async fn test_entity_locks_are_released_after_use() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let created = store.create_item(item("100"), None).await.unwrap();
        let project = store
            .save_project(ProjectFinancials::new("P-001", "Pipe rack", Decimal::ZERO))
            .await
            .unwrap();

        for _ in 0..3 {
            store
                .transact(created.id, Some(project.id), |s| {
                    Ok(StockChange::new(s.item).with_project(s.project.unwrap()))
                })
                .await
                .unwrap();
        }
        store
            .transact(Uuid::new_v4(), None, |s| Ok(StockChange::new(s.item)))
            .await
            .unwrap_err();
        assert!(store.inner.locks.lock().is_empty());

        // A timed-out waiter does not leave its entry behind either
        let held = store.acquire(created.id, "stock item").await.unwrap();
        let waiter = store.acquire(created.id, "stock item").await;
        assert!(matches!(waiter, Err(AppError::Busy(_))));
        assert_eq!(store.inner.locks.lock().len(), 1);
        drop(held);
        assert!(store.inner.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_ledger_balance_is_rejected() {
        let store = MemoryStore::new();
        let created = store.create_item(item("100"), None).await.unwrap();

        let result = store
            .transact(created.id, None, |snapshot| {
                let mut item = snapshot.item;
                let entry = LedgerEntry::record(
                    &mut item,
                    MovementDirection::In,
                    5,
                    None,
                    None,
                    Utc::now(),
                )?;
                item.quantity = 4;
                Ok(StockChange::new(item).with_ledger_entry(entry))
            })
            .await;

        assert!(matches!(result, Err(AppError::InvariantViolation(_))));
        assert_eq!(store.get_item(created.id).await.unwrap().unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn test_missing_project_is_not_found() {
        let store = MemoryStore::new();
        let created = store.create_item(item("100"), None).await.unwrap();

        let result = store
            .transact(created.id, Some(Uuid::new_v4()), |s| Ok(StockChange::new(s.item)))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rename_codes_rejects_collision_atomically() {
        let store = MemoryStore::new();
        let a = store.create_item(item("100"), None).await.unwrap();
        let b = store.create_item(item("100"), None).await.unwrap();
        let c = store.create_item(item("200"), None).await.unwrap();

        let result = store
            .rename_codes(vec![(b.id, "101".to_string()), (c.id, "100".to_string())])
            .await;
        assert!(matches!(result, Err(AppError::DuplicateEntry(_))));
        assert_eq!(store.get_item(b.id).await.unwrap().unwrap().item_code, "100");

        store
            .rename_codes(vec![(b.id, "101".to_string())])
            .await
            .unwrap();
        assert_eq!(store.get_item(b.id).await.unwrap().unwrap().item_code, "101");
        assert_eq!(store.get_item(a.id).await.unwrap().unwrap().item_code, "100");
    }
}
