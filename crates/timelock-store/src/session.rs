//! Typed access to the persisted documents

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use timelock_api::{AppMetadata, SessionDocument};
use timelock_util::{day_key, PackageId};
use tracing::debug;

use crate::{KvStore, StoreResult};

/// Key of the session document
pub const SESSION_DOCUMENT_KEY: &str = "sessionDocument";

/// Key of the controlled-apps catalog
pub const CONTROLLED_APPS_CATALOG_KEY: &str = "controlledAppsCatalog";

const DAILY_USAGE_PREFIX: &str = "dailyUsage:";

/// Key holding the usage totals for `day`
pub fn daily_usage_key(day: NaiveDate) -> String {
    format!("{}{}", DAILY_USAGE_PREFIX, day_key(day))
}

/// Seconds of access used per package on one calendar day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DailyUsage {
    pub seconds: BTreeMap<PackageId, u64>,
}

impl DailyUsage {
    pub fn get(&self, package_id: &PackageId) -> u64 {
        self.seconds.get(package_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.seconds.values().sum()
    }
}

/// Result of a revision-checked save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The store now holds the document
    Saved,
    /// Another writer got there first; nothing was written
    Superseded { stored_revision: u64 },
}

/// Typed view over a [`KvStore`]
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn is_healthy(&self) -> bool {
        self.kv.is_healthy()
    }

    /// Load the session document. An absent key is an empty document.
    pub fn load_document(&self) -> StoreResult<SessionDocument> {
        match self.kv.get(SESSION_DOCUMENT_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(SessionDocument::default()),
        }
    }

    /// Revision currently persisted, 0 when nothing is stored
    pub fn stored_revision(&self) -> StoreResult<u64> {
        Ok(self.load_document()?.revision)
    }

    /// Save `document` unless the stored one already has the same or a higher
    /// revision. The check and the write are a single compare-and-swap, so of
    /// two contexts committing the same revision only one succeeds.
    pub fn save_document_if_newer(&self, document: &SessionDocument) -> StoreResult<SaveOutcome> {
        let current = self.kv.get(SESSION_DOCUMENT_KEY)?;
        let stored = match &current {
            Some(json) => serde_json::from_str::<SessionDocument>(json)?,
            None => SessionDocument::default(),
        };

        if stored == *document {
            return Ok(SaveOutcome::Saved);
        }
        if stored.revision >= document.revision {
            return Ok(SaveOutcome::Superseded {
                stored_revision: stored.revision,
            });
        }

        let json = serde_json::to_string(document)?;
        if !self
            .kv
            .compare_and_swap(SESSION_DOCUMENT_KEY, current.as_deref(), &json)?
        {
            // Written between our read and our swap
            return Ok(SaveOutcome::Superseded {
                stored_revision: self.stored_revision()?,
            });
        }

        debug!(revision = document.revision, entries = document.len(), "Session document saved");
        Ok(SaveOutcome::Saved)
    }

    /// Overwrite the stored document regardless of its revision
    pub fn save_document(&self, document: &SessionDocument) -> StoreResult<()> {
        let json = serde_json::to_string(document)?;
        self.kv.set(SESSION_DOCUMENT_KEY, &json)?;
        debug!(revision = document.revision, entries = document.len(), "Session document saved");
        Ok(())
    }

    pub fn load_catalog(&self) -> StoreResult<Vec<AppMetadata>> {
        match self.kv.get(CONTROLLED_APPS_CATALOG_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the catalog with the metadata of every entry in `document`
    pub fn save_catalog_from(&self, document: &SessionDocument) -> StoreResult<()> {
        let catalog: Vec<AppMetadata> = document.iter().map(|e| e.metadata()).collect();
        let json = serde_json::to_string(&catalog)?;
        self.kv.set(CONTROLLED_APPS_CATALOG_KEY, &json)?;
        debug!(apps = catalog.len(), "Controlled apps catalog saved");
        Ok(())
    }

    pub fn daily_usage(&self, day: NaiveDate) -> StoreResult<DailyUsage> {
        match self.kv.get(&daily_usage_key(day))? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(DailyUsage::default()),
        }
    }

    /// Add `seconds` to the day's total for `package_id`
    pub fn add_daily_usage(
        &self,
        package_id: &PackageId,
        day: NaiveDate,
        seconds: u64,
    ) -> StoreResult<u64> {
        let mut usage = self.daily_usage(day)?;
        let total = usage.seconds.entry(package_id.clone()).or_insert(0);
        *total = total.saturating_add(seconds);
        let total = *total;

        let json = serde_json::to_string(&usage)?;
        self.kv.set(&daily_usage_key(day), &json)?;

        debug!(package_id = %package_id, day = %day_key(day), added_secs = seconds, total_secs = total, "Usage added");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, SqliteStore};
    use timelock_api::{AppEntry, AppState};

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[test]
    fn absent_document_is_empty() {
        let store = store();
        let doc = store.load_document().unwrap();
        assert_eq!(doc.revision, 0);
        assert!(doc.is_empty());
        assert_eq!(store.stored_revision().unwrap(), 0);
    }

    #[test]
    fn document_round_trip() {
        let store = store();
        let mut doc = SessionDocument::new();
        doc.revision = 2;
        let mut entry = AppEntry::pending(AppMetadata::new("com.x", "X"));
        entry.state = AppState::Active;
        entry.access_budget_seconds = 60;
        entry.remaining_seconds = 60;
        entry.cycle_started_at = Some(timelock_util::now());
        doc.entries.insert(entry.package_id.clone(), entry);

        store.save_document(&doc).unwrap();
        assert_eq!(store.load_document().unwrap(), doc);
        assert_eq!(store.stored_revision().unwrap(), 2);
    }

    fn doc_at(revision: u64, ids: &[&str]) -> SessionDocument {
        let mut doc = SessionDocument::new();
        doc.revision = revision;
        for id in ids {
            let entry = AppEntry::pending(AppMetadata::new(*id, *id));
            doc.entries.insert(entry.package_id.clone(), entry);
        }
        doc
    }

    #[test]
    fn conditional_save_rejects_same_or_older_revision() {
        let store = store();
        assert_eq!(store.save_document_if_newer(&doc_at(1, &["com.a"])).unwrap(), SaveOutcome::Saved);

        // Same revision from the other context: only the first commit stands
        assert_eq!(
            store.save_document_if_newer(&doc_at(1, &["com.b"])).unwrap(),
            SaveOutcome::Superseded { stored_revision: 1 }
        );
        assert_eq!(
            store.save_document_if_newer(&doc_at(0, &[])).unwrap(),
            SaveOutcome::Superseded { stored_revision: 1 }
        );
        assert_eq!(store.load_document().unwrap(), doc_at(1, &["com.a"]));

        // Saving what is already stored is not a conflict
        assert_eq!(store.save_document_if_newer(&doc_at(1, &["com.a"])).unwrap(), SaveOutcome::Saved);
        assert_eq!(store.save_document_if_newer(&doc_at(2, &["com.a", "com.b"])).unwrap(), SaveOutcome::Saved);
        assert_eq!(store.stored_revision().unwrap(), 2);
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(SESSION_DOCUMENT_KEY, "not json").unwrap();
        let store = SessionStore::new(kv);

        assert!(store.load_document().is_err());
    }

    #[test]
    fn catalog_follows_document() {
        let store = store();
        assert!(store.load_catalog().unwrap().is_empty());

        let mut doc = SessionDocument::new();
        for (id, name) in [("com.a", "A"), ("com.b", "B")] {
            let entry = AppEntry::pending(AppMetadata::new(id, name));
            doc.entries.insert(entry.package_id.clone(), entry);
        }
        store.save_catalog_from(&doc).unwrap();

        let catalog = store.load_catalog().unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].display_name, "A");
    }

    #[test]
    fn daily_usage_accumulates_per_day() {
        let store = store();
        let id = PackageId::new("com.x");
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let next_day = day.succ_opt().unwrap();

        assert_eq!(store.add_daily_usage(&id, day, 300).unwrap(), 300);
        assert_eq!(store.add_daily_usage(&id, day, 200).unwrap(), 500);
        store.add_daily_usage(&id, next_day, 50).unwrap();

        assert_eq!(store.daily_usage(day).unwrap().get(&id), 500);
        assert_eq!(store.daily_usage(next_day).unwrap().total(), 50);
    }

    #[test]
    fn daily_usage_key_format() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        assert_eq!(daily_usage_key(day), "dailyUsage:2025-01-09");
    }
}
