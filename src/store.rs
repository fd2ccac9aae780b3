//! Storage collaborator for the flag catalog.
//!
//! [`FlagStore`] is the seam between the catalog logic and a persistence backend. Reads return
//! immutable `Arc<Flag>` snapshots; writes go through [`FlagStore::transaction`], which applies
//! all staged changes at once or none of them.
//!
//! [`MemoryStore`] keeps the whole [`Catalog`] behind an `RwLock<Arc<_>>` and replaces it
//! completely on every commit, so a reader holding a snapshot is never affected by further
//! writes.
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::{catalog::Flag, catalog::RuleId, Result, StoreError};

/// Persistence backend for flag aggregates.
///
/// Implementations must provide snapshot-consistent reads of a flag (the flag together with all
/// its variations and rules) and must apply a transaction atomically. Calls may block; they are
/// never retried by the caller.
pub trait FlagStore: Send + Sync {
    /// Load a flag snapshot by key.
    fn get(&self, key: &str) -> Result<Option<Arc<Flag>>>;

    /// Load all flags, ordered by key.
    fn list(&self) -> Result<Vec<Arc<Flag>>>;

    /// Run `f` against a staging view of the catalog. If `f` returns `Ok`, staged changes are
    /// committed atomically; otherwise they are discarded.
    fn transaction(&self, f: &mut dyn FnMut(&mut Transaction<'_>) -> Result<()>) -> Result<()>;
}

/// Run `f` in a store transaction and return its output.
pub(crate) fn atomically<T>(
    store: &dyn FlagStore,
    f: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
) -> Result<T> {
    let mut f = Some(f);
    let mut output = None;
    store.transaction(&mut |tx| {
        let f = f
            .take()
            .ok_or_else(|| StoreError::Backend("transaction body invoked twice".to_owned()))?;
        output = Some(f(tx)?);
        Ok(())
    })?;
    output.ok_or_else(|| StoreError::Backend("transaction body was not invoked".to_owned()).into())
}

/// The persisted state: flag aggregates keyed by flag key, plus the rule id sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    flags: BTreeMap<String, Arc<Flag>>,
    #[serde(default = "first_rule_id")]
    next_rule_id: u64,
}

fn first_rule_id() -> u64 {
    1
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::new()
    }
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Catalog {
        Catalog {
            flags: BTreeMap::new(),
            next_rule_id: first_rule_id(),
        }
    }

    /// Look up a flag by key.
    pub fn get(&self, key: &str) -> Option<&Arc<Flag>> {
        self.flags.get(key)
    }

    /// Iterate over flags in key order.
    pub fn flags(&self) -> impl Iterator<Item = &Arc<Flag>> {
        self.flags.values()
    }

    /// Check invariants of the whole catalog: each flag is stored under its own key, each flag
    /// satisfies [`Flag::check_invariants`], and rule ids are unique and below the id sequence.
    ///
    /// Bumps the id sequence past the highest rule id if needed.
    pub fn validate(&mut self) -> std::result::Result<(), String> {
        let mut owners: HashMap<RuleId, &str> = HashMap::new();
        let mut max_rule_id = 0;
        for (key, flag) in &self.flags {
            if key != &flag.key {
                return Err(format!("flag {} stored under key {key}", flag.key));
            }
            flag.check_invariants()?;
            for rule in &flag.rules {
                if let Some(owner) = owners.insert(rule.id, key) {
                    return Err(format!(
                        "rule {} appears in flags {owner} and {key}",
                        rule.id
                    ));
                }
                max_rule_id = max_rule_id.max(u64::from(rule.id));
            }
        }
        let after_max = max_rule_id
            .checked_add(1)
            .ok_or_else(|| format!("rule id {max_rule_id} leaves no room for new rules"))?;
        self.next_rule_id = self.next_rule_id.max(after_max);
        Ok(())
    }
}

/// Staging view over a catalog snapshot. Reads see the transaction's own writes.
pub struct Transaction<'a> {
    base: &'a Catalog,
    /// `None` marks a removed flag.
    staged: HashMap<String, Option<Arc<Flag>>>,
    next_rule_id: u64,
}

impl<'a> Transaction<'a> {
    /// Start a transaction on top of `base`.
    pub fn new(base: &'a Catalog) -> Transaction<'a> {
        Transaction {
            base,
            staged: HashMap::new(),
            next_rule_id: base.next_rule_id,
        }
    }

    /// Load a flag snapshot by key.
    pub fn get(&self, key: &str) -> Option<Arc<Flag>> {
        match self.staged.get(key) {
            Some(staged) => staged.clone(),
            None => self.base.get(key).cloned(),
        }
    }

    #[allow(missing_docs)]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Stage an insert or replacement of `flag`.
    pub fn put(&mut self, flag: Flag) {
        self.staged.insert(flag.key.clone(), Some(Arc::new(flag)));
    }

    /// Stage removal of a flag, returning whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let existed = self.contains(key);
        if existed {
            self.staged.insert(key.to_owned(), None);
        }
        existed
    }

    /// Allocate a new rule id. Ids allocated by a discarded transaction are not consumed.
    ///
    /// Fails with [`StoreError::Corrupted`] once the sequence is exhausted.
    pub fn next_rule_id(&mut self) -> Result<RuleId> {
        let id = self.next_rule_id;
        self.next_rule_id = id
            .checked_add(1)
            .ok_or_else(|| StoreError::Corrupted("rule id sequence exhausted".to_owned()))?;
        Ok(RuleId::from(id))
    }

    /// Whether the transaction staged any change.
    pub fn is_dirty(&self) -> bool {
        !self.staged.is_empty() || self.next_rule_id != self.base.next_rule_id
    }

    /// Build the catalog resulting from applying staged changes to the base snapshot.
    pub fn into_catalog(self) -> Catalog {
        let mut catalog = self.base.clone();
        for (key, staged) in self.staged {
            match staged {
                Some(flag) => {
                    catalog.flags.insert(key, flag);
                }
                None => {
                    catalog.flags.remove(&key);
                }
            }
        }
        catalog.next_rule_id = self.next_rule_id;
        catalog
    }
}

/// Thread-safe in-memory [`FlagStore`].
#[derive(Default)]
pub struct MemoryStore {
    catalog: RwLock<Arc<Catalog>>,
    /// Serializes writers so that each transaction sees the previous commit.
    writer: Mutex<()>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        MemoryStore {
            catalog: RwLock::new(Arc::new(Catalog::new())),
            writer: Mutex::new(()),
        }
    }

    /// Create a store holding `catalog`.
    ///
    /// The catalog is checked with [`Catalog::validate`] first, which also moves the rule id
    /// sequence past every existing rule. A catalog that violates its invariants is rejected with
    /// [`StoreError::Corrupted`].
    pub fn with_catalog(mut catalog: Catalog) -> Result<Self> {
        catalog.validate().map_err(StoreError::Corrupted)?;
        Ok(MemoryStore {
            catalog: RwLock::new(Arc::new(catalog)),
            writer: Mutex::new(()),
        })
    }

    /// Get the currently committed catalog.
    pub fn snapshot(&self) -> Result<Arc<Catalog>> {
        let catalog = self.catalog.read().map_err(|_| StoreError::Poisoned)?;
        Ok(catalog.clone())
    }

    /// Run a transaction, calling `persist` with the new catalog before it is published. If
    /// `persist` fails, the commit is abandoned.
    pub(crate) fn transaction_with(
        &self,
        f: &mut dyn FnMut(&mut Transaction<'_>) -> Result<()>,
        persist: impl FnOnce(&Catalog) -> Result<()>,
    ) -> Result<()> {
        let _writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;

        let base = self.snapshot()?;
        let mut tx = Transaction::new(&base);
        f(&mut tx)?;

        if !tx.is_dirty() {
            return Ok(());
        }

        // Constructing new value before requesting the lock to minimize lock span.
        let catalog = tx.into_catalog();
        persist(&catalog)?;
        let new_value = Arc::new(catalog);

        let mut slot = self.catalog.write().map_err(|_| StoreError::Poisoned)?;
        *slot = new_value;
        log::debug!(target: "switchboard", "committed catalog transaction");
        Ok(())
    }
}

impl FlagStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Arc<Flag>>> {
        Ok(self.snapshot()?.get(key).cloned())
    }

    fn list(&self) -> Result<Vec<Arc<Flag>>> {
        Ok(self.snapshot()?.flags().cloned().collect())
    }

    fn transaction(&self, f: &mut dyn FnMut(&mut Transaction<'_>) -> Result<()>) -> Result<()> {
        self.transaction_with(f, |_| Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{atomically, Catalog, FlagStore, MemoryStore};
    use crate::{
        admin::{create_rule, delete_rule, get_flag},
        catalog::{tests::new_checkout, NewRule, RuleId},
        Error, ErrorKind, StoreError,
    };

    #[test]
    fn can_write_from_another_thread() {
        let store = Arc::new(MemoryStore::new());

        assert!(store.get("new-checkout").unwrap().is_none());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                atomically(&*store, |tx| {
                    tx.put(new_checkout());
                    Ok(())
                })
            })
            .join();
        }

        assert!(store.get("new-checkout").unwrap().is_some());
    }

    #[test]
    fn failed_transaction_leaves_catalog_unchanged() {
        let store = MemoryStore::new();
        let result: crate::Result<()> = atomically(&store, |tx| {
            tx.put(new_checkout());
            let _ = tx.next_rule_id();
            Err(Error::Validation("nope".into()))
        });
        assert!(result.is_err());
        assert!(store.list().unwrap().is_empty());

        // the id allocated by the failed transaction is reused
        let id = atomically(&store, |tx| tx.next_rule_id()).unwrap();
        assert_eq!(id, RuleId::from(1));
    }

    #[test]
    fn snapshot_is_not_affected_by_later_writes() {
        let store = MemoryStore::new();
        atomically(&store, |tx| {
            tx.put(new_checkout());
            Ok(())
        })
        .unwrap();

        let before = store.get("new-checkout").unwrap().unwrap();
        atomically(&store, |tx| {
            let mut flag = (*tx.get("new-checkout").unwrap()).clone();
            flag.enabled = false;
            tx.put(flag);
            Ok(())
        })
        .unwrap();

        assert!(before.enabled);
        assert!(!store.get("new-checkout").unwrap().unwrap().enabled);
    }

    #[test]
    fn transaction_reads_its_own_writes() {
        let store = MemoryStore::new();
        atomically(&store, |tx| {
            tx.put(new_checkout());
            assert!(tx.contains("new-checkout"));
            assert!(tx.remove("new-checkout"));
            assert!(!tx.contains("new-checkout"));
            assert!(!tx.remove("new-checkout"));
            Ok(())
        })
        .unwrap();
        assert!(store.get("new-checkout").unwrap().is_none());
    }

    #[test]
    fn validate_bumps_rule_sequence() {
        let mut catalog: Catalog = serde_json::from_value(serde_json::json!({
            "flags": { "new-checkout": new_checkout() }
        }))
        .unwrap();
        catalog.validate().unwrap();
        assert_eq!(catalog.next_rule_id, 2);
    }

    #[test]
    fn validate_rejects_misfiled_flag() {
        let mut catalog: Catalog = serde_json::from_value(serde_json::json!({
            "flags": { "other": new_checkout() },
            "nextRuleId": 5
        }))
        .unwrap();
        assert!(catalog.validate().unwrap_err().contains("stored under key other"));
    }

    #[test]
    fn seeded_store_continues_rule_ids() {
        let catalog: Catalog = serde_json::from_value(serde_json::json!({
            "flags": { "new-checkout": new_checkout() }
        }))
        .unwrap();
        let store = MemoryStore::with_catalog(catalog).unwrap();

        let rule = create_rule(
            &store,
            "new-checkout",
            NewRule::new("country", "in", "US,CA", 0),
        )
        .unwrap();
        assert_eq!(rule.id, RuleId::from(2));

        delete_rule(&store, "new-checkout", rule.id).unwrap();
        let rules = get_flag(&store, "new-checkout").unwrap().rules;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, RuleId::from(1));
    }

    #[test]
    fn seeded_store_rejects_invalid_catalog() {
        let catalog: Catalog = serde_json::from_value(serde_json::json!({
            "flags": { "other": new_checkout() }
        }))
        .unwrap();
        let err = MemoryStore::with_catalog(catalog).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Store);
        assert!(matches!(err, Error::Store(StoreError::Corrupted(_))));
    }

    #[test]
    fn rule_id_at_the_end_of_the_sequence_is_rejected() {
        let mut flag = new_checkout();
        flag.rules[0].id = RuleId::from(u64::MAX);
        let mut catalog: Catalog = serde_json::from_value(serde_json::json!({
            "flags": { "new-checkout": flag }
        }))
        .unwrap();
        assert!(catalog.validate().unwrap_err().contains("leaves no room"));
    }

    #[test]
    fn exhausted_rule_id_sequence_is_an_error() {
        let catalog: Catalog = serde_json::from_value(serde_json::json!({
            "flags": { "new-checkout": new_checkout() },
            "nextRuleId": u64::MAX
        }))
        .unwrap();
        let store = MemoryStore::with_catalog(catalog).unwrap();

        let err = create_rule(
            &store,
            "new-checkout",
            NewRule::new("plan", "equals", "gold", 1),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Corrupted(_))));
        assert_eq!(get_flag(&store, "new-checkout").unwrap().rules.len(), 1);
    }

    #[test]
    fn failed_persist_leaves_catalog_unchanged() {
        let store = MemoryStore::new();
        let result = store.transaction_with(
            &mut |tx| {
                tx.put(new_checkout());
                Ok(())
            },
            |_| Err(StoreError::Backend("disk full".to_owned()).into()),
        );
        assert!(matches!(result, Err(Error::Store(StoreError::Backend(_)))));
        assert!(store.get("new-checkout").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }
}
