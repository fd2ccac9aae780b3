//! A [`FlagStore`] persisted as a single JSON document.
//!
//! The document holds the whole [`Catalog`]. Every committed transaction rewrites it through a
//! temporary file that is renamed over the original, so the file on disk always holds either the
//! previous or the new catalog.
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    catalog::Flag,
    store::{Catalog, FlagStore, MemoryStore, Transaction},
    Error, Result,
};

/// JSON-file backed [`FlagStore`]. Reads are served from memory.
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Open the catalog at `path`. A missing file opens as an empty catalog; the file is created
    /// on the first commit.
    pub fn open(path: impl AsRef<Path>) -> Result<FileStore> {
        let path = path.as_ref().to_owned();

        let catalog: Catalog = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader(reader)?
        } else {
            Catalog::new()
        };
        let inner = MemoryStore::with_catalog(catalog)?;

        log::debug!(target: "switchboard",
                    path:debug = path,
                    flags = inner.snapshot()?.flags().count();
                    "opened catalog file");

        Ok(FileStore { path, inner })
    }

    /// Path of the catalog document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, catalog: &Catalog) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let result = write_catalog(&tmp, catalog)
            .and_then(|()| fs::rename(&tmp, &self.path).map_err(Error::from));
        if let Err(err) = &result {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                log::debug!(target: "switchboard",
                            path:debug = tmp;
                            "failed to remove temporary catalog file: {cleanup}");
            }
            log::warn!(target: "switchboard",
                       path:debug = self.path;
                       "failed to write catalog file: {err}");
            return result;
        }

        log::trace!(target: "switchboard", path:debug = self.path; "wrote catalog file");
        Ok(())
    }
}

fn write_catalog(path: &Path, catalog: &Catalog) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, catalog)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

impl FlagStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Arc<Flag>>> {
        self.inner.get(key)
    }

    fn list(&self) -> Result<Vec<Arc<Flag>>> {
        self.inner.list()
    }

    fn transaction(&self, f: &mut dyn FnMut(&mut Transaction<'_>) -> Result<()>) -> Result<()> {
        self.inner
            .transaction_with(f, |catalog| self.persist(catalog))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::FileStore;
    use crate::{
        admin::{create_flag, create_rule, delete_flag, get_flag, list_flags, toggle_flag},
        catalog::{NewFlag, NewRule, RuleId},
        Error, ErrorKind, FlagStore, StoreError,
    };

    #[test]
    fn missing_file_is_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        let store = FileStore::open(&path).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn commits_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");

        {
            let store = FileStore::open(&path).unwrap();
            create_flag(
                &store,
                NewFlag::new("new-checkout", "New checkout")
                    .enabled(true)
                    .variation("control", "v1")
                    .variation("treatment", "v2"),
            )
            .unwrap();
            create_rule(
                &store,
                "new-checkout",
                NewRule::new("plan", "equals", "premium", 1),
            )
            .unwrap();
            toggle_flag(&store, "new-checkout", false).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        let flag = get_flag(&store, "new-checkout").unwrap();
        assert!(!flag.enabled);
        assert_eq!(flag.variations.len(), 2);
        assert_eq!(flag.rules.len(), 1);
        assert_eq!(flag.rules[0].value, "premium");

        // rule ids continue after reopening
        let rule = create_rule(
            &store,
            "new-checkout",
            NewRule::new("country", "in", "US,CA", 0),
        )
        .unwrap();
        assert_eq!(rule.id, RuleId::from(2));
    }

    #[test]
    fn delete_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        let store = FileStore::open(&path).unwrap();
        create_flag(&store, NewFlag::new("a", "A")).unwrap();
        create_flag(&store, NewFlag::new("b", "B")).unwrap();
        delete_flag(&store, "a").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        let keys: Vec<String> = list_flags(&reopened)
            .unwrap()
            .into_iter()
            .map(|flag| flag.key)
            .collect();
        assert_eq!(keys, vec!["b"]);
    }

    #[test]
    fn failed_mutation_does_not_touch_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        let store = FileStore::open(&path).unwrap();
        create_flag(&store, NewFlag::new("a", "A").variation("on", "1")).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        assert!(create_rule(&store, "a", NewRule::new("plan", "equals", "x", 5)).is_err());
        assert!(create_flag(&store, NewFlag::new("a", "Again")).is_err());

        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn failed_write_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        let store = FileStore::open(&path).unwrap();
        create_flag(&store, NewFlag::new("a", "A")).unwrap();

        // a directory in place of the document makes the final rename fail
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        let err = create_flag(&store, NewFlag::new("b", "B")).unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Io(_))));
        let keys: Vec<String> = list_flags(&store)
            .unwrap()
            .into_iter()
            .map(|flag| flag.key)
            .collect();
        assert_eq!(keys, vec!["a"]);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("flags.json")]);
    }

    #[test]
    fn huge_rule_id_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        fs::write(
            &path,
            r#"{
              "flags": {
                "huge": {
                  "key": "huge",
                  "name": "Huge",
                  "enabled": true,
                  "variations": [{ "index": 0, "name": "off", "value": "0" }],
                  "rules": [{
                    "id": 18446744073709551615, "attribute": "plan", "operator": "equals",
                    "value": "x", "variationIndex": 0, "order": 0,
                    "createdAt": "2024-01-01T00:00:00Z"
                  }],
                  "createdAt": "2024-01-01T00:00:00Z",
                  "updatedAt": "2024-01-01T00:00:00Z"
                }
              }
            }"#,
        )
        .unwrap();
        let err = FileStore::open(&path).err().unwrap();
        assert!(matches!(err, Error::Store(StoreError::Corrupted(_))));
    }

    #[test]
    fn malformed_document_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        fs::write(&path, "{ not json").unwrap();
        let err = FileStore::open(&path).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Store);
    }

    #[test]
    fn dangling_rule_is_rejected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        fs::write(
            &path,
            r#"{
              "flags": {
                "broken": {
                  "key": "broken",
                  "name": "Broken",
                  "enabled": true,
                  "variations": [{ "index": 0, "name": "off", "value": "0" }],
                  "rules": [{
                    "id": 1, "attribute": "plan", "operator": "equals", "value": "x",
                    "variationIndex": 3, "order": 0, "createdAt": "2024-01-01T00:00:00Z"
                  }],
                  "createdAt": "2024-01-01T00:00:00Z",
                  "updatedAt": "2024-01-01T00:00:00Z"
                }
              }
            }"#,
        )
        .unwrap();
        let err = FileStore::open(&path).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Store);
        assert!(err.to_string().contains("references missing variation 3"));
    }

    #[test]
    fn fixture_catalog_opens() {
        let store = FileStore::open("tests/data/catalog.json").unwrap();
        assert!(store.get("new-checkout").unwrap().is_some());
    }
}
