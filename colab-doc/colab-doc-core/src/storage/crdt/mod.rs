//! Snapshot store for colab documents built on [Loro](https://crates.io/crates/loro).
//! Every document lives in its own file and is loaded at startup.

use crate::acl::AclMap;
use crate::config::StoreConfig;
use crate::controller::{
    SheetDocController, StatementDocController, NAME_KEY, PROPERTIES_KEY, SHEET_DOC_TYPE,
    STATEMENT_DOC_TYPE, TYPE_KEY,
};
use crate::error::ColabError;
use crate::events::{DocEvent, EventBus};
use anyhow::{anyhow, Context, Result};
use loro::{ExportMode, Frontiers, LoroDoc, Subscription, ToJson};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Kinds of documents managed by the store.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentType {
    Statement,
    Sheet,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Statement => STATEMENT_DOC_TYPE,
            DocumentType::Sheet => SHEET_DOC_TYPE,
        }
    }

    pub fn from_type_tag(s: &str) -> Option<Self> {
        match s {
            STATEMENT_DOC_TYPE => Some(DocumentType::Statement),
            SHEET_DOC_TYPE => Some(DocumentType::Sheet),
            _ => None,
        }
    }
}

/// A loaded colab document.
pub struct ColabDocument {
    id: Uuid,
    doc: LoroDoc,
    doc_type: DocumentType,
    /// Oplog version written by the last [`save`](Self::save) or load.
    saved: Mutex<Frontiers>,
    _local_updates: Option<Subscription>,
}

impl ColabDocument {
    fn create(id: Uuid, doc_type: DocumentType, name: &str, acls: &AclMap) -> Result<Self> {
        let doc = LoroDoc::new();
        match doc_type {
            DocumentType::Statement => StatementDocController::init(&doc, name, acls)?,
            DocumentType::Sheet => SheetDocController::init(&doc, name, acls)?,
        }
        doc.commit();
        Ok(Self {
            id,
            doc,
            doc_type,
            saved: Mutex::new(Frontiers::default()),
            _local_updates: None,
        })
    }

    pub fn from_bytes(id: Uuid, bytes: &[u8]) -> Result<Self> {
        let doc = LoroDoc::new();
        doc.import(bytes)
            .with_context(|| format!("importing snapshot of {}", id))?;
        let tag = doc
            .get_map(PROPERTIES_KEY)
            .get(TYPE_KEY)
            .and_then(|v| v.into_value().ok())
            .and_then(|v| v.into_string().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("document {} has no type", id))?;
        let doc_type = DocumentType::from_type_tag(&tag)
            .ok_or_else(|| anyhow!("document {} has unknown type '{}'", id, tag))?;
        let saved = Mutex::new(doc.oplog_frontiers());
        Ok(Self {
            id,
            doc,
            doc_type,
            saved,
            _local_updates: None,
        })
    }

    pub fn load(id: Uuid, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_bytes(id, &bytes)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn doc_type(&self) -> DocumentType {
        self.doc_type
    }

    /// The shared CRDT document. Clones observe the same state.
    pub fn doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn name(&self) -> Option<String> {
        self.doc
            .get_map(PROPERTIES_KEY)
            .get(NAME_KEY)
            .and_then(|v| v.into_value().ok())
            .and_then(|v| v.into_string().ok())
            .map(|s| s.to_string())
    }

    pub fn statement_controller(
        &self,
        prpls: Vec<String>,
    ) -> crate::error::Result<StatementDocController> {
        if self.doc_type != DocumentType::Statement {
            return Err(ColabError::WrongDocumentType {
                expected: STATEMENT_DOC_TYPE,
                found: self.doc_type.as_str().to_string(),
            });
        }
        Ok(StatementDocController::new(self.doc.clone(), prpls))
    }

    pub fn sheet_controller(&self, prpls: Vec<String>) -> crate::error::Result<SheetDocController> {
        if self.doc_type != DocumentType::Sheet {
            return Err(ColabError::WrongDocumentType {
                expected: SHEET_DOC_TYPE,
                found: self.doc_type.as_str().to_string(),
            });
        }
        Ok(SheetDocController::new(self.doc.clone(), prpls))
    }

    /// Import CRDT updates encoded via `LoroDoc::export`.
    pub fn import_updates(&self, bytes: &[u8]) -> Result<()> {
        self.doc.import(bytes).map_err(|e| anyhow!(e))?;
        Ok(())
    }

    /// Export the current document state as a CRDT snapshot.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| anyhow!(e))
    }

    /// Deep JSON view of the whole document.
    pub fn to_json(&self) -> serde_json::Value {
        self.doc.get_deep_value().to_json_value()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.snapshot_bytes()?;
        let version = self.doc.oplog_frontiers();
        std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
        *self.saved.lock() = version;
        Ok(())
    }

    /// Whether the oplog holds changes the last save did not write.
    pub fn has_unsaved_changes(&self) -> bool {
        self.doc.oplog_frontiers() != *self.saved.lock()
    }

    /// Publish the encoded changes of every local commit on `events`.
    fn publish_local_updates(&mut self, events: &EventBus) {
        let id = self.id;
        let events = events.clone();
        let sub = self.doc.subscribe_local_update(Box::new(move |bytes: &Vec<u8>| {
            events.send(DocEvent::LocalUpdate {
                id,
                bytes: bytes.clone(),
            });
            true
        }));
        self._local_updates = Some(sub);
    }
}

/// Filesystem-backed set of colab documents.
pub struct DocumentStore {
    docs: HashMap<Uuid, ColabDocument>,
    config: StoreConfig,
    events: EventBus,
}

impl DocumentStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let events = EventBus::new(config.event_capacity);
        Self::with_events(config, events)
    }

    pub fn with_events(config: StoreConfig, events: EventBus) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating {}", config.data_dir.display()))?;
        let mut docs = HashMap::new();
        for entry in std::fs::read_dir(&config.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(config.extension.as_str()) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            match ColabDocument::load(id, &path) {
                Ok(mut doc) => {
                    doc.publish_local_updates(&events);
                    docs.insert(id, doc);
                }
                Err(e) => warn!("skipping {}: {:#}", path.display(), e),
            }
        }
        info!(
            "loaded {} documents from {}",
            docs.len(),
            config.data_dir.display()
        );
        Ok(Self {
            docs,
            config,
            events,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn path(&self, id: Uuid) -> std::path::PathBuf {
        self.config.snapshot_path(&id.to_string())
    }

    fn create(&mut self, doc_type: DocumentType, name: &str, acls: &AclMap) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let mut doc = ColabDocument::create(id, doc_type, name, acls)?;
        doc.publish_local_updates(&self.events);
        doc.save(&self.path(id))?;
        self.docs.insert(id, doc);
        info!("created {} {} '{}'", doc_type.as_str(), id, name);
        self.events.send(DocEvent::Created {
            id,
            doc_type: doc_type.as_str().to_string(),
        });
        Ok(id)
    }

    /// New statement document whose document ACLs are `acls`.
    pub fn create_statement(&mut self, name: &str, acls: &AclMap) -> Result<Uuid> {
        self.create(DocumentType::Statement, name, acls)
    }

    /// New sheet document whose document ACLs are `acls`.
    pub fn create_sheet(&mut self, name: &str, acls: &AclMap) -> Result<Uuid> {
        self.create(DocumentType::Sheet, name, acls)
    }

    pub fn get(&self, id: Uuid) -> Option<&ColabDocument> {
        self.docs.get(&id)
    }

    fn require(&self, id: Uuid) -> Result<&ColabDocument> {
        self.docs
            .get(&id)
            .ok_or_else(|| anyhow!("document {} not found", id))
    }

    /// Ids of all loaded documents, sorted.
    pub fn ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.docs.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Commit pending local changes of a document. Returns whether the
    /// document now differs from its last saved snapshot; the snapshot is
    /// rewritten in that case when `save_on_commit` is set.
    pub fn commit(&self, id: Uuid) -> Result<bool> {
        let doc = self.require(id)?;
        doc.doc().commit();
        let changed = doc.has_unsaved_changes();
        if changed && self.config.save_on_commit {
            doc.save(&self.path(id))?;
        }
        debug!("committed {} (changed: {})", id, changed);
        Ok(changed)
    }

    /// Apply updates received from another peer and persist the result.
    pub fn import_updates(&mut self, id: Uuid, bytes: &[u8]) -> Result<()> {
        let doc = self.require(id)?;
        doc.import_updates(bytes)?;
        doc.save(&self.path(id))?;
        self.events.send(DocEvent::Imported { id });
        Ok(())
    }

    pub fn export_snapshot(&self, id: Uuid) -> Result<Vec<u8>> {
        self.require(id)?.snapshot_bytes()
    }

    pub fn save(&self, id: Uuid) -> Result<()> {
        self.require(id)?.save(&self.path(id))
    }

    pub fn delete(&mut self, id: Uuid) -> Result<()> {
        if self.docs.remove(&id).is_none() {
            return Err(anyhow!("document {} not found", id));
        }
        let path = self.path(id);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("removing {}", path.display()))?;
        }
        info!("deleted {}", id);
        self.events.send(DocEvent::Deleted { id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::Permission;
    use crate::controller::{DocController, StatementController};

    fn owner_acls() -> AclMap {
        [
            (Permission::Manage, vec!["owner".to_string()]),
            (Permission::Edit, vec!["owner".to_string()]),
            (Permission::AddRemove, vec!["owner".to_string()]),
        ]
        .into_iter()
        .collect()
    }

    fn store_in(dir: &Path) -> DocumentStore {
        DocumentStore::new(StoreConfig::new(dir)).unwrap()
    }

    #[test]
    fn create_and_reload_documents() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut store = store_in(tempdir.path());
        let stmt = store.create_statement("policy", &owner_acls()).unwrap();
        let sheet = store.create_sheet("grid", &owner_acls()).unwrap();
        assert!(tempdir.path().join(format!("{}.bin", stmt)).exists());

        let ctrl = store
            .get(stmt)
            .unwrap()
            .statement_controller(vec!["owner".to_string()])
            .unwrap();
        ctrl.add_language("en").unwrap();
        assert!(ctrl.set_statement_element_text("en", "hello").unwrap());
        assert!(store.commit(stmt).unwrap());
        drop(store);

        let store = store_in(tempdir.path());
        let mut expected = vec![stmt, sheet];
        expected.sort();
        assert_eq!(store.ids(), expected);
        let doc = store.get(stmt).unwrap();
        assert_eq!(doc.doc_type(), DocumentType::Statement);
        assert_eq!(doc.name().as_deref(), Some("policy"));
        let ctrl = doc.statement_controller(vec!["owner".to_string()]).unwrap();
        assert_eq!(ctrl.get_statement_element_text("en").unwrap(), "hello");
        assert_eq!(ctrl.get_doc_acl_map(), owner_acls());
        assert_eq!(store.get(sheet).unwrap().doc_type(), DocumentType::Sheet);
    }

    #[test]
    fn controller_kind_must_match_document() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut store = store_in(tempdir.path());
        let stmt = store.create_statement("policy", &AclMap::new()).unwrap();
        let doc = store.get(stmt).unwrap();
        assert!(matches!(
            doc.sheet_controller(Vec::new()),
            Err(ColabError::WrongDocumentType { .. })
        ));
        assert!(doc.statement_controller(Vec::new()).is_ok());
    }

    #[test]
    fn commit_without_changes_reports_false() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut store = store_in(tempdir.path());
        let id = store.create_statement("policy", &AclMap::new()).unwrap();
        assert!(!store.commit(id).unwrap());
    }

    #[test]
    fn committed_edits_survive_reload() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut store = store_in(tempdir.path());
        let id = store.create_statement("policy", &owner_acls()).unwrap();
        let doc = store.get(id).unwrap();
        assert!(!doc.has_unsaved_changes());

        let ctrl = doc.statement_controller(vec!["owner".to_string()]).unwrap();
        ctrl.add_language("en").unwrap();
        assert!(store.commit(id).unwrap());
        assert!(!store.get(id).unwrap().has_unsaved_changes());
        assert!(!store.commit(id).unwrap());

        // committed by the controller itself, saved by the next store commit
        ctrl.add_language("fr").unwrap();
        ctrl.commit();
        assert!(store.get(id).unwrap().has_unsaved_changes());
        assert!(store.commit(id).unwrap());
        drop(store);

        let store = store_in(tempdir.path());
        let ctrl = store
            .get(id)
            .unwrap()
            .statement_controller(Vec::new())
            .unwrap();
        assert_eq!(ctrl.get_lang_codes().unwrap(), vec!["en", "fr"]);
        assert!(!store.get(id).unwrap().has_unsaved_changes());
    }

    #[test]
    fn commit_respects_save_on_commit() {
        let tempdir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(tempdir.path()).with_save_on_commit(false);
        let mut store = DocumentStore::new(config.clone()).unwrap();
        let id = store.create_statement("policy", &AclMap::new()).unwrap();
        let ctrl = store.get(id).unwrap().statement_controller(Vec::new()).unwrap();
        ctrl.add_language("en").unwrap();
        assert!(store.commit(id).unwrap());
        drop(store);

        let store = DocumentStore::new(config).unwrap();
        let ctrl = store.get(id).unwrap().statement_controller(Vec::new()).unwrap();
        assert!(!ctrl.has_lang_code("en").unwrap());
    }

    #[test]
    fn updates_replicate_between_stores() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let mut a = store_in(dir_a.path());
        let id = a.create_statement("policy", &owner_acls()).unwrap();
        let snapshot = a.export_snapshot(id).unwrap();
        std::fs::write(dir_b.path().join(format!("{}.bin", id)), &snapshot).unwrap();
        let mut b = store_in(dir_b.path());

        let ctrl = a
            .get(id)
            .unwrap()
            .statement_controller(vec!["owner".to_string()])
            .unwrap();
        ctrl.add_language("de").unwrap();
        a.commit(id).unwrap();

        b.import_updates(id, &a.export_snapshot(id).unwrap()).unwrap();
        let replica = b.get(id).unwrap().statement_controller(Vec::new()).unwrap();
        assert_eq!(replica.get_lang_codes().unwrap(), vec!["de"]);
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let tempdir = tempfile::tempdir().unwrap();
        std::fs::write(tempdir.path().join("notes.txt"), "hi").unwrap();
        std::fs::write(tempdir.path().join("not-a-uuid.bin"), "hi").unwrap();
        std::fs::write(tempdir.path().join(format!("{}.bin", Uuid::new_v4())), "junk").unwrap();
        let store = store_in(tempdir.path());
        assert!(store.ids().is_empty());
    }

    #[test]
    fn delete_removes_snapshot() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut store = store_in(tempdir.path());
        let id = store.create_sheet("grid", &AclMap::new()).unwrap();
        let path = tempdir.path().join(format!("{}.bin", id));
        assert!(path.exists());
        store.delete(id).unwrap();
        assert!(!path.exists());
        assert!(store.get(id).is_none());
        assert!(store.delete(id).is_err());
    }

    #[tokio::test]
    async fn local_commits_are_published() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut store = store_in(tempdir.path());
        let mut rx = store.events().subscribe();
        let id = store.create_statement("policy", &owner_acls()).unwrap();
        assert!(matches!(rx.recv().await.unwrap(), DocEvent::Created { id: c, .. } if c == id));

        let ctrl = store
            .get(id)
            .unwrap()
            .statement_controller(vec!["owner".to_string()])
            .unwrap();
        let before = store.export_snapshot(id).unwrap();
        ctrl.add_language("en").unwrap();
        store.commit(id).unwrap();

        let DocEvent::LocalUpdate { id: updated, bytes } = rx.recv().await.unwrap() else {
            panic!("expected a local update");
        };
        assert_eq!(updated, id);

        let replica = LoroDoc::new();
        replica.import(&before).unwrap();
        assert!(replica.get_map("content").get("en").is_none());
        replica.import(&bytes).unwrap();
        assert!(replica.get_map("content").get("en").is_some());
    }
}
