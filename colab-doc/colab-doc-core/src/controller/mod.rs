//! Controllers wrapping a colab `LoroDoc`.
//!
//! A controller is a cheap handle: it holds a clone of the shared document
//! and the principals of the acting user. Several controllers may point at
//! the same document (a sheet and the statements embedded in it). None of
//! the mutating operations commit; callers batch their changes and call
//! [`DocController::commit`] once.

mod sheet;
mod sheet_statement;
mod statement;
mod statement_doc;


pub use sheet::SheetDocController;
pub use sheet_statement::SheetStatementController;
pub use statement::StatementController;
pub use statement_doc::StatementDocController;

use crate::acl::{self, AclMap, Permission};
use crate::error::{ColabError, Result};
use crate::path::{join, to_segments, PathSegment};
use crate::subscription::subscribe_to_paths;
use loro::{
    Container, ContainerID, ContainerTrait, Index, LoroDoc, LoroList, LoroMap, Subscription,
    ToJson,
};

pub const PROPERTIES_KEY: &str = "properties";
pub const ACLS_KEY: &str = "acls";
pub const CONTENT_KEY: &str = "content";
pub const APPROVALS_KEY: &str = "approvals";
pub const TEXT_ELEMENT_KEY: &str = "textElement";
pub const TYPE_KEY: &str = "type";
pub const NAME_KEY: &str = "name";

pub const STATEMENT_DOC_TYPE: &str = "colab-statement";
pub const SHEET_DOC_TYPE: &str = "colab-sheet";

/// Document-level behaviour shared by every controller.
pub trait DocController {
    fn doc(&self) -> &LoroDoc;

    /// Principals the acting user is known under.
    fn prpls(&self) -> &[String];

    fn doc_acls(&self) -> LoroMap {
        self.doc().get_map(ACLS_KEY)
    }

    fn get_doc_acl_map(&self) -> AclMap {
        acl::read_acl_map(&self.doc_acls())
    }

    fn patch_doc_acl_map(&self, acls: &AclMap) -> Result<()> {
        acl::patch_acl_map(&self.doc_acls(), acls)
    }

    fn has_doc_permission(&self, permission: Permission) -> bool {
        acl::grants(&self.get_doc_acl_map(), self.prpls(), permission)
    }

    /// Value of `properties/type`, if set.
    fn document_type(&self) -> Option<String> {
        self.doc()
            .get_map(PROPERTIES_KEY)
            .get(TYPE_KEY)
            .and_then(|v| v.into_value().ok())
            .and_then(|v| v.into_string().ok())
            .map(|s| s.to_string())
    }

    /// Flush pending local changes so they get replicated and persisted.
    fn commit(&self) {
        self.doc().commit();
    }

    fn subscribe_to_doc_acl_changes<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
        Self: Sized,
    {
        subscribe_to_paths(self.doc(), vec![vec![ACLS_KEY.into()]], callback)
    }
}

/// Look up `key` in `parent` as a map container.
pub(crate) fn child_map(parent: &LoroMap, key: &str) -> Option<LoroMap> {
    parent
        .get(key)
        .and_then(|v| v.into_container().ok())
        .and_then(|c| c.into_map().ok())
}

/// Like [`child_map`] but missing or mistyped values are an error.
pub(crate) fn require_map(parent: &LoroMap, key: &str) -> Result<LoroMap> {
    child_map(parent, key).ok_or_else(|| ColabError::UnexpectedValue {
        key: key.to_string(),
        expected: "map",
    })
}

/// Get or lazily create the map at `key`. New children are mergeable, so
/// replicas creating the same key concurrently end up sharing one map.
/// Children that were inserted eagerly are returned as they are.
pub(crate) fn ensure_map(parent: &LoroMap, key: &str) -> Result<LoroMap> {
    match child_map(parent, key) {
        Some(map) => Ok(map),
        None => Ok(parent.ensure_mergeable_map(key)?),
    }
}

pub(crate) fn ensure_list(parent: &LoroMap, key: &str) -> Result<LoroList> {
    let existing = parent
        .get(key)
        .and_then(|v| v.into_container().ok())
        .and_then(|c| c.into_list().ok());
    match existing {
        Some(list) => Ok(list),
        None => Ok(parent.ensure_mergeable_list(key)?),
    }
}

/// Locate a container by id, failing when it is detached from the document
/// tree. Returns the container together with its path from the root.
pub(crate) fn resolve_container(
    doc: &LoroDoc,
    id: &ContainerID,
) -> Result<(Vec<PathSegment>, Container)> {
    let path = doc
        .get_path_to_container(id)
        .ok_or_else(|| ColabError::PathUnresolved(id.clone()))?;
    let indices: Vec<Index> = path.iter().map(|(_, index)| index.clone()).collect();
    let container = doc
        .get_by_path(&indices)
        .and_then(|v| v.into_container().ok())
        .filter(|c| c.id() == *id)
        .ok_or_else(|| ColabError::ContainerNotFound(id.clone()))?;
    Ok((to_segments(&path), container))
}

pub(crate) fn resolve_map(doc: &LoroDoc, id: &ContainerID) -> Result<(Vec<PathSegment>, LoroMap)> {
    let (path, container) = resolve_container(doc, id)?;
    let map = container
        .into_map()
        .map_err(|_| ColabError::UnexpectedValue {
            key: id.to_string(),
            expected: "map",
        })?;
    Ok((path, map))
}

/// Path of a child key below an already resolved path.
pub(crate) fn child_path(base: &[PathSegment], keys: &[&str]) -> Vec<PathSegment> {
    join(base, keys.iter().copied())
}

pub(crate) fn map_json(map: &LoroMap) -> serde_json::Value {
    map.get_deep_value().to_json_value()
}
