//! Access control lists stored as Loro containers.
//!
//! An ACL container is a map from permission key to a list of principal
//! strings. [`patch_acl_map`] reconciles such a container with a desired
//! mapping using the smallest set of list/map operations, so that container
//! identity survives and concurrent editors see minimal churn.

use crate::error::Result;
use loro::{LoroList, LoroMap, ToJson};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    View,
    Edit,
    Approve,
    Manage,
    AddRemove,
    Delete,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::View,
        Permission::Edit,
        Permission::Approve,
        Permission::Manage,
        Permission::AddRemove,
        Permission::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::Edit => "edit",
            Permission::Approve => "approve",
            Permission::Manage => "manage",
            Permission::AddRemove => "add-remove",
            Permission::Delete => "delete",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown permission '{}'", s))
    }
}

/// Plain snapshot of one ACL level.
pub type AclMap = BTreeMap<Permission, Vec<String>>;

/// Read an ACL container into a detached [`AclMap`]. Keys that are not known
/// permissions are skipped.
pub fn read_acl_map(acls: &LoroMap) -> AclMap {
    let mut out = AclMap::new();
    let serde_json::Value::Object(entries) = acls.get_deep_value().to_json_value() else {
        return out;
    };
    for (key, value) in entries {
        let Ok(permission) = key.parse::<Permission>() else {
            debug!("ignoring unknown acl key '{}'", key);
            continue;
        };
        let principals = match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => Vec::new(),
        };
        out.insert(permission, principals);
    }
    out
}

fn list_principals(list: &LoroList) -> Vec<String> {
    (0..list.len())
        .filter_map(|i| list.get(i))
        .filter_map(|v| v.into_value().ok())
        .filter_map(|v| v.into_string().ok())
        .map(|s| s.to_string())
        .collect()
}

fn position_of(list: &LoroList, principal: &str) -> Option<usize> {
    (0..list.len()).find(|&i| {
        list.get(i)
            .and_then(|v| v.into_value().ok())
            .and_then(|v| v.into_string().ok())
            .map_or(false, |s| s.to_string() == principal)
    })
}

fn unique(principals: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    principals
        .iter()
        .map(|p| p.as_str())
        .filter(|p| seen.insert(*p))
        .collect()
}

/// Bring `acls` in line with `desired`.
///
/// Permissions missing from `desired` are deleted outright. Permissions with
/// no list yet get a fresh list filled in input order. Existing lists lose
/// the principals no longer wanted and have new ones pushed at the end, so
/// survivors keep their order. Nothing is written for a permission whose
/// principal set is unchanged. The caller commits.
pub fn patch_acl_map(acls: &LoroMap, desired: &AclMap) -> Result<()> {
    let mut keys: BTreeSet<String> = acls.keys().map(|k| k.to_string()).collect();
    keys.extend(desired.keys().map(|p| p.as_str().to_string()));

    for key in keys {
        let wanted = key
            .parse::<Permission>()
            .ok()
            .and_then(|p| desired.get(&p));
        let Some(wanted) = wanted else {
            if acls.get(&key).is_some() {
                debug!("removing acl key '{}'", key);
                acls.delete(&key)?;
            }
            continue;
        };

        let current = acls
            .get(&key)
            .and_then(|v| v.into_container().ok())
            .and_then(|c| c.into_list().ok());

        let Some(list) = current else {
            debug!("creating acl list '{}' with {} principals", key, wanted.len());
            let list = acls.insert_container(&key, LoroList::new())?;
            for principal in unique(wanted) {
                list.push(principal)?;
            }
            continue;
        };

        let existing = list_principals(&list);
        let wanted_set: HashSet<&str> = wanted.iter().map(|p| p.as_str()).collect();
        let existing_set: HashSet<&str> = existing.iter().map(|p| p.as_str()).collect();

        let to_remove: Vec<&str> = existing
            .iter()
            .map(|p| p.as_str())
            .filter(|p| !wanted_set.contains(p))
            .collect();
        let to_add: Vec<&str> = unique(wanted)
            .into_iter()
            .filter(|p| !existing_set.contains(p))
            .collect();

        for principal in to_remove {
            if let Some(pos) = position_of(&list, principal) {
                list.delete(pos, 1)?;
            }
        }
        for principal in to_add {
            list.push(principal)?;
        }
    }
    Ok(())
}

/// Empty an ACL container.
pub fn clear_acl_map(acls: &LoroMap) -> Result<()> {
    acls.clear()?;
    Ok(())
}

/// Union of several ACL levels. Principal order is first-seen, duplicates
/// collapse.
pub fn merge_acl_maps<'a, I>(levels: I) -> AclMap
where
    I: IntoIterator<Item = &'a AclMap>,
{
    let mut merged = AclMap::new();
    for level in levels {
        for (permission, principals) in level {
            let entry = merged.entry(*permission).or_insert_with(Vec::new);
            for principal in principals {
                if !entry.contains(principal) {
                    entry.push(principal.clone());
                }
            }
        }
    }
    merged
}

/// True when the actor is known under any principal granted `permission`.
pub fn grants(acls: &AclMap, prpls: &[String], permission: Permission) -> bool {
    acls.get(&permission)
        .map_or(false, |granted| granted.iter().any(|p| prpls.contains(p)))
}

/// Levels of the inheritance chain, outermost first.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AclLevel {
    Document,
    Block,
    Statement,
    Element,
}

/// Read model of the ACLs an element inherits, ordered outermost first.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PermissionChain {
    levels: Vec<(AclLevel, AclMap)>,
}

impl PermissionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: AclLevel, acls: AclMap) -> Self {
        self.levels.push((level, acls));
        self
    }

    pub fn levels(&self) -> &[(AclLevel, AclMap)] {
        &self.levels
    }

    pub fn level(&self, level: AclLevel) -> Option<&AclMap> {
        self.levels
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, acls)| acls)
    }

    /// Every principal holding `permission` at any level.
    pub fn effective(&self, permission: Permission) -> Vec<String> {
        merge_acl_maps(self.levels.iter().map(|(_, acls)| acls))
            .remove(&permission)
            .unwrap_or_default()
    }

    pub fn grants(&self, prpls: &[String], permission: Permission) -> bool {
        self.levels
            .iter()
            .any(|(_, acls)| grants(acls, prpls, permission))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loro::{ContainerTrait, LoroDoc};

    fn acl(entries: &[(Permission, &[&str])]) -> AclMap {
        entries
            .iter()
            .map(|(p, prpls)| (*p, prpls.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn permission_keys_roundtrip_as_strings() {
        for p in Permission::ALL {
            assert_eq!(p.as_str().parse::<Permission>().unwrap(), p);
        }
        assert_eq!(
            serde_json::to_string(&Permission::AddRemove).unwrap(),
            "\"add-remove\""
        );
        assert!("owner".parse::<Permission>().is_err());
    }

    #[test]
    fn patch_creates_and_appends() {
        let doc = LoroDoc::new();
        let acls = doc.get_map("acls");
        patch_acl_map(&acls, &acl(&[(Permission::View, &["p1"])])).unwrap();
        doc.commit();

        patch_acl_map(
            &acls,
            &acl(&[(Permission::View, &["p2", "p1"]), (Permission::Edit, &["p2"])]),
        )
        .unwrap();
        doc.commit();

        let read = read_acl_map(&acls);
        assert_eq!(read[&Permission::View], vec!["p1", "p2"]);
        assert_eq!(read[&Permission::Edit], vec!["p2"]);
    }

    #[test]
    fn patch_keeps_survivor_order() {
        let doc = LoroDoc::new();
        let acls = doc.get_map("acls");
        patch_acl_map(&acls, &acl(&[(Permission::View, &["a", "b", "c", "d"])])).unwrap();
        patch_acl_map(&acls, &acl(&[(Permission::View, &["e", "d", "b"])])).unwrap();
        doc.commit();
        assert_eq!(read_acl_map(&acls)[&Permission::View], vec!["b", "d", "e"]);
    }

    #[test]
    fn patch_removes_missing_permissions() {
        let doc = LoroDoc::new();
        let acls = doc.get_map("acls");
        patch_acl_map(
            &acls,
            &acl(&[(Permission::View, &["p1"]), (Permission::Delete, &["p1"])]),
        )
        .unwrap();
        patch_acl_map(&acls, &acl(&[(Permission::View, &["p1"])])).unwrap();
        doc.commit();
        let read = read_acl_map(&acls);
        assert!(!read.contains_key(&Permission::Delete));
        assert!(acls.get("delete").is_none());
    }

    #[test]
    fn patch_is_idempotent_and_writes_nothing_when_unchanged() {
        let doc = LoroDoc::new();
        let acls = doc.get_map("acls");
        let desired = acl(&[
            (Permission::View, &["p1", "p2"]),
            (Permission::Approve, &["p3"]),
        ]);
        patch_acl_map(&acls, &desired).unwrap();
        doc.commit();
        let once = read_acl_map(&acls);
        let frontiers = doc.oplog_frontiers();

        patch_acl_map(&acls, &desired).unwrap();
        doc.commit();
        assert_eq!(read_acl_map(&acls), once);
        assert_eq!(doc.oplog_frontiers(), frontiers);
    }

    #[test]
    fn patch_keeps_list_identity() {
        let doc = LoroDoc::new();
        let acls = doc.get_map("acls");
        patch_acl_map(&acls, &acl(&[(Permission::Edit, &["p1"])])).unwrap();
        let before = acls.get("edit").unwrap().into_container().unwrap().into_list().unwrap().id();
        patch_acl_map(&acls, &acl(&[(Permission::Edit, &["p2"])])).unwrap();
        let after = acls.get("edit").unwrap().into_container().unwrap().into_list().unwrap().id();
        assert_eq!(before, after);
    }

    #[test]
    fn patch_does_not_duplicate_desired_entries() {
        let doc = LoroDoc::new();
        let acls = doc.get_map("acls");
        patch_acl_map(&acls, &acl(&[(Permission::View, &["p1", "p1"])])).unwrap();
        patch_acl_map(&acls, &acl(&[(Permission::View, &["p1", "p2", "p2"])])).unwrap();
        assert_eq!(read_acl_map(&acls)[&Permission::View], vec!["p1", "p2"]);
    }

    #[test]
    fn merge_unions_levels() {
        let doc_level = acl(&[(Permission::Edit, &["a", "b"])]);
        let block_level = acl(&[(Permission::Edit, &["b", "c"]), (Permission::View, &["v"])]);
        let stmt_level = acl(&[(Permission::Edit, &["a", "d"])]);
        let merged = merge_acl_maps([&doc_level, &block_level, &stmt_level]);
        assert_eq!(merged[&Permission::Edit], vec!["a", "b", "c", "d"]);
        assert_eq!(merged[&Permission::View], vec!["v"]);
    }

    #[test]
    fn chain_grants_at_any_level() {
        let chain = PermissionChain::new()
            .with_level(AclLevel::Document, acl(&[(Permission::View, &["g1"])]))
            .with_level(AclLevel::Element, acl(&[(Permission::Edit, &["u1"])]));
        let actor = vec!["u1".to_string(), "g1".to_string()];
        assert!(chain.grants(&actor, Permission::View));
        assert!(chain.grants(&actor, Permission::Edit));
        assert!(!chain.grants(&actor, Permission::Approve));
        assert_eq!(chain.effective(Permission::Edit), vec!["u1"]);
        assert!(chain.level(AclLevel::Block).is_none());
    }
}
