use super::{
    child_map, child_path, ensure_list, ensure_map, map_json, DocController, ACLS_KEY,
    APPROVALS_KEY, CONTENT_KEY, TEXT_ELEMENT_KEY,
};
use crate::acl::{self, AclLevel, AclMap, Permission, PermissionChain};
use crate::approval::{
    aggregate_state, ApprovalRecord, ColabApprovalState, ColabApprovalType,
};
use crate::error::{ColabError, Result};
use crate::path::PathSegment;
use crate::subscription::subscribe_to_paths;
use chrono::Utc;
use loro::{LoroList, LoroMap, LoroText, Subscription};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const NODE_NAME_KEY: &str = "nodeName";
const ATTRIBUTES_KEY: &str = "attributes";
const CHILDREN_KEY: &str = "children";
const DOC_NODE: &str = "doc";
const PARAGRAPH_NODE: &str = "paragraph";

/// Behaviour shared by statement-shaped structures: a properties map, an
/// ACL map and a content map holding one element per language.
///
/// Implementors only supply where those containers live and what the
/// element inherits; everything else is provided.
pub trait StatementController: DocController {
    fn get_properties_map(&self) -> Result<LoroMap>;

    fn get_content_map(&self) -> Result<LoroMap>;

    /// Path from the document root to the statement structure.
    fn statement_path(&self) -> Result<Vec<PathSegment>>;

    /// Union of every ACL level above the language elements.
    fn get_top_acls(&self) -> Result<AclMap>;

    /// Paths of the ACL containers behind [`get_top_acls`](Self::get_top_acls).
    fn top_acl_paths(&self) -> Result<Vec<Vec<PathSegment>>>;

    /// Every level from the document down to the element for `code`.
    fn permission_chain(&self, code: &str) -> Result<PermissionChain>;

    fn get_lang_codes(&self) -> Result<Vec<String>> {
        let content = self.get_content_map()?;
        let mut codes: Vec<String> = content
            .keys()
            .map(|k| k.to_string())
            .filter(|k| child_map(&content, k).is_some())
            .collect();
        codes.sort();
        Ok(codes)
    }

    fn has_lang_code(&self, code: &str) -> Result<bool> {
        Ok(child_map(&self.get_content_map()?, code).is_some())
    }

    /// Get or create the element for `code` with its ACL, approvals and text
    /// containers. Existing languages are left untouched.
    fn add_language(&self, code: &str) -> Result<LoroMap> {
        let content = self.get_content_map()?;
        let fresh = child_map(&content, code).is_none();
        let element = ensure_map(&content, code)?;
        let acls = ensure_map(&element, ACLS_KEY)?;
        let approvals = ensure_map(&element, APPROVALS_KEY)?;
        let text = ensure_map(&element, TEXT_ELEMENT_KEY)?;
        let attributes = ensure_map(&text, ATTRIBUTES_KEY)?;
        let children = ensure_list(&text, CHILDREN_KEY)?;
        if fresh {
            // a removed language keeps its state under the same ids; start over
            acl::clear_acl_map(&acls)?;
            approvals.clear()?;
            attributes.clear()?;
            children.clear()?;
            debug!("added language '{}'", code);
        }
        if text.get(NODE_NAME_KEY).is_none() {
            text.insert(NODE_NAME_KEY, DOC_NODE)?;
        }
        Ok(element)
    }

    /// Drop the element for `code` with all its content, ACLs and approvals.
    fn remove_language(&self, code: &str) -> Result<bool> {
        let content = self.get_content_map()?;
        if content.get(code).is_none() {
            return Ok(false);
        }
        content.delete(code)?;
        debug!("removed language '{}'", code);
        Ok(true)
    }

    fn get_stmt_element(&self, code: &str) -> Result<LoroMap> {
        child_map(&self.get_content_map()?, code)
            .ok_or_else(|| ColabError::LanguageNotFound(code.to_string()))
    }

    fn get_stmt_element_acl_map(&self, code: &str) -> Result<AclMap> {
        let element = self.get_stmt_element(code)?;
        Ok(child_map(&element, ACLS_KEY)
            .map(|acls| acl::read_acl_map(&acls))
            .unwrap_or_default())
    }

    /// Apply an element ACL patch without any permission gate.
    fn apply_stmt_element_acl_map(&self, code: &str, acls: &AclMap) -> Result<()> {
        let element = self.get_stmt_element(code)?;
        acl::patch_acl_map(&ensure_map(&element, ACLS_KEY)?, acls)
    }

    /// Returns whether the patch was applied.
    fn patch_stmt_element_acl_map(&self, code: &str, acls: &AclMap) -> Result<bool> {
        self.apply_stmt_element_acl_map(code, acls)?;
        Ok(true)
    }

    fn get_statement_element_approvals(
        &self,
        code: &str,
    ) -> Result<BTreeMap<String, ApprovalRecord>> {
        let element = self.get_stmt_element(code)?;
        let Some(approvals) = child_map(&element, APPROVALS_KEY) else {
            return Ok(BTreeMap::new());
        };
        let serde_json::Value::Object(entries) = map_json(&approvals) else {
            return Ok(BTreeMap::new());
        };
        let mut out = BTreeMap::new();
        for (key, value) in entries {
            match serde_json::from_value::<ApprovalRecord>(value) {
                Ok(record) => {
                    out.insert(key, record);
                }
                Err(e) => warn!("skipping malformed approval '{}' on '{}': {}", key, code, e),
            }
        }
        Ok(out)
    }

    fn get_statement_element_state(&self, code: &str) -> Result<ColabApprovalState> {
        let element = self.get_stmt_element(code)?;
        let Some(approvals) = child_map(&element, APPROVALS_KEY) else {
            return Ok(ColabApprovalState::Draft);
        };
        let states = approvals
            .keys()
            .filter_map(|key| approval_state(&approvals, &key.to_string()))
            .collect::<Vec<_>>();
        Ok(aggregate_state(states))
    }

    fn has_manage_permission(&self) -> Result<bool> {
        Ok(acl::grants(
            &self.get_top_acls()?,
            self.prpls(),
            Permission::Manage,
        ))
    }

    /// Inherited or element-level grant of `permission` to the actor.
    fn has_element_permission(&self, code: &str, permission: Permission) -> Result<bool> {
        let element_acls = self.get_stmt_element_acl_map(code)?;
        Ok(acl::grants(&self.get_top_acls()?, self.prpls(), permission)
            || acl::grants(&element_acls, self.prpls(), permission))
    }

    /// Approved or pending elements are never editable.
    fn can_edit_statement_element(&self, code: &str) -> Result<bool> {
        if self.get_statement_element_state(code)?.is_locked() {
            return Ok(false);
        }
        self.has_element_permission(code, Permission::Edit)
    }

    fn has_approve_permission(&self, code: &str) -> Result<bool> {
        self.has_element_permission(code, Permission::Approve)
    }

    fn approve_statement_element(&self, code: &str, approval_key: &str) -> Result<bool> {
        if !self.has_approve_permission(code)? {
            warn!("no approve permission on statement element '{}'", code);
            return Ok(false);
        }
        set_approval(&self.get_stmt_element(code)?, approval_key, ColabApprovalState::Approved)
    }

    fn reject_statement_element(&self, code: &str, approval_key: &str) -> Result<bool> {
        if !self.has_approve_permission(code)? {
            warn!("no approve permission on statement element '{}'", code);
            return Ok(false);
        }
        set_approval(&self.get_stmt_element(code)?, approval_key, ColabApprovalState::Rejected)
    }

    /// Wipe every approval record on the element, not only the actor's.
    fn revert_statement_element_to_draft(&self, code: &str) -> Result<bool> {
        if !self.has_approve_permission(code)? && !self.has_manage_permission()? {
            warn!("no approve or manage permission on statement element '{}'", code);
            return Ok(false);
        }
        let element = self.get_stmt_element(code)?;
        let Some(approvals) = child_map(&element, APPROVALS_KEY) else {
            return Ok(false);
        };
        if approvals.is_empty() {
            return Ok(false);
        }
        approvals.clear()?;
        Ok(true)
    }

    fn has_rejected_approval(&self, code: &str, approval_key: &str) -> Result<bool> {
        let element = self.get_stmt_element(code)?;
        Ok(child_map(&element, APPROVALS_KEY)
            .and_then(|approvals| approval_state(&approvals, approval_key))
            == Some(ColabApprovalState::Rejected))
    }

    fn get_text_element(&self, code: &str) -> Result<LoroMap> {
        let element = self.get_stmt_element(code)?;
        ensure_map(&element, TEXT_ELEMENT_KEY)
    }

    /// Plain text of the element, one line per top-level block.
    fn get_statement_element_text(&self, code: &str) -> Result<String> {
        let element = self.get_stmt_element(code)?;
        let Some(text) = child_map(&element, TEXT_ELEMENT_KEY) else {
            return Ok(String::new());
        };
        let root = map_json(&text);
        let blocks = root[CHILDREN_KEY]
            .as_array()
            .map(|children| children.iter().map(flatten_text).collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(blocks.join("\n"))
    }

    /// Replace the element's content with a single paragraph.
    fn set_statement_element_text(&self, code: &str, value: &str) -> Result<bool> {
        if !self.can_edit_statement_element(code)? {
            warn!("statement element '{}' is not editable", code);
            return Ok(false);
        }
        let text = self.get_text_element(code)?;
        if text.get(NODE_NAME_KEY).is_none() {
            text.insert(NODE_NAME_KEY, DOC_NODE)?;
        }
        ensure_map(&text, ATTRIBUTES_KEY)?;
        let children = ensure_list(&text, CHILDREN_KEY)?;
        if !children.is_empty() {
            children.delete(0, children.len())?;
        }
        let paragraph = children.insert_container(0, LoroMap::new())?;
        paragraph.insert(NODE_NAME_KEY, PARAGRAPH_NODE)?;
        paragraph.insert_container(ATTRIBUTES_KEY, LoroMap::new())?;
        let leaves = paragraph.insert_container(CHILDREN_KEY, LoroList::new())?;
        if !value.is_empty() {
            let leaf = leaves.insert_container(0, LoroText::new())?;
            leaf.insert(0, value)?;
        }
        Ok(true)
    }

    fn subscribe_to_statement_element_acl_changes<F>(
        &self,
        code: &str,
        callback: F,
    ) -> Result<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
        Self: Sized,
    {
        let base = self.statement_path()?;
        let prefix = child_path(&base, &[CONTENT_KEY, code, ACLS_KEY]);
        Ok(subscribe_to_paths(self.doc(), vec![prefix], callback))
    }

    fn subscribe_to_statement_element_approval_changes<F>(
        &self,
        code: &str,
        callback: F,
    ) -> Result<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
        Self: Sized,
    {
        let base = self.statement_path()?;
        let prefix = child_path(&base, &[CONTENT_KEY, code, APPROVALS_KEY]);
        Ok(subscribe_to_paths(self.doc(), vec![prefix], callback))
    }

    /// Fires when any ACL level the element for `code` inherits from, or its
    /// own, changes.
    fn subscribe_to_permission_chain_changes<F>(
        &self,
        code: &str,
        callback: F,
    ) -> Result<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
        Self: Sized,
    {
        let base = self.statement_path()?;
        let mut prefixes = self.top_acl_paths()?;
        prefixes.push(child_path(&base, &[CONTENT_KEY, code, ACLS_KEY]));
        Ok(subscribe_to_paths(self.doc(), prefixes, callback))
    }

    /// Empty the ACLs of every language element.
    fn clear_element_acls(&self) -> Result<()> {
        let content = self.get_content_map()?;
        for code in content.keys().map(|k| k.to_string()) {
            let Some(element) = child_map(&content, &code) else {
                continue;
            };
            if let Some(acls) = child_map(&element, ACLS_KEY) {
                acl::clear_acl_map(&acls)?;
            }
        }
        Ok(())
    }
}

/// Chain of the element level on top of the given outer levels.
pub(crate) fn chain_with_element<C>(
    controller: &C,
    code: &str,
    outer: Vec<(AclLevel, AclMap)>,
) -> Result<PermissionChain>
where
    C: StatementController + ?Sized,
{
    let element = controller.get_stmt_element_acl_map(code)?;
    let chain = outer
        .into_iter()
        .fold(PermissionChain::new(), |chain, (level, acls)| {
            chain.with_level(level, acls)
        });
    Ok(chain.with_level(AclLevel::Element, element))
}

fn approval_state(approvals: &LoroMap, key: &str) -> Option<ColabApprovalState> {
    let record = child_map(approvals, key)?;
    let state = record
        .get("state")
        .and_then(|v| v.into_value().ok())
        .and_then(|v| v.into_string().ok())?
        .to_string();
    serde_json::from_value(serde_json::Value::String(state)).ok()
}

fn set_approval(element: &LoroMap, key: &str, state: ColabApprovalState) -> Result<bool> {
    let approvals = ensure_map(element, APPROVALS_KEY)?;
    if approval_state(&approvals, key) == Some(state) {
        return Ok(false);
    }
    let record = ensure_map(&approvals, key)?;
    record.insert("type", ColabApprovalType::User.as_str())?;
    record.insert("user", key)?;
    record.insert("state", state.as_str())?;
    record.insert("date", Utc::now().to_rfc3339())?;
    debug!("approval '{}' set to {}", key, state);
    Ok(true)
}

fn flatten_text(node: &serde_json::Value) -> String {
    match node {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(_) => node[CHILDREN_KEY]
            .as_array()
            .map(|children| children.iter().map(flatten_text).collect::<String>())
            .unwrap_or_default(),
        _ => String::new(),
    }
}
