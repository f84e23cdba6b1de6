//! Operator commands over a colab document store.
//!
//! Every command runs as the given principals, and commits and persists the
//! document only when the underlying operation reports that it did
//! something.

use anyhow::{anyhow, bail, Result};
use clap::{Args, Subcommand};
use colab_doc_core::events::DocEvent;
use colab_doc_core::storage::crdt::{ColabDocument, DocumentStore, DocumentType};
use colab_doc_core::{AclMap, ContainerID, DocController, Permission, StatementController};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a statement document; the actor gets every permission on it
    NewStatement { name: String },

    /// Create a sheet document; the actor gets every permission on it
    NewSheet { name: String },

    /// Append a statement-grid block to a sheet
    AddBlock { doc: Uuid },

    /// Append a local statement row to a sheet block
    AddRow {
        doc: Uuid,
        #[arg(long)]
        block: String,
    },

    /// Add a language to a statement
    AddLanguage {
        doc: Uuid,
        code: String,
        #[command(flatten)]
        target: StatementTarget,
    },

    /// Remove a language and everything attached to it
    RemoveLanguage {
        doc: Uuid,
        code: String,
        #[command(flatten)]
        target: StatementTarget,
    },

    /// Grant a permission at the document, block, statement or language level
    Grant {
        doc: Uuid,
        permission: Permission,
        principal: String,
        #[command(flatten)]
        scope: AclScope,
    },

    /// Revoke a permission at the document, block, statement or language level
    Revoke {
        doc: Uuid,
        permission: Permission,
        principal: String,
        #[command(flatten)]
        scope: AclScope,
    },

    /// Approve a language of a statement
    Approve {
        doc: Uuid,
        code: String,
        /// Approval key, e.g. org1/u/user1
        #[arg(long)]
        key: String,
        #[command(flatten)]
        target: StatementTarget,
    },

    /// Reject a language of a statement
    Reject {
        doc: Uuid,
        code: String,
        #[arg(long)]
        key: String,
        #[command(flatten)]
        target: StatementTarget,
    },

    /// Drop every approval record of a language
    Revert {
        doc: Uuid,
        code: String,
        #[command(flatten)]
        target: StatementTarget,
    },

    /// Replace the text of a language
    SetText {
        doc: Uuid,
        code: String,
        text: String,
        #[command(flatten)]
        target: StatementTarget,
    },

    /// Print a document as JSON
    Show { doc: Uuid },
}

/// Locates a statement: the document itself, or a row of a sheet block.
#[derive(Args, Debug, Clone, Default)]
pub struct StatementTarget {
    /// Block container id (sheets only)
    #[arg(long, requires = "statement")]
    pub block: Option<String>,

    /// Statement container id of a row (sheets only)
    #[arg(long, requires = "block")]
    pub statement: Option<String>,
}

/// Which ACL map a grant or revoke applies to.
#[derive(Args, Debug, Clone, Default)]
pub struct AclScope {
    #[arg(long)]
    pub block: Option<String>,

    #[arg(long, requires = "block")]
    pub statement: Option<String>,

    /// Language code; targets the element ACLs
    #[arg(long)]
    pub lang: Option<String>,
}

pub fn parse_container_id(s: &str) -> Result<ContainerID> {
    ContainerID::try_from(s).map_err(|_| anyhow!("invalid container id '{}'", s))
}

/// Log the events a command published. Returns the total size of the
/// local updates among them.
pub fn log_events(events: &[DocEvent]) -> usize {
    let mut update_bytes = 0;
    for event in events {
        match event {
            DocEvent::LocalUpdate { id, bytes } => {
                info!("{} produced a {} byte update", id, bytes.len());
                update_bytes += bytes.len();
            }
            other => debug!("{} event {:?}", other.id(), other),
        }
    }
    update_bytes
}

/// Every permission for `prpls`, used to seed new documents.
fn creator_acls(prpls: &[String]) -> AclMap {
    Permission::ALL
        .into_iter()
        .map(|p| (p, prpls.to_vec()))
        .collect()
}

fn document(store: &DocumentStore, id: Uuid) -> Result<&ColabDocument> {
    store
        .get(id)
        .ok_or_else(|| anyhow!("document {} not found", id))
}

fn statement(
    doc: &ColabDocument,
    prpls: &[String],
    block: Option<&str>,
    statement: Option<&str>,
) -> Result<Box<dyn StatementController>> {
    match (doc.doc_type(), block, statement) {
        (DocumentType::Statement, None, None) => {
            Ok(Box::new(doc.statement_controller(prpls.to_vec())?))
        }
        (DocumentType::Sheet, Some(block), Some(stmt)) => {
            let sheet = doc.sheet_controller(prpls.to_vec())?;
            let ctrl =
                sheet.statement_controller(&parse_container_id(block)?, &parse_container_id(stmt)?)?;
            Ok(Box::new(ctrl))
        }
        (DocumentType::Statement, _, _) => bail!("statement documents have no blocks"),
        (DocumentType::Sheet, _, _) => bail!("sheets need --block and --statement"),
    }
}

fn target_statement(
    doc: &ColabDocument,
    prpls: &[String],
    target: &StatementTarget,
) -> Result<Box<dyn StatementController>> {
    statement(
        doc,
        prpls,
        target.block.as_deref(),
        target.statement.as_deref(),
    )
}

/// Commit and persist only when `applied`.
fn finish(store: &DocumentStore, id: Uuid, applied: bool) -> Result<Value> {
    let changed = if applied { store.commit(id)? } else { false };
    Ok(json!({ "doc": id, "applied": applied, "changed": changed }))
}

fn with_principal(mut principals: Vec<String>, principal: &str, add: bool) -> Vec<String> {
    if add {
        if !principals.iter().any(|p| p == principal) {
            principals.push(principal.to_string());
        }
    } else {
        principals.retain(|p| p != principal);
    }
    principals
}

fn edit_acl(acls: &AclMap, permission: Permission, principal: &str, add: bool) -> AclMap {
    let mut acls = acls.clone();
    let principals = with_principal(
        acls.remove(&permission).unwrap_or_default(),
        principal,
        add,
    );
    if !principals.is_empty() {
        acls.insert(permission, principals);
    }
    acls
}

/// Grant or revoke at the scope named by `scope`. Every scope requires
/// manage permission at or above it.
fn change_acl(
    store: &DocumentStore,
    prpls: &[String],
    id: Uuid,
    permission: Permission,
    principal: &str,
    scope: &AclScope,
    add: bool,
) -> Result<Value> {
    let doc = document(store, id)?;
    let applied = match (&scope.lang, &scope.block, &scope.statement) {
        (Some(code), block, stmt) => {
            let ctrl = statement(doc, prpls, block.as_deref(), stmt.as_deref())?;
            if ctrl.has_manage_permission()? {
                let acls = edit_acl(&ctrl.get_stmt_element_acl_map(code)?, permission, principal, add);
                ctrl.patch_stmt_element_acl_map(code, &acls)?
            } else {
                warn!("no manage permission on language '{}' of {}", code, id);
                false
            }
        }
        (None, Some(block), Some(stmt)) => {
            let sheet = doc.sheet_controller(prpls.to_vec())?;
            let ctrl =
                sheet.statement_controller(&parse_container_id(block)?, &parse_container_id(stmt)?)?;
            let acls = edit_acl(&ctrl.get_statement_acl_map()?, permission, principal, add);
            ctrl.patch_statement_acl_map(&acls)?
        }
        (None, Some(block), None) => {
            let sheet = doc.sheet_controller(prpls.to_vec())?;
            let block = parse_container_id(block)?;
            if sheet.has_block_manage_permission(&block)? {
                let acls = edit_acl(&sheet.get_block_acl_map(&block)?, permission, principal, add);
                sheet.patch_block_acl_map(&block, &acls)?;
                true
            } else {
                warn!("no manage permission on block {} of {}", block, id);
                false
            }
        }
        (None, None, _) => {
            let ctrl: Box<dyn DocController> = match doc.doc_type() {
                DocumentType::Statement => Box::new(doc.statement_controller(prpls.to_vec())?),
                DocumentType::Sheet => Box::new(doc.sheet_controller(prpls.to_vec())?),
            };
            if ctrl.has_doc_permission(Permission::Manage) {
                let acls = edit_acl(&ctrl.get_doc_acl_map(), permission, principal, add);
                ctrl.patch_doc_acl_map(&acls)?;
                true
            } else {
                warn!("no manage permission on {}", id);
                false
            }
        }
    };
    finish(store, id, applied)
}

/// Run one command as `prpls` and describe the outcome as JSON.
pub fn run(store: &mut DocumentStore, prpls: &[String], command: Command) -> Result<Value> {
    match command {
        Command::NewStatement { name } => {
            let id = store.create_statement(&name, &creator_acls(prpls))?;
            info!("created statement {}", id);
            Ok(json!({ "doc": id, "type": DocumentType::Statement.as_str() }))
        }
        Command::NewSheet { name } => {
            let id = store.create_sheet(&name, &creator_acls(prpls))?;
            info!("created sheet {}", id);
            Ok(json!({ "doc": id, "type": DocumentType::Sheet.as_str() }))
        }
        Command::AddBlock { doc: id } => {
            let sheet = document(store, id)?.sheet_controller(prpls.to_vec())?;
            let block = sheet.add_statement_grid_block()?;
            let mut out = finish(store, id, block.is_some())?;
            out["block"] = json!(block.map(|b| b.to_string()));
            Ok(out)
        }
        Command::AddRow { doc: id, block } => {
            let sheet = document(store, id)?.sheet_controller(prpls.to_vec())?;
            let row = sheet.add_local_statement_row(&parse_container_id(&block)?)?;
            let mut out = finish(store, id, row.is_some())?;
            out["statement"] = json!(row.map(|r| r.to_string()));
            Ok(out)
        }
        Command::AddLanguage { doc: id, code, target } => {
            let ctrl = target_statement(document(store, id)?, prpls, &target)?;
            let existed = ctrl.has_lang_code(&code)?;
            ctrl.add_language(&code)?;
            finish(store, id, !existed)
        }
        Command::RemoveLanguage { doc: id, code, target } => {
            let ctrl = target_statement(document(store, id)?, prpls, &target)?;
            let removed = ctrl.remove_language(&code)?;
            finish(store, id, removed)
        }
        Command::Grant {
            doc,
            permission,
            principal,
            scope,
        } => change_acl(store, prpls, doc, permission, &principal, &scope, true),
        Command::Revoke {
            doc,
            permission,
            principal,
            scope,
        } => change_acl(store, prpls, doc, permission, &principal, &scope, false),
        Command::Approve {
            doc: id,
            code,
            key,
            target,
        } => {
            let ctrl = target_statement(document(store, id)?, prpls, &target)?;
            let applied = ctrl.approve_statement_element(&code, &key)?;
            finish(store, id, applied)
        }
        Command::Reject {
            doc: id,
            code,
            key,
            target,
        } => {
            let ctrl = target_statement(document(store, id)?, prpls, &target)?;
            let applied = ctrl.reject_statement_element(&code, &key)?;
            finish(store, id, applied)
        }
        Command::Revert { doc: id, code, target } => {
            let ctrl = target_statement(document(store, id)?, prpls, &target)?;
            let applied = ctrl.revert_statement_element_to_draft(&code)?;
            finish(store, id, applied)
        }
        Command::SetText {
            doc: id,
            code,
            text,
            target,
        } => {
            let ctrl = target_statement(document(store, id)?, prpls, &target)?;
            let applied = ctrl.set_statement_element_text(&code, &text)?;
            finish(store, id, applied)
        }
        Command::Show { doc: id } => {
            let doc = document(store, id)?;
            Ok(json!({
                "doc": id,
                "type": doc.doc_type().as_str(),
                "name": doc.name(),
                "content": doc.to_json(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colab_doc_core::config::StoreConfig;
    use colab_doc_core::events::drain;

    #[test]
    fn edit_acl_adds_once_and_drops_empty_keys() {
        let acls = AclMap::new();
        let granted = edit_acl(&acls, Permission::Edit, "u1", true);
        let granted = edit_acl(&granted, Permission::Edit, "u1", true);
        assert_eq!(granted[&Permission::Edit], vec!["u1"]);

        let revoked = edit_acl(&granted, Permission::Edit, "u1", false);
        assert!(!revoked.contains_key(&Permission::Edit));
    }

    #[test]
    fn creator_gets_every_permission() {
        let acls = creator_acls(&["u1".to_string()]);
        assert_eq!(acls.len(), Permission::ALL.len());
        assert!(acls.values().all(|p| p == &vec!["u1".to_string()]));
    }

    #[test]
    fn container_ids_parse_from_their_display_form() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let mut store = DocumentStore::new(StoreConfig::new(dir.path()))?;
        let owner = vec!["u1".to_string()];
        let out = run(&mut store, &owner, Command::NewSheet { name: "grid".into() })?;
        let doc: Uuid = out["doc"].as_str().unwrap_or_default().parse()?;
        let out = run(&mut store, &owner, Command::AddBlock { doc })?;
        let shown = out["block"].as_str().unwrap_or_default().to_string();

        let id = parse_container_id(&shown)?;
        assert_eq!(id.to_string(), shown);
        assert!(store
            .get(doc)
            .and_then(|d| d.sheet_controller(owner).ok())
            .map_or(false, |sheet| sheet.get_block(&id).is_ok()));
        assert!(parse_container_id(shown.trim_start_matches("cid:")).is_err());
        assert!(parse_container_id("not an id").is_err());
        Ok(())
    }

    #[test]
    fn committed_commands_publish_local_updates() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let mut store = DocumentStore::new(StoreConfig::new(dir.path()))?;
        let owner = vec!["u1".to_string()];
        let out = run(&mut store, &owner, Command::NewStatement { name: "policy".into() })?;
        let doc: Uuid = out["doc"].as_str().unwrap_or_default().parse()?;

        let mut rx = store.events().subscribe();
        let add = |code: &str| Command::AddLanguage {
            doc,
            code: code.into(),
            target: StatementTarget::default(),
        };
        run(&mut store, &owner, add("en"))?;
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, DocEvent::LocalUpdate { id, .. } if *id == doc)));
        assert!(log_events(&events) > 0);

        // nothing applied, nothing committed
        let outsider = vec!["u2".to_string()];
        let revert = Command::Revert {
            doc,
            code: "en".into(),
            target: StatementTarget::default(),
        };
        assert_eq!(run(&mut store, &outsider, revert)?["applied"], false);
        assert_eq!(log_events(&drain(&mut rx)), 0);
        Ok(())
    }
}
