use super::{
    child_map, child_path, ensure_map, resolve_map, DocController, SheetStatementController,
    ACLS_KEY, CONTENT_KEY, NAME_KEY, PROPERTIES_KEY, SHEET_DOC_TYPE, STATEMENT_DOC_TYPE,
    TYPE_KEY,
};
use crate::acl::{self, AclMap, Permission};
use crate::error::{ColabError, Result};
use crate::path::PathSegment;
use crate::subscription::subscribe_to_paths;
use loro::{ContainerID, ContainerTrait, LoroDoc, LoroMap, LoroMovableList, Subscription};
use tracing::{debug, warn};

pub const STATEMENT_GRID_BLOCK: &str = "statement-grid";
pub const LOCAL_ROW: &str = "local";
const ROWS_KEY: &str = "rows";
const STATEMENT_KEY: &str = "statement";

/// Controller for a sheet document: an ordered list of blocks, each with its
/// own ACL map. Statement-grid blocks hold rows embedding whole statements.
#[derive(Clone)]
pub struct SheetDocController {
    doc: LoroDoc,
    prpls: Vec<String>,
}

impl SheetDocController {
    pub fn new(doc: LoroDoc, prpls: Vec<String>) -> Self {
        Self { doc, prpls }
    }

    /// Stamp an empty document as a sheet and seed its document ACLs.
    pub fn init(doc: &LoroDoc, name: &str, acls: &AclMap) -> Result<()> {
        let props = doc.get_map(PROPERTIES_KEY);
        props.insert(TYPE_KEY, SHEET_DOC_TYPE)?;
        props.insert(NAME_KEY, name)?;
        acl::patch_acl_map(&doc.get_map(ACLS_KEY), acls)?;
        doc.get_movable_list(CONTENT_KEY);
        Ok(())
    }

    fn content_list(&self) -> LoroMovableList {
        self.doc.get_movable_list(CONTENT_KEY)
    }

    /// Container ids of all blocks, in sheet order.
    pub fn get_blocks(&self) -> Vec<ContainerID> {
        container_ids(&self.content_list())
    }

    pub fn get_block(&self, block_id: &ContainerID) -> Result<LoroMap> {
        Ok(resolve_map(&self.doc, block_id)?.1)
    }

    pub fn block_path(&self, block_id: &ContainerID) -> Result<Vec<PathSegment>> {
        Ok(resolve_map(&self.doc, block_id)?.0)
    }

    pub fn get_block_type(&self, block_id: &ContainerID) -> Result<Option<String>> {
        let block = self.get_block(block_id)?;
        Ok(child_map(&block, PROPERTIES_KEY)
            .and_then(|props| props.get(TYPE_KEY))
            .and_then(|v| v.into_value().ok())
            .and_then(|v| v.into_string().ok())
            .map(|s| s.to_string()))
    }

    pub fn get_block_acl_map(&self, block_id: &ContainerID) -> Result<AclMap> {
        let block = self.get_block(block_id)?;
        Ok(child_map(&block, ACLS_KEY)
            .map(|acls| acl::read_acl_map(&acls))
            .unwrap_or_default())
    }

    pub fn patch_block_acl_map(&self, block_id: &ContainerID, acls: &AclMap) -> Result<()> {
        let block = self.get_block(block_id)?;
        acl::patch_acl_map(&ensure_map(&block, ACLS_KEY)?, acls)
    }

    /// Grant through the document ACLs or the block's own.
    pub fn has_block_permission(
        &self,
        block_id: &ContainerID,
        permission: Permission,
    ) -> Result<bool> {
        let block_acls = self.get_block_acl_map(block_id)?;
        Ok(self.has_doc_permission(permission)
            || acl::grants(&block_acls, &self.prpls, permission))
    }

    pub fn has_block_manage_permission(&self, block_id: &ContainerID) -> Result<bool> {
        self.has_block_permission(block_id, Permission::Manage)
    }

    pub fn has_block_add_remove_permission(&self, block_id: &ContainerID) -> Result<bool> {
        self.has_block_permission(block_id, Permission::AddRemove)
    }

    /// Append an empty statement-grid block. `None` when the actor may not
    /// add blocks to this sheet.
    pub fn add_statement_grid_block(&self) -> Result<Option<ContainerID>> {
        if !self.has_doc_permission(Permission::AddRemove) {
            warn!("no add-remove permission on sheet");
            return Ok(None);
        }
        let content = self.content_list();
        let block = content.insert_container(content.len(), LoroMap::new())?;
        let props = block.insert_container(PROPERTIES_KEY, LoroMap::new())?;
        props.insert(TYPE_KEY, STATEMENT_GRID_BLOCK)?;
        block.insert_container(ACLS_KEY, LoroMap::new())?;
        block.insert_container(ROWS_KEY, LoroMovableList::new())?;
        debug!("added block {}", block.id());
        Ok(Some(block.id()))
    }

    pub fn remove_block(&self, block_id: &ContainerID) -> Result<bool> {
        if !self.has_doc_permission(Permission::Delete) {
            warn!("no delete permission on sheet");
            return Ok(false);
        }
        let content = self.content_list();
        let pos = position_of(&content, block_id)
            .ok_or_else(|| ColabError::ContainerNotFound(block_id.clone()))?;
        content.delete(pos, 1)?;
        Ok(true)
    }

    fn rows(&self, block_id: &ContainerID) -> Result<Option<LoroMovableList>> {
        let block = self.get_block(block_id)?;
        Ok(block
            .get(ROWS_KEY)
            .and_then(|v| v.into_container().ok())
            .and_then(|c| c.into_movable_list().ok()))
    }

    /// Statement container ids of the block's local rows, in row order.
    pub fn get_block_rows(&self, block_id: &ContainerID) -> Result<Vec<ContainerID>> {
        let Some(rows) = self.rows(block_id)? else {
            return Ok(Vec::new());
        };
        Ok(row_maps(&rows)
            .into_iter()
            .filter(|row| row_type(row).as_deref() == Some(LOCAL_ROW))
            .filter_map(|row| child_map(&row, STATEMENT_KEY))
            .map(|statement| statement.id())
            .collect())
    }

    /// Append a row holding a fresh embedded statement. `None` when the actor
    /// may not add rows to this block.
    pub fn add_local_statement_row(&self, block_id: &ContainerID) -> Result<Option<ContainerID>> {
        if !self.has_block_add_remove_permission(block_id)? {
            warn!("no add-remove permission on block {}", block_id);
            return Ok(None);
        }
        let rows = self.rows(block_id)?.ok_or_else(|| ColabError::UnexpectedValue {
            key: ROWS_KEY.to_string(),
            expected: "movable list",
        })?;
        let row = rows.insert_container(rows.len(), LoroMap::new())?;
        row.insert(TYPE_KEY, LOCAL_ROW)?;
        let statement = row.insert_container(STATEMENT_KEY, LoroMap::new())?;
        let props = statement.insert_container(PROPERTIES_KEY, LoroMap::new())?;
        props.insert(TYPE_KEY, STATEMENT_DOC_TYPE)?;
        statement.insert_container(ACLS_KEY, LoroMap::new())?;
        statement.insert_container(CONTENT_KEY, LoroMap::new())?;
        debug!("added statement row {} to block {}", statement.id(), block_id);
        Ok(Some(statement.id()))
    }

    pub fn remove_row(&self, block_id: &ContainerID, statement_id: &ContainerID) -> Result<bool> {
        if !self.has_block_permission(block_id, Permission::Delete)? {
            warn!("no delete permission on block {}", block_id);
            return Ok(false);
        }
        let Some(rows) = self.rows(block_id)? else {
            return Err(ColabError::ContainerNotFound(statement_id.clone()));
        };
        let pos = row_position(&rows, statement_id)
            .ok_or_else(|| ColabError::ContainerNotFound(statement_id.clone()))?;
        rows.delete(pos, 1)?;
        Ok(true)
    }

    /// Controller for a statement embedded in one of this sheet's blocks.
    pub fn statement_controller(
        &self,
        block_id: &ContainerID,
        statement_id: &ContainerID,
    ) -> Result<SheetStatementController> {
        self.get_block(block_id)?;
        resolve_map(&self.doc, statement_id)?;
        Ok(SheetStatementController::new(
            self.clone(),
            block_id.clone(),
            statement_id.clone(),
        ))
    }

    pub fn subscribe_to_block_acl_changes<F>(
        &self,
        block_id: &ContainerID,
        callback: F,
    ) -> Result<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let prefix = child_path(&self.block_path(block_id)?, &[ACLS_KEY]);
        Ok(subscribe_to_paths(&self.doc, vec![prefix], callback))
    }

    /// Empty every ACL map in the sheet: document, blocks, embedded statements
    /// and their languages.
    pub fn clear_acls(&self) -> Result<()> {
        acl::clear_acl_map(&self.doc_acls())?;
        for block_id in self.get_blocks() {
            let block = self.get_block(&block_id)?;
            if let Some(acls) = child_map(&block, ACLS_KEY) {
                acl::clear_acl_map(&acls)?;
            }
            for statement_id in self.get_block_rows(&block_id)? {
                self.statement_controller(&block_id, &statement_id)?
                    .clear_acls()?;
            }
        }
        Ok(())
    }
}

impl DocController for SheetDocController {
    fn doc(&self) -> &LoroDoc {
        &self.doc
    }

    fn prpls(&self) -> &[String] {
        &self.prpls
    }
}

fn container_ids(list: &LoroMovableList) -> Vec<ContainerID> {
    (0..list.len())
        .filter_map(|i| list.get(i))
        .filter_map(|v| v.into_container().ok())
        .map(|c| c.id())
        .collect()
}

fn position_of(list: &LoroMovableList, id: &ContainerID) -> Option<usize> {
    (0..list.len()).find(|&i| {
        list.get(i)
            .and_then(|v| v.into_container().ok())
            .map_or(false, |c| c.id() == *id)
    })
}

fn row_position(rows: &LoroMovableList, statement_id: &ContainerID) -> Option<usize> {
    (0..rows.len()).find(|&i| {
        rows.get(i)
            .and_then(|v| v.into_container().ok())
            .and_then(|c| c.into_map().ok())
            .and_then(|row| child_map(&row, STATEMENT_KEY))
            .map_or(false, |s| s.id() == *statement_id)
    })
}

fn row_maps(rows: &LoroMovableList) -> Vec<LoroMap> {
    (0..rows.len())
        .filter_map(|i| rows.get(i))
        .filter_map(|v| v.into_container().ok())
        .filter_map(|c| c.into_map().ok())
        .collect()
}

fn row_type(row: &LoroMap) -> Option<String> {
    row.get(TYPE_KEY)
        .and_then(|v| v.into_value().ok())
        .and_then(|v| v.into_string().ok())
        .map(|s| s.to_string())
}
