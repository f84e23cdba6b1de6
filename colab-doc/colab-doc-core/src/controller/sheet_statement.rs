use super::statement::chain_with_element;
use super::{
    child_map, child_path, ensure_map, require_map, resolve_map, DocController,
    SheetDocController, StatementController, ACLS_KEY, CONTENT_KEY, PROPERTIES_KEY,
};
use crate::acl::{self, AclLevel, AclMap, PermissionChain};
use crate::error::Result;
use crate::path::PathSegment;
use crate::subscription::subscribe_to_paths;
use loro::{ContainerID, LoroDoc, LoroMap, Subscription};
use tracing::warn;

/// Controller for a statement embedded in a sheet block.
///
/// Language elements inherit from three levels: the sheet document, the
/// owning block and the statement itself.
#[derive(Clone)]
pub struct SheetStatementController {
    sheet: SheetDocController,
    block_id: ContainerID,
    statement_id: ContainerID,
}

impl SheetStatementController {
    pub(crate) fn new(
        sheet: SheetDocController,
        block_id: ContainerID,
        statement_id: ContainerID,
    ) -> Self {
        Self {
            sheet,
            block_id,
            statement_id,
        }
    }

    pub fn sheet(&self) -> &SheetDocController {
        &self.sheet
    }

    pub fn block_id(&self) -> &ContainerID {
        &self.block_id
    }

    pub fn statement_id(&self) -> &ContainerID {
        &self.statement_id
    }

    fn statement_map(&self) -> Result<LoroMap> {
        Ok(resolve_map(self.doc(), &self.statement_id)?.1)
    }

    pub fn get_statement_acl_map(&self) -> Result<AclMap> {
        Ok(child_map(&self.statement_map()?, ACLS_KEY)
            .map(|acls| acl::read_acl_map(&acls))
            .unwrap_or_default())
    }

    /// Requires manage permission; returns whether the patch was applied.
    pub fn patch_statement_acl_map(&self, acls: &AclMap) -> Result<bool> {
        if !self.has_manage_permission()? {
            warn!("no manage permission on statement {}", self.statement_id);
            return Ok(false);
        }
        acl::patch_acl_map(&ensure_map(&self.statement_map()?, ACLS_KEY)?, acls)?;
        Ok(true)
    }

    pub fn subscribe_to_statement_acl_changes<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let prefix = child_path(&self.statement_path()?, &[ACLS_KEY]);
        Ok(subscribe_to_paths(self.doc(), vec![prefix], callback))
    }

    /// Empty the statement ACLs and those of every language.
    pub fn clear_acls(&self) -> Result<()> {
        if let Some(acls) = child_map(&self.statement_map()?, ACLS_KEY) {
            acl::clear_acl_map(&acls)?;
        }
        self.clear_element_acls()
    }
}

impl DocController for SheetStatementController {
    fn doc(&self) -> &LoroDoc {
        self.sheet.doc()
    }

    fn prpls(&self) -> &[String] {
        self.sheet.prpls()
    }
}

impl StatementController for SheetStatementController {
    fn get_properties_map(&self) -> Result<LoroMap> {
        require_map(&self.statement_map()?, PROPERTIES_KEY)
    }

    fn get_content_map(&self) -> Result<LoroMap> {
        require_map(&self.statement_map()?, CONTENT_KEY)
    }

    fn statement_path(&self) -> Result<Vec<PathSegment>> {
        Ok(resolve_map(self.doc(), &self.statement_id)?.0)
    }

    fn get_top_acls(&self) -> Result<AclMap> {
        let doc_acls = self.get_doc_acl_map();
        let block_acls = self.sheet.get_block_acl_map(&self.block_id)?;
        let statement_acls = self.get_statement_acl_map()?;
        Ok(acl::merge_acl_maps([&doc_acls, &block_acls, &statement_acls]))
    }

    fn top_acl_paths(&self) -> Result<Vec<Vec<PathSegment>>> {
        Ok(vec![
            vec![ACLS_KEY.into()],
            child_path(&self.sheet.block_path(&self.block_id)?, &[ACLS_KEY]),
            child_path(&self.statement_path()?, &[ACLS_KEY]),
        ])
    }

    fn permission_chain(&self, code: &str) -> Result<PermissionChain> {
        chain_with_element(
            self,
            code,
            vec![
                (AclLevel::Document, self.get_doc_acl_map()),
                (AclLevel::Block, self.sheet.get_block_acl_map(&self.block_id)?),
                (AclLevel::Statement, self.get_statement_acl_map()?),
            ],
        )
    }

    /// Element ACLs of an embedded statement are manage-gated as well.
    fn patch_stmt_element_acl_map(&self, code: &str, acls: &AclMap) -> Result<bool> {
        if !self.has_manage_permission()? {
            warn!(
                "no manage permission to patch acls of '{}' on statement {}",
                code, self.statement_id
            );
            return Ok(false);
        }
        self.apply_stmt_element_acl_map(code, acls)?;
        Ok(true)
    }
}
