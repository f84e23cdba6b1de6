use super::statement::chain_with_element;
use super::{
    DocController, StatementController, ACLS_KEY, CONTENT_KEY, NAME_KEY, PROPERTIES_KEY,
    STATEMENT_DOC_TYPE, TYPE_KEY,
};
use crate::acl::{self, AclLevel, AclMap, PermissionChain};
use crate::error::Result;
use crate::path::PathSegment;
use loro::{LoroDoc, LoroMap};

/// Controller for a standalone statement document. The only level above the
/// language elements is the document itself.
#[derive(Clone)]
pub struct StatementDocController {
    doc: LoroDoc,
    prpls: Vec<String>,
}

impl StatementDocController {
    pub fn new(doc: LoroDoc, prpls: Vec<String>) -> Self {
        Self { doc, prpls }
    }

    /// Stamp an empty document as a statement and seed its document ACLs.
    pub fn init(doc: &LoroDoc, name: &str, acls: &AclMap) -> Result<()> {
        let props = doc.get_map(PROPERTIES_KEY);
        props.insert(TYPE_KEY, STATEMENT_DOC_TYPE)?;
        props.insert(NAME_KEY, name)?;
        acl::patch_acl_map(&doc.get_map(ACLS_KEY), acls)?;
        doc.get_map(CONTENT_KEY);
        Ok(())
    }

    /// Empty the document ACLs and those of every language.
    pub fn clear_acls(&self) -> Result<()> {
        acl::clear_acl_map(&self.doc_acls())?;
        self.clear_element_acls()
    }
}

impl DocController for StatementDocController {
    fn doc(&self) -> &LoroDoc {
        &self.doc
    }

    fn prpls(&self) -> &[String] {
        &self.prpls
    }
}

impl StatementController for StatementDocController {
    fn get_properties_map(&self) -> Result<LoroMap> {
        Ok(self.doc.get_map(PROPERTIES_KEY))
    }

    fn get_content_map(&self) -> Result<LoroMap> {
        Ok(self.doc.get_map(CONTENT_KEY))
    }

    fn statement_path(&self) -> Result<Vec<PathSegment>> {
        Ok(Vec::new())
    }

    fn get_top_acls(&self) -> Result<AclMap> {
        Ok(self.get_doc_acl_map())
    }

    fn top_acl_paths(&self) -> Result<Vec<Vec<PathSegment>>> {
        Ok(vec![vec![ACLS_KEY.into()]])
    }

    fn permission_chain(&self, code: &str) -> Result<PermissionChain> {
        chain_with_element(
            self,
            code,
            vec![(AclLevel::Document, self.get_doc_acl_map())],
        )
    }
}
