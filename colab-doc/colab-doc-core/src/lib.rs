//! Collaborative statement and sheet documents on top of Loro.
//!
//! Controllers in [`controller`] wrap a shared `LoroDoc` and enforce the
//! layered ACL model, approval workflow and per-language content of colab
//! documents. [`storage::crdt`] keeps documents on disk and hands local
//! updates to the replication layer through [`events`].

pub mod acl;
pub mod approval;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod path;
pub mod storage;
pub mod subscription;

pub use acl::{AclLevel, AclMap, Permission, PermissionChain};
pub use approval::{approval_key, ApprovalRecord, ColabApprovalState, ColabApprovalType};
pub use controller::{
    DocController, SheetDocController, SheetStatementController, StatementController,
    StatementDocController,
};
pub use error::{ColabError, Result};
pub use loro::ContainerID;
