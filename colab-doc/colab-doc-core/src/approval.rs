use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColabApprovalState {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl ColabApprovalState {
    /// Position in the aggregation order. The aggregate state of an element
    /// is the record state with the lowest rank.
    pub fn rank(&self) -> u8 {
        match self {
            ColabApprovalState::Rejected => 0,
            ColabApprovalState::Draft => 1,
            ColabApprovalState::Pending => 2,
            ColabApprovalState::Approved => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColabApprovalState::Draft => "draft",
            ColabApprovalState::Pending => "pending",
            ColabApprovalState::Approved => "approved",
            ColabApprovalState::Rejected => "rejected",
        }
    }

    /// Approved and pending content is locked against direct edits.
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            ColabApprovalState::Approved | ColabApprovalState::Pending
        )
    }
}

impl fmt::Display for ColabApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColabApprovalType {
    User,
    Group,
}

impl ColabApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColabApprovalType::User => "user",
            ColabApprovalType::Group => "group",
        }
    }
}

/// One principal's verdict on a statement element.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalRecord {
    #[serde(rename = "type")]
    pub approval_type: ColabApprovalType,
    pub user: String,
    pub state: ColabApprovalState,
    pub date: DateTime<Utc>,
}

/// Key under which a user's approval is recorded.
pub fn approval_key(org_id: &str, user_id: &str) -> String {
    format!("{}/u/{}", org_id, user_id)
}

/// Lowest-ranked state among `states`, or draft when there are none.
pub fn aggregate_state<I>(states: I) -> ColabApprovalState
where
    I: IntoIterator<Item = ColabApprovalState>,
{
    states
        .into_iter()
        .min_by_key(|s| s.rank())
        .unwrap_or(ColabApprovalState::Draft)
}
