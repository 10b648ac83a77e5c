use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sharex_core::{GroupId, MemberId};

use crate::balances::aggregate_balances;
use crate::error::{SplitError, SplitResult};
use crate::snapshot::GroupSnapshot;

/// Dashboard roll-up of one group, from one member's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub group_id: GroupId,
    pub group_name: String,
    /// Number of recorded expenses.
    pub total_expenses: usize,
    /// Sum of all expense totals.
    pub total_amount: i64,
    pub member_count: usize,
    /// The viewer's net balance (0 if the viewer is not a member).
    pub viewer_balance: i64,
    pub last_activity: Option<DateTime<Utc>>,
}

pub fn group_summary(snapshot: &GroupSnapshot, viewer: MemberId) -> SplitResult<GroupSummary> {
    let mut total_amount: i64 = 0;
    for expense in snapshot.expenses() {
        total_amount = total_amount
            .checked_add(expense.total()?)
            .ok_or(SplitError::Overflow)?;
    }

    let viewer_balance = aggregate_balances(snapshot.members(), snapshot.expenses())?
        .iter()
        .find(|m| m.id == viewer)
        .map(|m| m.net_balance())
        .unwrap_or_default();

    Ok(GroupSummary {
        group_id: snapshot.group_id(),
        group_name: snapshot.name().to_string(),
        total_expenses: snapshot.expenses().len(),
        total_amount,
        member_count: snapshot.members().len(),
        viewer_balance,
        last_activity: snapshot.expenses().iter().map(|e| e.updated_at).max(),
    })
}
