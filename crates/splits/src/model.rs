use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sharex_core::{Entity, ExpenseId, GroupId, MemberId, SplitExpenseId, ValueObject};

use crate::error::{SplitError, SplitResult};

/// Whether a member has an account or is a stand-in added by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Registered,
    Placeholder,
}

/// A member of a split group.
///
/// `net_balance` is positive when the group owes the member and negative when
/// the member owes the group. It is only ever produced by
/// [`aggregate_balances`](crate::balances::aggregate_balances).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    pub display_name: String,
    pub kind: MemberKind,
    #[serde(default)]
    net_balance: i64,
}

impl Member {
    pub fn new(id: MemberId, display_name: impl Into<String>, kind: MemberKind) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            kind,
            net_balance: 0,
        }
    }

    pub fn registered(id: MemberId, display_name: impl Into<String>) -> Self {
        Self::new(id, display_name, MemberKind::Registered)
    }

    pub fn placeholder(id: MemberId, display_name: impl Into<String>) -> Self {
        Self::new(id, display_name, MemberKind::Placeholder)
    }

    pub fn net_balance(&self) -> i64 {
        self.net_balance
    }

    pub(crate) fn with_net_balance(mut self, net_balance: i64) -> Self {
        self.net_balance = net_balance;
        self
    }
}

impl Entity for Member {
    type Id = MemberId;

    fn id(&self) -> MemberId {
        self.id
    }
}

/// How an expense total is divided among members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitKind {
    Equal,
    Percentage,
    Exact,
    Unequal,
}

impl SplitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitKind::Equal => "equal",
            SplitKind::Percentage => "percentage",
            SplitKind::Exact => "exact",
            SplitKind::Unequal => "unequal",
        }
    }
}

impl core::fmt::Display for SplitKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One member's share of an expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitAllocation {
    pub member_id: MemberId,
    /// Authoritative share in minor units.
    pub amount: i64,
    /// Informational only (0-100), set for percentage splits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
}

impl SplitAllocation {
    pub fn new(member_id: MemberId, amount: i64) -> Self {
        Self {
            member_id,
            amount,
            percentage: None,
        }
    }

    pub fn with_percentage(member_id: MemberId, amount: i64, percentage: f64) -> Self {
        Self {
            member_id,
            amount,
            percentage: Some(percentage),
        }
    }
}

impl ValueObject for SplitAllocation {}

/// The allocation record attached to one expense inside a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitExpense {
    pub id: SplitExpenseId,
    pub expense_id: ExpenseId,
    pub group_id: GroupId,
    pub payer_id: MemberId,
    pub split_kind: SplitKind,
    pub allocations: Vec<SplitAllocation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SplitExpense {
    /// Sum of all allocations, i.e. the amount the payer fronted.
    pub fn total(&self) -> SplitResult<i64> {
        let total: i128 = self.allocations.iter().map(|a| i128::from(a.amount)).sum();
        i64::try_from(total).map_err(|_| SplitError::Overflow)
    }

    /// Members referenced by this expense (payer first, then allocations).
    pub fn participants(&self) -> impl Iterator<Item = MemberId> + '_ {
        core::iter::once(self.payer_id).chain(self.allocations.iter().map(|a| a.member_id))
    }
}

impl Entity for SplitExpense {
    type Id = SplitExpenseId;

    fn id(&self) -> SplitExpenseId {
        self.id
    }
}

/// A single point-to-point payment that settles part of the group's debts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifiedTransfer {
    #[serde(rename = "fromMemberId")]
    pub from: MemberId,
    #[serde(rename = "toMemberId")]
    pub to: MemberId,
    /// Always positive.
    pub amount: i64,
}

impl ValueObject for SimplifiedTransfer {}

/// Another member and the amount exchanged with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counterparty {
    pub member_id: MemberId,
    pub member_name: String,
    pub amount: i64,
}

/// Per-member breakdown of who pays whom after simplification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberBalance {
    pub member_id: MemberId,
    pub member_name: String,
    pub balance: i64,
    /// Members this member has to pay.
    pub owed_to: Vec<Counterparty>,
    /// Members who have to pay this member.
    pub owed_by: Vec<Counterparty>,
}
