//! Consistent group snapshots.
//!
//! Settlement always runs against one immutable [`GroupSnapshot`]. The
//! [`GroupLedger`] hands out the current snapshot as an `Arc` (readers never
//! hold the lock while computing) and swaps in replacements under an
//! [`ExpectedVersion`] check.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use sharex_core::{Entity, ExpectedVersion, GroupId, MemberId};

use crate::balances::aggregate_balances;
use crate::error::{SplitError, SplitResult};
use crate::model::{Member, SimplifiedTransfer, SplitExpense};
use crate::settlement::simplify_debts;

/// Immutable view of one group's members and expenses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    group_id: GroupId,
    name: String,
    version: u64,
    members: Vec<Member>,
    expenses: Vec<SplitExpense>,
}

/// Balances and transfers computed from a single snapshot version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub group_id: GroupId,
    pub version: u64,
    pub balances: Vec<Member>,
    pub transfers: Vec<SimplifiedTransfer>,
}

impl GroupSnapshot {
    pub fn new(group_id: GroupId, name: impl Into<String>) -> Self {
        Self {
            group_id,
            name: name.into(),
            version: 0,
            members: Vec::new(),
            expenses: Vec::new(),
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn expenses(&self) -> &[SplitExpense] {
        &self.expenses
    }

    fn is_member(&self, id: MemberId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    /// Snapshot with `member` added (or renamed, if the id is already present).
    pub fn with_member(&self, member: Member) -> Self {
        let mut next = self.clone();
        match next.members.iter_mut().find(|m| m.id == member.id) {
            Some(existing) => {
                existing.display_name = member.display_name;
                existing.kind = member.kind;
            }
            None => next.members.push(Member::new(member.id, member.display_name, member.kind)),
        }
        next
    }

    /// Snapshot without `member`. Members referenced by an expense cannot leave.
    pub fn without_member(&self, member: MemberId) -> SplitResult<Self> {
        if !self.is_member(member) {
            return Err(SplitError::UnknownMember(member));
        }
        if self.expenses.iter().any(|e| e.participants().any(|p| p == member)) {
            return Err(SplitError::MemberInUse(member));
        }
        let mut next = self.clone();
        next.members.retain(|m| m.id != member);
        Ok(next)
    }

    /// Snapshot with `expense` recorded, replacing any expense with the same id.
    ///
    /// Every participant must already be a member so the group's balances
    /// keep summing to zero.
    pub fn with_expense(&self, expense: SplitExpense) -> SplitResult<Self> {
        if let Some(stranger) = expense.participants().find(|p| !self.is_member(*p)) {
            return Err(SplitError::UnknownMember(stranger));
        }
        if let Some(bad) = expense.allocations.iter().find(|a| a.amount < 0) {
            return Err(SplitError::InvalidAmount(bad.amount));
        }
        expense.total()?;

        let mut next = self.clone();
        match next.expenses.iter_mut().find(|e| e.id() == expense.id()) {
            Some(existing) => *existing = expense,
            None => next.expenses.push(expense),
        }
        Ok(next)
    }

    /// Compute balances and settling transfers for this snapshot.
    pub fn settle(&self) -> SplitResult<Settlement> {
        let balances = aggregate_balances(&self.members, &self.expenses)?;
        let transfers = simplify_debts(&balances);
        Ok(Settlement {
            group_id: self.group_id,
            version: self.version,
            balances,
            transfers,
        })
    }
}

/// Shared, versioned holder of a group's current snapshot.
#[derive(Debug)]
pub struct GroupLedger {
    current: RwLock<Arc<GroupSnapshot>>,
}

impl GroupLedger {
    pub fn new(snapshot: GroupSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot. Later writes do not affect the returned value.
    pub fn snapshot(&self) -> Arc<GroupSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the snapshot with `change(current)` if `expected` still holds.
    ///
    /// The new snapshot gets `version + 1`. On error nothing is written.
    pub fn update<F>(&self, expected: ExpectedVersion, change: F) -> SplitResult<Arc<GroupSnapshot>>
    where
        F: FnOnce(&GroupSnapshot) -> SplitResult<GroupSnapshot>,
    {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        expected.check(guard.version)?;

        let mut next = change(&guard)?;
        next.version = guard.version + 1;
        let next = Arc::new(next);
        *guard = Arc::clone(&next);

        tracing::debug!(
            group_id = %next.group_id,
            version = next.version,
            "group snapshot replaced"
        );

        Ok(next)
    }

    pub fn record_expense(
        &self,
        expected: ExpectedVersion,
        expense: SplitExpense,
    ) -> SplitResult<Arc<GroupSnapshot>> {
        self.update(expected, move |snapshot| snapshot.with_expense(expense))
    }

    pub fn add_member(&self, expected: ExpectedVersion, member: Member) -> SplitResult<Arc<GroupSnapshot>> {
        self.update(expected, move |snapshot| Ok(snapshot.with_member(member)))
    }

    pub fn remove_member(
        &self,
        expected: ExpectedVersion,
        member: MemberId,
    ) -> SplitResult<Arc<GroupSnapshot>> {
        self.update(expected, move |snapshot| snapshot.without_member(member))
    }

    /// Settle against the snapshot current at call time.
    pub fn settle(&self) -> SplitResult<Settlement> {
        self.snapshot().settle()
    }
}

/// Settle several groups in parallel, one scoped thread per group.
///
/// Results come back in input order.
pub fn settle_groups(snapshots: &[Arc<GroupSnapshot>]) -> Vec<SplitResult<Settlement>> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = snapshots
            .iter()
            .map(|snapshot| scope.spawn(move || snapshot.settle()))
            .collect();

        handles
            .into_iter()
            .zip(snapshots)
            .map(|(handle, snapshot)| {
                handle.join().unwrap_or_else(|_| {
                    tracing::error!(group_id = %snapshot.group_id, "settlement thread panicked");
                    snapshot.settle()
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sharex_core::{DomainError, ExpenseId, SplitExpenseId};
    use uuid::Uuid;

    use crate::model::{SplitAllocation, SplitKind};

    fn id(n: u128) -> MemberId {
        MemberId::from_uuid(Uuid::from_u128(n))
    }

    fn group_id(n: u128) -> GroupId {
        GroupId::from_uuid(Uuid::from_u128(n))
    }

    fn expense(n: u128, payer: MemberId, shares: &[(MemberId, i64)]) -> SplitExpense {
        let at = Utc.with_ymd_and_hms(2024, 5, 10, 8, 30, 0).unwrap();
        SplitExpense {
            id: SplitExpenseId::from_uuid(Uuid::from_u128(n)),
            expense_id: ExpenseId::from_uuid(Uuid::from_u128(1000 + n)),
            group_id: group_id(1),
            payer_id: payer,
            split_kind: SplitKind::Exact,
            allocations: shares
                .iter()
                .map(|(m, amount)| SplitAllocation::new(*m, *amount))
                .collect(),
            created_at: at,
            updated_at: at,
        }
    }

    fn trio() -> GroupLedger {
        let snapshot = GroupSnapshot::new(group_id(1), "Trip")
            .with_member(Member::registered(id(1), "A"))
            .with_member(Member::registered(id(2), "B"))
            .with_member(Member::placeholder(id(3), "C"));
        GroupLedger::new(snapshot)
    }

    #[test]
    fn settle_matches_documented_example() {
        let ledger = trio();
        ledger
            .record_expense(
                ExpectedVersion::Exact(0),
                expense(1, id(1), &[(id(2), 300), (id(3), 200)]),
            )
            .unwrap();

        let settlement = ledger.settle().unwrap();
        assert_eq!(settlement.version, 1);
        assert_eq!(settlement.transfers.len(), 2);
        assert_eq!(settlement.transfers[0].from, id(2));
        assert_eq!(settlement.transfers[0].amount, 300);
        assert_eq!(settlement.transfers[1].from, id(3));
        assert_eq!(settlement.transfers[1].amount, 200);
    }

    #[test]
    fn readers_keep_their_snapshot_across_writes() {
        let ledger = trio();
        let before = ledger.snapshot();

        ledger
            .record_expense(ExpectedVersion::Any, expense(1, id(1), &[(id(2), 10)]))
            .unwrap();

        assert!(before.expenses().is_empty());
        assert_eq!(ledger.snapshot().expenses().len(), 1);
        assert!(before.settle().unwrap().transfers.is_empty());
    }

    #[test]
    fn stale_writer_is_rejected_without_changes() {
        let ledger = trio();
        ledger
            .record_expense(ExpectedVersion::Exact(0), expense(1, id(1), &[(id(2), 10)]))
            .unwrap();

        let err = ledger
            .record_expense(ExpectedVersion::Exact(0), expense(2, id(2), &[(id(1), 10)]))
            .unwrap_err();
        assert!(matches!(err, SplitError::Domain(DomainError::Conflict(_))));
        assert_eq!(ledger.snapshot().version(), 1);
        assert_eq!(ledger.snapshot().expenses().len(), 1);
    }

    #[test]
    fn expense_with_stranger_is_rejected() {
        let ledger = trio();
        let err = ledger
            .record_expense(ExpectedVersion::Any, expense(1, id(1), &[(id(9), 10)]))
            .unwrap_err();
        assert_eq!(err, SplitError::UnknownMember(id(9)));
    }

    #[test]
    fn re_recording_an_expense_replaces_it() {
        let ledger = trio();
        ledger
            .record_expense(ExpectedVersion::Any, expense(1, id(1), &[(id(2), 10)]))
            .unwrap();
        ledger
            .record_expense(ExpectedVersion::Any, expense(1, id(1), &[(id(2), 40)]))
            .unwrap();

        let settlement = ledger.settle().unwrap();
        assert_eq!(ledger.snapshot().expenses().len(), 1);
        assert_eq!(settlement.balances[0].net_balance(), 40);
    }

    #[test]
    fn referenced_member_cannot_be_removed() {
        let ledger = trio();
        ledger
            .record_expense(ExpectedVersion::Any, expense(1, id(1), &[(id(2), 10)]))
            .unwrap();

        assert_eq!(
            ledger.remove_member(ExpectedVersion::Any, id(2)).unwrap_err(),
            SplitError::MemberInUse(id(2))
        );
        let after = ledger.remove_member(ExpectedVersion::Any, id(3)).unwrap();
        assert_eq!(after.members().len(), 2);
    }

    #[test]
    fn groups_settle_in_parallel_in_input_order() {
        let first = trio();
        first
            .record_expense(ExpectedVersion::Any, expense(1, id(1), &[(id(2), 10)]))
            .unwrap();
        let second = GroupLedger::new(GroupSnapshot::new(group_id(2), "Flat"));

        let results = settle_groups(&[first.snapshot(), second.snapshot()]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().group_id, group_id(1));
        assert_eq!(results[0].as_ref().unwrap().transfers.len(), 1);
        assert!(results[1].as_ref().unwrap().transfers.is_empty());
    }
}
