//! Net balance aggregation.

use std::collections::BTreeMap;

use sharex_core::MemberId;

use crate::error::{SplitError, SplitResult};
use crate::model::{Counterparty, Member, MemberBalance, SplitExpense};
use crate::settlement::simplify_debts;

/// Compute every member's net balance from a set of split expenses.
///
/// Returns fresh copies of `members` (same order) with `net_balance` filled
/// in. The result does not depend on the order of `expenses`. Members that
/// appear in no expense end at 0.
pub fn aggregate_balances(members: &[Member], expenses: &[SplitExpense]) -> SplitResult<Vec<Member>> {
    let mut balances: BTreeMap<MemberId, i128> = members.iter().map(|m| (m.id, 0)).collect();

    for expense in expenses {
        let mut paid: i128 = 0;
        for allocation in &expense.allocations {
            let amount = i128::from(allocation.amount);
            paid += amount;
            *balances.entry(allocation.member_id).or_default() -= amount;
        }
        *balances.entry(expense.payer_id).or_default() += paid;
    }

    members
        .iter()
        .map(|member| {
            let balance = balances.get(&member.id).copied().unwrap_or_default();
            let balance = i64::try_from(balance).map_err(|_| SplitError::Overflow)?;
            Ok(member.clone().with_net_balance(balance))
        })
        .collect()
}

/// Who `member` pays and who pays `member` once the group's debts are simplified.
///
/// `all_members` must already carry aggregated balances.
pub fn member_balance_details(member: &Member, all_members: &[Member]) -> MemberBalance {
    let names: BTreeMap<MemberId, &str> = all_members
        .iter()
        .map(|m| (m.id, m.display_name.as_str()))
        .collect();

    let counterparty = |id: MemberId, amount: i64| {
        names.get(&id).map(|name| Counterparty {
            member_id: id,
            member_name: (*name).to_string(),
            amount,
        })
    };

    let mut owed_to = Vec::new();
    let mut owed_by = Vec::new();

    for transfer in simplify_debts(all_members) {
        if transfer.from == member.id {
            owed_to.extend(counterparty(transfer.to, transfer.amount));
        } else if transfer.to == member.id {
            owed_by.extend(counterparty(transfer.from, transfer.amount));
        }
    }

    MemberBalance {
        member_id: member.id,
        member_name: member.display_name.clone(),
        balance: member.net_balance(),
        owed_to,
        owed_by,
    }
}
