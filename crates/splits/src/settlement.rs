//! Greedy debt simplification.
//!
//! Matches the largest remaining creditor against the largest remaining
//! debtor until one side runs out. This keeps the transfer count at most
//! `n - 1` for `n` members with a non-zero balance, but it is a heuristic:
//! some balance distributions admit fewer transfers than it produces.

use sharex_core::MemberId;

use crate::model::{Member, SimplifiedTransfer};

/// Simplify the debts implied by members' aggregated balances.
pub fn simplify_debts(members: &[Member]) -> Vec<SimplifiedTransfer> {
    let balances: Vec<(MemberId, i64)> = members.iter().map(|m| (m.id, m.net_balance())).collect();
    simplify_balances(&balances)
}

/// Simplify raw `(member, balance)` pairs.
///
/// Output is ordered by descending creditor/debtor magnitude; ties keep the
/// input order.
pub fn simplify_balances(balances: &[(MemberId, i64)]) -> Vec<SimplifiedTransfer> {
    let mut creditors: Vec<(MemberId, u64)> = balances
        .iter()
        .filter(|(_, b)| *b > 0)
        .map(|(id, b)| (*id, b.unsigned_abs()))
        .collect();
    let mut debtors: Vec<(MemberId, u64)> = balances
        .iter()
        .filter(|(_, b)| *b < 0)
        .map(|(id, b)| (*id, b.unsigned_abs()))
        .collect();

    // Stable: equal magnitudes keep their input order.
    creditors.sort_by(|a, b| b.1.cmp(&a.1));
    debtors.sort_by(|a, b| b.1.cmp(&a.1));

    let mut transfers = Vec::with_capacity(creditors.len() + debtors.len());
    let (mut i, mut j) = (0, 0);

    while i < creditors.len() && j < debtors.len() {
        let amount = creditors[i].1.min(debtors[j].1);

        transfers.push(SimplifiedTransfer {
            from: debtors[j].0,
            to: creditors[i].0,
            // Bounded by a positive i64 creditor balance.
            amount: amount as i64,
        });

        creditors[i].1 -= amount;
        debtors[j].1 -= amount;

        if creditors[i].1 == 0 {
            i += 1;
        }
        if debtors[j].1 == 0 {
            j += 1;
        }
    }

    transfers
}
