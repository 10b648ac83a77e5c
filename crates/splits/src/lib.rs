//! Expense splitting and settlement (allocation, balances, greedy debt simplification).
//!
//! Pure domain logic only: no IO, no async. All amounts are `i64` minor
//! currency units.

pub mod allocation;
pub mod balances;
pub mod error;
pub mod model;
pub mod settlement;
pub mod snapshot;
pub mod summary;

pub use allocation::{
    calculate_equal_split, calculate_percentage_split, calculate_split, check_allocations,
    validate_allocations, MemberInputs,
};
pub use balances::{aggregate_balances, member_balance_details};
pub use error::{SplitError, SplitResult};
pub use model::{
    Counterparty, Member, MemberBalance, MemberKind, SimplifiedTransfer, SplitAllocation,
    SplitExpense, SplitKind,
};
pub use settlement::{simplify_balances, simplify_debts};
pub use snapshot::{settle_groups, GroupLedger, GroupSnapshot, Settlement};
pub use summary::{group_summary, GroupSummary};
