//! Allocation of an expense total across members.
//!
//! Every successful calculation returns allocations that sum exactly to the
//! requested total (exact splits excepted: they echo caller-supplied amounts
//! and are checked separately by [`validate_allocations`]).

use std::collections::BTreeMap;

use sharex_core::MemberId;

use crate::error::{SplitError, SplitResult};
use crate::model::{SplitAllocation, SplitKind};

/// Tolerance applied when checking that percentages sum to 100.
const PERCENTAGE_TOLERANCE: f64 = 0.01;

/// Largest drift (exclusive) accepted between allocation sum and total.
const ALLOCATION_DRIFT_LIMIT: i128 = 2;

/// Per-member inputs for the non-equal split kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberInputs {
    /// Member id -> percentage (0-100).
    Percentages(BTreeMap<MemberId, f64>),
    /// Member id -> amount in minor units.
    Amounts(BTreeMap<MemberId, i64>),
}

/// Split `total` into `member_count` near-equal parts.
///
/// The first `total % member_count` parts carry one extra unit.
pub fn calculate_equal_split(total: i64, member_count: usize) -> SplitResult<Vec<i64>> {
    if member_count == 0 {
        return Err(SplitError::NoMembers);
    }
    if total < 0 {
        return Err(SplitError::InvalidAmount(total));
    }

    let n = i64::try_from(member_count).map_err(|_| SplitError::Overflow)?;
    let base = total / n;
    let remainder = (total % n) as usize;

    let mut parts = vec![base; member_count];
    for part in parts.iter_mut().take(remainder) {
        *part += 1;
    }
    Ok(parts)
}

/// Split `total` by percentages.
///
/// Each part is `round(total * pct / 100)`; whatever rounding leaves over (or
/// takes away) is applied to the first part, so the first member can drift
/// from its nominal percentage by the accumulated rounding of the others.
pub fn calculate_percentage_split(total: i64, percentages: &[f64]) -> SplitResult<Vec<i64>> {
    if percentages.is_empty() {
        return Err(SplitError::NoMembers);
    }
    if total < 0 {
        return Err(SplitError::InvalidAmount(total));
    }

    let sum: f64 = percentages.iter().sum();
    if !sum.is_finite() || (sum - 100.0).abs() > PERCENTAGE_TOLERANCE {
        return Err(SplitError::PercentageSum { sum });
    }

    let mut parts: Vec<i64> = percentages
        .iter()
        .map(|pct| ((total as f64) * pct / 100.0).round() as i64)
        .collect();

    let allocated: i128 = parts.iter().map(|p| i128::from(*p)).sum();
    let residual = i64::try_from(i128::from(total) - allocated).map_err(|_| SplitError::Overflow)?;
    if residual != 0 {
        parts[0] = parts[0].checked_add(residual).ok_or(SplitError::Overflow)?;
    }
    Ok(parts)
}

/// Compute allocations for `members` (in order) according to `kind`.
pub fn calculate_split(
    total: i64,
    kind: SplitKind,
    members: &[MemberId],
    inputs: Option<&MemberInputs>,
) -> SplitResult<Vec<SplitAllocation>> {
    if kind == SplitKind::Unequal {
        return Err(SplitError::UnsupportedSplitType(kind));
    }
    if members.is_empty() {
        return Err(SplitError::NoMembers);
    }
    if total < 0 {
        return Err(SplitError::InvalidAmount(total));
    }

    match kind {
        SplitKind::Equal => {
            let parts = calculate_equal_split(total, members.len())?;
            Ok(members
                .iter()
                .zip(parts)
                .map(|(id, amount)| SplitAllocation::new(*id, amount))
                .collect())
        }
        SplitKind::Percentage => {
            let Some(MemberInputs::Percentages(by_member)) = inputs else {
                return Err(SplitError::missing(kind, "percentages required"));
            };

            // Members without an entry contribute 0%.
            let percentages: Vec<f64> = members
                .iter()
                .map(|id| by_member.get(id).copied().unwrap_or(0.0))
                .collect();
            let parts = calculate_percentage_split(total, &percentages)?;

            Ok(members
                .iter()
                .zip(parts)
                .zip(percentages)
                .map(|((id, amount), pct)| SplitAllocation::with_percentage(*id, amount, pct))
                .collect())
        }
        SplitKind::Exact => {
            let Some(MemberInputs::Amounts(by_member)) = inputs else {
                return Err(SplitError::missing(kind, "amounts required"));
            };

            members
                .iter()
                .map(|id| {
                    let amount = *by_member
                        .get(id)
                        .ok_or_else(|| SplitError::missing(kind, format!("no amount for member {id}")))?;
                    if amount < 0 {
                        return Err(SplitError::InvalidAmount(amount));
                    }
                    Ok(SplitAllocation::new(*id, amount))
                })
                .collect()
        }
        SplitKind::Unequal => Err(SplitError::UnsupportedSplitType(kind)),
    }
}

/// True when the allocations sum to `total` within one unit of slack.
pub fn validate_allocations(total: i64, allocations: &[SplitAllocation]) -> bool {
    let allocated: i128 = allocations.iter().map(|a| i128::from(a.amount)).sum();
    (allocated - i128::from(total)).abs() < ALLOCATION_DRIFT_LIMIT
}

/// Like [`validate_allocations`], but reports the drift as an error.
pub fn check_allocations(total: i64, allocations: &[SplitAllocation]) -> SplitResult<()> {
    if validate_allocations(total, allocations) {
        return Ok(());
    }
    let allocated: i128 = allocations.iter().map(|a| i128::from(a.amount)).sum();
    Err(SplitError::AllocationMismatch {
        total,
        allocated: i64::try_from(allocated).map_err(|_| SplitError::Overflow)?,
    })
}
