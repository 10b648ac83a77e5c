use sharex_core::{DomainError, MemberId};
use thiserror::Error;

use crate::model::SplitKind;

pub type SplitResult<T> = Result<T, SplitError>;

/// Errors raised while computing allocations, balances or snapshots.
///
/// All of these signal caller misuse; none are retryable and none leave a
/// partially applied result behind.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SplitError {
    #[error("percentages must sum to 100 (got {sum})")]
    PercentageSum { sum: f64 },

    #[error("{kind} split is missing per-member data: {detail}")]
    MissingAllocationData { kind: SplitKind, detail: String },

    #[error("unsupported split type: {0}")]
    UnsupportedSplitType(SplitKind),

    #[error("allocations sum to {allocated}, expected {total}")]
    AllocationMismatch { total: i64, allocated: i64 },

    #[error("split requires at least one member")]
    NoMembers,

    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("amount overflows the minor-unit range")]
    Overflow,

    #[error("member {0} is not part of the group")]
    UnknownMember(MemberId),

    #[error("member {0} is still referenced by recorded expenses")]
    MemberInUse(MemberId),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl SplitError {
    pub(crate) fn missing(kind: SplitKind, detail: impl Into<String>) -> Self {
        Self::MissingAllocationData {
            kind,
            detail: detail.into(),
        }
    }
}
