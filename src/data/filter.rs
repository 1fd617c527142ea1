//! Read-path restriction types: token ranges, clustering filters, column
//! filters, and data limits.

use std::collections::BTreeSet;

use crate::data::cells::ColumnId;
use crate::data::clustering::Clustering;
use crate::data::{DecoratedKey, Token};

// ------------------------------------------------------------------------------------------------
// Token ranges
// ------------------------------------------------------------------------------------------------

/// One side of a token range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenBound {
    /// No restriction on this side.
    Unbounded,

    /// Bound that includes the token itself.
    Inclusive(Token),

    /// Bound that excludes the token itself.
    Exclusive(Token),
}

/// The partition restriction of a range read or a flush shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    /// Lower bound.
    pub start: TokenBound,

    /// Upper bound.
    pub end: TokenBound,
}

impl DataRange {
    /// The unrestricted range.
    pub fn full() -> Self {
        Self {
            start: TokenBound::Unbounded,
            end: TokenBound::Unbounded,
        }
    }

    /// The half-open range `[start, end)` used by shard splitting.
    pub fn half_open(start: Token, end: Token) -> Self {
        Self {
            start: TokenBound::Inclusive(start),
            end: TokenBound::Exclusive(end),
        }
    }

    /// Range starting at `start` (inclusive) with no upper bound.
    pub fn from_token(start: Token) -> Self {
        Self {
            start: TokenBound::Inclusive(start),
            end: TokenBound::Unbounded,
        }
    }

    /// True when `token` falls inside the range.
    pub fn contains_token(&self, token: Token) -> bool {
        let above_start = match self.start {
            TokenBound::Unbounded => true,
            TokenBound::Inclusive(t) => token >= t,
            TokenBound::Exclusive(t) => token > t,
        };
        let below_end = match self.end {
            TokenBound::Unbounded => true,
            TokenBound::Inclusive(t) => token <= t,
            TokenBound::Exclusive(t) => token < t,
        };
        above_start && below_end
    }

    /// True when `key` falls inside the range.
    pub fn contains(&self, key: &DecoratedKey) -> bool {
        self.contains_token(key.token)
    }

    /// True when a file spanning `[first, last]` may hold keys inside the
    /// range. Used for sorted-file pruning.
    pub fn intersects(&self, first: Token, last: Token) -> bool {
        let starts_before_end = match self.end {
            TokenBound::Unbounded => true,
            TokenBound::Inclusive(t) => first <= t,
            TokenBound::Exclusive(t) => first < t,
        };
        let ends_after_start = match self.start {
            TokenBound::Unbounded => true,
            TokenBound::Inclusive(t) => last >= t,
            TokenBound::Exclusive(t) => last > t,
        };
        starts_before_end && ends_after_start
    }
}

// ------------------------------------------------------------------------------------------------
// Clustering filter
// ------------------------------------------------------------------------------------------------

/// Restriction on which clusterings of a partition a read selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusteringFilter {
    /// Every row.
    All,

    /// Rows between two bounds, under the unified clustering order.
    Slice {
        /// Lower bound (a start kind).
        lower: Clustering,
        /// Upper bound (an end kind).
        upper: Clustering,
    },

    /// An explicit set of row clusterings.
    Names(BTreeSet<Clustering>),
}

impl ClusteringFilter {
    /// Slice filter over `[lower, upper]` bounds.
    pub fn slice(lower: Clustering, upper: Clustering) -> Self {
        Self::Slice { lower, upper }
    }

    /// True when the filter selects every row.
    pub fn is_all(&self) -> bool {
        matches!(self, ClusteringFilter::All)
    }

    /// True when `clustering` passes the filter. Static rows always pass;
    /// their selection is a column concern.
    pub fn selects(&self, clustering: &Clustering) -> bool {
        if clustering.is_static() {
            return true;
        }
        match self {
            ClusteringFilter::All => true,
            ClusteringFilter::Slice { lower, upper } => {
                *lower <= *clustering && *clustering <= *upper
            }
            ClusteringFilter::Names(names) => names.contains(clustering),
        }
    }

    /// Upper bound on the number of rows this filter can select, when one
    /// exists. Drives the row-cache cover check.
    pub fn selected_count(&self) -> Option<usize> {
        match self {
            ClusteringFilter::Names(names) => Some(names.len()),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Column filter
// ------------------------------------------------------------------------------------------------

/// Restriction on which columns of a selected row a read fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnFilter {
    /// Every column.
    All,

    /// An explicit subset.
    Columns(BTreeSet<ColumnId>),
}

impl ColumnFilter {
    /// True when `column` passes the filter.
    pub fn selects(&self, column: ColumnId) -> bool {
        match self {
            ColumnFilter::All => true,
            ColumnFilter::Columns(columns) => columns.contains(&column),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Data limits
// ------------------------------------------------------------------------------------------------

/// Post-reconciliation result limits.
///
/// Applied after merge and tombstone resolution, never before, so a limit
/// can not hide a live row behind already-counted deleted ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLimits {
    /// Maximum number of partitions returned.
    pub partition_limit: usize,

    /// Maximum number of rows returned across all partitions.
    pub row_limit: usize,
}

impl DataLimits {
    /// No limits.
    pub const NONE: DataLimits = DataLimits {
        partition_limit: usize::MAX,
        row_limit: usize::MAX,
    };

    /// Limit the total row count.
    pub fn rows(row_limit: usize) -> Self {
        Self {
            partition_limit: usize::MAX,
            row_limit,
        }
    }
}
