//! Clustering prefixes: the sort key within a partition.
//!
//! A clustering prefix is an ordered tuple of opaque value components plus a
//! kind tag. Rows carry full prefixes of kind [`ClusteringKind::Row`]; range
//! tombstones carry bound or boundary kinds. The comparison rules here place
//! bounds correctly relative to the rows they bracket, so range containment
//! reduces to two ordinary comparisons.

use std::cmp::Ordering;

// ------------------------------------------------------------------------------------------------
// Kind tags
// ------------------------------------------------------------------------------------------------

/// The closed set of clustering prefix kinds.
///
/// `weight()` positions a prefix relative to a row with identical values:
/// negative kinds sort before the row, positive kinds after. A boundary kind
/// acts as an end for the range it closes and a start for the range it
/// opens, at a single position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusteringKind {
    /// The per-partition static row; sorts before every regular row.
    StaticRow,

    /// A regular row.
    Row,

    /// Inclusive lower bound of a range.
    InclStart,

    /// Exclusive lower bound of a range.
    ExclStart,

    /// Inclusive upper bound of a range.
    InclEnd,

    /// Exclusive upper bound of a range.
    ExclEnd,

    /// Boundary closing one range inclusively and opening the next
    /// exclusively.
    InclEndExclStartBoundary,

    /// Boundary closing one range exclusively and opening the next
    /// inclusively.
    ExclEndInclStartBoundary,
}

impl ClusteringKind {
    /// Position relative to a row with the same values: -1 before, 0 at,
    /// +1 after.
    pub fn weight(self) -> i8 {
        match self {
            ClusteringKind::InclStart
            | ClusteringKind::ExclEnd
            | ClusteringKind::ExclEndInclStartBoundary => -1,
            ClusteringKind::StaticRow | ClusteringKind::Row => 0,
            ClusteringKind::ExclStart
            | ClusteringKind::InclEnd
            | ClusteringKind::InclEndExclStartBoundary => 1,
        }
    }

    /// True for kinds that open a range.
    pub fn is_start(self) -> bool {
        matches!(
            self,
            ClusteringKind::InclStart
                | ClusteringKind::ExclStart
                | ClusteringKind::InclEndExclStartBoundary
                | ClusteringKind::ExclEndInclStartBoundary
        )
    }

    /// True for kinds that close a range.
    pub fn is_end(self) -> bool {
        matches!(
            self,
            ClusteringKind::InclEnd
                | ClusteringKind::ExclEnd
                | ClusteringKind::InclEndExclStartBoundary
                | ClusteringKind::ExclEndInclStartBoundary
        )
    }

    /// True for the two boundary kinds.
    pub fn is_boundary(self) -> bool {
        matches!(
            self,
            ClusteringKind::InclEndExclStartBoundary | ClusteringKind::ExclEndInclStartBoundary
        )
    }
}

// ------------------------------------------------------------------------------------------------
// Clustering prefix
// ------------------------------------------------------------------------------------------------

/// An ordered tuple of opaque clustering values with a kind tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Clustering {
    /// Kind tag; see [`ClusteringKind`].
    pub kind: ClusteringKind,

    /// Value components, compared lexicographically per component.
    pub values: Vec<Vec<u8>>,
}

impl Clustering {
    /// A regular row clustering.
    pub fn row(values: Vec<Vec<u8>>) -> Self {
        Self {
            kind: ClusteringKind::Row,
            values,
        }
    }

    /// The static-row clustering (no values; sorts before all rows).
    pub fn static_row() -> Self {
        Self {
            kind: ClusteringKind::StaticRow,
            values: Vec::new(),
        }
    }

    /// Inclusive lower bound of a slice.
    pub fn incl_start(values: Vec<Vec<u8>>) -> Self {
        Self {
            kind: ClusteringKind::InclStart,
            values,
        }
    }

    /// Exclusive lower bound of a slice.
    pub fn excl_start(values: Vec<Vec<u8>>) -> Self {
        Self {
            kind: ClusteringKind::ExclStart,
            values,
        }
    }

    /// Inclusive upper bound of a slice.
    pub fn incl_end(values: Vec<Vec<u8>>) -> Self {
        Self {
            kind: ClusteringKind::InclEnd,
            values,
        }
    }

    /// Exclusive upper bound of a slice.
    pub fn excl_end(values: Vec<Vec<u8>>) -> Self {
        Self {
            kind: ClusteringKind::ExclEnd,
            values,
        }
    }

    /// Lower bound below every row: an inclusive start with no components.
    pub fn bottom() -> Self {
        Self::incl_start(Vec::new())
    }

    /// Upper bound above every row: an inclusive end with no components.
    pub fn top() -> Self {
        Self::incl_end(Vec::new())
    }

    /// True when this prefix is the static-row clustering.
    pub fn is_static(&self) -> bool {
        self.kind == ClusteringKind::StaticRow
    }

    /// Approximate heap footprint, used for memtable size accounting.
    pub fn data_size(&self) -> usize {
        self.values.iter().map(Vec::len).sum::<usize>() + self.values.len() * 8
    }
}

impl PartialOrd for Clustering {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Clustering {
    /// Compare value components left to right; on a shared prefix, the
    /// shorter prefix's kind decides which side of the extension it falls
    /// on (start bounds before, end bounds after); at equal length, kind
    /// weights order bounds against rows at the same position.
    fn cmp(&self, other: &Self) -> Ordering {
        // Static sorts before everything that is not static.
        match (self.is_static(), other.is_static()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        let shared = self.values.len().min(other.values.len());
        for i in 0..shared {
            match self.values[i].cmp(&other.values[i]) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }

        match self.values.len().cmp(&other.values.len()) {
            // Weight positions bounds against rows; the kind discriminant
            // then breaks ties between distinct bounds at one position so
            // the order stays consistent with equality.
            Ordering::Equal => self
                .kind
                .weight()
                .cmp(&other.kind.weight())
                .then_with(|| (self.kind as u8).cmp(&(other.kind as u8))),
            Ordering::Less => {
                // self is a strict prefix of other: its kind decides the side.
                if self.kind.weight() > 0 {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            Ordering::Greater => {
                if other.kind.weight() > 0 {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
        }
    }
}
