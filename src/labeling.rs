// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Nested-interval labeling via Stern–Brocot mediant descent.
//!
//! Every stored entity carries a *tree path*: the sibling ranks from the
//! tenant down to the entity. [`interval_for`] turns a tree path into a pair
//! of rational bounds such that:
//!
//! - a descendant's interval is strictly contained in its ancestor's
//!   (`low > ancestor.low && high <= ancestor.high`)
//! - siblings never overlap and a higher rank yields a lower interval,
//!   with `high(r + 1) == low(r)`
//!
//! New children therefore never force a relabel of existing ones.
//!
//! ```text
//! (1/2, 1/1)                 start
//!   rank 1 → (2/3, 1/1)
//!   rank 2 → (3/5, 2/3)
//!   rank 3 → (4/7, 3/5)
//! ```
//!
//! # Example
//!
//! ```
//! use inventory_tree::labeling::{interval_for, Rational};
//!
//! let first = interval_for(&[1]).unwrap();
//! assert_eq!(first.low, Rational::new(2, 3).unwrap());
//! assert_eq!(first.high, Rational::new(1, 1).unwrap());
//!
//! let child = interval_for(&[1, 2]).unwrap();
//! assert!(first.strictly_contains(&child));
//! ```

use std::cmp::Ordering;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelingError {
    #[error("Interval overflow computing label for tree path {tree_path:?}")]
    Overflow { tree_path: Vec<u32> },
    #[error("Sibling rank must be >= 1, got 0 at position {position} of {tree_path:?}")]
    InvalidRank { tree_path: Vec<u32>, position: usize },
}

/// Exact fraction with a positive denominator. Never reduced; equality and
/// ordering compare values, so `2/4 == 1/2`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rational {
    num: i64,
    den: i64,
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };
    pub const ONE: Rational = Rational { num: 1, den: 1 };

    /// `None` unless `den > 0`.
    #[must_use]
    pub fn new(num: i64, den: i64) -> Option<Self> {
        (den > 0).then_some(Self { num, den })
    }

    #[must_use]
    pub fn numerator(&self) -> i64 {
        self.num
    }

    #[must_use]
    pub fn denominator(&self) -> i64 {
        self.den
    }

    /// `self + k * other`, component-wise: the result of applying the mediant
    /// step `k` times with `other` as the fixed partner.
    fn add_scaled(self, other: Rational, k: i64) -> Option<Rational> {
        let num = other.num.checked_mul(k)?.checked_add(self.num)?;
        let den = other.den.checked_mul(k)?.checked_add(self.den)?;
        Some(Rational { num, den })
    }

    /// Ordered decimal projection, rounded to the 28 fractional digits of
    /// [`Decimal`]. Only used for range filtering.
    #[must_use]
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.num) / Decimal::from(self.den)
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        // Both denominators are positive, so cross-multiplying keeps the order.
        let lhs = i128::from(self.num) * i128::from(other.den);
        let rhs = i128::from(other.num) * i128::from(self.den);
        lhs.cmp(&rhs)
    }
}

impl PartialEq for Rational {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Rational {}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Bounds of an entity's label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub low: Rational,
    pub high: Rational,
}

impl Interval {
    /// Sentinel interval `[0, 1)` given to tenants.
    pub const ROOT: Interval = Interval {
        low: Rational::ZERO,
        high: Rational::ONE,
    };

    /// Nested-interval containment: `other.low > low && other.high <= high`.
    #[must_use]
    pub fn strictly_contains(&self, other: &Interval) -> bool {
        other.low > self.low && other.high <= self.high
    }

    /// Whether the two intervals share any interior point.
    #[must_use]
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.low < other.high && other.low < self.high
    }

    #[must_use]
    pub fn decimal_bounds(&self) -> (Decimal, Decimal) {
        (self.low.to_decimal(), self.high.to_decimal())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.low, self.high)
    }
}

/// Compute the interval for a tree path of 1-based sibling ranks.
///
/// Each rank `r` descends from `(low, high)` to
/// `(high + r·low, high + (r-1)·low)`. That is the same as applying
/// `high := mediant(high, low)` `r` times, so overflow is reported exactly
/// when the step-by-step descent would overflow.
pub fn interval_for(tree_path: &[u32]) -> Result<Interval, LabelingError> {
    let mut low = Rational { num: 1, den: 2 };
    let mut high = Rational::ONE;

    for (position, &rank) in tree_path.iter().enumerate() {
        if rank == 0 {
            return Err(LabelingError::InvalidRank {
                tree_path: tree_path.to_vec(),
                position,
            });
        }
        let overflow = || LabelingError::Overflow {
            tree_path: tree_path.to_vec(),
        };
        let r = i64::from(rank);

        let descended = high.add_scaled(low, r).ok_or_else(overflow)?;
        let last_high = high.add_scaled(low, r - 1).ok_or_else(overflow)?;

        low = descended;
        high = last_high;
    }

    Ok(Interval { low, high })
}
