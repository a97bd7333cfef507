//! Priority tiers and per-tier vectors.
//!
//! Tiers are numbered `0..NUM_PRIORITIES`, lower is more important.
//! `FREE_BUCKET` sits one past the last paid tier and means "no quota,
//! run for free if nothing else wants the worker".

use std::ops::{Add, AddAssign, Index, IndexMut, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Number of paid priority tiers.
pub const NUM_PRIORITIES: usize = 3;

/// Sentinel tier for tasks that run without quota.
pub const FREE_BUCKET: Priority = NUM_PRIORITIES;

/// A priority tier. Values `0..NUM_PRIORITIES` are paid tiers,
/// `FREE_BUCKET` is the free tier.
pub type Priority = usize;

/// A fixed-length vector with one component per paid tier.
///
/// Used for account balances, recharge rates, caps, and accrued task cost.
/// The length is fixed by the type; building from a slice zero-pads a
/// short input and truncates a long one. Ordering is lexicographic from
/// tier 0 upward, which is what the derived `PartialOrd` on the inner
/// array gives.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "Vec<f64>", into = "Vec<f64>")]
pub struct PriorityVector([f64; NUM_PRIORITIES]);

impl PriorityVector {
    /// Build a vector from up to `NUM_PRIORITIES` values.
    pub fn new(values: &[f64]) -> Self {
        let mut out = [0.0; NUM_PRIORITIES];
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = *value;
        }
        Self(out)
    }

    /// The all-zero vector.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Component at `tier`.
    ///
    /// Panics if `tier` is not a paid tier.
    pub fn at(&self, tier: Priority) -> f64 {
        self.0[tier]
    }

    /// Strict lexicographic comparison.
    pub fn less(&self, other: &Self) -> bool {
        self < other
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.0.iter()
    }
}

impl From<[f64; NUM_PRIORITIES]> for PriorityVector {
    fn from(values: [f64; NUM_PRIORITIES]) -> Self {
        Self(values)
    }
}

impl From<Vec<f64>> for PriorityVector {
    fn from(values: Vec<f64>) -> Self {
        Self::new(&values)
    }
}

impl From<PriorityVector> for Vec<f64> {
    fn from(vector: PriorityVector) -> Self {
        vector.0.to_vec()
    }
}

impl Index<Priority> for PriorityVector {
    type Output = f64;

    fn index(&self, tier: Priority) -> &f64 {
        &self.0[tier]
    }
}

impl IndexMut<Priority> for PriorityVector {
    fn index_mut(&mut self, tier: Priority) -> &mut f64 {
        &mut self.0[tier]
    }
}

impl Add for PriorityVector {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Sub for PriorityVector {
    type Output = Self;

    fn sub(mut self, rhs: Self) -> Self {
        self -= rhs;
        self
    }
}

impl AddAssign for PriorityVector {
    fn add_assign(&mut self, rhs: Self) {
        for (lhs, rhs) in self.0.iter_mut().zip(rhs.0) {
            *lhs += rhs;
        }
    }
}

impl SubAssign for PriorityVector {
    fn sub_assign(&mut self, rhs: Self) {
        for (lhs, rhs) in self.0.iter_mut().zip(rhs.0) {
            *lhs -= rhs;
        }
    }
}
