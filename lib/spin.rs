//! Angular momentum quantum numbers and Wigner 3j symbols.
//!
//! All quantum numbers are stored as integer numbers of halves so that half-
//! integer spins are represented exactly.

use wigner_symbols::Wigner3jm;

/// A single total-spin quantum number, stored as a number of halves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpinTotal(u32);

impl SpinTotal {
    /// Create a new total spin from a number of halves.
    pub fn new(j: u32) -> Self { Self(j) }

    /// Create a new total-spin quantum number from a `f64` value, rounding to
    /// the nearest half-integer.
    ///
    /// Negative inputs are passed through [`f64::abs`] before rounding.
    pub fn from_f64(f: f64) -> Self { Self((2.0 * f.abs()).round() as u32) }

    /// Return `self` as a bare number of halves.
    pub fn halves(self) -> u32 { self.0 }

    /// Return the "true" numerical value of `self`.
    pub fn f(self) -> f64 { f64::from(self.0) / 2.0 }

    /// Return the number of projection states, `2j + 1`.
    pub fn multiplicity(self) -> usize { self.0 as usize + 1 }

    /// Return an iterator over the available [`Spin`] pairs by ascending
    /// projection number.
    pub fn projections(self) -> SpinProjections {
        SpinProjections { total: self, next: Some(-(self.0 as i32)) }
    }
}

/// A `(total, projection)` spin quantum number pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Spin {
    total: SpinTotal,
    proj: i32,
}

impl Spin {
    /// Create a new spin from numbers of halves if the projection is valid for
    /// the total.
    pub fn new(j: u32, m: i32) -> Option<Self> {
        let j_i64 = i64::from(j);
        let m_i64 = i64::from(m);
        (
            (-j_i64..=j_i64).contains(&m_i64)
            && (j_i64 - m_i64) % 2 == 0
        )
        .then_some(Self { total: SpinTotal(j), proj: m })
    }

    /// Return the total-spin quantum number.
    pub fn total(self) -> SpinTotal { self.total }

    /// Return the projection quantum number as a number of halves.
    pub fn proj_halves(self) -> i32 { self.proj }

    /// Return the "true" numerical value of the projection quantum number.
    pub fn m(self) -> f64 { f64::from(self.proj) / 2.0 }

    /// Return the index of `self` among all projections of the same total when
    /// sorted in ascending order.
    pub fn index(self) -> usize {
        ((self.proj + self.total.0 as i32) / 2) as usize
    }
}

/// Iterator over spin projection states for a fixed total spin magnitude.
///
/// Projection states are visited in ascending order.
#[derive(Copy, Clone, Debug)]
pub struct SpinProjections {
    total: SpinTotal,
    next: Option<i32>,
}

impl Iterator for SpinProjections {
    type Item = Spin;

    fn next(&mut self) -> Option<Self::Item> {
        let m = self.next?;
        self.next = (m + 2 <= self.total.0 as i32).then_some(m + 2);
        Some(Spin { total: self.total, proj: m })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n
            = self.next
            .map(|m| ((self.total.0 as i32 - m) / 2 + 1) as usize)
            .unwrap_or(0);
        (n, Some(n))
    }
}

impl ExactSizeIterator for SpinProjections { }

/// Calculate the Wigner 3j symbol for columns (left to right) `s1..s3`.
pub fn w3j(s1: Spin, s2: Spin, s3: Spin) -> f64 {
    Wigner3jm {
        tj1: s1.total.0 as i32,
        tm1: s1.proj,
        tj2: s2.total.0 as i32,
        tm2: s2.proj,
        tj3: s3.total.0 as i32,
        tm3: s3.proj,
    }
    .value()
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projections_ascend() {
        let m: Vec<f64> = SpinTotal::new(3).projections().map(Spin::m).collect();
        assert_eq!(m, vec![-1.5, -0.5, 0.5, 1.5]);
        assert_eq!(SpinTotal::new(4).projections().len(), 5);
        assert_eq!(SpinTotal::new(0).projections().count(), 1);
        let idx: Vec<usize>
            = SpinTotal::new(2).projections().map(Spin::index).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn invalid_spins() {
        assert!(Spin::new(2, 4).is_none());
        assert!(Spin::new(2, 1).is_none());
        assert!(Spin::new(3, -1).is_some());
    }

    #[test]
    fn three_j_normalization() {
        // sum over m1, m2 of |( j1 j2 j3; m1 m2 m3 )|^2 = 1 / (2 j3 + 1)
        let j1 = SpinTotal::new(2);
        let j2 = SpinTotal::new(2);
        let j3 = SpinTotal::new(4);
        for s3 in j3.projections() {
            let total: f64
                = j1.projections()
                .flat_map(|s1| j2.projections().map(move |s2| (s1, s2)))
                .filter(|(s1, s2)| {
                    s1.proj_halves() + s2.proj_halves() + s3.proj_halves() == 0
                })
                .map(|(s1, s2)| w3j(s1, s2, s3).powi(2))
                .sum();
            assert!((total - 0.2).abs() < 1e-12);
        }
    }
}
