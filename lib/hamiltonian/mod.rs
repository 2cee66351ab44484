//! Block-structured internal Hamiltonians.
//!
//! Internal states are grouped into ordered *manifolds*. Each manifold carries
//! a field-independent energy block and/or a magnetic-moment block (spherical
//! components `q = -1, 0, +1`), and pairs of manifolds may be coupled by an
//! electric-dipole block. The full Hamiltonian is
//! ```text
//! H = H0 - Σ_q μ_q conj(B_q) - ½ Σ_transitions Σ_q [ conj(E_q) d_q + E_q d_q† ]
//! ```
//! where `d_q` is the dipole operator of a transition, placed at the block
//! position `(from, to)` with the lower-ordinal manifold on the `from` side.

use std::{ fmt, sync::OnceLock };
use indexmap::IndexMap;
use ndarray::{ self as nd, s };
use ndarray_linalg::{ EigVals, EighInto, UPLO };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use rustc_hash::FxHashMap;
use crate::{
    error::{ HamiltonianError as HError, HResult },
    spherical::spherical2cart_op,
};

pub mod block;
pub use block::{ Block, BlockParams, Cell, ScalarBlock, VectorBlock };
use block::conj_transpose_components;

/// Absolute tolerance on per-state decay rates within a manifold.
pub const DECAY_ATOL: f64 = 1e-7;
/// Relative tolerance on per-state decay rates within a manifold.
pub const DECAY_RTOL: f64 = 1e-5;

/// A labeled, ordered group of basis states.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifold {
    label: String,
    dim: usize,
    ordinal: usize,
    offset: usize,
}

impl Manifold {
    pub fn label(&self) -> &str { &self.label }

    /// Number of states in the manifold.
    pub fn dim(&self) -> usize { self.dim }

    /// Position of the manifold in the block layout.
    pub fn ordinal(&self) -> usize { self.ordinal }

    /// Global index of the first state in the manifold.
    pub fn offset(&self) -> usize { self.offset }

    /// Global indices of all states in the manifold.
    pub fn states(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.dim
    }
}

/// Full-size matrices assembled from the blocks of a [`BlockHamiltonian`].
///
/// Vector-valued quantities carry their component along the leading axis.
#[derive(Clone, Debug)]
pub struct FullMatrices {
    /// Field-independent energies.
    pub H0: nd::Array2<C64>,
    /// Magnetic moment, spherical components, including each block's `μ_B`.
    pub mu_q: nd::Array3<C64>,
    /// Magnetic moment, Cartesian components.
    pub mu: nd::Array3<C64>,
    /// Dipole operator placed at `(from, to)`, per transition.
    pub d_q_bare: IndexMap<String, nd::Array3<C64>>,
    /// Conjugate transpose of `d_q_bare`, placed at `(to, from)`.
    pub d_q_star: IndexMap<String, nd::Array3<C64>>,
    /// Sum of `d_q_bare + d_q_star` over all transitions.
    pub d_q: nd::Array3<C64>,
    /// Cartesian components of `d_q`.
    pub d: nd::Array3<C64>,
}

/// Electric field input to [`BlockHamiltonian::evaluate`], in spherical
/// components.
///
/// Each vector holds the field's own components `E_q`, indexed `q = -1, 0, +1`
/// at positions 0, 1, 2, as returned by
/// [`LaserField::total_field`][crate::fields::LaserField::total_field].
/// Component `q` drives `d_q` through `conj(E_q)`; callers must not supply
/// the `(-1)^q E_{-q}` contravariant components.
#[derive(Clone, Debug, Default)]
pub enum FieldInput {
    /// No electric field.
    #[default]
    None,
    /// A single field vector, applied to the only registered transition.
    Single([C64; 3]),
    /// Field vectors keyed by transition.
    Keyed(FxHashMap<String, [C64; 3]>),
}

impl From<[C64; 3]> for FieldInput {
    fn from(E: [C64; 3]) -> Self { Self::Single(E) }
}

impl From<FxHashMap<String, [C64; 3]>> for FieldInput {
    fn from(E: FxHashMap<String, [C64; 3]>) -> Self { Self::Keyed(E) }
}

/// Hamiltonian of a set of manifolds coupled by electric dipole transitions.
///
/// Blocks are registered incrementally; full-size matrices are assembled on
/// demand and cached until the next change in structure.
#[derive(Clone, Debug)]
pub struct BlockHamiltonian {
    manifolds: Vec<Manifold>,
    ordinals: IndexMap<String, usize>,
    cells: nd::Array2<Cell>,
    laser_keys: IndexMap<String, (usize, usize)>,
    mass: f64,
    full: OnceLock<FullMatrices>,
}

impl Default for BlockHamiltonian {
    fn default() -> Self { Self::new() }
}

impl BlockHamiltonian {
    /// Create a new, empty `BlockHamiltonian` with unit mass.
    pub fn new() -> Self {
        Self {
            manifolds: Vec::new(),
            ordinals: IndexMap::new(),
            cells: nd::Array2::from_elem((0, 0), Cell::Empty),
            laser_keys: IndexMap::new(),
            mass: 1.0,
            full: OnceLock::new(),
        }
    }

    /// Create a new `BlockHamiltonian` for the common case of a ground
    /// manifold `g` coupled to an excited manifold `e`.
    pub fn from_two_manifolds(
        H0_g: nd::Array2<C64>,
        H0_e: nd::Array2<C64>,
        mu_q_g: nd::Array3<C64>,
        mu_q_e: nd::Array3<C64>,
        d_q: nd::Array3<C64>,
        params: BlockParams,
    ) -> HResult<Self>
    {
        let mut H = Self::new();
        H.add_energy_block("g", H0_g)?;
        H.add_magnetic_block("g", mu_q_g, params.mu_b)?;
        H.add_energy_block("e", H0_e)?;
        H.add_magnetic_block("e", mu_q_e, params.mu_b)?;
        H.add_dipole_block("g", "e", d_q, params.k, params.gamma)?;
        Ok(H)
    }

    /// Set the particle mass, used to convert forces to accelerations.
    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    pub fn mass(&self) -> f64 { self.mass }

    /// Total number of internal states.
    pub fn num_states(&self) -> usize {
        self.manifolds.iter().map(|m| m.dim).sum()
    }

    pub fn manifolds(&self) -> &[Manifold] { &self.manifolds }

    /// Look up a manifold by label.
    pub fn manifold(&self, label: &str) -> HResult<&Manifold> {
        self.ordinals.get(label)
            .map(|&o| &self.manifolds[o])
            .ok_or_else(|| HError::UnknownLabel(label.to_string()))
    }

    /// Return the map from transition keys (`from->to`) to the block positions
    /// they address.
    pub fn laser_keys(&self) -> &IndexMap<String, (usize, usize)> {
        &self.laser_keys
    }

    /// Return the `(from, to)` manifolds of a transition.
    pub fn transition(&self, key: &str) -> HResult<(&Manifold, &Manifold)> {
        self.laser_keys.get(key)
            .map(|&(a, b)| (&self.manifolds[a], &self.manifolds[b]))
            .ok_or_else(|| HError::UnknownTransition(key.to_string()))
    }

    /// Return the parameters of a transition's dipole block.
    pub fn transition_params(&self, key: &str) -> HResult<BlockParams> {
        let (a, b)
            = *self.laser_keys.get(key)
            .ok_or_else(|| HError::UnknownTransition(key.to_string()))?;
        self.cells[[a, b]].dipole()
            .map(|d| d.params())
            .ok_or_else(|| HError::UnknownTransition(key.to_string()))
    }

    /// Return the cell at block position `(i, j)`.
    pub fn cell(&self, i: usize, j: usize) -> Option<&Cell> {
        self.cells.get((i, j))
    }

    fn register(&mut self, label: &str, dim: usize) -> usize {
        let ordinal = self.manifolds.len();
        let offset = self.num_states();
        self.manifolds.push(
            Manifold { label: label.to_string(), dim, ordinal, offset });
        self.ordinals.insert(label.to_string(), ordinal);
        let mut cells
            = nd::Array2::from_elem((ordinal + 1, ordinal + 1), Cell::Empty);
        cells.slice_mut(s![..ordinal, ..ordinal]).assign(&self.cells);
        self.cells = cells;
        ordinal
    }

    fn changed(&mut self) { self.full = OnceLock::new(); }

    /// Register the field-independent energy block of a manifold, creating the
    /// manifold if it does not already exist.
    pub fn add_energy_block(&mut self, label: &str, H: nd::Array2<C64>)
        -> HResult<()>
    {
        let (n, m) = H.dim();
        if n != m {
            return Err(HError::NotSquare {
                label: label.to_string(),
                shape: vec![n, m],
            });
        }
        if n == 0 { return Err(HError::EmptyBlock(label.to_string())); }
        let block = ScalarBlock::new(format!("<{label}|H_0|{label}>"), H);
        if let Some(&o) = self.ordinals.get(label) {
            let cell = std::mem::take(&mut self.cells[[o, o]]);
            let (cell, res)
                = match cell {
                    Cell::MagneticOnly(mag) if mag.shape().0 == n => {
                        (Cell::EnergyAndMagnetic(block, mag), Ok(()))
                    },
                    Cell::MagneticOnly(mag) => {
                        let err = HError::ShapeMismatch {
                            label: block.label().to_string(),
                            expected: vec![mag.shape().0, mag.shape().1],
                            got: vec![n, m],
                        };
                        (Cell::MagneticOnly(mag), Err(err))
                    },
                    other => {
                        (other, Err(HError::DuplicateBlock(label.to_string(), "energy")))
                    },
                };
            self.cells[[o, o]] = cell;
            res?;
        } else {
            let o = self.register(label, n);
            self.cells[[o, o]] = Cell::EnergyOnly(block);
        }
        self.changed();
        Ok(())
    }

    /// Register the magnetic-moment block of a manifold, creating the manifold
    /// if it does not already exist.
    ///
    /// `mu_q` must have shape `(3, n, n)`; it is scaled by `mu_b` on assembly.
    pub fn add_magnetic_block(
        &mut self,
        label: &str,
        mu_q: nd::Array3<C64>,
        mu_b: f64,
    ) -> HResult<()>
    {
        let (q, n, m) = mu_q.dim();
        if q != 3 || n != m {
            return Err(HError::BadMagneticShape {
                label: label.to_string(),
                shape: vec![q, n, m],
            });
        }
        if n == 0 { return Err(HError::EmptyBlock(label.to_string())); }
        let params = BlockParams { mu_b, ..BlockParams::default() };
        let block
            = VectorBlock::new(format!("<{label}|mu_q|{label}>"), mu_q, params);
        if let Some(&o) = self.ordinals.get(label) {
            let cell = std::mem::take(&mut self.cells[[o, o]]);
            let (cell, res)
                = match cell {
                    Cell::EnergyOnly(en) if en.shape().0 == n => {
                        (Cell::EnergyAndMagnetic(en, block), Ok(()))
                    },
                    Cell::EnergyOnly(en) => {
                        let err = HError::ShapeMismatch {
                            label: block.label().to_string(),
                            expected: vec![3, en.shape().0, en.shape().1],
                            got: vec![q, n, m],
                        };
                        (Cell::EnergyOnly(en), Err(err))
                    },
                    other => {
                        (other, Err(HError::DuplicateBlock(label.to_string(), "magnetic")))
                    },
                };
            self.cells[[o, o]] = cell;
            res?;
        } else {
            let o = self.register(label, n);
            self.cells[[o, o]] = Cell::MagneticOnly(block);
        }
        self.changed();
        Ok(())
    }

    /// Register the electric dipole coupling between two existing manifolds.
    ///
    /// `d_q` must have shape `(3, dim(label1), dim(label2))`. If `label1` comes
    /// after `label2` in the block layout, the coupling is conjugate-transposed
    /// so that the lower manifold is always on the `from` side. The
    /// transition is recorded under the key `from->to`.
    pub fn add_dipole_block(
        &mut self,
        label1: &str,
        label2: &str,
        d_q: nd::Array3<C64>,
        k: f64,
        gamma: f64,
    ) -> HResult<()>
    {
        let o1 = self.manifold(label1)?.ordinal;
        let o2 = self.manifold(label2)?.ordinal;
        if o1 == o2 { return Err(HError::SelfCoupling(label1.to_string())); }
        let expected
            = vec![3, self.manifolds[o1].dim, self.manifolds[o2].dim];
        if d_q.shape() != expected.as_slice() {
            return Err(HError::ShapeMismatch {
                label: format!("<{label1}|d_q|{label2}>"),
                expected,
                got: d_q.shape().to_vec(),
            });
        }
        let (lo, hi, d_q)
            = if o1 < o2 {
                (o1, o2, d_q)
            } else {
                (o2, o1, conj_transpose_components(&d_q))
            };
        let l_lo = self.manifolds[lo].label.clone();
        let l_hi = self.manifolds[hi].label.clone();
        let key = format!("{l_lo}->{l_hi}");
        if self.cells[[lo, hi]] != Cell::Empty {
            return Err(HError::DuplicateTransition(key));
        }
        let params = BlockParams { k, gamma, ..BlockParams::default() };
        let block
            = VectorBlock::new(format!("<{l_lo}|d_q|{l_hi}>"), d_q, params);
        self.cells[[hi, lo]]
            = Cell::Dipole(block.conj_transposed(format!("<{l_hi}|d_q|{l_lo}>")));
        self.cells[[lo, hi]] = Cell::Dipole(block);
        self.laser_keys.insert(key, (lo, hi));
        self.changed();
        Ok(())
    }

    /// Assemble (or return the cached) full-size matrices.
    pub fn assemble(&self) -> &FullMatrices {
        self.full.get_or_init(|| self.build_full())
    }

    fn build_full(&self) -> FullMatrices {
        let n = self.num_states();
        let mut H0: nd::Array2<C64> = nd::Array2::zeros((n, n));
        let mut mu_q: nd::Array3<C64> = nd::Array3::zeros((3, n, n));
        for man in self.manifolds.iter() {
            let cell = &self.cells[[man.ordinal, man.ordinal]];
            if let Some(en) = cell.energy() {
                en.place_into(&mut H0, man.offset, man.offset);
            }
            if let Some(mag) = cell.magnetic() {
                mag.place_into(&mut mu_q, man.offset, man.offset);
                let mu_b = mag.params().mu_b;
                mu_q.slice_mut(s![.., man.states(), man.states()])
                    .mapv_inplace(|x| x * mu_b);
            }
        }

        let mut d_q_bare: IndexMap<String, nd::Array3<C64>> = IndexMap::new();
        let mut d_q_star: IndexMap<String, nd::Array3<C64>> = IndexMap::new();
        let mut d_q: nd::Array3<C64> = nd::Array3::zeros((3, n, n));
        for (key, &(a, b)) in self.laser_keys.iter() {
            let from = &self.manifolds[a];
            let to = &self.manifolds[b];
            let mut bare: nd::Array3<C64> = nd::Array3::zeros((3, n, n));
            let mut star: nd::Array3<C64> = nd::Array3::zeros((3, n, n));
            if let Some(d) = self.cells[[a, b]].dipole() {
                d.place_into(&mut bare, from.offset, to.offset);
            }
            if let Some(d) = self.cells[[b, a]].dipole() {
                d.place_into(&mut star, to.offset, from.offset);
            }
            d_q += &bare;
            d_q += &star;
            d_q_bare.insert(key.clone(), bare);
            d_q_star.insert(key.clone(), star);
        }

        let mu = spherical2cart_op(&mu_q);
        let d = spherical2cart_op(&d_q);
        FullMatrices { H0, mu_q, mu, d_q_bare, d_q_star, d_q, d }
    }

    /// Compute the instantaneous Hamiltonian for spherical magnetic field
    /// components `Bq` and electric field(s) `E`.
    pub fn evaluate<F>(&self, Bq: [C64; 3], E: F) -> HResult<nd::Array2<C64>>
    where F: Into<FieldInput>
    {
        let full = self.assemble();
        let mut H = full.H0.clone();
        for (q, b) in Bq.iter().enumerate() {
            if !b.is_zero() {
                H.scaled_add(-b.conj(), &full.mu_q.index_axis(nd::Axis(0), q));
            }
        }
        let mut couple = |key: &str, Eq: &[C64; 3]| -> HResult<()> {
            let bare
                = full.d_q_bare.get(key)
                .ok_or_else(|| HError::UnknownTransition(key.to_string()))?;
            let star = &full.d_q_star[key];
            for (q, e) in Eq.iter().enumerate() {
                H.scaled_add(-0.5 * e.conj(), &bare.index_axis(nd::Axis(0), q));
                H.scaled_add(-0.5 * e, &star.index_axis(nd::Axis(0), q));
            }
            Ok(())
        };
        match E.into() {
            FieldInput::None => { },
            FieldInput::Single(Eq) => {
                if self.laser_keys.len() != 1 {
                    return Err(HError::AmbiguousField(self.laser_keys.len()));
                }
                let key = self.laser_keys.keys().next().cloned().unwrap_or_default();
                couple(&key, &Eq)?;
            },
            FieldInput::Keyed(map) => {
                for (key, Eq) in map.iter() {
                    couple(key, Eq)?;
                }
            },
        }
        Ok(H)
    }

    /// Compute the total spontaneous decay rate of each manifold, checking that
    /// all states within a manifold decay at the same rate.
    ///
    /// A state's rate is the sum over all dipole components and all lower-lying
    /// states of the squared dipole matrix elements. The lowest manifold is
    /// assigned zero.
    pub fn decay_rates(&self) -> HResult<Vec<f64>> {
        let full = self.assemble();
        let mut rates: Vec<f64> = vec![0.0; self.manifolds.len()];
        for (rate, man) in rates.iter_mut().zip(&self.manifolds).skip(1) {
            let state_rates: Vec<f64>
                = man.states()
                .map(|i| {
                    full.d_q.slice(s![.., ..i, i])
                        .iter()
                        .map(|d| d.norm_sqr())
                        .sum()
                })
                .collect();
            let Some(&r0) = state_rates.first() else { continue; };
            let uniform
                = state_rates.iter()
                .all(|r| (r - r0).abs() <= DECAY_ATOL + DECAY_RTOL * r0.abs());
            if !uniform {
                return Err(HError::DecayRateMismatch {
                    manifold: man.label.clone(),
                    rates: state_rates,
                });
            }
            *rate = r0;
        }
        Ok(rates)
    }

    /// Diagonalize each manifold at a magnetic field of magnitude `B` along the
    /// quantization axis, returning a new Hamiltonian in the rotated basis.
    ///
    /// Manifolds whose blocks are already diagonal (and `B >= 0`) are shifted
    /// directly; all others have `energy - B μ_B μ_0` diagonalized with
    /// eigenvalues in ascending order. Magnetic and dipole blocks are rotated
    /// into the new basis.
    pub fn diagonalize_at_field(&self, B: f64) -> HResult<Self> {
        let mut new = self.clone();
        new.changed();
        let mut rotations: Vec<Option<nd::Array2<C64>>>
            = vec![None; self.manifolds.len()];

        for man in self.manifolds.iter() {
            let o = man.ordinal;
            let cell = &self.cells[[o, o]];
            let mut H: nd::Array2<C64>
                = cell.energy()
                .map(|en| en.matrix().clone())
                .unwrap_or_else(|| nd::Array2::zeros((man.dim, man.dim)));
            if let Some(mag) = cell.magnetic() {
                let mu_z = mag.matrix().index_axis(nd::Axis(0), 1);
                H.scaled_add(C64::from(-B * mag.params().mu_b), &mu_z);
            }

            if !cell.is_diagonal() || B < 0.0 {
                let scale
                    = H.iter().map(|h| h.norm()).fold(1.0, f64::max);
                let complex
                    = H.eigvals()?
                    .iter()
                    .any(|e| e.im.abs() > 1e-8 * scale);
                if complex {
                    return Err(HError::ComplexEigenvalue(man.label.clone()));
                }
                let (E, U) = H.eigh_into(UPLO::Lower)?;
                H = nd::Array2::from_diag(&E.mapv(C64::from));
                rotations[o] = Some(U);
            }

            let energy = ScalarBlock::new(format!("<{0}|H_0|{0}>", man.label), H);
            new.cells[[o, o]]
                = match cell.magnetic() {
                    Some(mag) => {
                        let rotated
                            = match &rotations[o] {
                                Some(U) => rotate_components(mag.matrix(), U, U),
                                None => mag.matrix().clone(),
                            };
                        Cell::EnergyAndMagnetic(
                            energy,
                            VectorBlock::new(
                                mag.label().to_string(), rotated, mag.params()),
                        )
                    },
                    None => Cell::EnergyOnly(energy),
                };
        }

        for &(a, b) in self.laser_keys.values() {
            if rotations[a].is_none() && rotations[b].is_none() { continue; }
            let Some(d) = self.cells[[a, b]].dipole() else { continue; };
            let eye_a: nd::Array2<C64> = nd::Array2::eye(self.manifolds[a].dim);
            let eye_b: nd::Array2<C64> = nd::Array2::eye(self.manifolds[b].dim);
            let Ua = rotations[a].as_ref().unwrap_or(&eye_a);
            let Ub = rotations[b].as_ref().unwrap_or(&eye_b);
            let rotated = VectorBlock::new(
                d.label().to_string(),
                rotate_components(d.matrix(), Ua, Ub),
                d.params(),
            );
            let reverse_label
                = self.cells[[b, a]].dipole()
                .map(|r| r.label().to_string())
                .unwrap_or_default();
            new.cells[[b, a]] = Cell::Dipole(rotated.conj_transposed(reverse_label));
            new.cells[[a, b]] = Cell::Dipole(rotated);
        }
        Ok(new)
    }
}

/// Compute `Ua† A_q Ub` for every component `q` of `A`.
fn rotate_components(
    A: &nd::Array3<C64>,
    Ua: &nd::Array2<C64>,
    Ub: &nd::Array2<C64>,
) -> nd::Array3<C64>
{
    let Ua_dag = Ua.t().mapv(|u| u.conj());
    let (q, _, _) = A.dim();
    let mut out: nd::Array3<C64> = nd::Array3::zeros((q, Ua.ncols(), Ub.ncols()));
    out.outer_iter_mut()
        .zip(A.outer_iter())
        .for_each(|(mut o, a)| { o.assign(&Ua_dag.dot(&a).dot(Ub)); });
    out
}

impl fmt::Display for BlockHamiltonian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String>
            = self.cells.iter().map(|c| c.to_string()).collect();
        let width = labels.iter().map(|l| l.len()).max().unwrap_or(0);
        let n = self.manifolds.len();
        for (i, row) in labels.chunks(n.max(1)).enumerate() {
            write!(f, "[")?;
            for (j, label) in row.iter().enumerate() {
                if j > 0 { write!(f, " ")?; }
                write!(f, "({label:^width$})")?;
            }
            write!(f, "]")?;
            if i + 1 < n { writeln!(f)?; }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::states::{ dqij_two_bare_hyperfine, single_f };

    fn c(x: f64) -> C64 { C64::from(x) }

    fn two_level() -> BlockHamiltonian {
        let mut d_q: nd::Array3<C64> = nd::Array3::zeros((3, 1, 1));
        d_q[[1, 0, 0]] = c(1.0);
        BlockHamiltonian::from_two_manifolds(
            nd::array![[c(0.0)]],
            nd::array![[c(-0.5)]],
            nd::Array3::zeros((3, 1, 1)),
            nd::Array3::zeros((3, 1, 1)),
            d_q,
            BlockParams::default(),
        )
        .unwrap()
    }

    fn f1_to_f2(g_e: f64) -> BlockHamiltonian {
        let (H_g, mu_g) = single_f(1.0, 0.5);
        let (H_e, mu_e) = single_f(2.0, g_e);
        let d_q = dqij_two_bare_hyperfine(1.0, 2.0, true);
        BlockHamiltonian::from_two_manifolds(
            H_g, H_e, mu_g, mu_e, d_q, BlockParams::default())
            .unwrap()
    }

    #[test]
    fn registration_errors() {
        let mut H = BlockHamiltonian::new();
        assert!(matches!(
            H.add_energy_block("g", nd::Array2::zeros((2, 3))),
            Err(HError::NotSquare { .. }),
        ));
        H.add_energy_block("g", nd::Array2::zeros((2, 2))).unwrap();
        assert!(matches!(
            H.add_energy_block("g", nd::Array2::zeros((2, 2))),
            Err(HError::DuplicateBlock(..)),
        ));
        assert!(matches!(
            H.add_magnetic_block("g", nd::Array3::zeros((3, 3, 3)), 1.0),
            Err(HError::ShapeMismatch { .. }),
        ));
        assert!(matches!(
            H.add_magnetic_block("e", nd::Array3::zeros((2, 3, 3)), 1.0),
            Err(HError::BadMagneticShape { .. }),
        ));
        H.add_magnetic_block("e", nd::Array3::zeros((3, 3, 3)), 1.0).unwrap();
        assert!(matches!(
            H.add_energy_block("e", nd::Array2::zeros((2, 2))),
            Err(HError::ShapeMismatch { .. }),
        ));
        H.add_energy_block("e", nd::Array2::zeros((3, 3))).unwrap();
        assert!(matches!(
            H.add_dipole_block("g", "x", nd::Array3::zeros((3, 2, 3)), 1.0, 1.0),
            Err(HError::UnknownLabel(_)),
        ));
        assert!(matches!(
            H.add_dipole_block("g", "e", nd::Array3::zeros((3, 3, 2)), 1.0, 1.0),
            Err(HError::ShapeMismatch { .. }),
        ));
        H.add_dipole_block("g", "e", nd::Array3::zeros((3, 2, 3)), 1.0, 1.0)
            .unwrap();
        assert!(matches!(
            H.add_dipole_block("e", "g", nd::Array3::zeros((3, 3, 2)), 1.0, 1.0),
            Err(HError::DuplicateTransition(_)),
        ));
        assert_eq!(H.num_states(), 5);
        assert_eq!(H.manifold("e").unwrap().offset(), 2);
        assert_eq!(H.laser_keys().get("g->e"), Some(&(0, 1)));
    }

    #[test]
    fn reversed_dipole_is_canonicalized() {
        let mut H = BlockHamiltonian::new();
        H.add_energy_block("g", nd::Array2::zeros((1, 1))).unwrap();
        H.add_energy_block("e", nd::Array2::zeros((2, 2))).unwrap();
        let mut d: nd::Array3<C64> = nd::Array3::zeros((3, 2, 1));
        d[[0, 1, 0]] = C64::new(0.0, 1.0);
        H.add_dipole_block("e", "g", d, 1.0, 1.0).unwrap();
        assert!(H.laser_keys().contains_key("g->e"));
        let full = H.assemble();
        assert_eq!(full.d_q_bare["g->e"][[0, 0, 2]], C64::new(0.0, -1.0));
        assert_eq!(full.d_q_star["g->e"][[0, 2, 0]], C64::new(0.0, 1.0));
    }

    #[test]
    fn dipole_blocks_are_hermitian_partners() {
        let H = f1_to_f2(0.5);
        let (a, b) = H.laser_keys()["g->e"];
        let fwd = H.cell(a, b).and_then(Cell::dipole).unwrap().matrix();
        let rev = H.cell(b, a).and_then(Cell::dipole).unwrap().matrix();
        for q in 0..3 {
            let fwd_q = fwd.index_axis(nd::Axis(0), q);
            let rev_q = rev.index_axis(nd::Axis(0), q);
            assert_eq!(fwd_q.t().mapv(|x| x.conj()), rev_q);
        }
    }

    #[test]
    fn assembly_and_decay_rates() {
        let H = f1_to_f2(0.5);
        let full = H.assemble();
        assert_eq!(full.H0.dim(), (8, 8));
        assert_eq!(full.d_q.dim(), (3, 8, 8));
        let rates = H.decay_rates().unwrap();
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0], 0.0);
        assert_abs_diff_eq!(rates[1], 1.0, epsilon = 1e-12);
        // cartesian z component is the q = 0 component
        assert_eq!(full.mu.index_axis(nd::Axis(0), 2), full.mu_q.index_axis(nd::Axis(0), 1));
    }

    #[test]
    fn mismatched_decay_rates_are_rejected() {
        let mut H = BlockHamiltonian::new();
        H.add_energy_block("g", nd::Array2::zeros((1, 1))).unwrap();
        H.add_energy_block("e", nd::Array2::zeros((2, 2))).unwrap();
        let mut d: nd::Array3<C64> = nd::Array3::zeros((3, 1, 2));
        d[[1, 0, 0]] = c(1.0);
        d[[1, 0, 1]] = c(0.9);
        H.add_dipole_block("g", "e", d, 1.0, 1.0).unwrap();
        assert!(matches!(
            H.decay_rates(),
            Err(HError::DecayRateMismatch { .. }),
        ));
    }

    #[test]
    fn evaluate_couplings() {
        let H = two_level();
        let E = [c(0.0), C64::new(0.3, 0.4), c(0.0)];
        let Hfull = H.evaluate([C64::zero(); 3], E).unwrap();
        assert_eq!(Hfull[[0, 1]], -0.5 * E[1].conj());
        assert_eq!(Hfull[[1, 0]], -0.5 * E[1]);
        assert_eq!(Hfull[[1, 1]], c(-0.5));

        let mut keyed = FxHashMap::default();
        keyed.insert("g->e".to_string(), E);
        assert_eq!(H.evaluate([C64::zero(); 3], keyed).unwrap(), Hfull);

        let mut bad = FxHashMap::default();
        bad.insert("g->x".to_string(), E);
        assert!(matches!(
            H.evaluate([C64::zero(); 3], bad),
            Err(HError::UnknownTransition(_)),
        ));
    }

    #[test]
    fn evaluate_is_hermitian_with_fields() {
        let H = f1_to_f2(0.5);
        let Bq = crate::spherical::cart2spherical([0.2, -0.4, 0.7]);
        let E = [C64::new(0.1, 0.2), C64::new(-0.3, 0.05), C64::new(0.0, 0.4)];
        let Hfull = H.evaluate(Bq, E).unwrap();
        let Hdag = Hfull.t().mapv(|x| x.conj());
        for (a, b) in Hfull.iter().zip(Hdag.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-14);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-14);
        }
    }

    #[test]
    fn diagonalize_diagonal_blocks_directly() {
        let H = f1_to_f2(1.0);
        let Hd = H.diagonalize_at_field(2.0).unwrap();
        let full = Hd.assemble();
        // E_m = g_F μ_B B m
        let expected_g = [-1.0, 0.0, 1.0];
        for (i, e) in expected_g.iter().enumerate() {
            assert_abs_diff_eq!(full.H0[[i, i]].re, *e, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(full.H0[[3, 3]].re, -4.0, epsilon = 1e-12);
        assert_eq!(full.d_q_bare["g->e"], H.assemble().d_q_bare["g->e"]);
        assert_eq!(Hd.decay_rates().unwrap(), H.decay_rates().unwrap());
    }

    #[test]
    fn diagonalize_rotates_nondiagonal_blocks() {
        let mut H = BlockHamiltonian::new();
        H.add_energy_block("g", nd::Array2::zeros((1, 1))).unwrap();
        H.add_energy_block("e", nd::array![[c(0.0), c(1.0)], [c(1.0), c(0.0)]])
            .unwrap();
        let mut d: nd::Array3<C64> = nd::Array3::zeros((3, 1, 2));
        d[[1, 0, 0]] = c(1.0);
        H.add_dipole_block("g", "e", d, 1.0, 1.0).unwrap();
        let Hd = H.diagonalize_at_field(0.0).unwrap();
        let full = Hd.assemble();
        assert_abs_diff_eq!(full.H0[[1, 1]].re, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(full.H0[[2, 2]].re, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(full.H0[[1, 2]].norm(), 0.0, epsilon = 1e-12);
        // the coupling spreads equally over both eigenstates
        let d_rot = &full.d_q_bare["g->e"];
        assert_abs_diff_eq!(d_rot[[1, 0, 1]].norm_sqr(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(d_rot[[1, 0, 2]].norm_sqr(), 0.5, epsilon = 1e-12);
        assert_eq!(Hd.laser_keys(), H.laser_keys());
    }

    #[test]
    fn empty_manifolds_are_rejected() {
        let mut H = BlockHamiltonian::new();
        H.add_energy_block("g", nd::Array2::zeros((1, 1))).unwrap();
        assert!(matches!(
            H.add_energy_block("e", nd::Array2::zeros((0, 0))),
            Err(HError::EmptyBlock(_)),
        ));
        assert!(matches!(
            H.add_magnetic_block("e", nd::Array3::zeros((3, 0, 0)), 1.0),
            Err(HError::EmptyBlock(_)),
        ));
        assert_eq!(H.manifolds().len(), 1);
        assert_eq!(H.decay_rates().unwrap(), vec![0.0]);
    }

    #[test]
    fn negative_field_forces_sorted_diagonalization() {
        let H = f1_to_f2(1.0);
        let Hd = H.diagonalize_at_field(-2.0).unwrap();
        let full = Hd.assemble();
        // E_m = g_F μ_B B m, reordered ascending
        let expected = [-1.0, 0.0, 1.0, -4.0, -2.0, 0.0, 2.0, 4.0];
        for (i, e) in expected.iter().enumerate() {
            assert_abs_diff_eq!(full.H0[[i, i]].re, *e, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(
            full.H0.iter().map(|h| h.norm()).sum::<f64>(),
            expected.iter().map(|e| e.abs()).sum::<f64>(),
            epsilon = 1e-12,
        );
        // ascending order reverses the m ordering within each manifold
        let d = &H.assemble().d_q_bare["g->e"];
        let d_rot = &full.d_q_bare["g->e"];
        for q in 0..3 {
            for i in 0..3 {
                for j in 3..8 {
                    assert_abs_diff_eq!(
                        d_rot[[q, i, j]].norm(), d[[q, 2 - i, 10 - j]].norm(),
                        epsilon = 1e-12,
                    );
                }
            }
        }
        let rates = Hd.decay_rates().unwrap();
        assert_abs_diff_eq!(rates[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn complex_eigenvalues_are_rejected() {
        let mut H = BlockHamiltonian::new();
        H.add_energy_block("g", nd::array![[c(0.0), c(1.0)], [c(-1.0), c(0.0)]])
            .unwrap();
        assert!(matches!(
            H.diagonalize_at_field(0.0),
            Err(HError::ComplexEigenvalue(label)) if label == "g",
        ));
    }

    #[test]
    fn display_lists_blocks() {
        let s = two_level().to_string();
        assert!(s.contains("<g|H_0|g> + <g|mu_q|g>"));
        assert!(s.contains("<g|d_q|e>"));
        assert!(s.contains("<e|d_q|g>"));
        assert_eq!(s.lines().count(), 2);
    }
}
