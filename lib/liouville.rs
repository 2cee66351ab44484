//! Construction of constant Liouville-space operators from a
//! [`BlockHamiltonian`].
//!
//! All operators act on density matrices flattened according to
//! [`density_index`]. The coherent part of the evolution under a Hamiltonian
//! `H`, `dρ/dt = -i [H, ρ]`, is built by [`LiouvilleBuilder::coherent_submatrix`]
//! and spontaneous decay by [`LiouvilleBuilder::decay_submatrix`]; both are
//! collected, per field component, into an [`OperatorSet`].

use std::cell::OnceCell;
use indexmap::IndexMap;
use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    config::ObeConfig,
    density::{ DensityElem, density_index },
    error::{ LResult, LiouvilleError },
    hamiltonian::BlockHamiltonian,
    sparse::Operator,
};

const I: C64 = C64 { re: 0.0, im: 1.0 };

/// Tolerance on the imaginary residue of a real-basis transform, relative to
/// the largest element of the result.
pub const REAL_TOL: f64 = 1e-8;

/// Closed-form change of basis between flattened complex density matrices and
/// the real representation.
///
/// `U` maps real coordinates to flattened matrix elements, so a complex-basis
/// generator `M` becomes `Uinv M U`.
#[derive(Clone, Debug)]
pub struct RealBasis {
    n: usize,
    U: nd::Array2<C64>,
    Uinv: nd::Array2<C64>,
    // non-zero (index, weight) pairs of the rows of Uinv and columns of U
    uinv_rows: Vec<Vec<(usize, C64)>>,
    u_cols: Vec<Vec<(usize, C64)>>,
}

impl RealBasis {
    /// Create a new `RealBasis` for `n` states.
    pub fn new(n: usize) -> Self {
        let nn = n * n;
        let mut U: nd::Array2<C64> = nd::Array2::zeros((nn, nn));
        let mut Uinv: nd::Array2<C64> = nd::Array2::zeros((nn, nn));
        for i in 0..n {
            let ii = density_index(n, i, i);
            U[[ii, ii]] = C64::from(1.0);
            Uinv[[ii, ii]] = C64::from(1.0);
            for j in i + 1..n {
                let ij = density_index(n, i, j);
                let ji = density_index(n, j, i);
                U[[ij, ij]] = C64::from(1.0);
                U[[ij, ji]] = I;
                U[[ji, ij]] = C64::from(1.0);
                U[[ji, ji]] = -I;

                Uinv[[ij, ij]] = C64::from(0.5);
                Uinv[[ij, ji]] = C64::from(0.5);
                Uinv[[ji, ij]] = -0.5 * I;
                Uinv[[ji, ji]] = 0.5 * I;
            }
        }
        let uinv_rows
            = Uinv.outer_iter()
            .map(|row| {
                row.iter().enumerate()
                    .filter(|(_, w)| w.norm_sqr() > 0.0)
                    .map(|(k, w)| (k, *w))
                    .collect()
            })
            .collect();
        let u_cols
            = U.columns().into_iter()
            .map(|col| {
                col.iter().enumerate()
                    .filter(|(_, w)| w.norm_sqr() > 0.0)
                    .map(|(k, w)| (k, *w))
                    .collect()
            })
            .collect();
        Self { n, U, Uinv, uinv_rows, u_cols }
    }

    pub fn num_states(&self) -> usize { self.n }

    pub fn U(&self) -> &nd::Array2<C64> { &self.U }

    pub fn Uinv(&self) -> &nd::Array2<C64> { &self.Uinv }

    /// Compute `Uinv M U`, failing if the result is not numerically real.
    pub fn transform<S>(&self, M: &nd::ArrayBase<S, nd::Ix2>)
        -> LResult<nd::Array2<f64>>
    where S: nd::Data<Elem = C64>
    {
        let nn = self.n * self.n;
        let mut out: nd::Array2<C64> = nd::Array2::zeros((nn, nn));
        for (a, row) in self.uinv_rows.iter().enumerate() {
            for (b, col) in self.u_cols.iter().enumerate() {
                let mut acc = C64::from(0.0);
                for &(c, wc) in row.iter() {
                    for &(d, wd) in col.iter() {
                        acc += wc * M[[c, d]] * wd;
                    }
                }
                out[[a, b]] = acc;
            }
        }
        let scale = out.iter().map(|z| z.re.abs()).fold(1.0, f64::max);
        let resid = out.iter().map(|z| z.im.abs()).fold(0.0, f64::max);
        if resid > REAL_TOL * scale {
            return Err(LiouvilleError::NotReal(resid));
        }
        Ok(out.mapv(|z| z.re))
    }
}

/// Builds Liouville-space operators for a fixed Hamiltonian.
///
/// The real-basis change of basis is only constructed if it is needed.
#[derive(Debug)]
pub struct LiouvilleBuilder<'a> {
    hamiltonian: &'a BlockHamiltonian,
    n: usize,
    real_basis: OnceCell<RealBasis>,
}

impl<'a> LiouvilleBuilder<'a> {
    /// Create a new `LiouvilleBuilder`.
    pub fn new(hamiltonian: &'a BlockHamiltonian) -> Self {
        let n = hamiltonian.num_states();
        Self { hamiltonian, n, real_basis: OnceCell::new() }
    }

    pub fn num_states(&self) -> usize { self.n }

    /// Return the matrix representing `ρ ↦ -i [H, ρ]` on flattened density
    /// matrices.
    pub fn coherent_submatrix<S>(&self, H: &nd::ArrayBase<S, nd::Ix2>)
        -> nd::Array2<C64>
    where S: nd::Data<Elem = C64>
    {
        let n = self.n;
        let mut M: nd::Array2<C64> = nd::Array2::zeros((n * n, n * n));
        for i in 0..n {
            for j in 0..n {
                let ij = density_index(n, i, j);
                for k in 0..n {
                    // (ρ H)_ij
                    M[[ij, density_index(n, i, k)]] += I * H[[k, j]];
                    // (H ρ)_ij
                    M[[ij, density_index(n, k, j)]] -= I * H[[i, k]];
                }
            }
        }
        M
    }

    /// Return the matrix representing spontaneous decay on flattened density
    /// matrices.
    ///
    /// Populations and coherences of every manifold are fed by the
    /// populations and coherences of all higher manifolds through the
    /// aggregate dipole operator; everything within an excited manifold decays
    /// at that manifold's total rate, and coherences between two manifolds at
    /// the mean of their rates.
    pub fn decay_submatrix(&self) -> LResult<nd::Array2<C64>> {
        let n = self.n;
        let rates = self.hamiltonian.decay_rates()?;
        let d_q = &self.hamiltonian.assemble().d_q;
        let manifolds = self.hamiltonian.manifolds();
        let mut D: nd::Array2<C64> = nd::Array2::zeros((n * n, n * n));

        for (ll, man) in manifolds.iter().enumerate() {
            let higher = man.offset() + man.dim()..n;
            for ii in man.states() {
                for jj in man.states() {
                    let iijj = density_index(n, ii, jj);
                    for kk in higher.clone() {
                        for mm in higher.clone() {
                            let feed: C64
                                = (0..3)
                                .map(|q| d_q[[q, ii, kk]] * d_q[[q, mm, jj]])
                                .sum();
                            if feed.norm_sqr() > 0.0 {
                                D[[iijj, density_index(n, kk, mm)]] += feed;
                            }
                        }
                    }
                    if ll > 0 {
                        D[[iijj, iijj]] -= rates[ll];
                    }
                }
            }

            for (mm, other) in manifolds.iter().enumerate().skip(ll + 1) {
                let gamma = C64::from((rates[ll] + rates[mm]) / 2.0);
                for ii in man.states() {
                    for jj in other.states() {
                        let iijj = density_index(n, ii, jj);
                        let jjii = density_index(n, jj, ii);
                        D[[iijj, iijj]] -= gamma;
                        D[[jjii, jjii]] -= gamma;
                    }
                }
            }
        }
        Ok(D)
    }

    /// Return the (lazily constructed) real-basis change of basis.
    pub fn real_basis(&self) -> &RealBasis {
        self.real_basis.get_or_init(|| RealBasis::new(self.n))
    }

    /// Convert a complex-basis generator to the real representation.
    pub fn real_basis_transform<S>(&self, M: &nd::ArrayBase<S, nd::Ix2>)
        -> LResult<nd::Array2<f64>>
    where S: nd::Data<Elem = C64>
    {
        self.real_basis().transform(M)
    }

    /// Build the full operator set, with storage chosen by `config`.
    pub fn build_with_config<T>(&self, config: &ObeConfig)
        -> LResult<OperatorSet<T>>
    where T: DensityElem
    {
        self.build(config.use_sparse(self.n))
    }

    /// Build the full operator set in the representation given by `T`.
    pub fn build<T>(&self, sparse: bool) -> LResult<OperatorSet<T>>
    where T: DensityElem
    {
        let full = self.hamiltonian.assemble();
        let decay = T::convert_generator(self.decay_submatrix()?, self)?;
        let H0 = T::convert_generator(self.coherent_submatrix(&full.H0), self)?;
        let mu_gens: [nd::Array2<C64>; 3]
            = [0, 1, 2].map(|q| {
                let mu = full.mu_q.index_axis(nd::Axis(0), q).mapv(|m| -m);
                self.coherent_submatrix(&mu)
            });
        let B = T::magnetic_generators(mu_gens, self)?;

        let mut fields: IndexMap<String, FieldOperators<T>> = IndexMap::new();
        for key in self.hamiltonian.laser_keys().keys() {
            let bare = &full.d_q_bare[key];
            let star = &full.d_q_star[key];
            let component = |q: usize| -> LResult<(nd::Array2<T>, nd::Array2<T>)> {
                T::field_generators(
                    self.coherent_submatrix(&bare.index_axis(nd::Axis(0), q)),
                    self.coherent_submatrix(&star.index_axis(nd::Axis(0), q)),
                    self,
                )
            };
            let (d0, c0) = component(0)?;
            let (d1, c1) = component(1)?;
            let (d2, c2) = component(2)?;
            fields.insert(
                key.clone(),
                FieldOperators {
                    d: [d0, d1, d2].map(Operator::Dense),
                    d_conj: [c0, c1, c2].map(Operator::Dense),
                },
            );
        }

        let ops = OperatorSet {
            hamiltonian: self.hamiltonian.clone(),
            n: self.n,
            decay: Operator::Dense(decay),
            H0: Operator::Dense(H0),
            B: B.map(Operator::Dense),
            fields,
        };
        tracing::debug!(
            states = self.n,
            transitions = ops.fields.len(),
            real_basis = T::REAL_BASIS,
            sparse,
            "built operator set"
        );
        Ok(if sparse { ops.sparsify() } else { ops })
    }
}

/// Operators for the three polarization components of one transition.
///
/// In the complex representation `d` and `d_conj` hold the generators of `d_q`
/// and `d_q†`; in the real representation they hold the generators of the
/// Hermitian combinations `d_q + d_q†` and `-i (d_q - d_q†)`.
#[derive(Clone, Debug)]
pub struct FieldOperators<T> {
    pub d: [Operator<T>; 3],
    pub d_conj: [Operator<T>; 3],
}

/// Constant operators driving the optical Bloch equations.
///
/// The set owns a snapshot of the Hamiltonian it was built from, and is never
/// modified after construction; it can be shared freely between independent
/// runs.
#[derive(Clone, Debug)]
pub struct OperatorSet<T> {
    hamiltonian: BlockHamiltonian,
    n: usize,
    decay: Operator<T>,
    H0: Operator<T>,
    B: [Operator<T>; 3],
    fields: IndexMap<String, FieldOperators<T>>,
}

impl<T> OperatorSet<T>
where T: DensityElem
{
    /// Build an operator set with storage chosen by `config`.
    pub fn new(hamiltonian: &BlockHamiltonian, config: &ObeConfig)
        -> LResult<Self>
    {
        LiouvilleBuilder::new(hamiltonian).build_with_config(config)
    }

    /// Convert every operator to sparse storage.
    pub fn sparsify(self) -> Self {
        let Self { hamiltonian, n, decay, H0, B, fields } = self;
        Self {
            hamiltonian,
            n,
            decay: decay.into_sparse(),
            H0: H0.into_sparse(),
            B: B.map(Operator::into_sparse),
            fields: fields.into_iter()
                .map(|(key, f)| {
                    let f = FieldOperators {
                        d: f.d.map(Operator::into_sparse),
                        d_conj: f.d_conj.map(Operator::into_sparse),
                    };
                    (key, f)
                })
                .collect(),
        }
    }

    pub fn hamiltonian(&self) -> &BlockHamiltonian { &self.hamiltonian }

    /// Number of internal states.
    pub fn num_states(&self) -> usize { self.n }

    /// Length of a density vector.
    pub fn density_len(&self) -> usize { self.n * self.n }

    pub fn is_sparse(&self) -> bool { self.decay.is_sparse() }

    pub fn decay(&self) -> &Operator<T> { &self.decay }

    pub fn H0(&self) -> &Operator<T> { &self.H0 }

    /// Magnetic operators: spherical components in the complex
    /// representation, Cartesian in the real one.
    pub fn B(&self) -> &[Operator<T>; 3] { &self.B }

    pub fn fields(&self) -> &IndexMap<String, FieldOperators<T>> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldOperators<T>> {
        self.fields.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{ Rng, SeedableRng, rngs::StdRng };
    use crate::{
        error::HamiltonianError,
        hamiltonian::BlockParams,
        states::{ dqij_two_bare_hyperfine, single_f },
    };

    fn f1_to_f2() -> BlockHamiltonian {
        let (H_g, mu_g) = single_f(1.0, 0.5);
        let (H_e, mu_e) = single_f(2.0, 0.25);
        BlockHamiltonian::from_two_manifolds(
            H_g,
            H_e + nd::Array2::from_diag_elem(5, C64::from(-1.0)),
            mu_g,
            mu_e,
            dqij_two_bare_hyperfine(1.0, 2.0, true),
            BlockParams::default(),
        )
        .unwrap()
    }

    fn random_matrix(n: usize, rng: &mut StdRng) -> nd::Array2<C64> {
        nd::Array2::from_shape_fn(
            (n, n), |_| C64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
    }

    fn random_hermitian(n: usize, rng: &mut StdRng) -> nd::Array2<C64> {
        let A = random_matrix(n, rng);
        (&A + &A.t().mapv(|a| a.conj())) * 0.5
    }

    #[test]
    fn coherent_matches_commutator() {
        let mut rng = StdRng::seed_from_u64(10546);
        let H = f1_to_f2();
        let builder = LiouvilleBuilder::new(&H);
        let n = builder.num_states();
        let Hr = random_hermitian(n, &mut rng);
        let rho = random_matrix(n, &mut rng);
        let M = builder.coherent_submatrix(&Hr);
        let drho = M.dot(&C64::flatten(&rho));
        let expected = (Hr.dot(&rho) - rho.dot(&Hr)).mapv(|x| -I * x);
        let expected = C64::flatten(&expected);
        for (a, b) in drho.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-12);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn real_basis_is_invertible() {
        let basis = RealBasis::new(4);
        let prod = basis.U().dot(basis.Uinv());
        let prod_rev = basis.Uinv().dot(basis.U());
        let eye: nd::Array2<C64> = nd::Array2::eye(16);
        for ((a, b), e) in prod.iter().zip(prod_rev.iter()).zip(eye.iter()) {
            assert_abs_diff_eq!((a - e).norm(), 0.0, epsilon = 1e-15);
            assert_abs_diff_eq!((b - e).norm(), 0.0, epsilon = 1e-15);
        }
    }

    #[test]
    fn real_basis_transform_of_generators() {
        let mut rng = StdRng::seed_from_u64(2718);
        let H = f1_to_f2();
        let builder = LiouvilleBuilder::new(&H);
        let n = builder.num_states();
        let M = builder.coherent_submatrix(&random_hermitian(n, &mut rng));
        let Mr = builder.real_basis_transform(&M).unwrap();
        // agrees with the dense product
        let basis = builder.real_basis();
        let dense = basis.Uinv().dot(&M).dot(basis.U());
        for (a, b) in Mr.iter().zip(dense.iter()) {
            assert_abs_diff_eq!(*a, b.re, epsilon = 1e-12);
        }
        assert!(builder.real_basis_transform(&builder.decay_submatrix().unwrap()).is_ok());

        // a non-Hermitian generator cannot be represented
        let bad = builder.coherent_submatrix(&random_matrix(n, &mut rng));
        assert!(matches!(
            builder.real_basis_transform(&bad),
            Err(LiouvilleError::NotReal(_)),
        ));
    }

    #[test]
    fn decay_conserves_trace() {
        let mut rng = StdRng::seed_from_u64(31415);
        let H = f1_to_f2();
        let builder = LiouvilleBuilder::new(&H);
        let n = builder.num_states();
        let D = builder.decay_submatrix().unwrap();
        let A = random_matrix(n, &mut rng);
        let rho = A.dot(&A.t().mapv(|a| a.conj()));
        let drho = D.dot(&C64::flatten(&rho));
        let dtrace: C64 = (0..n).map(|i| drho[density_index(n, i, i)]).sum();
        assert_abs_diff_eq!(dtrace.norm(), 0.0, epsilon = 1e-12);

        // excited populations decay at unit rate
        let mut pop: nd::Array2<C64> = nd::Array2::zeros((n, n));
        pop[[5, 5]] = C64::from(1.0);
        let drho = D.dot(&C64::flatten(&pop));
        assert_abs_diff_eq!(drho[density_index(n, 5, 5)].re, -1.0, epsilon = 1e-12);
        // ground-excited coherences at half the rate
        let ge = density_index(n, 0, 4);
        assert_abs_diff_eq!(D[[ge, ge]].re, -0.5, epsilon = 1e-12);
    }

    #[test]
    fn decay_rate_mismatch_is_fatal() {
        let mut H = BlockHamiltonian::new();
        H.add_energy_block("g", nd::Array2::zeros((1, 1))).unwrap();
        H.add_energy_block("e", nd::Array2::zeros((2, 2))).unwrap();
        let mut d: nd::Array3<C64> = nd::Array3::zeros((3, 1, 2));
        d[[0, 0, 0]] = C64::from(1.0);
        d[[2, 0, 1]] = C64::from(0.5);
        H.add_dipole_block("g", "e", d, 1.0, 1.0).unwrap();
        let builder = LiouvilleBuilder::new(&H);
        assert!(matches!(
            builder.build::<f64>(false),
            Err(LiouvilleError::Hamiltonian(HamiltonianError::DecayRateMismatch { .. })),
        ));
    }

    #[test]
    fn sparse_and_dense_sets_agree() {
        let mut rng = StdRng::seed_from_u64(1618);
        let H = f1_to_f2();
        let builder = LiouvilleBuilder::new(&H);
        let dense: OperatorSet<f64> = builder.build(false).unwrap();
        let sparse: OperatorSet<f64> = builder.build(true).unwrap();
        assert!(!dense.is_sparse());
        assert!(sparse.is_sparse());
        let x: nd::Array1<f64>
            = nd::Array1::from_shape_fn(dense.density_len(), |_| rng.gen_range(-1.0..1.0));
        let pairs
            = [(dense.decay(), sparse.decay()), (dense.H0(), sparse.H0())]
            .into_iter()
            .chain(dense.B().iter().zip(sparse.B().iter()))
            .chain(dense.field("g->e").unwrap().d.iter()
                .zip(sparse.field("g->e").unwrap().d.iter()));
        for (a, b) in pairs {
            for (ya, yb) in a.apply(&x).iter().zip(b.apply(&x).iter()) {
                assert_abs_diff_eq!(*ya, *yb, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn storage_follows_config() {
        let H = f1_to_f2();
        let config = ObeConfig::default();
        let ops: OperatorSet<C64> = OperatorSet::new(&H, &config).unwrap();
        assert!(!ops.is_sparse());
        let config = ObeConfig { sparse_threshold: 4, ..ObeConfig::default() };
        let ops: OperatorSet<C64> = OperatorSet::new(&H, &config).unwrap();
        assert!(ops.is_sparse());
        assert_eq!(ops.fields().len(), 1);
        assert_eq!(ops.num_states(), 8);
    }
}
