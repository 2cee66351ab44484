//! Flattened density-matrix representations.
//!
//! An `N x N` density matrix is flattened column-major, so element `(i, j)`
//! lives at [`density_index`]` = i + j N`. Two representations are supported:
//! - `C64`: the flattened matrix itself;
//! - `f64`: a real vector holding populations at the diagonal positions and,
//!   for every `i < j`, `Re ρ_ij` at position `(i, j)` and `Im ρ_ij` at
//!   position `(j, i)`.
//!
//! Generators are always built in the complex representation and converted
//! through [`DensityElem`].

use std::f64::consts::FRAC_1_SQRT_2;
use ndarray as nd;
use ndarray_linalg as la;
use num_complex::Complex64 as C64;
use crate::{
    error::LResult,
    liouville::LiouvilleBuilder,
    spherical::zeeman_weights,
};

const I: C64 = C64 { re: 0.0, im: 1.0 };

/// Flattened index of density-matrix element `(i, j)` for `n` states.
#[inline]
pub fn density_index(n: usize, i: usize, j: usize) -> usize { i + j * n }

/// Element type of a flattened density vector.
pub trait DensityElem
where Self: la::Scalar<Real = f64> + nd::ScalarOperand + PartialEq + Send + Sync
{
    /// `true` for the real representation.
    const REAL_BASIS: bool;

    /// Convert a generator built in the complex representation.
    fn convert_generator(M: nd::Array2<C64>, builder: &LiouvilleBuilder<'_>)
        -> LResult<nd::Array2<Self>>;

    /// Convert the generators of `d_q` and `d_q†` for one polarization
    /// component into the pair of operators used by the derivative.
    ///
    /// In the complex representation these are returned unchanged; in the real
    /// representation they are replaced by the generators of the Hermitian
    /// combinations `d + d†` and `-i (d - d†)`.
    fn field_generators(
        G: nd::Array2<C64>,
        G_conj: nd::Array2<C64>,
        builder: &LiouvilleBuilder<'_>,
    ) -> LResult<(nd::Array2<Self>, nd::Array2<Self>)>;

    /// Convert the generators of `-μ_q` (spherical components) into the three
    /// magnetic operators used by the derivative (spherical in the complex
    /// representation, Cartesian in the real one).
    fn magnetic_generators(
        G: [nd::Array2<C64>; 3],
        builder: &LiouvilleBuilder<'_>,
    ) -> LResult<[nd::Array2<Self>; 3]>;

    /// Weights applied to the two operators of [`Self::field_generators`] for
    /// the field component `E`, such that the contribution to `dρ/dt` is
    /// `-½ (w0 A ρ + w1 B ρ)`.
    fn field_weights(E: C64) -> (Self, Self);

    /// Weights applied to the three magnetic operators for a Cartesian field
    /// `B`.
    fn magnetic_weights(B: [f64; 3]) -> [Self; 3];

    /// Return density-matrix element `ρ[row, col]`.
    fn element<S>(rho: &nd::ArrayBase<S, nd::Ix1>, n: usize, row: usize, col: usize)
        -> C64
    where S: nd::Data<Elem = Self>;

    /// Flatten a complex density matrix into this representation.
    fn flatten<S>(rho: &nd::ArrayBase<S, nd::Ix2>) -> nd::Array1<Self>
    where S: nd::Data<Elem = C64>;

    /// Reconstruct the full complex density matrix.
    fn unflatten<S>(rho: &nd::ArrayBase<S, nd::Ix1>, n: usize)
        -> nd::Array2<C64>
    where S: nd::Data<Elem = Self>
    {
        nd::Array2::from_shape_fn((n, n), |(i, j)| Self::element(rho, n, i, j))
    }

    /// Return the population of state `i`.
    fn population<S>(rho: &nd::ArrayBase<S, nd::Ix1>, n: usize, i: usize)
        -> f64
    where S: nd::Data<Elem = Self>
    {
        rho[density_index(n, i, i)].re()
    }
}

impl DensityElem for C64 {
    const REAL_BASIS: bool = false;

    fn convert_generator(M: nd::Array2<C64>, _builder: &LiouvilleBuilder<'_>)
        -> LResult<nd::Array2<Self>>
    {
        Ok(M)
    }

    fn field_generators(
        G: nd::Array2<C64>,
        G_conj: nd::Array2<C64>,
        _builder: &LiouvilleBuilder<'_>,
    ) -> LResult<(nd::Array2<Self>, nd::Array2<Self>)>
    {
        Ok((G, G_conj))
    }

    fn magnetic_generators(
        G: [nd::Array2<C64>; 3],
        _builder: &LiouvilleBuilder<'_>,
    ) -> LResult<[nd::Array2<Self>; 3]>
    {
        Ok(G)
    }

    fn field_weights(E: C64) -> (Self, Self) { (E.conj(), E) }

    fn magnetic_weights(B: [f64; 3]) -> [Self; 3] { zeeman_weights(B) }

    fn element<S>(rho: &nd::ArrayBase<S, nd::Ix1>, n: usize, row: usize, col: usize)
        -> C64
    where S: nd::Data<Elem = Self>
    {
        rho[density_index(n, row, col)]
    }

    fn flatten<S>(rho: &nd::ArrayBase<S, nd::Ix2>) -> nd::Array1<Self>
    where S: nd::Data<Elem = C64>
    {
        rho.t().iter().copied().collect()
    }
}

impl DensityElem for f64 {
    const REAL_BASIS: bool = true;

    fn convert_generator(M: nd::Array2<C64>, builder: &LiouvilleBuilder<'_>)
        -> LResult<nd::Array2<Self>>
    {
        builder.real_basis_transform(&M)
    }

    fn field_generators(
        G: nd::Array2<C64>,
        G_conj: nd::Array2<C64>,
        builder: &LiouvilleBuilder<'_>,
    ) -> LResult<(nd::Array2<Self>, nd::Array2<Self>)>
    {
        let re = builder.real_basis_transform(&(&G + &G_conj))?;
        let im = builder.real_basis_transform(&((&G - &G_conj) * (-I)))?;
        Ok((re, im))
    }

    fn magnetic_generators(
        G: [nd::Array2<C64>; 3],
        builder: &LiouvilleBuilder<'_>,
    ) -> LResult<[nd::Array2<Self>; 3]>
    {
        let [Gm, G0, Gp] = G;
        let x = builder.real_basis_transform(&((&Gm - &Gp) * FRAC_1_SQRT_2))?;
        let y = builder.real_basis_transform(
            &((&Gm + &Gp) * (I * FRAC_1_SQRT_2)))?;
        let z = builder.real_basis_transform(&G0)?;
        Ok([x, y, z])
    }

    fn field_weights(E: C64) -> (Self, Self) { (E.re, E.im) }

    fn magnetic_weights(B: [f64; 3]) -> [Self; 3] { B }

    fn element<S>(rho: &nd::ArrayBase<S, nd::Ix1>, n: usize, row: usize, col: usize)
        -> C64
    where S: nd::Data<Elem = Self>
    {
        use std::cmp::Ordering::*;
        match row.cmp(&col) {
            Equal => C64::from(rho[density_index(n, row, row)]),
            Less => C64::new(
                rho[density_index(n, row, col)],
                rho[density_index(n, col, row)],
            ),
            Greater => C64::new(
                rho[density_index(n, col, row)],
                -rho[density_index(n, row, col)],
            ),
        }
    }

    fn flatten<S>(rho: &nd::ArrayBase<S, nd::Ix2>) -> nd::Array1<Self>
    where S: nd::Data<Elem = C64>
    {
        let (n, _) = rho.dim();
        let mut x: nd::Array1<f64> = nd::Array1::zeros(n * n);
        for i in 0..n {
            x[density_index(n, i, i)] = rho[[i, i]].re;
            for j in i + 1..n {
                x[density_index(n, i, j)] = rho[[i, j]].re;
                x[density_index(n, j, i)] = rho[[i, j]].im;
            }
        }
        x
    }
}
