//! Sub-matrices making up a [`BlockHamiltonian`][super::BlockHamiltonian] and
//! the cells of its block layout.

use std::fmt;
use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use num_traits::Zero;

/// Common interface for sub-matrices placed into full-size matrices.
pub trait Block {
    /// Full-size array type that `self` is placed into.
    type Target;

    /// Return the block's label, e.g. `<g|d_q|e>`.
    fn label(&self) -> &str;

    /// Return the `(rows, columns)` shape of the block, ignoring any leading
    /// component axis.
    fn shape(&self) -> (usize, usize);

    /// Return `true` if the block is diagonal.
    fn is_diagonal(&self) -> bool;

    /// Write the block into `target`, with its upper-left corner at `(row,
    /// col)`.
    fn place_into(&self, target: &mut Self::Target, row: usize, col: usize);
}

fn is_diagonal_matrix<S>(M: &nd::ArrayBase<S, nd::Ix2>) -> bool
where S: nd::Data<Elem = C64>
{
    let (n, m) = M.dim();
    n == m
        && M.indexed_iter()
            .all(|((i, j), x)| i == j || x.is_zero())
}

/// Parameters attached to magnetic and dipole blocks.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BlockParams {
    /// Magnetic-moment scale applied to magnetic blocks.
    pub mu_b: f64,
    /// Decay rate of a dipole transition.
    pub gamma: f64,
    /// Wavevector magnitude of a dipole transition.
    pub k: f64,
}

impl Default for BlockParams {
    fn default() -> Self { Self { mu_b: 1.0, gamma: 1.0, k: 1.0 } }
}

/// A single (field-independent energy) matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarBlock {
    label: String,
    matrix: nd::Array2<C64>,
    diagonal: bool,
}

impl ScalarBlock {
    /// Create a new `ScalarBlock`.
    pub fn new(label: String, matrix: nd::Array2<C64>) -> Self {
        let diagonal = is_diagonal_matrix(&matrix);
        Self { label, matrix, diagonal }
    }

    /// Return a reference to the underlying matrix.
    pub fn matrix(&self) -> &nd::Array2<C64> { &self.matrix }
}

impl Block for ScalarBlock {
    type Target = nd::Array2<C64>;

    fn label(&self) -> &str { &self.label }

    fn shape(&self) -> (usize, usize) { self.matrix.dim() }

    fn is_diagonal(&self) -> bool { self.diagonal }

    fn place_into(&self, target: &mut Self::Target, row: usize, col: usize) {
        let (n, m) = self.matrix.dim();
        target.slice_mut(s![row..row + n, col..col + m])
            .assign(&self.matrix);
    }
}

/// A vector of three matrices indexed by spherical component `q = -1, 0, +1`
/// along the leading axis.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorBlock {
    label: String,
    matrix: nd::Array3<C64>,
    diagonal: bool,
    params: BlockParams,
}

impl VectorBlock {
    /// Create a new `VectorBlock`.
    ///
    /// The block is considered diagonal if its `q = 0` component is square and
    /// diagonal, i.e. if it is diagonal for fields along the quantization
    /// axis.
    pub fn new(label: String, matrix: nd::Array3<C64>, params: BlockParams)
        -> Self
    {
        let diagonal
            = is_diagonal_matrix(&matrix.index_axis(nd::Axis(0), 1));
        Self { label, matrix, diagonal, params }
    }

    /// Return a reference to the underlying array.
    pub fn matrix(&self) -> &nd::Array3<C64> { &self.matrix }

    /// Return the block's parameters.
    pub fn params(&self) -> BlockParams { self.params }

    /// Return a new block holding the conjugate transpose of every component.
    pub fn conj_transposed(&self, label: String) -> Self {
        Self::new(label, conj_transpose_components(&self.matrix), self.params)
    }
}

impl Block for VectorBlock {
    type Target = nd::Array3<C64>;

    fn label(&self) -> &str { &self.label }

    fn shape(&self) -> (usize, usize) {
        let (_, n, m) = self.matrix.dim();
        (n, m)
    }

    fn is_diagonal(&self) -> bool { self.diagonal }

    fn place_into(&self, target: &mut Self::Target, row: usize, col: usize) {
        let (_, n, m) = self.matrix.dim();
        target.slice_mut(s![.., row..row + n, col..col + m])
            .assign(&self.matrix);
    }
}

/// Conjugate-transpose each matrix along the leading axis of `A`.
pub(crate) fn conj_transpose_components<S>(A: &nd::ArrayBase<S, nd::Ix3>)
    -> nd::Array3<C64>
where S: nd::Data<Elem = C64>
{
    let mut out: nd::Array3<C64>
        = A.view().permuted_axes([0, 2, 1]).mapv(|a| a.conj());
    if !out.is_standard_layout() {
        out = out.as_standard_layout().into_owned();
    }
    out
}

/// Content of one position in the block layout of a Hamiltonian.
///
/// Diagonal positions hold the energy and/or magnetic blocks of a manifold;
/// off-diagonal positions hold a dipole coupling or nothing.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Cell {
    #[default]
    Empty,
    EnergyOnly(ScalarBlock),
    MagneticOnly(VectorBlock),
    EnergyAndMagnetic(ScalarBlock, VectorBlock),
    Dipole(VectorBlock),
}

impl Cell {
    /// Return the energy block, if any.
    pub fn energy(&self) -> Option<&ScalarBlock> {
        match self {
            Self::EnergyOnly(e) | Self::EnergyAndMagnetic(e, _) => Some(e),
            _ => None,
        }
    }

    /// Return the magnetic block, if any.
    pub fn magnetic(&self) -> Option<&VectorBlock> {
        match self {
            Self::MagneticOnly(m) | Self::EnergyAndMagnetic(_, m) => Some(m),
            _ => None,
        }
    }

    /// Return the dipole block, if any.
    pub fn dipole(&self) -> Option<&VectorBlock> {
        match self {
            Self::Dipole(d) => Some(d),
            _ => None,
        }
    }

    /// Return `true` if every block in the cell is diagonal.
    ///
    /// Empty and dipole cells are never diagonal.
    pub fn is_diagonal(&self) -> bool {
        match self {
            Self::Empty | Self::Dipole(_) => false,
            Self::EnergyOnly(e) => e.is_diagonal(),
            Self::MagneticOnly(m) => m.is_diagonal(),
            Self::EnergyAndMagnetic(e, m) => e.is_diagonal() && m.is_diagonal(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "-"),
            Self::EnergyOnly(e) => write!(f, "{}", e.label()),
            Self::MagneticOnly(m) => write!(f, "{}", m.label()),
            Self::EnergyAndMagnetic(e, m) => {
                write!(f, "{} + {}", e.label(), m.label())
            },
            Self::Dipole(d) => write!(f, "{}", d.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonality() {
        let D = nd::Array2::from_diag(&nd::array![C64::from(1.0), C64::from(2.0)]);
        assert!(ScalarBlock::new("d".into(), D).is_diagonal());
        let M = nd::array![
            [C64::from(1.0), C64::new(0.0, 1e-20)],
            [C64::new(0.0, -1e-20), C64::from(2.0)],
        ];
        assert!(!ScalarBlock::new("m".into(), M).is_diagonal());

        // only the q = 0 component matters for vector blocks
        let mut mu: nd::Array3<C64> = nd::Array3::zeros((3, 2, 2));
        mu[[0, 1, 0]] = C64::from(1.0);
        mu[[1, 0, 0]] = C64::from(0.5);
        let block = VectorBlock::new("mu".into(), mu, BlockParams::default());
        assert!(block.is_diagonal());

        let d: nd::Array3<C64> = nd::Array3::zeros((3, 1, 2));
        assert!(!VectorBlock::new("d".into(), d, BlockParams::default()).is_diagonal());
    }

    #[test]
    fn placement() {
        let d: nd::Array3<C64>
            = nd::Array3::from_shape_fn((3, 1, 2), |(q, _, j)| {
                C64::new(q as f64, j as f64)
            });
        let block = VectorBlock::new("d".into(), d, BlockParams::default());
        let mut target: nd::Array3<C64> = nd::Array3::zeros((3, 3, 3));
        block.place_into(&mut target, 0, 1);
        assert_eq!(target[[2, 0, 2]], C64::new(2.0, 1.0));
        assert_eq!(target[[2, 1, 2]], C64::zero());

        let conj = block.conj_transposed("d*".into());
        assert_eq!(conj.shape(), (2, 1));
        assert_eq!(conj.matrix()[[2, 1, 0]], C64::new(2.0, -1.0));
    }
}
