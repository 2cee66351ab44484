//! Compressed sparse row storage for Liouville-space operators.
//!
//! Liouville-space generators grow as `N^4` in the number of internal states
//! but are mostly empty, so for larger systems the repeated matrix-vector
//! products during integration are done in CSR form.

use ndarray as nd;

/// Sparse matrix in compressed sparse row format.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix<T> {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<T>,
}

impl<T> CsrMatrix<T>
where T: nd::LinalgScalar + PartialEq
{
    /// Create a new `CsrMatrix` from the non-zero elements of a dense matrix.
    pub fn from_dense<S>(A: &nd::ArrayBase<S, nd::Ix2>) -> Self
    where S: nd::Data<Elem = T>
    {
        let (nrows, ncols) = A.dim();
        let mut row_ptr: Vec<usize> = Vec::with_capacity(nrows + 1);
        let mut col_indices: Vec<usize> = Vec::new();
        let mut values: Vec<T> = Vec::new();
        row_ptr.push(0);
        for row in A.outer_iter() {
            for (j, &a) in row.iter().enumerate() {
                if a != T::zero() {
                    col_indices.push(j);
                    values.push(a);
                }
            }
            row_ptr.push(values.len());
        }
        Self { nrows, ncols, row_ptr, col_indices, values }
    }

    /// Number of non-zero entries.
    pub fn nnz(&self) -> usize { self.values.len() }

    pub fn dim(&self) -> (usize, usize) { (self.nrows, self.ncols) }

    /// Compute `y += alpha * A x`.
    pub fn scaled_add_matvec<S>(
        &self,
        alpha: T,
        x: &nd::ArrayBase<S, nd::Ix1>,
        y: &mut nd::Array1<T>,
    )
    where S: nd::Data<Elem = T>
    {
        for (i, yi) in y.iter_mut().enumerate() {
            let start = self.row_ptr[i];
            let end = self.row_ptr[i + 1];
            let mut acc = T::zero();
            for idx in start..end {
                acc = acc + self.values[idx] * x[self.col_indices[idx]];
            }
            *yi = *yi + alpha * acc;
        }
    }

    /// Compute `A x`.
    pub fn matvec<S>(&self, x: &nd::ArrayBase<S, nd::Ix1>) -> nd::Array1<T>
    where S: nd::Data<Elem = T>
    {
        let mut y: nd::Array1<T> = nd::Array1::zeros(self.nrows);
        self.scaled_add_matvec(T::one(), x, &mut y);
        y
    }

    /// Expand back into a dense matrix.
    pub fn to_dense(&self) -> nd::Array2<T> {
        let mut A: nd::Array2<T> = nd::Array2::zeros((self.nrows, self.ncols));
        self.scaled_add_into(T::one(), &mut A);
        A
    }

    /// Compute `M += alpha * A` for a dense `M`.
    pub fn scaled_add_into(&self, alpha: T, M: &mut nd::Array2<T>) {
        for i in 0..self.nrows {
            for idx in self.row_ptr[i]..self.row_ptr[i + 1] {
                let j = self.col_indices[idx];
                M[[i, j]] = M[[i, j]] + alpha * self.values[idx];
            }
        }
    }
}

/// A linear operator on density vectors, stored densely or sparsely.
#[derive(Clone, Debug, PartialEq)]
pub enum Operator<T> {
    Dense(nd::Array2<T>),
    Sparse(CsrMatrix<T>),
}

impl<T> From<nd::Array2<T>> for Operator<T> {
    fn from(A: nd::Array2<T>) -> Self { Self::Dense(A) }
}

impl<T> Operator<T>
where T: nd::LinalgScalar + PartialEq
{
    /// Convert to sparse storage; no-op if already sparse.
    pub fn into_sparse(self) -> Self {
        match self {
            Self::Dense(A) => Self::Sparse(CsrMatrix::from_dense(&A)),
            sparse => sparse,
        }
    }

    pub fn is_sparse(&self) -> bool { matches!(self, Self::Sparse(_)) }

    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::Dense(A) => A.dim(),
            Self::Sparse(A) => A.dim(),
        }
    }

    /// Return a dense copy of the operator.
    pub fn to_dense(&self) -> nd::Array2<T> {
        match self {
            Self::Dense(A) => A.clone(),
            Self::Sparse(A) => A.to_dense(),
        }
    }

    /// Compute `A x`.
    pub fn apply<S>(&self, x: &nd::ArrayBase<S, nd::Ix1>) -> nd::Array1<T>
    where S: nd::Data<Elem = T>
    {
        match self {
            Self::Dense(A) => A.dot(x),
            Self::Sparse(A) => A.matvec(x),
        }
    }

    /// Compute `y += alpha * A x`.
    pub fn scaled_add_apply<S>(
        &self,
        alpha: T,
        x: &nd::ArrayBase<S, nd::Ix1>,
        y: &mut nd::Array1<T>,
    )
    where S: nd::Data<Elem = T>
    {
        match self {
            Self::Dense(A) => {
                nd::linalg::general_mat_vec_mul(alpha, A, x, T::one(), y);
            },
            Self::Sparse(A) => A.scaled_add_matvec(alpha, x, y),
        }
    }

    /// Compute `M += alpha * A` for a dense `M`.
    pub fn scaled_add_into(&self, alpha: T, M: &mut nd::Array2<T>) {
        match self {
            Self::Dense(A) => M.scaled_add(alpha, A),
            Self::Sparse(A) => A.scaled_add_into(alpha, M),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64 as C64;

    #[test]
    fn csr_matches_dense() {
        let A = nd::array![
            [1.0, 0.0, 2.0],
            [0.0, 0.0, 0.0],
            [0.0, -3.0, 0.5],
        ];
        let csr = CsrMatrix::from_dense(&A);
        assert_eq!(csr.nnz(), 4);
        assert_eq!(csr.to_dense(), A);
        let x = nd::array![0.5, -1.0, 2.0];
        assert_eq!(csr.matvec(&x), A.dot(&x));
    }

    #[test]
    fn operator_storage_agrees() {
        let A = nd::array![
            [C64::new(0.0, 1.0), C64::new(0.0, 0.0)],
            [C64::new(2.0, 0.0), C64::new(-1.0, 0.5)],
        ];
        let dense = Operator::from(A.clone());
        let sparse = dense.clone().into_sparse();
        assert!(sparse.is_sparse());
        let x = nd::array![C64::new(1.0, -1.0), C64::new(0.5, 0.0)];
        let alpha = C64::new(0.0, 0.5);
        let mut y_dense = nd::array![C64::new(1.0, 0.0), C64::new(0.0, 1.0)];
        let mut y_sparse = y_dense.clone();
        dense.scaled_add_apply(alpha, &x, &mut y_dense);
        sparse.scaled_add_apply(alpha, &x, &mut y_sparse);
        for (a, b) in y_dense.iter().zip(&y_sparse) {
            assert!((a - b).norm() < 1e-14);
        }
        let mut M: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        sparse.scaled_add_into(C64::new(2.0, 0.0), &mut M);
        assert_eq!(M, A.mapv(|a| a * 2.0));
    }
}
