//! Conversions between the spherical and Cartesian bases.
//!
//! Spherical components are always ordered `q = -1, 0, +1` along the leading
//! axis (indices 0, 1, 2), and Cartesian components are ordered `x, y, z`.
//! For a vector `A`,
//! ```text
//! A_x = (A_{-1} - A_{+1}) / √2
//! A_y = i (A_{-1} + A_{+1}) / √2
//! A_z = A_0
//! ```

use std::f64::consts::FRAC_1_SQRT_2;
use ndarray as nd;
use num_complex::Complex64 as C64;

const I: C64 = C64 { re: 0.0, im: 1.0 };

/// Convert a vector operator given by spherical components (leading axis) to
/// Cartesian components.
pub fn spherical2cart_op<S>(A: &nd::ArrayBase<S, nd::Ix3>) -> nd::Array3<C64>
where S: nd::Data<Elem = C64>
{
    let mut out: nd::Array3<C64> = nd::Array3::zeros(A.raw_dim());
    let am = A.index_axis(nd::Axis(0), 0);
    let a0 = A.index_axis(nd::Axis(0), 1);
    let ap = A.index_axis(nd::Axis(0), 2);
    out.index_axis_mut(nd::Axis(0), 0)
        .assign(&((&am - &ap) * FRAC_1_SQRT_2));
    out.index_axis_mut(nd::Axis(0), 1)
        .assign(&((&am + &ap) * (I * FRAC_1_SQRT_2)));
    out.index_axis_mut(nd::Axis(0), 2)
        .assign(&a0);
    out
}

/// Convert a real Cartesian vector to spherical components.
pub fn cart2spherical(v: [f64; 3]) -> [C64; 3] {
    let [x, y, z] = v;
    [
        C64::new(x, -y) * FRAC_1_SQRT_2,
        C64::from(z),
        C64::new(-x, -y) * FRAC_1_SQRT_2,
    ]
}

/// Convert spherical vector components to Cartesian.
pub fn spherical2cart(v: [C64; 3]) -> [C64; 3] {
    [
        (v[0] - v[2]) * FRAC_1_SQRT_2,
        I * (v[0] + v[2]) * FRAC_1_SQRT_2,
        v[1],
    ]
}

/// Return the weights `conj(B_q)` with which the spherical components of a
/// magnetic moment operator are contracted against a real Cartesian field, so
/// that `μ·B = Σ_q μ_q conj(B_q)`.
pub fn zeeman_weights(B: [f64; 3]) -> [C64; 3] {
    cart2spherical(B).map(|b| b.conj())
}

/// Apply [`zeeman_weights`] to every row of a Cartesian gradient
/// `dB[axis][component]`, returning `conj(∂_axis B_q)` indexed by
/// `[axis][q]`.
pub fn zeeman_gradient_weights(dB: [[f64; 3]; 3]) -> [[C64; 3]; 3] {
    dB.map(zeeman_weights)
}
