//! Block data for common angular-momentum structures.
//!
//! States of a single hyperfine level `F` are ordered by ascending `m_F`.

use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::spin::{ w3j, Spin, SpinTotal };

/// Energy and magnetic-moment blocks for a single, isolated hyperfine level
/// `F` with Landé factor `g_F`.
///
/// The energy block is zero and the magnetic moment is `μ_q = -g_F F_q`, in
/// spherical components `q = -1, 0, +1`. The magnetic-moment scale (`μ_B`) is
/// attached separately when the block is registered.
pub fn single_f(F: f64, g_F: f64) -> (nd::Array2<C64>, nd::Array3<C64>) {
    let F = SpinTotal::from_f64(F);
    let n = F.multiplicity();
    let H0: nd::Array2<C64> = nd::Array2::zeros((n, n));
    let mut mu_q: nd::Array3<C64> = nd::Array3::zeros((3, n, n));
    let ff = F.f() * (F.f() + 1.0);
    for s in F.projections() {
        let i = s.index();
        let m = s.m();
        mu_q[[1, i, i]] = C64::from(-g_F * m);
        if i + 1 < n {
            // F_+ |m> = sqrt(F(F+1) - m(m+1)) |m+1>; F_{+1} = -F_+ / √2
            let a = (ff - m * (m + 1.0)).sqrt() / std::f64::consts::SQRT_2;
            mu_q[[2, i + 1, i]] = C64::from(g_F * a);
            // F_- |m+1> = a √2 |m>; F_{-1} = F_- / √2
            mu_q[[0, i, i + 1]] = C64::from(-g_F * a);
        }
    }
    (H0, mu_q)
}

/// Dipole matrix elements `d_q[q, m_F, m_F']` between a lower hyperfine level
/// `F` and an upper level `Fp`,
/// ```text
/// d_q = (-1)^(F - m_F) ( F  1  F' ; -m_F  -q  m_F' )
/// ```
/// so that polarization component `q` couples `m_F` to `m_F' = m_F + q`.
///
/// If `normalize` is `true`, elements are scaled by `sqrt(2F' + 1)` so that
/// every upper state decays at unit total rate.
pub fn dqij_two_bare_hyperfine(F: f64, Fp: f64, normalize: bool)
    -> nd::Array3<C64>
{
    let F = SpinTotal::from_f64(F);
    let Fp = SpinTotal::from_f64(Fp);
    let norm
        = if normalize { (Fp.multiplicity() as f64).sqrt() } else { 1.0 };
    let mut d_q: nd::Array3<C64>
        = nd::Array3::zeros((3, F.multiplicity(), Fp.multiplicity()));
    for (iq, q) in [-1_i32, 0, 1].into_iter().enumerate() {
        let Some(photon) = Spin::new(2, -2 * q) else { continue; };
        for s in F.projections() {
            let Some(s_neg) = Spin::new(F.halves(), -s.proj_halves())
                else { continue; };
            let sign
                = if ((F.halves() as i32 - s.proj_halves()) / 2) % 2 == 0 {
                    1.0
                } else {
                    -1.0
                };
            for sp in Fp.projections() {
                let w = w3j(s_neg, photon, sp);
                if w != 0.0 {
                    d_q[[iq, s.index(), sp.index()]] = C64::from(sign * norm * w);
                }
            }
        }
    }
    d_q
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::spherical::spherical2cart_op;

    #[test]
    fn single_f_moment_is_hermitian_vector() {
        let (H0, mu_q) = single_f(1.5, 0.4);
        assert_eq!(H0.dim(), (4, 4));
        let mu = spherical2cart_op(&mu_q);
        for k in 0..3 {
            let mu_k = mu.index_axis(nd::Axis(0), k);
            for ((i, j), x) in mu_k.indexed_iter() {
                assert_abs_diff_eq!(x.re, mu_k[[j, i]].re, epsilon = 1e-14);
                assert_abs_diff_eq!(x.im, -mu_k[[j, i]].im, epsilon = 1e-14);
            }
        }
        // [F_x, F_y] = i F_z with μ = -g F
        let g = 0.4;
        let mx = mu.index_axis(nd::Axis(0), 0).to_owned();
        let my = mu.index_axis(nd::Axis(0), 1).to_owned();
        let mz = mu.index_axis(nd::Axis(0), 2).to_owned();
        let comm = mx.dot(&my) - my.dot(&mx);
        for (c, z) in comm.iter().zip(mz.iter()) {
            let expected = C64::new(0.0, -g) * z;
            assert_abs_diff_eq!(c.re, expected.re, epsilon = 1e-12);
            assert_abs_diff_eq!(c.im, expected.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn normalized_dipoles_give_unit_decay() {
        for (F, Fp) in [(0.0, 1.0), (1.0, 2.0), (2.0, 1.0), (1.5, 2.5)] {
            let d_q = dqij_two_bare_hyperfine(F, Fp, true);
            let (_, _, np) = d_q.dim();
            for j in 0..np {
                let rate: f64
                    = d_q.slice(ndarray::s![.., .., j])
                    .iter()
                    .map(|d| d.norm_sqr())
                    .sum();
                assert_abs_diff_eq!(rate, 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn polarization_selection_rule() {
        let d_q = dqij_two_bare_hyperfine(1.0, 2.0, false);
        for ((iq, i, j), d) in d_q.indexed_iter() {
            // m_F = i - 1, m_F' = j - 2, q = iq - 1
            let dm = (j as i32 - 2) - (i as i32 - 1);
            if d.norm() > 0.0 {
                assert_eq!(dm, iq as i32 - 1);
            }
        }
    }
}
