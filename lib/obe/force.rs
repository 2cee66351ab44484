//! Radiative and magnetic forces.
//!
//! The force on the particle is `F = -Tr(ρ ∇H)`. For a transition with dipole
//! operator `d_q` coupling manifolds `a -> b`, the electric contribution along
//! axis `x` is
//! ```text
//! F_x = Σ_q Σ_{i ∈ a, j ∈ b} Re[ conj(∂_x E_q) d_q[i, j] ρ[j, i] ]
//! ```
//! and the magnetic contribution, if enabled, is
//! ```text
//! F_x = Σ_q Re[ conj(∂_x B_q) Σ_{i <= j} w_ij μ_q[i, j] ρ[j, i] ]
//! ```
//! with `w_ii = 1` and `w_ij = 2` for `i < j`, restricted to pairs within a
//! single manifold.

use indexmap::IndexMap;
use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use crate::{
    density::DensityElem,
    error::{ ObeError, OResult },
    fields::{ LaserField, MagneticField },
    spherical::zeeman_gradient_weights,
};
use super::Obe;

/// Forces over a stored trajectory, with time along the last axis.
#[derive(Clone, Debug, PartialEq)]
pub struct TrajectoryForce {
    /// Sample times.
    pub t: nd::Array1<f64>,
    /// Total force, `3 x nt`.
    pub f: nd::Array2<f64>,
    /// Per-beam force for each transition, `3 x nbeams x nt`.
    pub f_laser: IndexMap<String, nd::Array3<f64>>,
    /// Per-beam, per-polarization force for each transition,
    /// `3 x 3 x nbeams x nt` (axis, q, beam, time).
    pub f_laser_q: IndexMap<String, nd::Array4<f64>>,
    /// Magnetic force, `3 x nt`, if enabled.
    pub f_mag: Option<nd::Array2<f64>>,
}

impl<'a, T, L, M> Obe<'a, T, L, M>
where
    T: DensityElem,
    L: LaserField,
    M: MagneticField,
{
    // Σ_{i ∈ from, j ∈ to} d_q[i, j] ρ[j, i] for each q
    fn dipole_coherences<S>(&self, key: &str, rho: &nd::ArrayBase<S, nd::Ix1>)
        -> [C64; 3]
    where S: nd::Data<Elem = T>
    {
        let n = self.num_states();
        let full = self.ops.hamiltonian().assemble();
        let (Some(coupling), Some(d_q)) = (self.couplings.get(key), full.d_q_bare.get(key))
            else { return [C64::from(0.0); 3]; };
        let mut c = [C64::from(0.0); 3];
        for i in coupling.from.clone() {
            for j in coupling.to.clone() {
                let rho_ji = T::element(rho, n, j, i);
                for (q, cq) in c.iter_mut().enumerate() {
                    let d = d_q[[q, i, j]];
                    if d != C64::from(0.0) {
                        *cq += d * rho_ji;
                    }
                }
            }
        }
        c
    }

    // Σ_{i <= j} w_ij μ_q[i, j] ρ[j, i] over all manifolds, for each q
    fn magnetic_coherences<S>(&self, rho: &nd::ArrayBase<S, nd::Ix1>) -> [C64; 3]
    where S: nd::Data<Elem = T>
    {
        let n = self.num_states();
        let hamiltonian = self.ops.hamiltonian();
        let mu_q = &hamiltonian.assemble().mu_q;
        let mut c = [C64::from(0.0); 3];
        for man in hamiltonian.manifolds().iter() {
            for i in man.states() {
                for j in i..man.offset() + man.dim() {
                    let w = if i == j { 1.0 } else { 2.0 };
                    let rho_ji = T::element(rho, n, j, i);
                    for (q, cq) in c.iter_mut().enumerate() {
                        *cq += w * mu_q[[q, i, j]] * rho_ji;
                    }
                }
            }
        }
        c
    }

    fn magnetic_force_from_coherences(&self, r: [f64; 3], c: &[C64; 3]) -> [f64; 3] {
        let w = zeeman_gradient_weights(self.magfield.gradient(r));
        [0, 1, 2].map(|axis| {
            (0..3).map(|q| (w[axis][q] * c[q]).re).sum()
        })
    }

    /// Compute the instantaneous force for density vector `rho` at position
    /// `r` and time `t`.
    pub fn force_from_state<S>(&self, r: [f64; 3], t: f64, rho: &nd::ArrayBase<S, nd::Ix1>)
        -> [f64; 3]
    where S: nd::Data<Elem = T>
    {
        let mut f = [0.0; 3];
        for (key, beams) in self.lasers.iter() {
            let c = self.dipole_coherences(key, rho);
            let dE = beams.total_field_gradient(r, t);
            for (axis, fa) in f.iter_mut().enumerate() {
                *fa += (0..3)
                    .map(|q| (dE[axis][q].conj() * c[q]).re)
                    .sum::<f64>();
            }
        }
        if self.config.include_mag_forces {
            let c = self.magnetic_coherences(rho);
            let fm = self.magnetic_force_from_coherences(r, &c);
            f.iter_mut().zip(fm).for_each(|(fa, fma)| { *fa += fma; });
        }
        f
    }

    /// Compute forces over the stored trajectory, broken down per transition,
    /// beam, and polarization component.
    pub fn force_from_trajectory(&self) -> OResult<TrajectoryForce> {
        let sol = self.sol.as_ref().ok_or(ObeError::NoTrajectory)?;
        let nn = self.density_len();
        let nt = sol.len();
        let mut f: nd::Array2<f64> = nd::Array2::zeros((3, nt));
        let mut f_laser: IndexMap<String, nd::Array3<f64>> = IndexMap::new();
        let mut f_laser_q: IndexMap<String, nd::Array4<f64>> = IndexMap::new();
        let mut f_mag: Option<nd::Array2<f64>>
            = self.config.include_mag_forces.then(|| nd::Array2::zeros((3, nt)));

        for (key, beams) in self.lasers.iter() {
            let nbeams = beams.num_beams();
            let mut fq: nd::Array4<f64> = nd::Array4::zeros((3, 3, nbeams, nt));
            for (k, (&t, y)) in sol.t.iter().zip(sol.y.columns()).enumerate() {
                let rho = y.slice(s![..nn]);
                let r: [f64; 3] = [0, 1, 2].map(|a| y[nn + 3 + a].re());
                let c = self.dipole_coherences(key, &rho);
                for b in 0..nbeams {
                    let dE = beams.beam_field_gradient(b, r, t);
                    for axis in 0..3 {
                        for q in 0..3 {
                            fq[[axis, q, b, k]] = (dE[axis][q].conj() * c[q]).re;
                        }
                    }
                }
            }
            let fb = fq.sum_axis(nd::Axis(1));
            f += &fb.sum_axis(nd::Axis(1));
            f_laser.insert(key.clone(), fb);
            f_laser_q.insert(key.clone(), fq);
        }

        if let Some(fm) = f_mag.as_mut() {
            for (k, y) in sol.y.columns().into_iter().enumerate() {
                let rho = y.slice(s![..nn]);
                let r: [f64; 3] = [0, 1, 2].map(|a| y[nn + 3 + a].re());
                let c = self.magnetic_coherences(&rho);
                let fmk = self.magnetic_force_from_coherences(r, &c);
                for axis in 0..3 {
                    fm[[axis, k]] = fmk[axis];
                }
            }
            f += &*fm;
        }

        Ok(TrajectoryForce { t: sol.t.clone(), f, f_laser, f_laser_q, f_mag })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use crate::{
        config::ObeConfig,
        fields::{ ConstantField, LaserBeams },
        liouville::OperatorSet,
    };
    use super::*;
    use super::super::tests::{ pi_beam, two_level };

    #[test]
    fn two_level_force_along_k() {
        let H = two_level();
        let ops: OperatorSet<C64> = OperatorSet::new(&H, &ObeConfig::default()).unwrap();
        let s = 2.0;
        let lasers: IndexMap<String, LaserBeams>
            = [("g->e".to_string(), LaserBeams::new(vec![pi_beam(1.0, s)]))]
            .into_iter().collect();
        let B = ConstantField::default();
        let obe = Obe::new(&ops, &lasers, &B, ObeConfig::default()).unwrap();

        // analytic steady state on resonance: ρ_eg = i E (ρ_gg - ρ_ee)
        let rho_ee = s / (2.0 * (1.0 + s));
        let E = (s / 2.0).sqrt();
        let mut rho: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        rho[[0, 0]] = C64::from(1.0 - rho_ee);
        rho[[1, 1]] = C64::from(rho_ee);
        rho[[1, 0]] = C64::new(0.0, E * (1.0 - 2.0 * rho_ee));
        rho[[0, 1]] = rho[[1, 0]].conj();
        let rho = C64::flatten(&rho);

        let drho = obe.derivative([0.0; 3], 0.0, &rho);
        assert!(drho.iter().all(|x| x.norm() < 1e-14));
        let f = obe.force_from_state([0.0; 3], 0.0, &rho);
        assert_abs_diff_eq!(f[0], 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(f[1], 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(f[2], rho_ee, epsilon = 1e-14);
    }

    // a field model with a fixed, arbitrary gradient and no field
    struct FixedGradient([[C64; 3]; 3]);

    impl LaserField for FixedGradient {
        fn num_beams(&self) -> usize { 1 }

        fn beam_field(&self, _beam: usize, _r: [f64; 3], _t: f64) -> [C64; 3] {
            [C64::from(0.0); 3]
        }

        fn beam_field_gradient(&self, _beam: usize, _r: [f64; 3], _t: f64)
            -> [[C64; 3]; 3]
        {
            self.0
        }
    }

    #[test]
    fn gradient_contraction_with_user_field_model() {
        let H = two_level();
        let ops: OperatorSet<C64> = OperatorSet::new(&H, &ObeConfig::default()).unwrap();
        let dE = [
            [C64::new(0.0, 1.0), C64::new(0.5, -0.2), C64::from(0.0)],
            [C64::from(0.0), C64::new(-1.0, 0.3), C64::from(2.0)],
            [C64::from(1.0), C64::new(0.0, 2.0), C64::from(0.0)],
        ];
        let lasers: IndexMap<String, FixedGradient>
            = [("g->e".to_string(), FixedGradient(dE))].into_iter().collect();
        let B = ConstantField::default();
        let mut obe = Obe::new(&ops, &lasers, &B, ObeConfig::default()).unwrap();

        let rho_eg = C64::new(0.1, 0.2);
        let mut rho: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        rho[[0, 0]] = C64::from(0.7);
        rho[[1, 1]] = C64::from(0.3);
        rho[[1, 0]] = rho_eg;
        rho[[0, 1]] = rho_eg.conj();
        let rho = C64::flatten(&rho);

        // only the q = 0 component couples g -> e
        let f = obe.force_from_state([0.0; 3], 0.0, &rho);
        for (axis, fa) in f.iter().enumerate() {
            assert_abs_diff_eq!(*fa, (dE[axis][1].conj() * rho_eg).re, epsilon = 1e-15);
        }

        obe.set_initial_rho(rho).unwrap();
        obe.evolve_density((0.0, 1.0), Some(&[0.0, 1.0])).unwrap();
        let tf = obe.force_from_trajectory().unwrap();
        for (axis, fa) in f.iter().enumerate() {
            assert_abs_diff_eq!(tf.f[[axis, 0]], *fa, epsilon = 1e-15);
            assert_abs_diff_eq!(tf.f_laser_q["g->e"][[axis, 1, 0, 0]], *fa, epsilon = 1e-15);
        }
    }
}
