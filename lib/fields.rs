//! External field models driving the optical Bloch equations.
//!
//! Electric fields are given in spherical polarization components `q = -1, 0,
//! +1`; their gradients are `3 x 3` arrays indexed by `[axis][q]`. Magnetic
//! fields and their gradients are real and Cartesian, with gradients indexed
//! by `[axis][component]`.

use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::error::OResult;

/// A collection of laser beams addressing one transition.
pub trait LaserField {
    /// Number of beams.
    fn num_beams(&self) -> usize;

    /// Electric field of a single beam.
    fn beam_field(&self, beam: usize, r: [f64; 3], t: f64) -> [C64; 3];

    /// Gradient of the electric field of a single beam, indexed by
    /// `[axis][q]`.
    fn beam_field_gradient(&self, beam: usize, r: [f64; 3], t: f64)
        -> [[C64; 3]; 3];

    /// Total electric field of all beams.
    fn total_field(&self, r: [f64; 3], t: f64) -> [C64; 3] {
        let mut E = [C64::from(0.0); 3];
        for beam in 0..self.num_beams() {
            let Eb = self.beam_field(beam, r, t);
            E.iter_mut().zip(Eb).for_each(|(e, eb)| { *e += eb; });
        }
        E
    }

    /// Total electric field gradient of all beams.
    fn total_field_gradient(&self, r: [f64; 3], t: f64) -> [[C64; 3]; 3] {
        let mut dE = [[C64::from(0.0); 3]; 3];
        for beam in 0..self.num_beams() {
            let dEb = self.beam_field_gradient(beam, r, t);
            dE.iter_mut().flatten()
                .zip(dEb.iter().flatten())
                .for_each(|(e, eb)| { *e += eb; });
        }
        dE
    }
}

/// A static magnetic field.
pub trait MagneticField {
    /// Cartesian field at `r`.
    fn field(&self, r: [f64; 3]) -> [f64; 3];

    /// Cartesian gradient at `r`, indexed by `[axis][component]`.
    fn gradient(&self, r: [f64; 3]) -> [[f64; 3]; 3];
}

/// A rate-equation model, consulted for steady-state populations.
pub trait RateEquations {
    /// Steady-state populations of every internal state.
    fn steady_state_populations(&self, r: [f64; 3], v: [f64; 3], t: f64)
        -> OResult<nd::Array1<f64>>;
}

/// A single plane-wave beam
/// ```text
/// E(r, t) = ε sqrt(s / 2) exp(i (k·r - δ t + φ))
/// ```
/// with amplitudes normalized so that a unit dipole matrix element (unit decay
/// rate) sees saturation parameter `s = 2 Ω^2`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlaneWaveBeam {
    /// Wavevector.
    pub kvec: [f64; 3],
    /// Normalized polarization, spherical components.
    pub pol: [C64; 3],
    /// Saturation parameter.
    pub s: f64,
    /// Detuning.
    pub delta: f64,
    /// Phase offset.
    pub phase: f64,
}

impl PlaneWaveBeam {
    /// Create a new `PlaneWaveBeam` with zero phase. The polarization is
    /// normalized.
    pub fn new(kvec: [f64; 3], pol: [C64; 3], s: f64, delta: f64) -> Self {
        let norm = pol.iter().map(|p| p.norm_sqr()).sum::<f64>().sqrt();
        let pol
            = if norm > 0.0 { pol.map(|p| p / norm) } else { pol };
        Self { kvec, pol, s, delta, phase: 0.0 }
    }

    /// Set the phase offset.
    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }

    fn amplitude(&self, r: [f64; 3], t: f64) -> C64 {
        let kr: f64 = self.kvec.iter().zip(r).map(|(k, x)| k * x).sum();
        C64::cis(kr - self.delta * t + self.phase) * (self.s / 2.0).sqrt()
    }

    pub fn field(&self, r: [f64; 3], t: f64) -> [C64; 3] {
        let a = self.amplitude(r, t);
        self.pol.map(|p| p * a)
    }

    /// `∇E = i k ⊗ E`, indexed by `[axis][q]`.
    pub fn field_gradient(&self, r: [f64; 3], t: f64) -> [[C64; 3]; 3] {
        let E = self.field(r, t);
        self.kvec.map(|k| E.map(|e| C64::new(0.0, k) * e))
    }
}

/// A collection of [`PlaneWaveBeam`]s.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LaserBeams {
    beams: Vec<PlaneWaveBeam>,
}

impl LaserBeams {
    /// Create a new `LaserBeams`.
    pub fn new(beams: Vec<PlaneWaveBeam>) -> Self { Self { beams } }

    /// Create a pair of counter-propagating beams along `±kvec` with identical
    /// polarization components, saturation, and detuning.
    pub fn counterpropagating(
        kvec: [f64; 3],
        pol: [C64; 3],
        pol_rev: [C64; 3],
        s: f64,
        delta: f64,
    ) -> Self
    {
        Self::new(vec![
            PlaneWaveBeam::new(kvec, pol, s, delta),
            PlaneWaveBeam::new(kvec.map(|k| -k), pol_rev, s, delta),
        ])
    }

    pub fn beams(&self) -> &[PlaneWaveBeam] { &self.beams }
}

impl FromIterator<PlaneWaveBeam> for LaserBeams {
    fn from_iter<I>(iter: I) -> Self
    where I: IntoIterator<Item = PlaneWaveBeam>
    {
        Self::new(iter.into_iter().collect())
    }
}

impl LaserField for LaserBeams {
    fn num_beams(&self) -> usize { self.beams.len() }

    fn beam_field(&self, beam: usize, r: [f64; 3], t: f64) -> [C64; 3] {
        self.beams[beam].field(r, t)
    }

    fn beam_field_gradient(&self, beam: usize, r: [f64; 3], t: f64)
        -> [[C64; 3]; 3]
    {
        self.beams[beam].field_gradient(r, t)
    }
}

/// A spatially uniform magnetic field.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ConstantField(pub [f64; 3]);

impl MagneticField for ConstantField {
    fn field(&self, _r: [f64; 3]) -> [f64; 3] { self.0 }

    fn gradient(&self, _r: [f64; 3]) -> [[f64; 3]; 3] { [[0.0; 3]; 3] }
}

/// A linear quadrupole field `α (-x/2, -y/2, z)`, as in a
/// magneto-optical trap.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QuadrupoleField {
    pub alpha: f64,
}

impl MagneticField for QuadrupoleField {
    fn field(&self, r: [f64; 3]) -> [f64; 3] {
        [-0.5 * self.alpha * r[0], -0.5 * self.alpha * r[1], self.alpha * r[2]]
    }

    fn gradient(&self, _r: [f64; 3]) -> [[f64; 3]; 3] {
        [
            [-0.5 * self.alpha, 0.0, 0.0],
            [0.0, -0.5 * self.alpha, 0.0],
            [0.0, 0.0, self.alpha],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn plane_wave_gradient_matches_finite_difference() {
        let beam = PlaneWaveBeam::new(
            [0.3, -0.2, 1.0],
            [C64::from(1.0), C64::from(0.0), C64::new(0.0, 1.0)],
            2.0,
            -1.5,
        )
        .with_phase(0.4);
        let r = [0.1, 0.7, -0.3];
        let t = 2.3;
        let dE = beam.field_gradient(r, t);
        let h = 1e-6;
        for axis in 0..3 {
            let mut rp = r;
            let mut rm = r;
            rp[axis] += h;
            rm[axis] -= h;
            let Ep = beam.field(rp, t);
            let Em = beam.field(rm, t);
            for q in 0..3 {
                let fd = (Ep[q] - Em[q]) / (2.0 * h);
                assert_abs_diff_eq!(fd.re, dE[axis][q].re, epsilon = 1e-8);
                assert_abs_diff_eq!(fd.im, dE[axis][q].im, epsilon = 1e-8);
            }
        }
        // |E|^2 = s / 2
        let E = beam.field(r, t);
        let intensity: f64 = E.iter().map(|e| e.norm_sqr()).sum();
        assert_abs_diff_eq!(intensity, 1.0, epsilon = 1e-14);
    }

    #[test]
    fn counterpropagating_gradients_cancel_at_origin() {
        let pol = [C64::from(0.0), C64::from(1.0), C64::from(0.0)];
        let beams = LaserBeams::counterpropagating([0.0, 0.0, 1.0], pol, pol, 1.0, 0.0);
        assert_eq!(beams.num_beams(), 2);
        let dE = beams.total_field_gradient([0.0; 3], 0.0);
        assert!(dE.iter().flatten().all(|x| x.norm() < 1e-15));
        let E = beams.total_field([0.0; 3], 0.0);
        assert_abs_diff_eq!(E[1].re, 2.0 * 0.5_f64.sqrt(), epsilon = 1e-15);
    }

    #[test]
    fn quadrupole_is_divergence_free() {
        let B = QuadrupoleField { alpha: 2.0 };
        let dB = B.gradient([0.0; 3]);
        assert_abs_diff_eq!(dB[0][0] + dB[1][1] + dB[2][2], 0.0);
        assert_eq!(B.field([1.0, 2.0, 3.0]), [-1.0, -2.0, 6.0]);
    }
}
