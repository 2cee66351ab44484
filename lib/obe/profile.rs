//! Equilibrium force maps over position and velocity.

use std::{ f64::consts::TAU, fs::File, path::Path };
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{ self as nd, s };
use ndarray_npy::NpzWriter;
use crate::{
    config::EquilibriumConfig,
    density::DensityElem,
    error::{ ObeError, OResult },
    fields::{ LaserField, MagneticField },
};
use super::{ EquilibriumForce, EquilibriumState, Obe };

/// Equilibrium forces on the grid formed by every pair of a position and a
/// velocity.
#[derive(Clone, Debug, PartialEq)]
pub struct ForceProfile {
    /// Positions.
    pub R: Vec<[f64; 3]>,
    /// Velocities.
    pub V: Vec<[f64; 3]>,
    /// Total force, `3 x nr x nv`.
    pub F: nd::Array3<f64>,
    /// Per-beam force for each transition, `3 x nbeams x nr x nv`.
    pub f_laser: IndexMap<String, nd::Array4<f64>>,
    /// Per-beam, per-polarization force for each transition,
    /// `3 x 3 x nbeams x nr x nv`.
    pub f_laser_q: IndexMap<String, nd::Array5<f64>>,
    /// Iteration count of the equilibrium search at each grid point.
    pub iterations: nd::Array2<usize>,
    /// Whether the search converged at each grid point.
    pub converged: nd::Array2<bool>,
}

impl ForceProfile {
    /// Create a new, zeroed `ForceProfile` for the given coordinates and the
    /// number of beams addressing each transition.
    pub fn new<I>(R: Vec<[f64; 3]>, V: Vec<[f64; 3]>, num_beams: I) -> Self
    where I: IntoIterator<Item = (String, usize)>
    {
        let nr = R.len();
        let nv = V.len();
        let mut f_laser: IndexMap<String, nd::Array4<f64>> = IndexMap::new();
        let mut f_laser_q: IndexMap<String, nd::Array5<f64>> = IndexMap::new();
        for (key, nb) in num_beams.into_iter() {
            f_laser.insert(key.clone(), nd::Array4::zeros((3, nb, nr, nv)));
            f_laser_q.insert(key, nd::Array5::zeros((3, 3, nb, nr, nv)));
        }
        Self {
            R,
            V,
            F: nd::Array3::zeros((3, nr, nv)),
            f_laser,
            f_laser_q,
            iterations: nd::Array2::zeros((nr, nv)),
            converged: nd::Array2::from_elem((nr, nv), false),
        }
    }

    /// Shape of the grid, `(nr, nv)`.
    pub fn shape(&self) -> (usize, usize) { (self.R.len(), self.V.len()) }

    /// Iterate over every grid point as `((ir, iv), r, v)`.
    pub fn grid(&self)
        -> impl Iterator<Item = ((usize, usize), [f64; 3], [f64; 3])> + '_
    {
        self.R.iter().enumerate()
            .cartesian_product(self.V.iter().enumerate())
            .map(|((ir, r), (iv, v))| ((ir, iv), *r, *v))
    }

    /// Record the equilibrium force found at grid point `(ir, iv)`.
    ///
    /// Breakdowns for transitions not present in the profile are ignored.
    pub fn store_data(&mut self, (ir, iv): (usize, usize), force: &EquilibriumForce) {
        self.F.slice_mut(s![.., ir, iv]).assign(&nd::arr1(&force.f));
        for (key, fb) in force.f_laser.iter() {
            if let Some(target) = self.f_laser.get_mut(key) {
                target.slice_mut(s![.., .., ir, iv])
                    .zip_mut_with(fb, |t, f| { *t = *f; });
            }
        }
        for (key, fq) in force.f_laser_q.iter() {
            if let Some(target) = self.f_laser_q.get_mut(key) {
                target.slice_mut(s![.., .., .., ir, iv])
                    .zip_mut_with(fq, |t, f| { *t = *f; });
            }
        }
        self.iterations[[ir, iv]] = force.iterations;
        self.converged[[ir, iv]] = force.state == EquilibriumState::Converged;
    }

    /// Write all arrays to a `.npz` archive.
    ///
    /// Per-transition arrays are stored as `f_laser_<key>` and
    /// `f_laser_q_<key>`.
    pub fn save_npz<P>(&self, path: P) -> OResult<()>
    where P: AsRef<Path>
    {
        let coords = |X: &[[f64; 3]]| -> nd::Array2<f64> {
            nd::Array2::from_shape_fn((X.len(), 3), |(i, a)| X[i][a])
        };
        let mut npz = NpzWriter::new(File::create(path)?);
        npz.add_array("R", &coords(&self.R))?;
        npz.add_array("V", &coords(&self.V))?;
        npz.add_array("F", &self.F)?;
        npz.add_array("iterations", &self.iterations.mapv(|n| n as u64))?;
        npz.add_array("converged", &self.converged)?;
        for (key, fb) in self.f_laser.iter() {
            npz.add_array(format!("f_laser_{key}"), fb)?;
        }
        for (key, fq) in self.f_laser_q.iter() {
            npz.add_array(format!("f_laser_q_{key}"), fq)?;
        }
        npz.finish()?;
        Ok(())
    }
}

/// Source of the initial density at each grid point.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum InitialRho {
    /// Steady-state populations of the attached rate-equation model.
    #[default]
    RateEq,
    /// Uniform population over the lowest manifold.
    Equally,
}

/// Options for [`Obe::generate_force_profile`].
///
/// If `deltat_v` is given, the window length at velocity `v` is
/// `min(2π deltat_v / |v|, deltat_tmax)`; if `deltat_r` is given, it is
/// `min(2π deltat_r / |r|, deltat_tmax)` and takes precedence. Otherwise the
/// window length of `equilibrium` is used.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileOptions {
    pub initial_rho: InitialRho,
    pub deltat_r: Option<f64>,
    pub deltat_v: Option<f64>,
    pub deltat_tmax: f64,
    pub equilibrium: EquilibriumConfig,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            initial_rho: InitialRho::default(),
            deltat_r: None,
            deltat_v: None,
            deltat_tmax: f64::INFINITY,
            equilibrium: EquilibriumConfig::default(),
        }
    }
}

impl ProfileOptions {
    /// Equilibrium search parameters at grid point `(r, v)`.
    pub fn config_at(&self, r: [f64; 3], v: [f64; 3]) -> EquilibriumConfig {
        let norm = |x: [f64; 3]| x.iter().map(|xk| xk * xk).sum::<f64>().sqrt();
        let scaled = |scale: f64, mag: f64| -> f64 {
            if mag == 0.0 {
                self.deltat_tmax
            } else {
                (TAU * scale / mag).min(self.deltat_tmax)
            }
        };
        let mut config = self.equilibrium.clone();
        if let Some(dv) = self.deltat_v {
            config.deltat = scaled(dv, norm(v));
        }
        if let Some(dr) = self.deltat_r {
            config.deltat = scaled(dr, norm(r));
        }
        config
    }
}

impl<'a, T, L, M> Obe<'a, T, L, M>
where
    T: DensityElem,
    L: LaserField,
    M: MagneticField,
{
    /// Map the equilibrium force over every pair of a position in `R` and a
    /// velocity in `V`, storing the result under `name`.
    pub fn generate_force_profile(
        &mut self,
        name: &str,
        R: Vec<[f64; 3]>,
        V: Vec<[f64; 3]>,
        opts: &ProfileOptions,
    ) -> OResult<&ForceProfile>
    {
        let num_beams
            = self.lasers.iter()
            .map(|(key, beams)| (key.clone(), beams.num_beams()));
        let mut profile = ForceProfile::new(R, V, num_beams);
        let points: Vec<_> = profile.grid().collect();
        tracing::info!(name, points = points.len(), "generating force profile");

        for (idx, r, v) in points.into_iter() {
            self.set_initial_position_and_velocity(r, v);
            match opts.initial_rho {
                InitialRho::RateEq => self.set_initial_rho_from_rateeq()?,
                InitialRho::Equally => self.set_initial_rho_equally()?,
            }
            let config = opts.config_at(r, v);
            if !config.deltat.is_finite() {
                return Err(ObeError::InitialCondition(format!(
                    "window length is unbounded at r = {r:?}, v = {v:?}; set deltat_tmax"
                )));
            }
            let force = self.find_equilibrium_force(&config)?;
            profile.store_data(idx, &force);
        }

        self.profiles.insert(name.to_string(), profile);
        self.profile(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn grid_is_cross_product() {
        let profile = ForceProfile::new(
            vec![[0.0; 3], [1.0, 0.0, 0.0]],
            vec![[0.0; 3], [0.0, 0.0, 1.0], [0.0, 0.0, 2.0]],
            [("g->e".to_string(), 2)],
        );
        assert_eq!(profile.shape(), (2, 3));
        let points: Vec<_> = profile.grid().collect();
        assert_eq!(points.len(), 6);
        assert_eq!(points[0], ((0, 0), [0.0; 3], [0.0; 3]));
        assert_eq!(points[4], ((1, 1), [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]));
        assert_eq!(profile.f_laser["g->e"].dim(), (3, 2, 2, 3));
        assert_eq!(profile.f_laser_q["g->e"].dim(), (3, 3, 2, 2, 3));
    }

    #[test]
    fn store_data_fills_one_cell() {
        let mut profile = ForceProfile::new(
            vec![[0.0; 3]],
            vec![[0.0; 3], [1.0, 0.0, 0.0]],
            [("g->e".to_string(), 2)],
        );
        let force = EquilibriumForce {
            f: [1.0, 2.0, 3.0],
            f_laser: [(
                "g->e".to_string(),
                nd::array![[0.5, 0.5], [1.0, 1.0], [1.0, 2.0]],
            )].into_iter().collect(),
            f_laser_q: [(
                "g->e".to_string(),
                nd::Array3::from_elem((3, 3, 2), 0.25),
            )].into_iter().collect(),
            f_mag: None,
            iterations: 7,
            state: EquilibriumState::Converged,
        };
        profile.store_data((0, 1), &force);
        assert_eq!(profile.F[[2, 0, 1]], 3.0);
        assert_eq!(profile.F[[2, 0, 0]], 0.0);
        assert_eq!(profile.f_laser["g->e"][[2, 1, 0, 1]], 2.0);
        assert_eq!(profile.f_laser_q["g->e"][[1, 2, 1, 0, 1]], 0.25);
        assert_eq!(profile.iterations[[0, 1]], 7);
        assert!(profile.converged[[0, 1]]);
        assert!(!profile.converged[[0, 0]]);
    }

    #[test]
    fn window_length_scaling() {
        let opts = ProfileOptions {
            deltat_v: Some(2.0),
            deltat_tmax: 100.0,
            ..ProfileOptions::default()
        };
        let config = opts.config_at([0.0; 3], [0.0, 3.0, 4.0]);
        assert_abs_diff_eq!(config.deltat, TAU * 2.0 / 5.0, epsilon = 1e-14);
        let config = opts.config_at([0.0; 3], [0.0; 3]);
        assert_eq!(config.deltat, 100.0);
        let config = ProfileOptions::default().config_at([1.0; 3], [1.0; 3]);
        assert_eq!(config.deltat, EquilibriumConfig::default().deltat);
    }
}
