//! Optical Bloch equations for a single particle.
//!
//! An [`Obe`] pairs a precomputed [`OperatorSet`] with laser and magnetic
//! field models, evaluates the density-matrix derivative, and integrates it
//! together with the particle's classical motion. The integrated state vector
//! is laid out as `[ρ, v, r]`: the flattened density vector followed by the
//! three Cartesian components of velocity and then of position.

use std::ops::Range;
use indexmap::IndexMap;
use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use rustc_hash::FxHashMap;
use crate::{
    config::ObeConfig,
    density::DensityElem,
    error::{ ObeError, OResult },
    fields::{ LaserField, MagneticField, RateEquations },
    liouville::{ LiouvilleBuilder, OperatorSet },
    ode::{ DormandPrince, OdeSolution, OdeSolver },
    spherical::cart2spherical,
};

pub mod force;
pub use force::TrajectoryForce;

pub mod equilibrium;
pub use equilibrium::{ EquilibriumForce, EquilibriumIterator, EquilibriumState };

pub mod profile;
pub use profile::{ ForceProfile, InitialRho, ProfileOptions };

/// Global state ranges of the two manifolds coupled by a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Coupling {
    pub(crate) from: Range<usize>,
    pub(crate) to: Range<usize>,
}

/// Optical Bloch equations driven by a set of laser beams per transition and a
/// static magnetic field.
///
/// The operator set and field models are borrowed immutably and may be shared
/// between any number of `Obe`s; the initial conditions, the last computed
/// trajectory, and any force profiles are owned per instance.
pub struct Obe<'a, T, L, M>
where
    T: DensityElem,
    L: LaserField,
    M: MagneticField,
{
    ops: &'a OperatorSet<T>,
    lasers: &'a IndexMap<String, L>,
    magfield: &'a M,
    rateeq: Option<&'a dyn RateEquations>,
    couplings: IndexMap<String, Coupling>,
    config: ObeConfig,
    solver: DormandPrince,
    r0: [f64; 3],
    v0: [f64; 3],
    rho0: Option<nd::Array1<T>>,
    sol: Option<OdeSolution<T>>,
    profiles: IndexMap<String, ForceProfile>,
}

impl<'a, T, L, M> Obe<'a, T, L, M>
where
    T: DensityElem,
    L: LaserField,
    M: MagneticField,
{
    /// Create a new `Obe`.
    ///
    /// Every key of `lasers` must name a transition of the Hamiltonian from
    /// which `ops` was built.
    pub fn new(
        ops: &'a OperatorSet<T>,
        lasers: &'a IndexMap<String, L>,
        magfield: &'a M,
        config: ObeConfig,
    ) -> OResult<Self>
    {
        config.validate()?;
        let hamiltonian = ops.hamiltonian();
        let mut couplings: IndexMap<String, Coupling> = IndexMap::new();
        for key in lasers.keys() {
            if ops.field(key).is_none() {
                return Err(ObeError::UnknownTransition(key.clone()));
            }
            let (from, to) = hamiltonian.transition(key)?;
            couplings.insert(
                key.clone(), Coupling { from: from.states(), to: to.states() });
        }
        let solver = DormandPrince::from_config(&config.integrator);
        Ok(Self {
            ops,
            lasers,
            magfield,
            rateeq: None,
            couplings,
            config,
            solver,
            r0: [0.0; 3],
            v0: [0.0; 3],
            rho0: None,
            sol: None,
            profiles: IndexMap::new(),
        })
    }

    /// Attach a rate-equation model, used as a source of initial conditions.
    pub fn with_rate_equations(mut self, rateeq: &'a dyn RateEquations) -> Self {
        self.rateeq = Some(rateeq);
        self
    }

    pub fn operators(&self) -> &OperatorSet<T> { self.ops }

    pub fn lasers(&self) -> &IndexMap<String, L> { self.lasers }

    pub fn magfield(&self) -> &M { self.magfield }

    pub fn config(&self) -> &ObeConfig { &self.config }

    /// Number of internal states.
    pub fn num_states(&self) -> usize { self.ops.num_states() }

    /// Length of the flattened density vector.
    pub fn density_len(&self) -> usize { self.ops.density_len() }

    pub fn initial_position(&self) -> [f64; 3] { self.r0 }

    pub fn initial_velocity(&self) -> [f64; 3] { self.v0 }

    pub fn initial_rho(&self) -> Option<&nd::Array1<T>> { self.rho0.as_ref() }

    /// Return the last computed trajectory, if any.
    pub fn solution(&self) -> Option<&OdeSolution<T>> { self.sol.as_ref() }

    pub(crate) fn couplings(&self) -> &IndexMap<String, Coupling> {
        &self.couplings
    }

    pub fn set_initial_position(&mut self, r0: [f64; 3]) {
        self.r0 = r0;
        self.sol = None;
    }

    pub fn set_initial_velocity(&mut self, v0: [f64; 3]) {
        self.v0 = v0;
        self.sol = None;
    }

    pub fn set_initial_position_and_velocity(&mut self, r0: [f64; 3], v0: [f64; 3]) {
        self.set_initial_position(r0);
        self.set_initial_velocity(v0);
    }

    /// Set the initial density vector directly.
    pub fn set_initial_rho(&mut self, rho0: nd::Array1<T>) -> OResult<()> {
        let len = self.density_len();
        ObeError::check_initial(
            rho0.len() == len,
            || format!("density vector must have length {}; got {}", len, rho0.len()),
        )?;
        ObeError::check_initial(
            rho0.iter().all(|x| x.re().is_finite() && x.im().is_finite()),
            || "density vector contains non-finite entries".to_string(),
        )?;
        self.rho0 = Some(rho0);
        self.sol = None;
        Ok(())
    }

    /// Set the initial density from a complex `N x N` density matrix.
    pub fn set_initial_rho_from_matrix<S>(&mut self, rho0: &nd::ArrayBase<S, nd::Ix2>)
        -> OResult<()>
    where S: nd::Data<Elem = C64>
    {
        let n = self.num_states();
        ObeError::check_initial(
            rho0.dim() == (n, n),
            || format!("density matrix must have shape ({n}, {n}); got {:?}", rho0.dim()),
        )?;
        self.set_initial_rho(T::flatten(rho0))
    }

    /// Set the initial density to a diagonal distribution of populations,
    /// normalized to unit trace.
    pub fn set_initial_rho_from_populations(&mut self, pops: &[f64]) -> OResult<()> {
        let n = self.num_states();
        ObeError::check_initial(
            pops.len() == n,
            || format!("expected {} populations; got {}", n, pops.len()),
        )?;
        ObeError::check_initial(
            pops.iter().all(|p| p.is_finite()),
            || "populations contain non-finite entries".to_string(),
        )?;
        let total: f64 = pops.iter().sum();
        ObeError::check_initial(
            total > 0.0,
            || format!("populations must have positive sum; got {total}"),
        )?;
        let rho: nd::Array2<C64>
            = nd::Array2::from_diag(
                &pops.iter().map(|p| C64::from(p / total)).collect::<nd::Array1<C64>>());
        self.set_initial_rho_from_matrix(&rho)
    }

    /// Set the initial density to a uniform distribution over the lowest
    /// manifold.
    pub fn set_initial_rho_equally(&mut self) -> OResult<()> {
        let n = self.num_states();
        let ground
            = self.ops.hamiltonian().manifolds().first()
            .map(|man| man.states())
            .ok_or_else(|| {
                ObeError::InitialCondition("hamiltonian has no manifolds".to_string())
            })?;
        let pops: Vec<f64>
            = (0..n).map(|i| if ground.contains(&i) { 1.0 } else { 0.0 }).collect();
        self.set_initial_rho_from_populations(&pops)
    }

    /// Set the initial density to the steady-state populations of the attached
    /// rate-equation model at the current initial position and velocity.
    pub fn set_initial_rho_from_rateeq(&mut self) -> OResult<()> {
        let rateeq = self.rateeq.ok_or(ObeError::MissingRateModel)?;
        let pops = rateeq.steady_state_populations(self.r0, self.v0, 0.0)?;
        self.set_initial_rho_from_populations(&pops.to_vec())
    }

    /// Compute `dρ/dt` at position `r` and time `t`.
    ///
    /// Field components whose magnitude falls below the configured threshold
    /// are skipped.
    pub fn derivative<S>(&self, r: [f64; 3], t: f64, rho: &nd::ArrayBase<S, nd::Ix1>)
        -> nd::Array1<T>
    where S: nd::Data<Elem = T>
    {
        let thresh = self.config.field_threshold;
        let mut drho = self.ops.decay().apply(rho);
        self.ops.H0().scaled_add_apply(T::one(), rho, &mut drho);

        let B = self.magfield.field(r);
        if B.iter().any(|b| b.abs() > thresh) {
            let w = T::magnetic_weights(B);
            for (op, wq) in self.ops.B().iter().zip(w) {
                if wq.abs() > thresh {
                    op.scaled_add_apply(wq, rho, &mut drho);
                }
            }
        }

        let half = T::from_real(-0.5);
        for (key, beams) in self.lasers.iter() {
            let Some(ops) = self.ops.field(key) else { continue; };
            let E = beams.total_field(r, t);
            for (q, Eq) in E.into_iter().enumerate() {
                if Eq.norm() <= thresh { continue; }
                let (w0, w1) = T::field_weights(Eq);
                ops.d[q].scaled_add_apply(half * w0, rho, &mut drho);
                ops.d_conj[q].scaled_add_apply(half * w1, rho, &mut drho);
            }
        }
        drho
    }

    /// Assemble the full generator at position `r` and time `t` from the
    /// operator set, such that `dρ/dt = G ρ`.
    pub fn generator(&self, r: [f64; 3], t: f64) -> nd::Array2<T> {
        let thresh = self.config.field_threshold;
        let mut G = self.ops.decay().to_dense();
        self.ops.H0().scaled_add_into(T::one(), &mut G);
        let w = T::magnetic_weights(self.magfield.field(r));
        for (op, wq) in self.ops.B().iter().zip(w) {
            if wq.abs() > thresh {
                op.scaled_add_into(wq, &mut G);
            }
        }
        let half = T::from_real(-0.5);
        for (key, beams) in self.lasers.iter() {
            let Some(ops) = self.ops.field(key) else { continue; };
            for (q, Eq) in beams.total_field(r, t).into_iter().enumerate() {
                if Eq.norm() <= thresh { continue; }
                let (w0, w1) = T::field_weights(Eq);
                ops.d[q].scaled_add_into(half * w0, &mut G);
                ops.d_conj[q].scaled_add_into(half * w1, &mut G);
            }
        }
        G
    }

    /// Rebuild the full generator at position `r` and time `t` directly from
    /// the instantaneous Hamiltonian, bypassing the operator set.
    pub fn generator_from_scratch(&self, r: [f64; 3], t: f64)
        -> OResult<nd::Array2<T>>
    {
        let hamiltonian = self.ops.hamiltonian();
        let builder = LiouvilleBuilder::new(hamiltonian);
        let Bq = cart2spherical(self.magfield.field(r));
        let E: FxHashMap<String, [C64; 3]>
            = self.lasers.iter()
            .map(|(key, beams)| (key.clone(), beams.total_field(r, t)))
            .collect();
        let H = hamiltonian.evaluate(Bq, E)?;
        let M = builder.coherent_submatrix(&H) + builder.decay_submatrix()?;
        Ok(T::convert_generator(M, &builder)?)
    }

    // derivative of the full state vector [ρ, v, r]; if `couple`, the velocity
    // is driven by the instantaneous force
    fn motion_derivative(&self, t: f64, y: nd::ArrayView1<T>, couple: bool)
        -> nd::Array1<T>
    {
        let nn = self.density_len();
        let rho = y.slice(s![..nn]);
        let v: [f64; 3] = [0, 1, 2].map(|a| y[nn + a].re());
        let r: [f64; 3] = [0, 1, 2].map(|a| y[nn + 3 + a].re());
        let mut dy: nd::Array1<T> = nd::Array1::zeros(nn + 6);
        dy.slice_mut(s![..nn]).assign(&self.derivative(r, t, &rho));
        if couple {
            let mass = self.ops.hamiltonian().mass();
            let f = self.force_from_state(r, t, &rho);
            for a in 0..3 {
                dy[nn + a] = T::from_real(f[a] / mass);
            }
        }
        for a in 0..3 {
            dy[nn + 3 + a] = T::from_real(v[a]);
        }
        dy
    }

    fn initial_state(&self) -> OResult<nd::Array1<T>> {
        let rho0
            = self.rho0.as_ref()
            .ok_or_else(|| {
                ObeError::InitialCondition("initial density not set".to_string())
            })?;
        let y0: nd::Array1<T>
            = rho0.iter().copied()
            .chain(self.v0.iter().map(|v| T::from_real(*v)))
            .chain(self.r0.iter().map(|r| T::from_real(*r)))
            .collect();
        Ok(y0)
    }

    fn integrate(&mut self, t_span: (f64, f64), t_eval: Option<&[f64]>, couple: bool)
        -> OResult<&OdeSolution<T>>
    {
        let y0 = self.initial_state()?;
        let solver = self.solver;
        let sol
            = solver.solve(
                |t, y| self.motion_derivative(t, y, couple),
                t_span,
                y0,
                t_eval,
            )?;
        tracing::trace!(
            t0 = t_span.0,
            t1 = t_span.1,
            samples = sol.len(),
            nfev = sol.nfev,
            "integrated optical Bloch equations"
        );
        Ok(self.sol.insert(sol))
    }

    /// Integrate the density matrix over `t_span` at constant velocity,
    /// storing the trajectory.
    pub fn evolve_density(&mut self, t_span: (f64, f64), t_eval: Option<&[f64]>)
        -> OResult<&OdeSolution<T>>
    {
        self.integrate(t_span, t_eval, false)
    }

    /// Integrate the density matrix over `t_span` with position and velocity
    /// driven by the instantaneous force, storing the trajectory.
    pub fn evolve_motion(&mut self, t_span: (f64, f64), t_eval: Option<&[f64]>)
        -> OResult<&OdeSolution<T>>
    {
        self.integrate(t_span, t_eval, true)
    }

    /// Unpack the stored trajectory into times, complex density matrices
    /// (`N x N x nt`), positions (`3 x nt`), and velocities (`3 x nt`).
    pub fn reshape_sol(&self)
        -> OResult<(nd::Array1<f64>, nd::Array3<C64>, nd::Array2<f64>, nd::Array2<f64>)>
    {
        let sol = self.sol.as_ref().ok_or(ObeError::NoTrajectory)?;
        let n = self.num_states();
        let nn = self.density_len();
        let nt = sol.len();
        let mut rho: nd::Array3<C64> = nd::Array3::zeros((n, n, nt));
        for (k, y) in sol.y.columns().into_iter().enumerate() {
            rho.slice_mut(s![.., .., k])
                .assign(&T::unflatten(&y.slice(s![..nn]), n));
        }
        let v = sol.y.slice(s![nn..nn + 3, ..]).mapv(|x| x.re());
        let r = sol.y.slice(s![nn + 3..nn + 6, ..]).mapv(|x| x.re());
        Ok((sol.t.clone(), rho, r, v))
    }

    /// Return a force profile computed by
    /// [`generate_force_profile`][Self::generate_force_profile].
    pub fn profile(&self, name: &str) -> OResult<&ForceProfile> {
        self.profiles.get(name)
            .ok_or_else(|| ObeError::UnknownProfile(name.to_string()))
    }

    pub fn profiles(&self) -> &IndexMap<String, ForceProfile> { &self.profiles }
}
