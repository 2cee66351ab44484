//! Iterative search for the equilibrium radiative force.
//!
//! The density matrix is integrated over successive fixed-length windows at
//! constant velocity. After each window the time-averaged force is compared to
//! that of the previous window; the search stops once the squared change
//! `d2 = |F_new - F_old|^2` satisfies `d2 / |F_new|^2 < rel` or `d2 < abs`, or
//! once the window budget is spent. Each new window is seeded with the final
//! density, position, and velocity of the last.

use indexmap::IndexMap;
use ndarray::{ self as nd, s };
use crate::{
    config::EquilibriumConfig,
    density::DensityElem,
    error::{ ObeError, OResult },
    fields::{ LaserField, MagneticField },
};
use super::{ Obe, TrajectoryForce };

/// State of an [`EquilibriumIterator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EquilibriumState {
    Running,
    Converged,
    /// The window budget was spent without convergence.
    Exhausted,
}

/// Time-averaged force over the last integrated window.
#[derive(Clone, Debug, PartialEq)]
pub struct EquilibriumForce {
    /// Total force.
    pub f: [f64; 3],
    /// Per-beam force for each transition, `3 x nbeams`.
    pub f_laser: IndexMap<String, nd::Array2<f64>>,
    /// Per-beam, per-polarization force for each transition,
    /// `3 x 3 x nbeams`.
    pub f_laser_q: IndexMap<String, nd::Array3<f64>>,
    /// Magnetic force, if enabled.
    pub f_mag: Option<[f64; 3]>,
    /// Number of windows that failed to converge; equal to `itermax` only
    /// when the search is exhausted.
    pub iterations: usize,
    pub state: EquilibriumState,
}

impl EquilibriumForce {
    pub fn converged(&self) -> bool { self.state == EquilibriumState::Converged }
}

// trapezoidal time average along the last axis
fn time_average<D>(t: &nd::Array1<f64>, x: &nd::Array<f64, D>)
    -> nd::Array<f64, D::Smaller>
where D: nd::RemoveAxis
{
    let last = nd::Axis(x.ndim() - 1);
    let nt = t.len();
    if nt < 2 {
        return x.mean_axis(last)
            .unwrap_or_else(|| x.index_axis(last, 0).to_owned());
    }
    let span = t[nt - 1] - t[0];
    let mut acc = x.index_axis(last, 0).mapv(|_| 0.0);
    for k in 0..nt - 1 {
        let dt = t[k + 1] - t[k];
        acc.scaled_add(0.5 * dt, &x.index_axis(last, k));
        acc.scaled_add(0.5 * dt, &x.index_axis(last, k + 1));
    }
    acc / span
}

fn average_force(tf: &TrajectoryForce) -> ([f64; 3], EquilibriumForce) {
    let f = time_average(&tf.t, &tf.f);
    let f = [f[0], f[1], f[2]];
    let f_laser
        = tf.f_laser.iter()
        .map(|(key, fb)| (key.clone(), time_average(&tf.t, fb)))
        .collect();
    let f_laser_q
        = tf.f_laser_q.iter()
        .map(|(key, fq)| (key.clone(), time_average(&tf.t, fq)))
        .collect();
    let f_mag
        = tf.f_mag.as_ref()
        .map(|fm| {
            let fm = time_average(&tf.t, fm);
            [fm[0], fm[1], fm[2]]
        });
    let avg = EquilibriumForce {
        f,
        f_laser,
        f_laser_q,
        f_mag,
        iterations: 0,
        state: EquilibriumState::Running,
    };
    (f, avg)
}

/// Drives the equilibrium force search for an [`Obe`], one window per step.
///
/// Also usable as an [`Iterator`] over the per-window averages.
pub struct EquilibriumIterator<'o, 'a, T, L, M>
where
    T: DensityElem,
    L: LaserField,
    M: MagneticField,
{
    obe: &'o mut Obe<'a, T, L, M>,
    config: EquilibriumConfig,
    state: EquilibriumState,
    iteration: usize,
    t_start: f64,
    old_avg: [f64; 3],
    last: Option<EquilibriumForce>,
}

impl<'o, 'a, T, L, M> EquilibriumIterator<'o, 'a, T, L, M>
where
    T: DensityElem,
    L: LaserField,
    M: MagneticField,
{
    /// Create a new `EquilibriumIterator`, starting from the current initial
    /// conditions of `obe`.
    pub fn new(obe: &'o mut Obe<'a, T, L, M>, config: EquilibriumConfig)
        -> OResult<Self>
    {
        config.validate()?;
        Ok(Self {
            obe,
            config,
            state: EquilibriumState::Running,
            iteration: 0,
            t_start: 0.0,
            old_avg: [f64::INFINITY; 3],
            last: None,
        })
    }

    pub fn state(&self) -> EquilibriumState { self.state }

    /// Number of windows integrated so far without converging.
    pub fn iteration(&self) -> usize { self.iteration }

    /// Average over the last integrated window.
    pub fn last(&self) -> Option<&EquilibriumForce> { self.last.as_ref() }

    fn window(&self) -> (f64, f64, Option<Vec<f64>>) {
        let t0 = self.t_start;
        let t1 = t0 + self.config.deltat;
        let t_eval
            = self.config.npts
            .map(|npts| nd::Array1::linspace(t0, t1, npts.max(2)).to_vec());
        (t0, t1, t_eval)
    }

    /// Integrate one window and update the state.
    pub fn step(&mut self) -> OResult<EquilibriumState> {
        if self.state != EquilibriumState::Running { return Ok(self.state); }

        let (t0, t1, t_eval) = self.window();
        self.obe.evolve_density((t0, t1), t_eval.as_deref())?;
        let tf = self.obe.force_from_trajectory()?;
        let (f_avg, mut avg) = average_force(&tf);

        let d2: f64
            = f_avg.iter().zip(&self.old_avg)
            .map(|(new, old)| (new - old).powi(2))
            .sum();
        let norm2: f64 = f_avg.iter().map(|f| f.powi(2)).sum();
        let converged = d2 / norm2 < self.config.rel || d2 < self.config.abs;
        tracing::debug!(
            iteration = self.iteration,
            f = ?f_avg,
            d2,
            converged,
            "equilibrium window"
        );

        self.state
            = if converged {
                EquilibriumState::Converged
            } else {
                self.iteration += 1;
                if self.iteration >= self.config.itermax {
                    tracing::warn!(
                        itermax = self.config.itermax,
                        d2,
                        "equilibrium force did not converge"
                    );
                    EquilibriumState::Exhausted
                } else {
                    EquilibriumState::Running
                }
            };
        if !converged {
            self.reseed()?;
        }
        self.old_avg = f_avg;
        self.t_start = t1;
        avg.iterations = self.iteration;
        avg.state = self.state;
        self.last = Some(avg);
        Ok(self.state)
    }

    // carry the final density, position, and velocity into the next window
    fn reseed(&mut self) -> OResult<()> {
        let nn = self.obe.density_len();
        let sol = self.obe.solution().ok_or(ObeError::NoTrajectory)?;
        let y
            = sol.last_state()
            .ok_or_else(|| ObeError::InitialCondition("empty trajectory".to_string()))?;
        let rho = y.slice(s![..nn]).to_owned();
        let v: [f64; 3] = [0, 1, 2].map(|a| y[nn + a].re());
        let r: [f64; 3] = [0, 1, 2].map(|a| y[nn + 3 + a].re());
        self.obe.set_initial_position_and_velocity(r, v);
        self.obe.set_initial_rho(rho)
    }

    /// Step until the search converges or is exhausted, returning the last
    /// window average.
    pub fn run(mut self) -> OResult<EquilibriumForce> {
        while self.step()? == EquilibriumState::Running { }
        self.last.ok_or(ObeError::NoTrajectory)
    }
}

impl<'o, 'a, T, L, M> Iterator for EquilibriumIterator<'o, 'a, T, L, M>
where
    T: DensityElem,
    L: LaserField,
    M: MagneticField,
{
    type Item = OResult<EquilibriumForce>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != EquilibriumState::Running { return None; }
        match self.step() {
            Ok(_) => self.last.clone().map(Ok),
            Err(err) => {
                self.state = EquilibriumState::Exhausted;
                Some(Err(err))
            },
        }
    }
}

impl<'a, T, L, M> Obe<'a, T, L, M>
where
    T: DensityElem,
    L: LaserField,
    M: MagneticField,
{
    /// Search for the equilibrium force from the current initial conditions.
    ///
    /// Non-convergence is not an error: the returned force carries
    /// [`EquilibriumState::Exhausted`] and an iteration count equal to
    /// `config.itermax`.
    pub fn find_equilibrium_force(&mut self, config: &EquilibriumConfig)
        -> OResult<EquilibriumForce>
    {
        EquilibriumIterator::new(self, config.clone())?.run()
    }
}
