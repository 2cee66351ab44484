//! Adaptive-step integration of ordinary differential equations.
//!
//! Where unspecified, the last index of a 2D array corresponds to time.

use ndarray as nd;
use ndarray_linalg as la;
use crate::{
    config::IntegratorConfig,
    error::{ IResult, IntegratorError },
};

/// Sampled solution of an initial value problem.
#[derive(Clone, Debug, PartialEq)]
pub struct OdeSolution<T> {
    /// Sample times.
    pub t: nd::Array1<f64>,
    /// States at each sample time, with time along the last axis.
    pub y: nd::Array2<T>,
    /// Number of derivative evaluations.
    pub nfev: usize,
}

impl<T> OdeSolution<T> {
    /// Number of time samples.
    pub fn len(&self) -> usize { self.t.len() }

    pub fn is_empty(&self) -> bool { self.t.is_empty() }

    /// View the state at sample `k`.
    pub fn state(&self, k: usize) -> nd::ArrayView1<'_, T> {
        self.y.column(k)
    }

    /// View the final state.
    pub fn last_state(&self) -> Option<nd::ArrayView1<'_, T>> {
        (!self.is_empty()).then(|| self.y.column(self.len() - 1))
    }
}

/// A solver for initial value problems `dy/dt = f(t, y)`.
pub trait OdeSolver {
    /// Integrate from `y0` over `t_span`.
    ///
    /// If `t_eval` is given, the solution is reported exactly at those times
    /// (which must be sorted and lie within `t_span`); otherwise at every
    /// accepted step, including the initial point.
    fn solve<T, F>(
        &self,
        f: F,
        t_span: (f64, f64),
        y0: nd::Array1<T>,
        t_eval: Option<&[f64]>,
    ) -> IResult<OdeSolution<T>>
    where
        T: la::Scalar<Real = f64>,
        F: FnMut(f64, nd::ArrayView1<T>) -> nd::Array1<T>;
}

// Dormand-Prince 5(4) tableau
const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0, 0.0, 0.0],
    [9017.0 / 3168.0, -355.0 / 33.0, 46732.0 / 5247.0, 49.0 / 176.0, -5103.0 / 18656.0, 0.0],
    [35.0 / 384.0, 0.0, 500.0 / 1113.0, 125.0 / 192.0, -2187.0 / 6784.0, 11.0 / 84.0],
];
// difference between the fifth- and fourth-order weights
const E: [f64; 7] = [
    -71.0 / 57600.0,
    0.0,
    71.0 / 16695.0,
    -71.0 / 1920.0,
    17253.0 / 339200.0,
    -22.0 / 525.0,
    1.0 / 40.0,
];
const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
const ERROR_EXPONENT: f64 = -1.0 / 5.0;

/// Explicit Runge-Kutta integration of order 5(4) with adaptive step size
/// (Dormand-Prince), with local error control by mixed relative/absolute
/// tolerances.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DormandPrince {
    pub rtol: f64,
    pub atol: f64,
    pub max_step: f64,
    pub first_step: Option<f64>,
    pub max_steps: usize,
}

impl Default for DormandPrince {
    fn default() -> Self { Self::from_config(&IntegratorConfig::default()) }
}

impl DormandPrince {
    /// Create a new `DormandPrince` from integrator configuration.
    pub fn from_config(config: &IntegratorConfig) -> Self {
        Self {
            rtol: config.rtol,
            atol: config.atol,
            max_step: config.max_step,
            first_step: config.first_step,
            max_steps: config.max_steps,
        }
    }

    fn check(&self) -> IResult<()> {
        IntegratorError::check_positive("rtol", self.rtol)?;
        IntegratorError::check_positive("atol", self.atol)?;
        IntegratorError::check_positive("max_step", self.max_step)?;
        if let Some(h0) = self.first_step {
            IntegratorError::check_positive("first_step", h0)?;
        }
        Ok(())
    }

    // root-mean-square of `x` scaled elementwise by the tolerances at `y`
    fn scaled_rms<T>(&self, x: &nd::Array1<T>, y: &nd::Array1<T>, y_new: Option<&nd::Array1<T>>)
        -> f64
    where T: la::Scalar<Real = f64>
    {
        if x.is_empty() { return 0.0; }
        let sum: f64
            = x.iter().enumerate()
            .map(|(i, xi)| {
                let ymag
                    = y_new.map(|yn| y[i].abs().max(yn[i].abs()))
                    .unwrap_or_else(|| y[i].abs());
                let scale = self.atol + self.rtol * ymag;
                (xi.abs() / scale).powi(2)
            })
            .sum();
        (sum / x.len() as f64).sqrt()
    }

    fn initial_step<T, F>(
        &self,
        f: &mut F,
        t0: f64,
        y0: &nd::Array1<T>,
        f0: &nd::Array1<T>,
    ) -> f64
    where
        T: la::Scalar<Real = f64>,
        F: FnMut(f64, nd::ArrayView1<T>) -> nd::Array1<T>,
    {
        let d0 = self.scaled_rms(y0, y0, None);
        let d1 = self.scaled_rms(f0, y0, None);
        let h0 = if d0 < 1e-5 || d1 < 1e-5 { 1e-6 } else { 0.01 * d0 / d1 };
        let mut y1 = y0.clone();
        y1.scaled_add(T::from_real(h0), f0);
        let f1 = f(t0 + h0, y1.view());
        let df = &f1 - f0;
        let d2 = self.scaled_rms(&df, y0, None) / h0;
        let h1
            = if d1 <= 1e-15 && d2 <= 1e-15 {
                (h0 * 1e-3).max(1e-6)
            } else {
                (0.01 / d1.max(d2)).powf(-ERROR_EXPONENT)
            };
        (100.0 * h0).min(h1)
    }
}

fn is_finite<T>(y: &nd::Array1<T>) -> bool
where T: la::Scalar<Real = f64>
{
    y.iter().all(|x| x.re().is_finite() && x.im().is_finite())
}

impl OdeSolver for DormandPrince {
    fn solve<T, F>(
        &self,
        mut f: F,
        t_span: (f64, f64),
        y0: nd::Array1<T>,
        t_eval: Option<&[f64]>,
    ) -> IResult<OdeSolution<T>>
    where
        T: la::Scalar<Real = f64>,
        F: FnMut(f64, nd::ArrayView1<T>) -> nd::Array1<T>,
    {
        self.check()?;
        let (t0, t1) = t_span;
        if !(t0.is_finite() && t1.is_finite() && t1 > t0) {
            return Err(IntegratorError::BadSpan(t0, t1));
        }
        let span_tol = 1e-12 * (t1 - t0).max(t0.abs()).max(t1.abs());
        if let Some(te) = t_eval {
            let sorted = te.windows(2).all(|w| w[0] <= w[1]);
            let inside
                = te.iter().all(|t| *t >= t0 - span_tol && *t <= t1 + span_tol);
            if !(sorted && inside) {
                return Err(IntegratorError::BadEvalPoints);
            }
        }
        if !is_finite(&y0) { return Err(IntegratorError::NonFinite(t0)); }

        let mut ts: Vec<f64> = Vec::new();
        let mut ys: Vec<nd::Array1<T>> = Vec::new();
        let mut next_eval: usize = 0;
        match t_eval {
            Some(te) => {
                while next_eval < te.len() && te[next_eval] <= t0 + span_tol {
                    ts.push(te[next_eval]);
                    ys.push(y0.clone());
                    next_eval += 1;
                }
            },
            None => {
                ts.push(t0);
                ys.push(y0.clone());
            },
        }

        let mut t = t0;
        let mut y = y0;
        let mut k: Vec<nd::Array1<T>> = Vec::with_capacity(7);
        let mut k0 = f(t, y.view());
        let mut nfev: usize = 1;
        let mut h
            = self.first_step
            .unwrap_or_else(|| {
                nfev += 1;
                self.initial_step(&mut f, t0, &y, &k0)
            })
            .min(self.max_step);
        let mut steps: usize = 0;

        while t < t1 && t_eval.map(|te| next_eval < te.len()).unwrap_or(true) {
            if steps >= self.max_steps {
                return Err(IntegratorError::TooManySteps(self.max_steps));
            }
            let target
                = t_eval
                .and_then(|te| te.get(next_eval).copied())
                .unwrap_or(t1)
                .min(t1);
            let h_trial = h.min(self.max_step);
            let (h_step, land)
                = if t + h_trial * (1.0 + 1e-8) >= target {
                    (target - t, true)
                } else {
                    (h_trial, false)
                };
            if h_step <= 10.0 * f64::EPSILON * t.abs().max(1.0) {
                if land {
                    // already within rounding of the target
                    t = target;
                } else {
                    return Err(IntegratorError::StepSizeCollapse(t));
                }
            } else {
                k.clear();
                k.push(k0.clone());
                for stage in 1..7 {
                    let mut ys_stage = y.clone();
                    for (j, kj) in k.iter().enumerate() {
                        let a = A[stage][j];
                        if a != 0.0 {
                            ys_stage.scaled_add(T::from_real(h_step * a), kj);
                        }
                    }
                    let tk = t + C[stage] * h_step;
                    k.push(f(tk, ys_stage.view()));
                    nfev += 1;
                }
                // the last stage is evaluated at the fifth-order solution
                let mut y_new = y.clone();
                for (j, kj) in k.iter().enumerate().take(6) {
                    let b = A[6][j];
                    if b != 0.0 {
                        y_new.scaled_add(T::from_real(h_step * b), kj);
                    }
                }
                let mut err: nd::Array1<T> = nd::Array1::zeros(y.len());
                for (kj, ej) in k.iter().zip(E) {
                    err.scaled_add(T::from_real(h_step * ej), kj);
                }
                let err_norm = self.scaled_rms(&err, &y, Some(&y_new));

                if !err_norm.is_finite() {
                    return Err(IntegratorError::NonFinite(t + h_step));
                }
                if err_norm > 1.0 {
                    let factor
                        = (SAFETY * err_norm.powf(ERROR_EXPONENT)).max(MIN_FACTOR);
                    h = h_step * factor;
                    continue;
                }

                t = if land { target } else { t + h_step };
                y = y_new;
                k0 = k.pop().unwrap_or_else(|| f(t, y.view()));
                steps += 1;
                if !is_finite(&y) { return Err(IntegratorError::NonFinite(t)); }
                let factor
                    = if err_norm == 0.0 {
                        MAX_FACTOR
                    } else {
                        (SAFETY * err_norm.powf(ERROR_EXPONENT)).min(MAX_FACTOR)
                    };
                h = if land { h_trial.max(h_step * factor) } else { h_step * factor };
            }

            match t_eval {
                Some(te) => {
                    while next_eval < te.len() && te[next_eval] <= t + span_tol {
                        ts.push(te[next_eval]);
                        ys.push(y.clone());
                        next_eval += 1;
                    }
                },
                None => {
                    ts.push(t);
                    ys.push(y.clone());
                },
            }
        }

        let n = ys.first().map(|y| y.len()).unwrap_or(0);
        let mut Y: nd::Array2<T> = nd::Array2::zeros((n, ys.len()));
        Y.columns_mut().into_iter()
            .zip(ys.iter())
            .for_each(|(mut col, yk)| { col.assign(yk); });
        Ok(OdeSolution { t: nd::Array1::from(ts), y: Y, nfev })
    }
}
