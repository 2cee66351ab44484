//! Collection of all error types.
//!
//! All errors derive [`thiserror::Error`], making them composable when allowed
//! and compatible with application code using [`anyhow`][anyhow].
//!
//! [anyhow]: https://crates.io/crates/anyhow

use ndarray_linalg::error::LinalgError;
use thiserror::Error;

/// Returned from construction and evaluation of a
/// [`BlockHamiltonian`][crate::hamiltonian::BlockHamiltonian].
#[derive(Debug, Error)]
pub enum HamiltonianError {
    /// Returned when an energy block is not square.
    #[error("energy block for manifold '{label}' must be square; got shape {shape:?}")]
    NotSquare { label: String, shape: Vec<usize> },

    /// Returned when a block would register a manifold with no states.
    #[error("manifold '{0}' must contain at least one state")]
    EmptyBlock(String),

    /// Returned when a magnetic block does not have shape `3 x n x n`.
    #[error("magnetic block for manifold '{label}' must have shape (3, n, n); got {shape:?}")]
    BadMagneticShape { label: String, shape: Vec<usize> },

    /// Returned when a block's size disagrees with the dimension already
    /// registered for its manifold(s).
    #[error("block '{label}' has shape {got:?}; expected {expected:?}")]
    ShapeMismatch { label: String, expected: Vec<usize>, got: Vec<usize> },

    /// Returned when a block of the same kind is registered twice.
    #[error("manifold '{0}' already has a {1} block")]
    DuplicateBlock(String, &'static str),

    /// Returned when a dipole coupling is requested between two manifolds that
    /// are already coupled.
    #[error("transition '{0}' is already registered")]
    DuplicateTransition(String),

    /// Returned when a dipole coupling is requested from a manifold to itself.
    #[error("cannot register a dipole block from manifold '{0}' to itself")]
    SelfCoupling(String),

    /// Returned when a manifold label is not registered.
    #[error("unknown manifold label '{0}'")]
    UnknownLabel(String),

    /// Returned when a transition key is not registered.
    #[error("unknown transition '{0}'")]
    UnknownTransition(String),

    /// Returned when a single field vector is passed to a Hamiltonian with a
    /// number of transitions other than one.
    #[error("a single field vector is only meaningful with exactly one transition; have {0}")]
    AmbiguousField(usize),

    /// Returned when the states of one manifold do not share a common total
    /// spontaneous decay rate.
    #[error("states in manifold '{manifold}' decay at different rates: {rates:?}")]
    DecayRateMismatch { manifold: String, rates: Vec<f64> },

    /// Returned when a diagonalization produces eigenvalues with non-negligible
    /// imaginary parts.
    #[error("non-negligible imaginary eigenvalue encountered while diagonalizing manifold '{0}'")]
    ComplexEigenvalue(String),

    /// [`LinalgError`].
    #[error("linalg error: {0}")]
    Linalg(#[from] LinalgError),
}

/// Returned from construction of Liouville-space operators.
#[derive(Debug, Error)]
pub enum LiouvilleError {
    /// Returned when a change of basis to the real representation leaves a
    /// non-negligible imaginary part.
    #[error("real-basis transform left an imaginary residue of {0:e}")]
    NotReal(f64),

    /// [`HamiltonianError`].
    #[error("hamiltonian error: {0}")]
    Hamiltonian(#[from] HamiltonianError),
}

/// Returned from the ODE integrators in [`ode`][crate::ode].
#[derive(Debug, Error)]
pub enum IntegratorError {
    /// Returned when a time span is empty, reversed, or non-finite.
    #[error("invalid time span ({0}, {1})")]
    BadSpan(f64, f64),

    /// Returned when requested evaluation points are unsorted or fall outside
    /// of the integration span.
    #[error("evaluation points must be sorted and lie within the integration span")]
    BadEvalPoints,

    /// Returned when a tolerance or step-size parameter is non-positive.
    #[error("integrator parameter '{0}' must be positive; got {1}")]
    BadParameter(&'static str, f64),

    /// Returned when the adaptive step size falls below what can be
    /// represented relative to the current time.
    #[error("step size collapsed at t = {0}")]
    StepSizeCollapse(f64),

    /// Returned when the maximum number of steps is exceeded.
    #[error("exceeded the maximum of {0} integration steps")]
    TooManySteps(usize),

    /// Returned when the state vector acquires NaN or infinite entries.
    #[error("encountered a non-finite state at t = {0}")]
    NonFinite(f64),
}

impl IntegratorError {
    pub(crate) fn check_positive(name: &'static str, x: f64)
        -> Result<(), Self>
    {
        (x > 0.0).then_some(()).ok_or(Self::BadParameter(name, x))
    }
}

/// Returned from loading a [`ObeConfig`][crate::config::ObeConfig].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Returned when a config file cannot be read.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when a config file cannot be parsed.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Returned when a parameter is outside its allowed range.
    #[error("invalid value for '{0}': {1}")]
    BadValue(&'static str, String),
}

impl ConfigError {
    pub(crate) fn check_positive(name: &'static str, x: f64)
        -> Result<(), Self>
    {
        (x > 0.0).then_some(()).ok_or(Self::BadValue(name, x.to_string()))
    }

    pub(crate) fn check_nonzero(name: &'static str, n: usize)
        -> Result<(), Self>
    {
        (n != 0).then_some(()).ok_or(Self::BadValue(name, n.to_string()))
    }
}

/// Returned from operations on an [`Obe`][crate::obe::Obe].
#[derive(Debug, Error)]
pub enum ObeError {
    /// Returned when a laser beam collection is keyed by a transition that has
    /// no operators.
    #[error("laser beams given for unregistered transition '{0}'")]
    UnknownTransition(String),

    /// Returned when an initial density vector or population distribution is
    /// malformed.
    #[error("invalid initial condition: {0}")]
    InitialCondition(String),

    /// Returned when a trajectory is required but none has been computed since
    /// the last change to the initial conditions.
    #[error("no trajectory available; call evolve_density or evolve_motion first")]
    NoTrajectory,

    /// Returned when a rate-equation initial condition is requested without a
    /// rate-equation model.
    #[error("no rate-equation model attached")]
    MissingRateModel,

    /// Returned when a force profile name is not known.
    #[error("no force profile named '{0}'")]
    UnknownProfile(String),

    /// [`HamiltonianError`].
    #[error("hamiltonian error: {0}")]
    Hamiltonian(#[from] HamiltonianError),

    /// [`LiouvilleError`].
    #[error("liouville error: {0}")]
    Liouville(#[from] LiouvilleError),

    /// [`IntegratorError`].
    #[error("integrator error: {0}")]
    Integrator(#[from] IntegratorError),

    /// [`ConfigError`].
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Returned when writing a `.npz` archive fails.
    #[error("npz write error: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),

    /// Returned on file-system errors while saving data.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ObeError {
    pub(crate) fn check_initial(cond: bool, msg: impl FnOnce() -> String)
        -> Result<(), Self>
    {
        cond.then_some(()).ok_or_else(|| Self::InitialCondition(msg()))
    }
}

pub type HResult<T> = Result<T, HamiltonianError>;
pub type LResult<T> = Result<T, LiouvilleError>;
pub type IResult<T> = Result<T, IntegratorError>;
pub type OResult<T> = Result<T, ObeError>;
