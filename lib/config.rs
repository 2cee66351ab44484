//! Run-time configuration for operator construction, integration, and the
//! equilibrium force search.
//!
//! Every section carries defaults, so an empty TOML document yields the
//! default configuration:
//!
//! ```toml
//! field_threshold = 1e-10
//! sparse_threshold = 10
//! include_mag_forces = false
//!
//! [integrator]
//! rtol = 1e-3
//! atol = 1e-6
//!
//! [equilibrium]
//! deltat = 500.0
//! itermax = 100
//! npts = 5001
//! rel = 1e-5
//! abs = 1e-9
//! ```

use std::path::Path;
use serde::{ Deserialize, Serialize };
use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObeConfig {
    /// Field components (electric or magnetic) with magnitude below this value
    /// are skipped when evaluating the density-matrix derivative.
    pub field_threshold: f64,
    /// Force dense (`false`) or sparse (`true`) operator storage; if absent,
    /// storage is chosen by comparing the state count against
    /// `sparse_threshold`.
    pub sparse: Option<bool>,
    /// State count above which operators are stored sparsely when `sparse` is
    /// unset.
    pub sparse_threshold: usize,
    /// Include the magnetic-dipole force in force calculations.
    pub include_mag_forces: bool,
    pub integrator: IntegratorConfig,
    pub equilibrium: EquilibriumConfig,
}

impl Default for ObeConfig {
    fn default() -> Self {
        Self {
            field_threshold: 1e-10,
            sparse: None,
            sparse_threshold: 10,
            include_mag_forces: false,
            integrator: IntegratorConfig::default(),
            equilibrium: EquilibriumConfig::default(),
        }
    }
}

impl ObeConfig {
    /// Parse a configuration from a TOML string and validate it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration from a TOML file.
    pub fn from_file<P>(path: P) -> Result<Self, ConfigError>
    where P: AsRef<Path>
    {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// Check that all parameters are within their allowed ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        (self.field_threshold >= 0.0).then_some(())
            .ok_or(ConfigError::BadValue(
                "field_threshold", self.field_threshold.to_string()))?;
        self.integrator.validate()?;
        self.equilibrium.validate()?;
        Ok(())
    }

    /// Return `true` if operators for a system of `n` states should be stored
    /// sparsely.
    pub fn use_sparse(&self, n: usize) -> bool {
        self.sparse.unwrap_or(n > self.sparse_threshold)
    }
}

/// Parameters for the adaptive ODE integrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    pub rtol: f64,
    pub atol: f64,
    pub max_step: f64,
    pub first_step: Option<f64>,
    pub max_steps: usize,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            rtol: 1e-3,
            atol: 1e-6,
            max_step: f64::INFINITY,
            first_step: None,
            max_steps: 10_000_000,
        }
    }
}

impl IntegratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_positive("integrator.rtol", self.rtol)?;
        ConfigError::check_positive("integrator.atol", self.atol)?;
        ConfigError::check_positive("integrator.max_step", self.max_step)?;
        if let Some(h0) = self.first_step {
            ConfigError::check_positive("integrator.first_step", h0)?;
        }
        ConfigError::check_nonzero("integrator.max_steps", self.max_steps)?;
        Ok(())
    }
}

/// Parameters for the equilibrium force search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquilibriumConfig {
    /// Length of each integration window.
    pub deltat: f64,
    /// Maximum number of windows.
    pub itermax: usize,
    /// Number of evenly spaced samples per window; if absent, the integrator's
    /// own steps are used.
    pub npts: Option<usize>,
    /// Relative convergence threshold on the squared change in average force.
    pub rel: f64,
    /// Absolute convergence threshold on the squared change in average force.
    pub abs: f64,
}

impl Default for EquilibriumConfig {
    fn default() -> Self {
        Self {
            deltat: 500.0,
            itermax: 100,
            npts: Some(5001),
            rel: 1e-5,
            abs: 1e-9,
        }
    }
}

impl EquilibriumConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_positive("equilibrium.deltat", self.deltat)?;
        ConfigError::check_nonzero("equilibrium.itermax", self.itermax)?;
        if let Some(npts) = self.npts {
            ConfigError::check_nonzero("equilibrium.npts", npts)?;
        }
        (self.rel >= 0.0).then_some(())
            .ok_or(ConfigError::BadValue("equilibrium.rel", self.rel.to_string()))?;
        (self.abs >= 0.0).then_some(())
            .ok_or(ConfigError::BadValue("equilibrium.abs", self.abs.to_string()))?;
        Ok(())
    }
}
