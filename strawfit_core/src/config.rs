//! Fit configuration.
//!
//! All tunables of the fit live in [`KalFitConfig`]. Per-stage settings
//! (hit error, ambiguity strategy, t0 tolerance) are parallel arrays indexed
//! by annealing stage; [`KalFitConfig::validate`] rejects inconsistent
//! schedules before any fit runs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ============================================================================
// STRATEGY SELECTION
// ============================================================================

/// Ambiguity resolution strategy, selected by integer code in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmbigStrategy {
    /// Code 0: keep the input ambiguities
    Fixed,
    /// Code 1: resolve each hit on its own
    Hit,
    /// Code 2: resolve all hits of a panel together
    Panel,
    /// Code 3: take the sign of the raw closest approach
    Poca,
}

impl AmbigStrategy {
    /// Maps a configuration code to a strategy.
    pub fn from_code(code: i32) -> Result<Self, ConfigError> {
        match code {
            0 => Ok(Self::Fixed),
            1 => Ok(Self::Hit),
            2 => Ok(Self::Panel),
            3 => Ok(Self::Poca),
            other => Err(ConfigError::UnknownStrategy(other)),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Fixed => 0,
            Self::Hit => 1,
            Self::Panel => 2,
            Self::Poca => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Hit => "hit",
            Self::Panel => "panel",
            Self::Poca => "poca",
        }
    }
}

/// How a calorimeter cluster hint takes part in the fit.
///
/// The initial t0 always comes from the cluster when one is supplied. This
/// mode decides whether the t0 updates inside the fit loop keep using the
/// cluster (`UseCluster`) or switch to the hit-time estimate (`HitsOnly`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaloT0Mode {
    UseCluster,
    #[default]
    HitsOnly,
}

// ============================================================================
// SUB-CONFIGURATIONS
// ============================================================================

/// Tunables of the ambiguity resolvers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbigParams {
    /// Below this drift distance a hit is left with ambiguity 0 (mm)
    pub min_drift: f64,

    /// Panels with more active hits than this are resolved hit by hit
    pub max_panel_hits: usize,

    /// Prior on the common panel offset used by the panel resolver (mm)
    pub panel_track_error: f64,
}

impl Default for AmbigParams {
    fn default() -> Self {
        Self {
            min_drift: 0.1,
            max_panel_hits: 8, // 2^8 combinations
            panel_track_error: 0.5,
        }
    }
}

/// Tunables of the numerical trajectory fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalRepConfig {
    /// Maximum Gauss-Newton iterations per fit
    pub max_fit_iterations: u32,

    /// Convergence threshold on the largest residual change (mm)
    pub iteration_tolerance: f64,

    /// Inflation applied to the seed covariance before it is used as a prior
    pub seed_smear: f64,

    /// Minimum degrees of freedom for a successful fit
    pub min_ndof: usize,

    /// Minimum fitted momentum (MeV/c)
    pub min_momentum: f64,

    /// Largest flight-length move tolerated while searching a POCA (mm)
    pub divergence_flt: f64,
}

impl Default for KalRepConfig {
    fn default() -> Self {
        Self {
            max_fit_iterations: 10,
            iteration_tolerance: 0.1,
            seed_smear: 1.0e6,
            min_ndof: 10,
            min_momentum: 10.0,
            divergence_flt: 1.0e3,
        }
    }
}

// ============================================================================
// FIT CONFIGURATION
// ============================================================================

/// Configuration of the iterative track fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalFitConfig {
    /// Verbosity of per-hit debug tables (0 = off)
    pub debug_level: u32,

    /// Enable outlier weeding
    pub weed_hits: bool,

    /// Normalized residual above which an active hit is weeded
    pub max_hit_chi: f64,

    /// Maximum hits removed, or restored, by a single weeding pass
    pub max_weed: u32,

    /// Drift radius pull beyond which the drift error is inflated
    pub max_drift_pull: f64,

    /// External hit error per annealing stage (mm), coarse to fine
    pub hit_errors: Vec<f64>,

    /// Ambiguity strategy code per stage (0 fixed, 1 hit, 2 panel, 3 poca)
    pub ambig_strategy: Vec<i32>,

    /// t0 change that keeps a stage iterating (ns), per stage
    pub t0_tolerance: Vec<f64>,

    /// Estimate the initial t0 instead of using the track definition's
    pub init_t0: bool,

    /// Update t0 from the hits inside the fit loop
    pub update_t0: bool,

    /// Use of a calorimeter cluster hint during the fit loop
    pub calo_t0_mode: CaloT0Mode,

    /// Scale applied to the statistical t0 error
    pub t0_error_factor: f64,

    /// Lower DOCA bound for hits used in t0 updates (mm)
    pub min_t0_doca: f64,

    /// Window (in errors) around the t0 estimate for hits to be kept
    pub t0_window: f64,

    /// Cap on outlier-rejection rounds of a t0 update
    pub t0_max_iterations: u32,

    /// Calorimeter-to-tracker time offset (ns)
    pub calo_time_offset: f64,

    /// Drop the trajectory and hits of a failed fit
    pub remove_failed: bool,

    /// Minimum number of hits for a track definition to be fitted
    pub min_straws: usize,

    /// Maximum inner iterations per stage
    pub max_iterations: u32,

    /// Correct for energy loss in straw walls and gas
    pub material_correction: bool,

    /// Ambiguity resolver tunables
    pub ambig: AmbigParams,

    /// Numerical fit tunables
    pub kalrep: KalRepConfig,
}

impl Default for KalFitConfig {
    fn default() -> Self {
        Self {
            debug_level: 0,
            weed_hits: true,
            max_hit_chi: 4.0,
            max_weed: 10,
            max_drift_pull: 10.0,
            hit_errors: vec![5.0, 1.5, 0.5, 0.25, 0.0],
            ambig_strategy: vec![3, 1, 1, 2, 2],
            t0_tolerance: vec![2.0, 1.0, 1.0, 0.5, 0.2],
            init_t0: true,
            update_t0: true,
            calo_t0_mode: CaloT0Mode::HitsOnly,
            t0_error_factor: 1.2,
            min_t0_doca: -0.2,
            t0_window: 2.5,
            t0_max_iterations: 10,
            calo_time_offset: 1.4, // ns
            remove_failed: true,
            min_straws: 15,
            max_iterations: 10,
            material_correction: true,
            ambig: AmbigParams::default(),
            kalrep: KalRepConfig::default(),
        }
    }
}

impl KalFitConfig {
    /// Parses a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Number of annealing stages.
    pub fn n_stages(&self) -> usize {
        self.hit_errors.len()
    }

    /// Resolves the per-stage strategy codes.
    pub fn strategies(&self) -> Result<Vec<AmbigStrategy>, ConfigError> {
        self.ambig_strategy
            .iter()
            .map(|&code| AmbigStrategy::from_code(code))
            .collect()
    }

    /// Checks schedule consistency and parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hit_errors.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }
        let expected = self.hit_errors.len();
        if self.ambig_strategy.len() != expected {
            return Err(ConfigError::ScheduleMismatch {
                name: "ambig_strategy",
                expected,
                actual: self.ambig_strategy.len(),
            });
        }
        if self.t0_tolerance.len() != expected {
            return Err(ConfigError::ScheduleMismatch {
                name: "t0_tolerance",
                expected,
                actual: self.t0_tolerance.len(),
            });
        }
        self.strategies()?;

        if self.hit_errors.iter().any(|e| !e.is_finite() || *e < 0.0) {
            return Err(ConfigError::invalid("hit_errors", "must be finite and non-negative"));
        }
        if self.t0_tolerance.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(ConfigError::invalid("t0_tolerance", "must be finite and non-negative"));
        }
        if self.max_hit_chi <= 0.0 {
            return Err(ConfigError::invalid("max_hit_chi", "must be positive"));
        }
        if self.max_drift_pull <= 0.0 {
            return Err(ConfigError::invalid("max_drift_pull", "must be positive"));
        }
        if self.t0_error_factor <= 0.0 {
            return Err(ConfigError::invalid("t0_error_factor", "must be positive"));
        }
        if self.t0_window <= 0.0 {
            return Err(ConfigError::invalid("t0_window", "must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::invalid("max_iterations", "must be at least 1"));
        }
        if self.ambig.min_drift < 0.0 {
            return Err(ConfigError::invalid("ambig.min_drift", "must be non-negative"));
        }
        if self.ambig.max_panel_hits > 16 {
            return Err(ConfigError::invalid("ambig.max_panel_hits", "at most 16 hits per panel"));
        }
        if self.ambig.panel_track_error <= 0.0 {
            return Err(ConfigError::invalid("ambig.panel_track_error", "must be positive"));
        }
        if self.kalrep.max_fit_iterations == 0 {
            return Err(ConfigError::invalid("kalrep.max_fit_iterations", "must be at least 1"));
        }
        if self.kalrep.iteration_tolerance <= 0.0 {
            return Err(ConfigError::invalid("kalrep.iteration_tolerance", "must be positive"));
        }
        if self.kalrep.seed_smear <= 0.0 {
            return Err(ConfigError::invalid("kalrep.seed_smear", "must be positive"));
        }
        if self.kalrep.divergence_flt <= 0.0 {
            return Err(ConfigError::invalid("kalrep.divergence_flt", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KalFitConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.n_stages(), 5);
        assert_eq!(config.calo_t0_mode, CaloT0Mode::HitsOnly);
    }

    #[test]
    fn test_empty_schedule_rejected() {
        let config = KalFitConfig {
            hit_errors: vec![],
            ambig_strategy: vec![],
            t0_tolerance: vec![],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptySchedule));
    }

    #[test]
    fn test_schedule_mismatch_rejected() {
        let config = KalFitConfig {
            ambig_strategy: vec![1, 1],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ScheduleMismatch { name: "ambig_strategy", expected: 5, actual: 2 })
        ));

        let config = KalFitConfig {
            t0_tolerance: vec![1.0],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ScheduleMismatch { name: "t0_tolerance", .. })
        ));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let config = KalFitConfig {
            ambig_strategy: vec![0, 1, 2, 3, 7],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::UnknownStrategy(7)));
    }

    #[test]
    fn test_parameter_bounds() {
        let mut config = KalFitConfig::default();
        config.ambig.max_panel_hits = 17;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { name: "ambig.max_panel_hits", .. })
        ));

        let config = KalFitConfig {
            max_hit_chi: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { name: "max_hit_chi", .. })
        ));
    }

    #[test]
    fn test_strategy_codes() {
        for code in 0..4 {
            let strategy = AmbigStrategy::from_code(code).unwrap();
            assert_eq!(strategy.code(), code);
        }
        assert!(AmbigStrategy::from_code(-1).is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let text = r#"{
            "hit_errors": [1.0, 0.2],
            "ambig_strategy": [1, 2],
            "t0_tolerance": [1.0, 0.5],
            "min_straws": 8,
            "kalrep": { "min_ndof": 3 }
        }"#;
        let config = KalFitConfig::from_json_str(text).unwrap();
        assert_eq!(config.n_stages(), 2);
        assert_eq!(config.min_straws, 8);
        assert_eq!(config.kalrep.min_ndof, 3);
        assert_eq!(config.kalrep.max_fit_iterations, 10);
        assert_eq!(config.max_weed, 10);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            KalFitConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
