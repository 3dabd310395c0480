// src/params.rs
//
// Simulation parameters for the 1D spin chain.
// Units follow the usual spin-wave conventions: energies in meV, time in ps,
// fields in mT.

use serde::{Deserialize, Serialize};

use crate::spectrum::{Normalization, Window};

/// Reduced Planck constant (meV * ps).
pub const HBAR_MEV_PS: f64 = 0.6582;

/// Bohr magneton (meV / T).
pub const BOHR_MAGNETON_MEV_PER_T: f64 = 0.05788;

/// Peak extra damping added at the outermost sponge site.
pub const MAX_SPONGE_DAMPING: f64 = 0.5;

/// Physical length of the chain; sites sit at i * CHAIN_SPAN / N.
pub const CHAIN_SPAN: f64 = 100.0;

/// Centre of the externally applied field window.
pub const FIELD_CENTRE: f64 = 0.5 * CHAIN_SPAN;

/// Smallest chain for which the next-nearest exchange term is meaningful.
pub const MIN_SITES: usize = 5;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("chain needs at least 5 sites, got {0}")]
    TooFewSites(usize),
    #[error("time step must be finite and positive, got {0}")]
    InvalidTimeStep(f64),
    #[error("hbar must be finite and positive, got {0}")]
    InvalidHbar(f64),
    #[error("energy resolution must be finite and positive, got {0}")]
    InvalidEnergyResolution(f64),
    #[error("damping must be finite and non-negative, got {0}")]
    InvalidDamping(f64),
    #[error("Tukey taper fraction must lie in [0, 1], got {0}")]
    InvalidTaper(f64),
}

/// Parameters bundle owned by the controller for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    pub n_sites: usize,
    pub dt: f64,             // ps
    pub j1: f64,             // nearest-neighbour exchange (meV)
    pub j2: f64,             // next-nearest exchange (meV)
    pub external_field: f64, // mT
    pub field_radius: f64,   // same units as site positions
    pub pulse_duration: f64, // ps
    pub field_enabled: bool,
    pub hbar: f64,
    pub damping: f64,
    pub gyromagnetic_ratio: f64,
    pub bohr_magneton: f64,
    pub sponge_width: usize,
    pub energy_resolution: f64, // meV
    pub window: Window,
    pub normalization: Normalization,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            n_sites: 10,
            dt: 0.05,
            j1: -1.6,
            j2: 0.44,
            external_field: 0.0,
            field_radius: 5.0,
            pulse_duration: 5.0,
            field_enabled: false,
            hbar: HBAR_MEV_PS,
            damping: 0.4,
            gyromagnetic_ratio: 2.0,
            bohr_magneton: BOHR_MAGNETON_MEV_PER_T,
            sponge_width: 5,
            energy_resolution: 0.1,
            window: Window::Hann,
            normalization: Normalization::Raw,
        }
    }
}

impl SimParams {
    /// Precession rate γ = 1/ħ.
    #[inline]
    pub fn gamma(&self) -> f64 {
        1.0 / self.hbar
    }

    /// Magnitude of the Zeeman contribution to H inside the field window.
    #[inline]
    pub fn zeeman_strength(&self) -> f64 {
        self.gyromagnetic_ratio * self.bohr_magneton * self.external_field
    }

    /// Recording window needed to resolve `energy_resolution`: T = 2πħ / ΔE.
    pub fn recording_window(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.hbar / self.energy_resolution
    }

    /// Spacing between neighbouring sites.
    #[inline]
    pub fn site_spacing(&self) -> f64 {
        CHAIN_SPAN / self.n_sites as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_sites < MIN_SITES {
            return Err(ConfigError::TooFewSites(self.n_sites));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ConfigError::InvalidTimeStep(self.dt));
        }
        if !(self.hbar.is_finite() && self.hbar > 0.0) {
            return Err(ConfigError::InvalidHbar(self.hbar));
        }
        if !(self.energy_resolution.is_finite() && self.energy_resolution > 0.0) {
            return Err(ConfigError::InvalidEnergyResolution(self.energy_resolution));
        }
        if !(self.damping.is_finite() && self.damping >= 0.0) {
            return Err(ConfigError::InvalidDamping(self.damping));
        }
        if let Window::Tukey { alpha } = self.window {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(ConfigError::InvalidTaper(alpha));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SimParams::default().validate(), Ok(()));
    }

    #[test]
    fn recording_window_matches_energy_resolution() {
        let p = SimParams::default();
        let expected = 2.0 * std::f64::consts::PI * 0.6582 / 0.1;
        assert!((p.recording_window() - expected).abs() < 1e-12);
    }

    #[test]
    fn validate_rejects_short_chain_and_bad_taper() {
        let p = SimParams {
            n_sites: 4,
            ..SimParams::default()
        };
        assert_eq!(p.validate(), Err(ConfigError::TooFewSites(4)));

        let p = SimParams {
            window: Window::Tukey { alpha: 1.5 },
            ..SimParams::default()
        };
        assert_eq!(p.validate(), Err(ConfigError::InvalidTaper(1.5)));

        let p = SimParams {
            dt: 0.0,
            ..SimParams::default()
        };
        assert!(matches!(p.validate(), Err(ConfigError::InvalidTimeStep(_))));
    }
}
