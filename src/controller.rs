// src/controller.rs
//
// Session state machine driving the integrator and the spectral analyzer:
//
//   Idle -> Relaxing -> SteadyState -> Perturbing -> Recording -> Analyzing -> SteadyState
//
// - Relaxing: exploration damping/dt; energy sampled every tick into a trailing window.
//   Converged when Σ|ΔE| over the window < relax_tolerance_per_site * N. On the way out,
//   damping and dt drop to the quiet regime so spin waves survive.
// - Perturbing: Zeeman field on for `pulse_duration`, then off.
// - Recording: S_z(site) sampled every `sample_stride` ticks for T_rec = 2πħ/ΔE.
// - Analyzing: one-shot FFT, table written, episode dropped.
//
// Phase data lives inside the variants, so e.g. a recording episode exists exactly
// while the controller is Recording or Analyzing.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chain::Chain;
use crate::energy::compute_total_energy;
use crate::llg::{step_heun, HeunScratch};
use crate::params::{ConfigError, SimParams};
use crate::spectrum::{AnalysisError, SpectralAnalyzer, SpectrumResult};

/// Knobs of the state machine itself (everything that is not physics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Number of trailing energy samples used for the convergence test.
    pub relax_window: usize,
    /// Convergence threshold on Σ|ΔE| per site (meV).
    pub relax_tolerance_per_site: f64,
    /// Damping after relaxation.
    pub quiet_damping: f64,
    /// Time step after relaxation (ps).
    pub quiet_dt: f64,
    /// Record one sample every `sample_stride` ticks.
    pub sample_stride: usize,
    /// Subtract each site's S_z at the start of recording.
    pub subtract_baseline: bool,
    /// Where the spectrum table is written. None keeps it in memory only.
    pub output_path: Option<PathBuf>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            relax_window: 10,
            relax_tolerance_per_site: 1e-4,
            quiet_damping: 5e-4,
            quiet_dt: 5e-3,
            sample_stride: 1,
            subtract_baseline: true,
            output_path: Some(PathBuf::from("result.csv")),
        }
    }
}

/// Plain phase label, cheap to copy for display and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseKind {
    Idle,
    Relaxing,
    SteadyState,
    Perturbing,
    Recording,
    Analyzing,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Relaxing => "relaxing",
            Self::SteadyState => "steady",
            Self::Perturbing => "perturbing",
            Self::Recording => "recording",
            Self::Analyzing => "analyzing",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One open recording: the analyzer plus its timing.
#[derive(Debug)]
pub struct RecordingEpisode {
    analyzer: SpectralAnalyzer,
    started_at: f64,
    duration: f64,
    ticks: usize,
    sample_interval: f64,
}

impl RecordingEpisode {
    pub fn samples(&self) -> usize {
        self.analyzer.n_samples()
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn sample_interval(&self) -> f64 {
        self.sample_interval
    }
}

#[derive(Debug)]
enum Phase {
    Idle,
    Relaxing { energies: VecDeque<f64> },
    SteadyState,
    Perturbing { pulse_start: f64 },
    Recording(RecordingEpisode),
    Analyzing(RecordingEpisode),
}

impl Phase {
    fn kind(&self) -> PhaseKind {
        match self {
            Phase::Idle => PhaseKind::Idle,
            Phase::Relaxing { .. } => PhaseKind::Relaxing,
            Phase::SteadyState => PhaseKind::SteadyState,
            Phase::Perturbing { .. } => PhaseKind::Perturbing,
            Phase::Recording(_) => PhaseKind::Recording,
            Phase::Analyzing(_) => PhaseKind::Analyzing,
        }
    }
}

/// What happened during one `tick`.
#[derive(Debug)]
pub struct TickReport {
    pub phase_before: PhaseKind,
    pub phase_after: PhaseKind,
    pub energy: f64,
    /// Set on the tick that ran an analysis.
    pub analysis: Option<Result<SpectrumResult, AnalysisError>>,
}

impl TickReport {
    pub fn transitioned(&self) -> bool {
        self.phase_before != self.phase_after
    }

    pub fn spectrum(&self) -> Option<&SpectrumResult> {
        self.analysis.as_ref().and_then(|r| r.as_ref().ok())
    }
}

/// Sum of |E_k − E_{k−1}| over a window of energies.
pub fn energy_variation(energies: &VecDeque<f64>) -> f64 {
    energies
        .iter()
        .zip(energies.iter().skip(1))
        .map(|(a, b)| (b - a).abs())
        .sum()
}

#[derive(Debug)]
pub struct SimulationController {
    base: SimParams,
    params: SimParams,
    settings: ControllerSettings,
    chain: Option<Chain>,
    scratch: HeunScratch,
    phase: Phase,
    clock: f64,
    energy: f64,
    episodes_completed: usize,
}

impl SimulationController {
    pub fn new(params: SimParams, settings: ControllerSettings) -> Result<Self, ConfigError> {
        params.validate()?;
        if !(settings.quiet_dt.is_finite() && settings.quiet_dt > 0.0) {
            return Err(ConfigError::InvalidTimeStep(settings.quiet_dt));
        }
        if !(settings.quiet_damping.is_finite() && settings.quiet_damping >= 0.0) {
            return Err(ConfigError::InvalidDamping(settings.quiet_damping));
        }
        Ok(Self {
            scratch: HeunScratch::new(&params),
            base: params.clone(),
            params,
            settings,
            chain: None,
            phase: Phase::Idle,
            clock: 0.0,
            energy: 0.0,
            episodes_completed: 0,
        })
    }

    // ---- observers ----

    pub fn phase(&self) -> PhaseKind {
        self.phase.kind()
    }

    pub fn chain(&self) -> Option<&Chain> {
        self.chain.as_ref()
    }

    /// Total energy after the last tick (meV).
    pub fn energy(&self) -> f64 {
        self.energy
    }

    /// Simulated time since the steady state was first reached (ps).
    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Live parameters (damping/dt reflect the current regime).
    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn episodes_completed(&self) -> usize {
        self.episodes_completed
    }

    pub fn recording(&self) -> Option<&RecordingEpisode> {
        match &self.phase {
            Phase::Recording(ep) | Phase::Analyzing(ep) => Some(ep),
            _ => None,
        }
    }

    // ---- signals ----

    /// Idle -> Relaxing with a fresh random configuration.
    pub fn start(&mut self, seed: u64) -> bool {
        let chain = Chain::random(&self.base, seed);
        self.start_with(chain)
    }

    /// Idle -> Relaxing from a caller-supplied configuration.
    pub fn start_with(&mut self, chain: Chain) -> bool {
        if !matches!(self.phase, Phase::Idle) {
            debug!(phase = %self.phase(), "[controller] start ignored");
            return false;
        }
        if chain.len() != self.base.n_sites {
            warn!(
                got = chain.len(),
                expected = self.base.n_sites,
                "[controller] start ignored: chain length mismatch"
            );
            return false;
        }
        self.params = self.base.clone();
        self.params.field_enabled = false;
        self.scratch = HeunScratch::new(&self.params);
        self.energy = compute_total_energy(&chain, &self.params);
        self.chain = Some(chain);
        self.clock = 0.0;
        self.phase = Phase::Relaxing {
            energies: VecDeque::with_capacity(self.settings.relax_window.max(2) + 1),
        };
        info!(
            n = self.params.n_sites,
            damping = self.params.damping,
            dt = self.params.dt,
            "[controller] looking for ground state"
        );
        true
    }

    /// SteadyState -> Perturbing: switch the field on for `pulse_duration`.
    pub fn apply_pulse(&mut self) -> bool {
        if !matches!(self.phase, Phase::SteadyState) {
            debug!(phase = %self.phase(), "[controller] pulse ignored");
            return false;
        }
        self.params.field_enabled = true;
        self.phase = Phase::Perturbing {
            pulse_start: self.clock,
        };
        info!(
            field = self.params.external_field,
            duration = self.params.pulse_duration,
            "[controller] field pulse on"
        );
        true
    }

    /// Any phase -> Idle. Drops the configuration and any open recording.
    pub fn stop(&mut self) {
        if !matches!(self.phase, Phase::Idle) {
            info!(phase = %self.phase(), "[controller] stopped");
        }
        self.phase = Phase::Idle;
        self.chain = None;
        self.params = self.base.clone();
        self.params.field_enabled = false;
    }

    // ---- stepping ----

    /// Advance one integrator step and apply the transition guards.
    pub fn tick(&mut self) -> TickReport {
        let phase_before = self.phase.kind();
        let mut analysis = None;

        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        self.phase = match phase {
            Phase::Idle => Phase::Idle,
            Phase::Analyzing(episode) => {
                analysis = Some(self.finish_episode(episode));
                Phase::SteadyState
            }
            other => self.advance(other),
        };

        TickReport {
            phase_before,
            phase_after: self.phase.kind(),
            energy: self.energy,
            analysis,
        }
    }

    /// Tick until `pred` holds or `max_ticks` pass. Returns the number of ticks taken,
    /// or None if the limit was hit first.
    pub fn run_until<F>(&mut self, max_ticks: usize, mut pred: F) -> Option<usize>
    where
        F: FnMut(&TickReport) -> bool,
    {
        for k in 1..=max_ticks {
            let report = self.tick();
            if pred(&report) {
                return Some(k);
            }
        }
        None
    }

    fn advance(&mut self, phase: Phase) -> Phase {
        let Some(chain) = self.chain.as_mut() else {
            return Phase::Idle;
        };

        step_heun(chain, &self.params, &mut self.scratch);
        let relaxing = matches!(phase, Phase::Relaxing { .. });
        if !relaxing {
            self.clock += self.params.dt;
        }
        self.energy = compute_total_energy(chain, &self.params);

        match phase {
            Phase::Relaxing { mut energies } => {
                energies.push_back(self.energy);
                let window = self.settings.relax_window.max(2);
                while energies.len() > window {
                    energies.pop_front();
                }
                let threshold = self.settings.relax_tolerance_per_site * self.params.n_sites as f64;
                if energies.len() == window && energy_variation(&energies) < threshold {
                    self.enter_steady_state();
                    Phase::SteadyState
                } else {
                    Phase::Relaxing { energies }
                }
            }
            Phase::Perturbing { pulse_start } => {
                if self.clock - pulse_start > self.params.pulse_duration {
                    self.params.field_enabled = false;
                    match self.open_episode() {
                        Ok(episode) => Phase::Recording(episode),
                        Err(e) => {
                            warn!(error = %e, "[controller] cannot open recording");
                            Phase::SteadyState
                        }
                    }
                } else {
                    Phase::Perturbing { pulse_start }
                }
            }
            Phase::Recording(mut episode) => {
                episode.ticks += 1;
                if episode.ticks % self.settings.sample_stride.max(1) == 0 {
                    if let Some(chain) = self.chain.as_ref() {
                        if let Err(e) = episode.analyzer.record(&chain.spin_z()) {
                            warn!(error = %e, "[controller] dropped sample");
                        }
                    }
                }
                if self.clock - episode.started_at >= episode.duration {
                    info!(
                        samples = episode.samples(),
                        "[controller] recording window complete"
                    );
                    Phase::Analyzing(episode)
                } else {
                    Phase::Recording(episode)
                }
            }
            other => other,
        }
    }

    fn enter_steady_state(&mut self) {
        self.params.damping = self.settings.quiet_damping;
        self.params.dt = self.settings.quiet_dt;
        info!(
            energy = self.energy,
            damping = self.params.damping,
            dt = self.params.dt,
            "[controller] found ground state, damping reduced"
        );
    }

    fn open_episode(&mut self) -> Result<RecordingEpisode, AnalysisError> {
        let duration = self.params.recording_window();
        let stride = self.settings.sample_stride.max(1);
        let sample_interval = stride as f64 * self.params.dt;
        let expected = (duration / sample_interval).ceil() as usize + 1;

        let mut analyzer = SpectralAnalyzer::new(
            self.params.n_sites,
            self.params.window,
            self.params.normalization,
        )
        .with_capacity(expected);
        if self.settings.subtract_baseline {
            if let Some(chain) = self.chain.as_ref() {
                analyzer = analyzer.with_baseline(chain.spin_z())?;
            }
        }

        info!(
            t_rec = duration,
            expected_samples = expected,
            "[controller] pulse over, recording"
        );
        Ok(RecordingEpisode {
            analyzer,
            started_at: self.clock,
            duration,
            ticks: 0,
            sample_interval,
        })
    }

    fn finish_episode(
        &mut self,
        episode: RecordingEpisode,
    ) -> Result<SpectrumResult, AnalysisError> {
        let outcome = episode.analyzer.analyze().and_then(|spectrum| {
            if let Some(path) = &self.settings.output_path {
                spectrum.write_csv(path)?;
                info!(path = %path.display(), "[controller] spectrum written");
            }
            Ok(spectrum)
        });

        match &outcome {
            Ok(s) => {
                self.episodes_completed += 1;
                info!(
                    rows = s.n_freq,
                    cols = s.n_wavenumbers,
                    "[controller] analysis done, back to steady state"
                );
            }
            Err(e) => warn!(error = %e, "[controller] analysis failed, no output written"),
        }
        outcome
    }
}
