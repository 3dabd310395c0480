// src/config.rs
//
// Run metadata written next to every output table (config.json), and read back
// via `config=path.json` on the command line.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::controller::ControllerSettings;
use crate::params::SimParams;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub params: SimParams,
    pub controller: ControllerSettings,
    pub run: RunInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunInfo {
    pub binary: String,
    pub run_id: String,
    pub seed: u64,
    /// Tick caps for the headless driver.
    pub max_relax_ticks: usize,
    pub max_record_ticks: usize,
    /// Wall-clock start of the run, milliseconds since the Unix epoch.
    pub started_unix_ms: u64,
}

impl Default for RunInfo {
    fn default() -> Self {
        Self {
            binary: "spinwave_chain".to_string(),
            run_id: String::new(),
            seed: 0,
            max_relax_ticks: 200_000,
            max_record_ticks: 2_000_000,
            started_unix_ms: 0,
        }
    }
}

impl RunConfig {
    pub fn write_to_dir(&self, out_dir: &Path) -> std::io::Result<()> {
        let path = out_dir.join("config.json");
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let cfg = serde_json::from_reader(BufReader::new(file))?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::{Normalization, Window};

    #[test]
    fn config_survives_a_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = RunConfig::default();
        cfg.params.n_sites = 64;
        cfg.params.window = Window::Tukey { alpha: 0.25 };
        cfg.params.normalization = Normalization::OneSided;
        cfg.run.seed = 42;
        cfg.run.started_unix_ms = 1_700_000_000_123;
        cfg.write_to_dir(dir.path()).unwrap();

        let back = RunConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "params": { "n_sites": 32, "j1": -2.0 } }"#).unwrap();
        let cfg = RunConfig::load(&path).unwrap();
        assert_eq!(cfg.params.n_sites, 32);
        assert_eq!(cfg.params.j1, -2.0);
        assert_eq!(cfg.params.j2, SimParams::default().j2);
        assert_eq!(cfg.controller, ControllerSettings::default());
    }
}
