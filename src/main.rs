// src/main.rs
//
// Headless driver: relax a random chain, kick it with one field pulse, record the
// ringdown and write the dispersion table.
//
// Examples:
//
//   cargo run --release -- n=100 field=10 plot
//       -> 100-site chain, 10 mT pulse, dispersion heat map + energy trace as PNG.
//
//   cargo run --release -- config=runs/my_run/config.json run=repeat
//       -> rerun with the parameters stored by an earlier run.
//
// Outputs (per run directory):
//   out/<run_id>/
//     ├── result.csv
//     ├── config.json         (if `meta` is set)
//     ├── energy_vs_time.csv  (if `trace` is set)
//     ├── energy.png          (if `plot` is set)
//     └── dispersion.png      (if `plot` is set)

use std::env;
use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use spinwave_chain::config::RunConfig;
use spinwave_chain::controller::{PhaseKind, SimulationController};
use spinwave_chain::spectrum::{Normalization, Window};
use spinwave_chain::visualisation::{save_dispersion_plot, save_energy_plot};

fn print_usage() {
    eprintln!(
        r#"Usage:
  cargo run -- [config=FILE] [n=N] [seed=S] [j1=VAL] [j2=VAL] [field=VAL]
               [radius=VAL] [pulse=VAL] [dt=VAL] [damping=VAL] [sponge=N]
               [resolution=VAL] [window=hann|tukey:ALPHA] [norm=raw|onesided]
               [stride=N] [out=DIR] [run=RUN_ID] [meta] [trace] [plot]

Notes:
  - Energies in meV, times in ps, field in mT.
  - The recording window is 2*pi*hbar/resolution; finer resolution -> longer runs.
  - Only result.csv is written by default. `meta` adds config.json, `trace` adds
    energy_vs_time.csv, `plot` adds energy.png and dispersion.png.
  - RUST_LOG=debug shows ignored signals and analysis sizes.
"#
    );
}

fn sanitize_run_id(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn default_run_id(started_ms: u64, n: usize, seed: u64) -> String {
    format!("{}_n{}_s{}", started_ms, n, seed)
}

fn unique_run_dir(out_root: &str, run_id: &str) -> PathBuf {
    let base = PathBuf::from(out_root);
    let mut dir = base.join(run_id);
    if !dir.exists() {
        return dir;
    }
    for k in 1..1000 {
        let cand = base.join(format!("{}_{}", run_id, k));
        if !cand.exists() {
            dir = cand;
            break;
        }
    }
    dir
}

fn parse_window(v: &str) -> Option<Window> {
    let v = v.trim().to_ascii_lowercase();
    if v == "hann" {
        return Some(Window::Hann);
    }
    let alpha = match v.strip_prefix("tukey") {
        Some("") => 0.5,
        Some(rest) => rest.strip_prefix(':')?.parse::<f64>().ok()?,
        None => return None,
    };
    Some(Window::Tukey { alpha })
}

fn parse_norm(v: &str) -> Option<Normalization> {
    match v.trim().to_ascii_lowercase().as_str() {
        "raw" | "none" => Some(Normalization::Raw),
        "onesided" | "one-sided" | "amplitude" => Some(Normalization::OneSided),
        _ => None,
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, v: &str) {
    match v.parse::<T>() {
        Ok(x) => *slot = x,
        Err(_) => warn!("could not parse {key} value '{v}', ignoring"),
    }
}

/// Energy history of a run. Kept in memory for the plot, streamed to CSV when asked.
#[derive(Default)]
struct Trace {
    w: Option<BufWriter<File>>,
    keep: bool,
    times: Vec<f64>,
    energies: Vec<f64>,
}

impl Trace {
    fn new(csv: Option<&Path>, keep: bool) -> std::io::Result<Self> {
        let w = match csv {
            Some(path) => {
                let mut w = BufWriter::new(File::create(path)?);
                writeln!(w, "tick,t_ps,E_meV,phase")?;
                Some(w)
            }
            None => None,
        };
        Ok(Self {
            w,
            keep,
            ..Self::default()
        })
    }

    fn push(&mut self, tick: usize, t: f64, e: f64, phase: PhaseKind) -> std::io::Result<()> {
        if self.keep {
            self.times.push(t);
            self.energies.push(e);
        }
        match self.w.as_mut() {
            Some(w) => writeln!(w, "{},{:.10e},{:.10e},{}", tick, t, e, phase),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> std::io::Result<()> {
        match self.w.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let argv: Vec<String> = env::args().collect();

    // Config file first so command-line keys override it.
    let mut cfg = RunConfig::default();
    for arg in argv.iter().skip(1) {
        if let Some(v) = arg.strip_prefix("config=") {
            cfg = RunConfig::load(Path::new(v))?;
            info!("loaded {}", v);
        }
    }

    let mut make_plots = false;
    let mut write_trace = false;
    let mut write_meta = false;
    let mut out_root = "out".to_string();
    let mut run_id_override: Option<String> = None;

    for arg in argv.iter().skip(1) {
        if arg == "-h" || arg == "--help" || arg == "help" {
            print_usage();
            return Ok(());
        }
        match arg.as_str() {
            "plot" => {
                make_plots = true;
                continue;
            }
            "trace" => {
                write_trace = true;
                continue;
            }
            "meta" => {
                write_meta = true;
                continue;
            }
            _ => {}
        }
        if arg.starts_with("config=") {
            continue;
        }

        let Some((key, v)) = arg.split_once('=') else {
            warn!("ignoring unknown argument '{arg}'");
            continue;
        };
        let p = &mut cfg.params;
        match key {
            "n" => set_parsed(&mut p.n_sites, key, v),
            "seed" => set_parsed(&mut cfg.run.seed, key, v),
            "j1" => set_parsed(&mut p.j1, key, v),
            "j2" => set_parsed(&mut p.j2, key, v),
            "field" => set_parsed(&mut p.external_field, key, v),
            "radius" => set_parsed(&mut p.field_radius, key, v),
            "pulse" => set_parsed(&mut p.pulse_duration, key, v),
            "dt" => set_parsed(&mut p.dt, key, v),
            "damping" => set_parsed(&mut p.damping, key, v),
            "sponge" => set_parsed(&mut p.sponge_width, key, v),
            "resolution" => set_parsed(&mut p.energy_resolution, key, v),
            "stride" => set_parsed(&mut cfg.controller.sample_stride, key, v),
            "window" => match parse_window(v) {
                Some(w) => p.window = w,
                None => warn!("unknown window '{v}', expected hann or tukey:ALPHA"),
            },
            "norm" => match parse_norm(v) {
                Some(n) => p.normalization = n,
                None => warn!("unknown normalisation '{v}', expected raw or onesided"),
            },
            "out" => out_root = v.to_string(),
            "run" => run_id_override = Some(v.to_string()),
            _ => warn!("ignoring unknown argument '{arg}'"),
        }
    }

    let started_ms = unix_millis();
    let run_id = sanitize_run_id(&run_id_override.unwrap_or_else(|| {
        default_run_id(started_ms, cfg.params.n_sites, cfg.run.seed)
    }));
    let out_dir = unique_run_dir(&out_root, &run_id);
    create_dir_all(&out_dir)?;

    cfg.run.run_id = run_id;
    cfg.run.started_unix_ms = started_ms;
    cfg.controller.output_path = Some(out_dir.join("result.csv"));
    if write_meta {
        cfg.write_to_dir(&out_dir)?;
    }

    let mut sim = SimulationController::new(cfg.params.clone(), cfg.controller.clone())?;
    let trace_path = out_dir.join("energy_vs_time.csv");
    let mut trace = Trace::new(write_trace.then_some(trace_path.as_path()), make_plots)?;

    sim.start(cfg.run.seed);

    // --- relax ---
    let mut tick = 0usize;
    while sim.phase() == PhaseKind::Relaxing && tick < cfg.run.max_relax_ticks {
        let r = sim.tick();
        tick += 1;
        trace.push(tick, sim.clock(), r.energy, r.phase_after)?;
    }
    if sim.phase() != PhaseKind::SteadyState {
        error!(
            ticks = tick,
            "no ground state within max_relax_ticks; try larger damping or dt"
        );
        return Ok(());
    }

    // --- pulse + record + analyse ---
    sim.apply_pulse();
    let mut sample_interval = sim.params().dt;
    let mut outcome = None;
    for _ in 0..cfg.run.max_record_ticks {
        if let Some(ep) = sim.recording() {
            sample_interval = ep.sample_interval();
        }
        let r = sim.tick();
        tick += 1;
        trace.push(tick, sim.clock(), r.energy, r.phase_after)?;
        if let Some(res) = r.analysis {
            outcome = Some(res);
            break;
        }
    }
    trace.finish()?;

    match outcome {
        Some(Ok(spectrum)) => {
            let (row, col, mag) = spectrum.peak();
            info!(
                rows = spectrum.n_freq,
                cols = spectrum.n_wavenumbers,
                peak_row = row,
                peak_col = col,
                peak = mag,
                "dispersion table written"
            );
            if make_plots {
                let disp = out_dir.join("dispersion.png");
                save_dispersion_plot(&spectrum, sample_interval, &disp.to_string_lossy())?;
                let energy = out_dir.join("energy.png");
                save_energy_plot(&trace.times, &trace.energies, &energy.to_string_lossy())?;
            }
        }
        Some(Err(e)) => error!("analysis failed: {e}"),
        None => error!("recording did not finish within max_record_ticks"),
    }

    println!("Wrote outputs to {:?}", out_dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_and_norm_arguments() {
        assert_eq!(parse_window("hann"), Some(Window::Hann));
        assert_eq!(parse_window("tukey"), Some(Window::Tukey { alpha: 0.5 }));
        assert_eq!(parse_window("Tukey:0.25"), Some(Window::Tukey { alpha: 0.25 }));
        assert_eq!(parse_window("tukey0.25"), None);
        assert_eq!(parse_window("blackman"), None);
        assert_eq!(parse_norm("onesided"), Some(Normalization::OneSided));
        assert_eq!(parse_norm("RAW"), Some(Normalization::Raw));
        assert_eq!(parse_norm("db"), None);
    }

    #[test]
    fn extra_outputs_are_off_by_default() {
        let mut quiet = Trace::new(None, false).unwrap();
        quiet.push(1, 0.0, -1.0, PhaseKind::Relaxing).unwrap();
        quiet.finish().unwrap();
        assert!(quiet.times.is_empty() && quiet.energies.is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("energy_vs_time.csv");
        let mut full = Trace::new(Some(&path), true).unwrap();
        full.push(1, 0.5, -2.0, PhaseKind::SteadyState).unwrap();
        full.finish().unwrap();
        assert_eq!(full.energies, vec![-2.0]);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with(",steady\n"));
    }

    #[test]
    fn default_run_id_carries_start_time() {
        assert_eq!(default_run_id(1_700_000_000_123, 10, 7), "1700000000123_n10_s7");
    }

    #[test]
    fn run_ids_are_filesystem_safe() {
        assert_eq!(sanitize_run_id("a b/c:d.e-f_g"), "a_b_c_d.e-f_g");
    }
}
