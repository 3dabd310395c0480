// src/spectrum.rs
//
// Spin-wave dispersion from a recorded S_z(t, site) table.
//
// Pipeline (one-shot, consumes the analyzer):
//   1. taper every site's time series (Hann or Tukey)
//   2. 2D real-to-complex FFT over (time, site): FFT along sites for each time row and
//      keep bins 0..=N/2, then FFT each kept column along time
//   3. magnitude |X(ω, k)|, optionally scaled by 2/(T·N)
//
// Output layout matches a row-major r2c transform of a (T, N) real grid:
// T frequency rows × (N/2 + 1) wavenumber columns.
//
// The FFT workspace (buffers + plans) is an RAII value that only lives inside `analyze`.
// Every exit path drops it; nothing is left allocated between episodes.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("failed to allocate FFT workspace of {elements} complex values")]
    AllocationFailure { elements: usize },
    #[error("cannot plan a {samples}x{sites} transform: {reason}")]
    PlanFailure {
        samples: usize,
        sites: usize,
        reason: &'static str,
    },
    #[error("sample row has {got} values, expected {expected}")]
    RowLength { expected: usize, got: usize },
    #[error("failed to write spectrum to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Time-axis taper applied to every site before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Window {
    /// w(t) = ½ (1 − cos(2πt / (T−1))) over the full span.
    #[default]
    Hann,
    /// Flat top with cosine edges; `alpha` is the tapered fraction of the span.
    /// alpha = 0 is rectangular, alpha = 1 is Hann.
    Tukey { alpha: f64 },
}

impl Window {
    /// Weight of sample `t` in a window of `len` samples.
    pub fn weight(&self, t: usize, len: usize) -> f64 {
        if len < 2 {
            return 1.0;
        }
        let x = t as f64 / (len - 1) as f64;
        match *self {
            Window::Hann => 0.5 * (1.0 - (2.0 * std::f64::consts::PI * x).cos()),
            Window::Tukey { alpha } => {
                if alpha <= 0.0 {
                    return 1.0;
                }
                let half = 0.5 * alpha;
                let pi = std::f64::consts::PI;
                if x < half {
                    0.5 * (1.0 + (pi * (x / half - 1.0)).cos())
                } else if x <= 1.0 - half {
                    1.0
                } else {
                    0.5 * (1.0 + (pi * ((x - 1.0) / half + 1.0)).cos())
                }
            }
        }
    }

    pub fn weights(&self, len: usize) -> Vec<f64> {
        (0..len).map(|t| self.weight(t, len)).collect()
    }
}

/// Amplitude scaling of the output magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Plain |X|, no scaling.
    #[default]
    Raw,
    /// One-sided amplitude spectrum: 2/(T·N) · |X|.
    OneSided,
}

impl Normalization {
    pub fn factor(&self, samples: usize, sites: usize) -> f64 {
        match self {
            Normalization::Raw => 1.0,
            Normalization::OneSided => 2.0 / (samples * sites) as f64,
        }
    }
}

/// Append-only (time, site) table, row-major by time.
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    n_sites: usize,
    data: Vec<f64>,
    baseline: Option<Vec<f64>>,
}

impl TimeSeriesBuffer {
    pub fn new(n_sites: usize, samples_hint: usize) -> Self {
        Self {
            n_sites,
            data: Vec::with_capacity(n_sites.saturating_mul(samples_hint)),
            baseline: None,
        }
    }

    /// Subtract `baseline[site]` from every sample pushed afterwards (DC removal).
    /// The baseline must hold exactly one value per site.
    pub fn with_baseline(mut self, baseline: Vec<f64>) -> Result<Self, AnalysisError> {
        if baseline.len() != self.n_sites {
            return Err(AnalysisError::RowLength {
                expected: self.n_sites,
                got: baseline.len(),
            });
        }
        self.baseline = Some(baseline);
        Ok(self)
    }

    pub fn push_row(&mut self, row: &[f64]) -> Result<(), AnalysisError> {
        if row.len() != self.n_sites {
            return Err(AnalysisError::RowLength {
                expected: self.n_sites,
                got: row.len(),
            });
        }
        match &self.baseline {
            Some(b) => self.data.extend(row.iter().zip(b).map(|(v, b0)| v - b0)),
            None => self.data.extend_from_slice(row),
        }
        Ok(())
    }

    #[inline]
    pub fn n_sites(&self) -> usize {
        self.n_sites
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        if self.n_sites == 0 {
            0
        } else {
            self.data.len() / self.n_sites
        }
    }

    pub fn row(&self, t: usize) -> &[f64] {
        &self.data[t * self.n_sites..(t + 1) * self.n_sites]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// Magnitude table: `n_freq` rows (temporal frequency) × `n_wavenumbers` columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumResult {
    pub n_freq: usize,
    pub n_wavenumbers: usize,
    /// Chain length the table was computed from (N, not N/2 + 1).
    pub n_sites: usize,
    pub data: Vec<f64>,
}

impl SpectrumResult {
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_wavenumbers + col]
    }

    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.n_wavenumbers..(r + 1) * self.n_wavenumbers]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.data.chunks(self.n_wavenumbers)
    }

    /// Largest cell: (row, col, magnitude).
    pub fn peak(&self) -> (usize, usize, f64) {
        let mut best = (0, 0, f64::NEG_INFINITY);
        for (idx, &v) in self.data.iter().enumerate() {
            if v > best.2 {
                best = (idx / self.n_wavenumbers, idx % self.n_wavenumbers, v);
            }
        }
        best
    }

    /// Largest cell in column `col` (dispersion branch at one wavenumber).
    pub fn peak_in_column(&self, col: usize) -> (usize, f64) {
        (0..self.n_freq)
            .map(|r| (r, self.get(r, col)))
            .fold((0, f64::NEG_INFINITY), |a, b| if b.1 > a.1 { b } else { a })
    }

    /// Frequency of row `r` for samples spaced `sample_interval` apart (1/time units).
    pub fn frequency(&self, r: usize, sample_interval: f64) -> f64 {
        r as f64 / (self.n_freq as f64 * sample_interval)
    }

    /// Wavenumber of column `c` in radians per site: 2πc / N.
    pub fn wavenumber(&self, c: usize) -> f64 {
        2.0 * std::f64::consts::PI * c as f64 / self.n_sites.max(1) as f64
    }

    /// Comma-separated rows, six decimals, no header, no trailing comma.
    pub fn write_table<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for row in self.rows() {
            for (k, v) in row.iter().enumerate() {
                if k > 0 {
                    w.write_all(b",")?;
                }
                write!(w, "{:.6}", v)?;
            }
            w.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn to_csv_string(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_table(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Write the table to `path`. Data goes to a sibling `.part` file first and is renamed
    /// into place, so `path` never holds a truncated table.
    pub fn write_csv(&self, path: &Path) -> Result<(), AnalysisError> {
        let io_err = |source| AnalysisError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut tmp: OsString = path.as_os_str().to_owned();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);

        let written = File::create(&tmp).and_then(|file| {
            let mut w = BufWriter::new(file);
            self.write_table(&mut w)?;
            w.flush()?;
            w.into_inner().map_err(|e| e.into_error())?.sync_all()
        });

        match written.and_then(|_| fs::rename(&tmp, path)) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(io_err(e))
            }
        }
    }
}

/// Scratch grids and plans for one analysis. Dropped on every exit from `analyze`.
struct FftWorkspace {
    samples: usize,
    sites: usize,
    bins: usize,
    grid: Vec<Complex<f64>>,
    half: Vec<Complex<f64>>,
    column: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    fft_sites: Arc<dyn Fft<f64>>,
    fft_time: Arc<dyn Fft<f64>>,
}

fn try_zeroed(len: usize) -> Result<Vec<Complex<f64>>, AnalysisError> {
    let mut v: Vec<Complex<f64>> = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| AnalysisError::AllocationFailure { elements: len })?;
    v.resize(len, Complex::new(0.0, 0.0));
    Ok(v)
}

impl FftWorkspace {
    fn acquire(samples: usize, sites: usize) -> Result<Self, AnalysisError> {
        let plan_err = |reason| AnalysisError::PlanFailure {
            samples,
            sites,
            reason,
        };
        if samples < 2 {
            return Err(plan_err("need at least 2 time samples"));
        }
        if sites < 2 {
            return Err(plan_err("need at least 2 sites"));
        }

        let bins = sites / 2 + 1;
        let grid_len = samples
            .checked_mul(sites)
            .ok_or(AnalysisError::AllocationFailure {
                elements: usize::MAX,
            })?;
        let half_len = samples
            .checked_mul(bins)
            .ok_or(AnalysisError::AllocationFailure {
                elements: usize::MAX,
            })?;

        // Buffers before plans: planning is only worth doing once the memory is there.
        let grid = try_zeroed(grid_len)?;
        let half = try_zeroed(half_len)?;
        let column = try_zeroed(samples)?;

        let mut planner = FftPlanner::<f64>::new();
        let fft_sites = planner.plan_fft_forward(sites);
        let fft_time = planner.plan_fft_forward(samples);

        let scratch_len = fft_sites
            .get_inplace_scratch_len()
            .max(fft_time.get_inplace_scratch_len());
        let scratch = try_zeroed(scratch_len)?;

        trace!(samples, sites, "[spectrum] workspace acquired");
        Ok(Self {
            samples,
            sites,
            bins,
            grid,
            half,
            column,
            scratch,
            fft_sites,
            fft_time,
        })
    }

    /// Load the tapered series into the complex grid (im = 0).
    fn load(&mut self, data: &[f64], taper: &[f64]) {
        let n = self.sites;
        self.grid
            .par_chunks_mut(n)
            .zip(data.par_chunks(n))
            .zip(taper.par_iter())
            .for_each(|((dst, src), &w)| {
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d = Complex::new(s * w, 0.0);
                }
            });
    }

    /// 2D forward transform into `half` (T × bins).
    fn transform(&mut self) {
        let (n, b, t_len) = (self.sites, self.bins, self.samples);

        // Rows: along sites, keep the non-redundant half.
        for t in 0..t_len {
            let row = &mut self.grid[t * n..(t + 1) * n];
            self.fft_sites.process_with_scratch(row, &mut self.scratch);
            self.half[t * b..(t + 1) * b].copy_from_slice(&row[..b]);
        }

        // Columns: along time.
        for k in 0..b {
            for t in 0..t_len {
                self.column[t] = self.half[t * b + k];
            }
            self.fft_time
                .process_with_scratch(&mut self.column, &mut self.scratch);
            for t in 0..t_len {
                self.half[t * b + k] = self.column[t];
            }
        }
    }

    fn magnitudes(&self, scale: f64) -> Vec<f64> {
        self.half.par_iter().map(|c| c.norm() * scale).collect()
    }
}

impl Drop for FftWorkspace {
    fn drop(&mut self) {
        trace!(
            samples = self.samples,
            sites = self.sites,
            "[spectrum] workspace released"
        );
    }
}

/// Collects one recording episode and turns it into a magnitude spectrum.
///
/// `analyze` consumes the analyzer, so a second analysis of the same episode (or a
/// concurrent one) cannot be expressed.
#[derive(Debug, Clone)]
pub struct SpectralAnalyzer {
    buffer: TimeSeriesBuffer,
    window: Window,
    normalization: Normalization,
}

impl SpectralAnalyzer {
    pub fn new(n_sites: usize, window: Window, normalization: Normalization) -> Self {
        Self {
            buffer: TimeSeriesBuffer::new(n_sites, 0),
            window,
            normalization,
        }
    }

    /// Pre-size the buffer for roughly `samples` rows.
    pub fn with_capacity(mut self, samples: usize) -> Self {
        let n = self.buffer.n_sites();
        let mut buffer = TimeSeriesBuffer::new(n, samples);
        buffer.baseline = self.buffer.baseline.take();
        self.buffer = buffer;
        self
    }

    pub fn with_baseline(mut self, baseline: Vec<f64>) -> Result<Self, AnalysisError> {
        self.buffer = self.buffer.with_baseline(baseline)?;
        Ok(self)
    }

    /// Append one time sample (one value per site).
    pub fn record(&mut self, row: &[f64]) -> Result<(), AnalysisError> {
        self.buffer.push_row(row)
    }

    pub fn n_samples(&self) -> usize {
        self.buffer.n_samples()
    }

    pub fn buffer(&self) -> &TimeSeriesBuffer {
        &self.buffer
    }

    pub fn analyze(self) -> Result<SpectrumResult, AnalysisError> {
        let samples = self.buffer.n_samples();
        let sites = self.buffer.n_sites();
        debug!(samples, sites, window = ?self.window, "[spectrum] analysing");

        if self.buffer.as_slice().len() != samples * sites {
            return Err(AnalysisError::PlanFailure {
                samples,
                sites,
                reason: "ragged buffer",
            });
        }
        let mut ws = FftWorkspace::acquire(samples, sites)?;
        let taper = self.window.weights(samples);
        ws.load(self.buffer.as_slice(), &taper);
        drop(self.buffer);

        ws.transform();
        let data = ws.magnitudes(self.normalization.factor(samples, sites));

        Ok(SpectrumResult {
            n_freq: samples,
            n_wavenumbers: ws.bins,
            n_sites: sites,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn analyzer_with<F: Fn(usize, usize) -> f64>(
        t_len: usize,
        n: usize,
        window: Window,
        norm: Normalization,
        f: F,
    ) -> SpectralAnalyzer {
        let mut a = SpectralAnalyzer::new(n, window, norm).with_capacity(t_len);
        for t in 0..t_len {
            let row: Vec<f64> = (0..n).map(|p| f(t, p)).collect();
            a.record(&row).unwrap();
        }
        a
    }

    #[test]
    fn hann_and_tukey_shapes() {
        let h = Window::Hann.weights(9);
        assert!(h[0].abs() < 1e-15 && h[8].abs() < 1e-15);
        assert!((h[4] - 1.0).abs() < 1e-15);

        let rect = Window::Tukey { alpha: 0.0 }.weights(9);
        assert!(rect.iter().all(|&w| w == 1.0));

        let full = Window::Tukey { alpha: 1.0 }.weights(33);
        let hann = Window::Hann.weights(33);
        for (a, b) in full.iter().zip(&hann) {
            assert!((a - b).abs() < 1e-12);
        }

        let tukey = Window::Tukey { alpha: 0.5 }.weights(101);
        assert!(tukey[0].abs() < 1e-12);
        assert!((tukey[50] - 1.0).abs() < 1e-12);
        assert!((tukey[30] - 1.0).abs() < 1e-12);
        assert!(tukey[10] > 0.0 && tukey[10] < 1.0);
        for i in 0..101 {
            assert!((tukey[i] - tukey[100 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn buffer_subtracts_baseline_and_rejects_ragged_rows() {
        let mut b = TimeSeriesBuffer::new(3, 2)
            .with_baseline(vec![1.0, 2.0, 3.0])
            .unwrap();
        b.push_row(&[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(b.row(0), &[0.0, -1.0, -2.0]);
        assert!(matches!(
            b.push_row(&[1.0, 2.0]),
            Err(AnalysisError::RowLength {
                expected: 3,
                got: 2
            })
        ));
        assert_eq!(b.n_samples(), 1);
    }

    #[test]
    fn mismatched_baseline_is_rejected() {
        let short = SpectralAnalyzer::new(4, Window::Hann, Normalization::Raw)
            .with_baseline(vec![0.0; 3]);
        assert!(matches!(
            short,
            Err(AnalysisError::RowLength {
                expected: 4,
                got: 3
            })
        ));
        assert!(TimeSeriesBuffer::new(4, 0).with_baseline(vec![0.0; 5]).is_err());

        let mut a = SpectralAnalyzer::new(4, Window::Hann, Normalization::Raw)
            .with_baseline(vec![0.5; 4])
            .unwrap();
        for _ in 0..4 {
            a.record(&[1.0; 4]).unwrap();
        }
        assert_eq!(a.buffer().as_slice().len(), 16);
        assert_eq!(a.n_samples(), 4);
        let s = a.analyze().unwrap();
        assert_eq!((s.n_freq, s.n_wavenumbers), (4, 3));
    }

    #[test]
    fn ragged_buffer_is_a_plan_failure() {
        let mut a = analyzer_with(8, 4, Window::Hann, Normalization::Raw, |t, p| (t + p) as f64);
        a.buffer.data.push(1.0);
        assert!(matches!(
            a.analyze(),
            Err(AnalysisError::PlanFailure {
                samples: 8,
                sites: 4,
                reason: "ragged buffer"
            })
        ));
    }

    #[test]
    fn output_shape_is_t_by_half_n_plus_one() {
        let a = analyzer_with(16, 10, Window::Hann, Normalization::Raw, |t, p| {
            (t * p) as f64
        });
        let s = a.analyze().unwrap();
        assert_eq!(s.n_freq, 16);
        assert_eq!(s.n_wavenumbers, 6);
        assert_eq!(s.data.len(), 16 * 6);
        assert!(s.data.iter().all(|&v| v >= 0.0 && v.is_finite()));
    }

    #[test]
    fn dc_removed_constant_signal_has_no_spectral_content() {
        let (t_len, n) = (64, 8);
        let mut a = SpectralAnalyzer::new(n, Window::Hann, Normalization::Raw)
            .with_baseline(vec![1.0; n])
            .unwrap();
        for _ in 0..t_len {
            a.record(&[1.0; 8]).unwrap();
        }
        let s = a.analyze().unwrap();
        assert_eq!((s.n_freq, s.n_wavenumbers), (64, 5));
        assert!(s.data.iter().all(|&v| v.abs() < 1e-12));
    }

    #[test]
    fn constant_signal_concentrates_in_dc_column() {
        let (t_len, n) = (64, 8);
        let s = analyzer_with(t_len, n, Window::Hann, Normalization::Raw, |_, _| 1.0)
            .analyze()
            .unwrap();
        let dc = s.get(0, 0);
        // Σ_t hann(t) = (T-1)/2, times N sites
        assert!((dc - 0.5 * (t_len - 1) as f64 * n as f64).abs() < 1e-9);
        assert_eq!(s.peak().0, 0);
        assert_eq!(s.peak().1, 0);

        for r in 0..t_len {
            for c in 1..s.n_wavenumbers {
                assert!(s.get(r, c) < 1e-9 * dc, "leak at ({}, {})", r, c);
            }
            if r > 1 && r < t_len - 1 {
                assert!(s.get(r, 0) < 0.05 * dc, "row {} above leakage floor", r);
            }
        }
    }

    #[test]
    fn travelling_wave_peaks_at_its_bin() {
        let (t_len, n) = (64, 8);
        let (a, b) = (10usize, 2usize);
        let s = analyzer_with(t_len, n, Window::Hann, Normalization::Raw, |t, p| {
            (2.0 * PI * (a as f64 * t as f64 / t_len as f64 + b as f64 * p as f64 / n as f64))
                .cos()
        })
        .analyze()
        .unwrap();
        let (r, c, _) = s.peak();
        assert_eq!((r, c), (a, b));
        assert_eq!(s.peak_in_column(b).0, a);
    }

    #[test]
    fn one_sided_normalisation_recovers_amplitude() {
        let (t_len, n) = (32, 8);
        let amp = 0.75;
        let s = analyzer_with(
            t_len,
            n,
            Window::Tukey { alpha: 0.0 },
            Normalization::OneSided,
            |t, p| amp * (2.0 * PI * (3.0 * t as f64 / t_len as f64 + p as f64 / n as f64)).cos(),
        )
        .analyze()
        .unwrap();
        assert!((s.get(3, 1) - amp).abs() < 1e-12, "got {}", s.get(3, 1));
    }

    #[test]
    fn too_few_samples_is_a_plan_failure() {
        let a = analyzer_with(1, 8, Window::Hann, Normalization::Raw, |_, _| 0.0);
        assert!(matches!(
            a.analyze(),
            Err(AnalysisError::PlanFailure { samples: 1, .. })
        ));
        let empty = SpectralAnalyzer::new(8, Window::Hann, Normalization::Raw);
        assert!(matches!(
            empty.analyze(),
            Err(AnalysisError::PlanFailure { samples: 0, .. })
        ));
    }

    #[test]
    fn oversized_workspace_is_an_allocation_failure() {
        assert!(matches!(
            FftWorkspace::acquire(usize::MAX / 2, 4),
            Err(AnalysisError::AllocationFailure { .. })
        ));
        assert!(matches!(
            FftWorkspace::acquire(1 << 40, 1 << 20),
            Err(AnalysisError::AllocationFailure { .. })
        ));
    }

    #[test]
    fn csv_rows_have_no_trailing_comma() {
        let s = SpectrumResult {
            n_freq: 2,
            n_wavenumbers: 3,
            n_sites: 4,
            data: vec![0.0, 1.5, 2.25, 3.0, 4.125, 5.0],
        };
        assert_eq!(
            s.to_csv_string(),
            "0.000000,1.500000,2.250000\n3.000000,4.125000,5.000000\n"
        );
    }

    #[test]
    fn write_csv_leaves_no_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("result.csv");
        let s = SpectrumResult {
            n_freq: 1,
            n_wavenumbers: 2,
            n_sites: 2,
            data: vec![1.0, 2.0],
        };
        s.write_csv(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1.000000,2.000000\n");
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
