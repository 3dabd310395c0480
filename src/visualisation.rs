// src/visualisation.rs
//
// PNG diagnostics for the headless driver: energy trace and dispersion heat map.

use plotters::prelude::*;

use crate::spectrum::SpectrumResult;

/// Map a value in [lo, hi] to a blue–white–red colour.
/// Falls back to [0, 1] when the range is degenerate.
fn value_to_color(v: f64, lo: f64, hi: f64) -> RGBColor {
    let (mut lo, mut hi) = (lo, hi);
    if !lo.is_finite() || !hi.is_finite() || (hi - lo).abs() < 1e-12 {
        lo = 0.0;
        hi = 1.0;
    }

    let x = ((v - lo) / (hi - lo)).clamp(0.0, 1.0);

    // x=0 -> blue, x=0.5 -> white, x=1 -> red
    let r = (255.0 * x) as u8;
    let b = (255.0 * (1.0 - x)) as u8;
    let g = (255.0 * (1.0 - (2.0 * (x - 0.5).abs()))).clamp(0.0, 255.0) as u8;

    RGBColor(r, g, b)
}

/// log10(1 + |X|) per cell, plus its finite min/max.
fn log_magnitudes(spectrum: &SpectrumResult) -> (Vec<f64>, f64, f64) {
    let vals: Vec<f64> = spectrum
        .data
        .iter()
        .map(|v| v.abs().ln_1p() / std::f64::consts::LN_10)
        .collect();
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for &v in vals.iter().filter(|v| v.is_finite()) {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    (vals, lo, hi)
}

/// Heat map of the (frequency row, wavenumber column) magnitude table.
///
/// Only the lower half of the frequency rows is drawn (the upper half mirrors negative
/// frequencies). `sample_interval` labels the y axis in 1/ps.
pub fn save_dispersion_plot(
    spectrum: &SpectrumResult,
    sample_interval: f64,
    filename: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if spectrum.data.is_empty() {
        return Ok(());
    }

    let (vals, lo, hi) = log_magnitudes(spectrum);
    let n_rows = (spectrum.n_freq / 2).max(1);
    let n_cols = spectrum.n_wavenumbers;
    let f_max = spectrum.frequency(n_rows, sample_interval);
    let k_max = spectrum.wavenumber(n_cols);

    let root = BitMapBackend::new(filename, (900, 800)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(30)
        .caption(
            "Spin-wave dispersion log10(1 + |S_z(k, f)|)",
            ("sans-serif", 22),
        )
        .set_left_and_bottom_label_area_size(60)
        .build_cartesian_2d(0.0..k_max, 0.0..f_max)?;

    chart
        .configure_mesh()
        .x_desc("k (rad / site)")
        .y_desc("f (1/ps)")
        .axis_desc_style(("sans-serif", 16))
        .draw()?;

    let vals = &vals;
    chart.draw_series((0..n_rows).flat_map(move |r| {
        (0..n_cols).map(move |c| {
            let v = vals[r * n_cols + c];
            let x0 = spectrum.wavenumber(c);
            let x1 = spectrum.wavenumber(c + 1);
            let y0 = spectrum.frequency(r, sample_interval);
            let y1 = spectrum.frequency(r + 1, sample_interval);
            Rectangle::new([(x0, y0), (x1, y1)], value_to_color(v, lo, hi).filled())
        })
    }))?;

    root.present()?;
    Ok(())
}

/// Total energy versus time.
pub fn save_energy_plot(
    times: &[f64],
    energies: &[f64],
    filename: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (Some(&t_min), Some(&t_max)) = (times.first(), times.last()) else {
        return Ok(()); // nothing to plot
    };
    let t_max = if t_max > t_min { t_max } else { t_min + 1.0 };

    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for &e in energies.iter().filter(|e| e.is_finite()) {
        y_min = y_min.min(e);
        y_max = y_max.max(e);
    }
    if !y_min.is_finite() || !y_max.is_finite() {
        y_min = -1.0;
        y_max = 1.0;
    } else {
        // 10% margin; widen a flat trace
        let margin = (0.1 * (y_max - y_min)).max(1e-6);
        y_min -= margin;
        y_max += margin;
    }

    let root = BitMapBackend::new(filename, (1024, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption("Total energy vs time", ("sans-serif", 30))
        .set_left_and_bottom_label_area_size(60)
        .build_cartesian_2d(t_min..t_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("time (ps)")
        .y_desc("E (meV)")
        .label_style(("sans-serif", 16))
        .axis_desc_style(("sans-serif", 18))
        .draw()?;

    chart.draw_series(LineSeries::new(
        times.iter().zip(energies).map(|(&t, &e)| (t, e)),
        &BLACK,
    ))?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colour_map_endpoints() {
        assert_eq!(value_to_color(0.0, 0.0, 2.0), RGBColor(0, 0, 255));
        assert_eq!(value_to_color(2.0, 0.0, 2.0), RGBColor(255, 0, 0));
        assert_eq!(value_to_color(1.0, 0.0, 2.0), RGBColor(127, 255, 127));
        // degenerate range does not divide by zero
        assert_eq!(value_to_color(5.0, 1.0, 1.0), RGBColor(255, 0, 0));
    }

    #[test]
    fn log_magnitudes_range() {
        let s = SpectrumResult {
            n_freq: 1,
            n_wavenumbers: 3,
            n_sites: 4,
            data: vec![0.0, 9.0, 99.0],
        };
        let (v, lo, hi) = log_magnitudes(&s);
        assert!((v[1] - 1.0).abs() < 1e-12);
        assert_eq!(lo, 0.0);
        assert!((hi - 2.0).abs() < 1e-12);
    }
}
