//! Timescan: per-pixel statistics over a multi-temporal stack
//!
//! The stack is read in row blocks, every pixel's time series is reduced to
//! the requested metrics and each metric is written to its own GeoTIFF.

use crate::config::{Metric, OutputDtype};
use crate::core::dimap::check_out_tiff;
use crate::core::gpt::{with_retries, STEP_ATTEMPTS};
use crate::core::raster::{
    apply_mask, build_vrt, create_geotiff, describe_band, nan_to_zero, read_band, read_rows, scale_to_int,
    write_rows, GeoReference,
};
use crate::types::{SarError, SarResult};
use chrono::{Datelike, NaiveDate};
use gdal::Dataset;
#[cfg(feature = "parallel")]
use ndarray::parallel::prelude::*;
use ndarray::{s, Array2, Array3, ArrayView2, ArrayViewMut2, Axis};
use regex::Regex;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Rows processed per block
const BLOCK_ROWS: usize = 256;

/// Layers needed before outliers are removed
const MIN_LAYERS_FOR_OUTLIERS: usize = 5;

/// Harmonic model outputs, in output order
pub const HARMONIC_METRICS: [&str; 5] = ["amplitude", "phase", "residuals", "trend", "model_mean"];

/// Metrics converted back to dB after being computed in power
const POWER_METRICS: [&str; 6] = ["avg", "min", "max", "p95", "p5", "median"];

/// Metrics that always need integer scaling for integer output
const ALWAYS_SCALED: [&str; 2] = ["cov", "phase"];

/// Output layer names of the requested metrics.
///
/// Harmonics and percentiles expand into several layers appended at the end.
pub fn expand_metrics(metrics: &[Metric], with_harmonics: bool) -> Vec<&'static str> {
    let mut names = Vec::new();
    for metric in metrics {
        let name = match metric {
            Metric::Avg => "avg",
            Metric::Max => "max",
            Metric::Min => "min",
            Metric::Std => "std",
            Metric::Cov => "cov",
            Metric::Median => "median",
            Metric::Harmonics | Metric::Percentiles => continue,
        };
        if !names.contains(&name) {
            names.push(name);
        }
    }
    if with_harmonics && metrics.contains(&Metric::Harmonics) {
        names.extend(HARMONIC_METRICS);
    }
    if metrics.contains(&Metric::Percentiles) {
        names.extend(["p95", "p5"]);
    }
    names
}

/// Stretch range of a metric for integer output
pub fn metric_range(name: &str) -> (f32, f32) {
    match name {
        "std" => (0.00001, 0.2),
        "cov" => (0.00001, 1.0),
        "amplitude" => (-5.0, 5.0),
        "phase" => (-PI as f32, PI as f32),
        "residuals" => (-10.0, 10.0),
        "trend" => (-5.0, 5.0),
        _ => (-30.0, 5.0),
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Decimal year on a 366 day grid; non-leap years skip Feb 29
pub fn date_as_float(date: NaiveDate) -> f64 {
    let size_of_day = 1.0 / 366.0;
    let mut days = date.ordinal0() as f64;
    if !is_leap_year(date.year()) && days >= 59.0 {
        days += 1.0;
    }
    date.year() as f64 + days * size_of_day
}

/// Years between two dates on the decimal year grid
pub fn difference_in_years(start: NaiveDate, end: NaiveDate) -> f64 {
    date_as_float(end) - date_as_float(start)
}

/// Design matrix rows `[t, cos 2πt, sin 2πt, 1]` with t in years since 1970
pub fn harmonic_design(dates: &[NaiveDate]) -> Vec<[f64; 4]> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    let mut sorted = dates.to_vec();
    sorted.sort();
    sorted
        .iter()
        .map(|&date| {
            let t = difference_in_years(epoch, date);
            [t, (2.0 * PI * t).cos(), (2.0 * PI * t).sin(), 1.0]
        })
        .collect()
}

/// Linear interpolation percentile of sorted values, as numpy does
pub fn percentile_sorted(sorted: &[f32], q: f64) -> f32 {
    if sorted.is_empty() {
        return f32::NAN;
    }
    let k = (sorted.len() - 1) as f64 * q / 100.0;
    let f = k.floor() as usize;
    let c = k.ceil() as usize;
    if f == c {
        return sorted[f];
    }
    (sorted[f] as f64 * (c as f64 - k) + sorted[c] as f64 * (k - f as f64)) as f32
}

fn sorted_finite(values: &[f32]) -> Vec<f32> {
    let mut finite: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    finite.sort_by(|a, b| a.total_cmp(b));
    finite
}

fn mean_std(values: &[f32]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Mask values outside mean ± 2σ, where mean and σ come from the 5-95 percentile core
pub fn remove_outliers(series: &mut [f32]) {
    let sorted = sorted_finite(series);
    if sorted.is_empty() {
        return;
    }
    let p95 = percentile_sorted(&sorted, 95.0);
    let p5 = percentile_sorted(&sorted, 5.0);
    let core: Vec<f32> = sorted.iter().copied().filter(|&v| v >= p5 && v <= p95).collect();
    if core.is_empty() {
        return;
    }
    let (mean, std) = mean_std(&core);
    let (low, high) = (mean - 2.0 * std, mean + 2.0 * std);
    for v in series.iter_mut() {
        let value = *v as f64;
        if value > high || value < low {
            *v = f32::NAN;
        }
    }
}

/// Solve a 4x4 system with partial pivoting
fn solve4(mut a: [[f64; 4]; 4], mut b: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot = (col..4).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..4 {
            let factor = a[row][col] / a[col][col];
            for k in col..4 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0; 4];
    for row in (0..4).rev() {
        let sum: f64 = (row + 1..4).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - sum) / a[row][row];
    }
    Some(x)
}

/// Harmonic model fit of one time series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicFit {
    pub trend: f64,
    pub cos: f64,
    pub sin: f64,
    pub mean: f64,
    /// Root mean square of the residuals
    pub rms: f64,
}

impl HarmonicFit {
    pub fn amplitude(&self) -> f64 {
        self.cos.hypot(self.sin)
    }

    pub fn phase(&self) -> f64 {
        self.sin.atan2(self.cos)
    }
}

/// Least squares fit of `y` against the design rows, using finite observations only
pub fn fit_harmonics(design: &[[f64; 4]], y: &[f32]) -> Option<HarmonicFit> {
    let obs: Vec<(&[f64; 4], f64)> = design
        .iter()
        .zip(y)
        .filter(|(_, v)| v.is_finite())
        .map(|(row, &v)| (row, v as f64))
        .collect();
    if obs.len() < 4 {
        return None;
    }

    let mut ata = [[0.0; 4]; 4];
    let mut aty = [0.0; 4];
    for (row, v) in &obs {
        for i in 0..4 {
            aty[i] += row[i] * v;
            for j in 0..4 {
                ata[i][j] += row[i] * row[j];
            }
        }
    }
    let x = solve4(ata, aty)?;

    let ssr: f64 = obs
        .iter()
        .map(|(row, v)| {
            let model: f64 = (0..4).map(|i| row[i] * x[i]).sum();
            (v - model).powi(2)
        })
        .sum();

    Some(HarmonicFit {
        trend: x[0],
        cos: x[1],
        sin: x[2],
        mean: x[3],
        rms: (ssr / obs.len() as f64).sqrt(),
    })
}

fn to_db(value: f32) -> f32 {
    let v = if value < 0.0 { 1e-7 } else { value };
    10.0 * v.max(1e-13).log10()
}

/// How the stack values are interpreted
#[derive(Debug, Clone, PartialEq)]
pub struct TimescanParams {
    pub metrics: Vec<Metric>,
    /// Data type of the stack and of the metric layers
    pub dtype: OutputDtype,
    /// Integer input holds a -30..5 dB stretch to undo
    pub rescale: bool,
    /// Input is dB; statistics are computed in linear power
    pub to_power: bool,
    pub remove_outliers: bool,
    /// Acquisition dates of the layers, needed for harmonics
    pub dates: Option<Vec<NaiveDate>>,
    /// Raster on the stack grid; flagged pixels are written as no-data
    pub ls_mask: Option<PathBuf>,
}

impl TimescanParams {
    /// Layer names actually produced for these parameters
    pub fn output_metrics(&self) -> Vec<&'static str> {
        let with_harmonics = self.dates.as_ref().map(|d| !d.is_empty()).unwrap_or(false);
        if self.metrics.contains(&Metric::Harmonics) && !with_harmonics {
            log::warn!("Harmonics need the acquisition dates and will not be calculated");
        }
        expand_metrics(&self.metrics, with_harmonics)
    }

    fn rescale_input(&self) -> Option<(f32, f32)> {
        if !self.rescale {
            return None;
        }
        match self.dtype {
            OutputDtype::Uint8 => Some((35.0 / 254.0, -30.0 - 35.0 / 254.0)),
            OutputDtype::Uint16 => Some((35.0 / 65535.0, -30.0 - 35.0 / 65535.0)),
            OutputDtype::Float32 => None,
        }
    }

    /// Whether a metric layer is stretched to integers before writing
    pub fn scales(&self, name: &str) -> bool {
        self.dtype != OutputDtype::Float32 && (self.rescale || ALWAYS_SCALED.contains(&name))
    }
}

/// Reduce one pixel's time series to the metric values in `names` order
pub fn pixel_metrics(
    series: &mut [f32],
    names: &[&str],
    params: &TimescanParams,
    design: Option<&[[f64; 4]]>,
) -> Vec<f32> {
    if let Some((a, b)) = params.rescale_input() {
        for v in series.iter_mut() {
            *v = if *v == 0.0 { f32::NAN } else { *v * a + b };
        }
    }
    if params.to_power {
        for v in series.iter_mut() {
            *v = 10f32.powf(*v / 10.0);
        }
    }
    if params.remove_outliers && series.len() >= MIN_LAYERS_FOR_OUTLIERS {
        remove_outliers(series);
    }

    let sorted = sorted_finite(series);
    let (mean, std) = if sorted.is_empty() {
        (f64::NAN, f64::NAN)
    } else {
        mean_std(&sorted)
    };

    let fit = match design {
        Some(design) if names.contains(&"amplitude") => {
            let y: Vec<f32> = if params.to_power {
                series.iter().map(|&v| if v.is_nan() { v } else { to_db(v) }).collect()
            } else {
                series.to_vec()
            };
            fit_harmonics(design, &y)
        }
        _ => None,
    };

    names
        .iter()
        .map(|&name| {
            let value = match name {
                "avg" => mean as f32,
                "std" => std as f32,
                "cov" => (std / mean) as f32,
                "min" => sorted.first().copied().unwrap_or(f32::NAN),
                "max" => sorted.last().copied().unwrap_or(f32::NAN),
                "median" => percentile_sorted(&sorted, 50.0),
                "p95" => percentile_sorted(&sorted, 95.0),
                "p5" => percentile_sorted(&sorted, 5.0),
                "amplitude" => fit.map(|f| f.amplitude() as f32).unwrap_or(f32::NAN),
                "phase" => fit.map(|f| f.phase() as f32).unwrap_or(f32::NAN),
                "residuals" => fit.map(|f| f.rms as f32).unwrap_or(f32::NAN),
                "trend" => fit.map(|f| f.trend as f32).unwrap_or(f32::NAN),
                "model_mean" => fit.map(|f| f.mean as f32).unwrap_or(f32::NAN),
                _ => f32::NAN,
            };
            if params.to_power && POWER_METRICS.contains(&name) && !value.is_nan() {
                to_db(value)
            } else {
                value
            }
        })
        .collect()
}

fn process_row(
    mut out_row: ArrayViewMut2<f32>,
    stack_row: ArrayView2<f32>,
    names: &[&str],
    params: &TimescanParams,
    design: Option<&[[f64; 4]]>,
) {
    let mut series = Vec::with_capacity(stack_row.nrows());
    for col in 0..stack_row.ncols() {
        series.clear();
        series.extend(stack_row.column(col).iter().copied());
        for (m, value) in pixel_metrics(&mut series, names, params, design).into_iter().enumerate() {
            out_row[[m, col]] = value;
        }
    }
}

/// Metrics of a `(layers, rows, cols)` block as `(metrics, rows, cols)`
pub fn process_block(
    stack: &Array3<f32>,
    names: &[&str],
    params: &TimescanParams,
    design: Option<&[[f64; 4]]>,
) -> Array3<f32> {
    let (_, rows, cols) = stack.dim();
    let mut out = Array3::<f32>::from_elem((names.len(), rows, cols), f32::NAN);

    #[cfg(feature = "parallel")]
    out.axis_iter_mut(Axis(1))
        .into_par_iter()
        .zip(stack.axis_iter(Axis(1)).into_par_iter())
        .for_each(|(out_row, stack_row)| process_row(out_row, stack_row, names, params, design));

    #[cfg(not(feature = "parallel"))]
    out.axis_iter_mut(Axis(1))
        .zip(stack.axis_iter(Axis(1)))
        .for_each(|(out_row, stack_row)| process_row(out_row, stack_row, names, params, design));

    out
}

fn read_block(dataset: &Dataset, layers: usize, row_offset: usize, rows: usize, cols: usize) -> SarResult<Array3<f32>> {
    let mut block = Array3::<f32>::zeros((layers, rows, cols));
    for layer in 0..layers {
        let data = read_rows(dataset, (layer + 1) as isize, row_offset, rows)?;
        block.index_axis_mut(Axis(0), layer).assign(&data);
    }
    Ok(block)
}

pub fn metric_file(out_prefix: &Path, name: &str) -> PathBuf {
    let mut file = out_prefix.as_os_str().to_os_string();
    file.push(format!(".{}.tif", name));
    PathBuf::from(file)
}

fn prefix_name(out_prefix: &Path) -> String {
    out_prefix
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn processed_marker(out_prefix: &Path) -> PathBuf {
    let dir = out_prefix.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{}.processed", prefix_name(out_prefix)))
}

fn write_metrics(stack: &Path, out_prefix: &Path, names: &[&'static str], params: &TimescanParams) -> SarResult<Vec<PathBuf>> {
    let src = Dataset::open(stack)?;
    let georef = GeoReference::from_dataset(&src)?;
    let layers = src.raster_count() as usize;
    let (cols, rows) = georef.size;

    let design = match &params.dates {
        Some(dates) if names.contains(&"amplitude") => {
            if dates.len() != layers {
                return Err(SarError::Processing(format!(
                    "{} dates for {} layers in {}",
                    dates.len(),
                    layers,
                    stack.display()
                )));
            }
            Some(harmonic_design(dates))
        }
        _ => None,
    };

    let mask = match &params.ls_mask {
        Some(path) => {
            let (mask, mask_georef) = read_band(path, 1)?;
            if mask_georef.size != georef.size {
                return Err(SarError::Processing(format!(
                    "Mask {} does not match the grid of {}",
                    path.display(),
                    stack.display()
                )));
            }
            Some(mask)
        }
        None => None,
    };

    let files: Vec<PathBuf> = names.iter().map(|n| metric_file(out_prefix, n)).collect();
    let mut outputs = Vec::with_capacity(names.len());
    for file in &files {
        outputs.push(create_geotiff(file, &georef, 1, params.dtype)?);
    }

    let mut row_offset = 0;
    while row_offset < rows {
        let block_rows = BLOCK_ROWS.min(rows - row_offset);
        let block = read_block(&src, layers, row_offset, block_rows, cols)?;
        let metrics = process_block(&block, names, params, design.as_deref());
        let block_mask = mask
            .as_ref()
            .map(|m| m.slice(s![row_offset..row_offset + block_rows, ..]).to_owned());

        for (m, name) in names.iter().enumerate() {
            let mut layer: Array2<f32> = metrics.index_axis(Axis(0), m).to_owned();
            if params.scales(name) {
                let (min, max) = metric_range(name);
                layer = scale_to_int(&layer, min, max, params.dtype)?;
            }
            nan_to_zero(&mut layer);
            if let Some(block_mask) = &block_mask {
                apply_mask(&mut layer, block_mask)?;
            }
            write_rows(&outputs[m], 1, row_offset, &layer, params.dtype)?;
        }
        row_offset += block_rows;
    }

    let base = prefix_name(out_prefix);
    for (m, name) in names.iter().enumerate() {
        describe_band(&outputs[m], 1, &format!("{}_{}", base, name))?;
    }
    drop(outputs);
    Ok(files)
}

/// Compute timescan layers `<out_prefix>.<metric>.tif` from a stack.
///
/// All layers are checked; if one fails, all are removed. Returns the
/// written files in metric order.
pub fn mt_metrics(stack: &Path, out_prefix: &Path, params: &TimescanParams) -> SarResult<Vec<PathBuf>> {
    let names = params.output_metrics();
    if names.is_empty() {
        return Err(SarError::Config("No timescan metrics to compute".to_string()));
    }
    if let Some(dir) = out_prefix.parent() {
        std::fs::create_dir_all(dir)?;
    }
    log::info!(
        "Creating timescan layers {:?} for {}",
        names,
        prefix_name(out_prefix)
    );

    let files = with_retries("Timescan", STEP_ATTEMPTS, Duration::from_secs(1), || {
        let files = write_metrics(stack, out_prefix, &names, params)?;
        for file in &files {
            if let Err(e) = check_out_tiff(file, true) {
                for f in &files {
                    let _ = std::fs::remove_file(f);
                    let _ = std::fs::remove_file(crate::core::dimap::with_added_extension(f, "aux.xml"));
                }
                return Err(e);
            }
        }
        Ok(files)
    })?;

    std::fs::write(processed_marker(out_prefix), "passed all tests\n")?;
    Ok(files)
}

/// Products whose timescan layers go into the VRT, in band order
pub const TIMESCAN_PRODUCTS: [&str; 11] = [
    "bs.HH", "bs.VV", "bs.HV", "bs.VH", "coh.VV", "coh.VH", "coh.HH", "coh.HV", "pol.Entropy",
    "pol.Anisotropy", "pol.Alpha",
];

/// Drop the `<NN>.` prefix of layers numbered by an earlier run
fn strip_numbering(timescan_dir: &Path) -> SarResult<()> {
    let numbered = Regex::new(r"^\d{2}\.(.+\.tif)$")
        .map_err(|e| SarError::Processing(format!("Invalid layer pattern: {}", e)))?;
    for entry in std::fs::read_dir(timescan_dir)? {
        let path = entry?.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if let Some(caps) = numbered.captures(&name) {
            std::fs::rename(&path, timescan_dir.join(&caps[1]))?;
        }
    }
    Ok(())
}

/// Number the timescan layers and stack them into `Timescan.vrt`
pub fn create_tscan_vrt(timescan_dir: &Path, metric_names: &[&str]) -> SarResult<PathBuf> {
    strip_numbering(timescan_dir)?;
    let mut outfiles = Vec::new();
    let mut i = 0;
    for product in TIMESCAN_PRODUCTS {
        for metric in metric_names {
            let infile = timescan_dir.join(format!("{}.{}.tif", product, metric));
            if !infile.exists() {
                continue;
            }
            i += 1;
            let outfile = timescan_dir.join(format!("{:02}.{}.{}.tif", i, product, metric));
            std::fs::rename(&infile, &outfile)?;
            outfiles.push(outfile);
        }
    }
    let vrt = timescan_dir.join("Timescan.vrt");
    build_vrt(&vrt, &outfiles, &timescan_dir.join("Timescan.vrt.errLog"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> TimescanParams {
        TimescanParams {
            metrics: vec![Metric::Avg, Metric::Max, Metric::Min, Metric::Std, Metric::Cov],
            dtype: OutputDtype::Float32,
            rescale: false,
            to_power: false,
            remove_outliers: false,
            dates: None,
            ls_mask: None,
        }
    }

    #[test]
    fn metric_expansion() {
        let names = expand_metrics(&[Metric::Harmonics, Metric::Avg, Metric::Percentiles], true);
        assert_eq!(names, vec!["avg", "amplitude", "phase", "residuals", "trend", "model_mean", "p95", "p5"]);
        let names = expand_metrics(&[Metric::Harmonics, Metric::Median], false);
        assert_eq!(names, vec!["median"]);
    }

    #[test]
    fn decimal_years() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        assert_relative_eq!(date_as_float(d(2020, 1, 1)), 2020.0);
        // Mar 1st lands on the same day of the grid in leap and non-leap years
        assert_relative_eq!(date_as_float(d(2019, 3, 1)) - 2019.0, date_as_float(d(2020, 3, 1)) - 2020.0);
        assert_relative_eq!(difference_in_years(d(2019, 1, 1), d(2020, 1, 1)), 1.0);
    }

    #[test]
    fn percentiles_interpolate_linearly() {
        let sorted = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&sorted, 50.0), 3.0);
        assert_relative_eq!(percentile_sorted(&sorted, 95.0), 4.8, epsilon = 1e-6);
        assert_relative_eq!(percentile_sorted(&sorted, 5.0), 1.2, epsilon = 1e-6);
        assert!(percentile_sorted(&[], 50.0).is_nan());
    }

    #[test]
    fn outliers_are_masked() {
        let mut series = vec![1.0f32, 1.1, 0.9, 1.0, 1.05, 0.95, 50.0];
        remove_outliers(&mut series);
        assert!(series[6].is_nan());
        assert_eq!(series[0], 1.0);
    }

    #[test]
    fn basic_statistics() {
        let p = params();
        let names = p.output_metrics();
        let mut series = vec![1.0f32, 2.0, f32::NAN, 3.0];
        let values = pixel_metrics(&mut series, &names, &p, None);
        assert_relative_eq!(values[0], 2.0);
        assert_eq!(values[1], 3.0);
        assert_eq!(values[2], 1.0);
        assert_relative_eq!(values[3], (2.0f32 / 3.0).sqrt(), epsilon = 1e-6);
        assert_relative_eq!(values[4], (2.0f32 / 3.0).sqrt() / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn db_input_is_averaged_in_power() {
        let mut p = params();
        p.metrics = vec![Metric::Avg];
        p.to_power = true;
        let mut series = vec![0.0f32, 10.0];
        let values = pixel_metrics(&mut series, &["avg"], &p, None);
        // mean of 1 and 10 in power
        assert_relative_eq!(values[0], 10.0 * 5.5f32.log10(), epsilon = 1e-4);
    }

    #[test]
    fn harmonic_fit_recovers_the_model() {
        let dates: Vec<NaiveDate> = (0..24)
            .map(|i| NaiveDate::from_ymd_opt(2019 + i / 12, (i % 12) as u32 + 1, 15).unwrap())
            .collect();
        let design = harmonic_design(&dates);
        let y: Vec<f32> = design
            .iter()
            .map(|r| (0.01 * r[0] + 2.0 * r[1] + 1.0 * r[2] - 12.0) as f32)
            .collect();
        let fit = fit_harmonics(&design, &y).unwrap();
        assert_relative_eq!(fit.cos, 2.0, epsilon = 1e-2);
        assert_relative_eq!(fit.sin, 1.0, epsilon = 1e-2);
        assert_relative_eq!(fit.amplitude(), 5f64.sqrt(), epsilon = 1e-2);
        assert!(fit.rms < 1e-3);

        assert!(fit_harmonics(&design[..3], &y[..3]).is_none());
    }

    #[test]
    fn block_processing_keeps_pixel_order() {
        let p = params();
        let names = ["avg", "max"];
        let mut stack = Array3::<f32>::zeros((3, 2, 2));
        for layer in 0..3 {
            for r in 0..2 {
                for c in 0..2 {
                    stack[[layer, r, c]] = (r * 2 + c) as f32 + layer as f32;
                }
            }
        }
        let out = process_block(&stack, &names, &p, None);
        assert_eq!(out.dim(), (2, 2, 2));
        assert_relative_eq!(out[[0, 1, 1]], 4.0);
        assert_eq!(out[[1, 0, 1]], 3.0);
    }

    #[test]
    fn integer_output_scaling_rules() {
        let mut p = params();
        assert!(!p.scales("cov"));
        p.dtype = OutputDtype::Uint8;
        assert!(p.scales("cov"));
        assert!(p.scales("phase"));
        assert!(!p.scales("avg"));
        p.rescale = true;
        assert!(p.scales("avg"));
    }

    #[test]
    fn masked_pixels_are_written_as_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let georef = GeoReference {
            geo_transform: [0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
            projection: String::new(),
            size: (3, 2),
        };
        let stack = dir.path().join("Timeseries.bs.VV.vrt.tif");
        {
            let ds = create_geotiff(&stack, &georef, 3, OutputDtype::Float32).unwrap();
            for band in 1..=3 {
                let layer = Array2::from_elem((2, 3), band as f32);
                write_rows(&ds, band, 0, &layer, OutputDtype::Float32).unwrap();
            }
        }
        let mask_file = dir.path().join("117.ls_mask.tif");
        {
            let ds = create_geotiff(&mask_file, &georef, 1, OutputDtype::Uint8).unwrap();
            let mask = ndarray::array![[0.0f32, 1.0, 0.0], [1.0, 0.0, 0.0]];
            write_rows(&ds, 1, 0, &mask, OutputDtype::Uint8).unwrap();
        }

        let params = TimescanParams { ls_mask: Some(mask_file), ..params() };
        let prefix = dir.path().join("bs.VV");
        let files = write_metrics(&stack, &prefix, &["avg"], &params).unwrap();
        let (avg, _) = read_band(&files[0], 1).unwrap();
        assert_eq!(avg, ndarray::array![[2.0f32, 0.0, 2.0], [0.0, 2.0, 2.0]]);
    }

    #[test]
    fn timescan_layers_are_numbered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["bs.VV.avg.tif", "bs.VH.avg.tif", "bs.VV.max.tif"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        // the VRT itself needs gdalbuildvrt, the renaming happens before
        let _ = create_tscan_vrt(dir.path(), &["avg", "max"]);
        assert!(dir.path().join("01.bs.VV.avg.tif").exists());
        assert!(dir.path().join("02.bs.VV.max.tif").exists());
        assert!(dir.path().join("03.bs.VH.avg.tif").exists());

        // a second run keeps the numbering
        let _ = create_tscan_vrt(dir.path(), &["avg", "max"]);
        assert!(dir.path().join("02.bs.VV.max.tif").exists());
        assert!(!dir.path().join("bs.VV.max.tif").exists());
    }
}
