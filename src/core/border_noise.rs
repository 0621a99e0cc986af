//! Removal of the low-value noise stripes at the swath edges of GRD images
//!
//! Columns at the outer edges whose mean stays below a threshold are zeroed,
//! and a safety margin of further columns behind the first valid one is
//! zeroed as well.

use crate::core::dimap::DimapProduct;
use crate::types::{SarError, SarResult};
use gdal::raster::Buffer;
use gdal::{Dataset, DatasetOptions, GdalOpenFlags};
use ndarray::Array2;
use std::path::Path;

/// Columns scanned at each edge
pub const EDGE_COLUMNS: usize = 3000;
/// Column mean (in DN) up to which a column counts as noise
pub const NOISE_THRESHOLD: f64 = 100.0;
/// Columns zeroed behind the first valid column
pub const SAFETY_MARGIN: usize = 200;

fn column_mean(window: &Array2<f32>, col: usize) -> f64 {
    let column = window.column(col);
    if column.is_empty() {
        return 0.0;
    }
    column.iter().map(|&v| v as f64).sum::<f64>() / column.len() as f64
}

/// Clean the near edge of `window`, scanning from column 0 inwards.
///
/// Returns the number of leading columns that were zeroed.
pub fn clean_left_edge(window: &mut Array2<f32>) -> usize {
    let cols = window.ncols();
    for x in 0..cols {
        if column_mean(window, x) <= NOISE_THRESHOLD {
            window.column_mut(x).fill(0.0);
            continue;
        }
        let end = (x + SAFETY_MARGIN).min(cols);
        for c in x..end {
            window.column_mut(c).fill(0.0);
        }
        return end;
    }
    cols
}

/// Clean the far edge of `window`, scanning from the last column inwards.
///
/// Returns the number of trailing columns that were zeroed.
pub fn clean_right_edge(window: &mut Array2<f32>) -> usize {
    let cols = window.ncols();
    for x in (0..cols).rev() {
        if column_mean(window, x) <= NOISE_THRESHOLD {
            window.column_mut(x).fill(0.0);
            continue;
        }
        let start = (x + 1).saturating_sub(SAFETY_MARGIN);
        for c in start..=x {
            window.column_mut(c).fill(0.0);
        }
        return cols - start;
    }
    cols
}

/// Apply both edge cleanings to a full image held in memory
pub fn remove_border_noise(image: &mut Array2<f32>) -> (usize, usize) {
    let cols = image.ncols();
    let edge = EDGE_COLUMNS.min(cols);

    let mut left = image.slice(ndarray::s![.., ..edge]).to_owned();
    let left_zeroed = clean_left_edge(&mut left);
    image.slice_mut(ndarray::s![.., ..edge]).assign(&left);

    let mut right = image.slice(ndarray::s![.., cols - edge..]).to_owned();
    let right_zeroed = clean_right_edge(&mut right);
    image.slice_mut(ndarray::s![.., cols - edge..]).assign(&right);

    (left_zeroed, right_zeroed)
}

fn read_window(band: &gdal::raster::RasterBand, x_off: usize, cols: usize, rows: usize) -> SarResult<Array2<f32>> {
    let buffer = band.read_as::<f32>((x_off as isize, 0), (cols, rows), (cols, rows), None)?;
    Array2::from_shape_vec((rows, cols), buffer.data)
        .map_err(|e| SarError::Processing(format!("Failed to reshape edge window: {}", e)))
}

fn write_window(band: &mut gdal::raster::RasterBand, x_off: usize, window: &Array2<f32>) -> SarResult<()> {
    let (rows, cols) = window.dim();
    let data: Vec<f32> = window.iter().copied().collect();
    let buffer = Buffer::new((cols, rows), data);
    band.write((x_off as isize, 0), (cols, rows), &buffer)?;
    Ok(())
}

/// Clean the edges of a single band image in place.
///
/// Only the two edge windows are read and written back.
pub fn remove_border_noise_in_file(image: &Path) -> SarResult<(usize, usize)> {
    let dataset = Dataset::open_ex(
        image,
        DatasetOptions {
            open_flags: GdalOpenFlags::GDAL_OF_UPDATE,
            ..Default::default()
        },
    )?;
    let mut band = dataset.rasterband(1)?;
    let (cols, rows) = band.size();
    let edge = EDGE_COLUMNS.min(cols);

    let mut left = read_window(&band, 0, edge, rows)?;
    let left_zeroed = clean_left_edge(&mut left);
    write_window(&mut band, 0, &left)?;

    let right_offset = cols - edge;
    let mut right = read_window(&band, right_offset, edge, rows)?;
    let right_zeroed = clean_right_edge(&mut right);
    write_window(&mut band, right_offset, &right)?;

    log::debug!(
        "Border noise removal on {}: {} columns left, {} columns right",
        image.display(),
        left_zeroed,
        right_zeroed
    );
    Ok((left_zeroed, right_zeroed))
}

/// Clean every band of an imported product
pub fn remove_product_border_noise(product: &DimapProduct) -> SarResult<()> {
    for image in product.images()? {
        remove_border_noise_in_file(&image)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with_noise(cols: usize, noisy_left: usize, noisy_right: usize) -> Array2<f32> {
        Array2::from_shape_fn((4, cols), |(_, c)| {
            if c < noisy_left || c >= cols - noisy_right {
                20.0
            } else {
                500.0
            }
        })
    }

    #[test]
    fn left_edge_includes_safety_margin() {
        let mut window = image_with_noise(1000, 10, 0);
        let zeroed = clean_left_edge(&mut window);
        assert_eq!(zeroed, 10 + SAFETY_MARGIN);
        assert_eq!(window[[0, 209]], 0.0);
        assert_eq!(window[[0, 210]], 500.0);
    }

    #[test]
    fn right_edge_mirrors_left_edge() {
        let mut window = image_with_noise(1000, 0, 5);
        let zeroed = clean_right_edge(&mut window);
        assert_eq!(zeroed, 5 + SAFETY_MARGIN);
        assert_eq!(window[[3, 1000 - 205]], 0.0);
        assert_eq!(window[[3, 1000 - 206]], 500.0);
    }

    #[test]
    fn noise_only_window_is_cleared() {
        let mut window = Array2::from_elem((3, 50), 10.0f32);
        assert_eq!(clean_left_edge(&mut window), 50);
        assert!(window.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn full_image_keeps_its_center() {
        let mut image = image_with_noise(8000, 30, 40);
        let (left, right) = remove_border_noise(&mut image);
        assert_eq!(left, 230);
        assert_eq!(right, 240);
        assert_eq!(image[[0, 4000]], 500.0);
        assert_eq!(image[[0, 229]], 0.0);
        assert_eq!(image[[0, 8000 - 241]], 500.0);
    }
}
