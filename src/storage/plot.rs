//! Scatter plot of intensity against applied voltage.

use plotters::prelude::*;
use std::path::Path;

use crate::error::{AppResult, SweepError};
use crate::sweep::SweepDataset;

const PLOT_SIZE: (u32, u32) = (900, 600);

/// Render `Average Intensity vs Applied Voltage` as a PNG at `path`.
///
/// Points with a non-finite intensity are skipped.
pub fn write_scatter_plot(path: &Path, dataset: &SweepDataset) -> AppResult<()> {
    let points: Vec<(f64, f64)> = dataset
        .observations()
        .iter()
        .map(|o| (o.voltage, o.mean_intensity))
        .filter(|(v, i)| v.is_finite() && i.is_finite())
        .collect();
    if points.is_empty() {
        return Err(SweepError::Plot("dataset has no plottable points".into()));
    }

    let x_range = padded_range(points.iter().map(|p| p.0));
    let y_range = padded_range(points.iter().map(|p| p.1));
    let plot_err = |e: &dyn std::fmt::Display| SweepError::Plot(e.to_string());

    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_err(&e))?;
    let mut chart = ChartBuilder::on(&root)
        .margin(15)
        .caption("Average Intensity vs Applied Voltage", ("sans-serif", 22))
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 45)
        .build_cartesian_2d(x_range, y_range)
        .map_err(|e| plot_err(&e))?;
    chart
        .configure_mesh()
        .x_desc("Voltage (V)")
        .y_desc("Intensity (Counts)")
        .draw()
        .map_err(|e| plot_err(&e))?;
    chart
        .draw_series(
            points
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 3, BLUE.filled())),
        )
        .map_err(|e| plot_err(&e))?;
    root.present().map_err(|e| plot_err(&e))?;
    Ok(())
}

fn padded_range(values: impl Iterator<Item = f64>) -> std::ops::Range<f64> {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let pad = if (max - min).abs() < f64::EPSILON {
        1.0
    } else {
        (max - min) * 0.05
    };
    (min - pad)..(max + pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_range_is_widened() {
        let range = padded_range([100.0, 100.0].into_iter());
        assert_eq!(range, 99.0..101.0);

        let range = padded_range([-10.0, 10.0].into_iter());
        assert_eq!(range, -11.0..11.0);
    }
}
