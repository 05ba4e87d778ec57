//! PNG renderings: the confusion matrix of a batch, and a four panel look at
//! one probe sample on its way to the wire.

use crate::diagnosis::Label;
use crate::metrics::ConfusionMatrix;
use crate::spectrogram::Spectrogram;
use crate::wire::Normalization;

use log::info;
use plotters::coord::{ranged1d::SegmentValue, Shift};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::{error::Error, path::Path};

/// Where the batch heatmap is saved by default.
pub const CONFUSION_MATRIX_PNG: &str = "mcu_inference_confusion_matrix.png";

/// Number of bins of the payload histogram.
pub const HISTOGRAM_BINS: usize = 50;

/// Default file name of a probe sample visualization.
pub fn visualization_file_name(code: &str) -> String {
    format!("stft_visualization_{}.png", code)
}

/// White to dark blue, for `t` in `[0, 1]`.
pub fn blues(t: f64) -> RGBColor {
    const LIGHT: (f64, f64, f64) = (247.0, 251.0, 255.0);
    const DARK: (f64, f64, f64) = (8.0, 48.0, 107.0);
    let t = t.clamp(0.0, 1.0);
    let mix = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    RGBColor(
        mix(LIGHT.0, DARK.0),
        mix(LIGHT.1, DARK.1),
        mix(LIGHT.2, DARK.2),
    )
}

/// Blue through green to red, for `t` in `[0, 1]`.
pub fn jet(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let channel = |offset: f64| {
        let v = 1.5 - (4.0 * t - offset).abs();
        (v.clamp(0.0, 1.0) * 255.0).round() as u8
    };
    RGBColor(channel(3.0), channel(2.0), channel(1.0))
}

/// Counts of `values` in `bins` equal bins spanning their range. The last
/// bin includes the maximum. Returns the bin edges along with the counts.
pub fn histogram(values: &[f64], bins: usize) -> (Vec<f64>, Vec<usize>) {
    let bins = bins.max(1);
    let mut lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !lo.is_finite() || !hi.is_finite() {
        (lo, hi) = (0.0, 1.0);
    }
    if hi <= lo {
        (lo, hi) = (lo - 0.5, hi + 0.5);
    }

    let width = (hi - lo) / bins as f64;
    let edges = (0..=bins)
        .map(|i| match i {
            i if i == bins => hi,
            i => lo + (hi - lo) * i as f64 / bins as f64,
        })
        .collect();
    let mut counts = vec![0; bins];
    for &v in values {
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    (edges, counts)
}

fn class_at(value: &SegmentValue<i32>, top_down: bool) -> String {
    match value {
        SegmentValue::CenterOf(i @ 0..=1) => {
            let idx = if top_down { 1 - *i } else { *i };
            Label::ALL[idx as usize].name().to_owned()
        }
        _ => String::new(),
    }
}

/// Draw the confusion matrix as an annotated heatmap. Truth runs down the
/// rows, predictions across the columns.
pub fn plot_confusion_matrix(
    cm: &ConfusionMatrix,
    accuracy: f64,
    file_out: impl AsRef<Path>,
) -> Result<(), Box<dyn Error>> {
    let file_out = file_out.as_ref();
    let peak = cm.counts.iter().flatten().copied().max().unwrap_or(0).max(1) as f64;

    let root = BitMapBackend::new(file_out, (800, 700)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!(
                "MCU Inference Confusion Matrix, accuracy {:.4} ({:.2}%)",
                accuracy,
                accuracy * 100.0
            ),
            ("sans-serif", 28).into_font(),
        )
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(90)
        .build_cartesian_2d((0i32..2).into_segmented(), (0i32..2).into_segmented())?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_label_formatter(&|v| class_at(v, false))
        .y_label_formatter(&|v| class_at(v, true))
        .x_label_style(("sans-serif", 20).into_font())
        .y_label_style(("sans-serif", 20).into_font())
        .x_desc("Predicted label")
        .y_desc("True label")
        .draw()?;

    // the first class goes on top, so rows count down from y = 1
    let cells: Vec<(i32, i32, usize)> = Label::ALL
        .iter()
        .flat_map(|&truth| {
            Label::ALL.iter().map(move |&predicted| {
                (
                    predicted.index() as i32,
                    1 - truth.index() as i32,
                    cm.get(truth, predicted),
                )
            })
        })
        .collect();

    chart.draw_series(cells.iter().map(|&(x, y, count)| {
        Rectangle::new(
            [
                (SegmentValue::Exact(x), SegmentValue::Exact(y)),
                (SegmentValue::Exact(x + 1), SegmentValue::Exact(y + 1)),
            ],
            blues(count as f64 / peak).filled(),
        )
    }))?;

    let centered = Pos::new(HPos::Center, VPos::Center);
    chart.draw_series(cells.iter().map(|&(x, y, count)| {
        let ink = if count as f64 / peak > 0.5 { &WHITE } else { &BLACK };
        Text::new(
            count.to_string(),
            (SegmentValue::CenterOf(x), SegmentValue::CenterOf(y)),
            ("sans-serif", 40).into_font().color(ink).pos(centered),
        )
    }))?;

    root.present()?;
    info!("Saved confusion matrix to {}", file_out.display());
    Ok(())
}

fn draw_map(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    title: &str,
    rows: usize,
    cols: usize,
    values: &[f64],
) -> Result<(), Box<dyn Error>> {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = if hi > lo { hi - lo } else { 1.0 };

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 18).into_font())
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0..cols as i32, 0..rows as i32)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Time frame")
        .y_desc("Frequency bin")
        .draw()?;

    // row 0 is the lowest frequency and sits at the bottom
    chart.draw_series(values.iter().enumerate().map(|(i, &v)| {
        let (r, c) = ((i / cols) as i32, (i % cols) as i32);
        Rectangle::new([(c, r), (c + 1, r + 1)], jet((v - lo) / width).filled())
    }))?;
    Ok(())
}

/// Render how a probe sample looks in dB, scaled to `[0, 1]`, as payload
/// bytes, and how the bytes are distributed.
pub fn plot_sample_visualization(
    sample: &Spectrogram,
    normalization: Normalization,
    name: &str,
    file_out: impl AsRef<Path>,
) -> Result<(), Box<dyn Error>> {
    let file_out = file_out.as_ref();
    let (rows, cols) = sample.shape();

    let db: Vec<f64> = sample.values().iter().map(|&v| v as f64).collect();
    let lo = sample.min() as f64;
    let span = (sample.max() as f64 - lo).max(f64::MIN_POSITIVE);
    let unit: Vec<f64> = db.iter().map(|v| (v - lo) / span).collect();
    let bytes: Vec<f64> = normalization
        .encode(sample)
        .into_iter()
        .map(f64::from)
        .collect();

    let root = BitMapBackend::new(file_out, (1500, 1000)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((2, 2));

    draw_map(&panels[0], &format!("Original STFT (dB), {}", name), rows, cols, &db)?;
    draw_map(&panels[1], &format!("Normalized STFT (0-1), {}", name), rows, cols, &unit)?;
    draw_map(&panels[2], &format!("STFT as uint8 (0-255), {}", name), rows, cols, &bytes)?;

    let (edges, counts) = histogram(&bytes, HISTOGRAM_BINS);
    let tallest = counts.iter().copied().max().unwrap_or(0).max(1);
    let (first, last) = (edges[0], edges[edges.len() - 1]);
    let mut chart = ChartBuilder::on(&panels[3])
        .caption(format!("Data Distribution, {}", name), ("sans-serif", 18).into_font())
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(first..last, 0..tallest)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc("Byte value")
        .y_desc("Count")
        .draw()?;
    chart.draw_series(counts.iter().enumerate().map(|(i, &n)| {
        Rectangle::new([(edges[i], 0), (edges[i + 1], n)], BLUE.mix(0.7).filled())
    }))?;

    root.present()?;
    info!("Saved visualization of {} to {}", name, file_out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramps_hit_their_ends() {
        assert_eq!(blues(0.0), RGBColor(247, 251, 255));
        assert_eq!(blues(1.0), RGBColor(8, 48, 107));
        assert_eq!(blues(7.0), blues(1.0));

        assert_eq!(jet(0.0), RGBColor(0, 0, 128));
        assert_eq!(jet(0.5), RGBColor(128, 255, 128));
        assert_eq!(jet(1.0), RGBColor(128, 0, 0));
    }

    #[test]
    fn histogram_covers_range() {
        let values: Vec<f64> = (0..=255).map(f64::from).collect();
        let (edges, counts) = histogram(&values, HISTOGRAM_BINS);
        assert_eq!(edges.len(), HISTOGRAM_BINS + 1);
        assert_eq!(edges[0], 0.0);
        assert_eq!(edges[HISTOGRAM_BINS], 255.0);
        assert_eq!(counts.iter().sum::<usize>(), 256);
        // the maximum lands in the last bin
        assert!(counts[HISTOGRAM_BINS - 1] > 0);
    }

    #[test]
    fn histogram_edges_end_on_maximum() {
        let values = [-115.0041, -40.2, 0.7, 3.395];
        let (edges, counts) = histogram(&values, 7);
        assert_eq!(edges[0], -115.0041);
        assert_eq!(edges[7], 3.395);
        assert!(edges.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(counts, vec![1, 0, 0, 0, 1, 0, 2]);
    }

    #[test]
    fn constant_histogram() {
        let (edges, counts) = histogram(&[3.0; 10], 4);
        assert_eq!(edges[0], 2.5);
        assert_eq!(counts.iter().sum::<usize>(), 10);
    }

    #[test]
    fn axis_labels() {
        assert_eq!(class_at(&SegmentValue::CenterOf(0), false), "Healthy");
        assert_eq!(class_at(&SegmentValue::CenterOf(0), true), "Fault");
        assert_eq!(class_at(&SegmentValue::Exact(1), false), "");
        assert_eq!(visualization_file_name("S_W"), "stft_visualization_S_W.png");
    }
}
