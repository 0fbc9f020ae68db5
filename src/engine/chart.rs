use std::ops::Range;
use std::path::Path;

use anyhow::{bail, Result};
use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::warn;

use super::plan::{ChartData, PreparedChart};

const CHART_SIZE: (u32, u32) = (900, 560);

/// Render a chart to a PNG file.
///
/// Hosts without usable fonts fail on any text; in that case the chart is
/// drawn again without captions and axis labels.
pub fn render_chart(chart: &PreparedChart, output_path: &Path) -> Result<()> {
    check_ranges(&chart.data)?;
    match draw(chart, output_path, true) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(error = %e, "Chart text rendering failed, retrying without labels");
            draw(chart, output_path, false)
        }
    }
}

fn draw(chart: &PreparedChart, output_path: &Path, with_text: bool) -> Result<()> {
    let root = BitMapBackend::new(output_path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    match &chart.data {
        ChartData::Categories { labels, values } => draw_bars(&root, chart, labels, values, with_text)?,
        ChartData::Points { points, connected } => {
            draw_points(&root, chart, points, *connected, with_text)?
        }
        ChartData::Histogram { values, bins } => {
            draw_histogram(&root, chart, values, *bins, with_text)?
        }
    }

    root.present()?;
    Ok(())
}

/// Plotters never finishes laying out an axis whose span is infinite.
fn check_ranges(data: &ChartData) -> Result<()> {
    match data {
        ChartData::Categories { values, .. } => {
            let lo = values.iter().cloned().fold(0.0, f64::min);
            let hi = values.iter().cloned().fold(0.0, f64::max);
            padded(lo, hi)?;
        }
        ChartData::Points { points, .. } => {
            let (x_lo, x_hi) = bounds(points.iter().map(|p| p.0));
            let (y_lo, y_hi) = bounds(points.iter().map(|p| p.1));
            padded(x_lo, x_hi)?;
            padded(y_lo, y_hi)?;
        }
        ChartData::Histogram { values, .. } => {
            let (lo, hi) = bounds(values.iter().cloned());
            histogram_range(lo, hi)?;
        }
    }
    Ok(())
}

fn builder<'a, 'b>(
    root: &'a DrawingArea<BitMapBackend<'b>, Shift>,
    chart: &PreparedChart,
    with_text: bool,
) -> ChartBuilder<'a, 'b, BitMapBackend<'b>> {
    let mut builder = ChartBuilder::on(root);
    builder.margin(20);
    if with_text {
        builder
            .caption(&chart.title, ("sans-serif", 24))
            .x_label_area_size(45)
            .y_label_area_size(60);
    }
    builder
}

fn draw_bars(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    chart: &PreparedChart,
    labels: &[String],
    values: &[f64],
    with_text: bool,
) -> Result<()> {
    let lo = values.iter().cloned().fold(0.0, f64::min);
    let hi = values.iter().cloned().fold(0.0, f64::max);

    let mut ctx = builder(root, chart, with_text)
        .build_cartesian_2d((0..labels.len()).into_segmented(), padded(lo, hi)?)?;

    if with_text {
        ctx.configure_mesh()
            .disable_x_mesh()
            .x_labels(labels.len().min(30))
            .x_label_formatter(&|v| match v {
                SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => {
                    labels.get(*i).cloned().unwrap_or_default()
                }
                SegmentValue::Last => String::new(),
            })
            .x_desc(chart.x_label.as_str())
            .y_desc(chart.y_label.as_str())
            .draw()?;
    }

    ctx.draw_series(
        Histogram::vertical(&ctx)
            .style(BLUE.mix(0.6).filled())
            .margin(10)
            .data(values.iter().enumerate().map(|(i, v)| (i, *v))),
    )?;
    Ok(())
}

fn draw_points(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    chart: &PreparedChart,
    points: &[(f64, f64)],
    connected: bool,
    with_text: bool,
) -> Result<()> {
    let (x_lo, x_hi) = bounds(points.iter().map(|p| p.0));
    let (y_lo, y_hi) = bounds(points.iter().map(|p| p.1));

    let mut ctx = builder(root, chart, with_text)
        .build_cartesian_2d(padded(x_lo, x_hi)?, padded(y_lo, y_hi)?)?;

    if with_text {
        ctx.configure_mesh()
            .x_desc(chart.x_label.as_str())
            .y_desc(chart.y_label.as_str())
            .draw()?;
    }

    if connected {
        ctx.draw_series(LineSeries::new(points.iter().cloned(), &BLUE))?;
    }
    ctx.draw_series(points.iter().map(|p| Circle::new(*p, 3, BLUE.filled())))?;
    Ok(())
}

fn draw_histogram(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    chart: &PreparedChart,
    values: &[f64],
    bins: usize,
    with_text: bool,
) -> Result<()> {
    let (lo, hi) = bounds(values.iter().cloned());
    let Range { start: lo, end: hi } = histogram_range(lo, hi)?;
    let bins = bins.max(1);
    let width = (hi - lo) / bins as f64;

    let mut counts = vec![0u32; bins];
    for v in values {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    let max_count = counts.iter().cloned().max().unwrap_or(0) as f64;

    let mut ctx = builder(root, chart, with_text)
        .build_cartesian_2d(lo..hi, 0f64..(max_count * 1.1).max(1.0))?;

    if with_text {
        ctx.configure_mesh()
            .disable_x_mesh()
            .x_desc(chart.x_label.as_str())
            .y_desc(chart.y_label.as_str())
            .draw()?;
    }

    ctx.draw_series(counts.iter().enumerate().map(|(i, count)| {
        let start = lo + width * i as f64;
        Rectangle::new(
            [(start, 0.0), (start + width, *count as f64)],
            BLUE.mix(0.6).filled(),
        )
    }))?;
    Ok(())
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// Span of a non-empty series, or an error when it cannot be drawn.
fn finite_span(lo: f64, hi: f64) -> Result<f64> {
    let span = hi - lo;
    if !span.is_finite() {
        bail!("axis range {}..{} is not finite", lo, hi);
    }
    Ok(span)
}

fn padded(lo: f64, hi: f64) -> Result<Range<f64>> {
    if lo == f64::INFINITY && hi == f64::NEG_INFINITY {
        return Ok(0.0..1.0);
    }
    let span = finite_span(lo, hi)?;
    if span.abs() < f64::EPSILON {
        return Ok((lo - 0.5)..(hi + 0.5));
    }
    let pad = span * 0.05;
    let range = (lo - pad)..(hi + pad);
    finite_span(range.start, range.end)?;
    Ok(range)
}

fn histogram_range(lo: f64, hi: f64) -> Result<Range<f64>> {
    if lo == f64::INFINITY && hi == f64::NEG_INFINITY {
        return Ok(0.0..1.0);
    }
    let span = finite_span(lo, hi)?;
    if span.abs() < f64::EPSILON {
        return Ok((lo - 0.5)..(hi + 0.5));
    }
    Ok(lo..hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

    fn render(data: ChartData) -> Vec<u8> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chart.png");
        let chart = PreparedChart {
            title: "Test chart".into(),
            x_label: "x".into(),
            y_label: "y".into(),
            data,
        };
        render_chart(&chart, &path).unwrap();
        std::fs::read(&path).unwrap()
    }

    #[test]
    fn test_bar_chart_writes_png() {
        let bytes = render(ChartData::Categories {
            labels: vec!["a".into(), "b".into()],
            values: vec![3.0, -1.0],
        });
        assert!(bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn test_line_chart_writes_png() {
        let bytes = render(ChartData::Points {
            points: vec![(1.0, 2.0), (2.0, 4.0), (3.0, 3.0)],
            connected: true,
        });
        assert!(bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn test_histogram_with_single_value() {
        let bytes = render(ChartData::Histogram {
            values: vec![5.0, 5.0, 5.0],
            bins: 10,
        });
        assert!(bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn test_padded_ranges() {
        assert_eq!(padded(1.0, 1.0).unwrap(), 0.5..1.5);
        assert_eq!(padded(0.0, 10.0).unwrap(), -0.5..10.5);
        assert_eq!(padded(f64::INFINITY, f64::NEG_INFINITY).unwrap(), 0.0..1.0);
        assert!(padded(0.0, f64::INFINITY).is_err());
        assert!(padded(-1e308, 1e308).is_err());
        assert!(padded(0.0, f64::MAX).is_err());
    }

    fn render_err(data: ChartData) -> anyhow::Error {
        let dir = TempDir::new().unwrap();
        let chart = PreparedChart {
            title: "Test chart".into(),
            x_label: "x".into(),
            y_label: "y".into(),
            data,
        };
        render_chart(&chart, &dir.path().join("chart.png")).unwrap_err()
    }

    #[test]
    fn test_unbounded_histogram_is_an_error() {
        render_err(ChartData::Histogram {
            values: vec![1.0, 2.0, f64::INFINITY],
            bins: 10,
        });
        render_err(ChartData::Histogram {
            values: vec![1e308, -1e308],
            bins: 10,
        });
    }

    #[test]
    fn test_unbounded_points_and_bars_are_errors() {
        render_err(ChartData::Points {
            points: vec![(-1e308, 0.0), (1e308, 1.0)],
            connected: false,
        });
        render_err(ChartData::Categories {
            labels: vec!["a".into(), "b".into()],
            values: vec![f64::MAX, -f64::MAX],
        });
    }
}
