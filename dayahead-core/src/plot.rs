//! PNG charts of a normalized table.
//!
//! Both charts are drawn from primitives only (lines and rectangles), so
//! rendering never needs a system font.

use crate::normalize::PriceTable;
use chrono::{NaiveDate, Timelike};
use plotters::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const LINE_CHART_SIZE: (u32, u32) = (1200, 500);
const HEATMAP_CELL: (u32, u32) = (40, 24);
const MARGIN: u32 = 24;

const GRID: RGBColor = RGBColor(220, 220, 220);
const ZERO_LINE: RGBColor = RGBColor(150, 150, 150);
const MISSING_CELL: RGBColor = RGBColor(235, 235, 235);

/// Viridis anchors, low to high.
const PALETTE: [(u8, u8, u8); 5] = [
    (68, 1, 84),
    (59, 82, 139),
    (33, 145, 140),
    (94, 201, 98),
    (253, 231, 37),
];

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("render failed: {0}")]
    Render(String),
}

fn render_err<E: std::fmt::Display>(e: E) -> PlotError {
    PlotError::Render(e.to_string())
}

/// Mean price per local calendar day and hour of day.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyMatrix {
    pub days: Vec<NaiveDate>,
    /// One row per entry of `days`; `None` where no record fell in the hour.
    pub cells: Vec<[Option<f64>; 24]>,
}

impl HourlyMatrix {
    /// Smallest and largest cell value, if any cell is filled.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.cells
            .iter()
            .flat_map(|row| row.iter().flatten())
            .fold(None, |acc, v| match acc {
                None => Some((*v, *v)),
                Some((lo, hi)) => Some((lo.min(*v), hi.max(*v))),
            })
    }
}

/// Aggregate EUR/MWh prices by local day and hour.
///
/// Returns `None` for an empty table or one without local timestamps and
/// MWh prices.
pub fn hourly_matrix(table: &PriceTable) -> Option<HourlyMatrix> {
    let local = table.timestamp_local()?;
    let prices = table.price_eur_mwh()?;
    if table.is_empty() {
        return None;
    }

    let mut sums: BTreeMap<NaiveDate, [(f64, u32); 24]> = BTreeMap::new();
    for (ts, price) in local.iter().zip(prices) {
        let slot = &mut sums.entry(ts.date_naive()).or_insert([(0.0, 0); 24])[ts.hour() as usize];
        slot.0 += price;
        slot.1 += 1;
    }

    let days = sums.keys().copied().collect();
    let cells = sums
        .values()
        .map(|row| {
            let mut out = [None; 24];
            for (cell, (sum, n)) in out.iter_mut().zip(row) {
                if *n > 0 {
                    *cell = Some(sum / f64::from(*n));
                }
            }
            out
        })
        .collect();
    Some(HourlyMatrix { days, cells })
}

/// Writes `{zone}_lineplot.png` and `{zone}_heatmap.png`.
#[derive(Debug, Clone)]
pub struct Plotter {
    output_dir: PathBuf,
}

impl Plotter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn line_chart_path(&self, zone: &str) -> PathBuf {
        self.output_dir.join(format!("{zone}_lineplot.png"))
    }

    pub fn heatmap_path(&self, zone: &str) -> PathBuf {
        self.output_dir.join(format!("{zone}_heatmap.png"))
    }

    /// Render both charts, returning the files actually written.
    pub fn render_all(&self, table: &PriceTable, zone: &str) -> Result<Vec<PathBuf>, PlotError> {
        std::fs::create_dir_all(&self.output_dir).map_err(render_err)?;
        let written: Vec<PathBuf> = [
            render_line_chart(table, &self.line_chart_path(zone))?,
            render_heatmap(table, &self.heatmap_path(zone))?,
        ]
        .into_iter()
        .flatten()
        .collect();
        for path in &written {
            info!(path = %path.display(), "plot written");
        }
        Ok(written)
    }
}

/// Price over time, with day boundaries marked.
pub fn render_line_chart(table: &PriceTable, path: &Path) -> Result<Option<PathBuf>, PlotError> {
    let (Some(utc), Some(local), Some(prices)) = (
        table.timestamp_utc(),
        table.timestamp_local(),
        table.price_eur_mwh(),
    ) else {
        debug!("line chart skipped: missing columns");
        return Ok(None);
    };
    let Some(first) = utc.first() else {
        return Ok(None);
    };

    let hours_since = |i: usize| (utc[i] - *first).num_seconds() as f64 / 3600.0;
    let points: Vec<(f64, f64)> = (0..utc.len()).map(|i| (hours_since(i), prices[i])).collect();

    let (x_lo, x_hi) = bounds(points.iter().map(|p| p.0));
    let (y_lo, y_hi) = padded(bounds(points.iter().map(|p| p.1)));

    let root = BitMapBackend::new(path, LINE_CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(MARGIN)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(render_err)?;

    let midnights = (0..local.len())
        .filter(|i| local[*i].hour() == 0 && local[*i].minute() == 0)
        .map(hours_since);
    chart
        .draw_series(midnights.map(|x| PathElement::new(vec![(x, y_lo), (x, y_hi)], GRID)))
        .map_err(render_err)?;

    if y_lo < 0.0 && y_hi > 0.0 {
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(x_lo, 0.0), (x_hi, 0.0)],
                ZERO_LINE,
            )))
            .map_err(render_err)?;
    }

    chart
        .draw_series(LineSeries::new(points, BLUE.stroke_width(2)))
        .map_err(render_err)?;

    root.present().map_err(render_err)?;
    Ok(Some(path.to_path_buf()))
}

/// Hour-of-day by calendar-day grid of mean prices; first day on top.
pub fn render_heatmap(table: &PriceTable, path: &Path) -> Result<Option<PathBuf>, PlotError> {
    let Some(matrix) = hourly_matrix(table) else {
        debug!("heatmap skipped: no local prices");
        return Ok(None);
    };
    let Some((lo, hi)) = matrix.value_range() else {
        return Ok(None);
    };

    let rows = matrix.days.len();
    let size = (
        HEATMAP_CELL.0 * 24 + 2 * MARGIN,
        HEATMAP_CELL.1 * rows as u32 + 2 * MARGIN,
    );

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(MARGIN)
        .build_cartesian_2d(0f64..24f64, 0f64..rows as f64)
        .map_err(render_err)?;

    let cells = matrix.cells.iter().enumerate().flat_map(|(row, values)| {
        let y = (rows - 1 - row) as f64;
        values.iter().enumerate().map(move |(hour, value)| {
            let x = hour as f64;
            let color = match value {
                Some(v) => scale(*v, lo, hi),
                None => MISSING_CELL,
            };
            Rectangle::new([(x, y), (x + 1.0, y + 1.0)], color.filled())
        })
    });
    chart.draw_series(cells).map_err(render_err)?;

    root.present().map_err(render_err)?;
    Ok(Some(path.to_path_buf()))
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if lo < hi {
        (lo, hi)
    } else {
        (lo - 0.5, lo + 0.5)
    }
}

fn padded((lo, hi): (f64, f64)) -> (f64, f64) {
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

/// Map `v` within `[lo, hi]` onto the palette.
fn scale(v: f64, lo: f64, hi: f64) -> RGBColor {
    let t = if hi > lo { ((v - lo) / (hi - lo)).clamp(0.0, 1.0) } else { 0.5 };
    let pos = t * (PALETTE.len() - 1) as f64;
    let i = (pos.floor() as usize).min(PALETTE.len() - 2);
    let f = pos - i as f64;
    let lerp = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * f).round() as u8;
    let (a, b) = (PALETTE[i], PALETTE[i + 1]);
    RGBColor(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize, NormalizeOptions};
    use crate::series::{PriceRecord, PriceSeries};
    use chrono::{TimeZone, Utc};

    fn table(hours: usize, tz: chrono_tz::Tz) -> PriceTable {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap().fixed_offset();
        let series = PriceSeries::new(
            (0..hours)
                .map(|i| PriceRecord {
                    timestamp: start + chrono::Duration::hours(i as i64),
                    price: i as f64 - 5.0,
                })
                .collect(),
        );
        normalize(&series, tz, NormalizeOptions::default()).table
    }

    #[test]
    fn matrix_groups_by_local_day_and_hour() {
        // 48 UTC hours seen from UTC+2 cover three local days.
        let m = hourly_matrix(&table(48, chrono_tz::Europe::Nicosia)).unwrap();
        assert_eq!(m.days.len(), 3);
        assert_eq!(m.days[0], NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(m.cells[0][0], None);
        assert_eq!(m.cells[0][2], Some(-5.0));
        assert_eq!(m.cells[2][1], Some(42.0));
        assert_eq!(m.cells[2][2], None);
        assert_eq!(m.value_range(), Some((-5.0, 42.0)));
    }

    #[test]
    fn matrix_averages_repeated_hours() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap().fixed_offset();
        let series = PriceSeries::new(vec![
            PriceRecord { timestamp: start, price: 10.0 },
            PriceRecord { timestamp: start, price: 20.0 },
        ]);
        let t = normalize(&series, chrono_tz::UTC, NormalizeOptions::default()).table;
        let m = hourly_matrix(&t).unwrap();
        assert_eq!(m.cells[0][3], Some(15.0));
    }

    #[test]
    fn empty_or_raw_tables_are_skipped() {
        assert_eq!(hourly_matrix(&PriceTable::default()), None);

        let dir = tempfile::tempdir().unwrap();
        let empty = table(0, chrono_tz::UTC);
        assert!(render_line_chart(&empty, &dir.path().join("a.png")).unwrap().is_none());
        assert!(render_heatmap(&empty, &dir.path().join("b.png")).unwrap().is_none());
        assert!(!dir.path().join("a.png").exists());

        let raw = PriceTable::from_columns(vec!["2025-01-01T00:00Z".into()], Some(vec![1.0]), None, None, None)
            .unwrap();
        assert!(render_line_chart(&raw, &dir.path().join("c.png")).unwrap().is_none());
    }

    #[test]
    fn renders_both_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let plotter = Plotter::new(dir.path());
        let written = plotter
            .render_all(&table(72, chrono_tz::Europe::Berlin), "DE")
            .unwrap();

        assert_eq!(written, vec![plotter.line_chart_path("DE"), plotter.heatmap_path("DE")]);
        for path in &written {
            let bytes = std::fs::read(path).unwrap();
            assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        }
    }

    #[test]
    fn single_point_renders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.png");
        assert!(render_line_chart(&table(1, chrono_tz::UTC), &path).unwrap().is_some());
        assert!(path.exists());
    }

    #[test]
    fn palette_endpoints() {
        assert_eq!(scale(0.0, 0.0, 10.0), RGBColor(68, 1, 84));
        assert_eq!(scale(10.0, 0.0, 10.0), RGBColor(253, 231, 37));
        assert_eq!(scale(99.0, 0.0, 10.0), RGBColor(253, 231, 37));
    }
}
