#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use sq_columnar::Column;
use sq_frame::Table;
use sq_types::{DataType, Value, epoch_seconds};
use thiserror::Error;

/// Bin count used when a histogram request does not name one.
pub const DEFAULT_BINS: usize = 20;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SummaryError {
    #[error("unknown column `{name}`")]
    UnknownColumn { name: String },
    #[error("{view} requires a numeric column, `{column}` is {dtype}")]
    NotNumeric {
        view: &'static str,
        column: String,
        dtype: DataType,
    },
    #[error("column `{column}` has no present values to summarize")]
    EmptyColumn { column: String },
    #[error("histogram needs at least one bin")]
    ZeroBins,
    #[error("`{column}` is {dtype}, which cannot sit on a plot axis")]
    NotPlottable { column: String, dtype: DataType },
    #[error("line series need an orderable x axis, `{column}` is {dtype}")]
    NotOrderable { column: String, dtype: DataType },
    #[error("the table has no numeric columns to correlate")]
    NoNumericColumns,
}

/// A chart request: exactly the options each view recognizes, nothing open
/// ended. The JSON form is the renderer-facing wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ViewRequest {
    Histogram {
        column: String,
        #[serde(default = "default_bins")]
        bins: usize,
    },
    BoxPlot {
        column: String,
    },
    Scatter {
        x: String,
        y: String,
    },
    Line {
        x: String,
        y: String,
    },
    CorrelationMatrix,
    Overview,
}

fn default_bins() -> usize {
    DEFAULT_BINS
}

/// The computed answer to a [`ViewRequest`]; always derived fresh from the
/// current table and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum DerivedView {
    Histogram(HistogramBins),
    BoxPlot(BoxPlotSummary),
    Scatter(ScatterSeries),
    Line(LineSeries),
    CorrelationMatrix(CorrelationMatrix),
    Overview(TableOverview),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width bins over the non-missing range of one numeric column.
/// Intervals are half-open with the last closed on the right; when the
/// range collapses (min == max) a single bin carries the full count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBins {
    pub column: String,
    pub bins: Vec<HistogramBin>,
    /// Missing entries excluded from every count.
    pub missing: usize,
}

/// Five-number summary with linear-interpolation quartiles plus the values
/// beyond 1.5 IQR of the quartiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxPlotSummary {
    pub column: String,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub outliers: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScatterSeries {
    pub x: String,
    pub y: String,
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSeries {
    pub x: String,
    pub y: String,
    pub points: Vec<(f64, f64)>,
}

/// Pairwise-complete Pearson correlations over the numeric columns.
/// Undefined pairs (fewer than two jointly present rows, or zero variance)
/// hold `NaN`, which serializes to JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub data_type: DataType,
    pub missing: usize,
    pub distinct: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOverview {
    pub rows: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnProfile>,
}

pub fn summarize(table: &Table, request: &ViewRequest) -> Result<DerivedView, SummaryError> {
    match request {
        ViewRequest::Histogram { column, bins } => {
            histogram(table, column, *bins).map(DerivedView::Histogram)
        }
        ViewRequest::BoxPlot { column } => box_plot(table, column).map(DerivedView::BoxPlot),
        ViewRequest::Scatter { x, y } => scatter(table, x, y).map(DerivedView::Scatter),
        ViewRequest::Line { x, y } => line(table, x, y).map(DerivedView::Line),
        ViewRequest::CorrelationMatrix => {
            correlation_matrix(table).map(DerivedView::CorrelationMatrix)
        }
        ViewRequest::Overview => Ok(DerivedView::Overview(overview(table))),
    }
}

pub fn histogram(table: &Table, name: &str, bins: usize) -> Result<HistogramBins, SummaryError> {
    if bins == 0 {
        return Err(SummaryError::ZeroBins);
    }
    let column = require(table, name)?;
    let values = numeric_values_for(column, "histogram")?;
    if values.is_empty() {
        return Err(SummaryError::EmptyColumn {
            column: name.to_string(),
        });
    }
    let missing = column.missing_count();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        return Ok(HistogramBins {
            column: name.to_string(),
            bins: vec![HistogramBin {
                lower: min,
                upper: max,
                count: values.len(),
            }],
            missing,
        });
    }
    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for value in &values {
        let mut slot = ((value - min) / width).floor() as usize;
        // max itself belongs to the last, right-closed interval
        if slot >= bins {
            slot = bins - 1;
        }
        counts[slot] += 1;
    }
    let bins_out = counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins {
                max
            } else {
                min + width * (i + 1) as f64
            },
            count,
        })
        .collect();
    Ok(HistogramBins {
        column: name.to_string(),
        bins: bins_out,
        missing,
    })
}

pub fn box_plot(table: &Table, name: &str) -> Result<BoxPlotSummary, SummaryError> {
    let column = require(table, name)?;
    let mut values = numeric_values_for(column, "box plot")?;
    if values.is_empty() {
        return Err(SummaryError::EmptyColumn {
            column: name.to_string(),
        });
    }
    values.sort_by(f64::total_cmp);
    let q1 = percentile_linear(&values, 0.25);
    let median = percentile_linear(&values, 0.5);
    let q3 = percentile_linear(&values, 0.75);
    let reach = 1.5 * (q3 - q1);
    let outliers = values
        .iter()
        .copied()
        .filter(|v| *v < q1 - reach || *v > q3 + reach)
        .collect();
    Ok(BoxPlotSummary {
        column: name.to_string(),
        min: values[0],
        q1,
        median,
        q3,
        max: values[values.len() - 1],
        outliers,
    })
}

pub fn scatter(table: &Table, x: &str, y: &str) -> Result<ScatterSeries, SummaryError> {
    let col_x = axis_column(table, x)?;
    let col_y = axis_column(table, y)?;
    Ok(ScatterSeries {
        x: x.to_string(),
        y: y.to_string(),
        points: paired_points(col_x, col_y),
    })
}

/// Like [`scatter`], then sorted by x ascending. The sort is stable, so rows
/// sharing an x keep their original order.
pub fn line(table: &Table, x: &str, y: &str) -> Result<LineSeries, SummaryError> {
    let col_x = axis_column(table, x)?;
    if !(col_x.dtype().is_numeric() || col_x.dtype() == DataType::DateTime) {
        return Err(SummaryError::NotOrderable {
            column: x.to_string(),
            dtype: col_x.dtype(),
        });
    }
    let col_y = axis_column(table, y)?;
    let mut points = paired_points(col_x, col_y);
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(LineSeries {
        x: x.to_string(),
        y: y.to_string(),
        points,
    })
}

pub fn correlation_matrix(table: &Table) -> Result<CorrelationMatrix, SummaryError> {
    let numeric: Vec<&Column> = table
        .columns()
        .iter()
        .filter(|c| c.dtype().is_numeric())
        .collect();
    if numeric.is_empty() {
        return Err(SummaryError::NoNumericColumns);
    }
    let mut values = vec![vec![f64::NAN; numeric.len()]; numeric.len()];
    for i in 0..numeric.len() {
        for j in i..numeric.len() {
            let r = pearson(numeric[i], numeric[j]);
            // the diagonal is exactly 1 whenever it is defined at all
            let r = if i == j && !r.is_nan() { 1.0 } else { r };
            values[i][j] = r;
            values[j][i] = r;
        }
    }
    Ok(CorrelationMatrix {
        columns: numeric.iter().map(|c| c.name().to_string()).collect(),
        values,
    })
}

#[must_use]
pub fn overview(table: &Table) -> TableOverview {
    let columns = table
        .columns()
        .iter()
        .map(|column| ColumnProfile {
            name: column.name().to_string(),
            data_type: column.dtype(),
            missing: column.missing_count(),
            distinct: column.distinct_count(),
        })
        .collect();
    TableOverview {
        rows: table.rows(),
        column_count: table.width(),
        columns,
    }
}

fn require<'a>(table: &'a Table, name: &str) -> Result<&'a Column, SummaryError> {
    table.column(name).ok_or_else(|| SummaryError::UnknownColumn {
        name: name.to_string(),
    })
}

fn numeric_values_for(column: &Column, view: &'static str) -> Result<Vec<f64>, SummaryError> {
    if !column.dtype().is_numeric() {
        return Err(SummaryError::NotNumeric {
            view,
            column: column.name().to_string(),
            dtype: column.dtype(),
        });
    }
    Ok(column.numeric_values())
}

/// Linear interpolation between order statistics at position q * (n - 1).
fn percentile_linear(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let frac = pos - lower as f64;
    sorted[lower] * (1.0 - frac) + sorted[upper] * frac
}

fn axis_column<'a>(table: &'a Table, name: &str) -> Result<&'a Column, SummaryError> {
    let column = require(table, name)?;
    if column.dtype() == DataType::Text {
        return Err(SummaryError::NotPlottable {
            column: name.to_string(),
            dtype: column.dtype(),
        });
    }
    Ok(column)
}

fn axis_coord(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
        Value::DateTime(v) => Some(epoch_seconds(v)),
        Value::Text(_) | Value::Missing => None,
    }
}

/// One point per row where both coordinates are present, in row order.
fn paired_points(x: &Column, y: &Column) -> Vec<(f64, f64)> {
    x.values()
        .iter()
        .zip(y.values())
        .filter_map(|(a, b)| Some((axis_coord(a)?, axis_coord(b)?)))
        .collect()
}

fn pearson(x: &Column, y: &Column) -> f64 {
    let mut n = 0.0f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_yy = 0.0;
    let mut sum_xy = 0.0;
    for (a, b) in x.values().iter().zip(y.values()) {
        let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
            continue;
        };
        n += 1.0;
        sum_x += a;
        sum_y += b;
        sum_xx += a * a;
        sum_yy += b * b;
        sum_xy += a * b;
    }
    if n < 2.0 {
        return f64::NAN;
    }
    let mean_x = sum_x / n;
    let mean_y = sum_y / n;
    let var_x = (sum_xx - n * mean_x * mean_x) / (n - 1.0);
    let var_y = (sum_yy - n * mean_y * mean_y) / (n - 1.0);
    let cov = (sum_xy - n * mean_x * mean_y) / (n - 1.0);
    let denom = (var_x * var_y).sqrt();
    if !denom.is_finite() || denom < f64::EPSILON {
        return f64::NAN;
    }
    cov / denom
}
