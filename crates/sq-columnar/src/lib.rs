#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sq_types::{CoerceOptions, DataType, TypeError, Value, coerce_value, convert_strict};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column `{column}` declared {expected} cannot hold `{value}`")]
    TypeMismatch {
        column: String,
        expected: DataType,
        value: String,
    },
    #[error("{statistic} requires a numeric column, `{column}` is {dtype}")]
    NotNumeric {
        column: String,
        dtype: DataType,
        statistic: &'static str,
    },
    #[error("column `{column}` has no present values")]
    EmptyColumn { column: String },
    #[error("row mask length {mask} does not match column length {len}")]
    MaskLength { mask: usize, len: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// A named column: declared type plus an ordered run of values.
///
/// Invariant: every non-`Missing` entry is representable in the declared
/// type, and stored floats are finite (non-finite input normalizes to
/// `Missing` at construction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    name: String,
    dtype: DataType,
    values: Vec<Value>,
}

impl Column {
    pub fn new(
        name: impl Into<String>,
        dtype: DataType,
        values: Vec<Value>,
    ) -> Result<Self, ColumnError> {
        let name = name.into();
        let mut normalized = Vec::with_capacity(values.len());
        for value in values {
            let value = value.normalized();
            if !value.fits(dtype) {
                return Err(ColumnError::TypeMismatch {
                    column: name,
                    expected: dtype,
                    value: value.render(),
                });
            }
            normalized.push(value);
        }
        Ok(Self {
            name,
            dtype,
            values: normalized,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, row: usize) -> Option<&Value> {
        self.values.get(row)
    }

    #[must_use]
    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_missing()).count()
    }

    /// Iterates the non-`Missing` values in row order.
    pub fn present(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().filter(|v| !v.is_missing())
    }

    /// Distinct present values, compared by canonical rendering.
    #[must_use]
    pub fn distinct_count(&self) -> usize {
        self.present()
            .map(Value::render)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Present values as `f64`, in row order. Empty for non-numeric columns.
    #[must_use]
    pub fn numeric_values(&self) -> Vec<f64> {
        self.present().filter_map(Value::as_f64).collect()
    }

    /// Lenient whole-column cast. Cells that do not convert cleanly become
    /// `Missing`; the operation itself cannot fail.
    #[must_use]
    pub fn coerce(&self, target: DataType, options: &CoerceOptions) -> Self {
        let values = self
            .values
            .iter()
            .map(|v| coerce_value(v, target, options))
            .collect();
        Self {
            name: self.name.clone(),
            dtype: target,
            values,
        }
    }

    /// Replaces every `Missing` entry with `fill`, which must convert
    /// losslessly into the declared type.
    pub fn fill_missing(&self, fill: &Value, options: &CoerceOptions) -> Result<Self, ColumnError> {
        let fill =
            convert_strict(fill, self.dtype, options).map_err(|_| ColumnError::TypeMismatch {
                column: self.name.clone(),
                expected: self.dtype,
                value: fill.render(),
            })?;
        let values = self
            .values
            .iter()
            .map(|v| if v.is_missing() { fill.clone() } else { v.clone() })
            .collect();
        Ok(Self {
            name: self.name.clone(),
            dtype: self.dtype,
            values,
        })
    }

    /// Keeps the rows where `keep` is true. The mask must cover every row.
    pub fn filter_rows(&self, keep: &[bool]) -> Result<Self, ColumnError> {
        if keep.len() != self.values.len() {
            return Err(ColumnError::MaskLength {
                mask: keep.len(),
                len: self.values.len(),
            });
        }
        let values = self
            .values
            .iter()
            .zip(keep)
            .filter(|(_, flag)| **flag)
            .map(|(value, _)| value.clone())
            .collect();
        Ok(Self {
            name: self.name.clone(),
            dtype: self.dtype,
            values,
        })
    }

    fn require_numeric(&self, statistic: &'static str) -> Result<(), ColumnError> {
        if self.dtype.is_numeric() {
            Ok(())
        } else {
            Err(ColumnError::NotNumeric {
                column: self.name.clone(),
                dtype: self.dtype,
                statistic,
            })
        }
    }

    /// Arithmetic mean over present values.
    pub fn mean(&self) -> Result<f64, ColumnError> {
        self.require_numeric("mean")?;
        let values = self.numeric_values();
        if values.is_empty() {
            return Err(ColumnError::EmptyColumn {
                column: self.name.clone(),
            });
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Median over present values; even lengths average the middle pair.
    pub fn median(&self) -> Result<f64, ColumnError> {
        self.require_numeric("median")?;
        let mut values = self.numeric_values();
        if values.is_empty() {
            return Err(ColumnError::EmptyColumn {
                column: self.name.clone(),
            });
        }
        values.sort_by(f64::total_cmp);
        let mid = values.len() / 2;
        if values.len() % 2 == 1 {
            Ok(values[mid])
        } else {
            Ok((values[mid - 1] + values[mid]) / 2.0)
        }
    }

    /// Most frequent present value; ties go to the value encountered first
    /// in row order.
    pub fn mode(&self) -> Result<Value, ColumnError> {
        let mut counts: Vec<(&Value, usize)> = Vec::new();
        for value in self.present() {
            match counts.iter_mut().find(|(seen, _)| *seen == value) {
                Some((_, count)) => *count += 1,
                None => counts.push((value, 1)),
            }
        }
        let mut best: Option<(&Value, usize)> = None;
        for (value, count) in counts {
            if best.is_none_or(|(_, top)| count > top) {
                best = Some((value, count));
            }
        }
        match best {
            Some((value, _)) => Ok(value.clone()),
            None => Err(ColumnError::EmptyColumn {
                column: self.name.clone(),
            }),
        }
    }
}
