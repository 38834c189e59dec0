#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sq_columnar::{Column, ColumnError};
use sq_types::{CoerceOptions, DataType, Value, convert_strict};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("unknown column `{name}`")]
    UnknownColumn { name: String },
    #[error("duplicate column name `{name}`")]
    DuplicateColumn { name: String },
    #[error("column `{name}` has {len} rows but the table expects {expected}")]
    LengthMismatch {
        name: String,
        len: usize,
        expected: usize,
    },
    #[error("operation would leave no {unit} in the table")]
    EmptyResult { unit: &'static str },
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// How `Missing` entries of a targeted column are replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fill", rename_all = "snake_case")]
pub enum FillStrategy {
    /// A caller-supplied value, validated against the column's declared type.
    Constant { value: Value },
    /// Column mean; numeric columns only.
    Mean,
    /// Column median; numeric columns only.
    Median,
    /// Most frequent value, ties broken by first encounter in row order.
    Mode,
}

impl fmt::Display for FillStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { value } => write!(f, "constant `{}`", value.render()),
            Self::Mean => f.write_str("mean"),
            Self::Median => f.write_str("median"),
            Self::Mode => f.write_str("mode"),
        }
    }
}

/// An ordered sequence of uniquely named, equal-length columns.
///
/// Every transform is pure: it builds and returns a new `Table`, leaving the
/// receiver untouched, and validates its targets before touching anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, FrameError> {
        let mut seen = BTreeSet::new();
        for column in &columns {
            if !seen.insert(column.name().to_string()) {
                return Err(FrameError::DuplicateColumn {
                    name: column.name().to_string(),
                });
            }
        }
        if let Some(first) = columns.first() {
            let expected = first.len();
            for column in &columns {
                if column.len() != expected {
                    return Err(FrameError::LengthMismatch {
                        name: column.name().to_string(),
                        len: column.len(),
                        expected,
                    });
                }
            }
        }
        Ok(Self { columns })
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(Column::name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn require_column(&self, name: &str) -> Result<&Column, FrameError> {
        self.column(name).ok_or_else(|| FrameError::UnknownColumn {
            name: name.to_string(),
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Casts one column to a new declared type. Cells that do not convert
    /// cleanly become `Missing`; the column keeps its place in the order.
    pub fn retype(
        &self,
        name: &str,
        target: DataType,
        options: &CoerceOptions,
    ) -> Result<Self, FrameError> {
        let position = self.position(name).ok_or_else(|| FrameError::UnknownColumn {
            name: name.to_string(),
        })?;
        let mut columns = self.columns.clone();
        columns[position] = columns[position].coerce(target, options);
        Ok(Self { columns })
    }

    /// Fills `Missing` entries of the targeted columns with the strategy.
    /// Every target is resolved and its replacement computed before any
    /// column is swapped, so a failure leaves no partial result.
    pub fn impute(
        &self,
        names: &[String],
        strategy: &FillStrategy,
        options: &CoerceOptions,
    ) -> Result<Self, FrameError> {
        let mut replacements = Vec::with_capacity(names.len());
        for name in names {
            let position = self.position(name).ok_or_else(|| FrameError::UnknownColumn {
                name: name.clone(),
            })?;
            let column = imputed_column(&self.columns[position], strategy, options)?;
            replacements.push((position, column));
        }
        let mut columns = self.columns.clone();
        for (position, column) in replacements {
            columns[position] = column;
        }
        Ok(Self { columns })
    }

    /// Removes every row where ANY targeted column is `Missing`. An empty
    /// target list targets all columns. Refuses to empty a non-empty table.
    pub fn drop_missing_rows(&self, names: &[String]) -> Result<Self, FrameError> {
        let targets: Vec<&Column> = if names.is_empty() {
            self.columns.iter().collect()
        } else {
            names
                .iter()
                .map(|name| self.require_column(name))
                .collect::<Result<_, _>>()?
        };
        let rows = self.rows();
        let mut keep = vec![true; rows];
        for column in targets {
            for (row, value) in column.values().iter().enumerate() {
                if value.is_missing() {
                    keep[row] = false;
                }
            }
        }
        if rows > 0 && keep.iter().all(|flag| !flag) {
            return Err(FrameError::EmptyResult { unit: "rows" });
        }
        let columns = self
            .columns
            .iter()
            .map(|column| column.filter_rows(&keep))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { columns })
    }

    /// Removes the named columns. Every name is validated before any column
    /// is removed; duplicates in the request are tolerated.
    pub fn drop_columns(&self, names: &[String]) -> Result<Self, FrameError> {
        for name in names {
            if !self.has_column(name) {
                return Err(FrameError::UnknownColumn { name: name.clone() });
            }
        }
        let doomed: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let columns: Vec<Column> = self
            .columns
            .iter()
            .filter(|column| !doomed.contains(column.name()))
            .cloned()
            .collect();
        if columns.is_empty() && !self.columns.is_empty() {
            return Err(FrameError::EmptyResult { unit: "columns" });
        }
        Ok(Self { columns })
    }
}

fn imputed_column(
    column: &Column,
    strategy: &FillStrategy,
    options: &CoerceOptions,
) -> Result<Column, ColumnError> {
    match strategy {
        FillStrategy::Constant { value } => column.fill_missing(value, options),
        FillStrategy::Mean => numeric_fill(column, column.mean()?, options),
        FillStrategy::Median => numeric_fill(column, column.median()?, options),
        FillStrategy::Mode => {
            let fill = column.mode()?;
            column.fill_missing(&fill, options)
        }
    }
}

fn numeric_fill(
    column: &Column,
    statistic: f64,
    options: &CoerceOptions,
) -> Result<Column, ColumnError> {
    if column.missing_count() == 0 {
        return Ok(column.clone());
    }
    if column.dtype() == DataType::Integer {
        if statistic.fract() == 0.0 {
            let fill = convert_strict(&Value::Float(statistic), DataType::Integer, options)?;
            return column.fill_missing(&fill, options);
        }
        // A fractional statistic cannot live in an integer column; the whole
        // column widens to float so the fill stays exact.
        return column
            .coerce(DataType::Float, options)
            .fill_missing(&Value::Float(statistic), options);
    }
    column.fill_missing(&Value::Float(statistic), options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CoerceOptions {
        CoerceOptions::default()
    }

    fn column(name: &str, dtype: DataType, values: Vec<Value>) -> Column {
        Column::new(name, dtype, values).expect("test column")
    }

    fn sample_table() -> Table {
        Table::new(vec![
            column(
                "age",
                DataType::Integer,
                vec![Value::Int(30), Value::Missing, Value::Int(40), Value::Int(45)],
            ),
            column(
                "city",
                DataType::Text,
                vec![
                    Value::Text("oslo".into()),
                    Value::Text("bergen".into()),
                    Value::Missing,
                    Value::Text("oslo".into()),
                ],
            ),
        ])
        .expect("sample table")
    }

    #[test]
    fn new_rejects_duplicate_names() {
        let err = Table::new(vec![
            column("a", DataType::Integer, vec![Value::Int(1)]),
            column("a", DataType::Integer, vec![Value::Int(2)]),
        ])
        .expect_err("duplicate names");
        assert!(matches!(err, FrameError::DuplicateColumn { .. }));
    }

    #[test]
    fn new_rejects_ragged_columns() {
        let err = Table::new(vec![
            column("a", DataType::Integer, vec![Value::Int(1)]),
            column("b", DataType::Integer, vec![Value::Int(2), Value::Int(3)]),
        ])
        .expect_err("ragged columns");
        assert!(matches!(
            err,
            FrameError::LengthMismatch {
                len: 2,
                expected: 1,
                ..
            }
        ));
    }

    #[test]
    fn retype_replaces_the_column_in_place() {
        let table = Table::new(vec![
            column(
                "id",
                DataType::Text,
                vec![Value::Text("1".into()), Value::Text("x".into())],
            ),
            column("score", DataType::Float, vec![Value::Float(1.0), Value::Float(2.0)]),
        ])
        .expect("table");
        let retyped = table.retype("id", DataType::Integer, &options()).expect("retype");
        assert_eq!(
            retyped.column_names().collect::<Vec<_>>(),
            vec!["id", "score"],
            "column order survives a retype"
        );
        let id = retyped.column("id").expect("id");
        assert_eq!(id.dtype(), DataType::Integer);
        assert_eq!(id.values(), &[Value::Int(1), Value::Missing]);

        let err = table
            .retype("missing_column", DataType::Integer, &options())
            .expect_err("unknown column");
        assert!(matches!(err, FrameError::UnknownColumn { .. }));
    }

    #[test]
    fn impute_constant_fills_and_validates() {
        let table = sample_table();
        let filled = table
            .impute(
                &["city".to_string()],
                &FillStrategy::Constant {
                    value: Value::Text("unknown".into()),
                },
                &options(),
            )
            .expect("fill city");
        assert_eq!(
            filled.column("city").expect("city").values()[2],
            Value::Text("unknown".into())
        );

        let err = table
            .impute(
                &["age".to_string()],
                &FillStrategy::Constant {
                    value: Value::Text("old".into()),
                },
                &options(),
            )
            .expect_err("text into integer column");
        assert!(matches!(err, FrameError::Column(ColumnError::TypeMismatch { .. })));
    }

    #[test]
    fn impute_mean_widens_when_the_mean_is_fractional() {
        let table = sample_table();
        let filled = table
            .impute(&["age".to_string()], &FillStrategy::Mean, &options())
            .expect("mean fill");
        let age = filled.column("age").expect("age");
        assert_eq!(age.dtype(), DataType::Float);
        assert_eq!(age.values()[0], Value::Float(30.0));
        assert_eq!(age.values()[1], Value::Float(115.0 / 3.0), "mean of 30, 40, 45");
    }

    #[test]
    fn impute_median_keeps_integer_columns_integer_when_exact() {
        let table = Table::new(vec![column(
            "n",
            DataType::Integer,
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Missing],
        )])
        .expect("table");
        let filled = table
            .impute(&["n".to_string()], &FillStrategy::Median, &options())
            .expect("median fill");
        let n = filled.column("n").expect("n");
        assert_eq!(n.dtype(), DataType::Integer);
        assert_eq!(n.values()[3], Value::Int(2));
    }

    #[test]
    fn impute_mean_on_text_is_a_type_error() {
        let err = sample_table()
            .impute(&["city".to_string()], &FillStrategy::Mean, &options())
            .expect_err("mean of text");
        assert!(matches!(err, FrameError::Column(ColumnError::NotNumeric { .. })));
    }

    #[test]
    fn impute_on_an_all_missing_column_fails() {
        let table = Table::new(vec![column(
            "empty",
            DataType::Float,
            vec![Value::Missing, Value::Missing],
        )])
        .expect("table");
        for strategy in [FillStrategy::Mean, FillStrategy::Median, FillStrategy::Mode] {
            let err = table
                .impute(&["empty".to_string()], &strategy, &options())
                .expect_err("nothing to aggregate");
            assert!(matches!(err, FrameError::Column(ColumnError::EmptyColumn { .. })));
        }
    }

    #[test]
    fn impute_mode_works_for_any_type() {
        let table = sample_table();
        let filled = table
            .impute(&["city".to_string()], &FillStrategy::Mode, &options())
            .expect("mode fill");
        assert_eq!(
            filled.column("city").expect("city").values()[2],
            Value::Text("oslo".into())
        );
    }

    #[test]
    fn drop_missing_rows_removes_exactly_the_missing_rows() {
        let table = sample_table();
        let cleaned = table
            .drop_missing_rows(&["age".to_string()])
            .expect("drop by age");
        assert_eq!(cleaned.rows(), table.rows() - 1);
        assert_eq!(
            cleaned.column("city").expect("city").values(),
            &[
                Value::Text("oslo".into()),
                Value::Missing,
                Value::Text("oslo".into())
            ],
            "row alignment survives the drop"
        );
    }

    #[test]
    fn drop_missing_rows_ors_across_target_columns() {
        let table = sample_table();
        let cleaned = table
            .drop_missing_rows(&["age".to_string(), "city".to_string()])
            .expect("drop by both");
        assert_eq!(cleaned.rows(), 2, "rows 1 and 2 each miss one column");
    }

    #[test]
    fn drop_missing_rows_with_no_targets_scans_every_column() {
        let table = sample_table();
        let cleaned = table.drop_missing_rows(&[]).expect("drop across all");
        assert_eq!(cleaned.rows(), 2);
    }

    #[test]
    fn drop_missing_rows_refuses_to_empty_the_table() {
        let table = Table::new(vec![column(
            "only",
            DataType::Integer,
            vec![Value::Missing, Value::Missing],
        )])
        .expect("table");
        let err = table
            .drop_missing_rows(&["only".to_string()])
            .expect_err("would drop every row");
        assert!(matches!(err, FrameError::EmptyResult { unit: "rows" }));
    }

    #[test]
    fn drop_columns_is_all_or_nothing() {
        let table = sample_table();
        let err = table
            .drop_columns(&["age".to_string(), "z".to_string()])
            .expect_err("z does not exist");
        assert!(matches!(err, FrameError::UnknownColumn { name } if name == "z"));
        assert!(table.has_column("age"), "nothing was removed");

        let pruned = table.drop_columns(&["age".to_string()]).expect("drop age");
        assert_eq!(pruned.column_names().collect::<Vec<_>>(), vec!["city"]);
    }

    #[test]
    fn drop_columns_refuses_to_remove_everything() {
        let table = sample_table();
        let err = table
            .drop_columns(&["age".to_string(), "city".to_string()])
            .expect_err("would leave no columns");
        assert!(matches!(err, FrameError::EmptyResult { unit: "columns" }));
    }

    #[test]
    fn fill_strategy_serializes_with_a_fill_tag() {
        let json = serde_json::to_string(&FillStrategy::Constant {
            value: Value::Int(0),
        })
        .expect("serialize");
        assert_eq!(json, r#"{"fill":"constant","value":0}"#);
        let parsed: FillStrategy = serde_json::from_str(r#"{"fill":"mean"}"#).expect("parse");
        assert_eq!(parsed, FillStrategy::Mean);
    }
}
