#![forbid(unsafe_code)]

use std::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use sq_frame::{FillStrategy, FrameError, Table};
use sq_types::{CoerceOptions, DataType};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("nothing to undo")]
    EmptyHistory,
    #[error("replay diverged at step {step}: {source}")]
    ReplayDiverged { step: usize, source: FrameError },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// One user-issued transformation, recorded exactly as requested.
///
/// The JSON form is the operation-intake wire format: `op` selects the kind,
/// the remaining fields are its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Retype {
        column: String,
        target: DataType,
    },
    ImputeMissing {
        columns: Vec<String>,
        strategy: FillStrategy,
    },
    DropMissing {
        /// Empty means "scan every column".
        #[serde(default)]
        columns: Vec<String>,
    },
    DropColumns {
        columns: Vec<String>,
    },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retype { column, target } => write!(f, "retype `{column}` to {target}"),
            Self::ImputeMissing { columns, strategy } => {
                write!(f, "impute [{}] with {strategy}", columns.join(", "))
            }
            Self::DropMissing { columns } if columns.is_empty() => {
                f.write_str("drop rows missing in any column")
            }
            Self::DropMissing { columns } => {
                write!(f, "drop rows missing in [{}]", columns.join(", "))
            }
            Self::DropColumns { columns } => {
                write!(f, "drop columns [{}]", columns.join(", "))
            }
        }
    }
}

/// The single source of truth for a cleaning session.
///
/// Holds the immutable original upload, the current table, and the
/// append-only history of applied operations. `apply` is atomic: a rejected
/// operation leaves both the table and the history untouched. `undo`
/// recomputes the current table by replaying the shortened history over the
/// original, so the visible state can never drift from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetStore {
    original: Table,
    current: Table,
    history: Vec<Operation>,
    options: CoerceOptions,
}

impl DatasetStore {
    #[must_use]
    pub fn new(original: Table) -> Self {
        Self::with_options(original, CoerceOptions::default())
    }

    #[must_use]
    pub fn with_options(original: Table, options: CoerceOptions) -> Self {
        Self {
            current: original.clone(),
            original,
            history: Vec::new(),
            options,
        }
    }

    #[must_use]
    pub fn current(&self) -> &Table {
        &self.current
    }

    #[must_use]
    pub fn original(&self) -> &Table {
        &self.original
    }

    #[must_use]
    pub fn history(&self) -> &[Operation] {
        &self.history
    }

    #[must_use]
    pub fn options(&self) -> &CoerceOptions {
        &self.options
    }

    pub fn apply(&mut self, op: Operation) -> Result<&Table, StoreError> {
        match run_operation(&self.current, &op, &self.options) {
            Ok(next) => {
                info!(
                    "applied {op}; table is {} rows x {} columns",
                    next.rows(),
                    next.width()
                );
                self.history.push(op);
                self.current = next;
                Ok(&self.current)
            }
            Err(err) => {
                warn!("rejected {op}: {err}");
                Err(err.into())
            }
        }
    }

    /// Removes the most recent operation and rebuilds the current table by
    /// full replay. Fails with `EmptyHistory` when there is nothing to undo;
    /// the replay itself re-runs operations that applied cleanly before and
    /// commits only after the whole prefix succeeds.
    pub fn undo(&mut self) -> Result<&Table, StoreError> {
        if self.history.is_empty() {
            return Err(StoreError::EmptyHistory);
        }
        let shortened = &self.history[..self.history.len() - 1];
        let replayed = replay(&self.original, shortened, &self.options)?;
        if let Some(op) = self.history.pop() {
            info!("undid {op}; replayed {} operations", self.history.len());
        }
        self.current = replayed;
        Ok(&self.current)
    }

    /// Returns to the original upload and clears the history.
    pub fn reset(&mut self) -> &Table {
        info!("reset to original table, discarding {} operations", self.history.len());
        self.history.clear();
        self.current = self.original.clone();
        &self.current
    }
}

fn run_operation(
    table: &Table,
    op: &Operation,
    options: &CoerceOptions,
) -> Result<Table, FrameError> {
    match op {
        Operation::Retype { column, target } => table.retype(column, *target, options),
        Operation::ImputeMissing { columns, strategy } => table.impute(columns, strategy, options),
        Operation::DropMissing { columns } => table.drop_missing_rows(columns),
        Operation::DropColumns { columns } => table.drop_columns(columns),
    }
}

/// Folds a history over the original table. Public so tests and tools can
/// check replay determinism against a live store.
pub fn replay(
    original: &Table,
    history: &[Operation],
    options: &CoerceOptions,
) -> Result<Table, StoreError> {
    let mut table = original.clone();
    for (step, op) in history.iter().enumerate() {
        table = run_operation(&table, op, options)
            .map_err(|source| StoreError::ReplayDiverged { step, source })?;
    }
    Ok(table)
}
