#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use log::info;
use thiserror::Error;

use sq_io::{IoError, ReadOptions, read_csv_str, write_csv_string};
use sq_store::{DatasetStore, Operation, StoreError};
use sq_summary::{SummaryError, ViewRequest, summarize};
use sq_types::{CoerceOptions, DataType, TypeError};

const OPERATION_KINDS: [&str; 4] = ["retype", "impute_missing", "drop_missing", "drop_columns"];
const VIEW_KINDS: [&str; 6] = [
    "histogram",
    "box_plot",
    "scatter",
    "line",
    "correlation_matrix",
    "overview",
];

#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot parse {what}: {source}")]
    BadJson {
        what: &'static str,
        source: serde_json::Error,
    },
    #[error("operation record {index} has no string `op` field")]
    MalformedOperation { index: usize },
    #[error("unsupported operation kind `{kind}`, expected one of [{}]", OPERATION_KINDS.join(", "))]
    UnsupportedOperation { kind: String },
    #[error("operation `{kind}` is malformed: {source}")]
    BadOperation {
        kind: String,
        source: serde_json::Error,
    },
    #[error("view request has no string `view` field")]
    MalformedView,
    #[error("unsupported view kind `{kind}`, expected one of [{}]", VIEW_KINDS.join(", "))]
    UnsupportedView { kind: String },
    #[error("view request `{kind}` is malformed: {source}")]
    BadView {
        kind: String,
        source: serde_json::Error,
    },
    #[error("cannot parse type override `{entry}`, expected column=type")]
    BadTypeOverride { entry: String },
    #[error("cannot encode {what} as json: {source}")]
    Encode {
        what: &'static str,
        source: serde_json::Error,
    },
    #[error("cannot access {}: {source}", path.display())]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Summary(#[from] SummaryError),
}

/// Everything a single invocation asks for, resolved from the command line.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub input: PathBuf,
    pub types: BTreeMap<String, DataType>,
    pub ops_script: Option<PathBuf>,
    pub views: Vec<String>,
    pub overview: bool,
    pub undo: usize,
    pub output: Option<PathBuf>,
}

/// What a finished session did, for the driver to print and tests to inspect.
#[derive(Debug)]
pub struct SessionReport {
    pub rows: usize,
    pub columns: usize,
    pub applied: Vec<String>,
    pub undone: usize,
    pub emitted: Vec<String>,
    pub wrote: Option<PathBuf>,
}

/// Parses `column=type` pairs from a comma-separated `--types` value.
pub fn parse_type_overrides(raw: &str) -> Result<BTreeMap<String, DataType>, CliError> {
    let mut overrides = BTreeMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((column, dtype)) = entry.split_once('=') else {
            return Err(CliError::BadTypeOverride {
                entry: entry.to_owned(),
            });
        };
        let column = column.trim();
        if column.is_empty() {
            return Err(CliError::BadTypeOverride {
                entry: entry.to_owned(),
            });
        }
        overrides.insert(column.to_owned(), dtype.trim().parse()?);
    }
    Ok(overrides)
}

/// Parses an operations script: a json array of tagged operation records.
///
/// The `op` tag of every record is checked against the known kinds before the
/// record is deserialized, so a script with a kind the engine does not speak
/// fails with an error naming that kind rather than a generic decode message.
pub fn parse_operations(script: &str) -> Result<Vec<Operation>, CliError> {
    let records: Vec<serde_json::Value> =
        serde_json::from_str(script).map_err(|source| CliError::BadJson {
            what: "operations script",
            source,
        })?;

    let mut operations = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let Some(kind) = record.get("op").and_then(serde_json::Value::as_str) else {
            return Err(CliError::MalformedOperation { index });
        };
        if !OPERATION_KINDS.contains(&kind) {
            return Err(CliError::UnsupportedOperation {
                kind: kind.to_owned(),
            });
        }
        let kind = kind.to_owned();
        let operation = serde_json::from_value(record)
            .map_err(|source| CliError::BadOperation { kind, source })?;
        operations.push(operation);
    }
    Ok(operations)
}

/// Parses one `--view` argument into a view request, naming unknown kinds.
pub fn parse_view_request(raw: &str) -> Result<ViewRequest, CliError> {
    let record: serde_json::Value =
        serde_json::from_str(raw).map_err(|source| CliError::BadJson {
            what: "view request",
            source,
        })?;
    let Some(kind) = record.get("view").and_then(serde_json::Value::as_str) else {
        return Err(CliError::MalformedView);
    };
    if !VIEW_KINDS.contains(&kind) {
        return Err(CliError::UnsupportedView {
            kind: kind.to_owned(),
        });
    }
    let kind = kind.to_owned();
    serde_json::from_value(record).map_err(|source| CliError::BadView { kind, source })
}

/// Runs one whole session: load the input CSV, apply the operations script,
/// undo the requested number of steps, render every requested view as a json
/// line, and export the resulting table when asked to.
pub fn run_session(plan: &SessionPlan) -> Result<SessionReport, CliError> {
    let raw = fs::read_to_string(&plan.input).map_err(|source| CliError::File {
        path: plan.input.clone(),
        source,
    })?;
    let options = ReadOptions {
        types: plan.types.clone(),
        coerce: CoerceOptions::default(),
    };
    let table = read_csv_str(&raw, &options)?;
    info!(
        "loaded {} as {} rows x {} columns",
        plan.input.display(),
        table.rows(),
        table.width()
    );

    let mut store = DatasetStore::with_options(table, options.coerce);
    let mut applied = Vec::new();
    if let Some(path) = &plan.ops_script {
        let script = fs::read_to_string(path).map_err(|source| CliError::File {
            path: path.clone(),
            source,
        })?;
        for operation in parse_operations(&script)? {
            applied.push(operation.to_string());
            store.apply(operation)?;
        }
    }
    for _ in 0..plan.undo {
        store.undo()?;
    }

    let mut emitted = Vec::new();
    for raw_request in &plan.views {
        let request = parse_view_request(raw_request)?;
        emitted.push(render_view(&store, &request)?);
    }
    if plan.overview {
        emitted.push(render_view(&store, &ViewRequest::Overview)?);
    }

    let mut wrote = None;
    if let Some(path) = &plan.output {
        let rendered = write_csv_string(store.current())?;
        fs::write(path, rendered).map_err(|source| CliError::File {
            path: path.clone(),
            source,
        })?;
        info!("wrote current table to {}", path.display());
        wrote = Some(path.clone());
    }

    let table = store.current();
    Ok(SessionReport {
        rows: table.rows(),
        columns: table.width(),
        applied,
        undone: plan.undo,
        emitted,
        wrote,
    })
}

fn render_view(store: &DatasetStore, request: &ViewRequest) -> Result<String, CliError> {
    let view = summarize(store.current(), request)?;
    serde_json::to_string(&view).map_err(|source| CliError::Encode {
        what: "derived view",
        source,
    })
}
