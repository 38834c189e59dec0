#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::error;

use sq_cli::{SessionPlan, parse_type_overrides, run_session};

enum Invocation {
    Run(SessionPlan),
    Help,
}

fn main() {
    env_logger::init();

    let plan = match parse_args(std::env::args().skip(1)) {
        Ok(Invocation::Help) => {
            print_help();
            return;
        }
        Ok(Invocation::Run(plan)) => plan,
        Err(message) => {
            eprintln!("squeegee: {message}");
            eprintln!("try `squeegee --help`");
            std::process::exit(2);
        }
    };

    match run_session(&plan) {
        Ok(report) => {
            for line in &report.emitted {
                println!("{line}");
            }
        }
        Err(err) => {
            error!("session failed: {err}");
            std::process::exit(1);
        }
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Invocation, String> {
    let mut input: Option<PathBuf> = None;
    let mut types = BTreeMap::new();
    let mut ops_script = None;
    let mut views = Vec::new();
    let mut overview = false;
    let mut undo = 0usize;
    let mut output = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--input" => {
                let value = args.next().ok_or("--input requires a path")?;
                input = Some(PathBuf::from(value));
            }
            "--types" => {
                let value = args.next().ok_or("--types requires a column=type list")?;
                let parsed = parse_type_overrides(&value).map_err(|err| err.to_string())?;
                types.extend(parsed);
            }
            "--ops" => {
                let value = args.next().ok_or("--ops requires a path")?;
                ops_script = Some(PathBuf::from(value));
            }
            "--view" => {
                let value = args.next().ok_or("--view requires a json view request")?;
                views.push(value);
            }
            "--overview" => {
                overview = true;
            }
            "--undo" => {
                let value = args.next().ok_or("--undo requires a step count")?;
                undo = value
                    .parse()
                    .map_err(|_| format!("cannot parse undo count `{value}`"))?;
            }
            "--output" => {
                let value = args.next().ok_or("--output requires a path")?;
                output = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                return Ok(Invocation::Help);
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    let Some(input) = input else {
        return Err("--input is required".to_owned());
    };
    Ok(Invocation::Run(SessionPlan {
        input,
        types,
        ops_script,
        views,
        overview,
        undo,
        output,
    }))
}

fn print_help() {
    println!(
        "squeegee\n\
         Usage:\n\
         \tsqueegee --input data.csv [--types col=type,...] [--ops script.json] [--view <json>] [--overview] [--undo N] [--output cleaned.csv]\n\
         Options:\n\
         \t--input <path>    CSV file to load (required)\n\
         \t--types <list>    Comma-separated column=type overrides; types are integer, float, boolean, text, datetime\n\
         \t--ops <path>      JSON array of operation records applied in order\n\
         \t--view <json>     Derived view request, may repeat; each view prints as one json line\n\
         \t--overview        Print the table overview as a final json line\n\
         \t--undo <n>        Undo the last n applied operations before rendering\n\
         \t--output <path>   Write the current table as CSV\n\
         \t-h, --help        Show this help\n\
         Exit status:\n\
         \t0 success, 1 data or operation error, 2 usage error"
    );
}
