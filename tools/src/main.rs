//! ops-runner: operational CLI for the fulfillment control layer.
//!
//! Stands in for the external scheduler and the operator console.
//!
//! Usage:
//!   ops-runner --db ops.db --data-dir ./data --run-pickup 100
//!   ops-runner --db ops.db --data-dir ./data --run-detection 200 --run-policy 50
//!   ops-runner --db ops.db --data-dir ./data --action '{"action":"mute","ttn":"204501","days":5}'
//!   ops-runner --db ops.db --data-dir ./data --serve
//!
//! `--serve` reads one JSON `OperatorAction` per stdin line and prints
//! one JSON result (or `{"error": ...}`) per line.

use anyhow::Result;
use chrono::Utc;
use fulfillment_core::command::{dispatch, OperatorAction};
use fulfillment_core::engine::OpsEngine;
use std::env;
use std::io::{self, BufRead, Write};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = str_arg(&args, "--db").unwrap_or("ops.db");
    let data_dir = str_arg(&args, "--data-dir").unwrap_or("./data");
    let serve = args.iter().any(|a| a == "--serve");

    let engine = OpsEngine::build(db, data_dir)?;
    log::info!("ops-runner: db={db} data_dir={data_dir}");

    if serve {
        return serve_loop(&engine);
    }

    let mut ran_any = false;
    for action in flag_actions(&args)? {
        ran_any = true;
        run_and_print(&engine, action)?;
    }
    if let Some(raw) = str_arg(&args, "--action") {
        ran_any = true;
        run_and_print(&engine, serde_json::from_str(raw)?)?;
    }
    if !ran_any {
        // No action requested: show the dashboard, the operator's
        // morning view.
        run_and_print(&engine, OperatorAction::Dashboard)?;
    }
    Ok(())
}

/// Convenience flags for the common scheduler cadences.
fn flag_actions(args: &[String]) -> Result<Vec<OperatorAction>> {
    let mut actions = Vec::new();
    if let Some(limit) = num_arg(args, "--run-pickup") {
        actions.push(OperatorAction::RunPickup { limit });
    }
    if let Some(limit) = num_arg(args, "--run-detection") {
        actions.push(OperatorAction::RunDetection { limit });
    }
    if let Some(limit) = num_arg(args, "--run-policy") {
        actions.push(OperatorAction::RunPolicy { limit });
    }
    if let Some(customer) = str_arg(args, "--recalc") {
        actions.push(OperatorAction::RecalcRisk {
            customer: customer.to_string(),
        });
    }
    Ok(actions)
}

fn run_and_print(engine: &OpsEngine, action: OperatorAction) -> Result<()> {
    match dispatch(engine, action, Utc::now()) {
        Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        Err(e) => {
            log::error!("action failed: {e}");
            println!("{}", serde_json::json!({ "error": e.to_string() }));
        }
    }
    Ok(())
}

fn serve_loop(engine: &OpsEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        if handle.read_line(&mut buffer)? == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<OperatorAction>(&buffer) {
            Ok(action) => match dispatch(engine, action, Utc::now()) {
                Ok(result) => result,
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            },
            Err(e) => serde_json::json!({ "error": format!("bad action: {e}") }),
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn num_arg(args: &[String], flag: &str) -> Option<i64> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
}
