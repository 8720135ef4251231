//! Loopback worker speaking the bridge line protocol.
//!
//! Prints the readiness sentinel, then answers each request line with a
//! success response echoing every request field plus a receive sequence number.
//! The request text selects scripted misbehavior:
//!
//! - `fail`: error response
//! - `crash`: exit with code 3 without answering
//! - `garbage`: a non-JSON line, then a normal answer
//! - `stale`: an answer with a foreign id, then a normal answer
//! - `hang`: no answer at all
//! - `sleep:<ms>`: answer after a delay
//!
//! Environment: `ECHO_WORKER_STARTUP_MS` delays the sentinel,
//! `ECHO_WORKER_NEVER_READY=1` withholds it, `ECHO_WORKER_SENTINEL`
//! overrides it.

use std::io::{self, BufRead, Write};
use std::process;
use std::thread;
use std::time::Duration;

use serde_json::{Map, Value, json};

const FOREIGN_ID: &str = "00000000-0000-0000-0000-000000000000";

fn main() {
    if let Err(e) = run() {
        eprintln!("echo-worker: {e}");
        process::exit(1);
    }
}

fn run() -> io::Result<()> {
    eprintln!("echo-worker: starting (pid {})", process::id());

    if let Some(ms) = env_millis("ECHO_WORKER_STARTUP_MS") {
        thread::sleep(ms);
    }
    if std::env::var("ECHO_WORKER_NEVER_READY").as_deref() == Ok("1") {
        eprintln!("echo-worker: withholding readiness");
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }

    let sentinel = std::env::var("ECHO_WORKER_SENTINEL").unwrap_or_else(|_| "READY".to_string());
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", sentinel)?;
    out.flush()?;

    let stdin = io::stdin();
    let mut seq: u64 = 0;
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        seq += 1;

        let request: Map<String, Value> = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("echo-worker: unparseable request: {e}");
                continue;
            }
        };
        let request_id = request
            .get("requestId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let text = request
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        eprintln!("echo-worker: request {seq} ({request_id}): {text}");

        match text.as_str() {
            "crash" => {
                eprintln!("echo-worker: crashing on request");
                process::exit(3);
            }
            "hang" => continue,
            "fail" => {
                let response = json!({
                    "status": "error",
                    "requestId": request_id,
                    "error": "synthesis failed: scripted failure",
                });
                emit(&mut out, &response)?;
                continue;
            }
            "garbage" => {
                writeln!(out, "this is not json {{")?;
                out.flush()?;
            }
            "stale" => {
                let response = json!({
                    "status": "success",
                    "requestId": FOREIGN_ID,
                    "seq": 0,
                });
                emit(&mut out, &response)?;
            }
            other => {
                if let Some(ms) = other
                    .strip_prefix("sleep:")
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    thread::sleep(Duration::from_millis(ms));
                }
            }
        }

        let mut response = request;
        response.insert("status".to_string(), json!("success"));
        response.insert("requestId".to_string(), json!(request_id));
        response.insert("seq".to_string(), json!(seq));
        emit(&mut out, &Value::Object(response))?;
    }

    eprintln!("echo-worker: stdin closed, exiting");
    Ok(())
}

fn emit(out: &mut impl Write, value: &Value) -> io::Result<()> {
    writeln!(out, "{}", value)?;
    out.flush()
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
