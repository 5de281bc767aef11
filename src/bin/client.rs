//! # livebridge test client
//!
//! Loads the scenario page from a running `livebridge` server and triggers
//! its controls, printing the alert each one produces.
//!
//! ## Command Syntax
//! ```bash
//! client [--list] [test...]
//! ```
//!
//! | Argument | Description |
//! |----------|-------------|
//! | `--list` | Print the rendered page markup and exit |
//! | `[test...]` | Only run these client tests, e.g. `exception_result_async` |
//!
//! The server is reached over TCP when `LIVEBRIDGE_ADDR` is set, otherwise
//! over the Unix socket (`LIVEBRIDGE_SOCKET`, default `/tmp/livebridge.sock`).
//!
//! ## Example Output
//! ```text
//! Test Client To Server Argument Serialization: Success!
//! Test Client To Server Result Serialization: Success!
//!    List:
//!       0 : : 1
//! ```
use livebridge::client::ClientHandle;
use livebridge::logger;
use livebridge::page::Alert;
use livebridge::scenarios::ClientTest;
use serde_json::Value;

const APP_NAME: &str = "client";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "Usage: client [--list] [test...]";

fn print_value(value: &Value, indent: usize, key_opt: Option<&str>) {
    let padding = " ".repeat(indent);
    let label = key_opt.map(|key| format!("{key} : : ")).unwrap_or_default();

    match value {
        Value::Null => println!("{padding}{label}Null"),
        Value::Bool(b) => println!("{padding}{label}{b}"),
        Value::Number(n) => println!("{padding}{label}{n}"),
        Value::String(s) => println!("{padding}{label}\"{s}\""),
        Value::Array(arr) => {
            println!("{padding}{label}List:");
            for (i, v) in arr.iter().enumerate() {
                print_value(v, indent + 3, Some(&i.to_string()));
            }
        }
        Value::Object(obj) => {
            println!("{padding}{label}Map:");
            for (k, v) in obj {
                print_value(v, indent + 3, Some(k));
            }
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    logger::setup_logger();
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("{APP_NAME} version {APP_VERSION}");
        return Ok(());
    }

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    let list_only = args.iter().any(|a| a == "--list");
    let mut selected = Vec::new();
    for name in args.iter().filter(|a| !a.starts_with("--")) {
        let test = ClientTest::from_name(name).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unknown test: {name}"),
            )
        })?;
        selected.push(test);
    }

    let client = ClientHandle::from_env().await?;
    let page = client.load_page().await.map_err(std::io::Error::other)?;

    if list_only {
        print!("{}", page.markup);
        return Ok(());
    }

    let mut failures = 0usize;
    for fragment in &page.fragments {
        for control in &fragment.controls {
            if !selected.is_empty() && !selected.contains(&control.test) {
                continue;
            }

            let result = client.run_control(fragment, control).await;
            let alert = Alert::from_result(&result);
            println!("{}: {alert}", control.label);
            match result {
                Ok(Value::Null) => {}
                Ok(value) => print_value(&value, 3, None),
                Err(_) => failures += 1,
            }
        }
    }

    if failures > 0 {
        log::error!("{failures} test(s) failed");
        std::process::exit(1);
    }
    Ok(())
}
