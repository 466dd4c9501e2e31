mod aggregate;
mod config;
mod db;
mod ipc;
mod model;
mod store;

use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

fn init_tracing(filter: &str) {
    // stdout carries the protocol; logs go to stderr.
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("attendanced=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn main() {
    let cfg = config::AppConfig::from_env();
    init_tracing(&cfg.log_filter);

    let mut state = ipc::AppState::default();
    if let Some(path) = &cfg.workspace {
        if let Err(e) = state.open_workspace(path) {
            tracing::error!(workspace = %path.display(), "failed to open configured workspace: {e:?}");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "attendanced ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                tracing::warn!("unparseable request: {e}");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
