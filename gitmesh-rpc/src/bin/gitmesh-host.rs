//! Reference stdio harness for the dispatch surface: reads one JSON
//! request per line from stdin, writes one JSON response per line to
//! stdout. Progress events are interleaved on stdout as their own
//! tagged lines, the way `radicle-remote-helper` interleaves status
//! lines with the rest of its pkt-line protocol on the same stream.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use gitmesh_core::cache::SqliteCacheStore;
use gitmesh_rpc::{dispatch, Engine, ProgressFields, ProgressMessage, Request};
use gitmesh_session::progress::{ProgressEvent, ProgressKind, ProgressSink};
use gitmesh_session::SessionManager;

/// Writes each progress event as its own JSON line, tagged so the host
/// can tell it apart from a request's final response.
struct StdoutProgressSink {
    out: Mutex<io::Stdout>,
}

impl ProgressSink for StdoutProgressSink {
    fn emit(&self, event: ProgressEvent) {
        let fields = ProgressFields {
            repo_id: event.key.to_string(),
            phase: event.phase,
            loaded: event.loaded,
            total: event.total,
            progress: event.percent,
        };
        let message = match event.kind {
            ProgressKind::Clone => ProgressMessage::Clone(fields),
            ProgressKind::Merge => ProgressMessage::Merge(fields),
        };
        let line = serde_json::json!({ "channel": "progress", "event": message });
        let mut out = self.out.lock().unwrap();
        if writeln!(out, "{line}").is_ok() {
            let _ = out.flush();
        }
    }
}

fn main() {
    let base_dir = std::env::var("GITMESH_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("gitmesh"));

    if let Err(err) = std::fs::create_dir_all(&base_dir) {
        eprintln!("fatal: couldn't create {}: {err}", base_dir.display());
        std::process::exit(1);
    }
    let cache = match SqliteCacheStore::open(base_dir.join("cache.db")) {
        Ok(cache) => Arc::new(cache),
        Err(err) => {
            eprintln!("fatal: couldn't open cache database: {err}");
            std::process::exit(1);
        }
    };
    let session = Arc::new(SessionManager::new(base_dir, cache));
    let engine = Engine::new(session);
    let sink = StdoutProgressSink { out: Mutex::new(io::stdout()) };

    let stdin = io::stdin();
    let mut handle = stdin.lock();
    loop {
        let mut line = String::new();
        let read = match handle.read_line(&mut line) {
            Ok(read) => read,
            Err(err) => {
                eprintln!("fatal: stdin read error: {err}");
                std::process::exit(1);
            }
        };
        if read == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                let payload = serde_json::json!({
                    "channel": "response",
                    "success": false,
                    "error": format!("couldn't parse request: {err}"),
                    "code": "invalid-input",
                });
                println!("{payload}");
                continue;
            }
        };

        let response = dispatch(&engine, request, &sink);
        let payload = serde_json::json!({ "channel": "response", "response": response });
        println!("{payload}");
        let _ = io::stdout().flush();
    }
}
