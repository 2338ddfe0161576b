use crate::settings::AppSettings;

use anyhow::{Context, Result, bail};
use gantry_core::client::{CloseKind, PanelApi, ServerSession, SessionOptions, SocketEvent};
use gantry_core::persist::{JsonFileStore, KeyValueStore};
use gantry_core::telemetry::{NO_DATA, TelemetrySnapshot};
use gantry_core::types::PowerAction;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

/// One line typed at the prompt.
#[derive(Debug, PartialEq)]
enum Input {
    Command(String),
    Power(PowerAction),
    HistoryUp,
    HistoryDown,
    Stats,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let Some(directive) = line.trim().strip_prefix(':') else {
        return Input::Command(line.to_string());
    };
    match directive {
        "start" => Input::Power(PowerAction::Start),
        "stop" => Input::Power(PowerAction::Stop),
        "restart" => Input::Power(PowerAction::Restart),
        "kill" => Input::Power(PowerAction::Kill),
        "up" => Input::HistoryUp,
        "down" => Input::HistoryDown,
        "stats" => Input::Stats,
        "quit" | "q" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

fn latest(samples: &[f64]) -> Option<f64> {
    samples.last().copied().filter(|v| *v != NO_DATA)
}

fn format_stats(snapshot: &TelemetrySnapshot) -> String {
    let show = |v: Option<f64>, unit: &str| match v {
        Some(v) => format!("{}{}", v, unit),
        None => "-".to_string(),
    };
    let mut line = format!(
        "cpu {}  mem {}  net in {} out {}",
        show(latest(&snapshot.cpu), "%"),
        show(latest(&snapshot.memory_mib), " MiB"),
        show(latest(&snapshot.network_rx), " B"),
        show(latest(&snapshot.network_tx), " B"),
    );
    if let Some(live) = &snapshot.live {
        line.push_str(&format!(
            "  disk {} MiB  uptime {}s",
            live.disk_bytes / (1024 * 1024),
            live.uptime_secs
        ));
    }
    line
}

/// Attach to a server console until stdin closes, Ctrl-C, or the
/// connection gives up.
pub async fn run(settings: &AppSettings, server_id: &str) -> Result<()> {
    if settings.panel_url.is_empty() || settings.api_key.is_empty() {
        bail!("panel_url and api_key must be set (settings.json or GANTRY_PANEL_URL/GANTRY_API_KEY)");
    }

    let api = Arc::new(PanelApi::new(&settings.panel_url, &settings.api_key));
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::in_config_dir());
    let options = SessionOptions {
        scrollback: settings.scrollback_lines as usize,
        viewport_rows: settings.viewport_rows as usize,
        ..Default::default()
    };
    let session = ServerSession::new(
        server_id,
        api,
        store,
        options,
        &tokio::runtime::Handle::current(),
    );

    let (done_tx, done_rx) = async_channel::bounded::<String>(1);
    {
        let console = session.console().clone();
        let printed = Mutex::new(0u64);
        session.subscribe(move |event| {
            {
                let console = console.lock();
                let buffer = console.buffer();
                let mut printed = printed.lock();
                let fresh = buffer.appended_total().saturating_sub(*printed);
                for line in buffer.tail(fresh.min(buffer.len() as u64) as usize) {
                    println!("{}", line);
                }
                *printed = buffer.appended_total();
            }
            match event {
                SocketEvent::Reconnecting { attempt } => {
                    eprintln!("[gantry] connection lost, reconnecting (attempt {})", attempt);
                }
                SocketEvent::ConnectError => {
                    let _ = done_tx.try_send("could not reconnect".to_string());
                }
                SocketEvent::Closed {
                    code,
                    reason,
                    kind: CloseKind::Fatal,
                } => {
                    let _ = done_tx.try_send(format!(
                        "disconnected by daemon ({} {}), will not retry",
                        code, reason
                    ));
                }
                _ => {}
            }
        });
    }

    session
        .open()
        .await
        .with_context(|| format!("failed to open console for {}", server_id))?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stats_tick = tokio::time::interval(std::time::Duration::from_secs(5));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if !handle_input(&session, parse_input(&line)) {
                    break;
                }
            }
            reason = done_rx.recv() => {
                if let Ok(reason) = reason {
                    eprintln!("[gantry] {}", reason);
                }
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
            _ = stats_tick.tick(), if settings.show_stats => {
                println!("[stats] {}", format_stats(&session.telemetry_snapshot()));
            }
        }
    }

    session.close();
    Ok(())
}

/// Returns false when the user asked to quit.
fn handle_input(session: &ServerSession<PanelApi>, input: Input) -> bool {
    match input {
        Input::Command(text) => {
            session.submit_command(&text);
        }
        Input::Power(action) => {
            if !session.set_power_state(action) {
                eprintln!(
                    "[gantry] {} not available while server is {}",
                    action.as_str(),
                    session
                        .power_state()
                        .map(|s| s.as_str())
                        .unwrap_or("unknown")
                );
            }
        }
        Input::HistoryUp => {
            let recalled = session.console().lock().history_previous().to_string();
            println!("> {}", recalled);
        }
        Input::HistoryDown => {
            let recalled = session.console().lock().history_next().to_string();
            println!("> {}", recalled);
        }
        Input::Stats => println!("[stats] {}", format_stats(&session.telemetry_snapshot())),
        Input::Quit => return false,
        Input::Unknown(directive) => eprintln!("[gantry] unknown directive :{}", directive),
    }
    true
}
