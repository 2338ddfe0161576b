use crate::settings::AppSettings;

use anyhow::{Result, bail};
use gantry_core::api::ServerStats;
use gantry_core::client::{PanelApi, ResourcePoller, ResourceSource, RowUpdate};
use gantry_core::dashboard::DashboardPreferences;
use gantry_core::persist::{JsonFileStore, KeyValueStore};
use gantry_core::poller::{PollConfig, RowStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

fn describe(status: &RowStatus) -> String {
    match status {
        RowStatus::Suspended => "suspended".to_string(),
        RowStatus::Transferring => "transferring".to_string(),
        RowStatus::NodeOffline => "node offline".to_string(),
        RowStatus::Loading => "loading".to_string(),
        RowStatus::AssumeOffline => "offline (no response)".to_string(),
        RowStatus::Live(stats) => describe_stats(stats),
    }
}

fn describe_stats(stats: &ServerStats) -> String {
    format!(
        "{}  cpu {:.2}%  mem {} MiB  disk {} MiB  up {}s",
        stats.status.map(|s| s.as_str()).unwrap_or("unknown"),
        stats.cpu_usage_percent,
        stats.memory_usage_bytes / (1024 * 1024),
        stats.disk_usage_bytes / (1024 * 1024),
        stats.uptime_secs
    )
}

fn is_refresh(line: &str) -> bool {
    matches!(line.trim(), "r" | "refresh")
}

/// Remount every degraded row. Returns the ids that were refreshed.
fn refresh_degraded<S: ResourceSource>(pollers: &mut [ResourcePoller<S>]) -> Vec<String> {
    pollers
        .iter_mut()
        .filter(|poller| poller.poll_state().is_degraded())
        .map(|poller| {
            poller.remount();
            poller.server_id().to_string()
        })
        .collect()
}

pub struct WatchOptions {
    pub server_ids: Vec<String>,
    pub user_id: Option<String>,
    pub toggle_show_all: bool,
}

/// Poll each server's resources and print every row change until Ctrl-C.
/// Entering `r` on stdin retries rows that stopped responding.
pub async fn run(settings: &AppSettings, options: WatchOptions) -> Result<()> {
    if settings.panel_url.is_empty() || settings.api_key.is_empty() {
        bail!("panel_url and api_key must be set (settings.json or GANTRY_PANEL_URL/GANTRY_API_KEY)");
    }

    if let Some(user_id) = &options.user_id {
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::in_config_dir());
        let mut prefs = DashboardPreferences::load(user_id.clone(), store);
        if options.toggle_show_all {
            if let Err(e) = prefs.toggle_show_all() {
                log::warn!("Could not save show-all preference: {}", e);
            }
        }
        println!("show all servers: {}", prefs.show_all());
    }

    let api = Arc::new(PanelApi::new(&settings.panel_url, &settings.api_key));
    let (tx, rx) = async_channel::unbounded::<RowUpdate>();
    let runtime = tokio::runtime::Handle::current();

    let mut pollers: Vec<ResourcePoller<PanelApi>> = options
        .server_ids
        .iter()
        .map(|id| {
            ResourcePoller::new(
                id.clone(),
                api.clone(),
                PollConfig::default(),
                runtime.clone(),
                tx.clone(),
            )
        })
        .collect();
    for poller in &mut pollers {
        poller.mount();
    }

    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut shown: HashMap<String, RowStatus> = HashMap::new();
    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if is_refresh(&line) => {
                    for id in refresh_degraded(&mut pollers) {
                        println!("{}  refreshing", id);
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => stdin_open = false,
                Err(e) => {
                    log::warn!("Stopped reading stdin: {}", e);
                    stdin_open = false;
                }
            },
            update = rx.recv() => {
                let Ok(update) = update else { break };
                if shown.get(&update.server_id) != Some(&update.status) {
                    println!("{}  {}", update.server_id, describe(&update.status));
                    shown.insert(update.server_id, update.status);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    for poller in &mut pollers {
        poller.unmount();
    }
    Ok(())
}
