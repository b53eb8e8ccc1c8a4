use easy_keyboard_link::domain::models::AppEvent;
use easy_keyboard_link::domain::settings::SettingsService;
use easy_keyboard_link::infrastructure::bluetooth::{LinkConfig, LinkHandle};
use easy_keyboard_link::infrastructure::logging::init_logger;
use easy_keyboard_link::presentation::app::{spawn_stdin_reader, ConsoleApp};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = SettingsService::new()?;

    let _logging_guard = init_logger(&settings.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    tracing::info!("Starting Easy Keyboard Link");

    let config = LinkConfig::from_settings(settings.get())?;
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (link, link_thread) = start_link(config, event_tx)?;

    ConsoleApp::new(settings, link.clone())
        .run(event_rx, spawn_stdin_reader())
        .await;

    link.shutdown();
    match tokio::task::spawn_blocking(move || link_thread.join()).await {
        Ok(Ok(())) => tracing::info!("Link thread stopped"),
        _ => tracing::warn!("Link thread did not shut down cleanly"),
    }
    Ok(())
}

#[cfg(windows)]
fn start_link(
    config: LinkConfig,
    event_tx: mpsc::UnboundedSender<AppEvent>,
) -> anyhow::Result<(LinkHandle, JoinHandle<()>)> {
    use easy_keyboard_link::infrastructure::bluetooth::{spawn_link_thread, WinRtTransport};
    spawn_link_thread(WinRtTransport::new, config, event_tx)
}

#[cfg(not(windows))]
fn start_link(
    _config: LinkConfig,
    _event_tx: mpsc::UnboundedSender<AppEvent>,
) -> anyhow::Result<(LinkHandle, JoinHandle<()>)> {
    anyhow::bail!("No Bluetooth transport is available on this platform")
}
