//! feedbackd daemon entry point.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use feedbackd::cli::Cli;
use feedbackd::dbus::{self, FeedbackInterface};
use feedbackd::dev::SoundDevice;
use feedbackd::manager::{FeedbackManager, ManagerMsg};
use feedbackd::settings::{self, Settings};
use feedbackd::theme::expander::{device_compatibles, ThemeExpander};

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("feedbackd={default}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// GNOME publishes the active sound theme; follow it via the desktop
/// portal settings interface.
async fn track_sound_theme(connection: zbus::Connection, sound: Arc<SoundDevice>) {
    use futures::StreamExt;
    use zbus::zvariant::OwnedValue;

    const NAMESPACE: &str = "org.gnome.desktop.sound";
    const KEY: &str = "theme-name";

    fn variant_string(value: &OwnedValue) -> Option<String> {
        use zbus::zvariant::Value;
        // ReadOne wraps the setting in an extra variant layer
        match &**value {
            Value::Str(s) => Some(s.to_string()),
            Value::Value(inner) => match &**inner {
                Value::Str(s) => Some(s.to_string()),
                _ => None,
            },
            _ => None,
        }
    }

    let proxy = match zbus::Proxy::new(
        &connection,
        "org.freedesktop.portal.Desktop",
        "/org/freedesktop/portal/desktop",
        "org.freedesktop.portal.Settings",
    )
    .await
    {
        Ok(proxy) => proxy,
        Err(e) => {
            warn!("No settings portal, keeping default sound theme: {e}");
            return;
        }
    };

    match proxy.call::<_, _, OwnedValue>("ReadOne", &(NAMESPACE, KEY)).await {
        Ok(value) => {
            if let Some(name) = variant_string(&value) {
                sound.set_theme(&name);
            }
        }
        Err(e) => warn!("Failed to read sound theme: {e}"),
    }

    let Ok(mut changes) = proxy.receive_signal("SettingChanged").await else {
        return;
    };
    while let Some(msg) = changes.next().await {
        let Ok((namespace, key, value)) = msg.body().deserialize::<(String, String, OwnedValue)>()
        else {
            continue;
        };
        if namespace == NAMESPACE && key == KEY {
            if let Some(name) = variant_string(&value) {
                sound.set_theme(&name);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let theme_file = std::env::var_os("FEEDBACK_THEME")
        .map(Into::into)
        .or(cli.theme_file);
    let compatibles = if cli.compatibles.is_empty() {
        device_compatibles()
    } else {
        cli.compatibles
    };

    let settings_path = Settings::default_path()
        .unwrap_or_else(|| std::path::PathBuf::from("feedbackd-settings.json"));
    let settings = Settings::load(&settings_path);

    let expander = ThemeExpander::new(compatibles, theme_file);
    let (mut manager, handle) =
        FeedbackManager::new(expander, settings).context("Failed to load feedback theme")?;
    manager.init_devices();
    let sound = manager.sound();

    let msg_tx = handle.msg_tx.clone();
    FeedbackManager::spawn_udev_monitor(msg_tx.clone());

    // Settings file watcher: collapse change notifications into
    // manager messages
    let (ping_tx, mut ping_rx) = mpsc::unbounded_channel();
    let _watcher = settings::spawn_watcher(&settings_path, ping_tx);
    {
        let msg_tx = msg_tx.clone();
        tokio::spawn(async move {
            while ping_rx.recv().await.is_some() {
                if msg_tx.send(ManagerMsg::SettingsChanged).is_err() {
                    break;
                }
            }
        });
    }

    let manager_task = tokio::spawn(manager.run());

    let connection = zbus::connection::Builder::session()
        .context("Failed to connect to session bus")?
        .name(dbus::BUS_NAME)?
        .serve_at(dbus::OBJECT_PATH, FeedbackInterface::new(msg_tx.clone()))?
        .build()
        .await
        .context("Failed to acquire bus name")?;
    info!("D-Bus: {} on session bus", dbus::BUS_NAME);

    tokio::spawn(dbus::run_notification_pump(
        connection.clone(),
        handle.notify_rx,
        msg_tx.clone(),
    ));

    if let Some(sound) = sound {
        let desktop = std::env::var("XDG_CURRENT_DESKTOP").unwrap_or_default();
        if desktop.split(':').any(|d| d == "GNOME") {
            tokio::spawn(track_sound_theme(connection.clone(), sound));
        }
    }

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    loop {
        tokio::select! {
            _ = sighup.recv() => {
                info!("SIGHUP: reloading theme");
                let _ = msg_tx.send(ManagerMsg::ReloadTheme);
            }
            _ = sigterm.recv() => break,
            _ = sigint.recv() => break,
        }
    }

    info!("Shutting down");
    let (reply_tx, reply_rx) = oneshot::channel();
    if msg_tx.send(ManagerMsg::Shutdown { reply: reply_tx }).is_ok() {
        let _ = reply_rx.await;
    }
    manager_task.abort();
    drop(connection);
    Ok(())
}
