//! Integration tests for the event lifecycle.
//!
//! These drive the manager through its public channels the same way
//! the D-Bus layer does: commands in, `FeedbackEnded` notifications
//! out. No hardware is attached, so themes built on Dummy feedbacks
//! exercise the full trigger/loop/timeout/end paths while a
//! VibraRumble-only theme exercises the unavailable-device path.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use feedbackd::manager::{FeedbackManager, ManagerEvent, ManagerHandle, ManagerMsg};
use feedbackd::settings::Settings;
use feedbackd::theme::expander::ThemeExpander;
use feedbackd::{EndReason, ProfileLevel};

struct Daemon {
    msg_tx: mpsc::UnboundedSender<ManagerMsg>,
    notify_rx: mpsc::UnboundedReceiver<ManagerEvent>,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
    settings_path: PathBuf,
}

/// Spin up a manager around the given theme JSON, without devices.
fn daemon_with_theme(theme_json: &str) -> Daemon {
    let theme_dir = tempfile::tempdir().unwrap();
    let config_dir = tempfile::tempdir().unwrap();

    let theme_path = theme_dir.path().join("test.json");
    std::fs::write(&theme_path, theme_json).unwrap();

    let expander = ThemeExpander::with_dirs(
        vec![],
        Some(theme_path),
        None,
        vec![theme_dir.path().to_path_buf()],
    );
    let settings_path = config_dir.path().join("settings.json");
    let settings = Settings::load(&settings_path);

    // No devices get attached on purpose
    let (manager, handle) = FeedbackManager::new(expander, settings).unwrap();
    let ManagerHandle { msg_tx, notify_rx } = handle;
    tokio::spawn(manager.run());

    Daemon {
        msg_tx,
        notify_rx,
        _dirs: (theme_dir, config_dir),
        settings_path,
    }
}

const DUMMY_THEME: &str = r#"{
    "name": "test",
    "profiles": [
        {
            "name": "full",
            "feedbacks": [
                {"type": "Dummy", "event-name": "ev", "duration": 100},
                {"type": "Dummy", "event-name": "ev-quick", "duration": 0}
            ]
        },
        {
            "name": "silent",
            "feedbacks": [
                {"type": "Dummy", "event-name": "ev-silent", "duration": 0}
            ]
        }
    ]
}"#;

async fn trigger(
    daemon: &Daemon,
    event: &str,
    hint: Option<ProfileLevel>,
    event_timeout: i32,
    sender: Option<&str>,
) -> u32 {
    let (reply_tx, reply_rx) = oneshot::channel();
    daemon
        .msg_tx
        .send(ManagerMsg::Trigger {
            app_id: "org.example.test".to_string(),
            event_name: event.to_string(),
            hint_level: hint,
            timeout: event_timeout,
            sender: sender.map(str::to_string),
            reply: reply_tx,
        })
        .unwrap();
    timeout(Duration::from_secs(1), reply_rx)
        .await
        .expect("no trigger reply")
        .unwrap()
}

async fn next_event(daemon: &mut Daemon, wait: Duration) -> ManagerEvent {
    timeout(wait, daemon.notify_rx.recv())
        .await
        .expect("no manager event")
        .expect("notify channel closed")
}

#[tokio::test]
async fn test_trigger_with_unavailable_feedback_kind() {
    // The theme only has a vibra feedback and there is no vibra device
    let mut daemon = daemon_with_theme(
        r#"{"name": "t", "profiles": [
            {"name": "full", "feedbacks": [
                {"type": "VibraRumble", "event-name": "e1"}]}]}"#,
    );

    let id = trigger(&daemon, "e1", None, -1, None).await;
    assert_eq!(id, 1);

    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::FeedbackEnded {
            id: 1,
            reason: EndReason::NotFound
        }
    );
}

#[tokio::test]
async fn test_unknown_event_reports_not_found() {
    let mut daemon = daemon_with_theme(DUMMY_THEME);
    let id = trigger(&daemon, "no-such-event", None, -1, None).await;

    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::FeedbackEnded {
            id,
            reason: EndReason::NotFound
        }
    );
}

#[tokio::test]
async fn test_oneshot_ends_naturally() {
    let mut daemon = daemon_with_theme(DUMMY_THEME);
    let id = trigger(&daemon, "ev", None, -1, None).await;

    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::FeedbackEnded {
            id,
            reason: EndReason::Natural
        }
    );
}

#[tokio::test]
async fn test_negative_timeout_normalized_to_oneshot() {
    let mut daemon = daemon_with_theme(DUMMY_THEME);
    let id = trigger(&daemon, "ev", None, -5, None).await;

    // A looping event would never end on its own
    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::FeedbackEnded {
            id,
            reason: EndReason::Natural
        }
    );
}

#[tokio::test]
async fn test_explicit_end_of_looping_event() {
    let mut daemon = daemon_with_theme(DUMMY_THEME);
    let id = trigger(&daemon, "ev", None, 0, None).await;

    // Let it loop a couple of times
    tokio::time::sleep(Duration::from_millis(250)).await;
    daemon.msg_tx.send(ManagerMsg::End { id }).unwrap();

    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::FeedbackEnded {
            id,
            reason: EndReason::Explicit
        }
    );
}

#[tokio::test]
async fn test_timeout_expires_looping_event() {
    let mut daemon = daemon_with_theme(DUMMY_THEME);
    let id = trigger(&daemon, "ev", None, 1, None).await;

    let event = next_event(&mut daemon, Duration::from_secs(3)).await;
    assert_eq!(
        event,
        ManagerEvent::FeedbackEnded {
            id,
            reason: EndReason::Expired
        }
    );
}

#[tokio::test]
async fn test_profile_hint_lowers_level() {
    let mut daemon = daemon_with_theme(DUMMY_THEME);

    // "ev" only exists at full; a silent hint hides it
    let id = trigger(&daemon, "ev", Some(ProfileLevel::Silent), -1, None).await;
    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::FeedbackEnded {
            id,
            reason: EndReason::NotFound
        }
    );

    // "ev-silent" is defined at silent and must still run
    let id = trigger(&daemon, "ev-silent", Some(ProfileLevel::Silent), -1, None).await;
    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::FeedbackEnded {
            id,
            reason: EndReason::Natural
        }
    );
}

#[tokio::test]
async fn test_event_ids_are_monotonic() {
    let mut daemon = daemon_with_theme(DUMMY_THEME);
    let first = trigger(&daemon, "ev-quick", None, -1, None).await;
    let second = trigger(&daemon, "ev-quick", None, -1, None).await;
    assert_eq!(first, 1);
    assert_eq!(second, 2);

    // Both events end independently
    let mut seen = Vec::new();
    for _ in 0..2 {
        match next_event(&mut daemon, Duration::from_secs(1)).await {
            ManagerEvent::FeedbackEnded { id, reason } => {
                assert_eq!(reason, EndReason::Natural);
                seen.push(id);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    seen.sort();
    assert_eq!(seen, [1, 2]);
}

#[tokio::test]
async fn test_peer_vanish_ends_events() {
    let mut daemon = daemon_with_theme(DUMMY_THEME);
    let id = trigger(&daemon, "ev", None, 0, Some(":1.23")).await;

    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::WatchPeer {
            peer: ":1.23".to_string()
        }
    );

    daemon
        .msg_tx
        .send(ManagerMsg::PeerVanished {
            peer: ":1.23".to_string(),
        })
        .unwrap();

    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::FeedbackEnded {
            id,
            reason: EndReason::Explicit
        }
    );

    // The watch is released once the vanished peer's last event is gone
    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::UnwatchPeer {
            peer: ":1.23".to_string()
        }
    );
}

#[tokio::test]
async fn test_watch_released_when_peer_idle() {
    let mut daemon = daemon_with_theme(DUMMY_THEME);
    let id = trigger(&daemon, "ev-quick", None, -1, Some(":1.7")).await;

    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::WatchPeer {
            peer: ":1.7".to_string()
        }
    );

    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::FeedbackEnded {
            id,
            reason: EndReason::Natural
        }
    );

    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::UnwatchPeer {
            peer: ":1.7".to_string()
        }
    );
}

#[tokio::test]
async fn test_set_profile_validation_and_persistence() {
    let mut daemon = daemon_with_theme(DUMMY_THEME);

    let (reply_tx, reply_rx) = oneshot::channel();
    daemon
        .msg_tx
        .send(ManagerMsg::SetProfile {
            name: "loud".to_string(),
            reply: reply_tx,
        })
        .unwrap();
    assert!(!reply_rx.await.unwrap());

    let (reply_tx, reply_rx) = oneshot::channel();
    daemon
        .msg_tx
        .send(ManagerMsg::SetProfile {
            name: "quiet".to_string(),
            reply: reply_tx,
        })
        .unwrap();
    assert!(reply_rx.await.unwrap());

    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::ProfileChanged {
            name: "quiet".to_string()
        }
    );

    // The profile was mirrored into the settings store
    let settings = Settings::load(&daemon.settings_path);
    assert_eq!(settings.profile(), Some(ProfileLevel::Quiet));

    // Lowered profile hides full-only events
    let id = trigger(&daemon, "ev", None, -1, None).await;
    let event = next_event(&mut daemon, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        ManagerEvent::FeedbackEnded {
            id,
            reason: EndReason::NotFound
        }
    );
}

#[tokio::test]
async fn test_parent_theme_chain_via_manager() {
    let theme_dir = tempfile::tempdir().unwrap();
    let config_dir = tempfile::tempdir().unwrap();
    let themes = theme_dir.path().join("feedbackd/themes");
    std::fs::create_dir_all(&themes).unwrap();

    std::fs::write(
        themes.join("default.json"),
        r#"{"name": "default", "profiles": [
            {"name": "full", "feedbacks": [
                {"type": "Dummy", "event-name": "from-parent", "duration": 0}]}]}"#,
    )
    .unwrap();
    let child = themes.join("child.json");
    std::fs::write(
        &child,
        r#"{"name": "child", "parent-name": "default", "profiles": [
            {"name": "full", "feedbacks": [
                {"type": "Dummy", "event-name": "from-child", "duration": 0}]}]}"#,
    )
    .unwrap();

    let expander = ThemeExpander::with_dirs(vec![], Some(child), None, vec![themes]);
    let settings = Settings::load(&config_dir.path().join("settings.json"));
    let (manager, handle) = FeedbackManager::new(expander, settings).unwrap();
    tokio::spawn(manager.run());
    let mut daemon = Daemon {
        msg_tx: handle.msg_tx,
        notify_rx: handle.notify_rx,
        _dirs: (theme_dir, config_dir),
        settings_path: PathBuf::new(),
    };

    // Events from both the child and its parent resolve
    for name in ["from-child", "from-parent"] {
        let id = trigger(&daemon, name, None, -1, None).await;
        let event = next_event(&mut daemon, Duration::from_secs(1)).await;
        assert_eq!(
            event,
            ManagerEvent::FeedbackEnded {
                id,
                reason: EndReason::Natural
            }
        );
    }
}
