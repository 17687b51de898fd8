//! D-Bus surface of the daemon.
//!
//! Bus name: `org.sigxcpu.Feedback`
//! Object path: `/org/sigxcpu/Feedback`
//!
//! The interface forwards calls into the manager channel; a pump task
//! turns manager notifications into the `FeedbackEnded` signal,
//! property-changed emissions and `NameOwnerChanged` peer watches.

use std::collections::HashMap;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use zbus::object_server::SignalEmitter;
use zbus::{fdo, interface, zvariant::OwnedValue, Connection};

use crate::manager::{ManagerEvent, ManagerMsg};
use crate::theme::ProfileLevel;

pub const BUS_NAME: &str = "org.sigxcpu.Feedback";
pub const OBJECT_PATH: &str = "/org/sigxcpu/Feedback";

/// The served `org.sigxcpu.Feedback` object.
pub struct FeedbackInterface {
    msg_tx: mpsc::UnboundedSender<ManagerMsg>,
}

impl FeedbackInterface {
    pub fn new(msg_tx: mpsc::UnboundedSender<ManagerMsg>) -> Self {
        Self { msg_tx }
    }

    fn manager_gone() -> fdo::Error {
        fdo::Error::Failed("Feedback manager is not running".to_string())
    }
}

#[interface(name = "org.sigxcpu.Feedback")]
impl FeedbackInterface {
    /// Trigger feedback for an event. Returns the event id; end of
    /// feedback is announced via the `FeedbackEnded` signal.
    async fn trigger_feedback(
        &self,
        app_id: &str,
        event: &str,
        hints: HashMap<String, OwnedValue>,
        timeout: i32,
        #[zbus(header)] header: zbus::message::Header<'_>,
    ) -> fdo::Result<u32> {
        if app_id.is_empty() {
            return Err(fdo::Error::InvalidArgs(format!("Invalid app id {app_id}")));
        }
        if event.is_empty() {
            return Err(fdo::Error::InvalidArgs(format!("Invalid event {event}")));
        }

        let hint_level = match hints.get("profile") {
            Some(value) => {
                let name: &str = value.downcast_ref().map_err(|_| {
                    fdo::Error::InvalidArgs("Profile hint must be a string".to_string())
                })?;
                let level = ProfileLevel::from_name(name).ok_or_else(|| {
                    fdo::Error::InvalidArgs(format!("Invalid profile '{name}'"))
                })?;
                Some(level)
            }
            None => None,
        };

        let sender = header.sender().map(|s| s.to_string());
        let (reply_tx, reply_rx) = oneshot::channel();
        self.msg_tx
            .send(ManagerMsg::Trigger {
                app_id: app_id.to_string(),
                event_name: event.to_string(),
                hint_level,
                timeout,
                sender,
                reply: reply_tx,
            })
            .map_err(|_| Self::manager_gone())?;

        reply_rx.await.map_err(|_| Self::manager_gone())
    }

    /// End the feedbacks of an event ahead of time.
    async fn end_feedback(&self, id: u32) -> fdo::Result<()> {
        self.msg_tx
            .send(ManagerMsg::End { id })
            .map_err(|_| Self::manager_gone())?;
        Ok(())
    }

    #[zbus(property)]
    async fn profile(&self) -> fdo::Result<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.msg_tx
            .send(ManagerMsg::GetProfile { reply: reply_tx })
            .map_err(|_| Self::manager_gone())?;
        reply_rx.await.map_err(|_| Self::manager_gone())
    }

    #[zbus(property)]
    async fn set_profile(&self, profile: String) -> fdo::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.msg_tx
            .send(ManagerMsg::SetProfile {
                name: profile.clone(),
                reply: reply_tx,
            })
            .map_err(|_| Self::manager_gone())?;

        let accepted = reply_rx.await.map_err(|_| Self::manager_gone())?;
        if !accepted {
            return Err(fdo::Error::InvalidArgs(format!("Invalid profile '{profile}'")));
        }
        Ok(())
    }

    #[zbus(signal)]
    pub async fn feedback_ended(
        emitter: &SignalEmitter<'_>,
        id: u32,
        reason: u32,
    ) -> zbus::Result<()>;
}

/// Watch one bus peer and report when its name loses its owner.
async fn watch_peer(
    connection: Connection,
    peer: String,
    msg_tx: mpsc::UnboundedSender<ManagerMsg>,
) {
    let dbus = match fdo::DBusProxy::new(&connection).await {
        Ok(proxy) => proxy,
        Err(e) => {
            warn!("Failed to create DBus proxy for peer watch: {e}");
            return;
        }
    };
    let mut stream = match dbus
        .receive_name_owner_changed_with_args(&[(0, peer.as_str())])
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to watch peer {peer}: {e}");
            return;
        }
    };

    debug!("Watching bus peer {peer}");
    while let Some(signal) = stream.next().await {
        let Ok(args) = signal.args() else { continue };
        if args.new_owner().is_none() {
            let _ = msg_tx.send(ManagerMsg::PeerVanished { peer: peer.clone() });
            return;
        }
    }
}

/// Pump manager notifications onto the bus until the manager goes
/// away.
pub async fn run_notification_pump(
    connection: Connection,
    mut notify_rx: mpsc::UnboundedReceiver<ManagerEvent>,
    msg_tx: mpsc::UnboundedSender<ManagerMsg>,
) {
    let iface_ref = match connection
        .object_server()
        .interface::<_, FeedbackInterface>(OBJECT_PATH)
        .await
    {
        Ok(iface) => iface,
        Err(e) => {
            warn!("Feedback interface not served: {e}");
            return;
        }
    };

    let mut peer_watches: HashMap<String, AbortHandle> = HashMap::new();

    while let Some(event) = notify_rx.recv().await {
        match event {
            ManagerEvent::FeedbackEnded { id, reason } => {
                debug!("Emitting FeedbackEnded({id}, {reason:?})");
                if let Err(e) =
                    FeedbackInterface::feedback_ended(iface_ref.signal_emitter(), id, reason.as_u32())
                        .await
                {
                    warn!("Failed to emit FeedbackEnded: {e}");
                }
            }
            ManagerEvent::ProfileChanged { .. } => {
                let iface = iface_ref.get().await;
                if let Err(e) = iface.profile_changed(iface_ref.signal_emitter()).await {
                    warn!("Failed to notify profile change: {e}");
                }
            }
            ManagerEvent::WatchPeer { peer } => {
                let task = tokio::spawn(watch_peer(
                    connection.clone(),
                    peer.clone(),
                    msg_tx.clone(),
                ));
                if let Some(old) = peer_watches.insert(peer, task.abort_handle()) {
                    old.abort();
                }
            }
            ManagerEvent::UnwatchPeer { peer } => {
                if let Some(task) = peer_watches.remove(&peer) {
                    task.abort();
                }
            }
        }
    }

    for task in peer_watches.into_values() {
        task.abort();
    }
}
