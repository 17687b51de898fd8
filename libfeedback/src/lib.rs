//! Client library for the feedbackd daemon.
//!
//! Create a context with [`Lfb::init`], trigger feedback through
//! [`Event`] objects and call [`Lfb::uninit`] on shutdown so
//! feedbacks the application forgot about get cancelled:
//!
//! ```no_run
//! # async fn example() -> libfeedback::Result<()> {
//! let lfb = libfeedback::Lfb::init("com.example.App").await?;
//!
//! let mut event = libfeedback::Event::new("message-new-instant");
//! event.trigger_feedback(&lfb).await?;
//!
//! lfb.uninit().await;
//! # Ok(())
//! # }
//! ```

mod event;
mod proxy;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub use event::{Event, EventEndReason, EventState};
pub use proxy::FeedbackProxy;

/// Client-side errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgs(String),

    #[error("Bus error: {0}")]
    Bus(#[from] zbus::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// `FeedbackEnded` signals already seen, kept until a waiter picks
/// them up. Bounded since the session bus broadcasts every client's
/// events to us.
const ENDED_BACKLOG: usize = 64;

struct Dispatch {
    /// End reasons by event id, for waiters that subscribe late.
    ended: Mutex<HashMap<u32, EventEndReason>>,
    ended_tx: broadcast::Sender<(u32, EventEndReason)>,
}

impl Dispatch {
    fn record(&self, id: u32, reason: EventEndReason) {
        let mut ended = self.ended.lock().unwrap();
        if ended.len() >= ENDED_BACKLOG {
            // Ids are monotonic; the oldest entry is the smallest id
            if let Some(oldest) = ended.keys().min().copied() {
                ended.remove(&oldest);
            }
        }
        ended.insert(id, reason);
        drop(ended);
        let _ = self.ended_tx.send((id, reason));
    }

    fn take(&self, id: u32) -> Option<EventEndReason> {
        self.ended.lock().unwrap().remove(&id)
    }
}

/// Library context: the daemon proxy, the application id and the set
/// of event ids that are still running.
pub struct Lfb {
    proxy: FeedbackProxy<'static>,
    app_id: String,
    active_ids: Arc<Mutex<HashSet<u32>>>,
    dispatch: Arc<Dispatch>,
    listener: tokio::task::AbortHandle,
}

impl Lfb {
    /// Connect to the feedback daemon on the session bus. `app_id` is
    /// usually the desktop file name without the `.desktop` suffix.
    pub async fn init(app_id: &str) -> Result<Self> {
        if app_id.is_empty() {
            return Err(Error::InvalidArgs("app_id must not be empty".to_string()));
        }
        let connection = zbus::Connection::session().await?;
        Self::init_with_connection(app_id, connection).await
    }

    /// Like [`Lfb::init`] but reusing an existing bus connection.
    pub async fn init_with_connection(
        app_id: &str,
        connection: zbus::Connection,
    ) -> Result<Self> {
        let proxy = FeedbackProxy::new(&connection).await?;

        // Subscribe once and fan signals out to waiting events. The
        // subscription exists before any trigger, so an event ending
        // faster than the method reply can't be missed.
        let mut stream = proxy.receive_feedback_ended().await?;
        let (ended_tx, _) = broadcast::channel(ENDED_BACKLOG);
        let dispatch = Arc::new(Dispatch {
            ended: Mutex::new(HashMap::new()),
            ended_tx,
        });
        let active_ids = Arc::new(Mutex::new(HashSet::new()));

        let listener = {
            let dispatch = Arc::clone(&dispatch);
            let active_ids = Arc::clone(&active_ids);
            tokio::spawn(async move {
                while let Some(signal) = stream.next().await {
                    let Ok(args) = signal.args() else { continue };
                    let id = *args.id();
                    let reason = EventEndReason::from_wire(*args.reason());
                    debug!("Feedback for event {id} ended: {reason:?}");
                    active_ids.lock().unwrap().remove(&id);
                    dispatch.record(id, reason);
                }
            })
            .abort_handle()
        };

        Ok(Self {
            proxy,
            app_id: app_id.to_string(),
            active_ids,
            dispatch,
            listener,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The low-level proxy, e.g. for listening to property changes.
    pub fn proxy(&self) -> &FeedbackProxy<'static> {
        &self.proxy
    }

    /// The daemon's current feedback profile.
    pub async fn feedback_profile(&self) -> Result<String> {
        Ok(self.proxy.profile().await?)
    }

    /// Ask the daemon to switch profiles. The daemon may reject the
    /// request; watch the `Profile` property to see it take effect.
    pub async fn set_feedback_profile(&self, profile: &str) -> Result<()> {
        Ok(self.proxy.set_profile(profile).await?)
    }

    pub(crate) fn track_id(&self, id: u32) {
        self.active_ids.lock().unwrap().insert(id);
    }

    pub(crate) fn subscribe_ended(&self) -> broadcast::Receiver<(u32, EventEndReason)> {
        self.dispatch.ended_tx.subscribe()
    }

    pub(crate) fn take_ended(&self, id: u32) -> Option<EventEndReason> {
        self.dispatch.take(id)
    }

    /// Tear the context down, cancelling any feedback the application
    /// left running.
    pub async fn uninit(self) {
        self.listener.abort();
        let leftover: Vec<u32> = {
            let mut ids = self.active_ids.lock().unwrap();
            ids.drain().collect()
        };
        for id in leftover {
            debug!("Cancelling feedback on shutdown {id}");
            if let Err(e) = self.proxy.end_feedback(id).await {
                warn!("Failed to end feedback {id}: {e}");
            }
        }
    }
}
