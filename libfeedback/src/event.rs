//! Event objects triggering feedback on the daemon.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::debug;
use zbus::zvariant::Value;

use crate::{Error, Lfb, Result};

/// Why feedback for an event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventEndReason {
    /// No feedback was configured for the event.
    NotFound,
    /// All feedbacks ran to completion.
    Natural,
    /// The event timeout expired.
    Expired,
    /// Feedback was ended explicitly.
    Explicit,
}

impl EventEndReason {
    pub fn from_wire(reason: u32) -> Self {
        match reason as i32 {
            -1 => EventEndReason::NotFound,
            1 => EventEndReason::Expired,
            2 => EventEndReason::Explicit,
            _ => EventEndReason::Natural,
        }
    }
}

/// Lifecycle of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventState {
    #[default]
    None,
    Running,
    Ended,
    Errored,
}

/// An event that triggers feedback, identified by a name from the
/// event naming spec (e.g. `message-new-instant`).
#[derive(Debug, Clone)]
pub struct Event {
    event: String,
    timeout: i32,
    profile: Option<String>,
    id: Option<u32>,
    state: EventState,
    end_reason: Option<EventEndReason>,
}

impl Event {
    /// A oneshot event for `event`.
    pub fn new(event: &str) -> Self {
        Self {
            event: event.to_string(),
            timeout: -1,
            profile: None,
            id: None,
            state: EventState::None,
            end_reason: None,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// `-1`: play each feedback once; `0`: loop until ended; `> 0`:
    /// loop for that many seconds.
    pub fn set_timeout(&mut self, timeout: i32) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> i32 {
        self.timeout
    }

    /// Cap the feedback level for this event (e.g. `"quiet"`).
    pub fn set_feedback_profile(&mut self, profile: Option<&str>) {
        self.profile = profile.map(str::to_string);
    }

    pub fn feedback_profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn end_reason(&self) -> Option<EventEndReason> {
        self.end_reason
    }

    /// The daemon-assigned id, once triggered.
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    fn hints(&self) -> HashMap<&str, Value<'_>> {
        let mut hints = HashMap::new();
        if let Some(profile) = &self.profile {
            hints.insert("profile", Value::from(profile.as_str()));
        }
        hints
    }

    /// Trigger the feedbacks for this event.
    pub async fn trigger_feedback(&mut self, lfb: &Lfb) -> Result<u32> {
        let result = lfb
            .proxy()
            .trigger_feedback(lfb.app_id(), &self.event, self.hints(), self.timeout)
            .await;

        match result {
            Ok(id) => {
                debug!("Event '{}' running as id {id}", self.event);
                self.id = Some(id);
                self.state = EventState::Running;
                self.end_reason = None;
                lfb.track_id(id);
                Ok(id)
            }
            Err(e) => {
                self.state = EventState::Errored;
                Err(e.into())
            }
        }
    }

    /// End the feedbacks of this event ahead of time.
    pub async fn end_feedback(&mut self, lfb: &Lfb) -> Result<()> {
        let Some(id) = self.id else {
            return Err(Error::InvalidArgs("Event was never triggered".to_string()));
        };
        lfb.proxy().end_feedback(id).await?;
        Ok(())
    }

    /// Wait for the daemon to report the end of this event's
    /// feedbacks and update the local state.
    pub async fn wait_feedback_ended(&mut self, lfb: &Lfb) -> Result<EventEndReason> {
        let Some(id) = self.id else {
            return Err(Error::InvalidArgs("Event was never triggered".to_string()));
        };

        // Subscribe first, then drain the backlog, so the end can't
        // slip between the two.
        let mut rx = lfb.subscribe_ended();
        let reason = match lfb.take_ended(id) {
            Some(reason) => reason,
            None => loop {
                match rx.recv().await {
                    Ok((ended_id, reason)) if ended_id == id => break reason,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(reason) = lfb.take_ended(id) {
                            break reason;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::InvalidArgs(
                            "Feedback context was shut down".to_string(),
                        ))
                    }
                }
            },
        };

        debug!("Feedback for event {id} ended: {reason:?}");
        self.state = EventState::Ended;
        self.end_reason = Some(reason);
        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_reason_from_wire() {
        assert_eq!(EventEndReason::from_wire(u32::MAX), EventEndReason::NotFound);
        assert_eq!(EventEndReason::from_wire(0), EventEndReason::Natural);
        assert_eq!(EventEndReason::from_wire(1), EventEndReason::Expired);
        assert_eq!(EventEndReason::from_wire(2), EventEndReason::Explicit);
    }

    #[test]
    fn test_event_defaults() {
        let mut event = Event::new("message-new-instant");
        assert_eq!(event.timeout(), -1);
        assert_eq!(event.state(), EventState::None);
        assert!(event.id().is_none());
        assert!(event.hints().is_empty());

        event.set_feedback_profile(Some("quiet"));
        assert_eq!(event.hints().len(), 1);
    }
}
