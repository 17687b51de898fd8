//! A triggered event and its feedbacks.
//!
//! The event owns the running feedback instances and aggregates their
//! completions according to its timeout mode:
//!
//! * `-1`: oneshot, done when every feedback finished once
//! * `0`: loop, feedbacks re-run until explicitly ended
//! * `>0`: loop until the timeout expires (seconds)

use tokio::task::AbortHandle;
use tracing::debug;

use crate::feedback::{DoneHandle, DoneTx, FeedbackInstance};

pub const EVENT_TIMEOUT_ONESHOT: i32 = -1;
pub const EVENT_TIMEOUT_LOOP: i32 = 0;

/// Why feedback for an event ended, as reported over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// No feedback was found for the event.
    NotFound,
    /// All feedbacks ran to completion.
    Natural,
    /// The event timeout expired.
    Expired,
    /// The client (or its disappearance) ended the event.
    Explicit,
}

impl EndReason {
    /// Wire encoding: `NotFound` is -1 reinterpreted as u32.
    pub fn as_u32(self) -> u32 {
        match self {
            EndReason::NotFound => (-1i32) as u32,
            EndReason::Natural => 0,
            EndReason::Expired => 1,
            EndReason::Explicit => 2,
        }
    }
}

/// Outcome of processing one feedback completion.
#[derive(Debug, PartialEq, Eq)]
pub enum EventProgress {
    /// Still running (or the completion was stale).
    Pending,
    /// All feedbacks ended; the event is done.
    Finished(EndReason),
}

pub struct Event {
    id: u32,
    app_id: String,
    event_name: String,
    sender: Option<String>,
    timeout: i32,
    expired: bool,
    end_reason: EndReason,
    feedbacks: Vec<FeedbackInstance>,
    done_tx: DoneTx,
    timeout_task: Option<AbortHandle>,
}

impl Event {
    pub fn new(
        id: u32,
        app_id: &str,
        event_name: &str,
        sender: Option<String>,
        timeout: i32,
        done_tx: DoneTx,
    ) -> Self {
        Self {
            id,
            app_id: app_id.to_string(),
            event_name: event_name.to_string(),
            sender,
            timeout,
            expired: false,
            end_reason: EndReason::Natural,
            feedbacks: Vec::new(),
            done_tx,
            timeout_task: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn timeout(&self) -> i32 {
        self.timeout
    }

    pub fn end_reason(&self) -> EndReason {
        self.end_reason
    }

    pub fn add_feedback(&mut self, feedback: FeedbackInstance) {
        self.feedbacks.push(feedback);
    }

    pub fn has_feedbacks(&self) -> bool {
        !self.feedbacks.is_empty()
    }

    /// The expiry timer is armed by the manager; its handle lives here
    /// so it dies with the event.
    pub fn set_timeout_task(&mut self, task: AbortHandle) {
        self.timeout_task = Some(task);
    }

    fn done_handle(&self, index: usize) -> DoneHandle {
        DoneHandle::new(self.id, index, self.done_tx.clone())
    }

    /// Start all feedbacks in insertion order.
    pub fn run_feedbacks(&mut self) {
        debug!("Running {} feedbacks for event {}", self.feedbacks.len(), self.id);
        for index in 0..self.feedbacks.len() {
            let done = self.done_handle(index);
            self.feedbacks[index].run(done);
        }
    }

    /// End all feedbacks as early as possible.
    pub fn end_feedbacks(&mut self) {
        self.end_reason = EndReason::Explicit;
        debug!("Ending {} feedbacks for event {}", self.feedbacks.len(), self.id);
        for index in 0..self.feedbacks.len() {
            let done = self.done_handle(index);
            self.feedbacks[index].end(done);
        }
    }

    /// Timeout fired: no more re-runs; running feedbacks finish on
    /// their own.
    pub fn expire(&mut self) {
        debug!("Event {} expired", self.id);
        self.expired = true;
        if self.end_reason == EndReason::Natural {
            self.end_reason = EndReason::Expired;
        }
    }

    pub fn expired(&self) -> bool {
        self.expired
    }

    pub fn feedbacks_ended(&self) -> bool {
        self.feedbacks.iter().all(|fb| fb.ended())
    }

    fn check_ended(&self) -> EventProgress {
        if self.feedbacks_ended() {
            EventProgress::Finished(self.end_reason)
        } else {
            EventProgress::Pending
        }
    }

    /// Process one feedback completion and decide how to proceed.
    pub fn on_feedback_ended(&mut self, index: usize) -> EventProgress {
        let Some(feedback) = self.feedbacks.get_mut(index) else {
            return EventProgress::Pending;
        };
        if !feedback.mark_ended() {
            // Stale completion from a cancelled run
            return EventProgress::Pending;
        }

        match self.timeout {
            EVENT_TIMEOUT_ONESHOT => self.check_ended(),
            EVENT_TIMEOUT_LOOP => {
                if self.end_reason != EndReason::Natural {
                    self.check_ended()
                } else {
                    let done = self.done_handle(index);
                    self.feedbacks[index].run(done);
                    EventProgress::Pending
                }
            }
            _ => {
                if !self.expired && self.end_reason == EndReason::Natural {
                    let done = self.done_handle(index);
                    self.feedbacks[index].run(done);
                    EventProgress::Pending
                } else {
                    self.check_ended()
                }
            }
        }
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{
        Completion, DeviceRefs, DummyFeedback, FeedbackConfig, FeedbackInstance,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn dummy_instance(duration: u32) -> FeedbackInstance {
        FeedbackInstance::new(
            Arc::new(FeedbackConfig::Dummy(DummyFeedback {
                event_name: "test-event".to_string(),
                duration,
            })),
            DeviceRefs::default(),
        )
    }

    fn event_with_dummies(timeout: i32, durations: &[u32]) -> (Event, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut event = Event::new(1, "org.example.test", "test-event", None, timeout, tx);
        for duration in durations {
            event.add_feedback(dummy_instance(*duration));
        }
        (event, rx)
    }

    #[test]
    fn test_end_reason_wire_encoding() {
        assert_eq!(EndReason::NotFound.as_u32(), u32::MAX);
        assert_eq!(EndReason::Natural.as_u32(), 0);
        assert_eq!(EndReason::Expired.as_u32(), 1);
        assert_eq!(EndReason::Explicit.as_u32(), 2);
    }

    #[tokio::test]
    async fn test_oneshot_ends_after_all_feedbacks() {
        let (mut event, mut rx) = event_with_dummies(EVENT_TIMEOUT_ONESHOT, &[0, 10]);
        event.run_feedbacks();

        let first = rx.recv().await.unwrap();
        assert_eq!(event.on_feedback_ended(first.index), EventProgress::Pending);

        let second = rx.recv().await.unwrap();
        assert_eq!(
            event.on_feedback_ended(second.index),
            EventProgress::Finished(EndReason::Natural)
        );
    }

    #[tokio::test]
    async fn test_loop_reruns_until_explicit_end() {
        let (mut event, mut rx) = event_with_dummies(EVENT_TIMEOUT_LOOP, &[5]);
        event.run_feedbacks();

        // A few natural completions: each one re-runs the feedback
        for _ in 0..3 {
            let done = rx.recv().await.unwrap();
            assert_eq!(event.on_feedback_ended(done.index), EventProgress::Pending);
        }

        event.end_feedbacks();
        // Drain until the explicit completion lands
        loop {
            let done = rx.recv().await.unwrap();
            match event.on_feedback_ended(done.index) {
                EventProgress::Pending => continue,
                EventProgress::Finished(reason) => {
                    assert_eq!(reason, EndReason::Explicit);
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_timeout_mode_reruns_then_expires() {
        let (mut event, mut rx) = event_with_dummies(1, &[5]);
        event.run_feedbacks();

        let done = rx.recv().await.unwrap();
        assert_eq!(event.on_feedback_ended(done.index), EventProgress::Pending);

        event.expire();
        let done = rx.recv().await.unwrap();
        assert_eq!(
            event.on_feedback_ended(done.index),
            EventProgress::Finished(EndReason::Expired)
        );
    }

    #[tokio::test]
    async fn test_explicit_end_wins_over_expiry() {
        let (mut event, mut rx) = event_with_dummies(1, &[50]);
        event.run_feedbacks();
        event.end_feedbacks();
        event.expire();

        let done = rx.recv().await.unwrap();
        assert_eq!(
            event.on_feedback_ended(done.index),
            EventProgress::Finished(EndReason::Explicit)
        );
    }

    #[tokio::test]
    async fn test_stale_completion_ignored() {
        let (mut event, mut rx) = event_with_dummies(EVENT_TIMEOUT_ONESHOT, &[0]);
        event.run_feedbacks();
        event.end_feedbacks();

        // run + end both produced a completion; the first finishes the
        // event, the second must be ignored
        let first = rx.recv().await.unwrap();
        let progress = event.on_feedback_ended(first.index);
        assert!(matches!(progress, EventProgress::Finished(_)));

        if let Ok(stale) = rx.try_recv() {
            assert_eq!(event.on_feedback_ended(stale.index), EventProgress::Pending);
        }
        assert!(event.feedbacks_ended());
    }

    #[tokio::test]
    async fn test_dummy_timer_actually_waits() {
        let (mut event, mut rx) = event_with_dummies(EVENT_TIMEOUT_ONESHOT, &[30]);
        let started = std::time::Instant::now();
        event.run_feedbacks();

        let done = rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert_eq!(
            event.on_feedback_ended(done.index),
            EventProgress::Finished(EndReason::Natural)
        );
    }

    #[test]
    fn test_empty_event_counts_as_ended() {
        let (event, _rx) = event_with_dummies(EVENT_TIMEOUT_ONESHOT, &[]);
        assert!(event.feedbacks_ended());
        assert!(!event.has_feedbacks());
    }
}
