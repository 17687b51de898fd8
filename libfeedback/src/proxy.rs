//! Bus proxy for `org.sigxcpu.Feedback`.

use std::collections::HashMap;

use zbus::zvariant::Value;

#[zbus::proxy(
    interface = "org.sigxcpu.Feedback",
    default_service = "org.sigxcpu.Feedback",
    default_path = "/org/sigxcpu/Feedback"
)]
pub trait Feedback {
    /// Trigger feedback for an event; returns the event id.
    fn trigger_feedback(
        &self,
        app_id: &str,
        event: &str,
        hints: HashMap<&str, Value<'_>>,
        timeout: i32,
    ) -> zbus::Result<u32>;

    /// End the feedbacks of an event ahead of time.
    fn end_feedback(&self, id: u32) -> zbus::Result<()>;

    /// Emitted exactly once when all feedbacks of an event ended.
    #[zbus(signal)]
    fn feedback_ended(&self, id: u32, reason: u32) -> zbus::Result<()>;

    /// The daemon's active feedback profile.
    #[zbus(property)]
    fn profile(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn set_profile(&self, profile: &str) -> zbus::Result<()>;
}
