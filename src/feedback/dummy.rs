//! Dummy feedback: completes after its duration without touching any
//! hardware.

use std::time::Duration;

use tokio::task::AbortHandle;

use super::{DoneHandle, DummyFeedback};

pub(super) fn run(cfg: &DummyFeedback, tasks: &mut Vec<AbortHandle>, done: DoneHandle) {
    if cfg.duration == 0 {
        done.send();
        return;
    }

    let duration = Duration::from_millis(cfg.duration as u64);
    let task = tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        done.send();
    });
    tasks.push(task.abort_handle());
}
