use crate::{Event, Stage};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Two-stage silence timer: a check-in after a long stretch without speech,
/// then a hang-up if the check-in also goes unanswered.
///
/// Fires are delivered as [`Event::Inactivity`] tagged with the epoch they
/// were armed in. Every re-arm or disarm starts a new epoch, so a fire that
/// raced with a reset is recognized by [`InactivityWatchdog::accept`] and
/// dropped.
pub struct InactivityWatchdog {
    check_in_after: Duration,
    hang_up_after: Duration,
    events: mpsc::UnboundedSender<Event>,
    epoch: u64,
    stage: Option<Stage>,
    timer: Option<JoinHandle<()>>,
}

impl InactivityWatchdog {
    pub fn new(
        check_in_after: Duration,
        hang_up_after: Duration,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            check_in_after,
            hang_up_after,
            events,
            epoch: 0,
            stage: None,
            timer: None,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// Arms the check-in stage unless some stage is already counting.
    pub fn ensure_armed(&mut self) {
        if self.stage.is_none() {
            self.arm(Stage::CheckIn);
        }
    }

    /// Speech was detected: restart the check-in countdown from zero.
    pub fn record_activity(&mut self) {
        self.arm(Stage::CheckIn);
    }

    /// The check-in was delivered: start the hang-up countdown.
    pub fn escalate(&mut self) {
        self.arm(Stage::HangUp);
    }

    pub fn disarm(&mut self) {
        self.cancel_timer();
        self.epoch += 1;
        self.stage = None;
    }

    /// Whether a fire is still current.
    pub fn accept(&self, epoch: u64, stage: Stage) -> bool {
        epoch == self.epoch && self.stage == Some(stage)
    }

    fn arm(&mut self, stage: Stage) {
        self.cancel_timer();
        self.epoch += 1;
        self.stage = Some(stage);

        let epoch = self.epoch;
        let delay = match stage {
            Stage::CheckIn => self.check_in_after,
            Stage::HangUp => self.hang_up_after,
        };
        let events = self.events.clone();
        tracing::debug!(?stage, epoch, "inactivity watchdog armed for {:?}", delay);
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::Inactivity { epoch, stage });
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for InactivityWatchdog {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
