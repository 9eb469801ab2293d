use std::collections::HashMap;
use tokio::task::JoinHandle;

/// Minimum one-shot delay; shorter requests are stretched to this.
pub const MIN_TIMER_DELAY_MS: u64 = 120;

/// Keys for the per-room one-shot timers. At most one timer is armed per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Question,
    Reveal,
    TeamReveal,
    CaptainVote,
    CaptainAuto,
    TeamNaming,
    HostReconnect,
}

impl TimerKey {
    pub const ALL: [TimerKey; 7] = [
        TimerKey::Question,
        TimerKey::Reveal,
        TimerKey::TeamReveal,
        TimerKey::CaptainVote,
        TimerKey::CaptainAuto,
        TimerKey::TeamNaming,
        TimerKey::HostReconnect,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TimerKey::Question => "question",
            TimerKey::Reveal => "reveal",
            TimerKey::TeamReveal => "teamReveal",
            TimerKey::CaptainVote => "captainVote",
            TimerKey::CaptainAuto => "captainAuto",
            TimerKey::TeamNaming => "teamNaming",
            TimerKey::HostReconnect => "hostReconnect",
        }
    }
}

/// What a fired timer does once it has re-acquired the room mutex.
///
/// Each action re-checks the room phase before mutating; a timer that
/// outlived its phase is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    FinalizeQuestion,
    AdvanceAfterReveal,
    AfterTeamReveal,
    FinalizeCaptainVote,
    AutoCaptain,
    FinalizeTeamNaming,
    HostReconnectTimeout,
}

/// Handles for the armed timers of one room.
///
/// Arming a key aborts any previous task under that key, so a cancelled
/// timer can never fire.
#[derive(Debug, Default)]
pub struct TimerSet {
    handles: HashMap<TimerKey, JoinHandle<()>>,
}

impl TimerSet {
    /// Replace the timer under `key` with a freshly spawned task.
    pub fn arm(&mut self, key: TimerKey, handle: JoinHandle<()>) {
        self.cancel(key);
        self.handles.insert(key, handle);
    }

    /// Remove the handle under `key` without aborting. Used by a fired timer
    /// task to deregister itself before running its action.
    pub fn take(&mut self, key: TimerKey) -> Option<JoinHandle<()>> {
        self.handles.remove(&key)
    }

    /// Abort the timer under `key`. Returns whether one was armed.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        match self.handles.remove(&key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&mut self) {
        for key in TimerKey::ALL {
            self.cancel(key);
        }
    }

    /// Whether a (possibly already completed) task is registered for `key`.
    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.handles
            .get(&key)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn armed_count(&self) -> usize {
        self.handles
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn arming_twice_cancels_the_first_task() {
        let mut timers = TimerSet::default();
        let first = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        timers.arm(TimerKey::Question, first);
        let second = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        timers.arm(TimerKey::Question, second);

        assert_eq!(timers.armed_count(), 1);
        assert!(timers.is_armed(TimerKey::Question));
    }

    #[tokio::test]
    async fn cancel_reports_whether_a_timer_existed() {
        let mut timers = TimerSet::default();
        assert!(!timers.cancel(TimerKey::Reveal));
        timers.arm(
            TimerKey::Reveal,
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }),
        );
        assert!(timers.cancel(TimerKey::Reveal));
        assert!(!timers.is_armed(TimerKey::Reveal));
    }

    #[tokio::test]
    async fn cancelled_timer_never_runs() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
        let mut timers = TimerSet::default();
        timers.arm(
            TimerKey::Question,
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                let _ = tx.send(()).await;
            }),
        );
        timers.cancel(TimerKey::Question);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }
}
