use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Running,
    Paused,
    Stopped,
}

/// A fixed-interval loop running on its own task. Dropping the handle leaves
/// the loop running; call `shutdown` to end it.
#[derive(Debug)]
pub struct DriverHandle {
    name: &'static str,
    control: watch::Sender<DriverState>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    pub fn pause(&self) {
        if self.control.send_replace(DriverState::Paused) != DriverState::Paused {
            info!(driver = self.name, "paused");
        }
    }

    pub fn resume(&self) {
        if self.control.send_replace(DriverState::Running) != DriverState::Running {
            info!(driver = self.name, "resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.control.borrow() == DriverState::Paused
    }

    pub async fn shutdown(self) {
        self.control.send_replace(DriverState::Stopped);
        if let Err(e) = self.task.await {
            warn!(driver = self.name, ?e, "driver task ended abnormally");
        }
    }
}

/// Runs `step` every `period` until shut down. Ticks are skipped while the
/// handle is paused or while `blocked` reads true.
pub fn spawn_driver<F, Fut>(
    name: &'static str,
    period: Duration,
    blocked: Option<watch::Receiver<bool>>,
    mut step: F,
) -> DriverHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (control, mut state) = watch::channel(DriverState::Running);

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = state.changed() => {
                    if changed.is_err() || *state.borrow() == DriverState::Stopped {
                        break;
                    }
                    continue;
                }
            }

            match *state.borrow() {
                DriverState::Stopped => break,
                DriverState::Paused => continue,
                DriverState::Running => {}
            }
            if blocked.as_ref().map(|b| *b.borrow()).unwrap_or(false) {
                debug!(driver = name, "blocked, skipping tick");
                continue;
            }

            step().await;
        }

        debug!(driver = name, "stopped");
    });

    info!(driver = name, period_ms = period.as_millis() as u64, "started");
    DriverHandle {
        name,
        control,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    fn counting(period: Duration, blocked: Option<watch::Receiver<bool>>) -> (DriverHandle, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handle = spawn_driver("test", period, blocked, move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        (handle, count)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let period = Duration::from_millis(100);
        let (handle, count) = counting(period, None);

        sleep(period * 3 + Duration::from_millis(50)).await;
        assert!(count.load(Ordering::SeqCst) >= 3);

        handle.shutdown().await;
        let after = count.load(Ordering::SeqCst);
        sleep(period * 3).await;
        assert_eq!(count.load(Ordering::SeqCst), after);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume() {
        let period = Duration::from_millis(100);
        let (handle, count) = counting(period, None);
        sleep(period + Duration::from_millis(50)).await;

        handle.pause();
        assert!(handle.is_paused());
        let before = count.load(Ordering::SeqCst);
        sleep(period * 5).await;
        assert_eq!(count.load(Ordering::SeqCst), before);

        handle.resume();
        sleep(period * 2 + Duration::from_millis(50)).await;
        assert!(count.load(Ordering::SeqCst) > before);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_flag_skips_ticks() {
        let period = Duration::from_millis(100);
        let (block, blocked) = watch::channel(true);
        let (handle, count) = counting(period, Some(blocked));

        sleep(period * 4).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        block.send_replace(false);
        sleep(period * 2 + Duration::from_millis(50)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
        handle.shutdown().await;
    }
}
