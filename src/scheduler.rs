use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Invoke an async probe callback at a fixed interval until cancelled.
///
/// The stopped flag is checked at the top of every tick, so once [Scheduled::cancel]
///  returns no further probe runs - even for a tick that was already due.
pub fn schedule<F, Fut>(period: Duration, mut probe: F) -> Scheduled
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let stopped = Arc::new(AtomicBool::new(false));

    let stopped_in_task = stopped.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if stopped_in_task.load(Ordering::Acquire) {
                break;
            }
            probe().await;
        }
    });

    Scheduled { stopped, handle }
}

/// Handle for a scheduled probe loop. Dropping the handle does NOT stop the loop;
///  cancellation is explicit and idempotent.
pub struct Scheduled {
    stopped: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Scheduled {
    pub fn cancel(&self) {
        self.stopped.store(true, Ordering::Release);
        self.handle.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
