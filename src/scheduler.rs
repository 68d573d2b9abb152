//! Debounced auto-save timer with a display countdown.
//!
//! One spawned task drives both the single-shot timer and the 1 Hz tick, so
//! aborting its handle always cancels the pair together.

use crate::config::CanvasConfig;
use std::future::Future;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep_until};
use tracing::{debug, warn};

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoSaveState {
    Idle,
    Armed { remaining: u32 },
    Flushing,
}

enum Phase {
    Idle,
    Armed(JoinHandle<()>),
    Flushing,
}

struct Slot {
    generation: u64,
    phase: Phase,
}

pub struct AutoSaveScheduler {
    delay: Duration,
    tick: Duration,
    countdown_start: u32,
    slot: Arc<Mutex<Slot>>,
    countdown: Arc<watch::Sender<Option<u32>>>,
}

impl AutoSaveScheduler {
    pub fn new(config: &CanvasConfig) -> Self {
        let (countdown, _) = watch::channel(None);
        Self {
            delay: config.auto_save_delay,
            tick: config.countdown_tick,
            countdown_start: config.countdown_start(),
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                phase: Phase::Idle,
            })),
            countdown: Arc::new(countdown),
        }
    }

    /// Cancel whatever is pending and start a fresh quiet period. `on_fire`
    /// runs once the period elapses without another `arm` or `cancel`.
    ///
    /// A flush that is already running is not interrupted.
    pub fn arm<F, Fut>(&self, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Phase::Armed(handle) = mem::replace(&mut slot.phase, Phase::Idle) {
            handle.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;
        self.countdown.send_replace(Some(self.countdown_start));

        let delay = self.delay;
        let tick = self.tick;
        let shared = Arc::clone(&self.slot);
        let countdown = Arc::clone(&self.countdown);

        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let deadline = sleep_until(start + delay);
            tokio::pin!(deadline);
            let mut ticker = interval_at(start + tick, tick);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut deadline => break,
                    _ = ticker.tick() => {
                        countdown.send_modify(|value| {
                            if let Some(remaining) = value {
                                *remaining = remaining.saturating_sub(1);
                            }
                        });
                    }
                }
            }

            {
                let mut slot = match shared.lock() {
                    Ok(slot) => slot,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if slot.generation != generation {
                    return;
                }
                slot.phase = Phase::Flushing;
                countdown.send_replace(None);
            }
            debug!(generation, "auto-save timer fired");

            on_fire().await;

            let mut slot = match shared.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            if slot.generation == generation && matches!(slot.phase, Phase::Flushing) {
                slot.phase = Phase::Idle;
            }
        });

        slot.phase = Phase::Armed(handle);
        debug!(generation, "auto-save armed");
    }

    /// Drop a pending timer and its tick without firing. Returns whether
    /// anything was pending.
    pub fn cancel(&self) -> bool {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => {
                warn!("auto-save scheduler lock was poisoned");
                poisoned.into_inner()
            }
        };
        let Phase::Armed(handle) = mem::replace(&mut slot.phase, Phase::Idle) else {
            return false;
        };
        handle.abort();
        slot.generation += 1;
        self.countdown.send_replace(None);
        debug!("auto-save cancelled");
        true
    }

    pub fn state(&self) -> AutoSaveState {
        let slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot.phase {
            Phase::Idle => AutoSaveState::Idle,
            Phase::Flushing => AutoSaveState::Flushing,
            Phase::Armed(_) => AutoSaveState::Armed {
                remaining: (*self.countdown.borrow()).unwrap_or(0),
            },
        }
    }

    /// Seconds left on the visible countdown, `None` when nothing is pending.
    pub fn countdown(&self) -> Option<u32> {
        *self.countdown.borrow()
    }

    pub fn subscribe_countdown(&self) -> watch::Receiver<Option<u32>> {
        self.countdown.subscribe()
    }
}

impl Drop for AutoSaveScheduler {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock()
            && let Phase::Armed(handle) = mem::replace(&mut slot.phase, Phase::Idle)
        {
            handle.abort();
        }
    }
}
