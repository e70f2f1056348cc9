// Tokio timers for the connection manager

use super::RuntimeEvent;
use crate::connection::{Scheduler, Timer};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// One task per live timer; cancelling aborts the task
pub struct TokioScheduler {
    events: UnboundedSender<RuntimeEvent>,
    timers: HashMap<Timer, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(events: UnboundedSender<RuntimeEvent>) -> Self {
        Self {
            events,
            timers: HashMap::new(),
        }
    }

    pub fn active(&self) -> usize {
        self.timers.values().filter(|h| !h.is_finished()).count()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&mut self, timer: Timer, generation: u64, delay: Duration) {
        self.cancel(timer);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(RuntimeEvent::Timer { timer, generation });
        });
        self.timers.insert(timer, handle);
    }

    fn schedule_repeating(&mut self, timer: Timer, generation: u64, period: Duration) {
        self.cancel(timer);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if events
                    .send(RuntimeEvent::Timer { timer, generation })
                    .is_err()
                {
                    break;
                }
            }
        });
        self.timers.insert(timer, handle);
    }

    fn cancel(&mut self, timer: Timer) {
        if let Some(handle) = self.timers.remove(&timer) {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}
