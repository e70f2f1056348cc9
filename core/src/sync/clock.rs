// Clock sync: estimate the server clock from request/response round trips
//
// Each response yields one sample. Offset is the median of the last few
// samples so a single slow round trip does not drag the estimate; RTT is
// their mean.

use crate::protocol::ClientMessage;
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub offset_ms: i64,
    pub rtt_ms: u64,
}

/// Current estimate handed to listeners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockEstimate {
    pub offset_ms: i64,
    pub rtt_ms: f64,
    pub samples: usize,
}

type Listener = Box<dyn Fn(ClockEstimate) + Send>;

pub struct ClockSync {
    window: usize,
    samples: VecDeque<ClockSample>,
    running: bool,
    listeners: Vec<(usize, Listener)>,
    next_listener_id: usize,
}

impl ClockSync {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: VecDeque::with_capacity(window.max(1)),
            running: false,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stop accepting responses. Samples are kept so the last estimate
    /// stays available while offline.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn request(&self, now_ms: u64) -> ClientMessage {
        ClientMessage::ClockSyncRequest {
            client_time: now_ms,
        }
    }

    /// Fold a response into the estimate. Returns the new estimate, or
    /// `None` when the response was ignored.
    pub fn handle_response(
        &mut self,
        local_send_ms: u64,
        server_time_ms: u64,
        now_ms: u64,
    ) -> Option<ClockEstimate> {
        if !self.running {
            debug!("Ignoring clock sync response while stopped");
            return None;
        }
        let rtt = now_ms as i64 - local_send_ms as i64;
        if rtt < 0 {
            debug!("Ignoring clock sync response with negative rtt {}", rtt);
            return None;
        }
        let offset = server_time_ms as i64 - now_ms as i64 + rtt / 2;

        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(ClockSample {
            offset_ms: offset,
            rtt_ms: rtt as u64,
        });

        let estimate = self.estimate()?;
        debug!(
            "Clock sync: offset {}ms, rtt {:.1}ms ({} samples)",
            estimate.offset_ms, estimate.rtt_ms, estimate.samples
        );
        for (_, listener) in &self.listeners {
            listener(estimate);
        }
        Some(estimate)
    }

    pub fn estimate(&self) -> Option<ClockEstimate> {
        if self.samples.is_empty() {
            return None;
        }
        Some(ClockEstimate {
            offset_ms: self.offset_ms(),
            rtt_ms: self.rtt_ms(),
            samples: self.samples.len(),
        })
    }

    /// Median offset, 0 before the first sample
    pub fn offset_ms(&self) -> i64 {
        let mut offsets: Vec<i64> = self.samples.iter().map(|s| s.offset_ms).collect();
        if offsets.is_empty() {
            return 0;
        }
        offsets.sort_unstable();
        let mid = offsets.len() / 2;
        if offsets.len() % 2 == 0 {
            (offsets[mid - 1] + offsets[mid]) / 2
        } else {
            offsets[mid]
        }
    }

    /// Mean round trip, 0 before the first sample
    pub fn rtt_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|s| s.rtt_ms).sum();
        total as f64 / self.samples.len() as f64
    }

    pub fn estimated_server_time(&self, now_ms: u64) -> u64 {
        (now_ms as i64 + self.offset_ms()).max(0) as u64
    }

    pub fn subscribe(&mut self, listener: impl Fn(ClockEstimate) + Send + 'static) -> usize {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: usize) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(i, _)| *i != id);
        self.listeners.len() != before
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
