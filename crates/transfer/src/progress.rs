use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Produces the percent reported to callers.
///
/// Within one session generation the reported value never decreases, even
/// when acknowledgements arrive out of order or credit is re-evaluated.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_bytes: u64,
    generation: u32,
    high_water: f64,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            generation: 0,
            high_water: 0.0,
        }
    }

    /// Folds a new observation in and returns the percent to report.
    pub fn observe(&mut self, uploaded_bytes: u64, generation: u32) -> f64 {
        let raw = if self.total_bytes == 0 {
            0.0
        } else {
            (uploaded_bytes.min(self.total_bytes) as f64 / self.total_bytes as f64) * 100.0
        };

        if generation != self.generation {
            self.generation = generation;
            self.high_water = raw;
        } else if raw > self.high_water {
            self.high_water = raw;
        }
        self.high_water
    }

    /// Last reported percent.
    pub fn percent(&self) -> f64 {
        self.high_water
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

// ---------------------------------------------------------------------------
// ThroughputMeter
// ---------------------------------------------------------------------------

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Transfer rate over a sliding window of samples.
pub struct ThroughputMeter {
    samples: VecDeque<Sample>,
    max_samples: usize,
    window: Duration,
}

impl ThroughputMeter {
    /// `window` defaults to 5 s and `max_samples` to 100.
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.unwrap_or(100),
            window: window.unwrap_or(Duration::from_secs(5)),
        }
    }

    /// Records `bytes` transferred now.
    pub fn record(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back(Sample { bytes, at: now });

        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average rate within the window; 0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        // The first sample marks the start of the window; its bytes were
        // transferred before it.
        let bytes: u64 = self.samples.iter().skip(1).map(|s| s.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Time to move `remaining_bytes` at the current rate.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(None, None)
    }
}
