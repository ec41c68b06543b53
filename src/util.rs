//! Frame timing statistics

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

/// Rolling window of frame durations
pub struct FrameTimer {
    frame_times: VecDeque<f64>,
    last_frame: Instant,
    sample_count: usize,
}

/// Snapshot of a [`FrameTimer`] window, times in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSummary {
    pub frames: usize,
    pub avg_ms: f64,
    pub avg_fps: f64,
    pub p50_ms: f64,
    pub p99_ms: f64,
    pub std_dev_ms: f64,
}

impl fmt::Display for FrameSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} fps avg ({:.2} ms, p50 {:.2} ms, p99 {:.2} ms, σ {:.2} ms, {} frames)",
            self.avg_fps, self.avg_ms, self.p50_ms, self.p99_ms, self.std_dev_ms, self.frames
        )
    }
}

impl FrameTimer {
    /// Create a timer keeping the last `sample_count` frames
    pub fn new(sample_count: usize) -> Self {
        Self {
            frame_times: VecDeque::with_capacity(sample_count),
            last_frame: Instant::now(),
            sample_count: sample_count.max(1),
        }
    }

    /// Call once per frame. Returns seconds since the previous call.
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f64();
        self.last_frame = now;
        self.record(dt);
        dt
    }

    /// Add a frame duration in seconds
    pub fn record(&mut self, dt: f64) {
        self.frame_times.push_back(dt);
        if self.frame_times.len() > self.sample_count {
            self.frame_times.pop_front();
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_times.len()
    }

    pub fn summary(&self) -> FrameSummary {
        let frames = self.frame_times.len();
        if frames == 0 {
            return FrameSummary {
                frames: 0,
                avg_ms: 0.0,
                avg_fps: 0.0,
                p50_ms: 0.0,
                p99_ms: 0.0,
                std_dev_ms: 0.0,
            };
        }

        let mean = self.frame_times.iter().sum::<f64>() / frames as f64;
        let variance = self
            .frame_times
            .iter()
            .map(|&dt| (dt - mean).powi(2))
            .sum::<f64>()
            / frames as f64;

        let mut sorted: Vec<f64> = self.frame_times.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let p99_idx = ((frames as f64 * 0.99).floor() as usize).min(frames - 1);

        FrameSummary {
            frames,
            avg_ms: mean * 1000.0,
            avg_fps: if mean > 0.0 { 1.0 / mean } else { 0.0 },
            p50_ms: sorted[frames / 2] * 1000.0,
            p99_ms: sorted[p99_idx] * 1000.0,
            std_dev_ms: variance.sqrt() * 1000.0,
        }
    }
}
