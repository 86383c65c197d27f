//! Rolling per-frame timing for the render loop.
//!
//! Samples are milliseconds. `wait` is the frame-timing call, `render` covers
//! view location plus every eye's acquire/draw/release, `submit` is end-frame.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub struct FrameTiming {
    wait_ms: VecDeque<f64>,
    render_ms: VecDeque<f64>,
    submit_ms: VecDeque<f64>,
    total_ms: VecDeque<f64>,
    window: usize,
    budget_ms: f64,
    pub total_frames: u64,
    pub missed_frames: u64,
    pub dropped_frames: u64,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new(1000, 11.1)
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn push(samples: &mut VecDeque<f64>, value: f64, window: usize) {
    if samples.len() == window {
        samples.pop_front();
    }
    samples.push_back(value);
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p / 100.0).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn sorted(samples: &VecDeque<f64>) -> Vec<f64> {
    let mut v: Vec<f64> = samples.iter().copied().collect();
    v.sort_by(f64::total_cmp);
    v
}

impl FrameTiming {
    pub fn new(window: usize, budget_ms: f64) -> Self {
        let window = window.max(1);
        Self {
            wait_ms: VecDeque::with_capacity(window),
            render_ms: VecDeque::with_capacity(window),
            submit_ms: VecDeque::with_capacity(window),
            total_ms: VecDeque::with_capacity(window),
            window,
            budget_ms,
            total_frames: 0,
            missed_frames: 0,
            dropped_frames: 0,
        }
    }

    pub fn record(&mut self, wait: Duration, render: Duration, submit: Duration) {
        let (wait, render, submit) = (ms(wait), ms(render), ms(submit));
        let total = wait + render + submit;

        push(&mut self.wait_ms, wait, self.window);
        push(&mut self.render_ms, render, self.window);
        push(&mut self.submit_ms, submit, self.window);
        push(&mut self.total_ms, total, self.window);

        self.total_frames += 1;
        if total > self.budget_ms {
            self.missed_frames += 1;
        }
    }

    /// A frame that was ended with an empty layer list after a failure.
    pub fn record_dropped(&mut self) {
        self.dropped_frames += 1;
    }

    pub fn samples(&self) -> usize {
        self.total_ms.len()
    }

    pub fn stats(&self) -> FrameTimingStats {
        let wait = sorted(&self.wait_ms);
        let render = sorted(&self.render_ms);
        let submit = sorted(&self.submit_ms);
        let total = sorted(&self.total_ms);

        FrameTimingStats {
            wait_p50: percentile(&wait, 50.0),
            render_p50: percentile(&render, 50.0),
            render_p99: percentile(&render, 99.0),
            submit_p50: percentile(&submit, 50.0),
            total_p50: percentile(&total, 50.0),
            total_p99: percentile(&total, 99.0),
            missed_pct: if self.total_frames > 0 {
                self.missed_frames as f64 / self.total_frames as f64 * 100.0
            } else {
                0.0
            },
            total_frames: self.total_frames,
            dropped_frames: self.dropped_frames,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameTimingStats {
    pub wait_p50: f64,
    pub render_p50: f64,
    pub render_p99: f64,
    pub submit_p50: f64,
    pub total_p50: f64,
    pub total_p99: f64,
    pub missed_pct: f64,
    pub total_frames: u64,
    pub dropped_frames: u64,
}

impl fmt::Display for FrameTimingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames={} dropped={} wait_p50={:.2}ms render_p50={:.2}ms render_p99={:.2}ms submit_p50={:.2}ms total_p50={:.2}ms total_p99={:.2}ms missed={:.1}%",
            self.total_frames,
            self.dropped_frames,
            self.wait_p50,
            self.render_p50,
            self.render_p99,
            self.submit_p50,
            self.total_p50,
            self.total_p99,
            self.missed_pct,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: f64) -> Duration {
        Duration::from_secs_f64(v / 1000.0)
    }

    #[test]
    fn empty_stats_are_zero() {
        let stats = FrameTiming::new(10, 11.1).stats();
        assert_eq!(stats.total_frames, 0);
        assert_eq!(stats.total_p50, 0.0);
        assert_eq!(stats.missed_pct, 0.0);
    }

    #[test]
    fn over_budget_frames_are_counted() {
        let mut ft = FrameTiming::new(100, 11.1);
        ft.record(ms(5.0), ms(5.0), ms(2.0));
        ft.record(ms(3.0), ms(3.0), ms(1.0));
        assert_eq!(ft.total_frames, 2);
        assert_eq!(ft.missed_frames, 1);
        assert!((ft.stats().missed_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn window_keeps_latest_samples() {
        let mut ft = FrameTiming::new(5, 11.1);
        for i in 0..10 {
            ft.record(ms(i as f64), ms(1.0), ms(0.5));
        }
        assert_eq!(ft.samples(), 5);
        assert_eq!(ft.total_frames, 10);
        // Oldest kept wait sample is 5ms.
        assert!((ft.stats().wait_p50 - 7.0).abs() < 1e-6);
    }

    #[test]
    fn dropped_frames_show_in_summary() {
        let mut ft = FrameTiming::default();
        ft.record(ms(2.0), ms(3.0), ms(0.5));
        ft.record_dropped();
        let line = ft.stats().to_string();
        assert!(line.contains("frames=1"));
        assert!(line.contains("dropped=1"));
    }
}
