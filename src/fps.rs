//! Composition frame-rate diagnostics
//!
//! Counts programmed frames and reports the rate once per window.

use log::info;
use std::time::{Duration, Instant};

/// Reporting window
const FPS_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    frames: u64,
    window_start_frames: u64,
    window_start: Option<Instant>,
    fps: f32,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(FPS_WINDOW)
    }
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            frames: 0,
            window_start_frames: 0,
            window_start: None,
            fps: 0.0,
        }
    }

    /// Count one frame; returns the new rate when a window closes
    pub fn frame(&mut self) -> Option<f32> {
        self.frame_at(Instant::now())
    }

    fn frame_at(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;

        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            self.window_start_frames = self.frames;
            return None;
        };

        let elapsed = now.duration_since(start);
        if elapsed <= self.window {
            return None;
        }

        self.fps = (self.frames - self.window_start_frames) as f32 / elapsed.as_secs_f32();
        self.window_start = Some(now);
        self.window_start_frames = self.frames;
        info!("composition fps = {:2.3}", self.fps);
        Some(self.fps)
    }

    /// Rate measured over the last complete window
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}
