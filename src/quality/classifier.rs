use super::rules::{evaluate, QualityStage};
use super::stats::WindowStats;
use crate::reading::TimestampedSample;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

/// Default classifier history
pub const DEFAULT_QUALITY_WINDOW: Duration = Duration::from_secs(30);

/// Readings scoring below this are treated as noise
pub const NOISE_THRESHOLD: f64 = 0.5;

/// Outcome of classifying one reading against the recent window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub quality: f64,
    pub confidence: f64,
    pub stage: QualityStage,
    pub is_noise: bool,
    pub entropy: f64,
    pub noise_band_density: f64,
    pub reason: String,
}

impl QualityVerdict {
    fn insufficient(sample_count: usize) -> Self {
        Self {
            quality: 0.5,
            confidence: 0.0,
            stage: QualityStage::Insufficient,
            is_noise: false,
            entropy: 0.0,
            noise_band_density: 0.0,
            reason: format!("insufficient data ({} samples)", sample_count),
        }
    }

    /// Verdict used when classification is switched off
    pub fn unchecked() -> Self {
        Self {
            reason: "quality classification disabled".to_string(),
            ..Self::insufficient(0)
        }
    }
}

/// Scores each incoming heart-rate value for the likelihood that it is noise
///
/// Keeps a time-bounded window of samples; every verdict is computed over
/// the window including the new sample. Noisy samples stay in the window.
#[derive(Debug)]
pub struct SignalQualityClassifier {
    window: Duration,
    samples: VecDeque<TimestampedSample>,
}

impl SignalQualityClassifier {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_QUALITY_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::with_capacity(64),
        }
    }

    /// Add a reading and classify it
    pub fn add_reading(&mut self, heart_rate: i32, now: Instant) -> QualityVerdict {
        self.samples.push_back(TimestampedSample::new(heart_rate, now));
        self.evict(now);

        let stage = QualityStage::for_sample_count(self.samples.len());
        if stage == QualityStage::Insufficient {
            return QualityVerdict::insufficient(self.samples.len());
        }

        let values: Vec<f64> = self.samples.iter().map(|s| f64::from(s.value)).collect();
        let window_stats = WindowStats::compute(&values);
        self.verdict(stage, &window_stats)
    }

    fn verdict(&self, stage: QualityStage, window_stats: &WindowStats) -> QualityVerdict {
        let (reason, score) = match evaluate(stage.rules(), window_stats) {
            Some((rule, score)) => (rule.reason, score),
            None => return QualityVerdict::insufficient(window_stats.count),
        };

        let quality = score.quality.clamp(0.0, 1.0);
        trace!(
            stage = stage.as_str(),
            quality,
            entropy = window_stats.entropy,
            density = window_stats.noise_band_density,
            "Quality rule matched: {}",
            reason
        );

        QualityVerdict {
            quality,
            confidence: score.confidence.clamp(0.0, 1.0),
            stage,
            is_noise: quality < NOISE_THRESHOLD,
            entropy: window_stats.entropy,
            noise_band_density: window_stats.noise_band_density,
            reason: reason.to_string(),
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if front.is_older_than(self.window, now) {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drop all history
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Summary of the current window, if it holds any samples
    pub fn window_stats(&self) -> Option<WindowStats> {
        if self.samples.is_empty() {
            return None;
        }
        let values: Vec<f64> = self.samples.iter().map(|s| f64::from(s.value)).collect();
        Some(WindowStats::compute(&values))
    }
}

impl Default for SignalQualityClassifier {
    fn default() -> Self {
        Self::new()
    }
}
