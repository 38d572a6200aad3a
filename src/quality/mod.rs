mod classifier;
pub mod rules;
pub mod stats;
#[cfg(test)]
mod tests;

pub use classifier::{QualityVerdict, SignalQualityClassifier, DEFAULT_QUALITY_WINDOW, NOISE_THRESHOLD};
pub use rules::{QualityRule, QualityStage, RuleScore};
pub use stats::WindowStats;
