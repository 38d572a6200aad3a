//! Ordered decision tables, one per classification stage.
//!
//! Rules are evaluated top to bottom and the first whose predicate holds
//! decides the score. Every table ends in a catch-all so evaluation always
//! produces a verdict.

use super::stats::WindowStats;
use serde::{Deserialize, Serialize};

/// How much history backed a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityStage {
    /// Fewer than 5 samples
    Insufficient,
    /// 5 to 14 samples
    Quick,
    /// 15 to 29 samples
    Reliable,
    /// 30 or more samples
    Definitive,
}

impl QualityStage {
    pub fn for_sample_count(count: usize) -> Self {
        match count {
            0..=4 => QualityStage::Insufficient,
            5..=14 => QualityStage::Quick,
            15..=29 => QualityStage::Reliable,
            _ => QualityStage::Definitive,
        }
    }

    /// Rule table for this stage, empty when there is not enough data
    pub fn rules(&self) -> &'static [QualityRule] {
        match self {
            QualityStage::Insufficient => &[],
            QualityStage::Quick => QUICK_RULES,
            QualityStage::Reliable => RELIABLE_RULES,
            QualityStage::Definitive => DEFINITIVE_RULES,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityStage::Insufficient => "insufficient",
            QualityStage::Quick => "quick",
            QualityStage::Reliable => "reliable",
            QualityStage::Definitive => "definitive",
        }
    }
}

/// Score assigned by a rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleScore {
    pub quality: f64,
    pub confidence: f64,
}

/// One (predicate, verdict) row of a stage table
pub struct QualityRule {
    pub reason: &'static str,
    pub applies: fn(&WindowStats) -> bool,
    pub score: fn(&WindowStats) -> RuleScore,
}

impl std::fmt::Debug for QualityRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityRule").field("reason", &self.reason).finish()
    }
}

/// Evaluate a table, returning the first matching rule and its score
pub fn evaluate(
    rules: &'static [QualityRule],
    stats: &WindowStats,
) -> Option<(&'static QualityRule, RuleScore)> {
    rules
        .iter()
        .find(|rule| (rule.applies)(stats))
        .map(|rule| (rule, (rule.score)(stats)))
}

const QUICK_CONFIDENCE: f64 = 0.4;
const RELIABLE_CONFIDENCE: f64 = 0.7;
const DEFINITIVE_CONFIDENCE: f64 = 0.9;

/// Above this share of out-of-range samples the window is rejected outright
const OUTSIDE_PHYSIOLOGICAL_LIMIT: f64 = 0.30;
const DENSITY_NOISE: f64 = 0.80;
const DENSITY_SUSPECT: f64 = 0.60;
const ENTROPY_FLAT: f64 = 0.3;
const ENTROPY_IRREGULAR: f64 = 1.5;
const ENTROPY_STABLE: f64 = 1.0;
const TREND_FLAT: f64 = 0.1;
/// Standard deviation at which the inverse-spread term bottoms out
const STD_DEV_SCALE: f64 = 50.0;

fn fixed(quality: f64, confidence: f64) -> RuleScore {
    RuleScore { quality, confidence }
}

pub static QUICK_RULES: &[QualityRule] = &[
    QualityRule {
        reason: "outside physiological range",
        applies: |s| s.outside_physiological > OUTSIDE_PHYSIOLOGICAL_LIMIT,
        score: |_| fixed(0.1, QUICK_CONFIDENCE),
    },
    QualityRule {
        reason: "noise band saturated",
        applies: |s| s.noise_band_density > DENSITY_NOISE,
        score: |_| fixed(0.2, QUICK_CONFIDENCE),
    },
    QualityRule {
        reason: "noise band suspect",
        applies: |s| s.noise_band_density > DENSITY_SUSPECT,
        score: |_| fixed(0.5, QUICK_CONFIDENCE),
    },
    QualityRule {
        reason: "plausible signal",
        applies: |_| true,
        score: |_| fixed(0.8, QUICK_CONFIDENCE),
    },
];

pub static RELIABLE_RULES: &[QualityRule] = &[
    QualityRule {
        reason: "flat signal in noise band",
        applies: |s| s.noise_band_density > DENSITY_NOISE && s.entropy < ENTROPY_FLAT,
        score: |_| fixed(0.1, RELIABLE_CONFIDENCE),
    },
    QualityRule {
        reason: "irregular rhythm in noise band, possible arrhythmia",
        applies: |s| s.noise_band_density > DENSITY_SUSPECT && s.entropy > ENTROPY_IRREGULAR,
        score: |_| fixed(0.7, 0.5),
    },
    QualityRule {
        reason: "clean signal",
        applies: |s| s.noise_band_density < DENSITY_SUSPECT,
        score: |_| fixed(0.9, RELIABLE_CONFIDENCE),
    },
    QualityRule {
        reason: "blended entropy and density",
        applies: |_| true,
        score: |s| {
            let quality = 0.5 + 0.3 * s.normalized_entropy() - 0.2 * s.noise_band_density;
            fixed(quality.clamp(0.3, 0.8), RELIABLE_CONFIDENCE)
        },
    },
];

pub static DEFINITIVE_RULES: &[QualityRule] = &[
    QualityRule {
        reason: "confirmed noise: flat, trendless signal in noise band",
        applies: |s| {
            s.noise_band_density > DENSITY_NOISE
                && s.entropy < ENTROPY_FLAT
                && s.trend.abs() < TREND_FLAT
        },
        score: |_| fixed(0.05, DEFINITIVE_CONFIDENCE),
    },
    QualityRule {
        reason: "high variability within physiological range, possible arrhythmia",
        applies: |s| s.entropy > ENTROPY_IRREGULAR && s.all_physiological(),
        score: |_| fixed(0.85, DEFINITIVE_CONFIDENCE),
    },
    QualityRule {
        reason: "stable bradycardia or tachycardia",
        applies: |s| {
            (s.mean < 50.0 || s.mean > 150.0) && s.std_dev < 15.0 && s.entropy < ENTROPY_STABLE
        },
        score: |_| fixed(0.9, DEFINITIVE_CONFIDENCE),
    },
    QualityRule {
        reason: "clean signal",
        applies: |s| s.noise_band_density < DENSITY_SUSPECT && s.std_dev < 30.0,
        score: |_| fixed(0.95, DEFINITIVE_CONFIDENCE),
    },
    QualityRule {
        reason: "blended entropy, density and spread",
        applies: |_| true,
        // Never below 0.3: ambiguous windows lean towards keeping real events
        score: |s| {
            let inverse_spread = 1.0 - (s.std_dev / STD_DEV_SCALE).min(1.0);
            let quality = 0.4 * s.normalized_entropy()
                + 0.4 * (1.0 - s.noise_band_density)
                + 0.2 * inverse_spread;
            fixed(quality.clamp(0.3, 0.9), DEFINITIVE_CONFIDENCE)
        },
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> WindowStats {
        WindowStats {
            count: 30,
            mean: 80.0,
            std_dev: 5.0,
            entropy: 0.8,
            noise_band_density: 0.0,
            outside_physiological: 0.0,
            trend: 0.0,
        }
    }

    fn decide(rules: &'static [QualityRule], stats: WindowStats) -> (&'static str, RuleScore) {
        let (rule, score) = evaluate(rules, &stats).unwrap();
        (rule.reason, score)
    }

    #[test]
    fn test_stage_boundaries() {
        assert_eq!(QualityStage::for_sample_count(0), QualityStage::Insufficient);
        assert_eq!(QualityStage::for_sample_count(4), QualityStage::Insufficient);
        assert_eq!(QualityStage::for_sample_count(5), QualityStage::Quick);
        assert_eq!(QualityStage::for_sample_count(14), QualityStage::Quick);
        assert_eq!(QualityStage::for_sample_count(15), QualityStage::Reliable);
        assert_eq!(QualityStage::for_sample_count(29), QualityStage::Reliable);
        assert_eq!(QualityStage::for_sample_count(30), QualityStage::Definitive);
        assert!(QualityStage::Insufficient.rules().is_empty());
    }

    #[test]
    fn test_quick_rules_in_order() {
        let out_of_range = WindowStats { outside_physiological: 0.4, noise_band_density: 0.9, ..stats() };
        assert_eq!(decide(QUICK_RULES, out_of_range).1.quality, 0.1);

        let saturated = WindowStats { noise_band_density: 0.85, ..stats() };
        assert_eq!(decide(QUICK_RULES, saturated).1.quality, 0.2);

        let suspect = WindowStats { noise_band_density: 0.7, ..stats() };
        assert_eq!(decide(QUICK_RULES, suspect).1.quality, 0.5);

        // Exactly 30% out of range does not trip the first rule
        let borderline = WindowStats { outside_physiological: 0.3, ..stats() };
        assert_eq!(decide(QUICK_RULES, borderline).1.quality, 0.8);
    }

    #[test]
    fn test_reliable_rules() {
        let noise = WindowStats { noise_band_density: 0.9, entropy: 0.1, ..stats() };
        assert_eq!(decide(RELIABLE_RULES, noise).1.quality, 0.1);

        let arrhythmia = WindowStats { noise_band_density: 0.7, entropy: 1.8, ..stats() };
        let (_, score) = decide(RELIABLE_RULES, arrhythmia);
        assert_eq!(score.quality, 0.7);
        assert!(score.confidence < RELIABLE_CONFIDENCE);

        let clean = WindowStats { noise_band_density: 0.2, ..stats() };
        assert_eq!(decide(RELIABLE_RULES, clean).1.quality, 0.9);

        // 0.5 + 0.3 * 0.5 - 0.2 * 0.7 = 0.51
        let blended = WindowStats { noise_band_density: 0.7, entropy: 1.0, ..stats() };
        let (reason, score) = decide(RELIABLE_RULES, blended);
        assert_eq!(reason, "blended entropy and density");
        assert!((score.quality - 0.51).abs() < 1e-9);

        // Flat signal in a saturated band with entropy just above the flat cut-off clamps low
        let low = WindowStats { noise_band_density: 1.0, entropy: 0.3, ..stats() };
        assert!((decide(RELIABLE_RULES, low).1.quality - 0.345).abs() < 1e-9);
    }

    #[test]
    fn test_definitive_rules() {
        let noise = WindowStats { mean: 150.0, noise_band_density: 1.0, entropy: 0.0, ..stats() };
        assert_eq!(decide(DEFINITIVE_RULES, noise).1.quality, 0.05);

        let drifting = WindowStats { trend: 0.5, ..noise };
        assert_ne!(decide(DEFINITIVE_RULES, drifting).1.quality, 0.05);

        let arrhythmia = WindowStats { entropy: 1.9, std_dev: 45.0, noise_band_density: 0.3, ..stats() };
        assert_eq!(decide(DEFINITIVE_RULES, arrhythmia).1.quality, 0.85);

        let out_of_range = WindowStats { outside_physiological: 0.05, ..arrhythmia };
        assert_ne!(decide(DEFINITIVE_RULES, out_of_range).1.quality, 0.85);

        let bradycardia = WindowStats { mean: 42.0, std_dev: 3.0, entropy: 0.4, ..stats() };
        assert_eq!(decide(DEFINITIVE_RULES, bradycardia).1.quality, 0.9);

        let clean = WindowStats { std_dev: 12.0, ..stats() };
        assert_eq!(decide(DEFINITIVE_RULES, clean).1.quality, 0.95);
    }

    #[test]
    fn test_definitive_fallback_never_below_floor() {
        // 0.4 * 0.25 + 0.4 * 0.1 + 0.2 * 0.1 = 0.16, clamped up
        let ambiguous = WindowStats {
            noise_band_density: 0.9,
            entropy: 0.5,
            std_dev: 45.0,
            ..stats()
        };
        let (reason, score) = decide(DEFINITIVE_RULES, ambiguous);
        assert_eq!(reason, "blended entropy, density and spread");
        assert_eq!(score.quality, 0.3);
    }
}
