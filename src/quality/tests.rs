use super::*;
use std::time::{Duration, Instant};

/// Feed values at 1 Hz and return every verdict
fn feed(classifier: &mut SignalQualityClassifier, start: Instant, values: &[i32]) -> Vec<QualityVerdict> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| classifier.add_reading(v, start + Duration::from_secs(i as u64)))
        .collect()
}

/// Low/high alternation with irregular magnitudes, all within 30..=220 BPM
const IRREGULAR_RHYTHM: [i32; 30] = [
    57, 192, 101, 150, 73, 129, 81, 185, 97, 164, 89, 143, 61, 178, 65, 115, 93, 206, 77, 171, 49,
    199, 45, 136, 105, 122, 69, 213, 53, 157,
];

#[test]
fn test_insufficient_until_five_samples() {
    let mut classifier = SignalQualityClassifier::new();
    let verdicts = feed(&mut classifier, Instant::now(), &[70, 71, 72, 73, 74]);

    for verdict in &verdicts[..4] {
        assert_eq!(verdict.stage, QualityStage::Insufficient);
        assert_eq!(verdict.quality, 0.5);
        assert_eq!(verdict.confidence, 0.0);
        assert!(!verdict.is_noise);
    }
    assert_eq!(verdicts[4].stage, QualityStage::Quick);
}

#[test]
fn test_stage_progression() {
    let mut classifier = SignalQualityClassifier::new();
    let values: Vec<i32> = (0..30).map(|i| 70 + (i % 3)).collect();
    let verdicts = feed(&mut classifier, Instant::now(), &values);

    assert_eq!(verdicts[13].stage, QualityStage::Quick);
    assert_eq!(verdicts[14].stage, QualityStage::Reliable);
    assert_eq!(verdicts[28].stage, QualityStage::Reliable);
    assert_eq!(verdicts[29].stage, QualityStage::Definitive);
    assert!(verdicts.iter().all(|v| !v.is_noise));
    assert_eq!(verdicts[29].quality, 0.95);
}

#[test]
fn test_constant_noise_band_signal_is_noise() {
    let mut classifier = SignalQualityClassifier::new();
    let verdicts = feed(&mut classifier, Instant::now(), &[150; 35]);

    assert_eq!(verdicts[4].quality, 0.2);
    assert_eq!(verdicts[20].quality, 0.1);

    let last = verdicts.last().unwrap();
    assert_eq!(last.stage, QualityStage::Definitive);
    assert!(last.is_noise);
    assert_eq!(last.quality, 0.05);
    assert_eq!(last.noise_band_density, 1.0);
    assert!(last.entropy.abs() < 1e-9);
}

#[test]
fn test_irregular_rhythm_is_protected() {
    let mut classifier = SignalQualityClassifier::new();
    let verdicts = feed(&mut classifier, Instant::now(), &IRREGULAR_RHYTHM);

    let last = verdicts.last().unwrap();
    assert_eq!(last.stage, QualityStage::Definitive);
    assert!(!last.is_noise);
    assert_eq!(last.quality, 0.85);
    assert!(last.entropy > 1.5);
}

/// A strict two-value alternation is perfectly regular, so it scores zero
/// entropy and lands in the blended fallback at its floor. Real arrhythmia
/// varies in magnitude too, which is what `IRREGULAR_RHYTHM` models.
#[test]
fn test_strict_alternation_falls_to_fallback_floor() {
    let mut classifier = SignalQualityClassifier::new();
    let values: Vec<i32> = (0..30).map(|i| if i % 2 == 0 { 60 } else { 160 }).collect();
    let last = feed(&mut classifier, Instant::now(), &values).pop().unwrap();

    assert_eq!(last.stage, QualityStage::Definitive);
    assert_eq!(last.entropy, 0.0);
    assert!(last.entropy.is_sign_positive());
    assert_eq!(last.noise_band_density, 0.5);
    assert!((last.quality - 0.3).abs() < 1e-9);
    assert!(last.is_noise);
}

#[test]
fn test_stable_bradycardia_is_not_noise() {
    let mut classifier = SignalQualityClassifier::new();
    let values: Vec<i32> = (0..30).map(|i| 44 + (i % 2)).collect();
    let last = feed(&mut classifier, Instant::now(), &values).pop().unwrap();

    assert_eq!(last.stage, QualityStage::Definitive);
    assert_eq!(last.quality, 0.9);
    assert!(!last.is_noise);
}

#[test]
fn test_out_of_range_quick_window() {
    let mut classifier = SignalQualityClassifier::new();
    let last = feed(&mut classifier, Instant::now(), &[250, 250, 80, 250, 251]).pop().unwrap();

    assert_eq!(last.stage, QualityStage::Quick);
    assert_eq!(last.quality, 0.1);
    assert!(last.is_noise);
}

#[test]
fn test_old_samples_are_evicted() {
    let mut classifier = SignalQualityClassifier::new();
    let start = Instant::now();
    feed(&mut classifier, start, &[150; 20]);
    assert_eq!(classifier.sample_count(), 20);

    // 40 s of silence: only the new sample remains
    let verdict = classifier.add_reading(72, start + Duration::from_secs(60));
    assert_eq!(classifier.sample_count(), 1);
    assert_eq!(verdict.stage, QualityStage::Insufficient);
}

#[test]
fn test_window_never_exceeds_age() {
    let mut classifier = SignalQualityClassifier::with_window(Duration::from_secs(10));
    let start = Instant::now();
    feed(&mut classifier, start, &[72; 50]);
    // Samples at t = 39..=49 are within 10 s of t = 49
    assert_eq!(classifier.sample_count(), 11);
}

#[test]
fn test_reset_clears_history() {
    let mut classifier = SignalQualityClassifier::new();
    let start = Instant::now();
    feed(&mut classifier, start, &[150; 30]);
    classifier.reset();

    assert_eq!(classifier.sample_count(), 0);
    assert!(classifier.window_stats().is_none());
    let verdict = classifier.add_reading(150, start + Duration::from_secs(31));
    assert_eq!(verdict.stage, QualityStage::Insufficient);
}
