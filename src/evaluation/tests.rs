use super::*;

#[test]
fn perfect_answer_passes_with_full_score() {
    let verdict = EvaluationThresholds::default().verdict(1.0, 1.0, false, "Fully supported.");
    assert!(verdict.pass);
    assert!((verdict.score - 1.0).abs() < f32::EPSILON);
    assert_eq!(verdict.feedback, "Fully supported.");
}

#[test]
fn weakly_grounded_answer_fails_score_floor() {
    let verdict = EvaluationThresholds::default().verdict(0.2, 0.9, false, "Unsupported claim.");
    assert!(!verdict.pass);
    assert!((verdict.score - 0.55).abs() < 1e-4);
}

#[test]
fn low_relevance_fails_even_with_high_score() {
    // 0.5 * 1.0 + 0.5 * 0.5 = 0.75 clears the score floor but not relevance
    let verdict = EvaluationThresholds::default().verdict(1.0, 0.5, false, "Off topic.");
    assert!((verdict.score - 0.75).abs() < 1e-4);
    assert!(!verdict.pass);
}

#[test]
fn score_exactly_at_threshold_passes() {
    let verdict = EvaluationThresholds::default().verdict(0.4, 1.0, false, "Borderline.");
    assert!((verdict.score - 0.7).abs() < f32::EPSILON);
    assert!(verdict.pass);
}

#[test]
fn pii_halves_groundedness_and_marks_feedback() {
    let verdict = EvaluationThresholds::default().verdict(1.0, 1.0, true, "Grounded answer.");
    assert_eq!(verdict.grounded, Some(0.5));
    assert!((verdict.score - 0.75).abs() < 1e-4);
    assert!(verdict.pass);
    assert_eq!(verdict.feedback, "Grounded answer. PII");

    let already_marked = EvaluationThresholds::default().verdict(1.0, 1.0, true, "PII found");
    assert_eq!(already_marked.feedback, "PII found");

    let empty = EvaluationThresholds::default().verdict(1.0, 1.0, true, "");
    assert_eq!(empty.feedback, "PII");
}

#[test]
fn out_of_range_inputs_are_clamped() {
    let verdict = EvaluationThresholds::default().verdict(4.0, f32::NAN, false, "");
    assert_eq!(verdict.grounded, Some(1.0));
    assert_eq!(verdict.relevance, Some(0.0));
    assert!((verdict.score - 0.5).abs() < f32::EPSILON);
}

#[test]
fn thresholds_follow_configuration() {
    let config = EvaluationConfig {
        score_threshold: 0.5,
        relevance_threshold: 0.9,
        ..EvaluationConfig::default()
    };
    let thresholds = EvaluationThresholds::from(&config);
    assert!(!thresholds.verdict(1.0, 0.8, false, "").pass);
    assert!(thresholds.verdict(0.2, 0.95, false, "").pass);
}

#[test]
fn evaluator_fault_verdict() {
    let fault = EvaluationFault::Unparsable("missing relevance_score".to_string());
    let verdict = EvaluationVerdict::evaluator_fault(&fault);
    assert!(!verdict.pass);
    assert!(verdict.score.abs() < f32::EPSILON);
    assert!(verdict.is_evaluator_fault());
    assert!(verdict.feedback.contains("missing relevance_score"));
}

#[test]
fn verdict_display() {
    let verdict = EvaluationThresholds::default().verdict(1.0, 0.8, false, "Good.");
    assert_eq!(
        verdict.to_string(),
        "passed (score 0.90, grounded 1.00, relevance 0.80): Good."
    );
    assert_eq!(
        EvaluationVerdict::failing("No response text.").to_string(),
        "failed (score 0.00): No response text."
    );
}
