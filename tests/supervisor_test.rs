use conclave::conclave::supervisor::{classify_by_keyword, workflow_for, Intent};

#[test]
fn debug_keywords_win_over_architecture_keywords_when_both_present() {
    let (intent, confidence) = classify_by_keyword("please fix the broken design doc");
    assert_eq!(intent, Intent::Debug);
    assert_eq!(confidence, 1.0);
}

#[test]
fn unmatched_prompt_falls_back_to_query_with_half_confidence() {
    let (intent, confidence) = classify_by_keyword("good morning");
    assert_eq!(intent, Intent::Query);
    assert_eq!(confidence, 0.5);
}

#[test]
fn implementation_workflow_chains_plan_implement_test_review() {
    let steps = workflow_for(Intent::Implementation);
    let ids: Vec<&str> = steps.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["plan", "implement", "test", "review"]);
    assert_eq!(steps[1].depends_on, &["plan"]);
    assert_eq!(steps[3].depends_on, &["test"]);
}

#[test]
fn query_workflow_is_a_single_step() {
    let steps = workflow_for(Intent::Query);
    assert_eq!(steps.len(), 1);
    assert!(steps[0].depends_on.is_empty());
}
