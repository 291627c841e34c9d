use conclave_memory::store::{MemoryType, SearchFilter, VectorMemoryStore};

#[test]
fn search_returns_exact_match_first() {
    let store = VectorMemoryStore::new(1000);
    store.store("the build is failing on CI", MemoryType::Episodic, None, None).unwrap();
    store.store("the build is failing on CI", MemoryType::Episodic, None, None).unwrap();
    let id = store.store("unrelated weather report", MemoryType::Episodic, None, None).unwrap();
    let _ = id;

    let results = store.search("the build is failing on CI", 2, SearchFilter::default());
    assert_eq!(results.len(), 2);
    let (_, _, relevance_a) = &results[0];
    let (_, _, relevance_b) = &results[1];
    assert!(relevance_a >= relevance_b);
}

#[test]
fn search_never_fails_even_on_empty_store() {
    let store = VectorMemoryStore::new(10);
    let results = store.search("anything", 5, SearchFilter::default());
    assert!(results.is_empty());
}

#[test]
fn search_with_min_similarity_one_returns_only_exact_matches() {
    let store = VectorMemoryStore::new(1000);
    store.store("design an event bus", MemoryType::ArchitecturePattern, None, None).unwrap();
    store.store("design an event bus", MemoryType::ArchitecturePattern, None, None).unwrap();
    store.store("completely unrelated content about lunch", MemoryType::Episodic, None, None).unwrap();

    let filter = SearchFilter { min_similarity: Some(1.0), ..Default::default() };
    let results = store.search("design an event bus", 10, filter);
    assert_eq!(results.len(), 2);
    for (_, similarity, _) in &results {
        assert!((*similarity - 1.0).abs() < f32::EPSILON);
    }
}

#[test]
fn search_type_filter_excludes_other_memory_types() {
    let store = VectorMemoryStore::new(1000);
    store.store("event bus pattern", MemoryType::ArchitecturePattern, None, None).unwrap();
    store.store("event bus pattern", MemoryType::Episodic, None, None).unwrap();

    let filter = SearchFilter { memory_type: Some(MemoryType::ArchitecturePattern), ..Default::default() };
    let results = store.search("event bus pattern", 10, filter);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0.memory_type, MemoryType::ArchitecturePattern);
}

#[test]
fn forgetting_never_overshoots_the_floor() {
    let store = VectorMemoryStore::new(10);
    for i in 0..40 {
        store.store(format!("memory number {i}"), MemoryType::Episodic, None, Some(0.1)).unwrap();
    }
    let total = store.stats().total;
    assert!(total <= 10, "forgetting should never exceed capacity, got {total}");
    assert!(total > 0);
}

#[test]
fn export_then_import_round_trips_contents() {
    let store = VectorMemoryStore::new(1000);
    store.store("fact one", MemoryType::Semantic, Some("researcher".into()), None).unwrap();
    store.store("fact two", MemoryType::Semantic, Some("researcher".into()), None).unwrap();

    let bytes = store.export().unwrap();

    let restored = VectorMemoryStore::new(1000);
    restored.import(&bytes).unwrap();
    assert_eq!(restored.stats().total, 2);
}

#[test]
fn import_rejects_garbage_without_mutating_store() {
    let store = VectorMemoryStore::new(1000);
    store.store("kept", MemoryType::Semantic, None, None).unwrap();
    let err = store.import(b"not a valid envelope");
    assert!(err.is_err());
    assert_eq!(store.stats().total, 1);
}

#[test]
fn extract_patterns_requires_at_least_three_similar_entries() {
    let store = VectorMemoryStore::new(1000);
    store.store("deploy failed: timeout", MemoryType::Episodic, None, None).unwrap();
    store.store("deploy failed: timeout", MemoryType::Episodic, None, None).unwrap();
    let created = store.extract_patterns();
    assert!(created.is_empty(), "two entries should not form a pattern");

    store.store("deploy failed: timeout", MemoryType::Episodic, None, None).unwrap();
    let created = store.extract_patterns();
    assert_eq!(created.len(), 1);
}
