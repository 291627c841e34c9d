use std::collections::BTreeMap;

use conclave_memory::checkpoint::CheckpointJournal;
use tempfile::tempdir;

#[test]
fn appended_checkpoints_form_a_valid_chain() {
    let dir = tempdir().unwrap();
    let mut journal = CheckpointJournal::open(dir.path(), "workflow-1").unwrap();

    journal.append(BTreeMap::new(), 0).unwrap();
    let mut second_ctx = BTreeMap::new();
    second_ctx.insert("k".to_string(), serde_json::json!("v"));
    journal.append(second_ctx, 3).unwrap();

    assert!(journal.verify_integrity());
    assert_eq!(journal.checkpoints().len(), 2);
}

#[test]
fn before_returns_the_most_recent_earlier_checkpoint() {
    let dir = tempdir().unwrap();
    let mut journal = CheckpointJournal::open(dir.path(), "workflow-2").unwrap();
    journal.append(BTreeMap::new(), 0).unwrap();
    journal.append(BTreeMap::new(), 1).unwrap();
    journal.append(BTreeMap::new(), 2).unwrap();

    let checkpoint = journal.before(2).unwrap();
    assert_eq!(checkpoint.seq, 1);
}

#[test]
fn reopening_the_journal_replays_prior_checkpoints() {
    let dir = tempdir().unwrap();
    {
        let mut journal = CheckpointJournal::open(dir.path(), "workflow-3").unwrap();
        journal.append(BTreeMap::new(), 0).unwrap();
        journal.append(BTreeMap::new(), 1).unwrap();
    }
    let reopened = CheckpointJournal::open(dir.path(), "workflow-3").unwrap();
    assert_eq!(reopened.checkpoints().len(), 2);
    assert!(reopened.verify_integrity());
}

#[test]
fn tampering_breaks_integrity_verification() {
    let dir = tempdir().unwrap();
    let path;
    {
        let mut journal = CheckpointJournal::open(dir.path(), "workflow-4").unwrap();
        journal.append(BTreeMap::new(), 0).unwrap();
        journal.append(BTreeMap::new(), 1).unwrap();
        path = dir.path().join(conclave_memory::checkpoint::journal_filename("workflow-4"));
    }
    let contents = std::fs::read_to_string(&path).unwrap();
    let tampered = contents.replace("\"seq\":1", "\"seq\":99");
    std::fs::write(&path, tampered).unwrap();

    let reopened = CheckpointJournal::open(dir.path(), "workflow-4").unwrap();
    assert!(!reopened.verify_integrity());
}
