//! Unit tests for session store lookups.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use agent_runner::config::SessionStoreConfig;
use agent_runner::workspace::session_locator::{decode_project_dir, encode_project_dir};
use agent_runner::workspace::{Recovery, SessionLocator};

fn store_config(root: &Path, mappings: HashMap<String, PathBuf>) -> SessionStoreConfig {
    SessionStoreConfig {
        roots: vec![root.to_path_buf()],
        extension: "jsonl".into(),
        max_projects: 100,
        mappings,
    }
}

fn write_session(root: &Path, project: &str, session_id: &str) -> PathBuf {
    let dir = root.join(project);
    fs::create_dir_all(&dir).expect("mkdir project");
    let file = dir.join(format!("{session_id}.jsonl"));
    fs::write(&file, "{}\n").expect("write transcript");
    file
}

#[test]
fn mapped_project_returns_mapped_directory() {
    let store = tempfile::tempdir().expect("tempdir");
    let transcript = write_session(store.path(), "-srv-my-app", "abc-123");
    let mappings = HashMap::from([("-srv-my-app".to_owned(), PathBuf::from("/srv/my-app"))]);
    let locator = SessionLocator::new(&store_config(store.path(), mappings), &[]);

    let record = locator.locate("abc-123").expect("session found");

    assert_eq!(record.working_dir, PathBuf::from("/srv/my-app"));
    assert_eq!(record.recovery, Recovery::Mapped);
    assert_eq!(record.transcript, transcript);
}

#[test]
fn known_directories_are_mapped_by_their_encoding() {
    let store = tempfile::tempdir().expect("tempdir");
    let known = PathBuf::from("/home/dev/code-base");
    write_session(store.path(), &encode_project_dir(&known), "s1");
    let locator = SessionLocator::new(&store_config(store.path(), HashMap::new()), &[known.clone()]);

    let record = locator.locate("s1").expect("session found");

    assert_eq!(record.working_dir, known);
    assert_eq!(record.recovery, Recovery::Mapped);
}

#[test]
fn unmapped_project_is_decoded_best_effort() {
    let store = tempfile::tempdir().expect("tempdir");
    write_session(store.path(), "-home-dev-project", "s2");
    let locator = SessionLocator::new(&store_config(store.path(), HashMap::new()), &[]);

    let record = locator.locate("s2").expect("session found");

    assert_eq!(record.working_dir, PathBuf::from("/home/dev/project"));
    assert_eq!(record.recovery, Recovery::Decoded);
}

#[test]
fn project_limit_keeps_the_first_directories_by_name() {
    let store = tempfile::tempdir().expect("tempdir");
    for n in 0..20 {
        write_session(store.path(), &format!("-p{n:02}"), &format!("only-{n:02}"));
    }
    let mut config = store_config(store.path(), HashMap::new());
    config.max_projects = 2;
    let locator = SessionLocator::new(&config, &[]);

    assert!(locator.locate("only-00").is_some());
    assert!(locator.locate("only-01").is_some());
    assert!(locator.locate("only-02").is_none());
    assert!(locator.locate("only-19").is_none());
}

#[test]
fn duplicate_session_resolves_to_the_first_project_by_name() {
    let store = tempfile::tempdir().expect("tempdir");
    for n in (0..10).rev() {
        write_session(store.path(), &format!("-p{n}"), "shared");
    }
    let locator = SessionLocator::new(&store_config(store.path(), HashMap::new()), &[]);

    let record = locator.locate("shared").expect("session found");

    assert_eq!(record.working_dir, PathBuf::from("/p0"));
}

#[test]
fn unknown_session_is_not_found() {
    let store = tempfile::tempdir().expect("tempdir");
    write_session(store.path(), "-home-dev-project", "present");
    let locator = SessionLocator::new(&store_config(store.path(), HashMap::new()), &[]);

    assert!(locator.locate("absent").is_none());
}

#[test]
fn missing_root_is_not_found() {
    let store = tempfile::tempdir().expect("tempdir");
    let locator = SessionLocator::new(
        &store_config(&store.path().join("nope"), HashMap::new()),
        &[],
    );

    assert!(locator.locate("anything").is_none());
}

#[test]
fn other_extensions_do_not_match() {
    let store = tempfile::tempdir().expect("tempdir");
    let dir = store.path().join("-p");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("s3.json"), "{}").expect("write");
    fs::write(dir.join("s3.jsonl.bak"), "{}").expect("write");
    let locator = SessionLocator::new(&store_config(store.path(), HashMap::new()), &[]);

    assert!(locator.locate("s3").is_none());
}

#[test]
fn malformed_session_ids_never_touch_the_filesystem() {
    let store = tempfile::tempdir().expect("tempdir");
    write_session(store.path(), "-p", "ok");
    let locator = SessionLocator::new(&store_config(store.path(), HashMap::new()), &[]);

    for id in ["", "../ok", "ok/../ok", "*", "ok.jsonl", &"x".repeat(200)] {
        assert!(locator.locate(id).is_none(), "id {id:?} must be rejected");
    }
}

#[test]
fn encoding_replaces_separators() {
    assert_eq!(encode_project_dir(Path::new("/a/b.c/d_e")), "-a-b-c-d-e");
    assert_eq!(decode_project_dir("-a-b"), PathBuf::from("/a/b"));
}
