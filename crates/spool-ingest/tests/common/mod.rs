//! Shared helpers for spool-ingest integration tests

#![allow(dead_code)]

use spool_ingest::config::SpoolConfig;
use spool_ingest::offsets::OffsetStore;
use spool_ingest::{SourceRecord, SpoolTask};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Input, finished and error directories below one temporary root
pub struct SpoolDirs {
    pub root: TempDir,
    pub config: SpoolConfig,
}

impl SpoolDirs {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("Failed to create temp dir");
        let config = SpoolConfig::new(
            root.path().join("input"),
            root.path().join("finished"),
            root.path().join("error"),
        );
        for dir in [&config.input_path, &config.finished_path, &config.error_path] {
            std::fs::create_dir_all(dir).expect("Failed to create spool dir");
        }
        Self { root, config }
    }

    pub fn input(&self, name: &str) -> PathBuf {
        self.config.input_path.join(name)
    }

    pub fn finished(&self, name: &str) -> PathBuf {
        self.config.finished_path.join(name)
    }

    pub fn errored(&self, name: &str) -> PathBuf {
        self.config.error_path.join(name)
    }
}

/// Write a users CSV with a header and `rows` rows whose ids start at `first_id`
pub fn write_users_csv(path: &Path, first_id: usize, rows: usize) {
    let mut text = String::from("id,first_name,last_name,email\n");
    for id in first_id..first_id + rows {
        text.push_str(&format!("{id},first{id},last{id},user{id}@example.com\n"));
    }
    std::fs::write(path, text).expect("Failed to write users csv");
}

/// Names of the regular files directly inside `dir`
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to read dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Poll and commit like a sink would, until `max_batches` batches have been
/// delivered or the task is idle with nothing left to list
pub fn deliver(
    task: &mut SpoolTask,
    offsets: &dyn OffsetStore,
    max_batches: usize,
) -> Vec<SourceRecord> {
    let mut delivered = Vec::new();
    let mut batches = 0;
    // Each file costs at most a couple of empty polls
    let mut empty_budget = 4 * max_batches + 8;
    while batches < max_batches && empty_budget > 0 {
        let batch = task.poll().expect("Poll failed");
        if batch.is_empty() {
            if task.state().is_idle() && task.context().selector().scan().is_empty() {
                break;
            }
            empty_budget -= 1;
            continue;
        }
        let commits: Vec<_> = batch
            .iter()
            .map(|r| (r.partition.clone(), r.offset.offset))
            .collect();
        offsets.commit_all(&commits).expect("Commit failed");
        delivered.extend(batch);
        batches += 1;
    }
    delivered
}

/// String value of `field` in every record
pub fn values(records: &[SourceRecord], field: &str) -> Vec<String> {
    records
        .iter()
        .map(|r| match r.value.get(field) {
            Some(spool_ingest::schema::FieldValue::String(s)) => s.clone(),
            other => panic!("unexpected value for {}: {:?}", field, other),
        })
        .collect()
}
