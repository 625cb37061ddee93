//! Input file discovery and ordering
//!
//! The selector lists the input directory, keeps the files this worker may
//! process, orders them by the configured sort chain and hands them out one
//! at a time. The directory is only listed again once the queue has drained,
//! so a burst of new files waits for the current pass to finish.
//!
//! Filters, applied in order:
//!
//! 1. file name fully matches `input_file_pattern`
//! 2. the partition predicate assigns the file to this worker
//! 3. no claim marker exists next to the file
//! 4. the file is at least `file_minimum_age` old

use chrono::Utc;
use regex::Regex;
use spool_common::{FileMetadata, Result};
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use crate::claim::marker_path;
use crate::config::{FileSortAttribute, SpoolConfig};
use crate::partition::PartitionPredicate;

pub struct FileSelector {
    root: PathBuf,
    pattern: Regex,
    recursive: bool,
    processing_extension: String,
    minimum_age: Duration,
    sort: Vec<FileSortAttribute>,
    /// Output directories living below the input root
    excluded: Vec<PathBuf>,
    partition: PartitionPredicate,
    queue: VecDeque<FileMetadata>,
    /// Files finished under the retain policy; skipped until restart
    retained: HashSet<PathBuf>,
}

impl FileSelector {
    pub fn from_config(config: &SpoolConfig, partition: PartitionPredicate) -> Result<Self> {
        let root = canonical(&config.input_path);
        let excluded = [&config.finished_path, &config.error_path]
            .into_iter()
            .map(|p| canonical(p))
            .filter(|p| p != &root && p.starts_with(&root))
            .collect();

        Ok(Self {
            root,
            pattern: config.file_pattern()?,
            recursive: config.input_path_walk_recursively,
            processing_extension: config.processing_file_extension.clone(),
            minimum_age: config.file_minimum_age(),
            sort: config.files_sort_attributes.clone(),
            excluded,
            partition,
            queue: VecDeque::new(),
            retained: HashSet::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Next file to process, re-listing the directory when the queue is empty
    pub fn select_next(&mut self) -> Option<FileMetadata> {
        if self.queue.is_empty() {
            self.queue = self.scan().into();
            if !self.queue.is_empty() {
                tracing::debug!(
                    root = %self.root.display(),
                    files = self.queue.len(),
                    "Discovered input files"
                );
            }
        }
        self.queue.pop_front()
    }

    /// Never hand out `path` again during this process
    pub fn retain(&mut self, path: &Path) {
        self.retained.insert(path.to_path_buf());
    }

    /// One full discovery pass, ordered, without touching the queue
    pub fn scan(&self) -> Vec<FileMetadata> {
        let listed = match self.list() {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "Failed to list input directory");
                return Vec::new();
            }
        };

        let mut files: Vec<FileMetadata> = listed
            .into_iter()
            .filter(|f| self.partition.owns(&f.name))
            .filter(|f| !self.retained.contains(&f.path))
            .filter(|f| !marker_path(&f.path, &self.processing_extension).exists())
            .filter(|f| self.old_enough(f))
            .collect();

        sort_files(&mut files, &self.sort);
        files
    }

    /// Up to `limit` pattern-matching, unclaimed, settled files in sort
    /// order, ignoring partitioning so every worker samples the same set
    pub fn sample(&self, limit: usize) -> Result<Vec<FileMetadata>> {
        let mut files: Vec<FileMetadata> = self
            .list()?
            .into_iter()
            .filter(|f| !marker_path(&f.path, &self.processing_extension).exists())
            .filter(|f| self.old_enough(f))
            .collect();
        sort_files(&mut files, &self.sort);
        files.truncate(limit);
        Ok(files)
    }

    /// Regular files whose name matches the pattern, markers excluded
    fn list(&self) -> Result<Vec<FileMetadata>> {
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !self.excluded.iter().any(|x| e.path() == x));

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk loop"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if name.ends_with(&self.processing_extension) || !self.pattern.is_match(&name) {
                continue;
            }

            match FileMetadata::from_path(entry.path(), &self.root) {
                Ok(meta) => files.push(meta),
                // Raced with a move or delete
                Err(e) => tracing::debug!(file = %entry.path().display(), error = %e, "Skipping file"),
            }
        }
        Ok(files)
    }

    fn old_enough(&self, file: &FileMetadata) -> bool {
        if self.minimum_age.is_zero() {
            return true;
        }
        Utc::now()
            .signed_duration_since(file.last_modified)
            .to_std()
            .map(|age| age >= self.minimum_age)
            .unwrap_or(false)
    }
}

/// Order `files` by the sort chain, breaking remaining ties by path
pub fn sort_files(files: &mut [FileMetadata], chain: &[FileSortAttribute]) {
    files.sort_by(|a, b| compare(a, b, chain));
}

fn compare(a: &FileMetadata, b: &FileMetadata, chain: &[FileSortAttribute]) -> Ordering {
    for attribute in chain {
        let ord = match attribute {
            FileSortAttribute::NameAsc => a.name.cmp(&b.name),
            FileSortAttribute::NameDesc => b.name.cmp(&a.name),
            FileSortAttribute::LengthAsc => a.length.cmp(&b.length),
            FileSortAttribute::LengthDesc => b.length.cmp(&a.length),
            FileSortAttribute::LastModifiedAsc => a.last_modified.cmp(&b.last_modified),
            FileSortAttribute::LastModifiedDesc => b.last_modified.cmp(&a.last_modified),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.path.cmp(&b.path)
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::PartitionStrategy;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SpoolConfig) {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        let config = SpoolConfig::new(&input, input.join("done"), input.join("err"));
        (root, config)
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    fn selector(config: &SpoolConfig) -> FileSelector {
        FileSelector::from_config(config, PartitionPredicate::from_config(config).unwrap()).unwrap()
    }

    fn names(files: &[FileMetadata]) -> Vec<&str> {
        files.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_pattern_markers_and_claims_filtered() {
        let (_root, mut config) = setup();
        config.input_file_pattern = r"users\d+\.csv".to_string();
        write(&config.input_path, "users1.csv", "a");
        write(&config.input_path, "users0.csv", "a");
        write(&config.input_path, "users2.csv", "a");
        write(&config.input_path, "users2.csv.PROCESSING", "");
        write(&config.input_path, "notes.txt", "a");

        let s = selector(&config);
        assert_eq!(names(&s.scan()), vec!["users0.csv", "users1.csv"]);
    }

    #[test]
    fn test_select_next_drains_queue_before_rescan() {
        let (_root, config) = setup();
        write(&config.input_path, "a.csv", "a");
        write(&config.input_path, "b.csv", "a");

        let mut s = selector(&config);
        assert_eq!(s.select_next().unwrap().name, "a.csv");

        // Not visible until the current pass is drained
        write(&config.input_path, "0.csv", "a");
        assert_eq!(s.select_next().unwrap().name, "b.csv");
        assert_eq!(s.select_next().unwrap().name, "0.csv");
        assert_eq!(s.select_next().unwrap().name, "a.csv");
    }

    #[test]
    fn test_recursive_walk_skips_output_dirs() {
        let (_root, mut config) = setup();
        config.input_path_walk_recursively = true;
        write(&config.input_path, "top.csv", "a");
        write(&config.input_path, "2024/jan/nested.csv", "a");
        write(&config.input_path, "done/finished.csv", "a");
        write(&config.input_path, "err/broken.csv", "a");

        let files = selector(&config).scan();
        assert_eq!(names(&files), vec!["nested.csv", "top.csv"]);
        assert_eq!(files[0].relative_path, PathBuf::from("2024/jan/nested.csv"));

        config.input_path_walk_recursively = false;
        assert_eq!(names(&selector(&config).scan()), vec!["top.csv"]);
    }

    #[test]
    fn test_minimum_age_skips_fresh_files() {
        let (_root, mut config) = setup();
        let old = write(&config.input_path, "old.csv", "a");
        write(&config.input_path, "fresh.csv", "a");

        let an_hour_ago = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(an_hour_ago)
            .unwrap();

        config.file_minimum_age_ms = 60_000;
        let s = selector(&config);
        assert_eq!(names(&s.scan()), vec!["old.csv"]);
        // A file still being written is not sampled for schema inference either
        assert_eq!(names(&s.sample(5).unwrap()), vec!["old.csv"]);
    }

    #[test]
    fn test_partitioned_workers_split_files() {
        let (_root, mut config) = setup();
        for i in 0..20 {
            write(&config.input_path, &format!("f{}.csv", i), "a");
        }
        config.task_count = 3;
        config.task_partitioner = PartitionStrategy::ByName;

        let mut all = Vec::new();
        for index in 0..3 {
            config.task_index = index;
            all.extend(selector(&config).scan().into_iter().map(|f| f.name));
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);

        let sample = selector(&config).sample(5).unwrap();
        assert_eq!(sample.len(), 5);
    }

    #[test]
    fn test_retained_files_are_not_selected_again() {
        let (_root, config) = setup();
        write(&config.input_path, "a.csv", "a");
        let mut s = selector(&config);

        let file = s.select_next().unwrap();
        s.retain(&file.path);
        assert!(s.select_next().is_none());
    }

    #[test]
    fn test_missing_root_is_empty_pass() {
        let (root, config) = setup();
        let mut s = selector(&config);
        std::fs::remove_dir_all(root.path().join("in")).unwrap();
        assert!(s.select_next().is_none());
    }

    fn meta(name: &str, length: u64, secs: i64) -> FileMetadata {
        FileMetadata {
            path: PathBuf::from("/in").join(name),
            relative_path: PathBuf::from(name),
            name: name.to_string(),
            length,
            last_modified: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_sort_chain_is_lexicographic() {
        let mut files = vec![meta("c", 10, 5), meta("a", 20, 5), meta("b", 10, 1)];

        sort_files(
            &mut files,
            &[FileSortAttribute::LengthAsc, FileSortAttribute::NameDesc],
        );
        assert_eq!(names(&files), vec!["c", "b", "a"]);

        sort_files(
            &mut files,
            &[FileSortAttribute::LastModifiedDesc, FileSortAttribute::LengthDesc],
        );
        assert_eq!(names(&files), vec!["a", "c", "b"]);
    }

    fn attribute() -> impl Strategy<Value = FileSortAttribute> {
        prop_oneof![
            Just(FileSortAttribute::NameAsc),
            Just(FileSortAttribute::NameDesc),
            Just(FileSortAttribute::LengthAsc),
            Just(FileSortAttribute::LengthDesc),
            Just(FileSortAttribute::LastModifiedAsc),
            Just(FileSortAttribute::LastModifiedDesc),
        ]
    }

    proptest! {
        #[test]
        fn prop_sort_is_deterministic(
            entries in prop::collection::vec(("[a-e]{1,3}", 0u64..4, 0i64..4), 0..20),
            chain in prop::collection::vec(attribute(), 1..4),
        ) {
            let files: Vec<FileMetadata> = entries
                .iter()
                .enumerate()
                .map(|(i, (n, len, t))| meta(&format!("{}{}", n, i), *len, *t))
                .collect();

            let mut forward = files.clone();
            let mut backward: Vec<FileMetadata> = files.into_iter().rev().collect();
            sort_files(&mut forward, &chain);
            sort_files(&mut backward, &chain);
            prop_assert_eq!(forward, backward);
        }
    }
}
