//! Per-worker file processing state machine
//!
//! ```text
//! Idle -> Claiming -> Opening -> Reading -> Closing(Success | Error) -> Idle
//! ```
//!
//! `TaskContext::step` performs exactly one transition and returns the next
//! state together with any records produced on the way. `SpoolTask::poll`
//! drives steps until a batch is ready or there is nothing left to do.
//!
//! A batch that reaches the end of a file is returned before the file is
//! closed; relocation happens on the following step, after the caller has
//! handed the batch to the sink.

use spool_common::{FileMetadata, Result, SpoolError};
use std::sync::Arc;
use std::time::Instant;

use crate::claim::ClaimMarker;
use crate::cleanup::{Cleanup, CleanupOutcome};
use crate::config::SpoolConfig;
use crate::decode::{DecoderFactory, RecordDecoder};
use crate::emitter::{RecordEmitter, SourcePartition, SourceRecord};
use crate::offsets::OffsetStore;
use crate::partition::PartitionPredicate;
use crate::schema::inference::resolve_schemas;
use crate::schema::SchemaPair;
use crate::selector::FileSelector;

/// The file currently being read
pub struct FileSession {
    file: FileMetadata,
    claim: ClaimMarker,
    decoder: Box<dyn RecordDecoder>,
    partition: SourcePartition,
    resumed_from: u64,
    emitted: u64,
    started: Instant,
    exhausted: bool,
}

impl FileSession {
    pub fn file(&self) -> &FileMetadata {
        &self.file
    }

    /// Records emitted since the file was opened
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn offset(&self) -> u64 {
        self.decoder.offset()
    }
}

impl std::fmt::Debug for FileSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSession")
            .field("file", &self.file.path)
            .field("offset", &self.decoder.offset())
            .field("emitted", &self.emitted)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

/// How a session ended
#[derive(Debug)]
pub enum CloseReason {
    Success,
    Error(SpoolError),
}

#[derive(Debug)]
pub enum TaskState {
    Idle,
    Claiming(FileMetadata),
    Opening {
        file: FileMetadata,
        claim: ClaimMarker,
    },
    Reading(FileSession),
    Closing {
        file: FileMetadata,
        claim: ClaimMarker,
        reason: CloseReason,
    },
}

impl TaskState {
    pub fn is_idle(&self) -> bool {
        matches!(self, TaskState::Idle)
    }

    fn closing(file: FileMetadata, claim: ClaimMarker, reason: CloseReason) -> Self {
        TaskState::Closing {
            file,
            claim,
            reason,
        }
    }
}

/// Result of one `step`
#[derive(Debug)]
pub struct Transition {
    pub next: TaskState,
    pub records: Vec<SourceRecord>,
}

impl Transition {
    fn to(next: TaskState) -> Self {
        Self {
            next,
            records: Vec::new(),
        }
    }
}

/// Everything a transition needs, fixed at startup
pub struct TaskContext {
    selector: FileSelector,
    decoders: DecoderFactory,
    emitter: RecordEmitter,
    cleanup: Cleanup,
    schemas: SchemaPair,
    offsets: Arc<dyn OffsetStore>,
    processing_extension: String,
    batch_size: usize,
    halt_on_error: bool,
}

impl TaskContext {
    /// Build the context, resolving (and possibly inferring) schemas
    pub fn from_config(config: &SpoolConfig, offsets: Arc<dyn OffsetStore>) -> Result<Self> {
        let partition = PartitionPredicate::from_config(config)?;
        let selector = FileSelector::from_config(config, partition)?;
        let schemas = resolve_schemas(config, &selector)?;

        Ok(Self {
            selector,
            decoders: DecoderFactory::from_config(config),
            emitter: RecordEmitter::from_config(config),
            cleanup: Cleanup::from_config(config),
            schemas,
            offsets,
            processing_extension: config.processing_file_extension.clone(),
            batch_size: config.batch_size,
            halt_on_error: config.halt_on_error,
        })
    }

    pub fn schemas(&self) -> &SchemaPair {
        &self.schemas
    }

    pub fn selector(&self) -> &FileSelector {
        &self.selector
    }

    /// Perform one transition
    pub fn step(&mut self, state: TaskState) -> Result<Transition> {
        match state {
            TaskState::Idle => Ok(Transition::to(match self.selector.select_next() {
                Some(file) => TaskState::Claiming(file),
                None => TaskState::Idle,
            })),
            TaskState::Claiming(file) => Ok(Transition::to(self.claim(file))),
            TaskState::Opening { file, claim } => self.open(file, claim).map(Transition::to),
            TaskState::Reading(session) => Ok(self.read(session)),
            TaskState::Closing {
                file,
                claim,
                reason,
            } => self.close(file, claim, reason).map(Transition::to),
        }
    }

    fn claim(&mut self, file: FileMetadata) -> TaskState {
        match ClaimMarker::acquire(&file.path, &self.processing_extension) {
            Ok(Some(claim)) => TaskState::Opening { file, claim },
            Ok(None) => {
                tracing::debug!(file = %file.path.display(), "File already claimed by another worker");
                TaskState::Idle
            }
            Err(e) => {
                tracing::warn!(file = %file.path.display(), error = %e, "Failed to claim file");
                TaskState::Idle
            }
        }
    }

    fn open(&mut self, file: FileMetadata, claim: ClaimMarker) -> Result<TaskState> {
        let partition = SourcePartition {
            file_name: file.name.clone(),
        };
        let resume = match self.offsets.load(&partition) {
            Ok(offset) => offset.unwrap_or(0),
            Err(e) => {
                tracing::warn!(
                    file = %file.path.display(),
                    error = %e,
                    "Cannot read committed offset, releasing file for a later pass"
                );
                claim.release()?;
                return Ok(TaskState::Idle);
            }
        };

        let mut decoder = match self.decoders.open(&file, Arc::clone(&self.schemas.value)) {
            Ok(decoder) => decoder,
            Err(SpoolError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(file = %file.path.display(), "File vanished before it could be opened");
                claim.release()?;
                return Ok(TaskState::Idle);
            }
            Err(e) => return Ok(TaskState::closing(file, claim, CloseReason::Error(e))),
        };

        if resume > 0 {
            match decoder.skip(resume) {
                Ok(skipped) if skipped < resume => {
                    tracing::info!(
                        file = %file.path.display(),
                        offset = resume,
                        records = skipped,
                        "File already delivered up to its committed offset"
                    );
                    return Ok(TaskState::closing(file, claim, CloseReason::Success));
                }
                Ok(_) => {}
                Err(e) => return Ok(TaskState::closing(file, claim, CloseReason::Error(e))),
            }
        }

        tracing::info!(
            file = %file.path.display(),
            offset = resume,
            length = file.length,
            "Processing file"
        );

        Ok(TaskState::Reading(FileSession {
            file,
            claim,
            decoder,
            partition,
            resumed_from: resume,
            emitted: 0,
            started: Instant::now(),
            exhausted: false,
        }))
    }

    fn read(&mut self, mut session: FileSession) -> Transition {
        if session.exhausted {
            tracing::info!(
                file = %session.file.path.display(),
                records = session.emitted,
                resumed_from = session.resumed_from,
                elapsed_ms = session.started.elapsed().as_millis() as u64,
                "Finished reading file"
            );
            return Transition::to(TaskState::closing(
                session.file,
                session.claim,
                CloseReason::Success,
            ));
        }

        let limit = if self.batch_size == 0 {
            usize::MAX
        } else {
            self.batch_size
        };
        let mut records = Vec::with_capacity(self.batch_size.min(4096));

        while records.len() < limit {
            let value = match session.decoder.next_record() {
                Ok(Some(value)) => value,
                Ok(None) => {
                    session.exhausted = true;
                    break;
                }
                Err(e) => return self.fail(session, records, e),
            };

            let key = self.schemas.project_key(&value);
            match self.emitter.emit(
                &session.file,
                session.decoder.offset(),
                self.schemas.key.clone(),
                key,
                Arc::clone(&self.schemas.value),
                value,
            ) {
                Ok(record) => records.push(record),
                Err(e) => return self.fail(session, records, e),
            }
        }

        session.emitted += records.len() as u64;
        tracing::debug!(
            file = %session.file.path.display(),
            records = records.len(),
            offset = session.decoder.offset(),
            "Read batch"
        );

        if records.is_empty() && session.exhausted {
            // Nothing to hand over; close right away
            return self.read(session);
        }

        Transition {
            next: TaskState::Reading(session),
            records,
        }
    }

    /// Records read before the failure are still delivered
    fn fail(&self, session: FileSession, records: Vec<SourceRecord>, error: SpoolError) -> Transition {
        tracing::error!(
            file = %session.file.path.display(),
            offset = session.decoder.offset(),
            error = %error,
            "Failed to read file"
        );
        Transition {
            next: TaskState::closing(session.file, session.claim, CloseReason::Error(error)),
            records,
        }
    }

    fn close(&mut self, file: FileMetadata, claim: ClaimMarker, reason: CloseReason) -> Result<TaskState> {
        match reason {
            CloseReason::Success => {
                // On failure the claim stays in place so the file is not read twice
                if self.cleanup.on_success(&file)? == CleanupOutcome::Retained {
                    self.selector.retain(&file.path);
                }
                claim.release()?;
                Ok(TaskState::Idle)
            }
            CloseReason::Error(error) => {
                if let Err(e) = self.cleanup.on_error(&file) {
                    // The marker stays so the file is not picked up and failed again
                    tracing::error!(
                        file = %file.path.display(),
                        marker = %claim.path().display(),
                        cause = %error,
                        error = %e,
                        "Failed to move file to error directory"
                    );
                    return Err(e);
                }
                claim.release()?;

                if self.halt_on_error {
                    Err(error)
                } else {
                    tracing::warn!(file = %file.path.display(), error = %error, "Skipping failed file");
                    Ok(TaskState::Idle)
                }
            }
        }
    }
}

/// A state machine bound to its context
pub struct SpoolTask {
    context: TaskContext,
    state: TaskState,
}

impl SpoolTask {
    pub fn new(context: TaskContext) -> Self {
        Self {
            context,
            state: TaskState::Idle,
        }
    }

    pub fn from_config(config: &SpoolConfig, offsets: Arc<dyn OffsetStore>) -> Result<Self> {
        Ok(Self::new(TaskContext::from_config(config, offsets)?))
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Step until a non-empty batch is ready or the task is back to idle.
    ///
    /// Every return to idle (a closed file, a failed claim, an empty input
    /// directory) yields an empty result, so the caller gets a chance to
    /// back off or stop between files.
    ///
    /// An error leaves the task idle. The claim of a halted file has already
    /// been released, unless the file could not be moved out of the input.
    pub fn poll(&mut self) -> Result<Vec<SourceRecord>> {
        loop {
            let state = std::mem::replace(&mut self.state, TaskState::Idle);

            let Transition { next, records } = self.context.step(state)?;
            let now_idle = next.is_idle();
            self.state = next;

            if !records.is_empty() {
                return Ok(records);
            }
            if now_idle {
                return Ok(Vec::new());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::claim::marker_path;
    use crate::config::CleanupPolicyKind;
    use crate::offsets::MemoryOffsetStore;
    use crate::schema::{Field, FieldType, FieldValue, Schema};
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        config: SpoolConfig,
        offsets: Arc<MemoryOffsetStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let mut config = SpoolConfig::new(
                root.path().join("in"),
                root.path().join("done"),
                root.path().join("err"),
            );
            for d in [&config.input_path, &config.finished_path, &config.error_path] {
                std::fs::create_dir_all(d).unwrap();
            }
            config.value_schema = Some(Schema::new(
                None,
                vec![
                    Field::optional("id", FieldType::String),
                    Field::required("n", FieldType::Int32),
                ],
            ));
            config.batch_size = 2;
            Self {
                _root: root,
                config,
                offsets: Arc::new(MemoryOffsetStore::new()),
            }
        }

        fn write(&self, name: &str, rows: usize) -> std::path::PathBuf {
            let mut text = String::from("id,n\n");
            for i in 0..rows {
                text.push_str(&format!("r{},{}\n", i, i));
            }
            let path = self.config.input_path.join(name);
            std::fs::write(&path, text).unwrap();
            path
        }

        fn context(&self) -> TaskContext {
            TaskContext::from_config(&self.config, self.offsets.clone()).unwrap()
        }

        fn meta(&self, path: &Path) -> FileMetadata {
            FileMetadata::from_path(path, &self.config.input_path).unwrap()
        }
    }

    fn ns(records: &[SourceRecord]) -> Vec<FieldValue> {
        records.iter().map(|r| r.value.get("n").cloned().unwrap()).collect()
    }

    #[test]
    fn test_idle_without_files_stays_idle() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let t = ctx.step(TaskState::Idle).unwrap();
        assert!(t.next.is_idle());
        assert!(t.records.is_empty());
    }

    #[test]
    fn test_full_lifecycle_step_by_step() {
        let fx = Fixture::new();
        let path = fx.write("a.csv", 3);
        let mut ctx = fx.context();

        let t = ctx.step(TaskState::Idle).unwrap();
        assert!(matches!(t.next, TaskState::Claiming(_)));

        let t = ctx.step(t.next).unwrap();
        assert!(matches!(t.next, TaskState::Opening { .. }));
        assert!(marker_path(&path, ".PROCESSING").exists());

        let t = ctx.step(t.next).unwrap();
        assert!(matches!(t.next, TaskState::Reading(_)));

        let t = ctx.step(t.next).unwrap();
        assert_eq!(ns(&t.records), vec![FieldValue::Int32(0), FieldValue::Int32(1)]);
        assert_eq!(t.records[1].offset.offset, 2);

        // End of file: the last batch is returned before closing
        let t = ctx.step(t.next).unwrap();
        assert_eq!(ns(&t.records), vec![FieldValue::Int32(2)]);
        assert!(matches!(t.next, TaskState::Reading(_)));
        assert!(path.exists());

        let t = ctx.step(t.next).unwrap();
        assert!(matches!(
            t.next,
            TaskState::Closing {
                reason: CloseReason::Success,
                ..
            }
        ));

        let t = ctx.step(t.next).unwrap();
        assert!(t.next.is_idle());
        assert!(!path.exists());
        assert!(!marker_path(&path, ".PROCESSING").exists());
        assert!(fx.config.finished_path.join("a.csv").exists());
    }

    #[test]
    fn test_claimed_file_is_skipped() {
        let fx = Fixture::new();
        let path = fx.write("a.csv", 1);
        let mut ctx = fx.context();

        std::fs::write(marker_path(&path, ".PROCESSING"), "").unwrap();
        let t = ctx.step(TaskState::Claiming(fx.meta(&path))).unwrap();
        assert!(t.next.is_idle());
    }

    #[test]
    fn test_vanished_file_releases_claim_without_cleanup() {
        let fx = Fixture::new();
        let path = fx.write("a.csv", 1);
        let mut ctx = fx.context();
        let file = fx.meta(&path);

        let t = ctx.step(TaskState::Claiming(file)).unwrap();
        std::fs::remove_file(&path).unwrap();
        let t = ctx.step(t.next).unwrap();

        assert!(t.next.is_idle());
        assert!(!marker_path(&path, ".PROCESSING").exists());
        assert_eq!(std::fs::read_dir(&fx.config.error_path).unwrap().count(), 0);
    }

    #[test]
    fn test_resume_skips_committed_records() {
        let fx = Fixture::new();
        let path = fx.write("a.csv", 5);
        fx.offsets
            .commit(&SourcePartition { file_name: "a.csv".to_string() }, 3)
            .unwrap();

        let mut task = SpoolTask::new(fx.context());
        let batch = task.poll().unwrap();
        assert_eq!(ns(&batch), vec![FieldValue::Int32(3), FieldValue::Int32(4)]);
        assert_eq!(batch[0].offset.offset, 4);

        assert!(task.poll().unwrap().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_offset_past_end_closes_immediately() {
        let fx = Fixture::new();
        let path = fx.write("a.csv", 2);
        fx.offsets
            .commit(&SourcePartition { file_name: "a.csv".to_string() }, 10)
            .unwrap();

        let mut ctx = fx.context();
        let t = ctx.step(TaskState::Claiming(fx.meta(&path))).unwrap();
        let t = ctx.step(t.next).unwrap();
        assert!(matches!(
            t.next,
            TaskState::Closing {
                reason: CloseReason::Success,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_error_halts_after_cleanup() {
        let fx = Fixture::new();
        let path = fx.config.input_path.join("bad.csv");
        std::fs::write(&path, "id,n\nr0,0\nr1,oops\n").unwrap();

        let mut task = SpoolTask::new(fx.context());
        // The good record ahead of the failure is still delivered
        let batch = task.poll().unwrap();
        assert_eq!(ns(&batch), vec![FieldValue::Int32(0)]);

        let err = task.poll().unwrap_err();
        assert!(matches!(err, SpoolError::Decode { offset: 1, .. }));
        assert!(fx.config.error_path.join("bad.csv").exists());
        assert!(!marker_path(&path, ".PROCESSING").exists());
    }

    #[test]
    fn test_decode_error_continues_without_halt() {
        let mut fx = Fixture::new();
        fx.config.halt_on_error = false;
        fx.config.batch_size = 0;
        std::fs::write(fx.config.input_path.join("a.csv"), "id,n\nr0,x\n").unwrap();
        fx.write("b.csv", 3);

        let mut task = SpoolTask::new(fx.context());
        // a.csv fails and closes first
        assert!(task.poll().unwrap().is_empty());
        let batch = task.poll().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].partition.file_name, "b.csv");
        assert!(fx.config.error_path.join("a.csv").exists());
    }

    #[test]
    fn test_retained_file_is_not_reprocessed_in_process() {
        let mut fx = Fixture::new();
        fx.config.cleanup_policy = CleanupPolicyKind::None;
        fx.config.batch_size = 0;
        let path = fx.write("a.csv", 2);

        let mut task = SpoolTask::new(fx.context());
        assert_eq!(task.poll().unwrap().len(), 2);
        assert!(task.poll().unwrap().is_empty());
        assert!(task.poll().unwrap().is_empty());
        assert!(path.exists());
        assert!(!marker_path(&path, ".PROCESSING").exists());
    }

    struct UnreadableOffsets;

    impl OffsetStore for UnreadableOffsets {
        fn load(&self, _partition: &SourcePartition) -> Result<Option<u64>> {
            Err(SpoolError::OffsetStore("offset file is unreadable".to_string()))
        }

        fn commit(&self, _partition: &SourcePartition, _offset: u64) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unmovable_error_file_keeps_claim() {
        let mut fx = Fixture::new();
        fx.config.halt_on_error = false;
        let path = fx.config.input_path.join("bad.csv");
        std::fs::write(&path, "id,n\nr0,x\n").unwrap();

        let mut task = SpoolTask::new(fx.context());
        // Error directory replaced by a regular file after startup
        std::fs::remove_dir(&fx.config.error_path).unwrap();
        std::fs::write(&fx.config.error_path, "").unwrap();

        assert!(task.poll().is_err());
        assert!(path.exists());
        assert!(marker_path(&path, ".PROCESSING").exists());

        // The claimed file is not handed out again
        assert!(task.poll().unwrap().is_empty());
        assert!(task.state().is_idle());
        assert!(marker_path(&path, ".PROCESSING").exists());
    }

    #[test]
    fn test_claim_io_error_returns_to_caller() {
        let mut fx = Fixture::new();
        // The marker would have to live below a regular file
        fx.config.processing_file_extension = "/x".to_string();
        let path = fx.write("a.csv", 2);

        let mut task = SpoolTask::new(fx.context());
        for _ in 0..3 {
            assert!(task.poll().unwrap().is_empty());
            assert!(task.state().is_idle());
        }
        assert!(path.exists());
        assert_eq!(std::fs::read_dir(&fx.config.error_path).unwrap().count(), 0);
    }

    #[test]
    fn test_offset_load_failure_releases_claim() {
        let mut fx = Fixture::new();
        fx.config.halt_on_error = true;
        let path = fx.write("a.csv", 2);
        let mut ctx = TaskContext::from_config(&fx.config, Arc::new(UnreadableOffsets)).unwrap();

        let t = ctx.step(TaskState::Claiming(fx.meta(&path))).unwrap();
        assert!(matches!(t.next, TaskState::Opening { .. }));
        let t = ctx.step(t.next).unwrap();

        assert!(t.next.is_idle());
        assert!(path.exists());
        assert!(!marker_path(&path, ".PROCESSING").exists());
        assert_eq!(std::fs::read_dir(&fx.config.error_path).unwrap().count(), 0);
    }

    #[test]
    fn test_poll_returns_between_files() {
        let mut fx = Fixture::new();
        fx.config.batch_size = 0;
        fx.write("a.csv", 2);
        fx.write("b.csv", 1);

        let mut task = SpoolTask::new(fx.context());
        assert_eq!(task.poll().unwrap().len(), 2);
        // a.csv is closed, then control comes back before b.csv is claimed
        assert!(task.poll().unwrap().is_empty());
        assert!(fx.config.finished_path.join("a.csv").exists());
        assert!(fx.config.input_path.join("b.csv").exists());

        assert_eq!(task.poll().unwrap().len(), 1);
        assert!(task.poll().unwrap().is_empty());
        assert!(task.poll().unwrap().is_empty());
        assert!(fx.config.finished_path.join("b.csv").exists());
    }
}
