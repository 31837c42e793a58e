//! Stage graph and job driver.
//!
//! A job runs up to two stages against one [`IdRegistry`]:
//!
//! 1. [`Stage::Parent`] sweeps `authors`, `genres` and `books`, allocating
//!    surrogate keys as it goes.
//! 2. [`Stage::Dependent`] sweeps `comments`, resolving book references
//!    through the registry without allocating.
//!
//! Each sweep reads its collection in chunks of `chunk_size`, transforms the
//! chunk and writes it in one target transaction. A failed chunk is rolled
//! back; chunks committed before it stay committed. A stage counts as
//! completed only after the target has been flushed.

use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::models::{Collection, SourceAuthor, SourceBook, SourceComment, SourceGenre};
use crate::reader::StageReader;
use crate::registry::IdRegistry;
use crate::snapshot::{self, RegistrySnapshot};
use crate::source::SourceStore;
use crate::stats::{SweepStats, SweepSummary};
use crate::target::TargetStore;
use crate::transform::{CommentOutcome, RecordTransformer};
use crate::writer::{
    write_in_transaction, AuthorWriter, BookWriter, ChunkWriter, CommentWriter, GenreWriter,
};
use anyhow::{bail, ensure, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Parent,
    Dependent,
}

impl Stage {
    /// Every stage, parents before dependents.
    pub const ALL: [Stage; 2] = [Stage::Parent, Stage::Dependent];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Parent => "parent",
            Stage::Dependent => "dependent",
        }
    }

    /// Collections swept by this stage, in order.
    pub fn collections(self) -> &'static [Collection] {
        match self {
            Stage::Parent => &[Collection::Authors, Collection::Genres, Collection::Books],
            Stage::Dependent => &[Collection::Comments],
        }
    }

    /// Stages that must have completed against the same registry first.
    pub fn requires(self) -> &'static [Stage] {
        match self {
            Stage::Parent => &[],
            Stage::Dependent => &[Stage::Parent],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "parent" => Ok(Stage::Parent),
            "dependent" => Ok(Stage::Dependent),
            other => bail!("Unknown stage: {other} (expected parent or dependent)"),
        }
    }
}

/// What to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// Every stage in dependency order.
    Full,
    /// One stage on its own.
    Stage(Stage),
}

impl Launch {
    pub fn stages(self) -> Vec<Stage> {
        match self {
            Launch::Full => Stage::ALL.to_vec(),
            Launch::Stage(stage) => vec![stage],
        }
    }
}

impl fmt::Display for Launch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Launch::Full => f.write_str("full"),
            Launch::Stage(stage) => write!(f, "stage {stage}"),
        }
    }
}

/// Raised from another thread to stop a job between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub sweeps: Vec<SweepSummary>,
}

impl StageSummary {
    pub fn sweep(&self, collection: Collection) -> Option<&SweepSummary> {
        self.sweeps
            .iter()
            .find(|s| s.collection == Some(collection))
    }

    pub fn read(&self) -> u64 {
        self.sweeps.iter().map(|s| s.read).sum()
    }

    pub fn written(&self) -> u64 {
        self.sweeps.iter().map(|s| s.written).sum()
    }
}

#[derive(Debug)]
pub enum StageOutcome {
    NotRun,
    Completed(StageSummary),
    Failed {
        summary: StageSummary,
        error: anyhow::Error,
    },
}

impl StageOutcome {
    pub fn summary(&self) -> Option<&StageSummary> {
        match self {
            StageOutcome::NotRun => None,
            StageOutcome::Completed(summary) | StageOutcome::Failed { summary, .. } => {
                Some(summary)
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed(_))
    }
}

/// Terminal status of a launch plus what each stage did (or that it never ran).
#[derive(Debug)]
pub struct JobReport {
    pub status: JobStatus,
    pub stages: BTreeMap<Stage, StageOutcome>,
}

impl JobReport {
    fn new() -> Self {
        Self {
            status: JobStatus::Completed,
            stages: Stage::ALL
                .iter()
                .map(|&stage| (stage, StageOutcome::NotRun))
                .collect(),
        }
    }

    pub fn stage(&self, stage: Stage) -> &StageOutcome {
        static NOT_RUN: StageOutcome = StageOutcome::NotRun;
        self.stages.get(&stage).unwrap_or(&NOT_RUN)
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// The error that failed the job, if any.
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.stages.values().find_map(|outcome| match outcome {
            StageOutcome::Failed { error, .. } => Some(error),
            _ => None,
        })
    }

    /// Typed cause of the failure, when it is one of ours.
    pub fn migration_error(&self) -> Option<&MigrationError> {
        self.error().and_then(|e| e.downcast_ref::<MigrationError>())
    }
}

/// One migration run: owns the registry, borrows both stores.
pub struct MigrationJob<'a> {
    source: &'a dyn SourceStore,
    target: &'a mut dyn TargetStore,
    registry: IdRegistry,
    completed: BTreeSet<Stage>,
    config: MigrationConfig,
    cancel: CancelFlag,
}

impl<'a> MigrationJob<'a> {
    /// Loads the registry snapshot named by `config.snapshot_path`, if any.
    pub fn new(
        source: &'a dyn SourceStore,
        target: &'a mut dyn TargetStore,
        config: MigrationConfig,
    ) -> Result<Self> {
        ensure!(config.chunk_size > 0, "Chunk size must be at least 1");

        let registry = IdRegistry::new();
        let mut completed = BTreeSet::new();
        if let Some(path) = &config.snapshot_path {
            if let Some(snapshot) = snapshot::load_if_valid(path)? {
                completed = snapshot.restore_into(&registry);
                info!(
                    path = %path.display(),
                    stages = ?completed,
                    "Resuming from registry snapshot"
                );
            }
        }

        Ok(Self {
            source,
            target,
            registry,
            completed,
            config,
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &IdRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> IdRegistry {
        self.registry
    }

    pub fn completed_stages(&self) -> &BTreeSet<Stage> {
        &self.completed
    }

    /// Forgets every mapping and every completed stage. The snapshot file,
    /// if any, is left alone until the next save.
    pub fn clear_mappings(&mut self) {
        self.registry.clear();
        self.completed.clear();
        info!("Registry cleared");
    }

    pub fn launch(&mut self, launch: Launch) -> JobReport {
        let start = Instant::now();
        let mut report = JobReport::new();
        info!(%launch, chunk_size = self.config.chunk_size, "Job started");

        for stage in launch.stages() {
            let stage_start = Instant::now();
            let mut summary = StageSummary::default();
            let result = self
                .check_prerequisites(stage)
                .and_then(|()| self.run_stage(stage, &mut summary))
                .and_then(|()| self.target.flush())
                .and_then(|()| {
                    self.completed.insert(stage);
                    self.persist_registry()
                });

            match result {
                Ok(()) => {
                    info!(
                        %stage,
                        read = summary.read(),
                        written = summary.written(),
                        duration_secs = stage_start.elapsed().as_secs_f64(),
                        "Stage complete"
                    );
                    report.stages.insert(stage, StageOutcome::Completed(summary));
                }
                Err(e) => {
                    error!(%stage, "Stage failed: {:#}", e);
                    report.status = JobStatus::Failed;
                    report
                        .stages
                        .insert(stage, StageOutcome::Failed { summary, error: e });
                    break;
                }
            }
        }

        info!(
            status = ?report.status,
            duration_secs = start.elapsed().as_secs_f64(),
            "Job finished"
        );
        report
    }

    fn check_prerequisites(&self, stage: Stage) -> Result<()> {
        for &requires in stage.requires() {
            if !self.completed.contains(&requires) {
                return Err(MigrationError::MissingPrerequisite { stage, requires }.into());
            }
        }
        Ok(())
    }

    fn persist_registry(&self) -> Result<()> {
        persist(&self.config, &self.registry, &self.completed)
    }

    fn run_stage(&mut self, stage: Stage, summary: &mut StageSummary) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(MigrationError::Cancelled.into());
        }
        info!(%stage, collections = ?stage.collections(), "Stage started");

        let mut sweep = Sweep {
            source: self.source,
            target: &mut *self.target,
            registry: &self.registry,
            completed: &self.completed,
            config: &self.config,
            cancel: &self.cancel,
        };

        match stage {
            Stage::Parent => {
                sweep.run(Collection::Authors, &AuthorWriter, summary, |t, author: SourceAuthor, _| {
                    Ok(t.map_author(Some(&author)))
                })?;
                sweep.run(Collection::Genres, &GenreWriter, summary, |t, genre: SourceGenre, _| {
                    Ok(t.map_genre(Some(&genre)))
                })?;
                sweep.run(Collection::Books, &BookWriter, summary, |t, book: SourceBook, _| {
                    Ok(t.map_book(Some(&book)))
                })?;
            }
            Stage::Dependent => {
                let writer = CommentWriter {
                    dedupe: self.config.dedupe_comments,
                };
                sweep.run(Collection::Comments, &writer, summary, |t, comment: SourceComment, stats| {
                    match t.map_comment(&comment)? {
                        CommentOutcome::Mapped(mapped) => Ok(Some(mapped)),
                        CommentOutcome::Detached(mapped) => {
                            stats.inc_unresolved();
                            Ok(Some(mapped))
                        }
                        CommentOutcome::Skipped => {
                            stats.inc_unresolved();
                            Ok(None)
                        }
                    }
                })?;
            }
        }
        Ok(())
    }
}

fn persist(
    config: &MigrationConfig,
    registry: &IdRegistry,
    completed: &BTreeSet<Stage>,
) -> Result<()> {
    match &config.snapshot_path {
        Some(path) => snapshot::save(path, &RegistrySnapshot::capture(registry, completed)),
        None => Ok(()),
    }
}

/// Borrowed view of a job used while sweeping one collection.
struct Sweep<'j> {
    source: &'j dyn SourceStore,
    target: &'j mut dyn TargetStore,
    registry: &'j IdRegistry,
    completed: &'j BTreeSet<Stage>,
    config: &'j MigrationConfig,
    cancel: &'j CancelFlag,
}

impl Sweep<'_> {
    fn run<S, T, W, M>(
        &mut self,
        collection: Collection,
        writer: &W,
        summary: &mut StageSummary,
        map: M,
    ) -> Result<()>
    where
        S: DeserializeOwned,
        W: ChunkWriter<T>,
        M: Fn(&RecordTransformer<'_>, S, &SweepStats) -> Result<Option<T>>,
    {
        let stats = SweepStats::new();
        let result = self.drive(collection, writer, &map, &stats);
        summary.sweeps.push(stats.summary(collection));
        result
    }

    fn drive<S, T, W, M>(
        &mut self,
        collection: Collection,
        writer: &W,
        map: &M,
        stats: &SweepStats,
    ) -> Result<()>
    where
        S: DeserializeOwned,
        W: ChunkWriter<T>,
        M: Fn(&RecordTransformer<'_>, S, &SweepStats) -> Result<Option<T>>,
    {
        let transformer = RecordTransformer::new(self.registry, self.config.unresolved_policy);
        let mut reader: StageReader<'_, S> = StageReader::new(self.source, collection);
        let pb = progress_bar(self.config.show_progress, collection);

        loop {
            if self.cancel.is_cancelled() {
                pb.abandon_with_message(format!("{collection}: cancelled"));
                warn!(%collection, read = stats.read(), "Sweep cancelled between chunks");
                return Err(MigrationError::Cancelled.into());
            }

            let chunk = reader.read_chunk(self.config.chunk_size)?;
            if chunk.is_empty() {
                break;
            }
            stats.add_read(chunk.len() as u64);

            let mut records = Vec::with_capacity(chunk.len());
            for source in chunk {
                if let Some(record) = map(&transformer, source, stats)? {
                    records.push(record);
                }
            }

            write_in_transaction(writer, &mut *self.target, &records, stats)?;
            persist(self.config, self.registry, self.completed)?;
            pb.set_position(stats.read());
        }

        pb.finish_and_clear();
        info!(
            %collection,
            read = stats.read(),
            written = stats.written(),
            skipped_existing = stats.skipped(),
            unresolved = stats.unresolved(),
            chunks = stats.chunks(),
            "Sweep complete"
        );
        Ok(())
    }
}

fn progress_bar(show: bool, collection: Collection) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} {pos} records") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message(format!("Migrating {collection}"));
    pb
}
