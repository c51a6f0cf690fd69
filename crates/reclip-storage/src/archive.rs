//! Archive packaging engine.
//!
//! Archives are derived from a finished job's outputs, built lazily on
//! first request and at most once per `(job, variant)`:
//!
//! - a per-`(job, variant)` async mutex admits a single builder per process;
//! - the zip is written to a temp sibling and renamed into place, so the
//!   final path only ever holds a complete archive;
//! - an existing archive file is the readiness signal, and the summary flag
//!   is flipped only after the rename.
//!
//! Entries are written in sorted order with a fixed timestamp, so rebuilding
//! from the same outputs yields byte-identical archives.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use reclip_models::{ArchiveVariant, Job, JobId, JobStatus};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{StorageError, StorageResult};
use crate::fs_utils::{split_name, temp_sibling};
use crate::layout::{safe_relative, JobLayout};
use crate::store::JobStore;

type BuildKey = (JobId, ArchiveVariant);

/// Builds and caches archive bundles for finished jobs.
pub struct Packager {
    layout: JobLayout,
    store: Arc<dyn JobStore>,
    locks: StdMutex<HashMap<BuildKey, Arc<Mutex<()>>>>,
    builds: AtomicU64,
}

impl Packager {
    pub fn new(layout: JobLayout, store: Arc<dyn JobStore>) -> Self {
        Self {
            layout,
            store,
            locks: StdMutex::new(HashMap::new()),
            builds: AtomicU64::new(0),
        }
    }

    /// Number of archives this packager has actually built.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    fn lock_for(&self, id: &JobId, variant: ArchiveVariant) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry((id.clone(), variant)).or_default())
    }

    /// Drop the map entry once no other builder holds the lock.
    fn release(&self, id: &JobId, variant: ArchiveVariant, lock: Arc<Mutex<()>>) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&(id.clone(), variant));
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether the archive file exists. Never builds.
    pub async fn is_built(&self, id: &JobId, variant: ArchiveVariant) -> StorageResult<bool> {
        let path = self.layout.archive_path(id, variant)?;
        Ok(fs::try_exists(path).await?)
    }

    /// Return the archive for `(id, variant)`, building it if needed.
    ///
    /// Fails with `UnsupportedVariant` when the job type does not offer the
    /// variant, `ArchiveNotReady` while the job is not finished, and
    /// `NoOutputs` when it finished without producing anything.
    pub async fn ensure(&self, id: &JobId, variant: ArchiveVariant) -> StorageResult<PathBuf> {
        let job = self.store.get(id).await?;
        check_packageable(&job, variant)?;

        let path = self.layout.archive_path(id, variant)?;
        let lock = self.lock_for(id, variant);
        let built = {
            let _guard = lock.lock().await;
            self.build_once(&job, variant, &path).await
        };
        self.release(id, variant, lock);
        built?;

        if !job.is_archive_marked_ready(variant) {
            self.store.mark_archive_ready(id, variant).await?;
        }
        Ok(path)
    }

    /// Build unless the archive already exists. Callers hold the build lock.
    async fn build_once(&self, job: &Job, variant: ArchiveVariant, path: &Path) -> StorageResult<()> {
        if fs::try_exists(path).await? {
            debug!(job_id = %job.id, variant = %variant, "Archive already built");
            Ok(())
        } else {
            self.build(job, variant, path).await
        }
    }

    /// Build every variant offered for the job. Used for eager packaging.
    pub async fn ensure_all(&self, id: &JobId) -> StorageResult<Vec<PathBuf>> {
        let job = self.store.get(id).await?;
        let mut paths = Vec::new();
        for variant in job.job_type.archive_variants() {
            paths.push(self.ensure(id, *variant).await?);
        }
        Ok(paths)
    }

    async fn build(&self, job: &Job, variant: ArchiveVariant, dest: &Path) -> StorageResult<()> {
        let started = Instant::now();
        let output_dir = self.layout.output_dir(&job.id)?;
        let entries = plan_entries(&output_dir, &job.outputs, variant)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = temp_sibling(dest);

        let tmp_for_task = tmp.clone();
        let written = tokio::task::spawn_blocking(move || write_zip(&tmp_for_task, &entries))
            .await
            .map_err(|e| StorageError::archive_failed(format!("archive task panicked: {}", e)))?;

        if let Err(e) = written {
            warn!(job_id = %job.id, variant = %variant, "Archive build failed: {}", e);
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp, dest).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("reclip_archive_builds_total", "variant" => variant.as_str()).increment(1);
        metrics::histogram!("reclip_archive_build_duration_seconds", "variant" => variant.as_str())
            .record(started.elapsed().as_secs_f64());
        info!(
            job_id = %job.id,
            variant = %variant,
            files = job.outputs.len(),
            "Built archive in {:?}",
            started.elapsed()
        );
        Ok(())
    }
}

fn check_packageable(job: &Job, variant: ArchiveVariant) -> StorageResult<()> {
    if !job.job_type.supports_variant(variant) {
        return Err(StorageError::UnsupportedVariant {
            job_id: job.id.to_string(),
            variant,
        });
    }
    if job.status != JobStatus::Finished {
        return Err(StorageError::ArchiveNotReady {
            job_id: job.id.to_string(),
            variant,
            status: job.status,
        });
    }
    if job.outputs.is_empty() {
        return Err(StorageError::NoOutputs(job.id.to_string()));
    }
    Ok(())
}

/// Map outputs to `(source file, archive entry name)` pairs sorted by entry name.
fn plan_entries(
    output_dir: &Path,
    outputs: &[String],
    variant: ArchiveVariant,
) -> StorageResult<Vec<(PathBuf, String)>> {
    let mut taken = HashSet::new();
    let mut entries = Vec::with_capacity(outputs.len());

    for rel in outputs {
        let rel_path = safe_relative(rel)
            .ok_or_else(|| StorageError::archive_failed(format!("unsafe output path: {}", rel)))?;
        let name = if variant.preserves_directories() {
            rel.trim_start_matches("./").to_string()
        } else {
            let base = rel_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| rel.clone());
            dedupe_name(&base, &taken)
        };
        taken.insert(name.clone());
        entries.push((output_dir.join(rel_path), name));
    }

    entries.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(entries)
}

/// `clip.mp4`, then `clip (2).mp4`, `clip (3).mp4`, ...
fn dedupe_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    let (stem, ext) = split_name(name);
    let mut n = 2u32;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

fn write_zip(dest: &Path, entries: &[(PathBuf, String)]) -> StorageResult<()> {
    let file = std::fs::File::create(dest)?;
    let mut zip = ZipWriter::new(std::io::BufWriter::new(file));

    for (src, name) in entries {
        zip.start_file(name.as_str(), entry_options())?;
        let mut input = std::fs::File::open(src)?;
        std::io::copy(&mut input, &mut zip)?;
    }

    let mut out = zip.finish()?;
    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(())
}
