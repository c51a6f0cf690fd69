//! Per-job directory layout.
//!
//! ```text
//! <jobs_dir>/<job_id>/
//!     job.json        (filesystem store only)
//!     logs.txt        (filesystem store only)
//!     input/          staged uploads
//!     work/           renderer scratch space
//!     output/         rendered files; job outputs are relative to this
//!     archives/       built zip bundles
//! ```

use std::path::{Component, Path, PathBuf};

use reclip_models::{ArchiveVariant, JobId};

use crate::error::{StorageError, StorageResult};

/// Resolves paths inside the shared jobs directory.
#[derive(Debug, Clone)]
pub struct JobLayout {
    root: PathBuf,
}

impl JobLayout {
    pub fn new(jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: jobs_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory owned by one job. Rejects ids that are not path-safe.
    pub fn job_dir(&self, id: &JobId) -> StorageResult<PathBuf> {
        if !id.is_valid() {
            return Err(StorageError::invalid_id(id.as_str()));
        }
        Ok(self.root.join(id.as_str()))
    }

    pub fn input_dir(&self, id: &JobId) -> StorageResult<PathBuf> {
        Ok(self.job_dir(id)?.join("input"))
    }

    pub fn work_dir(&self, id: &JobId) -> StorageResult<PathBuf> {
        Ok(self.job_dir(id)?.join("work"))
    }

    pub fn output_dir(&self, id: &JobId) -> StorageResult<PathBuf> {
        Ok(self.job_dir(id)?.join("output"))
    }

    pub fn archive_dir(&self, id: &JobId) -> StorageResult<PathBuf> {
        Ok(self.job_dir(id)?.join("archives"))
    }

    pub fn archive_path(&self, id: &JobId, variant: ArchiveVariant) -> StorageResult<PathBuf> {
        Ok(self.archive_dir(id)?.join(variant.file_name()))
    }

    /// Absolute path of a job-relative output, or `None` if `rel` could
    /// escape the output directory.
    pub fn output_file(&self, id: &JobId, rel: &str) -> StorageResult<Option<PathBuf>> {
        let output_dir = self.output_dir(id)?;
        Ok(safe_relative(rel).map(|rel| output_dir.join(rel)))
    }
}

/// Accept only plain relative paths made of normal components.
pub fn safe_relative(rel: &str) -> Option<PathBuf> {
    if rel.is_empty() || rel.contains('\\') {
        return None;
    }
    let path = Path::new(rel);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// Render `path` relative to `base` with `/` separators.
pub fn to_relative_posix(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_paths() {
        let layout = JobLayout::new("/data/jobs");
        let id = JobId::from_string("0123456789abcdef");
        assert_eq!(layout.job_dir(&id).unwrap(), PathBuf::from("/data/jobs/0123456789abcdef"));
        assert_eq!(
            layout.archive_path(&id, ArchiveVariant::Flat).unwrap(),
            PathBuf::from("/data/jobs/0123456789abcdef/archives/flat.zip")
        );
    }

    #[test]
    fn test_rejects_unsafe_job_id() {
        let layout = JobLayout::new("/data/jobs");
        let err = layout.job_dir(&JobId::from_string("../../etc")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_safe_relative() {
        assert_eq!(safe_relative("1/clip.mp4"), Some(PathBuf::from("1/clip.mp4")));
        assert_eq!(safe_relative("./clip.mp4"), Some(PathBuf::from("clip.mp4")));
        assert_eq!(safe_relative("../secret"), None);
        assert_eq!(safe_relative("1/../../secret"), None);
        assert_eq!(safe_relative("/etc/passwd"), None);
        assert_eq!(safe_relative("a\\b"), None);
        assert_eq!(safe_relative(""), None);
        assert_eq!(safe_relative("."), None);
    }

    #[test]
    fn test_to_relative_posix() {
        let base = Path::new("/jobs/x/output");
        assert_eq!(
            to_relative_posix(base, Path::new("/jobs/x/output/3/clip.mp4")),
            Some("3/clip.mp4".to_string())
        );
        assert_eq!(to_relative_posix(base, Path::new("/elsewhere/clip.mp4")), None);
        assert_eq!(to_relative_posix(base, base), None);
    }
}
