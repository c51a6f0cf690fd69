//! Filesystem helpers for atomic writes and staging.
//!
//! Readers of `job.json` and of built archives must never observe a partial
//! file, so every durable write lands in a temp sibling first and is then
//! renamed into place.

use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

/// A unique temp path next to `path` (same directory, so rename stays atomic).
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// Write `bytes` to `path` via a temp sibling and rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp = temp_sibling(path);
    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }

    fs::rename(&tmp, path).await.map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        e
    })
}

/// Hard-link `src` to `dst`, copying when linking is not possible
/// (different filesystem, unsupported by the platform).
pub async fn link_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::hard_link(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            tracing::debug!(
                "Hard link failed ({}), copying instead: {} -> {}",
                e,
                src.display(),
                dst.display()
            );
            fs::copy(src, dst).await.map(|_| ())
        }
    }
}

/// First non-existing path among `dir/name`, `dir/stem_1.ext`, `dir/stem_2.ext`, ...
pub async fn unique_path(dir: &Path, name: &str) -> std::io::Result<PathBuf> {
    let candidate = dir.join(name);
    if !fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let (stem, ext) = split_name(name);
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{}_{}{}", stem, n, ext));
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Split `clip.final.mp4` into (`clip.final`, `.mp4`). Dotfiles keep their name as stem.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("job.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(fs::read_to_string(&path).await.unwrap(), "second");
        let mut entries = fs::read_dir(path.parent().unwrap()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["job.json".to_string()], "no temp files left behind");
    }

    #[tokio::test]
    async fn test_link_or_copy() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("source.mp4");
        let dst = dir.path().join("input").join("a").join("source.mp4");
        fs::write(&src, b"video").await.unwrap();

        link_or_copy(&src, &dst).await.unwrap();
        assert_eq!(fs::read(&dst).await.unwrap(), b"video");

        let err = link_or_copy(&src, &dst).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_unique_path() {
        let dir = TempDir::new().unwrap();
        assert_eq!(unique_path(dir.path(), "a.mp4").await.unwrap(), dir.path().join("a.mp4"));

        fs::write(dir.path().join("a.mp4"), b"").await.unwrap();
        fs::write(dir.path().join("a_1.mp4"), b"").await.unwrap();
        assert_eq!(unique_path(dir.path(), "a.mp4").await.unwrap(), dir.path().join("a_2.mp4"));
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("clip.mp4"), ("clip", ".mp4"));
        assert_eq!(split_name("clip.final.mov"), ("clip.final", ".mov"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name(".hidden"), (".hidden", ""));
    }
}
