//! Pairing of A/B clips by file stem.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Extensions (lowercase, without dot) treated as video files.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "3gp",
];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

#[derive(Debug, PartialEq, Eq)]
enum Chunk {
    Num(String),
    Text(String),
}

impl Chunk {
    fn compare(&self, other: &Chunk) -> Ordering {
        match (self, other) {
            (Chunk::Num(a), Chunk::Num(b)) => {
                let a = a.trim_start_matches('0');
                let b = b.trim_start_matches('0');
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
            (Chunk::Num(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Num(_)) => Ordering::Greater,
        }
    }
}

fn chunks(s: &str) -> Vec<Chunk> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut in_digits = false;

    for c in s.chars() {
        let digit = c.is_ascii_digit();
        if !buf.is_empty() && digit != in_digits {
            let done = std::mem::take(&mut buf);
            out.push(if in_digits { Chunk::Num(done) } else { Chunk::Text(done) });
        }
        in_digits = digit;
        buf.extend(c.to_lowercase());
    }
    if !buf.is_empty() {
        out.push(if in_digits { Chunk::Num(buf) } else { Chunk::Text(buf) });
    }
    out
}

/// Case-insensitive natural ordering: `clip2` sorts before `clip10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (ca, cb) = (chunks(a), chunks(b));
    for (x, y) in ca.iter().zip(cb.iter()) {
        let ord = x.compare(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    ca.len().cmp(&cb.len()).then_with(|| a.cmp(b))
}

/// A matched A/B pair sharing a stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPair {
    pub stem: String,
    pub a: PathBuf,
    pub b: PathBuf,
}

/// Outcome of matching two clip lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet {
    /// Pairs in natural stem order
    pub pairs: Vec<VideoPair>,
    pub only_a: Vec<String>,
    pub only_b: Vec<String>,
}

fn index_by_stem(files: &[PathBuf]) -> BTreeMap<String, PathBuf> {
    let mut index = BTreeMap::new();
    for path in files.iter().filter(|p| is_video_file(p)) {
        if let Some(stem) = stem(path) {
            // First file wins when two share a stem.
            index.entry(stem).or_insert_with(|| path.clone());
        }
    }
    index
}

/// Match A and B clips by file stem. Non-video files are ignored.
pub fn find_matches(files_a: &[PathBuf], files_b: &[PathBuf]) -> MatchSet {
    let a = index_by_stem(files_a);
    let mut b = index_by_stem(files_b);

    let mut set = MatchSet::default();
    for (stem, path_a) in a {
        match b.remove(&stem) {
            Some(path_b) => set.pairs.push(VideoPair {
                stem,
                a: path_a,
                b: path_b,
            }),
            None => set.only_a.push(stem),
        }
    }
    set.only_b = b.into_keys().collect();

    set.pairs.sort_by(|x, y| natural_cmp(&x.stem, &y.stem));
    set.only_a.sort_by(|x, y| natural_cmp(x, y));
    set.only_b.sort_by(|x, y| natural_cmp(x, y));
    set
}

/// Video files from `files`, ordered by lowercase file name.
pub fn sorted_videos(files: &[PathBuf]) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = files.iter().filter(|p| is_video_file(p)).cloned().collect();
    videos.sort_by_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
    videos
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(dir: &str, names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| Path::new(dir).join(n)).collect()
    }

    #[test]
    fn test_natural_cmp() {
        let mut names = vec!["clip10", "Clip2", "clip1", "clip02b", "intro"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["clip1", "Clip2", "clip02b", "clip10", "intro"]);
        assert_eq!(natural_cmp("a", "a"), Ordering::Equal);
    }

    #[test]
    fn test_find_matches() {
        let a = paths("a", &["shot10.mp4", "shot2.mov", "only_a.mp4", "notes.txt"]);
        let b = paths("b", &["shot2.MP4", "shot10.mkv", "only_b.webm"]);

        let set = find_matches(&a, &b);
        let stems: Vec<_> = set.pairs.iter().map(|p| p.stem.as_str()).collect();
        assert_eq!(stems, vec!["shot2", "shot10"]);
        assert_eq!(set.pairs[0].a, Path::new("a/shot2.mov"));
        assert_eq!(set.pairs[0].b, Path::new("b/shot2.MP4"));
        assert_eq!(set.only_a, vec!["only_a"]);
        assert_eq!(set.only_b, vec!["only_b"]);
    }

    #[test]
    fn test_find_matches_no_overlap() {
        let set = find_matches(&paths("a", &["x.mp4"]), &paths("b", &["y.mp4"]));
        assert!(set.pairs.is_empty());
        assert_eq!(set.only_a.len(), 1);
        assert_eq!(set.only_b.len(), 1);
    }

    #[test]
    fn test_sorted_videos() {
        let files = paths("ugc", &["b.mp4", "A.mov", "readme.md", "c.webm"]);
        let sorted = sorted_videos(&files);
        let names: Vec<_> = sorted
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["A.mov", "b.mp4", "c.webm"]);
    }
}
