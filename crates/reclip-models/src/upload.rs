//! Uploaded media assets.

use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fallback name when an upload has no usable file name.
pub const DEFAULT_UPLOAD_NAME: &str = "upload";

/// Unique identifier for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct UploadId(pub String);

impl UploadId {
    /// Generate a new random upload ID (32 lowercase hex chars).
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this ID is safe to use as a path component.
    pub fn is_valid(&self) -> bool {
        is_valid_id(&self.0)
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UploadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A stored upload. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Upload {
    pub id: UploadId,
    /// Name as supplied by the client
    pub original_name: String,
    /// Absolute path of the stored bytes
    #[schemars(with = "String")]
    pub stored_path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Optional client tag (e.g. "a", "b", "overlay")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Upload {
    /// Sanitized file name used when staging into a job directory.
    pub fn safe_name(&self) -> String {
        sanitize_filename(&self.original_name)
    }
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex is valid"))
}

/// Reduce a client-supplied name to its basename with only `[A-Za-z0-9._-]`.
///
/// Runs of other characters collapse to a single `_`. Names that end up
/// empty, or that consist only of dots, fall back to `"upload"`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let safe = unsafe_chars().replace_all(base, "_").into_owned();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        DEFAULT_UPLOAD_NAME.to_string()
    } else {
        safe
    }
}

/// Validate an opaque identifier before it touches the filesystem.
///
/// Accepts 8-64 characters of ASCII alphanumerics and hyphens.
pub fn is_valid_id(id: &str) -> bool {
    if id.len() < 8 || id.len() > 64 {
        return false;
    }
    id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_upload_id_is_hex() {
        let id = UploadId::new();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(id.is_valid());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("clip 01.mp4"), "clip_01.mp4");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\videos\\intro (final).mov"), "intro_final_.mov");
        assert_eq!(sanitize_filename("été.mp4"), "_t_.mp4");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename("dir/"), "upload");
    }

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id("12345678"));
        assert!(is_valid_id("0f9c2d4e6a8b4c1d9e7f5a3b2c1d0e9f"));
        assert!(is_valid_id("abc-1234-def"));
    }

    #[test]
    fn test_invalid_ids() {
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("short"));
        assert!(!is_valid_id("has space1"));
        assert!(!is_valid_id("../../etc/x"));
        assert!(!is_valid_id("has.dot.in.it"));
        assert!(!is_valid_id(&"a".repeat(65)));
    }
}
