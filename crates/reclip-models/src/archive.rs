//! Archive packaging variants.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::JobType;

/// A named layout for packaging a job's outputs into one zip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveVariant {
    /// Job-relative paths preserved as-is
    Default,
    /// Every file at the archive root, colliding names deduplicated
    Flat,
    /// Job-relative directory structure preserved
    Nested,
}

impl ArchiveVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveVariant::Default => "default",
            ArchiveVariant::Flat => "flat",
            ArchiveVariant::Nested => "nested",
        }
    }

    /// Summary key flipped to `true` once this archive exists on disk.
    pub fn ready_key(&self) -> &'static str {
        match self {
            ArchiveVariant::Default => "zip_ready",
            ArchiveVariant::Flat => "flat_zip_ready",
            ArchiveVariant::Nested => "nested_zip_ready",
        }
    }

    /// File name of the built archive inside the job's archive directory.
    pub fn file_name(&self) -> String {
        format!("{}.zip", self.as_str())
    }

    /// Name offered to clients downloading the archive.
    pub fn download_name(&self, job_id: &str) -> String {
        match self {
            ArchiveVariant::Default => format!("{}_outputs.zip", job_id),
            other => format!("{}_{}_outputs.zip", job_id, other.as_str()),
        }
    }

    /// Whether files keep their relative directories inside the archive.
    pub fn preserves_directories(&self) -> bool {
        !matches!(self, ArchiveVariant::Flat)
    }
}

impl fmt::Display for ArchiveVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized variant name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown archive variant: {0}")]
pub struct UnknownVariant(pub String);

impl FromStr for ArchiveVariant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "default" => Ok(ArchiveVariant::Default),
            "flat" => Ok(ArchiveVariant::Flat),
            "nested" => Ok(ArchiveVariant::Nested),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl JobType {
    /// Archive variants offered for jobs of this type.
    pub fn archive_variants(&self) -> &'static [ArchiveVariant] {
        match self {
            JobType::Concat => &[ArchiveVariant::Flat, ArchiveVariant::Nested, ArchiveVariant::Default],
            JobType::Ugc => &[ArchiveVariant::Default],
        }
    }

    pub fn supports_variant(&self, variant: ArchiveVariant) -> bool {
        self.archive_variants().contains(&variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variant() {
        assert_eq!("flat".parse::<ArchiveVariant>().unwrap(), ArchiveVariant::Flat);
        assert_eq!("NESTED".parse::<ArchiveVariant>().unwrap(), ArchiveVariant::Nested);
        assert_eq!("".parse::<ArchiveVariant>().unwrap(), ArchiveVariant::Default);
        assert!("tarball".parse::<ArchiveVariant>().is_err());
    }

    #[test]
    fn test_variants_per_job_type() {
        assert!(JobType::Concat.supports_variant(ArchiveVariant::Flat));
        assert!(JobType::Concat.supports_variant(ArchiveVariant::Nested));
        assert!(JobType::Ugc.supports_variant(ArchiveVariant::Default));
        assert!(!JobType::Ugc.supports_variant(ArchiveVariant::Flat));
    }

    #[test]
    fn test_names() {
        assert_eq!(ArchiveVariant::Flat.ready_key(), "flat_zip_ready");
        assert_eq!(ArchiveVariant::Default.ready_key(), "zip_ready");
        assert_eq!(ArchiveVariant::Nested.file_name(), "nested.zip");
        assert_eq!(ArchiveVariant::Default.download_name("abc"), "abc_outputs.zip");
        assert_eq!(ArchiveVariant::Flat.download_name("abc"), "abc_flat_outputs.zip");
    }
}
