//! NZB catalog parsing
//!
//! An NZB lists the files of a post, the groups each was posted to, and the
//! articles ("segments") each file was split into.

use crate::error::{Error, Result};
use crate::types::{FileId, FragmentRef};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::LazyLock;

static EXTENSION: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\.\w+").unwrap()
});

/// A parsed catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nzb {
    /// File entries in document order
    pub files: Vec<FileEntry>,
}

/// One file of the post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Poster address
    pub poster: String,
    /// Article subject; carries the file name
    pub subject: String,
    /// Post date, when the catalog supplies a valid one
    pub date: Option<DateTime<Utc>>,
    /// Groups the file was posted to, deduplicated, in catalog order
    pub groups: Vec<String>,
    /// Articles making up the file
    pub segments: Vec<Segment>,
}

/// One article of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Message id without angle brackets
    pub message_id: String,
    /// Encoded article size
    pub bytes: u64,
    /// 1-based position within the file
    pub number: u32,
}

#[derive(Deserialize)]
struct NzbDocument {
    #[serde(rename = "file", default)]
    files: Vec<RawFile>,
}

#[derive(Deserialize)]
struct RawFile {
    #[serde(rename = "@poster", default)]
    poster: String,
    #[serde(rename = "@subject", default)]
    subject: String,
    #[serde(rename = "@date", default)]
    date: Option<i64>,
    #[serde(default)]
    groups: RawGroups,
    #[serde(default)]
    segments: RawSegments,
}

#[derive(Deserialize, Default)]
struct RawGroups {
    #[serde(rename = "group", default)]
    group: Vec<String>,
}

#[derive(Deserialize, Default)]
struct RawSegments {
    #[serde(rename = "segment", default)]
    segment: Vec<RawSegment>,
}

#[derive(Deserialize)]
struct RawSegment {
    #[serde(rename = "@bytes", default)]
    bytes: u64,
    #[serde(rename = "@number", default)]
    number: u32,
    #[serde(rename = "$text", default)]
    message_id: String,
}

impl Nzb {
    /// Parse NZB XML
    pub fn parse(xml: &str) -> Result<Self> {
        let document: NzbDocument = quick_xml::de::from_str(xml)
            .map_err(|e| Error::InvalidNzb(format!("failed to parse NZB: {}", e)))?;

        let files = document
            .files
            .into_iter()
            .map(FileEntry::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { files })
    }

    /// Read and parse an NZB file
    pub fn from_file(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path)?;
        Self::parse(&xml)
    }

    /// Sum of declared segment sizes
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(FileEntry::total_bytes).sum()
    }

    /// Number of segments across all files
    pub fn fragment_count(&self) -> usize {
        self.files.iter().map(|f| f.segments.len()).sum()
    }

    /// Whether the catalog lists no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileEntry {
    /// Last `.ext`-shaped token of the subject, including the dot
    ///
    /// ```
    /// use kumo::nzb::FileEntry;
    ///
    /// let entry = FileEntry {
    ///     poster: String::new(),
    ///     subject: r#"[1/4] "show.vol03+04.par2" yEnc (1/2)"#.to_string(),
    ///     date: None,
    ///     groups: vec![],
    ///     segments: vec![],
    /// };
    /// assert_eq!(entry.extension(), Some(".par2"));
    /// ```
    pub fn extension(&self) -> Option<&str> {
        EXTENSION
            .find_iter(&self.subject)
            .last()
            .map(|m| m.as_str())
    }

    /// Sum of declared segment sizes
    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes).sum()
    }

    /// Fragment references for this file, fetched from its first group
    pub fn fragments(&self, file: FileId) -> Vec<FragmentRef> {
        let group = self.groups.first().cloned().unwrap_or_default();
        self.segments
            .iter()
            .map(|segment| FragmentRef {
                id: segment.message_id.clone(),
                group: group.clone(),
                bytes: segment.bytes,
                sequence: segment.number,
                file,
            })
            .collect()
    }
}

impl TryFrom<RawFile> for FileEntry {
    type Error = Error;

    fn try_from(raw: RawFile) -> Result<Self> {
        let mut groups: Vec<String> = Vec::with_capacity(raw.groups.group.len());
        for group in raw.groups.group {
            let group = group.trim().to_string();
            if !group.is_empty() && !groups.contains(&group) {
                groups.push(group);
            }
        }
        if groups.is_empty() {
            return Err(Error::InvalidNzb(format!(
                "file {:?} lists no groups",
                raw.subject
            )));
        }

        let segments = raw
            .segments
            .segment
            .into_iter()
            .map(|s| {
                let message_id = s
                    .message_id
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string();
                if message_id.is_empty() {
                    return Err(Error::InvalidNzb(format!(
                        "segment {} of {:?} has no message id",
                        s.number, raw.subject
                    )));
                }
                Ok(Segment {
                    message_id,
                    bytes: s.bytes,
                    number: s.number,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if segments.is_empty() {
            return Err(Error::InvalidNzb(format!(
                "file {:?} lists no segments",
                raw.subject
            )));
        }

        Ok(Self {
            poster: raw.poster,
            subject: raw.subject,
            date: raw.date.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            groups,
            segments,
        })
    }
}

/// Job name for a catalog path: the file name without its extension
pub fn job_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string())
}
