//! Core types and events

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Position of a file entry within its catalog; stable for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub usize);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One independently fetchable article of a catalog file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRef {
    /// Article message id, without angle brackets
    pub id: String,
    /// Newsgroup to select before fetching (the entry's first group)
    pub group: String,
    /// Encoded size declared by the catalog
    pub bytes: u64,
    /// 1-based sequence number declared by the catalog
    pub sequence: u32,
    /// Catalog file this fragment belongs to
    pub file: FileId,
}

/// A decoded article payload plus the part metadata carried by its encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPart {
    /// Name of the output file this part belongs to
    pub output_name: String,
    /// 1-based part index
    pub part_index: u32,
    /// Whether this is the last part of the set; its index is then the part count
    pub is_terminal: bool,
    /// Decoded bytes
    pub payload: Vec<u8>,
    /// Declared CRC-32 of the payload, if the encoder supplied one
    pub checksum_hex: Option<String>,
    /// CRC-32 of the payload as decoded
    pub computed_checksum: u32,
    /// Article the part was decoded from
    pub fragment_id: String,
}

/// Which retrieval pass is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    /// Everything except repair data
    Primary,
    /// Repair data only, run after a broken primary pass
    Repair,
}

/// Pipeline stage a fragment failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Session checkout, group selection, body fetch or working-file write
    Download,
    /// yEnc decoding or part-file write
    Decode,
    /// CRC verification (only fatal for the part when corrupt parts are discarded)
    Verify,
}

/// Events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A retrieval pass started
    PassStarted {
        /// Which pass
        pass: Pass,
        /// Number of catalog files in the pass
        files: usize,
        /// Number of fragments queued
        fragments: usize,
        /// Sum of declared fragment sizes
        total_bytes: u64,
    },

    /// A fragment could not be retrieved or decoded
    FragmentFailed {
        /// Article message id
        fragment_id: String,
        /// Where it failed
        stage: Stage,
        /// Failure description
        error: String,
    },

    /// A decoded part did not match its declared CRC
    ChecksumMismatch {
        /// Output file name
        output_name: String,
        /// 1-based part index
        part_index: u32,
    },

    /// An output file was reassembled
    FileJoined {
        /// Output file name
        name: String,
        /// Final path on disk
        path: PathBuf,
        /// Parts appended to the output
        parts_written: u32,
        /// Parts skipped because they were missing or unreadable
        parts_missing: u32,
    },

    /// A retrieval pass drained
    PassComplete {
        /// Which pass
        pass: Pass,
        /// Fragments recorded as broken
        broken: u64,
        /// Fragments queued
        total: u64,
    },
}

/// Outcome of retrieving one catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Job name derived from the catalog file name
    pub job: String,
    /// Passes that ran, in order
    pub passes: Vec<Pass>,
    /// Broken fragments recorded in the final pass
    pub broken: u64,
    /// Fragments queued in the final pass
    pub total: u64,
    /// Directory holding the reassembled files
    pub download_dir: PathBuf,
}

impl RunSummary {
    /// Whether the final pass finished without breakage
    pub fn is_clean(&self) -> bool {
        self.broken == 0
    }
}
