//! Block index records and their JSON-lines encoding.

use std::fmt;

use quarry_core::{BlockHeight, MonitorError};
use serde::{Deserialize, Serialize};

/// One of the two alternating log files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogFile {
    A,
    B,
}

impl LogFile {
    pub fn other(self) -> Self {
        match self {
            LogFile::A => LogFile::B,
            LogFile::B => LogFile::A,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            LogFile::A => "fileA.log",
            LogFile::B => "fileB.log",
        }
    }
}

impl fmt::Display for LogFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFile::A => f.write_str("A"),
            LogFile::B => f.write_str("B"),
        }
    }
}

/// Lines `start_line..=end_line` of `file` belong to block `block_height`.
///
/// A block that crosses a rotation has two entries: the tail of the old file
/// and a continuation starting at line 0 of the new one, flagged `continued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub block_height: BlockHeight,
    pub file: LogFile,
    pub start_line: usize,
    pub end_line: usize,
    pub forked: bool,
    /// Written by a rotation in the middle of the block, not by a marker
    #[serde(default)]
    pub continued: bool,
}

impl IndexEntry {
    pub fn new(block_height: BlockHeight, file: LogFile, line: usize, forked: bool) -> Self {
        Self {
            block_height,
            file,
            start_line: line,
            end_line: line,
            forked,
            continued: false,
        }
    }

    /// The entry that carries block `block_height` over to the start of `file`.
    pub fn continuation(block_height: BlockHeight, file: LogFile) -> Self {
        Self {
            continued: true,
            ..Self::new(block_height, file, 0, false)
        }
    }

    /// Whether `self` continues `previous` on the other file after a rotation.
    pub fn continues(&self, previous: &IndexEntry) -> bool {
        self.continued
            && !previous.forked
            && self.block_height == previous.block_height
            && self.file != previous.file
            && self.start_line == 0
    }

    /// The line this entry's block opens with.
    pub fn marker(&self) -> String {
        if self.forked {
            fork_marker(self.block_height)
        } else {
            start_marker(self.block_height)
        }
    }
}

pub fn start_marker(height: BlockHeight) -> String {
    format!("+++++ Start block {height}")
}

pub fn fork_marker(height: BlockHeight) -> String {
    format!("***** Forked at block {height}")
}

/// One element of the block history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEntry {
    Block(BlockHeight),
    Forked(BlockHeight),
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryEntry::Block(h) => write!(f, "{h}"),
            HistoryEntry::Forked(h) => write!(f, "Forked {h}"),
        }
    }
}

/// Split entries into block occurrences, joining rotation continuations.
pub fn occurrences(entries: &[IndexEntry]) -> Vec<&[IndexEntry]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for i in 1..=entries.len() {
        if i == entries.len() || !entries[i].continues(&entries[i - 1]) {
            if start < i {
                groups.push(&entries[start..i]);
            }
            start = i;
        }
    }
    groups
}

/// Encode as one JSON object per line.
pub fn encode(entries: &[IndexEntry]) -> Result<String, MonitorError> {
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        let line = serde_json::to_string(entry).map_err(|e| MonitorError::CorruptIndex {
            line: i,
            reason: e.to_string(),
        })?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Decode JSON lines, skipping blank lines.
pub fn decode(text: &str) -> Result<Vec<IndexEntry>, MonitorError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| MonitorError::CorruptIndex {
                line: i,
                reason: e.to_string(),
            })
        })
        .collect()
}
