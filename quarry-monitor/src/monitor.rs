//! The forensic block log.
//!
//! Lines go to the current file until the next line would push it past the
//! configured capacity; the monitor then switches to the other file,
//! truncating it and forgetting every index entry that pointed into it. Each
//! block opens with a start marker and owns the lines up to the next marker.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use quarry_core::{BlockHeight, MonitorError, QuarryResult};

use crate::config::MonitorConfig;
use crate::index::{self, fork_marker, start_marker, HistoryEntry, IndexEntry, LogFile};

const INDEX_FILE: &str = "index.jsonl";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> MonitorError + '_ {
    move |e| MonitorError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn open_append(path: &Path) -> Result<File, MonitorError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_error(path))
}

fn read_lines(path: &Path) -> Result<Vec<String>, MonitorError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path).map_err(io_error(path))?;
    Ok(text.lines().map(str::to_string).collect())
}

/// Outcome of checking what is on disk.
enum DiskState {
    Valid(Vec<IndexEntry>),
    Fresh,
    Invalid(String),
}

/// Append-only block log over two rotating files.
#[derive(Debug)]
pub struct Monitor {
    config: MonitorConfig,
    current: LogFile,
    current_size: u64,
    current_lines: usize,
    writer: Option<File>,
    /// Closed entries, oldest first
    index: Vec<IndexEntry>,
    /// Entry of the block currently being written
    open: Option<IndexEntry>,
    rotations: u64,
    resets: u64,
}

impl Monitor {
    /// Create a monitor; nothing touches the disk until [`Monitor::init`].
    pub fn new(config: MonitorConfig) -> QuarryResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            current: LogFile::A,
            current_size: 0,
            current_lines: 0,
            writer: None,
            index: Vec::new(),
            open: None,
            rotations: 0,
            resets: 0,
        })
    }

    /// [`Monitor::new`] followed by [`Monitor::init`].
    pub fn open(config: MonitorConfig) -> QuarryResult<Self> {
        let mut monitor = Self::new(config)?;
        monitor.init()?;
        Ok(monitor)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn current_file(&self) -> LogFile {
        self.current
    }

    /// File switches since this monitor was created.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Full resets since this monitor was created.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn file_path(&self, file: LogFile) -> PathBuf {
        self.config.out_dir.join(file.file_name())
    }

    pub fn index_path(&self) -> PathBuf {
        self.config.out_dir.join(INDEX_FILE)
    }

    // ------------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------------

    /// Load state from the output directory, resetting everything if the
    /// index and the log files disagree.
    pub fn init(&mut self) -> QuarryResult<()> {
        let dir = self.config.out_dir.clone();
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        match self.inspect_disk()? {
            DiskState::Valid(entries) => self.restore(entries)?,
            DiskState::Fresh => self.reset_all()?,
            DiskState::Invalid(reason) => {
                tracing::warn!(dir = %dir.display(), reason = %reason, "Monitor state invalid, resetting");
                self.reset_all()?;
            }
        }

        tracing::info!(
            dir = %dir.display(),
            current = %self.current,
            blocks = self.index.len(),
            "Monitor initialised"
        );
        Ok(())
    }

    fn inspect_disk(&self) -> QuarryResult<DiskState> {
        let index_path = self.index_path();
        if !index_path.exists() {
            let has_logs = [LogFile::A, LogFile::B].iter().any(|f| {
                fs::metadata(self.file_path(*f))
                    .map(|m| m.len() > 0)
                    .unwrap_or(false)
            });
            return Ok(if has_logs {
                DiskState::Invalid("index file missing".to_string())
            } else {
                DiskState::Fresh
            });
        }

        let text = fs::read_to_string(&index_path).map_err(io_error(&index_path))?;
        let entries = match index::decode(&text) {
            Ok(entries) => entries,
            Err(e) => return Ok(DiskState::Invalid(e.to_string())),
        };

        let Some(last) = index::occurrences(&entries).last().map(|g| g.to_vec()) else {
            return Ok(DiskState::Valid(entries));
        };

        for entry in &last {
            if !self.file_path(entry.file).exists() {
                return Ok(DiskState::Invalid(format!(
                    "file {} of block {} missing",
                    entry.file, entry.block_height
                )));
            }
        }

        // a continuation whose head was overwritten has no marker to check
        let first = last[0];
        let lines = read_lines(&self.file_path(first.file))?;
        if !first.continued && lines.get(first.start_line) != Some(&first.marker()) {
            return Ok(DiskState::Invalid(format!(
                "block {} marker missing at {}:{}",
                first.block_height, first.file, first.start_line
            )));
        }

        Ok(DiskState::Valid(entries))
    }

    fn restore(&mut self, entries: Vec<IndexEntry>) -> QuarryResult<()> {
        self.current = entries.last().map_or(LogFile::A, |e| e.file);
        let path = self.file_path(self.current);
        let text = if path.exists() {
            fs::read_to_string(&path).map_err(io_error(&path))?
        } else {
            String::new()
        };
        self.current_size = text.len() as u64;
        self.current_lines = text.matches('\n').count();
        self.index = entries;
        self.open = None;
        self.writer = Some(open_append(&path)?);
        Ok(())
    }

    /// Truncate both files, empty the index and start over on file A.
    pub fn reset_all(&mut self) -> QuarryResult<()> {
        let dir = self.config.out_dir.clone();
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        self.writer = None;
        self.truncate(LogFile::A)?;
        self.truncate(LogFile::B)?;
        self.index.clear();
        self.open = None;
        self.current = LogFile::A;
        self.current_size = 0;
        self.current_lines = 0;
        self.resets += 1;
        self.persist_index()?;

        tracing::debug!(dir = %dir.display(), "Monitor reset");
        Ok(())
    }

    fn truncate(&mut self, file: LogFile) -> QuarryResult<()> {
        let path = self.file_path(file);
        File::create(&path).map_err(io_error(&path))?;
        self.index.retain(|e| e.file != file);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------------

    fn rotate(&mut self) -> QuarryResult<()> {
        let next = self.current.other();
        self.writer = None;

        if let Some(open) = self.open.take() {
            self.index.push(open);
            self.open = Some(IndexEntry::continuation(open.block_height, next));
        }
        self.truncate(next)?;
        self.current = next;
        self.current_size = 0;
        self.current_lines = 0;
        self.rotations += 1;
        self.persist_index()?;

        tracing::debug!(file = %next, rotations = self.rotations, "Monitor switched file");
        Ok(())
    }

    /// Write one line. When it would overflow the current file, the switch
    /// happens first, so the whole line lands at the top of the other file.
    fn append(&mut self, line: &str) -> QuarryResult<(LogFile, usize)> {
        let line = line.replace(['\n', '\r'], " ");
        let bytes = line.len() as u64 + 1;
        if self.current_size > 0 && self.current_size + bytes > self.config.file_size {
            self.rotate()?;
        }

        let path = self.file_path(self.current);
        let writer = match self.writer.take() {
            Some(file) => file,
            None => open_append(&path)?,
        };
        let writer = self.writer.insert(writer);
        writeln!(writer, "{line}").map_err(io_error(&path))?;

        let line_no = self.current_lines;
        self.current_lines += 1;
        self.current_size += bytes;
        if let Some(open) = self.open.as_mut() {
            open.end_line = line_no;
        }
        Ok((self.current, line_no))
    }

    fn close_block(&mut self) {
        if let Some(open) = self.open.take() {
            self.index.push(open);
        }
    }

    /// Mark the start of block `height`.
    pub fn create_block_start(&mut self, height: BlockHeight) -> QuarryResult<()> {
        self.close_block();
        let (file, line) = self.append(&start_marker(height))?;
        self.open = Some(IndexEntry::new(height, file, line, false));
        self.persist_index()
    }

    /// Record that the pipeline rewound to `height`.
    pub fn create_block_fork(&mut self, height: BlockHeight) -> QuarryResult<()> {
        self.close_block();
        let (file, line) = self.append(&fork_marker(height))?;
        self.index.push(IndexEntry::new(height, file, line, true));
        self.persist_index()
    }

    /// Append one line to the current block. Embedded newlines become spaces.
    pub fn write(&mut self, line: &str) -> QuarryResult<()> {
        self.append(line).map(|_| ())
    }

    fn all_entries(&self) -> Vec<IndexEntry> {
        let mut all = self.index.clone();
        all.extend(self.open);
        all
    }

    fn persist_index(&self) -> QuarryResult<()> {
        let path = self.index_path();
        let text = index::encode(&self.all_entries())?;
        fs::write(&path, text).map_err(io_error(&path))?;
        Ok(())
    }

    /// Write the index, including the block in progress, to disk.
    pub fn sync_index(&self) -> QuarryResult<()> {
        self.persist_index()
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Index entries of the latest occurrence of block `height`: one, two if
    /// it crossed a rotation, none if its lines were overwritten.
    pub fn block_index_entries(&self, height: BlockHeight) -> Vec<IndexEntry> {
        let all = self.all_entries();
        index::occurrences(&all)
            .into_iter()
            .rev()
            .find(|group| !group[0].forked && group[0].block_height == height)
            .map(<[IndexEntry]>::to_vec)
            .unwrap_or_default()
    }

    /// Lines written for the latest occurrence of block `height`.
    pub fn block_index_records(&self, height: BlockHeight) -> QuarryResult<Option<Vec<String>>> {
        let entries = self.block_index_entries(height);
        if entries.is_empty() {
            return Ok(None);
        }

        let mut records = Vec::new();
        for entry in entries {
            let lines = read_lines(&self.file_path(entry.file))?;
            records.extend(
                lines
                    .into_iter()
                    .skip(entry.start_line)
                    .take(entry.end_line.saturating_sub(entry.start_line) + 1),
            );
        }
        Ok(Some(records))
    }

    /// Fork marker lines still present in either file, oldest first.
    pub fn forked_records(&self) -> QuarryResult<Vec<String>> {
        let a = read_lines(&self.file_path(LogFile::A))?;
        let b = read_lines(&self.file_path(LogFile::B))?;

        Ok(self
            .index
            .iter()
            .filter(|e| e.forked)
            .filter_map(|e| {
                let lines = match e.file {
                    LogFile::A => &a,
                    LogFile::B => &b,
                };
                lines
                    .get(e.start_line)
                    .filter(|line| **line == e.marker())
                    .cloned()
            })
            .collect())
    }

    /// Block heights in the order they were written; forks as
    /// [`HistoryEntry::Forked`].
    pub fn block_index_history(&self) -> Vec<HistoryEntry> {
        let all = self.all_entries();
        index::occurrences(&all)
            .into_iter()
            .map(|group| {
                let first = group[0];
                if first.forked {
                    HistoryEntry::Forked(first.block_height)
                } else {
                    HistoryEntry::Block(first.block_height)
                }
            })
            .collect()
    }
}
