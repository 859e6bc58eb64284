//! Quarry Monitor - Forensic Block Log
//!
//! An append-only record of what the indexer did per block, spread over two
//! fixed-capacity files that take turns, plus an index from block height to
//! the lines that block wrote. Fork points are recorded as marker lines so an
//! operator can see where the pipeline rewound. The store cache never reads
//! from it.

pub mod config;
pub mod index;
pub mod monitor;

pub use config::MonitorConfig;
pub use index::{HistoryEntry, IndexEntry, LogFile};
pub use monitor::Monitor;
