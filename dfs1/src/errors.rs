use std::io;
use std::result;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    IO(#[from] io::Error),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt header at offset {offset}: {reason}")]
    CorruptHeader { offset: u64, reason: String },

    #[error("stream truncated at offset {offset}: expected {expected} bytes, got {actual}")]
    TruncatedStream {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("index {index} is out of range for axis with {len} nodes")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("unsupported selection: {0}")]
    UnsupportedSelection(String),

    #[error("timestep {timestep} is out of range for file with {step_count} steps")]
    TimestepOutOfRange { timestep: usize, step_count: usize },

    #[error("item {item} is out of range for file with {n_items} items")]
    ItemOutOfRange { item: usize, n_items: usize },

    #[error(
        "blocks must be written in order: expected (step {}, item {}), got (step {}, item {})",
        .expected.0,
        .expected.1,
        .found.0,
        .found.1
    )]
    SequenceViolation {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("block has {actual} values but the grid has {expected} nodes")]
    BlockLength { expected: usize, actual: usize },

    #[error("invalid items: {0}")]
    InvalidItems(String),

    #[error("invalid time axis: {0}")]
    InvalidTimeAxis(String),

    #[error("timestep {timestep} is incomplete: {written} of {n_items} items written")]
    IncompleteTimestep {
        timestep: usize,
        written: usize,
        n_items: usize,
    },

    #[error("incompatible files: {0}")]
    Incompatible(String),

    #[error("file is closed")]
    Closed,
}

pub type Result<T> = result::Result<T, Error>;
