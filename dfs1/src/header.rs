//! The file header.
//!
//! Layout, all Little Endian:
//!
//! | field          | type                 |
//! |----------------|----------------------|
//! | magic number   | u16                  |
//! | format version | u32                  |
//! | state          | u8                   |
//! | header length  | u64                  |
//! | data length    | u64                  |
//! | step count     | u32                  |
//! | title          | varint + UTF-8       |
//! | delete value   | f64                  |
//! | grid           | f64, f64, u32        |
//! | item count     | u32                  |
//! | items          | string, u16, u8 each |
//! | time axis tag  | u8                   |
//! | start time     | i64 (ms since epoch) |
//! | step duration  | f64, fixed axis only |
//!
//! State, data length and step count are written as placeholders when a file is created and
//! patched when it is closed, which is what makes a file valid.
//!
use std::io::{Read, Seek, Write};

use chrono::NaiveDateTime;

use crate::cursor::{self, string_size, BinaryCursor, Serialize, MAX_STRING_LENGTH};
use crate::errors::{Error, Result};
use crate::geom::GridAxis;
use crate::item::ItemDefinition;
use crate::time::{from_millis, to_millis, TimeAxis};

pub const MAGIC_NUMBER: u16 = 0xDF51;
pub const FORMAT_VERSION: u32 = 1;

/// Value stored in place of NaN unless a file says otherwise
pub const DEFAULT_DELETE_VALUE: f64 = 1e-35;

const STATE_OFFSET: u64 = 6;
const DATA_LENGTH_OFFSET: u64 = 15;
const PRELUDE_SIZE: u64 = 27;

const STATE_WRITING: u8 = 0;
const STATE_COMPLETE: u8 = 1;

const TIME_FIXED: u8 = 0;
const TIME_VARIABLE: u8 = 1;

/// The time axis as far as the header knows it. Per step durations of a variable axis live in the
/// data section.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Stepping {
    Fixed(f64),
    Variable,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub title: String,
    pub delete_value: f64,
    pub grid: GridAxis,
    pub items: Vec<ItemDefinition>,
    pub start_time: NaiveDateTime,
    pub stepping: Stepping,
    pub step_count: usize,

    /// Declared length of the data section in bytes
    pub data_length: u64,

    /// Whether the file was finalized by closing it
    pub complete: bool,
}

impl Header {
    /// Header for a new file with no steps written yet
    pub fn new(
        title: String,
        delete_value: f64,
        grid: GridAxis,
        items: Vec<ItemDefinition>,
        time_axis: &TimeAxis,
    ) -> Result<Self> {
        let stepping = match time_axis {
            TimeAxis::Fixed { step_duration, .. } => Stepping::Fixed(*step_duration),
            TimeAxis::Variable { .. } => Stepping::Variable,
        };
        let header = Self {
            title,
            delete_value,
            grid,
            items,
            start_time: time_axis.start(),
            stepping,
            step_count: 0,
            data_length: 0,
            complete: false,
        };
        header.validate()?;
        time_axis.validate()?;

        Ok(header)
    }

    /// Check everything encoding relies on
    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        if self.items.is_empty() {
            return Err(Error::InvalidItems(String::from(
                "a file needs at least one item",
            )));
        }
        if self.items.len() > u32::MAX as usize {
            return Err(Error::InvalidItems(format!(
                "{} items can't be stored",
                self.items.len()
            )));
        }
        for item in &self.items {
            if item.name.len() as u64 > MAX_STRING_LENGTH {
                return Err(Error::InvalidItems(format!(
                    "item name is {} bytes long, maximum is {MAX_STRING_LENGTH}",
                    item.name.len()
                )));
            }
        }
        if self.title.len() as u64 > MAX_STRING_LENGTH {
            return Err(Error::InvalidItems(format!(
                "title is {} bytes long, maximum is {MAX_STRING_LENGTH}",
                self.title.len()
            )));
        }
        if let Stepping::Fixed(duration) = self.stepping {
            if !(duration.is_finite() && duration > 0.0) {
                return Err(Error::InvalidTimeAxis(format!(
                    "step duration must be positive, got {duration}"
                )));
            }
        }

        Ok(())
    }

    /// Offset of the data section, which is the length of the header
    pub fn data_offset(&self) -> u64 {
        self.size()
    }

    /// Bytes in one item block
    pub fn block_bytes(&self, item: usize) -> u64 {
        (self.grid.nx() * self.items[item].value_type.size()) as u64
    }

    /// Bytes in one timestep, including the duration of a variable step
    pub fn step_bytes(&self) -> u64 {
        let prefix = match self.stepping {
            Stepping::Fixed(_) => 0,
            Stepping::Variable => 8,
        };

        prefix + (0..self.items.len()).map(|j| self.block_bytes(j)).sum::<u64>()
    }

    /// Make sure the fields agree with each other.
    pub fn check_consistency(&self) -> Result<()> {
        if !self.complete {
            return Err(Error::CorruptHeader {
                offset: STATE_OFFSET,
                reason: String::from("file was never finalized"),
            });
        }

        let required = (self.step_count as u64)
            .checked_mul(self.step_bytes())
            .ok_or_else(|| Error::CorruptHeader {
                offset: DATA_LENGTH_OFFSET,
                reason: format!("{} steps overflow the data section", self.step_count),
            })?;
        if self.data_length < required {
            return Err(Error::CorruptHeader {
                offset: DATA_LENGTH_OFFSET,
                reason: format!(
                    "data section is declared as {} bytes but {} steps of {} bytes need {required}",
                    self.data_length,
                    self.step_count,
                    self.step_bytes()
                ),
            });
        }

        Ok(())
    }

    /// Write the header. State, data length and step count are written as they currently are.
    pub fn encode(&self, cursor: &mut BinaryCursor<impl Write>) -> Result<()> {
        self.write_to(cursor)
    }

    pub fn decode(cursor: &mut BinaryCursor<impl Read>) -> Result<Self> {
        Self::read_from(cursor)
    }

    /// Patch the fields that are only known once all data has been written, then mark the file
    /// complete. Expects the cursor to be over the same stream the header was encoded to.
    pub(crate) fn finalize<W: Write + Seek>(
        &mut self,
        cursor: &mut BinaryCursor<W>,
        step_count: usize,
    ) -> Result<()> {
        self.step_count = step_count;
        self.data_length = step_count as u64 * self.step_bytes();

        cursor.seek_to(DATA_LENGTH_OFFSET)?;
        cursor.write_u64(self.data_length)?;
        cursor.write_u32(self.step_count as u32)?;

        // State goes last so a file that fails halfway through here is still unfinished
        cursor.flush()?;
        cursor.seek_to(STATE_OFFSET)?;
        cursor.write_u8(STATE_COMPLETE)?;
        cursor.flush()?;
        self.complete = true;

        Ok(())
    }
}

impl cursor::Serialize for Header {
    fn write_to(&self, cursor: &mut BinaryCursor<impl Write>) -> Result<()> {
        self.validate()?;

        cursor.write_u16(MAGIC_NUMBER)?;
        cursor.write_u32(FORMAT_VERSION)?;
        cursor.write_u8(if self.complete {
            STATE_COMPLETE
        } else {
            STATE_WRITING
        })?;
        cursor.write_u64(self.size())?;
        cursor.write_u64(self.data_length)?;
        cursor.write_u32(self.step_count as u32)?;

        cursor.write_string(&self.title)?;
        cursor.write_f64(self.delete_value)?;
        self.grid.write_to(cursor)?;

        cursor.write_u32(self.items.len() as u32)?;
        for item in &self.items {
            item.write_to(cursor)?;
        }

        match self.stepping {
            Stepping::Fixed(duration) => {
                cursor.write_u8(TIME_FIXED)?;
                cursor.write_i64(to_millis(self.start_time))?;
                cursor.write_f64(duration)?;
            }
            Stepping::Variable => {
                cursor.write_u8(TIME_VARIABLE)?;
                cursor.write_i64(to_millis(self.start_time))?;
            }
        }

        Ok(())
    }

    fn read_from(cursor: &mut BinaryCursor<impl Read>) -> Result<Self> {
        let start = cursor.position();
        let corrupt = |offset: u64, reason: String| Error::CorruptHeader {
            offset: offset - start,
            reason,
        };

        let magic_number = cursor.read_u16()?;
        if magic_number != MAGIC_NUMBER {
            return Err(Error::UnsupportedFormat(format!(
                "not a dfs1 file, magic number is {magic_number:#06x}"
            )));
        }
        let version = cursor.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedFormat(format!(
                "unrecognized format version {version}"
            )));
        }

        let offset = cursor.position();
        let complete = match cursor.read_u8()? {
            STATE_WRITING => false,
            STATE_COMPLETE => true,
            state => return Err(corrupt(offset, format!("unknown state {state}"))),
        };
        let header_length = cursor.read_u64()?;
        let data_length = cursor.read_u64()?;
        let step_count = cursor.read_u32()? as usize;

        let title = cursor.read_string()?;
        let delete_value = cursor.read_f64()?;

        let offset = cursor.position();
        let grid = GridAxis::read_from(cursor)?;
        grid.validate()
            .map_err(|err| corrupt(offset, err.to_string()))?;

        let offset = cursor.position();
        let n_items = cursor.read_u32()? as usize;
        if n_items == 0 {
            return Err(corrupt(offset, String::from("file has no items")));
        }
        let mut items = Vec::with_capacity(n_items.min(1024));
        for _ in 0..n_items {
            items.push(ItemDefinition::read_from(cursor)?);
        }

        let offset = cursor.position();
        let tag = cursor.read_u8()?;
        let millis = cursor.read_i64()?;
        let start_time = from_millis(millis)
            .ok_or_else(|| corrupt(offset + 1, format!("start time {millis} is out of range")))?;
        let stepping = match tag {
            TIME_FIXED => {
                let offset = cursor.position();
                let duration = cursor.read_f64()?;
                TimeAxis::Fixed {
                    start: start_time,
                    step_duration: duration,
                    step_count,
                }
                .validate()
                .map_err(|err| corrupt(offset, err.to_string()))?;
                Stepping::Fixed(duration)
            }
            TIME_VARIABLE => Stepping::Variable,
            tag => return Err(corrupt(offset, format!("unknown time axis tag {tag}"))),
        };

        let header = Self {
            title,
            delete_value,
            grid,
            items,
            start_time,
            stepping,
            step_count,
            data_length,
            complete,
        };

        let length = cursor.position() - start;
        if header_length != length {
            return Err(corrupt(
                start + 7,
                format!("header length is declared as {header_length} but is {length}"),
            ));
        }

        Ok(header)
    }

    fn size(&self) -> u64 {
        let time_axis = match self.stepping {
            Stepping::Fixed(_) => 1 + 8 + 8,
            Stepping::Variable => 1 + 8,
        };

        PRELUDE_SIZE
            + string_size(&self.title)
            + 8
            + self.grid.size()
            + 4
            + self.items.iter().map(|item| item.size()).sum::<u64>()
            + time_axis
    }
}
