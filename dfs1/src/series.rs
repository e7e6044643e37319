//! Reading and writing the data section.
//!
//! The data section is `step_count` groups laid end to end. A group holds one block per item, in
//! item order, and each block is `nx` values of the item's value type. Groups of a file with a
//! variable time axis start with the step's duration as an f64. Since every group is the same
//! size, the offset of any block can be computed from the header alone.
//!
use std::io::{Read, Seek, Write};

use ndarray::{Array1, ArrayView1};
use num_traits::Float;
use tracing::trace;

use crate::cursor::BinaryCursor;
use crate::eum::ValueType;
use crate::errors::{Error, Result};
use crate::header::{Header, Stepping};
use crate::time::TimeAxis;

/// One timestep's values for one item, in the type they're stored as.
#[derive(Clone, Debug, PartialEq)]
pub enum DataBlock {
    F32(Array1<f32>),
    F64(Array1<f64>),
}

impl DataBlock {
    pub fn len(&self) -> usize {
        match self {
            DataBlock::F32(values) => values.len(),
            DataBlock::F64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            DataBlock::F32(_) => ValueType::Float32,
            DataBlock::F64(_) => ValueType::Float64,
        }
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        match self {
            DataBlock::F32(values) => values.get(index).map(|value| *value as f64),
            DataBlock::F64(values) => values.get(index).copied(),
        }
    }

    pub fn to_f64(&self) -> Array1<f64> {
        match self {
            DataBlock::F32(values) => values.mapv(|value| value as f64),
            DataBlock::F64(values) => values.clone(),
        }
    }
}

impl From<Array1<f32>> for DataBlock {
    fn from(values: Array1<f32>) -> Self {
        DataBlock::F32(values)
    }
}

impl From<Array1<f64>> for DataBlock {
    fn from(values: Array1<f64>) -> Self {
        DataBlock::F64(values)
    }
}

/// Where everything in the data section is.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockLayout {
    data_offset: u64,
    nx: usize,
    value_types: Vec<ValueType>,

    /// Offset of each item's block within a step, after the step prefix
    item_offsets: Vec<u64>,
    step_prefix: u64,
    step_bytes: u64,
}

impl BlockLayout {
    pub fn new(header: &Header) -> Self {
        let nx = header.grid.nx();
        let value_types: Vec<ValueType> = header.items.iter().map(|i| i.value_type).collect();
        let mut item_offsets = Vec::with_capacity(value_types.len());
        let mut offset = 0;
        for value_type in &value_types {
            item_offsets.push(offset);
            offset += (nx * value_type.size()) as u64;
        }
        let step_prefix = match header.stepping {
            Stepping::Fixed(_) => 0,
            Stepping::Variable => 8,
        };

        Self {
            data_offset: header.data_offset(),
            nx,
            value_types,
            item_offsets,
            step_prefix,
            step_bytes: step_prefix + offset,
        }
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn n_items(&self) -> usize {
        self.value_types.len()
    }

    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    pub fn step_bytes(&self) -> u64 {
        self.step_bytes
    }

    pub fn has_durations(&self) -> bool {
        self.step_prefix > 0
    }

    pub fn step_offset(&self, step: usize) -> u64 {
        self.data_offset + step as u64 * self.step_bytes
    }

    pub fn block_offset(&self, step: usize, item: usize) -> u64 {
        self.step_offset(step) + self.step_prefix + self.item_offsets[item]
    }
}

/// Decodes blocks from a finalized data section.
#[derive(Clone, Debug)]
pub struct TimeSeriesReader {
    layout: BlockLayout,
    step_count: usize,
    delete_value: f64,
}

impl TimeSeriesReader {
    pub fn new(header: &Header) -> Self {
        Self {
            layout: BlockLayout::new(header),
            step_count: header.step_count,
            delete_value: header.delete_value,
        }
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn check(&self, step: usize, item: usize) -> Result<()> {
        if step >= self.step_count {
            return Err(Error::TimestepOutOfRange {
                timestep: step,
                step_count: self.step_count,
            });
        }
        if item >= self.layout.n_items() {
            return Err(Error::ItemOutOfRange {
                item,
                n_items: self.layout.n_items(),
            });
        }

        Ok(())
    }

    /// Read exactly `nx` values for `item` at `step`. Stored delete values come back as NaN.
    pub fn read_block<R: Read + Seek>(
        &self,
        cursor: &mut BinaryCursor<R>,
        step: usize,
        item: usize,
    ) -> Result<DataBlock> {
        self.check(step, item)?;
        cursor.seek_to(self.layout.block_offset(step, item))?;
        trace!(step, item, offset = cursor.position(), "reading block");

        let nx = self.layout.nx;
        let block = match self.layout.value_types[item] {
            ValueType::Float32 => {
                let delete_value = self.delete_value as f32;
                let values = cursor.read_fixed::<f32>(nx)?;
                DataBlock::F32(
                    values
                        .into_iter()
                        .map(|value| if value == delete_value { f32::NAN } else { value })
                        .collect(),
                )
            }
            ValueType::Float64 => {
                let delete_value = self.delete_value;
                let values = cursor.read_fixed::<f64>(nx)?;
                DataBlock::F64(
                    values
                        .into_iter()
                        .map(|value| if value == delete_value { f64::NAN } else { value })
                        .collect(),
                )
            }
        };

        Ok(block)
    }

    /// Read the per step durations of a variable time axis.
    pub fn read_durations<R: Read + Seek>(
        &self,
        cursor: &mut BinaryCursor<R>,
    ) -> Result<Vec<f64>> {
        let mut durations = Vec::with_capacity(self.step_count.min(1 << 16));
        for step in 0..self.step_count {
            let offset = self.layout.step_offset(step);
            cursor.seek_to(offset)?;
            let duration = cursor.read_f64()?;
            if !(duration.is_finite() && duration > 0.0) {
                return Err(Error::CorruptHeader {
                    offset,
                    reason: format!("duration of step {step} must be positive, got {duration}"),
                });
            }
            durations.push(duration);
        }

        Ok(durations)
    }
}

/// Appends blocks to a data section, strictly in `(step, item)` order.
#[derive(Clone, Debug)]
pub struct TimeSeriesWriter {
    layout: BlockLayout,
    max_steps: usize,
    durations: Option<Vec<f64>>,
    delete_value: f64,
    next: (usize, usize),
}

impl TimeSeriesWriter {
    pub fn new(header: &Header, time_axis: &TimeAxis) -> Self {
        let durations = match time_axis {
            TimeAxis::Fixed { .. } => None,
            TimeAxis::Variable { durations, .. } => Some(durations.clone()),
        };

        Self {
            layout: BlockLayout::new(header),
            max_steps: time_axis.step_count(),
            durations,
            delete_value: header.delete_value,
            next: (0, 0),
        }
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// The `(step, item)` the next block must be for
    pub fn next(&self) -> (usize, usize) {
        self.next
    }

    /// Number of steps with every item written
    pub fn completed_steps(&self) -> usize {
        self.next.0
    }

    /// Number of items written so far in the step being written
    pub fn pending_items(&self) -> usize {
        self.next.1
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn write_block<W, F>(
        &mut self,
        cursor: &mut BinaryCursor<W>,
        step: usize,
        item: usize,
        values: ArrayView1<F>,
    ) -> Result<()>
    where
        W: Write + Seek,
        F: Float,
    {
        let n_items = self.layout.n_items();
        if item >= n_items {
            return Err(Error::ItemOutOfRange { item, n_items });
        }
        if step >= self.max_steps {
            return Err(Error::TimestepOutOfRange {
                timestep: step,
                step_count: self.max_steps,
            });
        }
        if (step, item) != self.next {
            return Err(Error::SequenceViolation {
                expected: self.next,
                found: (step, item),
            });
        }
        if values.len() != self.layout.nx {
            return Err(Error::BlockLength {
                expected: self.layout.nx,
                actual: values.len(),
            });
        }

        if item == 0 {
            if let Some(durations) = &self.durations {
                cursor.seek_to(self.layout.step_offset(step))?;
                cursor.write_f64(durations[step])?;
            }
        }

        cursor.seek_to(self.layout.block_offset(step, item))?;
        trace!(step, item, offset = cursor.position(), "writing block");
        let values = values.iter().map(|value| value.to_f64().unwrap_or(f64::NAN));
        match self.layout.value_types[item] {
            ValueType::Float32 => {
                let delete_value = self.delete_value as f32;
                let values: Vec<f32> = values
                    .map(|value| if value.is_nan() { delete_value } else { value as f32 })
                    .collect();
                cursor.write_fixed(&values)?;
            }
            ValueType::Float64 => {
                let delete_value = self.delete_value;
                let values: Vec<f64> = values
                    .map(|value| if value.is_nan() { delete_value } else { value })
                    .collect();
                cursor.write_fixed(&values)?;
            }
        }

        self.next = if item + 1 == n_items {
            (step + 1, 0)
        } else {
            (step, item + 1)
        };

        Ok(())
    }
}
