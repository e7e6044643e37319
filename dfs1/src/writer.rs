use std::io::{Seek, Write};

use ndarray::ArrayView1;
use num_traits::Float;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cursor::BinaryCursor;
use crate::errors::{Error, Result};
use crate::geom::{Grid1D, GridAxis};
use crate::header::{Header, DEFAULT_DELETE_VALUE};
use crate::item::ItemDefinition;
use crate::series::TimeSeriesWriter;
use crate::time::TimeAxis;

fn default_delete_value() -> f64 {
    DEFAULT_DELETE_VALUE
}

/// Everything needed to create a new Dfs1 file.
///
/// A builder can be put together in code:
///
/// ```ignore
/// let writer = Dfs1Builder::new(grid, items, time_axis)
///     .title("Tidal channel")
///     .create(File::create(path)?)?;
/// ```
///
/// or deserialized from a configuration file, in which case `title` and `delete_value` may be
/// left out.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dfs1Builder {
    #[serde(default)]
    pub title: String,

    #[serde(default = "default_delete_value")]
    pub delete_value: f64,

    pub grid: GridAxis,
    pub items: Vec<ItemDefinition>,
    pub time_axis: TimeAxis,
}

impl Dfs1Builder {
    pub fn new(grid: GridAxis, items: Vec<ItemDefinition>, time_axis: TimeAxis) -> Self {
        Self {
            title: String::new(),
            delete_value: DEFAULT_DELETE_VALUE,
            grid,
            items,
            time_axis,
        }
    }

    pub fn title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = title.into();
        self
    }

    pub fn delete_value(mut self, delete_value: f64) -> Self {
        self.delete_value = delete_value;
        self
    }

    /// Write the header of a new file to `stream`, starting at offset 0.
    pub fn create<W: Write + Seek>(&self, stream: W) -> Result<Dfs1Writer<W>> {
        let grid = Grid1D::new(self.grid)?;
        let header = Header::new(
            self.title.clone(),
            self.delete_value,
            self.grid,
            self.items.clone(),
            &self.time_axis,
        )?;

        let mut cursor = BinaryCursor::at(stream)?;
        cursor.seek_to(0)?;
        header.encode(&mut cursor)?;

        debug!(
            title = %header.title,
            nx = grid.nx(),
            items = header.items.len(),
            steps = self.time_axis.step_count(),
            "created dfs1 file"
        );

        let writer = TimeSeriesWriter::new(&header, &self.time_axis);

        Ok(Dfs1Writer {
            header,
            grid,
            time_axis: self.time_axis.clone(),
            writer,
            cursor: Some(cursor),
        })
    }
}

/// A Dfs1 file being written.
///
/// Blocks must be written in file order: every item of step 0, then every item of step 1, and so
/// on. The file isn't valid until it has been closed, either with `close` or `finish`. A writer
/// that is dropped without being closed leaves behind a file that can't be opened.
///
pub struct Dfs1Writer<W> {
    header: Header,
    grid: Grid1D,

    /// The time axis the file was created with. Truncated to the written steps on close.
    time_axis: TimeAxis,
    writer: TimeSeriesWriter,
    cursor: Option<BinaryCursor<W>>,
}

impl<W> Dfs1Writer<W> {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn grid(&self) -> &Grid1D {
        &self.grid
    }

    pub fn items(&self) -> &[ItemDefinition] {
        &self.header.items
    }

    pub fn time_axis(&self) -> &TimeAxis {
        &self.time_axis
    }

    /// Number of steps with every item written
    pub fn steps_written(&self) -> usize {
        self.writer.completed_steps()
    }

    /// The `(step, item)` the next block must be for
    pub fn next_block(&self) -> (usize, usize) {
        self.writer.next()
    }

    pub fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }
}

impl<W: Write + Seek> Dfs1Writer<W> {
    /// Create a file with default title and delete value. See `Dfs1Builder` for the rest.
    pub fn create(
        stream: W,
        grid: GridAxis,
        items: Vec<ItemDefinition>,
        time_axis: TimeAxis,
    ) -> Result<Self> {
        Dfs1Builder::new(grid, items, time_axis).create(stream)
    }

    /// Write the values of `item` at `step`. NaN is stored as the delete value.
    pub fn write_block<F: Float>(
        &mut self,
        step: usize,
        item: usize,
        values: ArrayView1<F>,
    ) -> Result<()> {
        let cursor = self.cursor.as_mut().ok_or(Error::Closed)?;

        self.writer.write_block(cursor, step, item, values)
    }

    /// Write one block per item as the next step.
    pub fn append_step<F: Float>(&mut self, values: &[ArrayView1<F>]) -> Result<()> {
        if values.len() != self.header.items.len() {
            return Err(Error::InvalidItems(format!(
                "a step needs {} blocks, got {}",
                self.header.items.len(),
                values.len()
            )));
        }
        let (step, item) = self.writer.next();
        if item != 0 {
            return Err(Error::SequenceViolation {
                expected: (step, item),
                found: (step, 0),
            });
        }

        // Nothing is written unless every block fits
        if let Some(block) = values.iter().find(|block| block.len() != self.grid.nx()) {
            return Err(Error::BlockLength {
                expected: self.grid.nx(),
                actual: block.len(),
            });
        }

        for (item, block) in values.iter().enumerate() {
            self.write_block(step, item, block.view())?;
        }

        Ok(())
    }

    /// Finalize the file and release the stream. Closing a closed writer does nothing.
    ///
    /// Every completed step is kept. If a step was only partly written, the file is still
    /// finalized without it and `Error::IncompleteTimestep` is returned.
    pub fn close(&mut self) -> Result<()> {
        self.finalize().map(|_| ())
    }

    /// Finalize the file and give back the stream.
    pub fn finish(mut self) -> Result<W> {
        self.finalize()?.ok_or(Error::Closed)
    }

    fn finalize(&mut self) -> Result<Option<W>> {
        let mut cursor = match self.cursor.take() {
            Some(cursor) => cursor,
            None => return Ok(None),
        };

        let completed = self.writer.completed_steps();
        let declared = self.writer.max_steps();
        self.header.finalize(&mut cursor, completed)?;
        self.time_axis = self.time_axis.truncate(completed);

        if completed < declared && self.time_axis.is_equidistant() {
            warn!(
                title = %self.header.title,
                declared,
                written = completed,
                "closing dfs1 file with fewer steps than declared"
            );
        }
        debug!(
            title = %self.header.title,
            steps = completed,
            data_length = self.header.data_length,
            "closed dfs1 file"
        );

        let written = self.writer.pending_items();
        if written > 0 {
            return Err(Error::IncompleteTimestep {
                timestep: completed,
                written,
                n_items: self.header.items.len(),
            });
        }

        Ok(Some(cursor.into_inner()))
    }
}
