use std::io::{Read, Seek};

use ndarray::{Array1, Array2};
use tracing::debug;

use crate::cursor::BinaryCursor;
use crate::errors::{Error, Result};
use crate::geom::Grid1D;
use crate::header::{Header, Stepping};
use crate::item::ItemDefinition;
use crate::series::{DataBlock, TimeSeriesReader};
use crate::time::TimeAxis;

/// A Dfs1 file opened for reading.
///
/// Header, geometry and time axis are decoded when the file is opened and never change after
/// that. Data blocks are read on demand, either one at a time with `read_block` or materialized
/// per item with `read_item`.
///
/// Reads move the underlying stream's position, so a `Dfs1File` can't be read from two places at
/// once. See `SharedDfs1File` for a handle that serializes concurrent readers.
///
pub struct Dfs1File<R> {
    header: Header,
    grid: Grid1D,
    time_axis: TimeAxis,
    reader: TimeSeriesReader,
    cursor: Option<BinaryCursor<R>>,
}

impl<R> Dfs1File<R> {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn grid(&self) -> &Grid1D {
        &self.grid
    }

    pub fn items(&self) -> &[ItemDefinition] {
        &self.header.items
    }

    pub fn n_items(&self) -> usize {
        self.header.items.len()
    }

    /// Index of the first item called `name`
    pub fn item_index(&self, name: &str) -> Option<usize> {
        self.header.items.iter().position(|item| item.name == name)
    }

    pub fn time_axis(&self) -> &TimeAxis {
        &self.time_axis
    }

    pub fn step_count(&self) -> usize {
        self.header.step_count
    }

    pub fn title(&self) -> &str {
        &self.header.title
    }

    pub fn delete_value(&self) -> f64 {
        self.header.delete_value
    }

    pub fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }

    /// Release the underlying stream. Closing a closed file does nothing.
    pub fn close(&mut self) {
        if self.cursor.take().is_some() {
            debug!(title = %self.header.title, "closed dfs1 file");
        }
    }

    /// Give back the underlying stream, if the file hasn't been closed
    pub fn into_inner(self) -> Option<R> {
        self.cursor.map(BinaryCursor::into_inner)
    }
}

impl<R: Read + Seek> Dfs1File<R> {
    /// Decode the header of the file in `stream`, which starts at offset 0.
    pub fn open(stream: R) -> Result<Self> {
        let mut cursor = BinaryCursor::at(stream)?;
        cursor.seek_to(0)?;

        let header = Header::decode(&mut cursor)?;
        header.check_consistency()?;
        let grid = Grid1D::new(header.grid)?;
        let reader = TimeSeriesReader::new(&header);
        let time_axis = match header.stepping {
            Stepping::Fixed(step_duration) => TimeAxis::Fixed {
                start: header.start_time,
                step_duration,
                step_count: header.step_count,
            },
            Stepping::Variable => TimeAxis::Variable {
                start: header.start_time,
                durations: reader.read_durations(&mut cursor)?,
            },
        };
        time_axis
            .validate()
            .map_err(|err| Error::CorruptHeader {
                offset: header.data_offset(),
                reason: err.to_string(),
            })?;

        debug!(
            title = %header.title,
            nx = grid.nx(),
            items = header.items.len(),
            steps = header.step_count,
            "opened dfs1 file"
        );

        Ok(Self {
            header,
            grid,
            time_axis,
            reader,
            cursor: Some(cursor),
        })
    }

    /// Values of `item` at `step`
    pub fn read_block(&mut self, step: usize, item: usize) -> Result<DataBlock> {
        let cursor = self.cursor.as_mut().ok_or(Error::Closed)?;

        self.reader.read_block(cursor, step, item)
    }

    /// Values of every item at `step`, in item order
    pub fn read_step(&mut self, step: usize) -> Result<Vec<DataBlock>> {
        (0..self.n_items())
            .map(|item| self.read_block(step, item))
            .collect()
    }

    /// All values of `item`, shaped (steps, nx)
    pub fn read_item(&mut self, item: usize) -> Result<Array2<f64>> {
        if item >= self.n_items() {
            return Err(Error::ItemOutOfRange {
                item,
                n_items: self.n_items(),
            });
        }

        // Grows with what is actually read rather than with what the header claims
        let shape = (self.step_count(), self.grid.nx());
        let mut values = Vec::new();
        for step in 0..shape.0 {
            values.extend(self.read_block(step, item)?.to_f64().iter().copied());
        }
        let actual = values.len();

        Array2::from_shape_vec(shape, values).map_err(|_| Error::BlockLength {
            expected: shape.0.saturating_mul(shape.1),
            actual,
        })
    }

    /// Every item, fully materialized
    pub fn read_all(&mut self) -> Result<Vec<Array2<f64>>> {
        (0..self.n_items()).map(|item| self.read_item(item)).collect()
    }

    /// Time series of `item` at the node nearest to `coordinate`
    pub fn read_nearest(&mut self, item: usize, coordinate: f64) -> Result<Array1<f64>> {
        let node = self.grid.find_index(coordinate);
        (0..self.step_count())
            .map(|step| {
                let block = self.read_block(step, item)?;
                Ok(block.get(node).unwrap_or(f64::NAN))
            })
            .collect()
    }

    /// Stream every block in file order
    pub fn blocks(&mut self) -> Blocks<'_, R> {
        Blocks {
            file: self,
            next: (0, 0),
        }
    }
}

/// Iterator over `(step, item, block)` in file order. Stops after the first error.
pub struct Blocks<'a, R> {
    file: &'a mut Dfs1File<R>,
    next: (usize, usize),
}

impl<'a, R: Read + Seek> Iterator for Blocks<'a, R> {
    type Item = Result<(usize, usize, DataBlock)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (step, item) = self.next;
        if step >= self.file.step_count() {
            return None;
        }

        self.next = if item + 1 == self.file.n_items() {
            (step + 1, 0)
        } else {
            (step, item + 1)
        };

        match self.file.read_block(step, item) {
            Ok(block) => Some(Ok((step, item, block))),
            Err(err) => {
                self.next = (self.file.step_count(), 0);
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use ndarray::array;
    use std::io::Cursor;

    #[test]
    fn open() -> Result<()> {
        let file = testing::open(testing::file_bytes(testing::fixed_axis(3))?)?;
        assert_eq!(file.step_count(), 3);
        assert_eq!(file.n_items(), 2);
        assert_eq!(file.items(), &testing::items()[..]);
        assert_eq!(file.grid().nx(), 5);
        assert_eq!(file.grid().dx(), 100.0);
        assert_eq!(file.time_axis(), &testing::fixed_axis(3));
        assert_eq!(file.item_index("Current Speed"), Some(1));
        assert_eq!(file.item_index("Salinity"), None);

        Ok(())
    }

    #[test]
    fn read_blocks() -> Result<()> {
        let mut file = testing::open(testing::file_bytes(testing::fixed_axis(3))?)?;
        for step in 0..3 {
            for item in 0..2 {
                let block = file.read_block(step, item)?;
                assert_eq!(block.to_f64(), testing::block(step, item, 5));
            }
        }
        assert_eq!(
            file.read_block(2, 0)?.value_type(),
            crate::eum::ValueType::Float32
        );
        assert_eq!(
            file.read_block(2, 1)?.value_type(),
            crate::eum::ValueType::Float64
        );

        Ok(())
    }

    #[test]
    fn read_past_the_end() -> Result<()> {
        let mut file = testing::open(testing::file_bytes(testing::fixed_axis(3))?)?;
        assert!(matches!(
            file.read_block(3, 0),
            Err(Error::TimestepOutOfRange {
                timestep: 3,
                step_count: 3
            })
        ));

        Ok(())
    }

    #[test]
    fn read_item() -> Result<()> {
        let mut file = testing::open(testing::file_bytes(testing::fixed_axis(2))?)?;
        let data = file.read_item(1)?;
        assert_eq!(
            data,
            array![[5.0, 5.5, 6.0, 6.5, 7.0], [55.0, 55.5, 56.0, 56.5, 57.0]]
        );

        let all = file.read_all()?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[1], data);
        assert!(matches!(
            file.read_item(2),
            Err(Error::ItemOutOfRange { .. })
        ));

        Ok(())
    }

    #[test]
    fn read_nearest() -> Result<()> {
        let mut file = testing::open(testing::file_bytes(testing::fixed_axis(2))?)?;
        // Nodes are at 0, 100, 200, 300, 400
        assert_eq!(file.read_nearest(0, 260.0)?, array![1.5, 51.5]);
        assert_eq!(file.read_nearest(0, 1e6)?, array![2.0, 52.0]);

        Ok(())
    }

    #[test]
    fn blocks() -> Result<()> {
        let mut file = testing::open(testing::file_bytes(testing::fixed_axis(2))?)?;
        let order: Vec<(usize, usize)> = file
            .blocks()
            .map(|block| block.map(|(step, item, _)| (step, item)))
            .collect::<Result<_>>()?;
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);

        Ok(())
    }

    #[test]
    fn variable_time_axis() -> Result<()> {
        let time_axis = testing::variable_axis(&[10.0, 20.0, 5.0]);
        let mut file = testing::open(testing::file_bytes(time_axis.clone())?)?;
        assert_eq!(file.time_axis(), &time_axis);
        assert_eq!(file.read_block(2, 1)?.to_f64(), testing::block(2, 1, 5));

        Ok(())
    }

    #[test]
    fn truncated_data() -> Result<()> {
        let mut bytes = testing::file_bytes(testing::fixed_axis(3))?;
        bytes.truncate(bytes.len() - 10);
        let mut file = testing::open(bytes)?;

        file.read_block(1, 1)?;
        assert!(matches!(
            file.read_block(2, 1),
            Err(Error::TruncatedStream { .. })
        ));
        let errors: Vec<_> = file.blocks().filter_map(|block| block.err()).collect();
        assert_eq!(errors.len(), 1);

        Ok(())
    }

    #[test]
    fn oversized_grid_fails_on_read() -> Result<()> {
        let mut bytes = testing::file_bytes(testing::fixed_axis(1))?;
        // Prelude, empty title, delete value, origin and dx come before nx
        let nx_offset = 27 + 1 + 8 + 16;
        bytes[nx_offset..nx_offset + 4].copy_from_slice(&(1_u32 << 31).to_le_bytes());
        bytes[15..23].copy_from_slice(&u64::MAX.to_le_bytes());

        let mut file = testing::open(bytes)?;
        assert_eq!(file.grid().nx(), 1 << 31);
        assert!(matches!(
            file.read_block(0, 0),
            Err(Error::TruncatedStream {
                expected: 0x2_0000_0000,
                ..
            })
        ));
        assert!(matches!(
            file.read_item(1),
            Err(Error::TruncatedStream { .. })
        ));

        Ok(())
    }

    #[test]
    fn truncated_durations_fail_open() -> Result<()> {
        let mut bytes = testing::file_bytes(testing::variable_axis(&[1.0, 1.0]))?;
        // Cut into the second step's duration
        bytes.truncate(bytes.len() - 64);
        assert!(matches!(
            testing::open(bytes),
            Err(Error::TruncatedStream { .. })
        ));

        Ok(())
    }

    #[test]
    fn not_a_dfs1_file() {
        let bytes = b"DCDF and then some other stuff entirely".to_vec();
        assert!(matches!(
            Dfs1File::open(Cursor::new(bytes)),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn close() -> Result<()> {
        let mut file = testing::open(testing::file_bytes(testing::fixed_axis(1))?)?;
        file.close();
        assert!(file.is_closed());
        file.close();
        assert!(matches!(file.read_block(0, 0), Err(Error::Closed)));
        assert!(file.into_inner().is_none());

        Ok(())
    }
}
