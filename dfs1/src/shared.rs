use std::io::{Read, Seek};
use std::sync::Arc;

use ndarray::Array2;
use parking_lot::Mutex;

use crate::errors::Result;
use crate::file::Dfs1File;
use crate::geom::Grid1D;
use crate::header::Header;
use crate::item::ItemDefinition;
use crate::series::DataBlock;
use crate::time::TimeAxis;

struct Metadata {
    header: Header,
    grid: Grid1D,
    time_axis: TimeAxis,
}

/// A read-mode file that can be shared between threads.
///
/// Clones refer to the same file. Reads take turns on the underlying stream, metadata is
/// available without waiting for them.
///
pub struct SharedDfs1File<R> {
    metadata: Arc<Metadata>,
    file: Arc<Mutex<Dfs1File<R>>>,
}

impl<R> Clone for SharedDfs1File<R> {
    fn clone(&self) -> Self {
        Self {
            metadata: Arc::clone(&self.metadata),
            file: Arc::clone(&self.file),
        }
    }
}

impl<R> SharedDfs1File<R> {
    pub fn new(file: Dfs1File<R>) -> Self {
        let metadata = Metadata {
            header: file.header().clone(),
            grid: *file.grid(),
            time_axis: file.time_axis().clone(),
        };

        Self {
            metadata: Arc::new(metadata),
            file: Arc::new(Mutex::new(file)),
        }
    }

    pub fn header(&self) -> &Header {
        &self.metadata.header
    }

    pub fn grid(&self) -> &Grid1D {
        &self.metadata.grid
    }

    pub fn items(&self) -> &[ItemDefinition] {
        &self.metadata.header.items
    }

    pub fn time_axis(&self) -> &TimeAxis {
        &self.metadata.time_axis
    }

    pub fn step_count(&self) -> usize {
        self.metadata.header.step_count
    }

    /// Close the file for every clone
    pub fn close(&self) {
        self.file.lock().close();
    }

    pub fn is_closed(&self) -> bool {
        self.file.lock().is_closed()
    }
}

impl<R: Read + Seek> SharedDfs1File<R> {
    pub fn open(stream: R) -> Result<Self> {
        Ok(Self::new(Dfs1File::open(stream)?))
    }

    pub fn read_block(&self, step: usize, item: usize) -> Result<DataBlock> {
        self.file.lock().read_block(step, item)
    }

    pub fn read_step(&self, step: usize) -> Result<Vec<DataBlock>> {
        self.file.lock().read_step(step)
    }

    /// All values of `item`, read without letting other readers in between steps
    pub fn read_item(&self, item: usize) -> Result<Array2<f64>> {
        self.file.lock().read_item(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::testing;
    use std::io::Cursor;
    use std::thread;

    #[test]
    fn concurrent_reads() -> Result<()> {
        let bytes = testing::file_bytes(testing::fixed_axis(8))?;
        let file = SharedDfs1File::open(Cursor::new(bytes))?;

        thread::scope(|scope| {
            for item in 0..2 {
                for start in 0..4 {
                    let file = file.clone();
                    scope.spawn(move || {
                        for step in (start..8).step_by(4) {
                            let block = file.read_block(step, item).unwrap();
                            assert_eq!(block.to_f64(), testing::block(step, item, 5));
                        }
                    });
                }
            }
        });

        let level = file.read_item(0)?;
        assert_eq!(level.shape(), &[8, 5]);
        assert_eq!(level.row(7), testing::block(7, 0, 5));

        Ok(())
    }

    #[test]
    fn metadata_without_locking() -> Result<()> {
        let bytes = testing::file_bytes(testing::fixed_axis(2))?;
        let file = SharedDfs1File::open(Cursor::new(bytes))?;

        let _guard = file.file.lock();
        assert_eq!(file.step_count(), 2);
        assert_eq!(file.grid().nx(), 5);
        assert_eq!(file.items().len(), 2);
        assert_eq!(file.time_axis(), &testing::fixed_axis(2));

        Ok(())
    }

    #[test]
    fn close_is_shared() -> Result<()> {
        let bytes = testing::file_bytes(testing::fixed_axis(1))?;
        let file = SharedDfs1File::open(Cursor::new(bytes))?;
        let other = file.clone();

        other.close();
        assert!(file.is_closed());
        assert!(matches!(file.read_step(0), Err(Error::Closed)));

        Ok(())
    }
}
