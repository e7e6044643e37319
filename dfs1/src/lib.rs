mod cursor;
mod errors;
mod eum;
mod file;
pub mod generic;
mod geom;
mod header;
mod item;
mod series;
mod shared;
mod time;
mod writer;

#[cfg(test)]
mod testing;

pub use cursor::BinaryCursor;
pub use cursor::Primitive;

pub use errors::Error;
pub use errors::Result;

pub use eum::Unit;
pub use eum::ValueType;

pub use file::Blocks;
pub use file::Dfs1File;

pub use geom::Grid1D;
pub use geom::GridAxis;
pub use geom::Interpolant;
pub use geom::Selection;

pub use header::Header;
pub use header::Stepping;
pub use header::DEFAULT_DELETE_VALUE;
pub use header::FORMAT_VERSION;
pub use header::MAGIC_NUMBER;

pub use item::ItemDefinition;

pub use series::BlockLayout;
pub use series::DataBlock;
pub use series::TimeSeriesReader;
pub use series::TimeSeriesWriter;

pub use shared::SharedDfs1File;

pub use time::TimeAxis;

pub use writer::Dfs1Builder;
pub use writer::Dfs1Writer;
