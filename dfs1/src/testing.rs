//! Fixtures shared by tests across the crate.

use std::io::Cursor;

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{Array1, Array2};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::errors::Result;
use crate::eum::{Unit, ValueType};
use crate::file::Dfs1File;
use crate::geom::GridAxis;
use crate::header::{Header, DEFAULT_DELETE_VALUE};
use crate::item::ItemDefinition;
use crate::time::TimeAxis;
use crate::writer::Dfs1Writer;

pub(crate) fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1993, 12, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub(crate) fn fixed_axis(step_count: usize) -> TimeAxis {
    TimeAxis::fixed(start(), 3600.0, step_count).unwrap()
}

pub(crate) fn variable_axis(durations: &[f64]) -> TimeAxis {
    TimeAxis::variable(start(), durations.to_vec()).unwrap()
}

pub(crate) fn grid() -> GridAxis {
    GridAxis::new(0.0, 100.0, 5).unwrap()
}

/// A water level item stored as f32 and a current speed item stored as f64
pub(crate) fn items() -> Vec<ItemDefinition> {
    vec![
        ItemDefinition::new("Water Level", Unit::Meter),
        ItemDefinition::new("Current Speed", Unit::MeterPerSecond)
            .with_value_type(ValueType::Float64),
    ]
}

pub(crate) fn header(time_axis: &TimeAxis) -> Header {
    Header::new(
        String::from("test"),
        DEFAULT_DELETE_VALUE,
        grid(),
        items(),
        time_axis,
    )
    .unwrap()
}

/// Deterministic pseudo random data for every item, shaped (steps, nx)
pub(crate) fn random_data(seed: u64, steps: usize, nx: usize, n_items: usize) -> Vec<Array2<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_items)
        .map(|_| Array2::from_shape_fn((steps, nx), |_| rng.gen_range(-100.0..100.0)))
        .collect()
}

/// Values of item `item` at `step`, formed so they survive storage as f32 unchanged
pub(crate) fn block(step: usize, item: usize, nx: usize) -> Array1<f64> {
    Array1::from_iter((0..nx).map(|i| (step * 100 + item * 10 + i) as f64 * 0.5))
}

/// Write a complete in-memory file with the fixture grid and items, using `block` for values.
pub(crate) fn file_bytes(time_axis: TimeAxis) -> Result<Vec<u8>> {
    let steps = time_axis.step_count();
    let mut writer = Dfs1Writer::create(Cursor::new(Vec::new()), grid(), items(), time_axis)?;
    for step in 0..steps {
        for item in 0..2 {
            writer.write_block(step, item, block(step, item, 5).view())?;
        }
    }

    Ok(writer.finish()?.into_inner())
}

pub(crate) fn open(bytes: Vec<u8>) -> Result<Dfs1File<Cursor<Vec<u8>>>> {
    Dfs1File::open(Cursor::new(bytes))
}
