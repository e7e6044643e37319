//! Whole-file transformations.
//!
//! Each operation reads from open files and writes its result as a new file to `dst`, which is
//! handed back finished. Blocks are processed one at a time, so memory use doesn't grow with the
//! length of a file.
//!
use std::io::{Read, Seek, Write};
use std::ops::Range;

use chrono::NaiveDateTime;
use ndarray::{s, Array2, Zip};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::file::Dfs1File;
use crate::geom::Selection;
use crate::item::ItemDefinition;
use crate::time::TimeAxis;
use crate::writer::Dfs1Builder;

/// Start times are stored to the millisecond, so times closer than this are the same time
const TIME_TOLERANCE: f64 = 1e-3;

/// What to keep when extracting from a file. Every field defaults to keeping everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extract {
    /// Steps to keep
    pub steps: Option<Range<usize>>,

    /// Items to keep, in the order they should appear in the new file
    pub items: Option<Vec<usize>>,

    /// Nodes to keep. Must describe a contiguous run of nodes.
    pub selection: Option<Selection>,
}

/// Definition of a new file just like `file`
fn definition<R>(file: &Dfs1File<R>) -> Dfs1Builder {
    Dfs1Builder {
        title: file.title().to_string(),
        delete_value: file.delete_value(),
        grid: *file.grid().axis(),
        items: file.items().to_vec(),
        time_axis: file.time_axis().clone(),
    }
}

fn check_items(items: &[usize], n_items: usize) -> Result<()> {
    match items.iter().find(|&&item| item >= n_items) {
        Some(&item) => Err(Error::ItemOutOfRange { item, n_items }),
        None => Ok(()),
    }
}

/// Files can be combined if they have the same geometry, items and kind of time axis.
fn check_compatible<R>(a: &Dfs1File<R>, b: &Dfs1File<R>) -> Result<()> {
    if a.grid() != b.grid() {
        return Err(Error::Incompatible(format!(
            "grids differ: {} and {}",
            a.grid(),
            b.grid()
        )));
    }
    if a.items() != b.items() {
        return Err(Error::Incompatible(String::from("items differ")));
    }

    match (a.time_axis(), b.time_axis()) {
        (
            TimeAxis::Fixed {
                step_duration: a, ..
            },
            TimeAxis::Fixed {
                step_duration: b, ..
            },
        ) if a != b => Err(Error::Incompatible(format!(
            "step durations differ: {a}s and {b}s"
        ))),
        (TimeAxis::Fixed { .. }, TimeAxis::Fixed { .. })
        | (TimeAxis::Variable { .. }, TimeAxis::Variable { .. }) => Ok(()),
        _ => Err(Error::Incompatible(String::from(
            "can't combine fixed and variable time axes",
        ))),
    }
}

/// Time axis of a file with a single step covering all of `time_axis`
fn single_step(time_axis: &TimeAxis) -> TimeAxis {
    match time_axis {
        TimeAxis::Fixed {
            start,
            step_duration,
            ..
        } => TimeAxis::Fixed {
            start: *start,
            step_duration: *step_duration,
            step_count: 1,
        },
        TimeAxis::Variable { start, durations } => TimeAxis::Variable {
            start: *start,
            durations: vec![durations.iter().sum()],
        },
    }
}

/// Apply `value * factor + offset` to the selected items, or to all items if `items` is `None`.
/// Missing values stay missing.
pub fn scale<R, W>(
    src: &mut Dfs1File<R>,
    dst: W,
    offset: f64,
    factor: f64,
    items: Option<&[usize]>,
) -> Result<W>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let n_items = src.n_items();
    let mut selected = vec![items.is_none(); n_items];
    if let Some(items) = items {
        check_items(items, n_items)?;
        for &item in items {
            selected[item] = true;
        }
    }

    let mut writer = definition(src).create(dst)?;
    for step in 0..src.step_count() {
        for (item, &selected) in selected.iter().enumerate() {
            let mut values = src.read_block(step, item)?.to_f64();
            if selected {
                values.mapv_inplace(|value| value * factor + offset);
            }
            writer.write_block(step, item, values.view())?;
        }
    }
    debug!(offset, factor, steps = src.step_count(), "scaled dfs1 file");

    writer.finish()
}

/// Copy a subset of `src` by time, item and space.
pub fn extract<R, W>(src: &mut Dfs1File<R>, dst: W, extract: &Extract) -> Result<W>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let steps = extract.steps.clone().unwrap_or(0..src.step_count());
    let time_axis = src.time_axis().slice(steps.start, steps.end)?;
    let steps = steps.start.min(steps.end)..steps.end;

    let items = match &extract.items {
        Some(items) => {
            check_items(items, src.n_items())?;
            items.clone()
        }
        None => (0..src.n_items()).collect(),
    };

    let nodes = match &extract.selection {
        Some(selection) => src.grid().selected_range(selection.clone())?,
        None => 0..src.grid().nx(),
    };
    let grid = src.grid().isel(nodes.clone())?;

    let mut definition = definition(src);
    definition.grid = *grid.axis();
    definition.items = items.iter().map(|&item| src.items()[item].clone()).collect();
    definition.time_axis = time_axis;

    let mut writer = definition.create(dst)?;
    for (new_step, step) in steps.clone().enumerate() {
        for (new_item, &item) in items.iter().enumerate() {
            let values = src.read_block(step, item)?.to_f64();
            writer.write_block(new_step, new_item, values.slice(s![nodes.clone()]))?;
        }
    }
    debug!(
        steps = steps.len(),
        items = items.len(),
        nx = grid.nx(),
        "extracted from dfs1 file"
    );

    writer.finish()
}

/// Steps of `time_axis` that come before `next` starts, and the seconds between the two starts.
fn steps_before(time_axis: &TimeAxis, next: NaiveDateTime) -> Result<(usize, f64)> {
    let start = time_axis.start();
    let offset = next.signed_duration_since(start).num_milliseconds() as f64 / 1000.0;
    if offset < 0.0 {
        return Err(Error::Incompatible(format!(
            "a file starting at {next} follows one starting at {start}"
        )));
    }

    let end = time_axis.offset(time_axis.step_count());
    if offset - end > TIME_TOLERANCE {
        return Err(Error::Incompatible(format!(
            "gap of {}s in the time axis before {next}",
            offset - end
        )));
    }

    let steps = (0..time_axis.step_count())
        .take_while(|&step| time_axis.offset(step) < offset - TIME_TOLERANCE)
        .count();
    if time_axis.is_equidistant() && (time_axis.offset(steps) - offset).abs() > TIME_TOLERANCE {
        return Err(Error::Incompatible(format!(
            "a file starting at {next} is off the time steps of one starting at {start}"
        )));
    }

    Ok((steps, offset))
}

/// Join the sources along the time axis into one file.
///
/// Sources must be in chronological order. Where two overlap the later one wins, so a source
/// only contributes the steps before the next one starts. A source ending before the next one
/// starts leaves a gap, which is `Error::Incompatible`. So is a fixed axis source that doesn't
/// start on a time step of the one before it.
///
/// The new file starts when the first source starts. With a variable time axis, the last step
/// kept from a source lasts until the next source starts.
///
pub fn concat<R, W>(sources: &mut [Dfs1File<R>], dst: W) -> Result<W>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let (first, rest) = sources
        .split_first()
        .ok_or_else(|| Error::Incompatible(String::from("nothing to concatenate")))?;
    for source in rest {
        check_compatible(first, source)?;
    }

    let mut kept = Vec::with_capacity(sources.len());
    let mut durations = Vec::new();
    for (i, source) in sources.iter().enumerate() {
        let time_axis = source.time_axis();
        let (steps, until) = match sources.get(i + 1) {
            Some(next) => {
                let (steps, offset) = steps_before(time_axis, next.time_axis().start())?;
                (steps, Some(offset))
            }
            None => (source.step_count(), None),
        };

        if let TimeAxis::Variable {
            durations: source_durations,
            ..
        } = time_axis
        {
            durations.extend_from_slice(&source_durations[..steps]);
            if let (Some(until), Some(last)) = (until, steps.checked_sub(1)) {
                if let Some(duration) = durations.last_mut() {
                    *duration = until - time_axis.offset(last);
                }
            }
        }
        kept.push(steps);
    }

    let mut definition = definition(first);
    definition.time_axis = match first.time_axis() {
        TimeAxis::Fixed {
            start,
            step_duration,
            ..
        } => TimeAxis::Fixed {
            start: *start,
            step_duration: *step_duration,
            step_count: kept.iter().sum(),
        },
        TimeAxis::Variable { start, .. } => TimeAxis::Variable {
            start: *start,
            durations,
        },
    };

    let mut writer = definition.create(dst)?;
    let mut new_step = 0;
    for (source, &steps) in sources.iter_mut().zip(&kept) {
        for step in 0..steps {
            for item in 0..source.n_items() {
                let block = source.read_block(step, item)?.to_f64();
                writer.write_block(new_step, item, block.view())?;
            }
            new_step += 1;
        }
    }
    debug!(files = sources.len(), steps = new_step, "concatenated dfs1 files");

    writer.finish()
}

fn combine<R, W, F>(a: &mut Dfs1File<R>, b: &mut Dfs1File<R>, dst: W, op: F) -> Result<W>
where
    R: Read + Seek,
    W: Write + Seek,
    F: Fn(f64, f64) -> f64,
{
    check_compatible(a, b)?;
    if a.step_count() != b.step_count() {
        return Err(Error::Incompatible(format!(
            "step counts differ: {} and {}",
            a.step_count(),
            b.step_count()
        )));
    }

    let mut writer = definition(a).create(dst)?;
    for step in 0..a.step_count() {
        for item in 0..a.n_items() {
            let x = a.read_block(step, item)?.to_f64();
            let y = b.read_block(step, item)?.to_f64();
            let values = Zip::from(&x).and(&y).map_collect(|&x, &y| op(x, y));
            writer.write_block(step, item, values.view())?;
        }
    }

    writer.finish()
}

/// Element wise `a + b`
pub fn sum<R, W>(a: &mut Dfs1File<R>, b: &mut Dfs1File<R>, dst: W) -> Result<W>
where
    R: Read + Seek,
    W: Write + Seek,
{
    combine(a, b, dst, |x, y| x + y)
}

/// Element wise `a - b`
pub fn diff<R, W>(a: &mut Dfs1File<R>, b: &mut Dfs1File<R>, dst: W) -> Result<W>
where
    R: Read + Seek,
    W: Write + Seek,
{
    combine(a, b, dst, |x, y| x - y)
}

/// A single step file with the mean over time of every node. Missing values are skipped, a node
/// that is missing at every step stays missing.
///
/// The step of a variable time axis file lasts as long as all of the source steps together.
///
pub fn avg_time<R, W>(src: &mut Dfs1File<R>, dst: W) -> Result<W>
where
    R: Read + Seek,
    W: Write + Seek,
{
    if src.step_count() == 0 {
        return Err(Error::TimestepOutOfRange {
            timestep: 0,
            step_count: 0,
        });
    }

    let mut definition = definition(src);
    definition.time_axis = single_step(src.time_axis());

    let mut writer = definition.create(dst)?;
    for item in 0..src.n_items() {
        let first = src.read_block(0, item)?.to_f64();
        let mut count = first.mapv(|value| usize::from(!value.is_nan()));
        let mut total = first.mapv(|value| if value.is_nan() { 0.0 } else { value });
        for step in 1..src.step_count() {
            let values = src.read_block(step, item)?.to_f64();
            Zip::from(&mut total)
                .and(&mut count)
                .and(&values)
                .for_each(|total, count, &value| {
                    if !value.is_nan() {
                        *total += value;
                        *count += 1;
                    }
                });
        }

        let mean = Zip::from(&total).and(&count).map_collect(|&total, &count| {
            if count == 0 {
                f64::NAN
            } else {
                total / count as f64
            }
        });
        writer.write_block(0, item, mean.view())?;
    }

    writer.finish()
}

/// Quantile `q` of `sorted` with linear interpolation between neighbours. NaN if it's empty.
fn sorted_quantile(sorted: &[f64], q: f64) -> f64 {
    let last = match sorted.len() {
        0 => return f64::NAN,
        n => n - 1,
    };
    let position = q * last as f64;
    let lower = (position.floor() as usize).min(last);
    let upper = (lower + 1).min(last);

    sorted[lower] + (position - lower as f64) * (sorted[upper] - sorted[lower])
}

/// A single step file with quantiles over time of every node.
///
/// There is one item per source item and quantile, named `Quantile {q}, {name}`. The quantiles of
/// an item are next to each other, in the order given. Missing values are skipped, a node that is
/// missing at every step stays missing. Each item is read into memory whole, one at a time.
///
pub fn quantile<R, W>(src: &mut Dfs1File<R>, dst: W, q: &[f64]) -> Result<W>
where
    R: Read + Seek,
    W: Write + Seek,
{
    if q.is_empty() {
        return Err(Error::InvalidItems(String::from("no quantiles requested")));
    }
    if let Some(bad) = q.iter().find(|q| !(0.0..=1.0).contains(*q)) {
        return Err(Error::InvalidItems(format!(
            "quantile {bad} is not between 0 and 1"
        )));
    }
    if src.step_count() == 0 {
        return Err(Error::TimestepOutOfRange {
            timestep: 0,
            step_count: 0,
        });
    }

    let mut definition = definition(src);
    definition.time_axis = single_step(src.time_axis());
    definition.items = src
        .items()
        .iter()
        .flat_map(|item| {
            q.iter().map(move |q| ItemDefinition {
                name: format!("Quantile {q}, {}", item.name),
                ..item.clone()
            })
        })
        .collect();

    let mut writer = definition.create(dst)?;
    let mut new_item = 0;
    for item in 0..src.n_items() {
        let data = src.read_item(item)?;
        let mut quantiles = Array2::from_elem((q.len(), data.ncols()), f64::NAN);
        for (node, series) in data.columns().into_iter().enumerate() {
            let mut sorted: Vec<f64> = series.iter().copied().filter(|v| !v.is_nan()).collect();
            sorted.sort_by(f64::total_cmp);
            for (j, &q) in q.iter().enumerate() {
                quantiles[[j, node]] = sorted_quantile(&sorted, q);
            }
        }

        for values in quantiles.rows() {
            writer.write_block(0, new_item, values)?;
            new_item += 1;
        }
    }
    debug!(quantiles = q.len(), items = src.n_items(), "computed quantiles");

    writer.finish()
}
