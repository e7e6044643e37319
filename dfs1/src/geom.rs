use std::fmt;
use std::io::{Read, Write};
use std::ops::Range;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::cursor::{self, BinaryCursor};
use crate::errors::{Error, Result};

/// Grid parameters as stored in a file.
///
/// Node `i` sits at `origin_offset + i * dx`. The origin itself is arbitrary, only offsets from it
/// carry meaning.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridAxis {
    origin_offset: f64,
    dx: f64,
    nx: usize,
}

impl GridAxis {
    pub fn new(origin_offset: f64, dx: f64, nx: usize) -> Result<Self> {
        let axis = Self {
            origin_offset,
            dx,
            nx,
        };
        axis.validate()?;

        Ok(axis)
    }

    pub fn origin_offset(&self) -> f64 {
        self.origin_offset
    }

    pub fn dx(&self) -> f64 {
        self.dx
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Check the invariants that `new` enforces. Values that arrive through deserialization skip
    /// `new`, so encoding checks again.
    pub fn validate(&self) -> Result<()> {
        if !self.origin_offset.is_finite() {
            return Err(Error::InvalidGeometry(format!(
                "origin offset must be finite, got {}",
                self.origin_offset
            )));
        }
        if !(self.dx.is_finite() && self.dx > 0.0) {
            return Err(Error::InvalidGeometry(format!(
                "dx must be positive and finite, got {}",
                self.dx
            )));
        }
        if self.nx == 0 {
            return Err(Error::InvalidGeometry(String::from(
                "grid must have at least one node",
            )));
        }
        if self.nx > u32::MAX as usize {
            return Err(Error::InvalidGeometry(format!(
                "{} nodes can't be stored, maximum is {}",
                self.nx,
                u32::MAX
            )));
        }

        Ok(())
    }
}

impl cursor::Serialize for GridAxis {
    fn write_to(&self, cursor: &mut BinaryCursor<impl Write>) -> Result<()> {
        self.validate()?;
        cursor.write_f64(self.origin_offset)?;
        cursor.write_f64(self.dx)?;
        cursor.write_u32(self.nx as u32)?;

        Ok(())
    }

    /// Read grid parameters without validating them. Validation is up to the header, which knows
    /// how to report a bad value as corruption.
    fn read_from(cursor: &mut BinaryCursor<impl Read>) -> Result<Self> {
        let origin_offset = cursor.read_f64()?;
        let dx = cursor.read_f64()?;
        let nx = cursor.read_u32()? as usize;

        Ok(Self {
            origin_offset,
            dx,
            nx,
        })
    }

    fn size(&self) -> u64 {
        8 + 8 + 4
    }
}

/// Which nodes of a `Grid1D` to keep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// A single node
    Index(usize),

    /// Nodes `start..stop`. Only `step == 1` can be represented as a grid.
    Slice {
        start: usize,
        stop: usize,
        step: isize,
    },

    /// Explicit node indices. Must be contiguous and increasing.
    Indices(Vec<usize>),
}

impl From<usize> for Selection {
    fn from(index: usize) -> Self {
        Selection::Index(index)
    }
}

impl From<Range<usize>> for Selection {
    fn from(range: Range<usize>) -> Self {
        Selection::Slice {
            start: range.start,
            stop: range.end,
            step: 1,
        }
    }
}

impl From<Vec<usize>> for Selection {
    fn from(indices: Vec<usize>) -> Self {
        Selection::Indices(indices)
    }
}

/// Linear interpolation weights for a coordinate between two neighboring nodes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interpolant {
    pub indices: [usize; 2],
    pub weights: [f64; 2],
}

impl Interpolant {
    /// Weighted sum of the two bracketing values in `values`.
    pub fn interp(&self, values: ArrayView1<f64>) -> Result<f64> {
        let mut value = 0.0;
        for (&index, &weight) in self.indices.iter().zip(&self.weights) {
            // A node with no weight doesn't get to poison the result with a NaN
            if weight != 0.0 {
                let node = values.get(index).ok_or(Error::IndexOutOfRange {
                    index,
                    len: values.len(),
                })?;
                value += weight * node;
            }
        }

        Ok(value)
    }
}

/// Equidistant 1D geometry.
///
/// An immutable value built once from a `GridAxis`. Everything it answers is computed from the
/// three grid parameters, so lookups are O(1) and nothing is cached.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridAxis", into = "GridAxis")]
pub struct Grid1D {
    axis: GridAxis,
}

impl Grid1D {
    pub fn new(axis: GridAxis) -> Result<Self> {
        axis.validate()?;

        Ok(Self { axis })
    }

    pub fn axis(&self) -> &GridAxis {
        &self.axis
    }

    /// Number of nodes
    pub fn nx(&self) -> usize {
        self.axis.nx
    }

    /// Node spacing
    pub fn dx(&self) -> f64 {
        self.axis.dx
    }

    pub fn origin_offset(&self) -> f64 {
        self.axis.origin_offset
    }

    /// Coordinate of the first node
    pub fn x0(&self) -> f64 {
        self.axis.origin_offset
    }

    /// Coordinate of the last node
    pub fn x1(&self) -> f64 {
        self.coordinate(self.nx() - 1)
    }

    /// Coordinate of node `index`. Not bounds checked.
    pub fn coordinate(&self, index: usize) -> f64 {
        self.axis.origin_offset + index as f64 * self.axis.dx
    }

    /// All node coordinates
    pub fn x(&self) -> Array1<f64> {
        Array1::from_iter((0..self.nx()).map(|i| self.coordinate(i)))
    }

    /// Index of the node nearest to `coordinate`.
    ///
    /// A coordinate exactly halfway between two nodes goes to the lower one. Coordinates off
    /// either end of the axis clamp to the boundary node. NaN maps to node 0.
    ///
    pub fn find_index(&self, coordinate: f64) -> usize {
        let position = (coordinate - self.axis.origin_offset) / self.axis.dx;
        let nearest = (position - 0.5).ceil();

        nearest.clamp(0.0, (self.nx() - 1) as f64) as usize
    }

    /// Weights for linear interpolation at `coordinate`, clamped to the ends of the axis.
    pub fn interpolant(&self, coordinate: f64) -> Interpolant {
        let last = self.nx() - 1;
        if last == 0 {
            return Interpolant {
                indices: [0, 0],
                weights: [1.0, 0.0],
            };
        }

        let position =
            ((coordinate - self.axis.origin_offset) / self.axis.dx).clamp(0.0, last as f64);
        let lower = (position.floor() as usize).min(last - 1);
        let fraction = position - lower as f64;

        Interpolant {
            indices: [lower, lower + 1],
            weights: [1.0 - fraction, fraction],
        }
    }

    /// Apply an interpolant to one timestep's worth of values on this grid.
    pub fn interp(&self, values: ArrayView1<f64>, interpolant: &Interpolant) -> Result<f64> {
        if values.len() != self.nx() {
            return Err(Error::BlockLength {
                expected: self.nx(),
                actual: values.len(),
            });
        }

        interpolant.interp(values)
    }

    /// Restrict the geometry to a contiguous run of nodes.
    pub fn isel(&self, selection: impl Into<Selection>) -> Result<Grid1D> {
        let nodes = self.selected_range(selection)?;

        Ok(Self {
            axis: GridAxis {
                origin_offset: self.coordinate(nodes.start),
                dx: self.axis.dx,
                nx: nodes.len(),
            },
        })
    }

    /// The contiguous run of node indices `selection` picks out. Never empty.
    pub fn selected_range(&self, selection: impl Into<Selection>) -> Result<Range<usize>> {
        let (start, count) = match selection.into() {
            Selection::Index(index) => {
                self.check_index(index)?;
                (index, 1)
            }
            Selection::Slice { start, stop, step } => {
                self.check_index(start)?;
                if stop > self.nx() {
                    self.check_index(stop - 1)?;
                }
                if step != 1 {
                    return Err(Error::UnsupportedSelection(format!(
                        "slice step must be 1, got {step}"
                    )));
                }
                if stop <= start {
                    return Err(Error::UnsupportedSelection(format!(
                        "slice {start}..{stop} selects no nodes"
                    )));
                }
                (start, stop - start)
            }
            Selection::Indices(indices) => {
                for &index in &indices {
                    self.check_index(index)?;
                }
                let first = *indices.first().ok_or_else(|| {
                    Error::UnsupportedSelection(String::from("no indices selected"))
                })?;
                let contiguous = indices
                    .iter()
                    .enumerate()
                    .all(|(offset, &index)| index == first + offset);
                if !contiguous {
                    return Err(Error::UnsupportedSelection(format!(
                        "indices {indices:?} are not contiguous and increasing"
                    )));
                }
                (first, indices.len())
            }
        };

        Ok(start..start + count)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.nx() {
            Err(Error::IndexOutOfRange {
                index,
                len: self.nx(),
            })
        } else {
            Ok(())
        }
    }
}

impl TryFrom<GridAxis> for Grid1D {
    type Error = Error;

    fn try_from(axis: GridAxis) -> Result<Self> {
        Self::new(axis)
    }
}

impl From<Grid1D> for GridAxis {
    fn from(grid: Grid1D) -> Self {
        grid.axis
    }
}

impl fmt::Display for Grid1D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Grid1D (n={}, dx={})", self.nx(), self.dx())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Serialize as _;
    use ndarray::array;
    use std::io::Cursor;

    fn grid(origin_offset: f64, dx: f64, nx: usize) -> Grid1D {
        Grid1D::new(GridAxis::new(origin_offset, dx, nx).unwrap()).unwrap()
    }

    #[test]
    fn test_x() {
        let grid = grid(100.0, 2.5, 5);
        assert_eq!(grid.x(), array![100.0, 102.5, 105.0, 107.5, 110.0]);
        assert_eq!(grid.x0(), 100.0);
        assert_eq!(grid.x1(), 110.0);
        assert_eq!(grid.nx(), 5);
        assert_eq!(grid.dx(), 2.5);
    }

    #[test]
    fn x_matches_axis_formula() {
        let grid = grid(-13.25, 0.1, 1000);
        let x = grid.x();
        assert_eq!(x.len(), 1000);
        for i in 0..1000 {
            assert_eq!(x[i], -13.25 + i as f64 * 0.1);
        }
    }

    #[test]
    fn find_index_exact() {
        let grid = grid(-13.25, 0.1, 1000);
        for (i, x) in grid.x().iter().enumerate() {
            assert_eq!(grid.find_index(*x), i);
        }
    }

    #[test]
    fn find_index_nearest() {
        let grid = grid(0.0, 1.0, 10);
        assert_eq!(grid.find_index(2.4), 2);
        assert_eq!(grid.find_index(2.6), 3);
        assert_eq!(grid.find_index(8.9), 9);
    }

    #[test]
    fn find_index_tie_goes_low() {
        let grid = grid(0.0, 1.0, 10);
        assert_eq!(grid.find_index(2.5), 2);
        assert_eq!(grid.find_index(0.5), 0);
        assert_eq!(grid.find_index(8.5), 8);
    }

    #[test]
    fn find_index_clamps() {
        let grid = grid(5.0, 2.0, 10);
        assert_eq!(grid.find_index(5.0 - 1000.0 * 2.0), 0);
        assert_eq!(grid.find_index(5.0 + (10.0 + 1000.0) * 2.0), 9);
        assert_eq!(grid.find_index(f64::NEG_INFINITY), 0);
        assert_eq!(grid.find_index(f64::INFINITY), 9);
        assert_eq!(grid.find_index(f64::NAN), 0);
    }

    #[test]
    fn find_index_single_node() {
        let grid = grid(3.0, 1.0, 1);
        assert_eq!(grid.find_index(-100.0), 0);
        assert_eq!(grid.find_index(100.0), 0);
    }

    #[test]
    fn isel_slice() -> Result<()> {
        let grid = grid(0.0, 2.0, 10);
        let selected = grid.isel(2..5)?;
        assert_eq!(selected.nx(), 3);
        assert_eq!(selected.dx(), 2.0);
        assert_eq!(selected.origin_offset(), 4.0);
        assert_eq!(selected.x(), array![4.0, 6.0, 8.0]);

        Ok(())
    }

    #[test]
    fn isel_index() -> Result<()> {
        let grid = grid(1.0, 0.5, 10);
        let selected = grid.isel(9)?;
        assert_eq!(selected.nx(), 1);
        assert_eq!(selected.x0(), 5.5);
        assert_eq!(selected.x1(), 5.5);

        Ok(())
    }

    #[test]
    fn isel_indices() -> Result<()> {
        let grid = grid(0.0, 1.0, 10);
        let selected = grid.isel(vec![3, 4, 5, 6])?;
        assert_eq!(selected.nx(), 4);
        assert_eq!(selected.x0(), 3.0);

        Ok(())
    }

    #[test]
    fn isel_out_of_range() {
        let grid = grid(0.0, 1.0, 10);
        assert!(matches!(
            grid.isel(10),
            Err(Error::IndexOutOfRange { index: 10, len: 10 })
        ));
        assert!(matches!(
            grid.isel(8..12),
            Err(Error::IndexOutOfRange { index: 11, len: 10 })
        ));
        assert!(matches!(
            grid.isel(vec![8, 9, 10]),
            Err(Error::IndexOutOfRange { index: 10, len: 10 })
        ));
    }

    #[test]
    fn isel_unsupported() {
        let grid = grid(0.0, 1.0, 10);
        let stepped = Selection::Slice {
            start: 0,
            stop: 10,
            step: 2,
        };
        assert!(matches!(
            grid.isel(stepped),
            Err(Error::UnsupportedSelection(_))
        ));

        let reversed = Selection::Slice {
            start: 9,
            stop: 0,
            step: -1,
        };
        assert!(matches!(
            grid.isel(reversed),
            Err(Error::UnsupportedSelection(_))
        ));

        assert!(matches!(
            grid.isel(vec![5, 4, 3]),
            Err(Error::UnsupportedSelection(_))
        ));
        assert!(matches!(
            grid.isel(vec![1, 2, 4]),
            Err(Error::UnsupportedSelection(_))
        ));
        assert!(matches!(
            grid.isel(Vec::<usize>::new()),
            Err(Error::UnsupportedSelection(_))
        ));
        assert!(matches!(
            grid.isel(4..4),
            Err(Error::UnsupportedSelection(_))
        ));
    }

    #[test]
    fn invalid_geometry() {
        assert!(matches!(
            GridAxis::new(0.0, 0.0, 10),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            GridAxis::new(0.0, -1.0, 10),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            GridAxis::new(0.0, f64::NAN, 10),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            GridAxis::new(0.0, 1.0, 0),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            GridAxis::new(f64::INFINITY, 1.0, 3),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn encode_rejects_bad_dx() {
        // Deserialization goes around the constructor
        let axis: GridAxis =
            serde_json::from_str(r#"{"origin_offset": 0.0, "dx": -2.0, "nx": 4}"#).unwrap();
        let mut cursor = BinaryCursor::new(Vec::new());
        assert!(matches!(
            axis.write_to(&mut cursor),
            Err(Error::InvalidGeometry(_))
        ));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn serialize() -> Result<()> {
        let axis = GridAxis::new(12.5, 0.25, 300)?;
        let mut cursor = BinaryCursor::new(Vec::new());
        axis.write_to(&mut cursor)?;
        assert_eq!(cursor.position(), axis.size());

        let mut cursor = BinaryCursor::new(Cursor::new(cursor.into_inner()));
        assert_eq!(GridAxis::read_from(&mut cursor)?, axis);

        Ok(())
    }

    #[test]
    fn interpolant() -> Result<()> {
        let grid = grid(0.0, 2.0, 5);
        let interpolant = grid.interpolant(3.0);
        assert_eq!(interpolant.indices, [1, 2]);
        assert_eq!(interpolant.weights, [0.5, 0.5]);

        let values = array![0.0, 10.0, 20.0, 30.0, 40.0];
        assert_eq!(grid.interp(values.view(), &interpolant)?, 15.0);
        assert_eq!(grid.interp(values.view(), &grid.interpolant(7.0))?, 35.0);

        // Clamped at both ends
        assert_eq!(grid.interp(values.view(), &grid.interpolant(-5.0))?, 0.0);
        assert_eq!(grid.interp(values.view(), &grid.interpolant(50.0))?, 40.0);

        Ok(())
    }

    #[test]
    fn interp_ignores_unweighted_nan() -> Result<()> {
        let grid = grid(0.0, 1.0, 3);
        let values = array![1.0, 2.0, f64::NAN];
        assert_eq!(grid.interp(values.view(), &grid.interpolant(1.0))?, 2.0);
        assert!(grid
            .interp(values.view(), &grid.interpolant(1.5))?
            .is_nan());

        Ok(())
    }

    #[test]
    fn interp_wrong_length() {
        let grid = grid(0.0, 1.0, 3);
        let values = array![1.0, 2.0];
        assert!(matches!(
            grid.interp(values.view(), &grid.interpolant(1.0)),
            Err(Error::BlockLength {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn interpolant_on_its_own() -> Result<()> {
        let interpolant = grid(0.0, 1.0, 5).interpolant(3.25);
        assert_eq!(interpolant.interp(array![0.0, 0.0, 0.0, 4.0, 8.0].view())?, 5.0);
        assert!(matches!(
            interpolant.interp(array![0.0, 0.0].view()),
            Err(Error::IndexOutOfRange { index: 3, len: 2 })
        ));

        Ok(())
    }

    #[test]
    fn grid_json_is_validated() -> Result<()> {
        let grid = grid(12.5, 0.25, 300);
        let json = serde_json::to_string(&grid).unwrap();
        assert_eq!(json, r#"{"origin_offset":12.5,"dx":0.25,"nx":300}"#);
        assert_eq!(serde_json::from_str::<Grid1D>(&json).unwrap(), grid);

        for bad in [
            r#"{"origin_offset": 0.0, "dx": 1.0, "nx": 0}"#,
            r#"{"origin_offset": 0.0, "dx": -2.0, "nx": 4}"#,
        ] {
            let err = serde_json::from_str::<Grid1D>(bad).unwrap_err();
            assert!(err.to_string().contains("invalid geometry"), "{err}");
        }

        Ok(())
    }

    #[test]
    fn selected_range() -> Result<()> {
        let grid = grid(-13.25, 0.1, 1000);
        assert_eq!(grid.selected_range(997..1000)?, 997..1000);
        assert_eq!(grid.selected_range(3)?, 3..4);
        assert_eq!(grid.selected_range(vec![5, 6, 7])?, 5..8);
        assert!(matches!(
            grid.selected_range(998..1001),
            Err(Error::IndexOutOfRange { .. })
        ));

        Ok(())
    }

    #[test]
    fn display() {
        assert_eq!(grid(0.0, 2.0, 10).to_string(), "Grid1D (n=10, dx=2)");
        assert_eq!(grid(0.0, 0.25, 3).to_string(), "Grid1D (n=3, dx=0.25)");
    }
}
