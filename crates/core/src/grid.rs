//! Grid geometry and deterministic packing.
//!
//! Items of identical native size are sliced into fixed-capacity
//! batches. Each batch gets its own [`GridLayout`] and every item a
//! row-major cell: the i-th item lands at `(i / cols, i % cols)`.
//! Identical input order always produces identical batches, which is
//! what lets a resumed run line up with the cache and the pending-job
//! set of the run it replaces.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::item::Item;

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// A 0-indexed grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellPosition {
    pub row: u32,
    pub col: u32,
}

impl CellPosition {
    /// 1-indexed `(row, col)` as used in prompts and model responses.
    pub fn one_based(self) -> (u32, u32) {
        (self.row + 1, self.col + 1)
    }
}

/// Rectangular cell geometry shared by every item of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    pub rows: u32,
    pub cols: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    /// Gap between adjacent cells; there is no outer margin.
    pub padding: u32,
}

impl GridLayout {
    /// Layout for `count` cells at most `columns` wide.
    ///
    /// `cols = min(count, columns)` and `rows = ceil(count / cols)`, so a
    /// group smaller than one row still gets a single-row layout sized
    /// to its own count.
    pub fn for_count(
        count: usize,
        columns: u32,
        cell_width: u32,
        cell_height: u32,
        padding: u32,
    ) -> Self {
        let count = count.max(1) as u32;
        let cols = count.min(columns.max(1));
        let rows = count.div_ceil(cols);
        Self {
            rows,
            cols,
            cell_width,
            cell_height,
            padding,
        }
    }

    /// Number of cells in the layout.
    pub fn capacity(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Full canvas width including inter-cell padding.
    pub fn canvas_width(&self) -> u32 {
        span(self.cols, self.cell_width, self.padding)
    }

    /// Full canvas height including inter-cell padding.
    pub fn canvas_height(&self) -> u32 {
        span(self.rows, self.cell_height, self.padding)
    }

    /// Row-major position of the `index`-th cell.
    pub fn position(&self, index: usize) -> CellPosition {
        let cols = self.cols.max(1) as usize;
        CellPosition {
            row: (index / cols) as u32,
            col: (index % cols) as u32,
        }
    }

    /// Every cell of the layout in row-major order.
    pub fn positions(&self) -> impl Iterator<Item = CellPosition> + '_ {
        (0..self.capacity()).map(|i| self.position(i))
    }

    /// Top-left pixel of a cell on the requested canvas.
    pub fn cell_origin(&self, pos: CellPosition) -> (u32, u32) {
        (
            pos.col * (self.cell_width + self.padding),
            pos.row * (self.cell_height + self.padding),
        )
    }
}

fn span(cells: u32, cell: u32, padding: u32) -> u32 {
    if cells == 0 {
        return 0;
    }
    cells * cell + (cells - 1) * padding
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Items sharing one layout and one remote request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub layout: GridLayout,
    pub items: Vec<Item>,
}

impl Batch {
    /// Build a batch, rejecting more items than the layout holds.
    pub fn new(layout: GridLayout, items: Vec<Item>) -> Result<Self, CoreError> {
        if items.len() > layout.capacity() {
            return Err(CoreError::GridOverflow {
                count: items.len(),
                rows: layout.rows,
                cols: layout.cols,
            });
        }
        Ok(Self { layout, items })
    }

    /// Items paired with their assigned cells.
    pub fn placements(&self) -> impl Iterator<Item = (CellPosition, &Item)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (self.layout.position(i), item))
    }

    /// Declared cell size of the batch.
    pub fn cell_size(&self) -> (u32, u32) {
        (self.layout.cell_width, self.layout.cell_height)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Packing
// ---------------------------------------------------------------------------

/// Same-size items in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeGroup {
    pub width: u32,
    pub height: u32,
    pub items: Vec<Item>,
}

/// Group items by exact `(width, height)`, groups in first-seen order.
pub fn group_by_size(items: Vec<Item>) -> Vec<SizeGroup> {
    let mut index: HashMap<(u32, u32), usize> = HashMap::new();
    let mut groups: Vec<SizeGroup> = Vec::new();

    for item in items {
        let key = item.dimensions();
        match index.get(&key) {
            Some(&i) => groups[i].items.push(item),
            None => {
                index.insert(key, groups.len());
                groups.push(SizeGroup {
                    width: key.0,
                    height: key.1,
                    items: vec![item],
                });
            }
        }
    }

    groups
}

/// Slices same-size groups into fixed-capacity batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPacker {
    /// Maximum items per batch.
    pub capacity: usize,
    /// Maximum grid width in cells.
    pub columns: u32,
    pub padding: u32,
}

impl GridPacker {
    pub fn new(capacity: usize, columns: u32, padding: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            columns: columns.max(1),
            padding,
        }
    }

    /// Pack one same-size group into consecutive batches.
    pub fn pack_group(&self, group: SizeGroup) -> Vec<Batch> {
        let SizeGroup {
            width,
            height,
            items,
        } = group;

        let mut batches = Vec::with_capacity(items.len().div_ceil(self.capacity));
        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            let chunk: Vec<Item> = items.by_ref().take(self.capacity).collect();
            let layout =
                GridLayout::for_count(chunk.len(), self.columns, width, height, self.padding);
            batches.push(Batch {
                layout,
                items: chunk,
            });
        }
        batches
    }

    /// Group by size and pack every group, groups in first-seen order.
    pub fn pack_by_size(&self, items: Vec<Item>) -> Vec<Vec<Batch>> {
        group_by_size(items)
            .into_iter()
            .map(|group| self.pack_group(group))
            .filter(|batches| !batches.is_empty())
            .collect()
    }

    /// Flat list of batches for all groups.
    pub fn pack(&self, items: Vec<Item>) -> Vec<Batch> {
        self.pack_by_size(items).into_iter().flatten().collect()
    }
}
