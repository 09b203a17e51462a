//! Units of dispatch.
//!
//! A unit maps to exactly one remote request: either a packed batch or
//! a single large item.

use serde::{Deserialize, Serialize};

use crate::grid::Batch;
use crate::item::Item;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum WorkUnit {
    Batch(Batch),
    Single(Item),
}

impl WorkUnit {
    /// Items covered by this unit, in cell order for batches.
    pub fn items(&self) -> &[Item] {
        match self {
            Self::Batch(batch) => &batch.items,
            Self::Single(item) => std::slice::from_ref(item),
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::Batch(batch) => format!(
                "batch of {} ({}x{})",
                batch.len(),
                batch.layout.cell_width,
                batch.layout.cell_height
            ),
            Self::Single(item) => item.id.clone(),
        }
    }
}
