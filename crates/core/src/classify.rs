//! Size classification.
//!
//! Grid packing only pays off when cells are small enough that one
//! composite request stays inside provider limits. Items whose width
//! and height both fit under the threshold are grid-eligible; the rest
//! are sent one per request.

use crate::item::Item;

/// Result of [`classify`]: input order is preserved within each side.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Partition {
    pub small: Vec<Item>,
    pub large: Vec<Item>,
}

/// Whether an item of the given dimensions may share a grid.
pub fn is_grid_eligible(width: u32, height: u32, threshold: u32) -> bool {
    width <= threshold && height <= threshold
}

/// Split items into grid-eligible and individual sets.
pub fn classify(items: Vec<Item>, threshold: u32) -> Partition {
    let (small, large) = items
        .into_iter()
        .partition(|item| is_grid_eligible(item.width, item.height, threshold));
    Partition { small, large }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemPayload;

    fn item(id: &str, width: u32, height: u32) -> Item {
        Item {
            id: id.into(),
            source: id.into(),
            width,
            height,
            fingerprint: String::new(),
            payload: ItemPayload::Image,
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(is_grid_eligible(128, 128, 128));
        assert!(!is_grid_eligible(129, 128, 128));
        assert!(!is_grid_eligible(128, 129, 128));
    }

    #[test]
    fn either_dimension_over_threshold_is_large() {
        let part = classify(
            vec![item("a", 64, 64), item("b", 256, 32), item("c", 32, 256), item("d", 150, 150)],
            150,
        );
        let small: Vec<_> = part.small.iter().map(|i| i.id.as_str()).collect();
        let large: Vec<_> = part.large.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(small, ["a", "d"]);
        assert_eq!(large, ["b", "c"]);
    }

    #[test]
    fn order_is_stable() {
        let part = classify(
            vec![item("z", 16, 16), item("big", 512, 512), item("a", 16, 16)],
            64,
        );
        let small: Vec<_> = part.small.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(small, ["z", "a"]);
    }

    #[test]
    fn empty_input() {
        assert_eq!(classify(Vec::new(), 64), Partition::default());
    }
}
