//! Line items and the sorted item list used as the unit of shipping work.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::OrderError;

/// A single line item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub description: String,
    pub quantity: u32,
}

impl Item {
    /// Creates a new item.
    pub fn new(id: u64, description: impl Into<String>, quantity: u32) -> Self {
        Self {
            id,
            description: description.into(),
            quantity,
        }
    }

    /// Validates the item, rejecting a zero quantity.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                item_id: self.id,
                quantity: self.quantity,
            });
        }
        Ok(())
    }
}

/// An item list kept sorted by ascending id.
///
/// Shipping children are scheduled in this order, so the ordering must be
/// identical on every replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Item>", into = "Vec<Item>")]
pub struct Items(Vec<Item>);

impl Items {
    /// Creates a sorted list from arbitrary items.
    pub fn new(mut items: Vec<Item>) -> Self {
        items.sort_by_key(|item| item.id);
        Self(items)
    }

    /// The catalog returned when an order carries no line items of its own.
    pub fn catalog() -> Self {
        Self::new(vec![
            Item::new(654300, "Table Top", 1),
            Item::new(654321, "Table Legs", 2),
            Item::new(654322, "Keypad", 1),
        ])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Item] {
        &self.0
    }

    /// Returns the total quantity across all items.
    pub fn total_quantity(&self) -> u64 {
        self.0.iter().map(|item| u64::from(item.quantity)).sum()
    }

    /// Validates every item and rejects duplicate ids.
    pub fn validate(&self) -> Result<(), OrderError> {
        let mut seen = HashSet::with_capacity(self.0.len());
        for item in &self.0 {
            item.validate()?;
            if !seen.insert(item.id) {
                return Err(OrderError::DuplicateItem { item_id: item.id });
            }
        }
        Ok(())
    }
}

impl From<Vec<Item>> for Items {
    fn from(items: Vec<Item>) -> Self {
        Self::new(items)
    }
}

impl From<Items> for Vec<Item> {
    fn from(items: Items) -> Self {
        items.0
    }
}

impl IntoIterator for Items {
    type Item = Item;
    type IntoIter = std::vec::IntoIter<Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Items {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
