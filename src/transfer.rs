//! Transfer lists - payload items moved to the receiver instead of copied.
//!
//! A [`TransferList`] belongs to exactly one outbound message. Items are
//! marked on it right before the send it accompanies, and the send drains
//! it. There is no process-wide buffer, so two interleaved calls can never
//! pick up each other's items.
//!
//! Whether an item is actually moved is the channel's decision: the local
//! channel hands over the same buffer, a byte-stream channel has to copy.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use workwire::transfer::TransferList;
//!
//! let mut list = TransferList::new();
//! list.mark(Bytes::from_static(b"frame"));
//! assert_eq!(list.len(), 1);
//!
//! let items = list.drain();
//! assert_eq!(items.len(), 1);
//! assert!(list.is_empty());
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A payload item eligible for ownership transfer.
pub type Transferable = Bytes;

/// Ordered set of items travelling with a single message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferList {
    items: Vec<Transferable>,
}

impl TransferList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an item for transfer with the next send of this list.
    pub fn mark(&mut self, item: impl Into<Transferable>) {
        self.items.push(item.into());
    }

    /// Take every marked item, leaving the list empty.
    pub fn drain(&mut self) -> TransferList {
        Self {
            items: std::mem::take(&mut self.items),
        }
    }

    /// Number of marked items.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if nothing is marked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Borrow the marked items.
    pub fn items(&self) -> &[Transferable] {
        &self.items
    }

    /// Consume the list into its items.
    pub fn into_items(self) -> Vec<Transferable> {
        self.items
    }
}

impl From<Vec<Transferable>> for TransferList {
    fn from(items: Vec<Transferable>) -> Self {
        Self { items }
    }
}

impl FromIterator<Transferable> for TransferList {
    fn from_iter<I: IntoIterator<Item = Transferable>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for TransferList {
    type Item = Transferable;
    type IntoIter = std::vec::IntoIter<Transferable>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_preserves_order() {
        let mut list = TransferList::new();
        list.mark(Bytes::from_static(b"a"));
        list.mark(vec![b'b']);
        list.mark(Bytes::from_static(b"c"));

        let items: Vec<_> = list.into_iter().collect();
        assert_eq!(items, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    }

    #[test]
    fn test_drain_empties_list() {
        let mut list = TransferList::new();
        list.mark(Bytes::from_static(b"payload"));

        let drained = list.drain();
        assert_eq!(drained.len(), 1);
        assert!(list.is_empty());

        // Second drain yields nothing
        assert!(list.drain().is_empty());
    }

    #[test]
    fn test_drain_does_not_copy() {
        let buf = Bytes::from(vec![7u8; 4096]);
        let mut list = TransferList::new();
        list.mark(buf.clone());

        let drained = list.drain();
        assert_eq!(drained.items()[0].as_ptr(), buf.as_ptr());
    }
}
