//! Priority resolution between two near-duplicates.

use crate::models::PriorityKey;
use std::cmp::Ordering;

/// Which side of a conflict is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The record already in the stores stays; the incoming document is dropped.
    KeepExisting,
    /// The incoming document wins and the existing one is evicted.
    KeepIncoming,
}

/// Resolves a conflict between an incoming document and an existing record.
///
/// Lower keys win: document family first, then source rank. On a full tie the
/// existing record wins, so arrival order can never promote a copy.
///
/// # Example
///
/// ```rust
/// use corpusgate::models::PriorityKey;
/// use corpusgate::services::dedup::{Resolution, resolve};
///
/// let books = PriorityKey { type_rank: 0, source_rank: 0 };
/// let web = PriorityKey { type_rank: 2, source_rank: 0 };
/// assert_eq!(resolve(web, books), Resolution::KeepExisting);
/// assert_eq!(resolve(books, web), Resolution::KeepIncoming);
/// assert_eq!(resolve(books, books), Resolution::KeepExisting);
/// ```
#[must_use]
pub fn resolve(incoming: PriorityKey, existing: PriorityKey) -> Resolution {
    match incoming.cmp(&existing) {
        Ordering::Less => Resolution::KeepIncoming,
        Ordering::Equal | Ordering::Greater => Resolution::KeepExisting,
    }
}
