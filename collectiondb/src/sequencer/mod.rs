// Per-collection order sequencing. The cache is a hint over the store; only
// the store's compare-on-write insert decides whether an order is accepted.

use crate::error::{CollectionDbError, Result};
use crate::system_db::namespace;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;

/// Ground truth for the highest order stored in a collection.
pub trait OrderSource {
    /// Highest stored order, 0 when the collection is empty.
    fn max_order(&self, collection: &str) -> Result<i64>;
}

impl OrderSource for Connection {
    fn max_order(&self, collection: &str) -> Result<i64> {
        namespace::max_order(self, collection)
    }
}

/// Next expected order per collection, lazily filled from an [`OrderSource`].
#[derive(Default)]
pub struct OrderSequencer {
    expected: Mutex<HashMap<String, i64>>,
}

impl OrderSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The order the next insert into `collection` must carry.
    pub fn next_expected(&self, source: &dyn OrderSource, collection: &str) -> Result<i64> {
        if let Some(next) = self.expected.lock().get(collection) {
            return Ok(*next);
        }

        let next = source.max_order(collection)? + 1;
        log::debug!("Order cache for '{collection}' filled from store: next is {next}");

        let mut expected = self.expected.lock();
        Ok(*expected.entry(collection.to_string()).or_insert(next))
    }

    /// Check `submitted` against the expected order and advance past it.
    pub fn accept(&self, source: &dyn OrderSource, collection: &str, submitted: i64) -> Result<()> {
        self.next_expected(source, collection)?;

        let mut expected = self.expected.lock();
        let next = expected.entry(collection.to_string()).or_insert(1);
        if *next != submitted {
            return Err(CollectionDbError::OrderMismatch {
                collection: collection.to_string(),
                expected: *next,
                submitted,
            });
        }
        *next = submitted + 1;
        Ok(())
    }

    /// Drop the cached value so the next call recomputes from the store.
    pub fn invalidate(&self, collection: &str) {
        if self.expected.lock().remove(collection).is_some() {
            log::debug!("Order cache for '{collection}' invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Counts round trips so tests can tell cache hits from store reads.
    struct FixedMax {
        max: Cell<i64>,
        reads: Cell<usize>,
    }

    impl FixedMax {
        fn new(max: i64) -> Self {
            FixedMax {
                max: Cell::new(max),
                reads: Cell::new(0),
            }
        }
    }

    impl OrderSource for FixedMax {
        fn max_order(&self, _collection: &str) -> Result<i64> {
            self.reads.set(self.reads.get() + 1);
            Ok(self.max.get())
        }
    }

    #[test]
    fn test_empty_collection_starts_at_one() {
        let source = FixedMax::new(0);
        let sequencer = OrderSequencer::new();
        assert_eq!(sequencer.next_expected(&source, "notes").unwrap(), 1);
    }

    #[test]
    fn test_gap_free_under_sequential_use() {
        let source = FixedMax::new(0);
        let sequencer = OrderSequencer::new();
        for order in 1..=5 {
            sequencer.accept(&source, "notes", order).unwrap();
        }
        assert_eq!(sequencer.next_expected(&source, "notes").unwrap(), 6);
        assert_eq!(source.reads.get(), 1);
    }

    #[test]
    fn test_mismatch_reports_expected_and_submitted() {
        let source = FixedMax::new(3);
        let sequencer = OrderSequencer::new();
        let err = sequencer.accept(&source, "notes", 7).unwrap_err();
        match err {
            CollectionDbError::OrderMismatch {
                collection,
                expected,
                submitted,
            } => {
                assert_eq!(collection, "notes");
                assert_eq!(expected, 4);
                assert_eq!(submitted, 7);
            }
            other => panic!("unexpected error: {other}"),
        }
        // A rejected order does not advance the cache
        assert_eq!(sequencer.next_expected(&source, "notes").unwrap(), 4);
    }

    #[test]
    fn test_invalidate_recomputes_from_source() {
        let source = FixedMax::new(2);
        let sequencer = OrderSequencer::new();
        assert_eq!(sequencer.next_expected(&source, "notes").unwrap(), 3);

        // Another writer advanced the store behind the cache's back
        source.max.set(5);
        assert_eq!(sequencer.next_expected(&source, "notes").unwrap(), 3);

        sequencer.invalidate("notes");
        assert_eq!(sequencer.next_expected(&source, "notes").unwrap(), 6);
        assert_eq!(source.reads.get(), 2);
    }

    #[test]
    fn test_collections_are_independent() {
        let source = FixedMax::new(0);
        let sequencer = OrderSequencer::new();
        sequencer.accept(&source, "notes", 1).unwrap();
        sequencer.accept(&source, "notes", 2).unwrap();
        assert_eq!(sequencer.next_expected(&source, "tasks").unwrap(), 1);
        assert_eq!(sequencer.next_expected(&source, "notes").unwrap(), 3);
    }

    #[test]
    fn test_connection_source() {
        let conn = Connection::open_in_memory().unwrap();
        namespace::create(&conn, "notes").unwrap();
        let sequencer = OrderSequencer::new();
        assert_eq!(sequencer.next_expected(&conn, "notes").unwrap(), 1);
    }
}
