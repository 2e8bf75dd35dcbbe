//! Reversible edit records

use std::collections::VecDeque;

use log::trace;

use super::graph::{ObjectGraph, ObjectKey};
use crate::error::CosResult;
use crate::pdf::PdfObject;

#[derive(Debug, Clone)]
pub(crate) enum UndoRecord {
    /// Object state before an edit
    Edited { key: ObjectKey, previous: PdfObject },
    Added { key: ObjectKey },
    Deleted { key: ObjectKey },
    /// Records applied together, reverted newest first
    Batch(Vec<UndoRecord>),
}

impl UndoRecord {
    pub fn revert(self, graph: &mut ObjectGraph) -> CosResult<()> {
        match self {
            UndoRecord::Edited { key, previous } => {
                trace!("Undo edit of {}", key);
                graph.restore(key, previous);
            }
            UndoRecord::Added { key } => {
                trace!("Undo add of {}", key);
                if let ObjectKey::Added(slot) = key {
                    graph.remove_added(slot);
                }
            }
            UndoRecord::Deleted { key } => {
                trace!("Undo delete of {}", key);
                if let Some(object) = graph.object_mut(key)? {
                    object.core_mut().restore();
                }
            }
            UndoRecord::Batch(records) => {
                for record in records.into_iter().rev() {
                    record.revert(graph)?;
                }
            }
        }
        Ok(())
    }
}

/// Bounded stack of undo records
#[derive(Debug, Clone)]
pub(crate) struct UndoStack {
    records: VecDeque<UndoRecord>,
    limit: usize,
}

impl UndoStack {
    pub fn new(limit: usize) -> Self {
        Self {
            records: VecDeque::new(),
            limit,
        }
    }

    pub fn push(&mut self, record: UndoRecord) {
        if self.limit == 0 {
            return;
        }
        if self.records.len() == self.limit {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn pop(&mut self) -> Option<UndoRecord> {
        self.records.pop_back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_limit_drops_oldest() {
        let mut stack = UndoStack::new(2);
        for id in 1..=3 {
            stack.push(UndoRecord::Deleted { key: ObjectKey::Id(id) });
        }
        assert_eq!(stack.len(), 2);
        assert!(matches!(stack.pop(), Some(UndoRecord::Deleted { key: ObjectKey::Id(3) })));
        assert!(matches!(stack.pop(), Some(UndoRecord::Deleted { key: ObjectKey::Id(2) })));
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_zero_limit_keeps_nothing() {
        let mut stack = UndoStack::new(0);
        stack.push(UndoRecord::Added { key: ObjectKey::Added(0) });
        assert!(stack.is_empty());
    }
}
