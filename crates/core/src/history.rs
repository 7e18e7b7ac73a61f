use std::collections::VecDeque;

use crate::row::{CellAddress, CellValue, RowId};

/// Reversible cell-level patch. Histories hold patches, never table snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    pub address: CellAddress,
    pub previous: CellValue,
    pub next: CellValue,
    /// Save ticket issued for the commit that produced this entry, if any.
    pub ticket: Option<u64>,
}

impl UndoEntry {
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            address: self.address.clone(),
            previous: self.next.clone(),
            next: self.previous.clone(),
            ticket: None,
        }
    }
}

/// Bounded undo/redo stacks. Recording a new entry clears the redo stack.
#[derive(Debug)]
pub struct UndoHistory {
    undo_stack: VecDeque<UndoEntry>,
    redo_stack: Vec<UndoEntry>,
    max_depth: usize,
}

impl UndoHistory {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    pub fn record(&mut self, entry: UndoEntry) {
        if entry.previous == entry.next {
            return;
        }
        if self.undo_stack.len() == self.max_depth {
            self.undo_stack.pop_front();
        }
        self.undo_stack.push_back(entry);
        self.redo_stack.clear();
    }

    /// Pops the latest entry onto the redo stack and returns the patch to apply.
    pub fn undo(&mut self) -> Option<UndoEntry> {
        let entry = self.undo_stack.pop_back()?;
        let inverse = entry.inverse();
        self.redo_stack.push(entry);
        Some(inverse)
    }

    pub fn redo(&mut self) -> Option<UndoEntry> {
        let entry = self.redo_stack.pop()?;
        if self.undo_stack.len() == self.max_depth {
            self.undo_stack.pop_front();
        }
        self.undo_stack.push_back(entry.clone());
        Some(entry)
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    /// Drops the entry recorded for a save that was rolled back.
    pub fn discard_ticket(&mut self, ticket: u64) -> bool {
        let before = self.undo_stack.len();
        self.undo_stack.retain(|entry| entry.ticket != Some(ticket));
        before != self.undo_stack.len()
    }

    pub fn forget_row(&mut self, row_id: &RowId) {
        self.undo_stack
            .retain(|entry| &entry.address.row_id != row_id);
        self.redo_stack
            .retain(|entry| &entry.address.row_id != row_id);
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{UndoEntry, UndoHistory};
    use crate::row::{CellAddress, RowId};

    fn entry(row: &str, previous: i64, next: i64) -> UndoEntry {
        UndoEntry {
            address: CellAddress::new(row, "amount"),
            previous: json!(previous),
            next: json!(next),
            ticket: None,
        }
    }

    #[test]
    fn undo_returns_inverse_and_moves_entry_to_redo() {
        let mut history = UndoHistory::new(10);
        history.record(entry("r1", 10, 20));

        let inverse = history.undo().expect("undo entry");
        assert_eq!(inverse.next, json!(10));
        assert!(!history.can_undo());
        assert!(history.can_redo());

        let forward = history.redo().expect("redo entry");
        assert_eq!(forward.next, json!(20));
        assert!(history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn recording_clears_redo_stack() {
        let mut history = UndoHistory::new(10);
        history.record(entry("r1", 1, 2));
        history.undo();
        history.record(entry("r1", 1, 3));

        assert_eq!(history.redo_len(), 0);
        assert!(history.redo().is_none());
    }

    #[test]
    fn depth_is_bounded_and_oldest_entries_fall_off() {
        let mut history = UndoHistory::new(2);
        history.record(entry("r1", 1, 2));
        history.record(entry("r1", 2, 3));
        history.record(entry("r1", 3, 4));

        assert_eq!(history.undo_len(), 2);
        assert_eq!(history.undo().map(|inverse| inverse.next), Some(json!(3)));
        assert_eq!(history.undo().map(|inverse| inverse.next), Some(json!(2)));
        assert!(history.undo().is_none());
    }

    #[test]
    fn no_op_patches_and_forgotten_rows_are_not_kept() {
        let mut history = UndoHistory::new(10);
        history.record(entry("r1", 5, 5));
        assert!(!history.can_undo());

        history.record(entry("r1", 1, 2));
        history.record(entry("r2", 1, 2));
        history.forget_row(&RowId::new("r1"));
        assert_eq!(history.undo_len(), 1);
    }

    #[test]
    fn discard_ticket_removes_only_matching_entry() {
        let mut history = UndoHistory::new(10);
        history.record(UndoEntry {
            ticket: Some(7),
            ..entry("r1", 1, 2)
        });
        history.record(entry("r2", 1, 2));

        assert!(history.discard_ticket(7));
        assert!(!history.discard_ticket(7));
        assert_eq!(history.undo_len(), 1);
    }
}
