use std::collections::BTreeSet;

use crate::row::RowId;

/// Row selection keyed by id, plus the "every row of the remote result"
/// mode. Ids never refer to positions, so reordering keeps the selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    selected: BTreeSet<RowId>,
    all_pages: bool,
}

impl SelectionState {
    #[must_use]
    pub fn is_selected(&self, row_id: &RowId) -> bool {
        self.all_pages || self.selected.contains(row_id)
    }

    #[must_use]
    pub fn is_all_pages(&self) -> bool {
        self.all_pages
    }

    #[must_use]
    pub fn selected_ids(&self) -> &BTreeSet<RowId> {
        &self.selected
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.all_pages && self.selected.is_empty()
    }

    pub fn set(&mut self, row_id: &RowId, selected: bool) -> bool {
        if selected {
            self.selected.insert(row_id.clone())
        } else {
            self.selected.remove(row_id)
        }
    }

    pub fn toggle(&mut self, row_id: &RowId) {
        if !self.selected.remove(row_id) {
            self.selected.insert(row_id.clone());
        }
    }

    pub fn replace<I>(&mut self, ids: I) -> bool
    where
        I: IntoIterator<Item = RowId>,
    {
        let next: BTreeSet<RowId> = ids.into_iter().collect();
        if next == self.selected {
            return false;
        }
        self.selected = next;
        true
    }

    pub fn set_all_pages(&mut self, enabled: bool) -> bool {
        let changed = self.all_pages != enabled;
        self.all_pages = enabled;
        changed
    }

    pub fn forget(&mut self, row_id: &RowId) -> bool {
        self.selected.remove(row_id)
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.all_pages = false;
    }
}
