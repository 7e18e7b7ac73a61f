use crate::row::RowId;

/// Discrete notifications for the host. Hosts drain them after a batch of
/// operations and re-render once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridEvent {
    DataChanged,
    SelectionChanged,
    SortChanged,
    FilterChanged,
    DirtyRowsChanged,
    ColumnsChanged,
    EditStateChanged,
    SaveFailed { row_id: RowId, message: String },
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<GridEvent>,
}

impl EventQueue {
    /// Plain state-change events are coalesced; failures are kept individually.
    pub fn push(&mut self, event: GridEvent) {
        if !matches!(event, GridEvent::SaveFailed { .. }) && self.events.contains(&event) {
            return;
        }
        self.events.push(event);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> Vec<GridEvent> {
        std::mem::take(&mut self.events)
    }
}
