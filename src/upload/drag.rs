use super::schema::{DragState, FileHandle};

/// A pointer drag/drop event delivered to the drop target.
///
/// Implemented by the presentation layer over its toolkit's event type.
pub trait DropTargetEvent {
    /// Suppress the host's default handling (e.g. navigating to a dropped file).
    fn prevent_default(&mut self);
    /// Keep the event from reaching ancestors of the drop target.
    fn stop_propagation(&mut self);
    /// Files carried by the event. Empty for everything but drops.
    fn take_files(&mut self) -> Vec<FileHandle>;
}

/// Plain drag event, for hosts without their own event type and for tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DragEvent {
    pub files: Vec<FileHandle>,
    pub default_prevented: bool,
    pub propagation_stopped: bool,
}

impl DragEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(files: Vec<FileHandle>) -> Self {
        Self {
            files,
            ..Self::default()
        }
    }
}

impl DropTargetEvent for DragEvent {
    fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    fn take_files(&mut self) -> Vec<FileHandle> {
        std::mem::take(&mut self.files)
    }
}

/// Tracks whether a drag is hovering the drop target.
///
/// Every handler consumes the event so nested elements inside the
/// target never see enter/leave pairs of their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DragTracker {
    active: bool,
}

impl DragTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> DragState {
        DragState {
            is_active: self.active,
        }
    }

    pub fn on_drag_enter(&mut self, event: &mut impl DropTargetEvent) {
        consume(event);
        self.active = true;
    }

    /// Over events fire continuously; only the first one after a leave
    /// writes the flag. Returns whether the state changed.
    pub fn on_drag_over(&mut self, event: &mut impl DropTargetEvent) -> bool {
        consume(event);
        if self.active {
            return false;
        }
        self.active = true;
        true
    }

    pub fn on_drag_leave(&mut self, event: &mut impl DropTargetEvent) {
        consume(event);
        self.active = false;
    }

    /// Ends the drag and hands back the dropped files, if any.
    pub fn on_drop(&mut self, event: &mut impl DropTargetEvent) -> Option<Vec<FileHandle>> {
        consume(event);
        self.active = false;
        let files = event.take_files();
        (!files.is_empty()).then_some(files)
    }
}

fn consume(event: &mut impl DropTargetEvent) {
    event.prevent_default();
    event.stop_propagation();
}
