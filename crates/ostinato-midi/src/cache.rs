//! Pull-style cache of the most recently decoded event.
//!
//! Not a queue: events between two queries are lost. Consumers that need
//! every event register handlers instead of polling.

use std::collections::HashMap;

use crate::device::InputHandle;
use crate::event::MidiEvent;

#[derive(Debug, Default)]
pub struct EventCache {
    last: Option<MidiEvent>,
    by_source: HashMap<InputHandle, MidiEvent>,
}

impl EventCache {
    /// Replace both the global slot and the per-source slot with `event`.
    pub fn record(&mut self, event: &MidiEvent) {
        self.by_source.insert(event.source, event.clone());
        self.last = Some(event.clone());
    }

    /// Most recent event across all inputs.
    pub fn current(&self) -> Option<&MidiEvent> {
        self.last.as_ref()
    }

    /// Most recent event that arrived on `source`.
    pub fn current_for(&self, source: InputHandle) -> Option<&MidiEvent> {
        self.by_source.get(&source)
    }
}
