//! Handler registry and event delivery.
//!
//! Hosts register callbacks under string identifiers. For every decoded
//! event the dispatcher builds the ordered candidate list, most generic
//! first, and invokes every registered handler along it. Delivery is not
//! first-match-wins; the ordering is semantic, all present handlers fire.

use std::collections::HashMap;
use std::fmt;

use smallvec::SmallVec;
use tracing::trace;

use crate::config::EngineSettings;
use crate::event::{MidiEvent, MidiMessage};

/// Handler callback. Runs synchronously on the delivery thread and is
/// expected to return promptly; a blocking handler stalls all subsequent
/// MIDI delivery.
pub type Handler = Box<dyn FnMut(&MidiEvent)>;

/// Mapping from handler identifier to registered callback.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn register(
        &mut self,
        label: impl Into<String>,
        handler: impl FnMut(&MidiEvent) + 'static,
    ) {
        self.handlers.insert(label.into(), Box::new(handler));
    }

    /// Remove a handler. Returns whether one was registered under `label`.
    pub fn unregister(&mut self, label: &str) -> bool {
        self.handlers.remove(label).is_some()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.handlers.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolve `label` and invoke the handler when present. Returns whether
    /// a handler fired.
    fn invoke(&mut self, label: &str, event: &MidiEvent) -> bool {
        match self.handlers.get_mut(label) {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("labels", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Candidate handler identifiers for `event`, most generic first: the
/// catch-all prefix, the status kind, then any kind-specific refinements
/// (note letter, full note name, note number for the note family; parameter
/// number for ControlChange and ProgramChange; subtype for system messages).
pub fn candidate_labels(prefix: &str, event: &MidiEvent) -> SmallVec<[String; 6]> {
    let mut labels = SmallVec::new();
    labels.push(prefix.to_string());

    let kind = event.message.kind_label();
    labels.push(format!("{prefix}{kind}"));

    match &event.message {
        MidiMessage::NoteOff { note, .. }
        | MidiMessage::NoteOn { note, .. }
        | MidiMessage::Aftertouch { note, .. } => {
            labels.push(format!("{prefix}{kind}{}", note.pitch_class()));
            labels.push(format!("{prefix}{kind}{}", note.name()));
            labels.push(format!("{prefix}{kind}{}", note.number()));
        }
        MidiMessage::ControlChange { controller, .. } => {
            labels.push(format!("{prefix}{kind}{controller}"));
        }
        MidiMessage::ProgramChange { program } => {
            labels.push(format!("{prefix}{kind}{program}"));
        }
        MidiMessage::System(sys) => {
            labels.push(format!("{prefix}{}", sys.label()));
        }
        MidiMessage::ChannelPressure { .. } | MidiMessage::PitchWheel { .. } => {}
    }

    labels
}

/// Walks the candidate list and fires every registered handler.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    handlers: HandlerRegistry,
}

impl EventDispatcher {
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    /// Deliver `event` to every matching handler, in candidate order.
    /// Returns whether at least one candidate resolved. Dispatch disabled
    /// means no delivery and an unhandled result.
    pub fn deliver(&mut self, settings: &EngineSettings, event: &MidiEvent) -> bool {
        if !settings.dispatch_enabled {
            return false;
        }
        let labels = candidate_labels(&settings.handler_prefix, event);
        let mut handled = false;
        for label in &labels {
            if self.handlers.invoke(label, event) {
                handled = true;
            }
        }
        trace!(?labels, handled, "delivered MIDI event");
        handled
    }
}
