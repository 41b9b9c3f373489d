//! MIDI event engine: decodes packed hardware short messages, manages
//! input/output device lifecycles under a callback-driven delivery model,
//! and routes each decoded event to string-identified handlers with
//! optional pass-through of unhandled messages to every open output.
//!
//! The platform seam is the [`device::MidiBackend`] trait; the shipped
//! implementation is [`backend_midir::MidirBackend`]. Hosts drive the engine
//! from a single thread: open devices, register handlers, then call
//! [`engine::MidiEngine::pump`] from their event loop.

use thiserror::Error;

pub mod backend_midir;
pub mod cache;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod event;
pub mod registry;

#[cfg(test)]
mod mock;

pub use cache::EventCache;
pub use config::EngineSettings;
pub use device::{
    DeviceDescriptor, DeviceId, DeviceManager, DriverVersion, InputHandle, MidiBackend,
    OutputHandle, PortDirection, RawInput,
};
pub use dispatch::{candidate_labels, EventDispatcher, HandlerRegistry};
pub use engine::{DeviceChange, EngineObserver, MidiEngine};
pub use event::{
    decode, DecodeError, MidiEvent, MidiMessage, Note, RawMessage, SystemMessage,
};

/// Errors produced by device and delivery operations. Wrapped OS failures
/// carry the backend's failure text.
#[derive(Debug, Error)]
pub enum MidiError {
    /// Device query failed; no partial device list is exposed.
    #[error("device enumeration failed: {reason}")]
    EnumerationFailed { reason: String },
    /// Id absent from the last enumeration.
    #[error("unknown {direction} device {device}")]
    UnknownDevice {
        direction: PortDirection,
        device: DeviceId,
    },
    /// The registry already holds a handle for this id; close it first.
    #[error("{direction} device {device} is already open")]
    AlreadyOpen {
        direction: PortDirection,
        device: DeviceId,
    },
    /// No handle is recorded for this id.
    #[error("{direction} device {device} is not open")]
    NotOpen {
        direction: PortDirection,
        device: DeviceId,
    },
    #[error("failed to open {direction} device {device}: {reason}")]
    OpenFailed {
        direction: PortDirection,
        device: DeviceId,
        reason: String,
    },
    #[error("failed to close {direction} device: {reason}")]
    CloseFailed {
        direction: PortDirection,
        reason: String,
    },
    #[error("failed to start input monitoring: {reason}")]
    StartFailed { reason: String },
    #[error("failed to stop input monitoring: {reason}")]
    StopFailed { reason: String },
    #[error("failed to send to output: {reason}")]
    SendFailed { reason: String },
}
