//! Engine facade tying the manager, dispatcher, and cache together.
//!
//! The engine owns the receiving end of the subscription channel. Driver
//! callbacks only enqueue; all decoding, cache updates, handler delivery,
//! and pass-through run on the host thread inside [`MidiEngine::pump`], in
//! arrival order. That single-threaded shape is what makes closing a device
//! while one of its events is mid-dispatch structurally impossible.

use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::trace;

use crate::cache::EventCache;
use crate::config::EngineSettings;
use crate::device::{DeviceDescriptor, DeviceId, DeviceManager, InputHandle, MidiBackend, RawInput};
use crate::dispatch::{EventDispatcher, HandlerRegistry};
use crate::event::{decode, MidiEvent};
use crate::MidiError;

/// Device-state change reported to the observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceChange {
    InputOpened(DeviceId),
    InputClosed(DeviceId),
    OutputOpened(DeviceId),
    OutputClosed(DeviceId),
}

/// Presentation-layer observer. Notifications are snapshots; nothing the
/// observer does affects control flow.
pub trait EngineObserver {
    fn device_state_changed(&mut self, change: DeviceChange) {
        let _ = change;
    }

    /// Called per decoded event, only while `debug_events` is enabled.
    fn event_decoded(&mut self, event: &MidiEvent) {
        let _ = event;
    }
}

pub struct MidiEngine<B: MidiBackend> {
    manager: DeviceManager<B>,
    dispatcher: EventDispatcher,
    cache: EventCache,
    settings: EngineSettings,
    events: Receiver<RawInput>,
    observer: Option<Box<dyn EngineObserver>>,
}

impl<B: MidiBackend> MidiEngine<B> {
    pub fn new(backend: B) -> Self {
        Self::with_settings(backend, EngineSettings::default())
    }

    pub fn with_settings(backend: B, settings: EngineSettings) -> Self {
        let (sink, events) = crossbeam_channel::unbounded();
        Self {
            manager: DeviceManager::new(backend, sink),
            dispatcher: EventDispatcher::default(),
            cache: EventCache::default(),
            settings,
            events,
            observer: None,
        }
    }

    pub fn manager(&self) -> &DeviceManager<B> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut DeviceManager<B> {
        &mut self.manager
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut EngineSettings {
        &mut self.settings
    }

    pub fn set_observer(&mut self, observer: Box<dyn EngineObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    pub fn refresh_devices(&mut self) -> Result<(), MidiError> {
        self.manager.refresh_devices()
    }

    pub fn inputs(&self) -> &[DeviceDescriptor] {
        self.manager.inputs()
    }

    pub fn outputs(&self) -> &[DeviceDescriptor] {
        self.manager.outputs()
    }

    pub fn open_input(&mut self, device: DeviceId) -> Result<DeviceId, MidiError> {
        let confirmed = self.manager.open_input(device)?;
        self.notify(DeviceChange::InputOpened(confirmed));
        Ok(confirmed)
    }

    /// Open an input by exact name. `Ok(None)` means no device by that name
    /// was present in the last enumeration.
    pub fn open_input_by_name(&mut self, name: &str) -> Result<Option<DeviceId>, MidiError> {
        match self.manager.find_input(name) {
            Some(device) => self.open_input(device).map(Some),
            None => Ok(None),
        }
    }

    pub fn close_input(&mut self, device: DeviceId) -> Result<(), MidiError> {
        let result = self.manager.close_input(device);
        if result.is_ok() {
            self.notify(DeviceChange::InputClosed(device));
        }
        result
    }

    pub fn close_input_by_name(&mut self, name: &str) -> Result<Option<DeviceId>, MidiError> {
        match self.manager.find_input(name) {
            Some(device) => self.close_input(device).map(|()| Some(device)),
            None => Ok(None),
        }
    }

    pub fn open_output(&mut self, device: DeviceId) -> Result<DeviceId, MidiError> {
        let confirmed = self.manager.open_output(device)?;
        self.notify(DeviceChange::OutputOpened(confirmed));
        Ok(confirmed)
    }

    pub fn open_output_by_name(&mut self, name: &str) -> Result<Option<DeviceId>, MidiError> {
        match self.manager.find_output(name) {
            Some(device) => self.open_output(device).map(Some),
            None => Ok(None),
        }
    }

    pub fn close_output(&mut self, device: DeviceId) -> Result<(), MidiError> {
        let result = self.manager.close_output(device);
        if result.is_ok() {
            self.notify(DeviceChange::OutputClosed(device));
        }
        result
    }

    pub fn close_output_by_name(&mut self, name: &str) -> Result<Option<DeviceId>, MidiError> {
        match self.manager.find_output(name) {
            Some(device) => self.close_output(device).map(|()| Some(device)),
            None => Ok(None),
        }
    }

    pub fn close_all_inputs(&mut self) -> Result<(), MidiError> {
        let open = self.manager.open_input_ids();
        let result = self.manager.close_all_inputs();
        for device in open {
            if self.manager.input_handle(device).is_none() {
                self.notify(DeviceChange::InputClosed(device));
            }
        }
        result
    }

    pub fn close_all_outputs(&mut self) -> Result<(), MidiError> {
        let open = self.manager.open_output_ids();
        let result = self.manager.close_all_outputs();
        for device in open {
            self.notify(DeviceChange::OutputClosed(device));
        }
        result
    }

    pub fn register_handler(
        &mut self,
        label: impl Into<String>,
        handler: impl FnMut(&MidiEvent) + 'static,
    ) {
        self.dispatcher.handlers_mut().register(label, handler);
    }

    pub fn unregister_handler(&mut self, label: &str) -> bool {
        self.dispatcher.handlers_mut().unregister(label)
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        self.dispatcher.handlers()
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        self.dispatcher.handlers_mut()
    }

    /// Most recent event across all inputs.
    pub fn current_event(&self) -> Option<&MidiEvent> {
        self.cache.current()
    }

    /// Most recent event from one input handle.
    pub fn current_event_for(&self, source: InputHandle) -> Option<&MidiEvent> {
        self.cache.current_for(source)
    }

    /// Drain every pending message and process each in arrival order.
    /// Returns the number of messages processed.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(input) = self.events.try_recv() {
            self.process(input);
            processed += 1;
        }
        processed
    }

    /// Wait up to `timeout` for the first message, then drain the rest.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        match self.events.recv_timeout(timeout) {
            Ok(input) => {
                self.process(input);
                1 + self.pump()
            }
            Err(_) => 0,
        }
    }

    /// Process one message synchronously, bypassing the channel. This is the
    /// delivery path for virtual sources and tests.
    pub fn inject(&mut self, input: RawInput) {
        self.process(input);
    }

    fn process(&mut self, input: RawInput) {
        let decoded = match decode(input.raw) {
            Ok(decoded) => decoded,
            Err(err) => {
                // Malformed hardware data never halts the stream, and an
                // undecodable message is not forwarded either.
                trace!(%err, raw = ?input.raw, "dropping undecodable message");
                return;
            }
        };
        let event = MidiEvent {
            message: decoded.message,
            channel: decoded.channel,
            raw: input.raw,
            source: input.source,
            timestamp_micros: input.timestamp_micros,
        };

        self.cache.record(&event);
        if self.settings.debug_events {
            if let Some(observer) = self.observer.as_mut() {
                observer.event_decoded(&event);
            }
        }

        let handled = self.dispatcher.deliver(&self.settings, &event);
        if !handled
            && self.settings.passthrough_enabled
            && self.manager.open_output_count() > 0
        {
            self.manager.broadcast(input.raw);
        }
    }

    fn notify(&mut self, change: DeviceChange) {
        if let Some(observer) = self.observer.as_mut() {
            observer.device_state_changed(change);
        }
    }
}
