//! Device descriptors, the backend seam, and the device manager.
//!
//! The [`MidiBackend`] trait is the only place the crate touches a platform
//! MIDI API. Everything above it works in terms of enumeration indices and
//! opaque backend-issued handles, which keeps the manager testable against a
//! scripted backend.

use std::fmt;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::RawMessage;
use crate::registry::DeviceRegistry;
use crate::MidiError;

/// Zero-based enumeration index assigned per direction.
pub type DeviceId = u32;

/// Direction of a MIDI port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => f.write_str("input"),
            PortDirection::Output => f.write_str("output"),
        }
    }
}

/// Driver version reported by the device capability record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverVersion {
    pub major: u8,
    pub minor: u8,
}

/// Capability record for one enumerated device.
///
/// The set of descriptors is rebuilt wholesale on every enumeration and never
/// mutated in place. Backends that cannot report manufacturer or driver
/// metadata fill those fields with zeros.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    /// Name as reported by the driver, bounded by the platform convention.
    pub name: String,
    pub manufacturer_id: u16,
    pub product_id: u16,
    pub driver_version: DriverVersion,
}

/// Opaque handle to an open input connection, issued by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputHandle(u64);

impl InputHandle {
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque handle to an open output connection, issued by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputHandle(u64);

impl OutputHandle {
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Payload delivered over the subscription channel for every hardware message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawInput {
    pub source: InputHandle,
    pub raw: RawMessage,
    pub timestamp_micros: u64,
}

/// Platform seam for MIDI device access.
///
/// Implementations own the real OS connection objects, keyed by the handles
/// they issue. All calls are synchronous thin driver calls; none retries.
pub trait MidiBackend {
    /// Enumerate devices for one direction. Failures surface as
    /// [`MidiError::EnumerationFailed`]; no partial list is returned.
    fn enumerate(&self, direction: PortDirection) -> Result<Vec<DeviceDescriptor>, MidiError>;

    /// Acquire an input connection. The connection delivers nothing until it
    /// is started and a sink is subscribed.
    fn open_input(&mut self, device: DeviceId) -> Result<InputHandle, MidiError>;

    fn close_input(&mut self, handle: InputHandle) -> Result<(), MidiError>;

    /// Begin hardware monitoring on an open input.
    fn start_input(&mut self, handle: InputHandle) -> Result<(), MidiError>;

    /// Halt hardware monitoring on an open input.
    fn stop_input(&mut self, handle: InputHandle) -> Result<(), MidiError>;

    fn open_output(&mut self, device: DeviceId) -> Result<OutputHandle, MidiError>;

    /// Flush pending notes and close an output connection.
    fn close_output(&mut self, handle: OutputHandle) -> Result<(), MidiError>;

    /// Send a short message to an open output.
    fn send(&mut self, handle: OutputHandle, raw: RawMessage) -> Result<(), MidiError>;

    /// Install the process-wide delivery sink. Called on the transition from
    /// zero to one open inputs.
    fn subscribe(&mut self, sink: Sender<RawInput>) -> Result<(), MidiError>;

    /// Remove the delivery sink. Called on the transition from one to zero
    /// open inputs, before the last connection is torn down.
    fn unsubscribe(&mut self) -> Result<(), MidiError>;
}

/// Owns the backend, the last-enumerated descriptor sets, and the registry of
/// open handles. The manager is the only component that dereferences handles
/// for backend calls.
pub struct DeviceManager<B: MidiBackend> {
    backend: B,
    inputs: Vec<DeviceDescriptor>,
    outputs: Vec<DeviceDescriptor>,
    registry: DeviceRegistry,
    sink: Sender<RawInput>,
}

impl<B: MidiBackend> DeviceManager<B> {
    /// Create a manager around a backend. `sink` is handed to the backend
    /// whenever the subscription is (re)established.
    pub fn new(backend: B, sink: Sender<RawInput>) -> Self {
        Self {
            backend,
            inputs: Vec::new(),
            outputs: Vec::new(),
            registry: DeviceRegistry::default(),
            sink,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Re-enumerate both directions. The previous descriptor sets are
    /// replaced only when both queries succeed, so callers never observe a
    /// partially rebuilt set.
    pub fn refresh_devices(&mut self) -> Result<(), MidiError> {
        let inputs = self.backend.enumerate(PortDirection::Input)?;
        let outputs = self.backend.enumerate(PortDirection::Output)?;
        debug!(
            inputs = inputs.len(),
            outputs = outputs.len(),
            "enumerated MIDI devices"
        );
        self.inputs = inputs;
        self.outputs = outputs;
        Ok(())
    }

    pub fn inputs(&self) -> &[DeviceDescriptor] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[DeviceDescriptor] {
        &self.outputs
    }

    pub fn input_descriptor(&self, device: DeviceId) -> Option<&DeviceDescriptor> {
        self.inputs.iter().find(|descriptor| descriptor.id == device)
    }

    pub fn output_descriptor(&self, device: DeviceId) -> Option<&DeviceDescriptor> {
        self.outputs.iter().find(|descriptor| descriptor.id == device)
    }

    /// Exact-name lookup over the last enumeration. A miss is a plain `None`,
    /// not an error, so hosts can bind optional devices at startup.
    pub fn find_input(&self, name: &str) -> Option<DeviceId> {
        self.inputs
            .iter()
            .find(|descriptor| descriptor.name == name)
            .map(|descriptor| descriptor.id)
    }

    pub fn find_output(&self, name: &str) -> Option<DeviceId> {
        self.outputs
            .iter()
            .find(|descriptor| descriptor.name == name)
            .map(|descriptor| descriptor.id)
    }

    pub fn open_input_count(&self) -> usize {
        self.registry.input_count()
    }

    pub fn open_output_count(&self) -> usize {
        self.registry.output_count()
    }

    pub fn open_input_ids(&self) -> Vec<DeviceId> {
        self.registry.input_ids()
    }

    pub fn open_output_ids(&self) -> Vec<DeviceId> {
        self.registry.output_ids()
    }

    pub fn input_handle(&self, device: DeviceId) -> Option<InputHandle> {
        self.registry.input_handle(device)
    }

    pub fn input_device(&self, handle: InputHandle) -> Option<DeviceId> {
        self.registry.input_device(handle)
    }

    /// Open an input by id. Re-opening an already-open id is rejected rather
    /// than treated as a no-op; callers must close first. Returns the id as a
    /// confirmation token.
    pub fn open_input(&mut self, device: DeviceId) -> Result<DeviceId, MidiError> {
        if self.input_descriptor(device).is_none() {
            return Err(MidiError::UnknownDevice {
                direction: PortDirection::Input,
                device,
            });
        }
        if self.registry.input_handle(device).is_some() {
            return Err(MidiError::AlreadyOpen {
                direction: PortDirection::Input,
                device,
            });
        }

        let handle = self.backend.open_input(device)?;
        if let Err(err) = self.backend.start_input(handle) {
            if let Err(close_err) = self.backend.close_input(handle) {
                warn!(%close_err, device, "failed to close input after start failure");
            }
            return Err(err);
        }
        // The subscription is shared by all inputs; establish it only when
        // this open takes the count from zero to one.
        if self.registry.input_count() == 0 {
            if let Err(err) = self.backend.subscribe(self.sink.clone()) {
                if let Err(stop_err) = self.backend.stop_input(handle) {
                    warn!(%stop_err, device, "failed to stop input after subscribe failure");
                }
                if let Err(close_err) = self.backend.close_input(handle) {
                    warn!(%close_err, device, "failed to close input after subscribe failure");
                }
                return Err(err);
            }
        }
        self.registry.insert_input(device, handle);
        debug!(device, ?handle, "opened MIDI input");
        Ok(device)
    }

    /// Close an input by id. The subscription is removed before the last
    /// connection is torn down, so the callback can never fire against a
    /// handle mid-teardown. The registry slot is freed even when the backend
    /// reports stop or close failures; the first failure is still returned.
    pub fn close_input(&mut self, device: DeviceId) -> Result<(), MidiError> {
        let Some(handle) = self.registry.input_handle(device) else {
            return Err(MidiError::NotOpen {
                direction: PortDirection::Input,
                device,
            });
        };

        let mut first_failure = None;
        if self.registry.input_count() == 1 {
            if let Err(err) = self.backend.unsubscribe() {
                warn!(%err, device, "failed to unsubscribe MIDI delivery");
                first_failure.get_or_insert(err);
            }
        }
        if let Err(err) = self.backend.stop_input(handle) {
            warn!(%err, device, "failed to stop MIDI input");
            first_failure.get_or_insert(err);
        }
        if let Err(err) = self.backend.close_input(handle) {
            warn!(%err, device, "failed to close MIDI input");
            first_failure.get_or_insert(err);
        }
        self.registry.remove_input(device);
        debug!(device, "closed MIDI input");

        match first_failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Open an output by id. Outputs are write-only; no subscription is
    /// involved.
    pub fn open_output(&mut self, device: DeviceId) -> Result<DeviceId, MidiError> {
        if self.output_descriptor(device).is_none() {
            return Err(MidiError::UnknownDevice {
                direction: PortDirection::Output,
                device,
            });
        }
        if self.registry.output_handle(device).is_some() {
            return Err(MidiError::AlreadyOpen {
                direction: PortDirection::Output,
                device,
            });
        }

        let handle = self.backend.open_output(device)?;
        self.registry.insert_output(device, handle);
        debug!(device, ?handle, "opened MIDI output");
        Ok(device)
    }

    /// Close an output by id. The backend flushes pending notes before the
    /// connection goes away. The registry slot is freed even on failure.
    pub fn close_output(&mut self, device: DeviceId) -> Result<(), MidiError> {
        let Some(handle) = self.registry.output_handle(device) else {
            return Err(MidiError::NotOpen {
                direction: PortDirection::Output,
                device,
            });
        };

        let result = self.backend.close_output(handle);
        if let Err(err) = &result {
            warn!(%err, device, "failed to close MIDI output");
        }
        self.registry.remove_output(device);
        debug!(device, "closed MIDI output");
        result
    }

    /// Close every open input. The id set is snapshotted up front because
    /// closing mutates the registry being walked.
    pub fn close_all_inputs(&mut self) -> Result<(), MidiError> {
        let mut first_failure = None;
        for device in self.registry.input_ids() {
            if let Err(err) = self.close_input(device) {
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Close every open output.
    pub fn close_all_outputs(&mut self) -> Result<(), MidiError> {
        let mut first_failure = None;
        for device in self.registry.output_ids() {
            if let Err(err) = self.close_output(device) {
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Forward a raw message verbatim to every open output. Best-effort per
    /// output; a failed send is reported and the remaining outputs are still
    /// attempted. Returns the number of successful sends.
    pub fn broadcast(&mut self, raw: RawMessage) -> usize {
        let mut sent = 0;
        for handle in self.registry.output_handles() {
            match self.backend.send(handle, raw) {
                Ok(()) => sent += 1,
                Err(err) => {
                    let device = self.registry.output_device(handle);
                    warn!(%err, ?device, "pass-through send failed");
                }
            }
        }
        sent
    }
}

impl<B: MidiBackend> Drop for DeviceManager<B> {
    fn drop(&mut self) {
        let _ = self.close_all_inputs();
        let _ = self.close_all_outputs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    fn manager_with(
        inputs: &[&str],
        outputs: &[&str],
    ) -> DeviceManager<MockBackend> {
        let (sink, _events) = crossbeam_channel::unbounded();
        let mut manager = DeviceManager::new(MockBackend::with_ports(inputs, outputs), sink);
        manager.refresh_devices().unwrap();
        manager
    }

    #[test]
    fn open_rejects_unknown_and_duplicate_ids() {
        let mut manager = manager_with(&["Keys"], &[]);

        assert!(matches!(
            manager.open_input(5),
            Err(MidiError::UnknownDevice { .. })
        ));

        manager.open_input(0).unwrap();
        assert!(matches!(
            manager.open_input(0),
            Err(MidiError::AlreadyOpen { .. })
        ));
    }

    #[test]
    fn open_starts_hardware_monitoring() {
        let mut manager = manager_with(&["Keys"], &[]);
        manager.open_input(0).unwrap();
        let handle = manager.backend().input_handle_for(0).unwrap();
        assert!(manager.backend().is_started(handle));

        manager.close_input(0).unwrap();
        assert!(!manager.backend().is_started(handle));
    }

    #[test]
    fn close_rejects_never_opened_ids() {
        let mut manager = manager_with(&["Keys"], &[]);
        assert!(matches!(
            manager.close_input(0),
            Err(MidiError::NotOpen { .. })
        ));
    }

    #[test]
    fn subscription_follows_the_open_input_count() {
        let mut manager = manager_with(&["Keys", "Pads"], &[]);

        manager.open_input(0).unwrap();
        manager.open_input(1).unwrap();
        assert_eq!(manager.backend().subscribe_calls, 1);

        manager.close_input(0).unwrap();
        assert_eq!(manager.backend().unsubscribe_calls, 0);
        manager.close_input(1).unwrap();
        assert_eq!(manager.backend().unsubscribe_calls, 1);

        // Repeated cycles never stack subscriptions.
        manager.open_input(0).unwrap();
        manager.close_input(0).unwrap();
        manager.open_input(0).unwrap();
        assert_eq!(manager.backend().subscribe_calls, 3);
        assert_eq!(manager.backend().unsubscribe_calls, 2);
        assert!(manager.backend().subscribed());
    }

    #[test]
    fn teardown_order_is_unsubscribe_stop_close() {
        let mut manager = manager_with(&["Keys"], &[]);
        manager.open_input(0).unwrap();
        manager.close_input(0).unwrap();

        let log = &manager.backend().call_log;
        let unsubscribe_at = log.iter().position(|call| call == "unsubscribe").unwrap();
        let stop_at = log.iter().position(|call| call == "stop_input").unwrap();
        let close_at = log.iter().position(|call| call == "close_input").unwrap();
        assert!(unsubscribe_at < stop_at && stop_at < close_at);
    }

    #[test]
    fn close_all_inputs_empties_the_registry_and_unsubscribes() {
        let mut manager = manager_with(&["A", "B", "C"], &[]);
        for device in 0..3 {
            manager.open_input(device).unwrap();
        }
        assert_eq!(manager.open_input_count(), 3);

        manager.close_all_inputs().unwrap();
        assert_eq!(manager.open_input_count(), 0);
        assert!(!manager.backend().subscribed());
        assert_eq!(manager.backend().unsubscribe_calls, 1);
    }

    #[test]
    fn stop_failure_still_frees_the_registry_slot() {
        let mut manager = manager_with(&["Keys"], &[]);
        manager.open_input(0).unwrap();
        manager.backend_mut().fail_stop = true;

        assert!(matches!(
            manager.close_input(0),
            Err(MidiError::StopFailed { .. })
        ));
        assert_eq!(manager.open_input_count(), 0);
        // The slot is free again, so a fresh open succeeds.
        manager.backend_mut().fail_stop = false;
        manager.open_input(0).unwrap();
    }

    #[test]
    fn failed_enumeration_keeps_the_previous_sets() {
        let mut manager = manager_with(&["Keys"], &["Synth"]);
        manager.backend_mut().fail_enumerate = true;

        assert!(matches!(
            manager.refresh_devices(),
            Err(MidiError::EnumerationFailed { .. })
        ));
        assert_eq!(manager.inputs().len(), 1);
        assert_eq!(manager.outputs().len(), 1);
    }

    #[test]
    fn name_lookup_is_exact_and_miss_is_not_an_error() {
        let manager = manager_with(&["Arturia KeyStep"], &["Volca"]);
        assert_eq!(manager.find_input("Arturia KeyStep"), Some(0));
        assert_eq!(manager.find_input("Arturia"), None);
        assert_eq!(manager.find_output("Volca"), Some(0));
        assert_eq!(manager.find_output("Keys"), None);
    }

    #[test]
    fn broadcast_attempts_every_output_despite_failures() {
        let mut manager = manager_with(&[], &["A", "B", "C"]);
        for device in 0..3 {
            manager.open_output(device).unwrap();
        }
        let failing = manager.backend().output_handle_for(1).unwrap();
        manager.backend_mut().fail_send_on.insert(failing);

        let raw = RawMessage::from_bytes([0xB0, 7, 100]);
        assert_eq!(manager.broadcast(raw), 2);
        assert_eq!(manager.backend().sent.len(), 2);
    }
}
