//! Scripted backend for exercising the manager, dispatcher, and engine
//! without hardware. Records every call so tests can assert on ordering and
//! counts.

use std::collections::{HashMap, HashSet};

use crossbeam_channel::Sender;

use crate::device::{
    DeviceDescriptor, DeviceId, DriverVersion, InputHandle, MidiBackend, OutputHandle,
    PortDirection, RawInput,
};
use crate::event::RawMessage;
use crate::MidiError;

pub struct MockBackend {
    input_names: Vec<String>,
    output_names: Vec<String>,
    next_handle: u64,
    open_inputs: HashMap<InputHandle, DeviceId>,
    started: HashSet<InputHandle>,
    open_outputs: HashMap<OutputHandle, DeviceId>,
    sink: Option<Sender<RawInput>>,

    pub call_log: Vec<String>,
    pub subscribe_calls: usize,
    pub unsubscribe_calls: usize,
    pub sent: Vec<(OutputHandle, RawMessage)>,
    pub fail_enumerate: bool,
    pub fail_stop: bool,
    pub fail_send_on: HashSet<OutputHandle>,
}

impl MockBackend {
    pub fn with_ports(inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            input_names: inputs.iter().map(|name| name.to_string()).collect(),
            output_names: outputs.iter().map(|name| name.to_string()).collect(),
            next_handle: 1,
            open_inputs: HashMap::new(),
            started: HashSet::new(),
            open_outputs: HashMap::new(),
            sink: None,
            call_log: Vec::new(),
            subscribe_calls: 0,
            unsubscribe_calls: 0,
            sent: Vec::new(),
            fail_enumerate: false,
            fail_stop: false,
            fail_send_on: HashSet::new(),
        }
    }

    pub fn subscribed(&self) -> bool {
        self.sink.is_some()
    }

    pub fn is_started(&self, handle: InputHandle) -> bool {
        self.started.contains(&handle)
    }

    pub fn input_handle_for(&self, device: DeviceId) -> Option<InputHandle> {
        self.open_inputs
            .iter()
            .find(|(_, open_device)| **open_device == device)
            .map(|(handle, _)| *handle)
    }

    pub fn output_handle_for(&self, device: DeviceId) -> Option<OutputHandle> {
        self.open_outputs
            .iter()
            .find(|(_, open_device)| **open_device == device)
            .map(|(handle, _)| *handle)
    }

    /// Push a message through the subscription channel, as the driver
    /// callback would. Panics if nothing is subscribed; tests that exercise
    /// the unsubscribed path should assert `subscribed()` instead.
    pub fn emit(&self, source: InputHandle, raw: RawMessage) {
        let sink = self.sink.as_ref().expect("no sink subscribed");
        sink.send(RawInput {
            source,
            raw,
            timestamp_micros: 0,
        })
        .expect("event channel closed");
    }

    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn descriptors(names: &[String]) -> Vec<DeviceDescriptor> {
        names
            .iter()
            .enumerate()
            .map(|(index, name)| DeviceDescriptor {
                id: index as DeviceId,
                name: name.clone(),
                manufacturer_id: 0x7D,
                product_id: index as u16 + 1,
                driver_version: DriverVersion { major: 1, minor: 0 },
            })
            .collect()
    }
}

impl MidiBackend for MockBackend {
    fn enumerate(&self, direction: PortDirection) -> Result<Vec<DeviceDescriptor>, MidiError> {
        if self.fail_enumerate {
            return Err(MidiError::EnumerationFailed {
                reason: "scripted failure".into(),
            });
        }
        let names = match direction {
            PortDirection::Input => &self.input_names,
            PortDirection::Output => &self.output_names,
        };
        Ok(Self::descriptors(names))
    }

    fn open_input(&mut self, device: DeviceId) -> Result<InputHandle, MidiError> {
        self.call_log.push("open_input".into());
        if device as usize >= self.input_names.len() {
            return Err(MidiError::OpenFailed {
                direction: PortDirection::Input,
                device,
                reason: "port index out of range".into(),
            });
        }
        let handle = InputHandle::from_raw(self.allocate());
        self.open_inputs.insert(handle, device);
        Ok(handle)
    }

    fn close_input(&mut self, handle: InputHandle) -> Result<(), MidiError> {
        self.call_log.push("close_input".into());
        self.started.remove(&handle);
        self.open_inputs.remove(&handle);
        Ok(())
    }

    fn start_input(&mut self, handle: InputHandle) -> Result<(), MidiError> {
        self.call_log.push("start_input".into());
        self.started.insert(handle);
        Ok(())
    }

    fn stop_input(&mut self, handle: InputHandle) -> Result<(), MidiError> {
        self.call_log.push("stop_input".into());
        if self.fail_stop {
            return Err(MidiError::StopFailed {
                reason: "scripted failure".into(),
            });
        }
        self.started.remove(&handle);
        Ok(())
    }

    fn open_output(&mut self, device: DeviceId) -> Result<OutputHandle, MidiError> {
        self.call_log.push("open_output".into());
        if device as usize >= self.output_names.len() {
            return Err(MidiError::OpenFailed {
                direction: PortDirection::Output,
                device,
                reason: "port index out of range".into(),
            });
        }
        let handle = OutputHandle::from_raw(self.allocate());
        self.open_outputs.insert(handle, device);
        Ok(handle)
    }

    fn close_output(&mut self, handle: OutputHandle) -> Result<(), MidiError> {
        self.call_log.push("close_output".into());
        self.open_outputs.remove(&handle);
        Ok(())
    }

    fn send(&mut self, handle: OutputHandle, raw: RawMessage) -> Result<(), MidiError> {
        if self.fail_send_on.contains(&handle) {
            return Err(MidiError::SendFailed {
                reason: "scripted failure".into(),
            });
        }
        self.sent.push((handle, raw));
        Ok(())
    }

    fn subscribe(&mut self, sink: Sender<RawInput>) -> Result<(), MidiError> {
        self.call_log.push("subscribe".into());
        self.subscribe_calls += 1;
        self.sink = Some(sink);
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<(), MidiError> {
        self.call_log.push("unsubscribe".into());
        self.unsubscribe_calls += 1;
        self.sink = None;
        Ok(())
    }
}
