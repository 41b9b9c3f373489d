//! Hardware backend implemented with the `midir` crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutputConnection};
use parking_lot::Mutex;
use tracing::warn;

use crate::device::{
    DeviceDescriptor, DeviceId, DriverVersion, InputHandle, MidiBackend, OutputHandle,
    PortDirection, RawInput,
};
use crate::event::RawMessage;
use crate::MidiError;

const CLIENT_NAME: &str = "ostinato-midi";

/// All Notes Off controller, sent on every channel before an output closes.
const CC_ALL_NOTES_OFF: u8 = 123;

type SharedSink = Arc<Mutex<Option<Sender<RawInput>>>>;

struct OpenInput {
    connection: MidiInputConnection<()>,
    running: Arc<AtomicBool>,
}

/// Backend over `midir`. Driver callbacks do exactly one thing: push the
/// packed message into the subscribed sink. Decoding and dispatch happen on
/// the host thread.
pub struct MidirBackend {
    next_handle: u64,
    inputs: HashMap<u64, OpenInput>,
    outputs: HashMap<u64, MidiOutputConnection>,
    sink: SharedSink,
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self {
            next_handle: 1,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            sink: Arc::new(Mutex::new(None)),
        }
    }
}

impl MidirBackend {
    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn input_client() -> Result<MidiInput, String> {
        let mut input = MidiInput::new(CLIENT_NAME).map_err(|err| err.to_string())?;
        input.ignore(Ignore::None);
        Ok(input)
    }

    fn output_client() -> Result<midir::MidiOutput, String> {
        midir::MidiOutput::new(CLIENT_NAME).map_err(|err| err.to_string())
    }
}

impl MidiBackend for MidirBackend {
    fn enumerate(&self, direction: PortDirection) -> Result<Vec<DeviceDescriptor>, MidiError> {
        // midir does not expose manufacturer or driver metadata, so those
        // descriptor fields are reported as zeros.
        let descriptor = |id: DeviceId, name: String| DeviceDescriptor {
            id,
            name,
            manufacturer_id: 0,
            product_id: 0,
            driver_version: DriverVersion::default(),
        };

        let mut devices = Vec::new();
        match direction {
            PortDirection::Input => {
                let client = Self::input_client()
                    .map_err(|reason| MidiError::EnumerationFailed { reason })?;
                for (index, port) in client.ports().into_iter().enumerate() {
                    let name = client
                        .port_name(&port)
                        .map_err(|err| MidiError::EnumerationFailed {
                            reason: err.to_string(),
                        })?;
                    devices.push(descriptor(index as DeviceId, name));
                }
            }
            PortDirection::Output => {
                let client = Self::output_client()
                    .map_err(|reason| MidiError::EnumerationFailed { reason })?;
                for (index, port) in client.ports().into_iter().enumerate() {
                    let name = client
                        .port_name(&port)
                        .map_err(|err| MidiError::EnumerationFailed {
                            reason: err.to_string(),
                        })?;
                    devices.push(descriptor(index as DeviceId, name));
                }
            }
        }
        Ok(devices)
    }

    fn open_input(&mut self, device: DeviceId) -> Result<InputHandle, MidiError> {
        let client = Self::input_client().map_err(|reason| MidiError::OpenFailed {
            direction: PortDirection::Input,
            device,
            reason,
        })?;
        let ports = client.ports();
        let Some(port) = ports.get(device as usize) else {
            return Err(MidiError::OpenFailed {
                direction: PortDirection::Input,
                device,
                reason: "port index out of range".into(),
            });
        };

        let handle = InputHandle::from_raw(self.allocate());
        // Connections start gated: midir begins delivering immediately, but
        // nothing leaves the callback until start_input opens the gate and a
        // sink is subscribed.
        let running = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&running);
        let sink = Arc::clone(&self.sink);
        let connection = client
            .connect(
                port,
                CLIENT_NAME,
                move |timestamp_micros, bytes, _| {
                    if bytes.is_empty() || !gate.load(Ordering::Acquire) {
                        return;
                    }
                    let mut triplet = [0u8; 3];
                    for (slot, byte) in triplet.iter_mut().zip(bytes) {
                        *slot = *byte;
                    }
                    let guard = sink.lock();
                    if let Some(sender) = guard.as_ref() {
                        // A closed receiver only means the engine went away
                        // first during shutdown.
                        let _ = sender.send(RawInput {
                            source: handle,
                            raw: RawMessage::from_bytes(triplet),
                            timestamp_micros,
                        });
                    }
                },
                (),
            )
            .map_err(|err| MidiError::OpenFailed {
                direction: PortDirection::Input,
                device,
                reason: err.to_string(),
            })?;

        self.inputs.insert(handle.raw(), OpenInput { connection, running });
        Ok(handle)
    }

    fn close_input(&mut self, handle: InputHandle) -> Result<(), MidiError> {
        let Some(open) = self.inputs.remove(&handle.raw()) else {
            return Err(MidiError::CloseFailed {
                direction: PortDirection::Input,
                reason: "unknown input handle".into(),
            });
        };
        open.running.store(false, Ordering::Release);
        open.connection.close();
        Ok(())
    }

    fn start_input(&mut self, handle: InputHandle) -> Result<(), MidiError> {
        let Some(open) = self.inputs.get(&handle.raw()) else {
            return Err(MidiError::StartFailed {
                reason: "unknown input handle".into(),
            });
        };
        open.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_input(&mut self, handle: InputHandle) -> Result<(), MidiError> {
        let Some(open) = self.inputs.get(&handle.raw()) else {
            return Err(MidiError::StopFailed {
                reason: "unknown input handle".into(),
            });
        };
        open.running.store(false, Ordering::Release);
        Ok(())
    }

    fn open_output(&mut self, device: DeviceId) -> Result<OutputHandle, MidiError> {
        let client = Self::output_client().map_err(|reason| MidiError::OpenFailed {
            direction: PortDirection::Output,
            device,
            reason,
        })?;
        let ports = client.ports();
        let Some(port) = ports.get(device as usize) else {
            return Err(MidiError::OpenFailed {
                direction: PortDirection::Output,
                device,
                reason: "port index out of range".into(),
            });
        };
        let connection = client
            .connect(port, CLIENT_NAME)
            .map_err(|err| MidiError::OpenFailed {
                direction: PortDirection::Output,
                device,
                reason: err.to_string(),
            })?;

        let handle = OutputHandle::from_raw(self.allocate());
        self.outputs.insert(handle.raw(), connection);
        Ok(handle)
    }

    fn close_output(&mut self, handle: OutputHandle) -> Result<(), MidiError> {
        let Some(mut connection) = self.outputs.remove(&handle.raw()) else {
            return Err(MidiError::CloseFailed {
                direction: PortDirection::Output,
                reason: "unknown output handle".into(),
            });
        };
        // Silence anything still sounding before the connection goes away.
        for channel in 0..16u8 {
            if let Err(err) = connection.send(&[0xB0 | channel, CC_ALL_NOTES_OFF, 0]) {
                warn!(%err, channel, "failed to flush output before close");
                break;
            }
        }
        connection.close();
        Ok(())
    }

    fn send(&mut self, handle: OutputHandle, raw: RawMessage) -> Result<(), MidiError> {
        let Some(connection) = self.outputs.get_mut(&handle.raw()) else {
            return Err(MidiError::SendFailed {
                reason: "unknown output handle".into(),
            });
        };
        connection
            .send(&raw.bytes())
            .map_err(|err| MidiError::SendFailed {
                reason: err.to_string(),
            })
    }

    fn subscribe(&mut self, sink: Sender<RawInput>) -> Result<(), MidiError> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<(), MidiError> {
        *self.sink.lock() = None;
        Ok(())
    }
}
