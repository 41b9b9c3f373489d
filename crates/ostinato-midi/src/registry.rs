//! Bookkeeping for open device handles.
//!
//! The registry is the single owner of the deviceId/handle relations. Counts
//! are always derived from the map sizes rather than tracked separately, so
//! membership and count cannot drift apart.

use std::collections::HashMap;

use crate::device::{DeviceId, InputHandle, OutputHandle};

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    input_by_device: HashMap<DeviceId, InputHandle>,
    device_by_input: HashMap<InputHandle, DeviceId>,
    output_by_device: HashMap<DeviceId, OutputHandle>,
    device_by_output: HashMap<OutputHandle, DeviceId>,
}

impl DeviceRegistry {
    pub fn insert_input(&mut self, device: DeviceId, handle: InputHandle) {
        self.input_by_device.insert(device, handle);
        self.device_by_input.insert(handle, device);
    }

    pub fn remove_input(&mut self, device: DeviceId) -> Option<InputHandle> {
        let handle = self.input_by_device.remove(&device)?;
        self.device_by_input.remove(&handle);
        Some(handle)
    }

    pub fn input_handle(&self, device: DeviceId) -> Option<InputHandle> {
        self.input_by_device.get(&device).copied()
    }

    pub fn input_device(&self, handle: InputHandle) -> Option<DeviceId> {
        self.device_by_input.get(&handle).copied()
    }

    pub fn input_count(&self) -> usize {
        self.input_by_device.len()
    }

    /// Snapshot of the open input ids, detached from the underlying map so
    /// callers can close entries while iterating.
    pub fn input_ids(&self) -> Vec<DeviceId> {
        self.input_by_device.keys().copied().collect()
    }

    pub fn insert_output(&mut self, device: DeviceId, handle: OutputHandle) {
        self.output_by_device.insert(device, handle);
        self.device_by_output.insert(handle, device);
    }

    pub fn remove_output(&mut self, device: DeviceId) -> Option<OutputHandle> {
        let handle = self.output_by_device.remove(&device)?;
        self.device_by_output.remove(&handle);
        Some(handle)
    }

    pub fn output_handle(&self, device: DeviceId) -> Option<OutputHandle> {
        self.output_by_device.get(&device).copied()
    }

    pub fn output_device(&self, handle: OutputHandle) -> Option<DeviceId> {
        self.device_by_output.get(&handle).copied()
    }

    pub fn output_count(&self) -> usize {
        self.output_by_device.len()
    }

    pub fn output_ids(&self) -> Vec<DeviceId> {
        self.output_by_device.keys().copied().collect()
    }

    /// Snapshot of the open output handles, in no particular order.
    pub fn output_handles(&self) -> Vec<OutputHandle> {
        self.output_by_device.values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_both_directions_in_sync() {
        let mut registry = DeviceRegistry::default();
        let handle = InputHandle::from_raw(7);
        registry.insert_input(2, handle);

        assert_eq!(registry.input_handle(2), Some(handle));
        assert_eq!(registry.input_device(handle), Some(2));
        assert_eq!(registry.input_count(), 1);

        assert_eq!(registry.remove_input(2), Some(handle));
        assert_eq!(registry.input_handle(2), None);
        assert_eq!(registry.input_device(handle), None);
        assert_eq!(registry.input_count(), 0);
    }

    #[test]
    fn inputs_and_outputs_are_independent() {
        let mut registry = DeviceRegistry::default();
        registry.insert_input(0, InputHandle::from_raw(1));
        registry.insert_output(0, OutputHandle::from_raw(1));

        assert_eq!(registry.input_count(), 1);
        assert_eq!(registry.output_count(), 1);

        registry.remove_input(0);
        assert_eq!(registry.input_count(), 0);
        assert_eq!(registry.output_count(), 1);
    }

    #[test]
    fn removing_missing_entries_is_a_no_op() {
        let mut registry = DeviceRegistry::default();
        assert_eq!(registry.remove_input(9), None);
        assert_eq!(registry.remove_output(9), None);
    }
}
