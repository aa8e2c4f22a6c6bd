use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::device::Device;
use crate::queue::TxEntry;

/// The mutable per-bus state shared between IPC ingress and the service loop.
///
/// `devices` stays in declared-chain order; `index` maps device id to its
/// position and never diverges from it. `next_device_id` is 0 (nothing
/// primed) or the id of a device currently present.
#[derive(Debug)]
pub struct BusState {
    devices: Vec<Device>,
    index: HashMap<u8, usize>,
    pub next_device_id: u8,
}

impl BusState {
    pub fn new(devices: Vec<Device>) -> Self {
        let index = devices
            .iter()
            .enumerate()
            .map(|(pos, d)| (d.id, pos))
            .collect();
        Self {
            devices,
            index,
            next_device_id: 0,
        }
    }

    /// Device ids in chain order.
    pub fn device_ids(&self) -> Vec<u8> {
        self.devices.iter().map(|d| d.id).collect()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn contains(&self, device_id: u8) -> bool {
        self.index.contains_key(&device_id)
    }

    /// Queue an outbound entry. Returns false if the device is unknown.
    pub fn enqueue(&mut self, device_id: u8, entry: TxEntry) -> bool {
        match self.device_mut(device_id) {
            Some(device) => {
                device.tx_queue.enqueue(entry);
                true
            }
            None => false,
        }
    }

    pub fn pop_front(&mut self, device_id: u8) -> Option<TxEntry> {
        self.device_mut(device_id)?.tx_queue.pop_front()
    }

    pub fn queue_len(&self, device_id: u8) -> usize {
        self.device(device_id).map_or(0, |d| d.tx_queue.len())
    }

    pub fn next_msg_len(&self, device_id: u8) -> Option<u16> {
        self.device(device_id)?.next_msg_len
    }

    pub fn set_next_msg_len(&mut self, device_id: u8, len: Option<u16>) {
        if let Some(device) = self.device_mut(device_id) {
            device.next_msg_len = len;
        }
    }

    /// Keep only the devices the detection pass saw; rebuilds the id index
    /// and drops a stale next-responder hint.
    pub fn retain_devices(&mut self, seen: &HashSet<u8>) {
        self.devices.retain(|d| seen.contains(&d.id));
        self.index = self
            .devices
            .iter()
            .enumerate()
            .map(|(pos, d)| (d.id, pos))
            .collect();
        if self.next_device_id != 0 && !self.index.contains_key(&self.next_device_id) {
            self.next_device_id = 0;
        }
    }

    fn device(&self, device_id: u8) -> Option<&Device> {
        self.index.get(&device_id).map(|&pos| &self.devices[pos])
    }

    fn device_mut(&mut self, device_id: u8) -> Option<&mut Device> {
        self.index
            .get(&device_id)
            .copied()
            .map(move |pos| &mut self.devices[pos])
    }
}

/// A bus as both sides see it: the locked state plus the service-needed flag.
///
/// The flag lives outside the mutex so interrupt watchers can set it without
/// contending with a service pass in flight.
#[derive(Debug)]
pub struct SharedBus {
    id: u8,
    state: Mutex<BusState>,
    service_pending: AtomicBool,
}

impl SharedBus {
    pub fn new(id: u8, devices: Vec<Device>) -> Self {
        Self {
            id,
            state: Mutex::new(BusState::new(devices)),
            service_pending: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Lock the bus state. A poisoned lock yields the inner state; the
    /// invariants hold after every individual mutation, so a panicking
    /// holder cannot leave them broken.
    pub fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_pending(&self) {
        self.service_pending.store(true, Ordering::SeqCst);
    }

    pub fn pending(&self) -> bool {
        self.service_pending.load(Ordering::SeqCst)
    }

    pub fn take_pending(&self) -> bool {
        self.service_pending.swap(false, Ordering::SeqCst)
    }
}
