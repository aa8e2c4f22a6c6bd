//! The hub socket server.
//!
//! One thread accepts connections; each client gets a reader thread. On
//! connect a client receives the cached device-list frame (if startup has
//! produced one yet) and nothing else. Inbound frames carry batches of
//! device-bound messages: each sub-record is validated, resolved to a bus
//! and device, and queued; the first malformed or unresolvable sub-record
//! aborts the rest of its frame, but records queued before it stand. Every
//! inbound frame ends with a nudge on the service loop's wake channel.

use std::collections::HashMap;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use spihub_bus::queue::TxEntry;
use spihub_bus::wake::WakeHandle;
use spihub_bus::SharedBus;
use spihub_frame::ipc::{
    encode_device_message, parse_frame, DeviceMessage, CMD_MESSAGES_TO_DEVICES,
};
use spihub_frame::{FrameError, FrameReader, FrameWriter};
use spihub_transport::{peer_credentials, HubSocket};
use tracing::{debug, info, warn};

/// The writer half of every connected client.
#[derive(Default)]
pub struct Clients {
    writers: Mutex<HashMap<u64, FrameWriter<UnixStream>>>,
}

impl Clients {
    /// Send a frame payload to every connected client.
    ///
    /// A failing client is logged and skipped; its reader thread will
    /// notice the broken stream and drop it.
    pub fn broadcast(&self, payload: &[u8]) {
        let mut writers = self.lock();
        for (client_id, writer) in writers.iter_mut() {
            if let Err(err) = writer.send(payload) {
                warn!(client_id, error = %err, "client send failed");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, client_id: u64, writer: FrameWriter<UnixStream>) {
        self.lock().insert(client_id, writer);
    }

    fn remove(&self, client_id: u64) {
        self.lock().remove(&client_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, FrameWriter<UnixStream>>> {
        self.writers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything the server shares with the broker and the service loop.
pub struct HubShared {
    buses: HashMap<u8, Arc<SharedBus>>,
    wake: WakeHandle,
    pub clients: Clients,
    devices_list: Mutex<Option<Vec<u8>>>,
}

impl HubShared {
    pub fn new(buses: Vec<Arc<SharedBus>>, wake: WakeHandle) -> Self {
        Self {
            buses: buses.into_iter().map(|b| (b.id(), b)).collect(),
            wake,
            clients: Clients::default(),
            devices_list: Mutex::new(None),
        }
    }

    pub fn bus(&self, bus_id: u8) -> Option<&Arc<SharedBus>> {
        self.buses.get(&bus_id)
    }

    pub fn buses(&self) -> impl Iterator<Item = &Arc<SharedBus>> {
        self.buses.values()
    }

    /// Cache the bootstrap frame sent to every client that connects from
    /// now on.
    pub fn set_devices_list(&self, frame: Vec<u8>) {
        *self
            .devices_list
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    fn devices_list(&self) -> Option<Vec<u8>> {
        self.devices_list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Fans device-originated messages out to every client.
pub struct Broadcaster {
    shared: Arc<HubShared>,
}

impl Broadcaster {
    pub fn new(shared: Arc<HubShared>) -> Self {
        Self { shared }
    }
}

impl spihub_bus::ResponseSink for Broadcaster {
    fn device_message(&mut self, msg: DeviceMessage) {
        let frame = encode_device_message(&msg);
        self.shared.clients.broadcast(&frame);
    }
}

/// Run the accept loop on its own thread.
pub fn spawn_server(socket: HubSocket, shared: Arc<HubShared>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("spihub-accept".to_string())
        .spawn(move || {
            let next_client_id = AtomicU64::new(1);
            loop {
                let stream = match socket.accept() {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(error = %err, "accept failed; server exiting");
                        return;
                    }
                };
                let client_id = next_client_id.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = register_client(client_id, stream, &shared) {
                    warn!(client_id, error = %err, "failed to set up client");
                }
            }
        })
}

fn register_client(
    client_id: u64,
    stream: UnixStream,
    shared: &Arc<HubShared>,
) -> std::io::Result<()> {
    match peer_credentials(&stream) {
        Some((uid, gid, pid)) => info!(client_id, uid, gid, pid, "client connected"),
        None => info!(client_id, "client connected (no peer credentials)"),
    }

    let write_stream = stream.try_clone()?;
    let mut writer = FrameWriter::new(write_stream);

    if let Some(frame) = shared.devices_list() {
        if let Err(err) = writer.send(&frame) {
            warn!(client_id, error = %err, "failed to send device list");
        }
    }
    shared.clients.insert(client_id, writer);

    let shared = Arc::clone(shared);
    std::thread::Builder::new()
        .name(format!("spihub-client-{client_id}"))
        .spawn(move || {
            serve_client(client_id, stream, &shared);
            shared.clients.remove(client_id);
            info!(client_id, "client disconnected");
        })?;
    Ok(())
}

fn serve_client(client_id: u64, stream: UnixStream, shared: &HubShared) {
    let mut reader = FrameReader::new(stream);
    loop {
        match reader.read_frame() {
            Ok(frame) => process_frame(client_id, &frame, shared),
            Err(FrameError::Disconnected) => return,
            Err(err) => {
                warn!(client_id, error = %err, "client stream failed");
                return;
            }
        }
    }
}

/// Handle one inbound frame.
fn process_frame(client_id: u64, frame: &[u8], shared: &HubShared) {
    let (command, body) = match parse_frame(frame) {
        Ok(parts) => parts,
        Err(err) => {
            warn!(client_id, error = %err, "dropping inbound frame");
            return;
        }
    };
    if command != CMD_MESSAGES_TO_DEVICES {
        warn!(client_id, command, "dropping frame with unexpected command");
        return;
    }

    let records = match spihub_frame::ipc::decode_batch(body) {
        Ok(iter) => iter,
        Err(err) => {
            warn!(client_id, error = %err, "dropping malformed batch");
            return;
        }
    };

    let mut queued = 0usize;
    for record in records {
        let msg = match record {
            Ok(msg) => msg,
            Err(err) => {
                warn!(client_id, error = %err, queued, "aborting batch at malformed record");
                break;
            }
        };

        let Some(bus) = shared.bus(msg.bus_id) else {
            warn!(client_id, bus_id = msg.bus_id, queued, "aborting batch at unknown bus");
            break;
        };
        let accepted = bus.lock().enqueue(
            msg.device_id,
            TxEntry {
                dedupe_id: msg.dedupe_id,
                channel: msg.channel,
                payload: msg.payload,
            },
        );
        if !accepted {
            warn!(
                client_id,
                bus_id = msg.bus_id,
                device_id = msg.device_id,
                queued,
                "aborting batch at unknown device"
            );
            break;
        }
        bus.mark_pending();
        queued += 1;
    }

    debug!(client_id, queued, "processed inbound batch");
    shared.wake.notify();
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use spihub_bus::device::declared_chain;
    use spihub_bus::wake::wake_channel;
    use spihub_frame::ipc::{encode_batch, DeviceBoundMessage, PROTOCOL_VERSION};

    use super::*;

    fn shared_with_one_bus() -> (Arc<HubShared>, spihub_bus::wake::WakeReceiver) {
        let (wake, wake_rx) = wake_channel();
        let bus = Arc::new(SharedBus::new(0, declared_chain()));
        (Arc::new(HubShared::new(vec![bus], wake)), wake_rx)
    }

    fn message(bus_id: u8, device_id: u8, payload: &'static [u8]) -> DeviceBoundMessage {
        DeviceBoundMessage {
            bus_id,
            device_id,
            channel: 2,
            dedupe_id: 0,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn batch_is_queued_and_wakes_the_loop() {
        let (shared, wake_rx) = shared_with_one_bus();
        let frame = encode_batch(&[message(0, 1, b"a"), message(0, 2, b"b")]);

        process_frame(1, &frame, &shared);

        let bus = shared.bus(0).unwrap();
        assert_eq!(bus.lock().queue_len(1), 1);
        assert_eq!(bus.lock().queue_len(2), 1);
        assert!(bus.pending());
        assert!(wake_rx.drain(), "ingress must signal the service loop");
    }

    #[test]
    fn unknown_bus_aborts_the_rest_of_the_frame() {
        let (shared, _wake_rx) = shared_with_one_bus();
        let frame = encode_batch(&[message(9, 1, b"lost"), message(0, 1, b"never")]);

        process_frame(1, &frame, &shared);

        assert_eq!(shared.bus(0).unwrap().lock().queue_len(1), 0);
    }

    #[test]
    fn unknown_device_aborts_but_keeps_earlier_records() {
        let (shared, _wake_rx) = shared_with_one_bus();
        let frame = encode_batch(&[
            message(0, 1, b"kept"),
            message(0, 77, b"nowhere"),
            message(0, 2, b"dropped"),
        ]);

        process_frame(1, &frame, &shared);

        let bus = shared.bus(0).unwrap();
        assert_eq!(bus.lock().queue_len(1), 1);
        assert_eq!(bus.lock().queue_len(2), 0);
    }

    #[test]
    fn wrong_version_frame_is_dropped() {
        let (shared, _wake_rx) = shared_with_one_bus();
        let mut frame = encode_batch(&[message(0, 1, b"v1")]);
        frame[0] = 1;

        process_frame(1, &frame, &shared);

        assert_eq!(shared.bus(0).unwrap().lock().queue_len(1), 0);
    }

    #[test]
    fn non_batch_command_is_dropped() {
        let (shared, _wake_rx) = shared_with_one_bus();
        let frame = [PROTOCOL_VERSION, 42, 0, 0];

        process_frame(1, &frame, &shared);

        let bus = shared.bus(0).unwrap();
        assert!(!bus.pending());
    }

    #[test]
    fn devices_list_cache_is_none_until_set() {
        let (shared, _wake_rx) = shared_with_one_bus();
        assert!(shared.devices_list().is_none());
        shared.set_devices_list(vec![1, 2, 3]);
        assert_eq!(shared.devices_list(), Some(vec![1, 2, 3]));
    }
}
