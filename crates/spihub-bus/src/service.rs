//! The bus service loop.
//!
//! The SPI protocol is full-duplex with one-transaction lookahead: the
//! response read during transaction N was staged in reply to the request of
//! transaction N−1, so every request names the device expected to answer
//! next. A device must have been named before it is addressed; when the
//! bus's standing hint doesn't match the device about to be polled, a
//! selection frame primes it first.
//!
//! Per pass, each device in chain order gets its queue drained (staying on
//! the same device while more is queued) and at least one poll so it can
//! deliver an unsolicited message. Transactions on one bus are spaced at
//! least [`INTER_MESSAGE_GAP`] apart; the first of a pass goes out
//! immediately.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use spihub_frame::ipc::DeviceMessage;
use spihub_frame::spi::{
    decode_response, encode_request, SpiRequest, SPI_CMD_MSG_FROM_DEVICE, SPI_CMD_MSG_TO_DEVICE,
    SPI_CMD_NONE,
};
use tracing::{debug, info, trace, warn};

use crate::bus::SharedBus;
use crate::error::{BusError, Result};
use crate::wake::WakeReceiver;
use crate::xfer::SpiExchange;

/// Response length assumed for a device that has not advertised one yet.
pub const DEFAULT_RESPONSE_LEN: u16 = 40;

/// Minimum spacing between two transactions on the same bus.
pub const INTER_MESSAGE_GAP: std::time::Duration = std::time::Duration::from_millis(2);

/// How many times one wake may re-run the pass loop before the broker
/// declares a runaway producer and gives up.
pub const MAX_SERVICE_RESTARTS: u32 = 10;

/// Where device-originated messages go.
pub trait ResponseSink {
    fn device_message(&mut self, msg: DeviceMessage);
}

/// One bus under service: the shared state plus the transceiver it drives.
///
/// The service loop is the sole owner of the transceiver; the state mutex is
/// never held across a gap sleep or an exchange.
pub struct BusDriver {
    shared: Arc<SharedBus>,
    xfer: Box<dyn SpiExchange>,
}

impl BusDriver {
    pub fn new(shared: Arc<SharedBus>, xfer: Box<dyn SpiExchange>) -> Self {
        Self { shared, xfer }
    }

    pub fn shared(&self) -> &Arc<SharedBus> {
        &self.shared
    }

    /// Walk every device on this bus once.
    ///
    /// In detection mode, devices that never produce a clean matching
    /// response are pruned from the bus on exit.
    pub fn service_pass(&mut self, detect: bool, sink: &mut dyn ResponseSink) -> Result<()> {
        let bus_id = self.shared.id();
        let ids: Vec<u8> = self.shared.lock().device_ids();
        let mut seen: HashSet<u8> = HashSet::new();
        let mut last_exchange: Option<Instant> = None;

        for (pos, &device_id) in ids.iter().enumerate() {
            let needs_selection = self.shared.lock().next_device_id != device_id;
            if needs_selection {
                trace!(bus_id, device_id, "priming next responder");
                let buf = encode_request(&SpiRequest::selection(device_id), 0);
                // The shifted-in bytes belong to whichever device was primed
                // before; nothing to decode.
                self.exchange(&buf, &mut last_exchange)?;
            }

            loop {
                let (entry, next_id, expected_len) = {
                    let mut state = self.shared.lock();
                    let entry = state.pop_front(device_id);
                    // Stay on this device while it has more queued; otherwise
                    // hand the bus to the next device in chain order.
                    let next_id = if state.queue_len(device_id) > 0 {
                        device_id
                    } else {
                        ids[(pos + 1) % ids.len()]
                    };
                    let expected_len = state
                        .next_msg_len(device_id)
                        .unwrap_or(DEFAULT_RESPONSE_LEN);
                    (entry, next_id, expected_len)
                };

                let request = match &entry {
                    Some(e) => SpiRequest {
                        target: device_id,
                        next: next_id,
                        command: SPI_CMD_MSG_TO_DEVICE,
                        channel: e.channel,
                        payload: &e.payload,
                    },
                    None => SpiRequest {
                        target: device_id,
                        next: next_id,
                        command: SPI_CMD_NONE,
                        channel: 0,
                        payload: &[],
                    },
                };

                let buf = encode_request(&request, expected_len);
                let rx = self.exchange(&buf, &mut last_exchange)?;

                match decode_response(&rx) {
                    Ok(resp) if resp.device_id == device_id => {
                        self.shared
                            .lock()
                            .set_next_msg_len(device_id, Some(resp.next_msg_len));
                        if detect {
                            seen.insert(device_id);
                        }
                        if resp.command == SPI_CMD_MSG_FROM_DEVICE {
                            if let Some(payload) = resp.payload {
                                sink.device_message(DeviceMessage {
                                    bus_id,
                                    device_id,
                                    channel: resp.channel,
                                    payload,
                                });
                            }
                        }
                    }
                    Ok(resp) => {
                        self.shared.lock().set_next_msg_len(device_id, None);
                        if !detect {
                            warn!(
                                bus_id,
                                expected = device_id,
                                answered = resp.device_id,
                                "response from unexpected device"
                            );
                        }
                    }
                    Err(err) => {
                        self.shared.lock().set_next_msg_len(device_id, None);
                        if detect {
                            trace!(bus_id, device_id, error = %err, "no usable response during detection");
                        } else {
                            warn!(bus_id, device_id, error = %err, "dropping undecodable response");
                        }
                    }
                }

                let more = {
                    let mut state = self.shared.lock();
                    state.next_device_id = next_id;
                    state.queue_len(device_id) > 0
                };
                if !more {
                    break;
                }
            }
        }

        if detect {
            let mut state = self.shared.lock();
            state.retain_devices(&seen);
            info!(
                bus_id,
                declared = ids.len(),
                detected = ?state.device_ids(),
                "detection pass complete"
            );
        }

        Ok(())
    }

    /// Perform one exchange, honouring the inter-message gap.
    fn exchange(&mut self, tx: &[u8], last: &mut Option<Instant>) -> Result<Vec<u8>> {
        if let Some(prev) = *last {
            let since = prev.elapsed();
            if since < INTER_MESSAGE_GAP {
                std::thread::sleep(INTER_MESSAGE_GAP - since);
            }
        }

        let mut rx = vec![0u8; tx.len()];
        self.xfer
            .exchange(tx, &mut rx)
            .map_err(|e| BusError::Transfer {
                bus_id: self.shared.id(),
                source: e,
            })?;
        *last = Some(Instant::now());
        Ok(rx)
    }
}

/// Drive every bus from its wake signal until shutdown.
///
/// Each wake runs passes over the pending buses, re-running while producers
/// marked more work, up to [`MAX_SERVICE_RESTARTS`] re-runs per wake.
/// Exceeding the cap means some producer outruns the bus indefinitely; that
/// is fatal.
pub fn run_service(
    drivers: &mut [BusDriver],
    wake: &WakeReceiver,
    shutdown: &AtomicBool,
    sink: &mut dyn ResponseSink,
) -> Result<()> {
    while !shutdown.load(Ordering::SeqCst) {
        if !wake.wait() {
            debug!("all wake producers gone; service loop exiting");
            break;
        }
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let mut restarts = 0u32;
        loop {
            for driver in drivers.iter_mut() {
                if driver.shared().take_pending() {
                    driver.service_pass(false, sink)?;
                }
            }

            // A token sent while we were running is covered by the pending
            // re-check below; drop it so it can't trigger an empty wake.
            wake.drain();
            if !drivers.iter().any(|d| d.shared().pending()) {
                break;
            }
            restarts += 1;
            if restarts > MAX_SERVICE_RESTARTS {
                return Err(BusError::RunawayService { restarts });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SharedBus;
    use crate::device::Device;

    /// Answers every exchange with zeroes.
    struct DeadBus;

    impl SpiExchange for DeadBus {
        fn exchange(&mut self, _tx: &[u8], _rx: &mut [u8]) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct NullSink;

    impl ResponseSink for NullSink {
        fn device_message(&mut self, _msg: DeviceMessage) {}
    }

    #[test]
    fn empty_bus_pass_performs_no_transactions() {
        struct FailOnUse;
        impl SpiExchange for FailOnUse {
            fn exchange(&mut self, _tx: &[u8], _rx: &mut [u8]) -> std::io::Result<()> {
                panic!("no transaction expected on an empty bus");
            }
        }

        let shared = Arc::new(SharedBus::new(0, Vec::new()));
        let mut driver = BusDriver::new(shared, Box::new(FailOnUse));
        driver.service_pass(false, &mut NullSink).unwrap();
    }

    #[test]
    fn detection_on_dead_bus_prunes_everything() {
        let devices = vec![Device::new(1, "iron-pi-cm8"), Device::new(2, "iron-pi-io16")];
        let shared = Arc::new(SharedBus::new(0, devices));
        let mut driver = BusDriver::new(Arc::clone(&shared), Box::new(DeadBus));

        driver.service_pass(true, &mut NullSink).unwrap();

        assert!(shared.lock().device_ids().is_empty());
    }

    #[test]
    fn transfer_error_is_fatal_for_the_pass() {
        struct BrokenBus;
        impl SpiExchange for BrokenBus {
            fn exchange(&mut self, _tx: &[u8], _rx: &mut [u8]) -> std::io::Result<()> {
                Err(std::io::Error::other("wire fell out"))
            }
        }

        let shared = Arc::new(SharedBus::new(3, vec![Device::new(1, "iron-pi-cm8")]));
        let mut driver = BusDriver::new(shared, Box::new(BrokenBus));

        let err = driver.service_pass(false, &mut NullSink).unwrap_err();
        assert!(matches!(err, BusError::Transfer { bus_id: 3, .. }));
    }
}
