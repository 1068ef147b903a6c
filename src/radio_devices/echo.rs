//! # Radio Device Echo - Loopback Device for Testing
//!
//! The simplest possible radio backend: every transmitted frame comes
//! straight back as a received frame. No medium, no other dice, no timing.
//!
//! ## Behavior
//!
//! - Receives outbound frames from the TX queue
//! - Immediately pushes them into the received-frame queue, attributed to
//!   the device's own MAC with a configurable signal strength
//! - The target address is ignored (there is nobody else on the air)
//!
//! ## Use Cases
//!
//! - Smoke testing the codec and dispatch path without a simulated network
//! - Exercising proximity logic single-node: the echoed watchdog beacon
//!   looks like a nearby dice at the configured RSSI
//!
//! ## Limitations
//!
//! - Cannot test multi-dice behavior (handshakes, teleportation)
//! - No timing characteristics

use log::{log, Level};

use crate::frame_queue::{FrameQueue, ReceivedFrame};
use crate::MacAddress;
use crate::OutboundFrameQueueReceiver;
use crate::MAX_DEVICE_COUNT;

/// Echo radio device task - loops frames back for testing
///
/// Receives frames from the TX queue and immediately requeues them as
/// received, attributed to `own_mac` at the device's configured RSSI.
#[embassy_executor::task(pool_size = MAX_DEVICE_COUNT)]
pub async fn radio_device_task(
    radio_device: RadioDevice,
    tx_receiver: OutboundFrameQueueReceiver,
    rx_queue: &'static FrameQueue,
    own_mac: MacAddress,
    _rng_seed: u64,
) -> ! {
    log!(Level::Info, "[{}] Echo radio device task started", own_mac);
    loop {
        let outbound = tx_receiver.receive().await;
        log!(Level::Trace, "[{}] Echoing frame: tag {}", own_mac, outbound.frame.tag());
        rx_queue.push(ReceivedFrame {
            frame: outbound.frame,
            source: own_mac,
            rssi: radio_device.echo_rssi,
        });
    }
}

/// Echo radio device - loopback implementation for testing
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RadioDevice {
    echo_rssi: i8,
}

impl RadioDevice {
    /// Creates an echo device that reports every echoed frame at
    /// `echo_rssi` dBm
    pub const fn new(echo_rssi: i8) -> Self {
        RadioDevice { echo_rssi }
    }
}

impl Default for RadioDevice {
    fn default() -> Self {
        RadioDevice::new(-40)
    }
}
