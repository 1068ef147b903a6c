//! # Radio Device Simulator - Multi-Dice Testing Without Hardware
//!
//! A channel-backed radio device for driving several dice against a
//! simulated shared medium. The device itself knows nothing about
//! topology: it forwards outbound frames to the medium and accepts
//! delivered frames from it. The medium (the test harness or a simulator
//! binary) decides who hears whom and at which signal strength.
//!
//! ## Architecture
//!
//! - **Output queue**: frames this dice wants on the air, with their
//!   target address, sent to the medium
//! - **Input queue**: frames the medium delivers to this dice, already
//!   carrying `(source, rssi)` reception metadata
//! - **radio_device_task**: pumps both directions; a small random delay
//!   before each transmission stands in for air time
//!
//! There is no listen-before-talk: the broadcast channel the dice use has
//! no channel-activity detection, frames are simply sent.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Timer};
use log::{log, Level};
use rand_core::{RngCore, SeedableRng};
use rand_wyrand::WyRand;

use crate::frame_queue::{FrameQueue, ReceivedFrame};
use crate::MacAddress;
use crate::OutboundFrame;
use crate::OutboundFrameQueueReceiver;
use crate::MAX_DEVICE_COUNT;

/// Upper bound of the simulated per-frame transmission delay
const TX_MAX_AIR_TIME_MICROS: u64 = 500;

/// Size of the device-to-medium queue
const RADIO_OUTPUT_QUEUE_SIZE: usize = 10;

/// Queue of frames leaving this dice toward the simulated medium
pub type RadioOutputQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, RadioOutputMessage, RADIO_OUTPUT_QUEUE_SIZE>;
pub type RadioOutputQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RadioOutputMessage, RADIO_OUTPUT_QUEUE_SIZE>;
pub type RadioOutputQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RadioOutputMessage, RADIO_OUTPUT_QUEUE_SIZE>;

/// Size of the medium-to-device queue
const RADIO_INPUT_QUEUE_SIZE: usize = 10;

/// Queue of frames the simulated medium delivers to this dice
pub type RadioInputQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, RadioInputMessage, RADIO_INPUT_QUEUE_SIZE>;
pub type RadioInputQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RadioInputMessage, RADIO_INPUT_QUEUE_SIZE>;
pub type RadioInputQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RadioInputMessage, RADIO_INPUT_QUEUE_SIZE>;

/// Messages sent from the simulated radio to the medium
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RadioOutputMessage {
    /// Transmit a frame; the medium routes it by target address
    SendFrame(OutboundFrame),
}

/// Messages the medium delivers to the simulated radio
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RadioInputMessage {
    /// An incoming frame from another dice, with reception metadata
    ReceiveFrame(ReceivedFrame),
}

/// Simulated radio device task - pumps frames between the dice and the
/// medium
///
/// Races reception against transmission. Delivered frames go straight
/// into the received-frame queue (which handles overflow by dropping the
/// oldest entry); outbound frames are forwarded to the medium after a
/// short randomized air-time delay.
#[embassy_executor::task(pool_size = MAX_DEVICE_COUNT)]
pub async fn radio_device_task(
    radio_device: RadioDevice,
    tx_receiver: OutboundFrameQueueReceiver,
    rx_queue: &'static FrameQueue,
    own_mac: MacAddress,
    rng_seed: u64,
) -> ! {
    log!(Level::Info, "[{}] Simulated radio device task started", own_mac);
    let mut rng = WyRand::seed_from_u64(rng_seed);
    loop {
        match select(radio_device.input_queue_receiver.receive(), tx_receiver.receive()).await {
            Either::First(RadioInputMessage::ReceiveFrame(received)) => {
                log!(Level::Trace, "[{}] Received frame: tag {} from {}", own_mac, received.frame.tag(), received.source);
                rx_queue.push(received);
            }
            Either::Second(outbound) => {
                Timer::after(Duration::from_micros(rng.next_u64() % TX_MAX_AIR_TIME_MICROS)).await;
                log!(Level::Trace, "[{}] Sending frame: tag {} to {}", own_mac, outbound.frame.tag(), outbound.target);
                radio_device.output_queue_sender.send(RadioOutputMessage::SendFrame(outbound)).await;
            }
        }
    }
}

/// Simulated radio device - endpoints toward the shared medium
///
/// The medium side holds the matching sender/receiver pair and implements
/// topology: which dice hear a broadcast, what RSSI each link has, and
/// whether frames are lost.
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RadioDevice {
    output_queue_sender: RadioOutputQueueSender,
    input_queue_receiver: RadioInputQueueReceiver,
}

impl RadioDevice {
    /// Creates a simulated radio device from its medium-facing queue
    /// endpoints
    pub const fn with(output_queue_sender: RadioOutputQueueSender, input_queue_receiver: RadioInputQueueReceiver) -> Self {
        RadioDevice {
            output_queue_sender,
            input_queue_receiver,
        }
    }
}
