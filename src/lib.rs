#![cfg_attr(not(feature = "std"), no_std)]

//! # Quantum Dice Library
//!
//! Distributed state machine and radio protocol for a network of physical
//! "quantum dice": motion-sensing devices that talk peer to peer over a
//! short-range broadcast radio to simulate entanglement, measurement and
//! teleportation of a dice value.
//!
//! The crate provides the per-dice finite-state machine
//! ([`StateMachine`]), the nine-message wire protocol
//! ([`messages::DiceMessage`]), the measurement rules
//! ([`measurement::MeasurementEngine`]) and the radio plumbing
//! ([`DiceRadio`] plus the feature-selected device backend). Display
//! rendering, motion sensing, configuration loading and battery sampling
//! are collaborators behind small traits.

#[cfg(all(feature = "radio-device-echo", feature = "radio-device-simulator"))]
compile_error!("Only one radio implementation feature can be enabled at a time");

#[cfg(all(not(test), not(any(feature = "radio-device-echo", feature = "radio-device-simulator"))))]
compile_error!("At least one radio implementation feature must be enabled");

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{log, Level};
use rand_core::RngCore;
use rand_core::SeedableRng;
use rand_wyrand::WyRand;

pub mod frame_queue;
pub mod measurement;
pub mod messages;
pub mod proximity;
pub mod radio_devices;
pub mod screen_state;
pub mod sensor;
mod state_machine;

#[cfg(any(feature = "radio-device-echo", feature = "radio-device-simulator"))]
use crate::radio_devices::{radio_device_task, RadioDevice};

// Re-export the core types from the crate root
pub use crate::frame_queue::{FrameQueue, ReceivedFrame};
pub use crate::messages::{DiceMessage, DiceNumber, EntanglementState, MeasuredAxis, Mode, RadioFrame, State, ThrowState, UpSide};
pub use crate::state_machine::{StateMachine, Trigger};

/// Length of a radio hardware address in octets
pub const MAC_ADDRESS_LENGTH: usize = 6;

/// Fixed capacity of a radio frame buffer; every protocol message fits
pub const RADIO_FRAME_SIZE: usize = 16;

/// Depth of the received-frame queue; the oldest frame is dropped on
/// overflow
pub const FRAME_QUEUE_DEPTH: usize = 32;

/// Period of the presence beacon in milliseconds
pub const WATCHDOG_INTERVAL_MS: u64 = 500;

/// How long a dice waits for an entanglement confirmation before
/// reverting to the pure state
pub const MAX_ENTANGLED_WAIT_MS: u64 = 120_000;

/// How many dice one process can drive (several on a table when
/// simulating, one on real hardware)
#[cfg(feature = "radio-device-simulator")]
pub(crate) const MAX_DEVICE_COUNT: usize = 16;

#[cfg(not(feature = "radio-device-simulator"))]
pub(crate) const MAX_DEVICE_COUNT: usize = 1;

/// A radio hardware address
///
/// The all-ones address is both the broadcast target and the "no peer"
/// sentinel: a dice with an unbound peer slot stores it there.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MacAddress([u8; MAC_ADDRESS_LENGTH]);

impl MacAddress {
    /// Broadcast target, also used as the unbound-peer sentinel
    pub const BROADCAST: MacAddress = MacAddress([0xFF; MAC_ADDRESS_LENGTH]);

    /// Alias of [`MacAddress::BROADCAST`] for the "no peer" reading
    pub const UNBOUND: MacAddress = MacAddress([0xFF; MAC_ADDRESS_LENGTH]);

    pub const fn new(octets: [u8; MAC_ADDRESS_LENGTH]) -> Self {
        MacAddress(octets)
    }

    /// Builds an address from a six-byte slice
    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        let mut octets = [0u8; MAC_ADDRESS_LENGTH];
        octets.copy_from_slice(&bytes[..MAC_ADDRESS_LENGTH]);
        MacAddress(octets)
    }

    pub fn as_bytes(&self) -> &[u8; MAC_ADDRESS_LENGTH] {
        &self.0
    }

    /// True for the sentinel address (no peer bound)
    pub fn is_unbound(&self) -> bool {
        *self == MacAddress::UNBOUND
    }
}

impl core::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Protocol configuration supplied by the configuration collaborator
///
/// Loading and persisting this (filesystem, checksums, setup mode) is
/// outside the crate; the state machine only reads it.
#[derive(Clone)]
pub struct DiceConfiguration {
    /// Signal strength above which another dice counts as nearby (dBm)
    pub rssi_limit: i8,
    /// Palette an accepting dice picks the entanglement color from
    pub entang_colors: [u16; 8],
    /// Number of valid entries in `entang_colors` (1..=8)
    pub entang_colors_count: u8,
    /// How long a newly adopted color flashes when color display is off
    pub color_flash_timeout_ms: u16,
    /// Motionless time after which the device may power down
    pub deep_sleep_timeout_ms: u32,
}

/// A frame queued for transmission together with its target address
#[derive(Clone)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct OutboundFrame {
    pub frame: RadioFrame,
    pub target: MacAddress,
}

const OUTBOUND_FRAME_QUEUE_SIZE: usize = 16;
pub type OutboundFrameQueue = Channel<CriticalSectionRawMutex, OutboundFrame, OUTBOUND_FRAME_QUEUE_SIZE>;
pub type OutboundFrameQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, OutboundFrame, OUTBOUND_FRAME_QUEUE_SIZE>;
pub type OutboundFrameQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, OutboundFrame, OUTBOUND_FRAME_QUEUE_SIZE>;

#[cfg(feature = "embedded")]
static OUTBOUND_FRAME_QUEUE: OutboundFrameQueue = Channel::new();

#[cfg(feature = "embedded")]
static RX_FRAME_QUEUE: FrameQueue = FrameQueue::new();

/// Handle for emitting protocol messages toward the radio
///
/// Encoding happens here; the frame is handed to the device task through
/// the outbound queue. A full queue drops the frame: there is no
/// retransmission at any layer, so the caller at most logs the failure.
#[derive(Clone)]
pub struct FrameSender {
    sender: OutboundFrameQueueSender,
}

impl FrameSender {
    pub(crate) fn new(sender: OutboundFrameQueueSender) -> Self {
        FrameSender { sender }
    }

    /// Encodes and queues a message; `target` may be the broadcast
    /// address. Returns false when the frame had to be dropped.
    pub fn send(&self, message: &DiceMessage, target: MacAddress) -> bool {
        match self.sender.try_send(OutboundFrame {
            frame: message.encode(),
            target,
        }) {
            Ok(()) => true,
            Err(embassy_sync::channel::TrySendError::Full(outbound)) => {
                log!(
                    Level::Warn,
                    "TX queue full, dropping frame: tag {} to {}",
                    outbound.frame.tag(),
                    outbound.target
                );
                false
            }
        }
    }
}

/// Errors returned when the radio manager is used before initialization
#[derive(Debug)]
pub enum RadioAccessError {
    NotInited,
}

enum DiceRadioState {
    Uninitialized,
    Initialized {
        frame_sender: FrameSender,
        rx_queue: &'static FrameQueue,
    },
}

/// Owns the radio plumbing of one dice
///
/// `initialize` wires the selected radio device backend to the outbound
/// queue and the received-frame queue and spawns its task. The state
/// machine gets its [`FrameSender`] and queue reference from here.
pub struct DiceRadio {
    state: DiceRadioState,
}

impl DiceRadio {
    pub const fn new() -> Self {
        DiceRadio {
            state: DiceRadioState::Uninitialized,
        }
    }

    #[cfg(all(feature = "embedded", any(feature = "radio-device-echo", feature = "radio-device-simulator")))]
    pub fn initialize(&mut self, spawner: Spawner, radio_device: RadioDevice, own_mac: MacAddress, rng_seed: u64) -> Result<(), ()> {
        self.initialize_common(spawner, radio_device, &OUTBOUND_FRAME_QUEUE, &RX_FRAME_QUEUE, own_mac, rng_seed)
    }

    #[cfg(all(feature = "std", any(feature = "radio-device-echo", feature = "radio-device-simulator")))]
    pub fn initialize(&mut self, spawner: Spawner, radio_device: RadioDevice, own_mac: MacAddress, rng_seed: u64) -> Result<(), ()> {
        let outbound_frame_queue: &'static OutboundFrameQueue = Box::leak(Box::new(Channel::new()));
        let rx_frame_queue: &'static FrameQueue = Box::leak(Box::new(FrameQueue::new()));
        self.initialize_common(spawner, radio_device, outbound_frame_queue, rx_frame_queue, own_mac, rng_seed)
    }

    #[cfg(any(feature = "radio-device-echo", feature = "radio-device-simulator"))]
    fn initialize_common(
        &mut self,
        spawner: Spawner,
        radio_device: RadioDevice,
        outbound_frame_queue: &'static OutboundFrameQueue,
        rx_frame_queue: &'static FrameQueue,
        own_mac: MacAddress,
        rng_seed: u64,
    ) -> Result<(), ()> {
        let mut rng = WyRand::seed_from_u64(rng_seed);

        let radio_device_task_result = spawner.spawn(radio_device_task(
            radio_device,
            outbound_frame_queue.receiver(),
            rx_frame_queue,
            own_mac,
            rng.next_u64(),
        ));
        if radio_device_task_result.is_err() {
            return Err(());
        }
        log!(Level::Debug, "[{}] Radio device task spawned", own_mac);

        self.state = DiceRadioState::Initialized {
            frame_sender: FrameSender::new(outbound_frame_queue.sender()),
            rx_queue: rx_frame_queue,
        };
        log!(Level::Info, "[{}] Radio initialized", own_mac);
        Ok(())
    }

    /// Registers a peer address with the radio driver
    ///
    /// Idempotent; registering the same peer twice is harmless. The
    /// bundled echo and simulator backends address dice directly, so for
    /// them this only records the intent. A hardware driver with a peer
    /// table performs the actual registration here.
    pub fn add_peer(&self, peer: MacAddress) -> Result<(), RadioAccessError> {
        match &self.state {
            DiceRadioState::Uninitialized => Err(RadioAccessError::NotInited),
            DiceRadioState::Initialized { .. } => {
                log!(Level::Trace, "Peer {} registered", peer);
                Ok(())
            }
        }
    }

    /// Handle for emitting frames; fails before `initialize`
    pub fn frame_sender(&self) -> Result<FrameSender, RadioAccessError> {
        match &self.state {
            DiceRadioState::Uninitialized => Err(RadioAccessError::NotInited),
            DiceRadioState::Initialized { frame_sender, .. } => Ok(frame_sender.clone()),
        }
    }

    /// The received-frame queue the state machine drains; fails before
    /// `initialize`
    pub fn rx_queue(&self) -> Result<&'static FrameQueue, RadioAccessError> {
        match &self.state {
            DiceRadioState::Uninitialized => Err(RadioAccessError::NotInited),
            DiceRadioState::Initialized { rx_queue, .. } => Ok(rx_queue),
        }
    }
}

impl Default for DiceRadio {
    fn default() -> Self {
        DiceRadio::new()
    }
}
