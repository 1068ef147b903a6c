//! # Dice Message Module
//!
//! Typed protocol messages and their wire codec.
//!
//! ## Architecture
//!
//! `DiceMessage` is the application-level view of a radio frame: one of
//! nine tagged variants covering presence beacons, the entanglement
//! handshake, measurement propagation, and the three-party teleport
//! protocol.
//!
//! ## Wire Format
//!
//! Every frame is `tag:u8` followed by the variant payload. Multi-byte
//! fields are little-endian; every enum serializes to a single octet with
//! fixed ordinals. Serialization is field by field, so the layout never
//! depends on native struct padding. Each tag has exactly one valid frame
//! length; frames with an unknown tag or a mismatched length parse to
//! `None` and are discarded by the caller.
//!
//! | Tag | Variant          | Payload                                              | Length |
//! |-----|------------------|------------------------------------------------------|--------|
//! | 0   | WatchDog         | state (3)                                            | 4      |
//! | 1   | Measurement      | state (3), axis, number, upside                      | 7      |
//! | 2   | EntangleRequest  | (none)                                                | 1      |
//! | 3   | EntangleConfirm  | color:u16                                            | 3      |
//! | 4   | EntangleDenied   | (none)                                                | 1      |
//! | 5   | TeleportRequest  | target mac (6)                                       | 7      |
//! | 6   | TeleportConfirm  | (none)                                                | 1      |
//! | 7   | TeleportPayload  | state (3), axis, number, upside, peer mac (6), color | 15     |
//! | 8   | TeleportPartner  | new partner mac (6)                                  | 7      |

use crate::MacAddress;
use crate::RADIO_FRAME_SIZE;

use super::frame::RadioFrame;

/// Top-level operating mode of a dice
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Classic = 0,
    Quantum = 1,
    LowBattery = 2,
}

impl Mode {
    pub(crate) fn from_wire(byte: u8) -> Option<Mode> {
        match byte {
            0 => Some(Mode::Classic),
            1 => Some(Mode::Quantum),
            2 => Some(Mode::LowBattery),
            _ => None,
        }
    }
}

/// Physical throw phase of a dice
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThrowState {
    Idle = 0,
    Throwing = 1,
    Observed = 2,
}

impl ThrowState {
    pub(crate) fn from_wire(byte: u8) -> Option<ThrowState> {
        match byte {
            0 => Some(ThrowState::Idle),
            1 => Some(ThrowState::Throwing),
            2 => Some(ThrowState::Observed),
            _ => None,
        }
    }
}

/// Quantum condition of a dice
///
/// `PostEntanglement` means the partner has already measured and this dice
/// must roll the opposite value if observed on the same basis.
/// `Teleported` means an observed state was received through the teleport
/// protocol and must be replayed on the matching axis.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntanglementState {
    Pure = 0,
    EntangleRequested = 1,
    Entangled = 2,
    PostEntanglement = 3,
    Teleported = 4,
}

impl EntanglementState {
    pub(crate) fn from_wire(byte: u8) -> Option<EntanglementState> {
        match byte {
            0 => Some(EntanglementState::Pure),
            1 => Some(EntanglementState::EntangleRequested),
            2 => Some(EntanglementState::Entangled),
            3 => Some(EntanglementState::PostEntanglement),
            4 => Some(EntanglementState::Teleported),
            _ => None,
        }
    }
}

/// Displayed dice value; `None` while unobserved
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DiceNumber {
    None = 0,
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Five = 5,
    Six = 6,
}

impl DiceNumber {
    pub(crate) fn from_wire(byte: u8) -> Option<DiceNumber> {
        match byte {
            0 => Some(DiceNumber::None),
            1 => Some(DiceNumber::One),
            2 => Some(DiceNumber::Two),
            3 => Some(DiceNumber::Three),
            4 => Some(DiceNumber::Four),
            5 => Some(DiceNumber::Five),
            6 => Some(DiceNumber::Six),
            _ => None,
        }
    }

    /// Numeric value, 0 for `None`
    pub fn value(self) -> u8 {
        self as u8
    }

    /// The face opposite this one (opposite faces sum to 7)
    pub fn opposite(self) -> DiceNumber {
        match self {
            DiceNumber::None => DiceNumber::None,
            DiceNumber::One => DiceNumber::Six,
            DiceNumber::Two => DiceNumber::Five,
            DiceNumber::Three => DiceNumber::Four,
            DiceNumber::Four => DiceNumber::Three,
            DiceNumber::Five => DiceNumber::Two,
            DiceNumber::Six => DiceNumber::One,
        }
    }
}

/// Measurement basis, determined by which physical axis points up
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MeasuredAxis {
    Undefined = 0,
    X = 1,
    Y = 2,
    Z = 3,
    All = 4,
    Na = 5,
}

impl MeasuredAxis {
    pub(crate) fn from_wire(byte: u8) -> Option<MeasuredAxis> {
        match byte {
            0 => Some(MeasuredAxis::Undefined),
            1 => Some(MeasuredAxis::X),
            2 => Some(MeasuredAxis::Y),
            3 => Some(MeasuredAxis::Z),
            4 => Some(MeasuredAxis::All),
            5 => Some(MeasuredAxis::Na),
            _ => None,
        }
    }
}

/// The face currently pointing up
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UpSide {
    None = 0,
    X0 = 1,
    X1 = 2,
    Y0 = 3,
    Y1 = 4,
    Z0 = 5,
    Z1 = 6,
    Any = 7,
    Na = 8,
}

impl UpSide {
    pub(crate) fn from_wire(byte: u8) -> Option<UpSide> {
        match byte {
            0 => Some(UpSide::None),
            1 => Some(UpSide::X0),
            2 => Some(UpSide::X1),
            3 => Some(UpSide::Y0),
            4 => Some(UpSide::Y1),
            5 => Some(UpSide::Z0),
            6 => Some(UpSide::Z1),
            7 => Some(UpSide::Any),
            8 => Some(UpSide::Na),
            _ => None,
        }
    }
}

/// Combined state of a dice as carried on the wire
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct State {
    pub mode: Mode,
    pub throw_state: ThrowState,
    pub entanglement_state: EntanglementState,
}

impl State {
    fn write_wire(&self, buffer: &mut [u8]) {
        buffer[0] = self.mode as u8;
        buffer[1] = self.throw_state as u8;
        buffer[2] = self.entanglement_state as u8;
    }

    fn from_wire(bytes: &[u8]) -> Option<State> {
        Some(State {
            mode: Mode::from_wire(bytes[0])?,
            throw_state: ThrowState::from_wire(bytes[1])?,
            entanglement_state: EntanglementState::from_wire(bytes[2])?,
        })
    }
}

impl core::fmt::Display for State {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} | {:?} | {:?}", self.mode, self.throw_state, self.entanglement_state)
    }
}

/// Wire tag values for the nine protocol messages
#[derive(Clone, Copy)]
pub(crate) enum MessageTag {
    WatchDog = 0,
    Measurement = 1,
    EntangleRequest = 2,
    EntangleConfirm = 3,
    EntangleDenied = 4,
    TeleportRequest = 5,
    TeleportConfirm = 6,
    TeleportPayload = 7,
    TeleportPartner = 8,
}

/// A protocol message exchanged between dice
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DiceMessage {
    /// Presence beacon, broadcast every watchdog period by every dice
    WatchDog { state: State },
    /// Measurement outcome, sent to the entanglement partner when an
    /// entangled dice is observed first
    Measurement {
        state: State,
        axis: MeasuredAxis,
        number: DiceNumber,
        upside: UpSide,
    },
    /// Ask a nearby dice to entangle with the sender
    EntangleRequest,
    /// Accept an entanglement request; the receiver of the request picks
    /// the shared color
    EntangleConfirm { color: u16 },
    /// Refuse an entanglement request
    EntangleDenied,
    /// Ask the receiver (role M) to teleport its state to `target` (role B)
    TeleportRequest { target: MacAddress },
    /// Inform the intermediary (role A) that the teleport completed
    TeleportConfirm,
    /// The teleported state, delivered to the destination (role B)
    TeleportPayload {
        state: State,
        axis: MeasuredAxis,
        number: DiceNumber,
        upside: UpSide,
        entangled_peer: MacAddress,
        color: u16,
    },
    /// Rebind the sender's former partner (role N) to `new_partner`
    TeleportPartner { new_partner: MacAddress },
}

impl DiceMessage {
    /// Serializes this message into a wire frame
    pub fn encode(&self) -> RadioFrame {
        let mut data = [0u8; RADIO_FRAME_SIZE];
        let length = match self {
            DiceMessage::WatchDog { state } => {
                data[0] = MessageTag::WatchDog as u8;
                state.write_wire(&mut data[1..4]);
                4
            }
            DiceMessage::Measurement { state, axis, number, upside } => {
                data[0] = MessageTag::Measurement as u8;
                state.write_wire(&mut data[1..4]);
                data[4] = *axis as u8;
                data[5] = *number as u8;
                data[6] = *upside as u8;
                7
            }
            DiceMessage::EntangleRequest => {
                data[0] = MessageTag::EntangleRequest as u8;
                1
            }
            DiceMessage::EntangleConfirm { color } => {
                data[0] = MessageTag::EntangleConfirm as u8;
                data[1..3].copy_from_slice(&color.to_le_bytes());
                3
            }
            DiceMessage::EntangleDenied => {
                data[0] = MessageTag::EntangleDenied as u8;
                1
            }
            DiceMessage::TeleportRequest { target } => {
                data[0] = MessageTag::TeleportRequest as u8;
                data[1..7].copy_from_slice(target.as_bytes());
                7
            }
            DiceMessage::TeleportConfirm => {
                data[0] = MessageTag::TeleportConfirm as u8;
                1
            }
            DiceMessage::TeleportPayload {
                state,
                axis,
                number,
                upside,
                entangled_peer,
                color,
            } => {
                data[0] = MessageTag::TeleportPayload as u8;
                state.write_wire(&mut data[1..4]);
                data[4] = *axis as u8;
                data[5] = *number as u8;
                data[6] = *upside as u8;
                data[7..13].copy_from_slice(entangled_peer.as_bytes());
                data[13..15].copy_from_slice(&color.to_le_bytes());
                15
            }
            DiceMessage::TeleportPartner { new_partner } => {
                data[0] = MessageTag::TeleportPartner as u8;
                data[1..7].copy_from_slice(new_partner.as_bytes());
                7
            }
        };
        RadioFrame { data, length }
    }

    /// Parses a received frame into a message
    ///
    /// Returns `None` for unknown tags, for frames whose length does not
    /// match the tag's fixed layout, and for out-of-range enum octets.
    /// Such frames are silently discarded by the dispatcher.
    pub fn parse(frame: &RadioFrame) -> Option<DiceMessage> {
        let bytes = frame.as_bytes();
        if bytes.is_empty() {
            return None;
        }

        match bytes[0] {
            tag if tag == MessageTag::WatchDog as u8 => {
                if bytes.len() != 4 {
                    return None;
                }
                Some(DiceMessage::WatchDog {
                    state: State::from_wire(&bytes[1..4])?,
                })
            }
            tag if tag == MessageTag::Measurement as u8 => {
                if bytes.len() != 7 {
                    return None;
                }
                Some(DiceMessage::Measurement {
                    state: State::from_wire(&bytes[1..4])?,
                    axis: MeasuredAxis::from_wire(bytes[4])?,
                    number: DiceNumber::from_wire(bytes[5])?,
                    upside: UpSide::from_wire(bytes[6])?,
                })
            }
            tag if tag == MessageTag::EntangleRequest as u8 => {
                if bytes.len() != 1 {
                    return None;
                }
                Some(DiceMessage::EntangleRequest)
            }
            tag if tag == MessageTag::EntangleConfirm as u8 => {
                if bytes.len() != 3 {
                    return None;
                }
                let color = u16::from_le_bytes([bytes[1], bytes[2]]);
                Some(DiceMessage::EntangleConfirm { color })
            }
            tag if tag == MessageTag::EntangleDenied as u8 => {
                if bytes.len() != 1 {
                    return None;
                }
                Some(DiceMessage::EntangleDenied)
            }
            tag if tag == MessageTag::TeleportRequest as u8 => {
                if bytes.len() != 7 {
                    return None;
                }
                Some(DiceMessage::TeleportRequest {
                    target: MacAddress::from_slice(&bytes[1..7]),
                })
            }
            tag if tag == MessageTag::TeleportConfirm as u8 => {
                if bytes.len() != 1 {
                    return None;
                }
                Some(DiceMessage::TeleportConfirm)
            }
            tag if tag == MessageTag::TeleportPayload as u8 => {
                if bytes.len() != 15 {
                    return None;
                }
                Some(DiceMessage::TeleportPayload {
                    state: State::from_wire(&bytes[1..4])?,
                    axis: MeasuredAxis::from_wire(bytes[4])?,
                    number: DiceNumber::from_wire(bytes[5])?,
                    upside: UpSide::from_wire(bytes[6])?,
                    entangled_peer: MacAddress::from_slice(&bytes[7..13]),
                    color: u16::from_le_bytes([bytes[13], bytes[14]]),
                })
            }
            tag if tag == MessageTag::TeleportPartner as u8 => {
                if bytes.len() != 7 {
                    return None;
                }
                Some(DiceMessage::TeleportPartner {
                    new_partner: MacAddress::from_slice(&bytes[1..7]),
                })
            }
            _ => None,
        }
    }
}
