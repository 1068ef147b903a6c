//! Simulated shared medium for multi-dice scenarios.
//!
//! The simulator device only owns its two queue endpoints; everything
//! about the air lives here. A `TableTop` registers dice, holds the
//! pairwise signal strengths, and routes frames: unicast frames reach
//! their target, broadcast frames reach every other dice, and a pair
//! without a configured link does not hear each other at all.
//!
//! The medium is polled, not task-driven, so tests and simulation
//! binaries can single-step it between state machine ticks.

use log::{log, Level};

use crate::frame_queue::ReceivedFrame;
use crate::MacAddress;

use super::simulator::{
    RadioInputMessage, RadioInputQueue, RadioInputQueueSender, RadioOutputMessage, RadioOutputQueue, RadioOutputQueueReceiver,
};

struct TableSeat {
    mac: MacAddress,
    input_sender: RadioInputQueueSender,
    output_receiver: RadioOutputQueueReceiver,
}

struct TableLink {
    a: MacAddress,
    b: MacAddress,
    rssi: i8,
}

/// A table with several dice on it
///
/// Routes frames between the registered simulator devices according to
/// the configured links. Links are symmetric; dice without a link are
/// out of range of each other.
pub struct TableTop {
    seats: Vec<TableSeat>,
    links: Vec<TableLink>,
}

impl TableTop {
    pub fn new() -> Self {
        TableTop {
            seats: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Seats a dice at the table and returns the radio device to hand to
    /// `DiceRadio::initialize`
    pub fn join(&mut self, mac: MacAddress) -> super::simulator::RadioDevice {
        let output_queue: &'static RadioOutputQueue = Box::leak(Box::new(RadioOutputQueue::new()));
        let input_queue: &'static RadioInputQueue = Box::leak(Box::new(RadioInputQueue::new()));

        self.seats.push(TableSeat {
            mac,
            input_sender: input_queue.sender(),
            output_receiver: output_queue.receiver(),
        });

        log!(Level::Debug, "[{}] Joined the table", mac);
        super::simulator::RadioDevice::with(output_queue.sender(), input_queue.receiver())
    }

    /// Sets the symmetric signal strength between two dice
    ///
    /// Calling again for the same pair overwrites the previous value.
    pub fn set_link(&mut self, a: MacAddress, b: MacAddress, rssi: i8) {
        for link in self.links.iter_mut() {
            if (link.a == a && link.b == b) || (link.a == b && link.b == a) {
                link.rssi = rssi;
                return;
            }
        }
        self.links.push(TableLink { a, b, rssi });
    }

    /// Removes the link between two dice (they move out of range)
    pub fn clear_link(&mut self, a: MacAddress, b: MacAddress) {
        self.links.retain(|link| !((link.a == a && link.b == b) || (link.a == b && link.b == a)));
    }

    fn link_rssi(&self, a: MacAddress, b: MacAddress) -> Option<i8> {
        self.links
            .iter()
            .find(|link| (link.a == a && link.b == b) || (link.a == b && link.b == a))
            .map(|link| link.rssi)
    }

    /// Routes every pending frame once
    ///
    /// Frames toward unreachable or unknown dice vanish, like on the real
    /// channel. A full receiver also loses the frame; the radio gives no
    /// delivery guarantee either way.
    pub fn poll(&mut self) {
        for seat_index in 0..self.seats.len() {
            while let Ok(RadioOutputMessage::SendFrame(outbound)) = self.seats[seat_index].output_receiver.try_receive() {
                let source = self.seats[seat_index].mac;
                for target_index in 0..self.seats.len() {
                    if target_index == seat_index {
                        continue;
                    }
                    let target_mac = self.seats[target_index].mac;
                    if outbound.target != MacAddress::BROADCAST && outbound.target != target_mac {
                        continue;
                    }
                    let Some(rssi) = self.link_rssi(source, target_mac) else {
                        continue;
                    };
                    let delivery = RadioInputMessage::ReceiveFrame(ReceivedFrame {
                        frame: outbound.frame.clone(),
                        source,
                        rssi,
                    });
                    if self.seats[target_index].input_sender.try_send(delivery).is_err() {
                        log!(Level::Warn, "[{}] Input queue full, frame from {} lost", target_mac, source);
                    }
                }
            }
        }
    }
}

impl Default for TableTop {
    fn default() -> Self {
        TableTop::new()
    }
}
