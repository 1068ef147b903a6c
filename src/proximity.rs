//! Nearby-peer detection from received signal strength.
//!
//! Every frame that reaches the state machine updates the tracker,
//! whatever its type, so the watchdog beacon doubles as a presence
//! signal. When the state machine acts on a proximity
//! observation (initiating an entanglement or teleport attempt) it
//! consumes the observation, which resets the stored strength so the same
//! frame cannot retrigger.

use log::{log, Level};

use crate::MacAddress;

/// No observation yet, or the last one was consumed
const RSSI_UNSET: i32 = i32::MIN;

/// Tracks the last observed `(source, rssi)` pair of any incoming frame
pub struct ProximityTracker {
    last_source: MacAddress,
    last_rssi: i32,
}

impl ProximityTracker {
    pub const fn new() -> Self {
        ProximityTracker {
            last_source: MacAddress::UNBOUND,
            last_rssi: RSSI_UNSET,
        }
    }

    /// Records the source and signal strength of a received frame
    pub fn observe(&mut self, source: MacAddress, rssi: i8) {
        self.last_source = source;
        self.last_rssi = rssi as i32;
    }

    /// Returns the nearby peer, if one qualifies
    ///
    /// A peer qualifies when the last frame was stronger than
    /// `rssi_limit`, plausibly attenuated (below -1 dBm), and did not come
    /// from the current or pending partner.
    pub fn nearby(&self, rssi_limit: i8, current_peer: MacAddress, next_peer: MacAddress) -> Option<MacAddress> {
        if self.last_rssi > rssi_limit as i32
            && self.last_rssi < -1
            && self.last_source != current_peer
            && self.last_source != next_peer
        {
            Some(self.last_source)
        } else {
            None
        }
    }

    /// Consumes the current observation so it cannot retrigger
    pub fn consume(&mut self) {
        log!(Level::Trace, "Proximity observation from {} consumed", self.last_source);
        self.last_rssi = RSSI_UNSET;
    }
}

impl Default for ProximityTracker {
    fn default() -> Self {
        ProximityTracker::new()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    const LIMIT: i8 = -70;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([2, 0, 0, 0, 0, last])
    }

    #[test]
    fn strong_frame_from_stranger_qualifies() {
        let mut tracker = ProximityTracker::new();
        tracker.observe(mac(0x0B), -40);
        assert_eq!(tracker.nearby(LIMIT, MacAddress::UNBOUND, MacAddress::UNBOUND), Some(mac(0x0B)));
    }

    #[test]
    fn weak_frame_does_not_qualify() {
        let mut tracker = ProximityTracker::new();
        tracker.observe(mac(0x0B), -80);
        assert_eq!(tracker.nearby(LIMIT, MacAddress::UNBOUND, MacAddress::UNBOUND), None);
    }

    #[test]
    fn implausibly_strong_frame_does_not_qualify() {
        let mut tracker = ProximityTracker::new();
        tracker.observe(mac(0x0B), 0);
        assert_eq!(tracker.nearby(LIMIT, MacAddress::UNBOUND, MacAddress::UNBOUND), None);
    }

    #[test]
    fn current_and_pending_partners_are_excluded() {
        let mut tracker = ProximityTracker::new();
        tracker.observe(mac(0x0B), -40);
        assert_eq!(tracker.nearby(LIMIT, mac(0x0B), MacAddress::UNBOUND), None);
        assert_eq!(tracker.nearby(LIMIT, MacAddress::UNBOUND, mac(0x0B)), None);
        assert_eq!(tracker.nearby(LIMIT, mac(0x0C), mac(0x0D)), Some(mac(0x0B)));
    }

    #[test]
    fn consume_prevents_retrigger() {
        let mut tracker = ProximityTracker::new();
        tracker.observe(mac(0x0B), -40);
        tracker.consume();
        assert_eq!(tracker.nearby(LIMIT, MacAddress::UNBOUND, MacAddress::UNBOUND), None);
        // A fresh frame re-arms the tracker
        tracker.observe(mac(0x0B), -42);
        assert!(tracker.nearby(LIMIT, MacAddress::UNBOUND, MacAddress::UNBOUND).is_some());
    }

    #[test]
    fn untouched_tracker_reports_nothing() {
        let tracker = ProximityTracker::new();
        assert_eq!(tracker.nearby(LIMIT, MacAddress::UNBOUND, MacAddress::UNBOUND), None);
    }
}
