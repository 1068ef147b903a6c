//! # State Machine Module
//!
//! The per-dice finite-state machine: operating mode, throw phase and
//! quantum condition, plus the protocol roles a dice plays toward its
//! peers.
//!
//! ## Architecture
//!
//! State is the triple `(mode, throw_state, entanglement_state)`.
//! Transitions are driven by triggers (button, motion, radio messages,
//! timers) through an ordered table of optional matchers: a row matches
//! when each present field equals the current state, and applies by
//! overwriting only the fields it names. The first matching row wins; a
//! trigger with no row is logged and ignored, never fatal.
//!
//! ## Tick Structure
//!
//! One `update` call drains the received-frame queue completely, then
//! polls the motion sensor, then services the watchdog beacon and timers,
//! then runs the while-handler of the current state. Entry actions run
//! inside `change_state` the moment a transition lands.
//!
//! ## Protocol Roles
//!
//! The same machine plays every role of the protocols it speaks: initiator
//! or acceptor of the entanglement handshake, and M (source), A
//! (intermediary), B (destination) or N (rebound partner) of the
//! three-party teleport. Role selection is implicit in the state a message
//! finds the dice in.

use embassy_time::{Duration, Instant};
use log::{log, Level};

use crate::frame_queue::FrameQueue;
use crate::measurement::{axis_and_upside, MeasurementEngine};
use crate::messages::{DiceMessage, DiceNumber, EntanglementState, MeasuredAxis, Mode, State, ThrowState, UpSide};
use crate::proximity::ProximityTracker;
use crate::screen_state::{DisplayPort, DisplayRequester};
use crate::sensor::{MotionSensor, VoltageMonitor};
use crate::DiceConfiguration;
use crate::FrameSender;
use crate::MacAddress;
use crate::MAX_ENTANGLED_WAIT_MS;
use crate::WATCHDOG_INTERVAL_MS;

/// Fallback entanglement color when the palette is empty (yellow)
const DEFAULT_ENTANGLEMENT_COLOR: u16 = 0xFFE0;

/// Accent color shown when color display is off and no flash is active
const COLOR_OFF_WHITE: u16 = 0xFFFF;

/// Events that drive state transitions
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Trigger {
    // User triggers
    ButtonPressed,
    // Dice motion triggers
    StartRolling,
    StopRolling,
    // Entanglement triggers
    CloseBy,
    EntangleRequest,
    EntangleConfirm,
    EntangleStop,
    MeasurementReceived,
    // Teleportation triggers
    TeleportInitiated,
    TeleportConfirmed,
    TeleportReceived,
    // Measurement triggers
    MeasureFail,
    // System triggers
    Timed,
    LowBattery,
}

/// One row of the transition table
///
/// `*_is` fields are matchers (absent means wildcard), `*_to` fields are
/// assigners (absent means unchanged).
struct StateTransition {
    mode_is: Option<Mode>,
    mode_to: Option<Mode>,
    throw_is: Option<ThrowState>,
    throw_to: Option<ThrowState>,
    ent_is: Option<EntanglementState>,
    ent_to: Option<EntanglementState>,
    trigger: Trigger,
}

/// Ordered transition table; the first matching row wins
static TRANSITIONS: [StateTransition; 37] = [
    // === CLASSIC MODE ===
    StateTransition {
        mode_is: Some(Mode::Classic),
        mode_to: Some(Mode::Quantum),
        throw_is: Some(ThrowState::Idle),
        throw_to: Some(ThrowState::Idle),
        ent_is: None,
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::ButtonPressed,
    },
    StateTransition {
        mode_is: Some(Mode::Classic),
        mode_to: Some(Mode::LowBattery),
        throw_is: None,
        throw_to: None,
        ent_is: None,
        ent_to: None,
        trigger: Trigger::LowBattery,
    },
    // === QUANTUM MODE - IDLE ===
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: Some(ThrowState::Throwing),
        ent_is: Some(EntanglementState::Pure),
        ent_to: None,
        trigger: Trigger::StartRolling,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: Some(Mode::Classic),
        throw_is: None,
        throw_to: Some(ThrowState::Idle),
        ent_is: Some(EntanglementState::Pure),
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::ButtonPressed,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: Some(Mode::Classic),
        throw_is: None,
        throw_to: Some(ThrowState::Idle),
        ent_is: Some(EntanglementState::PostEntanglement),
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::ButtonPressed,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: Some(Mode::Classic),
        throw_is: None,
        throw_to: Some(ThrowState::Idle),
        ent_is: Some(EntanglementState::Teleported),
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::ButtonPressed,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: None,
        ent_is: Some(EntanglementState::Pure),
        ent_to: Some(EntanglementState::EntangleRequested),
        trigger: Trigger::CloseBy,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: None,
        ent_is: Some(EntanglementState::PostEntanglement),
        ent_to: Some(EntanglementState::EntangleRequested),
        trigger: Trigger::CloseBy,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: None,
        ent_is: Some(EntanglementState::Teleported),
        ent_to: Some(EntanglementState::EntangleRequested),
        trigger: Trigger::CloseBy,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: None,
        ent_is: Some(EntanglementState::Pure),
        ent_to: Some(EntanglementState::Entangled),
        trigger: Trigger::EntangleRequest,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: None,
        ent_is: Some(EntanglementState::EntangleRequested),
        ent_to: Some(EntanglementState::Entangled),
        trigger: Trigger::EntangleConfirm,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: None,
        ent_is: Some(EntanglementState::EntangleRequested),
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::EntangleStop,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: None,
        ent_is: Some(EntanglementState::EntangleRequested),
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::Timed,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: None,
        ent_is: Some(EntanglementState::Entangled),
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::EntangleStop,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: None,
        ent_is: Some(EntanglementState::Entangled),
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::Timed,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: Some(ThrowState::Throwing),
        ent_is: Some(EntanglementState::Entangled),
        ent_to: None,
        trigger: Trigger::StartRolling,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: Some(ThrowState::Throwing),
        ent_is: Some(EntanglementState::PostEntanglement),
        ent_to: None,
        trigger: Trigger::StartRolling,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: None,
        ent_is: Some(EntanglementState::Entangled),
        ent_to: Some(EntanglementState::PostEntanglement),
        trigger: Trigger::MeasurementReceived,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: None,
        ent_is: Some(EntanglementState::PostEntanglement),
        ent_to: Some(EntanglementState::Entangled),
        trigger: Trigger::EntangleRequest,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Idle),
        throw_to: Some(ThrowState::Throwing),
        ent_is: Some(EntanglementState::Teleported),
        ent_to: None,
        trigger: Trigger::StartRolling,
    },
    // === TELEPORTATION ===
    // M hands off its state (any quantum state -> idle superposition)
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: None,
        throw_to: Some(ThrowState::Idle),
        ent_is: None,
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::TeleportInitiated,
    },
    // A's entanglement ends once M confirms
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: None,
        throw_to: Some(ThrowState::Idle),
        ent_is: Some(EntanglementState::Entangled),
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::TeleportConfirmed,
    },
    // B receives a payload from an M that was Pure
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: None,
        throw_to: None,
        ent_is: Some(EntanglementState::Entangled),
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::TeleportReceived,
    },
    // === QUANTUM MODE - THROWING ===
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Throwing),
        throw_to: Some(ThrowState::Observed),
        ent_is: None,
        ent_to: None,
        trigger: Trigger::StopRolling,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Throwing),
        throw_to: Some(ThrowState::Idle),
        ent_is: Some(EntanglementState::Pure),
        ent_to: Some(EntanglementState::EntangleRequested),
        trigger: Trigger::CloseBy,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Throwing),
        throw_to: Some(ThrowState::Idle),
        ent_is: Some(EntanglementState::Pure),
        ent_to: Some(EntanglementState::Entangled),
        trigger: Trigger::EntangleRequest,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Throwing),
        throw_to: Some(ThrowState::Idle),
        ent_is: Some(EntanglementState::EntangleRequested),
        ent_to: Some(EntanglementState::Entangled),
        trigger: Trigger::EntangleConfirm,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Throwing),
        throw_to: None,
        ent_is: Some(EntanglementState::Entangled),
        ent_to: Some(EntanglementState::PostEntanglement),
        trigger: Trigger::MeasurementReceived,
    },
    // === QUANTUM MODE - OBSERVED ===
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Observed),
        throw_to: Some(ThrowState::Throwing),
        ent_is: Some(EntanglementState::Pure),
        ent_to: None,
        trigger: Trigger::StartRolling,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Observed),
        throw_to: Some(ThrowState::Idle),
        ent_is: Some(EntanglementState::Pure),
        ent_to: Some(EntanglementState::EntangleRequested),
        trigger: Trigger::CloseBy,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Observed),
        throw_to: Some(ThrowState::Idle),
        ent_is: Some(EntanglementState::Pure),
        ent_to: Some(EntanglementState::Entangled),
        trigger: Trigger::EntangleRequest,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Observed),
        throw_to: Some(ThrowState::Idle),
        ent_is: Some(EntanglementState::EntangleRequested),
        ent_to: Some(EntanglementState::Entangled),
        trigger: Trigger::EntangleConfirm,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Observed),
        throw_to: Some(ThrowState::Throwing),
        ent_is: Some(EntanglementState::Entangled),
        ent_to: None,
        trigger: Trigger::StartRolling,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Observed),
        throw_to: Some(ThrowState::Throwing),
        ent_is: Some(EntanglementState::PostEntanglement),
        ent_to: Some(EntanglementState::Pure),
        trigger: Trigger::StartRolling,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Observed),
        throw_to: Some(ThrowState::Throwing),
        ent_is: None,
        ent_to: None,
        trigger: Trigger::MeasureFail,
    },
    StateTransition {
        mode_is: Some(Mode::Quantum),
        mode_to: None,
        throw_is: Some(ThrowState::Observed),
        throw_to: None,
        ent_is: Some(EntanglementState::Entangled),
        ent_to: Some(EntanglementState::PostEntanglement),
        trigger: Trigger::MeasurementReceived,
    },
    // === LOW BATTERY ===
    StateTransition {
        mode_is: None,
        mode_to: Some(Mode::LowBattery),
        throw_is: None,
        throw_to: None,
        ent_is: None,
        ent_to: None,
        trigger: Trigger::LowBattery,
    },
];

fn find_transition(state: State, trigger: Trigger) -> Option<&'static StateTransition> {
    TRANSITIONS.iter().find(|transition| {
        transition.trigger == trigger
            && transition.mode_is.map_or(true, |mode| mode == state.mode)
            && transition.throw_is.map_or(true, |throw| throw == state.throw_state)
            && transition.ent_is.map_or(true, |ent| ent == state.entanglement_state)
    })
}

/// The per-dice state machine
///
/// Owns the whole runtime state of one dice and its collaborator handles.
/// Driven by periodic `update` calls from the main loop; the radio side
/// only ever touches the shared received-frame queue.
pub struct StateMachine<S, V, D>
where
    S: MotionSensor,
    V: VoltageMonitor,
    D: DisplayPort,
{
    config: DiceConfiguration,
    own_mac: MacAddress,
    rx_queue: &'static FrameQueue,
    outbox: FrameSender,
    sensor: S,
    voltage: V,
    display: DisplayRequester<D>,
    engine: MeasurementEngine,
    proximity: ProximityTracker,

    state: State,
    /// Last state reported by the entanglement partner's beacon
    partner_state: Option<State>,
    current_peer: MacAddress,
    next_peer: MacAddress,
    entanglement_color: u16,

    // Partner's measurement (held while PostEntanglement)
    partner_axis: MeasuredAxis,
    partner_number: DiceNumber,
    // Teleported measurement (held while Teleported)
    teleported_axis: MeasuredAxis,
    teleported_number: DiceNumber,

    // Own displayed measurement
    measure_axis: MeasuredAxis,
    upside: UpSide,
    dice_number: DiceNumber,

    state_entry_time: Instant,
    last_watchdog: Instant,

    show_colors: bool,
    flash_color: bool,
    flash_color_start: Instant,
    clicked: bool,
    long_clicked: bool,

    // Deep-sleep bookkeeping
    sleep_moving: bool,
    last_movement: Instant,
}

impl<S, V, D> StateMachine<S, V, D>
where
    S: MotionSensor,
    V: VoltageMonitor,
    D: DisplayPort,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DiceConfiguration,
        own_mac: MacAddress,
        rx_queue: &'static FrameQueue,
        outbox: FrameSender,
        sensor: S,
        voltage: V,
        display_port: D,
        rng_seed: u64,
    ) -> Self {
        StateMachine {
            config,
            own_mac,
            rx_queue,
            outbox,
            sensor,
            voltage,
            display: DisplayRequester::new(display_port),
            engine: MeasurementEngine::new(rng_seed),
            proximity: ProximityTracker::new(),
            state: State {
                mode: Mode::Classic,
                throw_state: ThrowState::Idle,
                entanglement_state: EntanglementState::Pure,
            },
            partner_state: None,
            current_peer: MacAddress::UNBOUND,
            next_peer: MacAddress::UNBOUND,
            entanglement_color: COLOR_OFF_WHITE,
            partner_axis: MeasuredAxis::Undefined,
            partner_number: DiceNumber::None,
            teleported_axis: MeasuredAxis::Undefined,
            teleported_number: DiceNumber::None,
            measure_axis: MeasuredAxis::Undefined,
            upside: UpSide::None,
            dice_number: DiceNumber::None,
            state_entry_time: Instant::from_ticks(0),
            last_watchdog: Instant::from_ticks(0),
            show_colors: true,
            flash_color: false,
            flash_color_start: Instant::from_ticks(0),
            clicked: false,
            long_clicked: false,
            sleep_moving: false,
            last_movement: Instant::from_ticks(0),
        }
    }

    /// Runs the entry action of the boot state
    pub fn begin(&mut self, now: Instant) {
        log!(Level::Info, "[{}] State machine starting in {}", self.own_mac, self.state);
        self.last_watchdog = now;
        self.last_movement = now;
        self.on_entry(now);
    }

    /// One cooperative tick: drain radio, poll sensor, service timers,
    /// run the current state's while-handler
    pub fn update(&mut self, now: Instant) {
        while let Some(received) = self.rx_queue.pop() {
            // Every frame counts as a presence observation, whatever it is
            self.proximity.observe(received.source, received.rssi);
            match DiceMessage::parse(&received.frame) {
                Some(message) => self.dispatch(message, received.source, now),
                None => {
                    log!(
                        Level::Trace,
                        "[{}] Discarding malformed frame ({} bytes) from {}",
                        self.own_mac,
                        received.frame.length,
                        received.source
                    );
                }
            }
        }

        self.sensor.update();

        // Short click toggles color display (quantum mode only)
        if self.clicked {
            self.clicked = false;
            if self.state.mode == Mode::Quantum {
                self.show_colors = !self.show_colors;
                self.refresh_screens();
            }
        }

        // Presence beacon, every watchdog period in every mode
        if now.saturating_duration_since(self.last_watchdog) >= Duration::from_millis(WATCHDOG_INTERVAL_MS) {
            self.send_watchdog();
            self.last_watchdog = now;
        }

        if self.flash_color
            && now.saturating_duration_since(self.flash_color_start) >= Duration::from_millis(self.config.color_flash_timeout_ms as u64)
        {
            self.flash_color = false;
            self.refresh_screens();
        }

        self.while_in_state(now);
        self.update_sleep_timer(now);
    }

    /// Button collaborator: short click edge
    pub fn short_click(&mut self) {
        self.clicked = true;
    }

    /// Button collaborator: long click edge
    pub fn long_click(&mut self) {
        self.long_clicked = true;
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn current_peer(&self) -> MacAddress {
        self.current_peer
    }

    pub fn next_peer(&self) -> MacAddress {
        self.next_peer
    }

    pub fn entanglement_color(&self) -> u16 {
        self.entanglement_color
    }

    pub fn dice_number(&self) -> DiceNumber {
        self.dice_number
    }

    pub fn measured_axis(&self) -> MeasuredAxis {
        self.measure_axis
    }

    pub fn upside(&self) -> UpSide {
        self.upside
    }

    /// Last state the entanglement partner reported via its beacon
    pub fn partner_state(&self) -> Option<State> {
        self.partner_state
    }

    /// True when the dice has been motionless long enough to power down
    pub fn deep_sleep_due(&self, now: Instant) -> bool {
        !self.sleep_moving
            && now.saturating_duration_since(self.last_movement) > Duration::from_millis(self.config.deep_sleep_timeout_ms as u64)
    }

    // ------------------------------------------------------------------
    // Transition machinery
    // ------------------------------------------------------------------

    fn change_state(&mut self, trigger: Trigger, now: Instant) {
        let Some(transition) = find_transition(self.state, trigger) else {
            log!(Level::Error, "[{}] No transition from {} on {:?}", self.own_mac, self.state, trigger);
            return;
        };

        let mut next = self.state;
        if let Some(mode) = transition.mode_to {
            next.mode = mode;
        }
        if let Some(throw) = transition.throw_to {
            next.throw_state = throw;
        }
        if let Some(ent) = transition.ent_to {
            next.entanglement_state = ent;
        }

        if next == self.state {
            return;
        }

        // Entering Pure releases the peer binding and invalidates any
        // cached partner or teleport measurement
        if next.entanglement_state == EntanglementState::Pure && self.state.entanglement_state != EntanglementState::Pure {
            self.current_peer = MacAddress::UNBOUND;
            self.clear_quantum_caches();
        }

        self.state = next;
        log!(Level::Debug, "[{}] State changed to {} on {:?}", self.own_mac, self.state, trigger);
        self.on_entry(now);
    }

    fn on_entry(&mut self, now: Instant) {
        match (self.state.mode, self.state.throw_state) {
            (Mode::Classic, _) => self.enter_classic_idle(now),
            (Mode::LowBattery, _) => self.enter_low_battery(now),
            (Mode::Quantum, ThrowState::Idle) => self.enter_quantum_idle(now),
            (Mode::Quantum, ThrowState::Throwing) => self.enter_throwing(now),
            (Mode::Quantum, ThrowState::Observed) => self.enter_observed(now),
        }
    }

    fn while_in_state(&mut self, now: Instant) {
        match (self.state.mode, self.state.throw_state) {
            (Mode::Classic, _) => self.while_classic_idle(now),
            (Mode::LowBattery, _) => {}
            (Mode::Quantum, ThrowState::Idle) => self.while_quantum_idle(now),
            (Mode::Quantum, ThrowState::Throwing) => self.while_throwing(now),
            (Mode::Quantum, ThrowState::Observed) => self.while_observed(now),
        }
    }

    // ------------------------------------------------------------------
    // Message dispatch
    // ------------------------------------------------------------------

    fn dispatch(&mut self, message: DiceMessage, source: MacAddress, now: Instant) {
        if self.state.mode == Mode::LowBattery {
            log!(Level::Trace, "[{}] Low battery, ignoring frame from {}", self.own_mac, source);
            return;
        }

        // Classic dice only answer with presence and denial
        if self.state.mode == Mode::Classic {
            match message {
                DiceMessage::WatchDog { state } => {
                    if source == self.current_peer {
                        self.partner_state = Some(state);
                    }
                }
                DiceMessage::EntangleRequest => {
                    log!(Level::Debug, "[{}] Classic mode, denying entanglement request from {}", self.own_mac, source);
                    self.outbox.send(&DiceMessage::EntangleDenied, source);
                }
                _ => {
                    log!(Level::Trace, "[{}] Classic mode, ignoring frame from {}", self.own_mac, source);
                }
            }
            return;
        }

        match message {
            DiceMessage::WatchDog { state } => {
                if source == self.current_peer {
                    self.partner_state = Some(state);
                }
            }

            DiceMessage::Measurement { state, axis, number, .. } => {
                if source != self.current_peer {
                    return;
                }
                log!(Level::Debug, "[{}] Partner measured {:?} on {:?}", self.own_mac, number, axis);
                self.partner_state = Some(state);
                self.partner_axis = axis;
                self.partner_number = number;
                // The peer stays bound through PostEntanglement; it is
                // released when this dice performs its own measurement
                self.change_state(Trigger::MeasurementReceived, now);
            }

            DiceMessage::EntangleRequest => {
                self.handle_entangle_request(source, now);
            }

            DiceMessage::EntangleConfirm { color } => {
                if self.state.entanglement_state != EntanglementState::EntangleRequested {
                    log!(Level::Trace, "[{}] Unsolicited entangle confirm from {}", self.own_mac, source);
                    return;
                }
                log!(Level::Debug, "[{}] Entanglement confirmed by {}, color {:#06X}", self.own_mac, source, color);
                self.current_peer = self.next_peer;
                self.next_peer = MacAddress::UNBOUND;
                self.entanglement_color = color;
                if !self.show_colors {
                    self.flash_color = true;
                    self.flash_color_start = now;
                }
                self.clear_measurement();
                self.change_state(Trigger::EntangleConfirm, now);
            }

            DiceMessage::EntangleDenied => {
                log!(Level::Debug, "[{}] Entanglement denied by {}", self.own_mac, source);
                self.next_peer = MacAddress::UNBOUND;
                if self.state.entanglement_state == EntanglementState::EntangleRequested {
                    self.change_state(Trigger::EntangleStop, now);
                }
            }

            DiceMessage::TeleportRequest { target } => {
                self.handle_teleport_request(source, target, now);
            }

            DiceMessage::TeleportConfirm => {
                // A's role: the hand-off went through, the entanglement
                // with B now lives elsewhere
                if self.state.entanglement_state != EntanglementState::Entangled {
                    log!(Level::Trace, "[{}] Unexpected teleport confirm from {}", self.own_mac, source);
                    return;
                }
                log!(Level::Debug, "[{}] Teleport confirmed by {}, releasing entanglement", self.own_mac, source);
                self.current_peer = MacAddress::UNBOUND;
                self.next_peer = MacAddress::UNBOUND;
                self.clear_measurement();
                self.engine.reset();
                self.change_state(Trigger::TeleportConfirmed, now);
            }

            DiceMessage::TeleportPayload {
                state,
                axis,
                number,
                entangled_peer,
                color,
                ..
            } => {
                self.handle_teleport_payload(state, axis, number, entangled_peer, color, now);
            }

            DiceMessage::TeleportPartner { new_partner } => {
                // N's role: same entanglement, new far end
                if self.state.entanglement_state != EntanglementState::Entangled {
                    log!(Level::Trace, "[{}] Unexpected teleport partner update from {}", self.own_mac, source);
                    return;
                }
                log!(Level::Debug, "[{}] Partner moved from {} to {}", self.own_mac, self.current_peer, new_partner);
                self.current_peer = new_partner;
            }
        }
    }

    fn handle_entangle_request(&mut self, source: MacAddress, now: Instant) {
        // Symmetric request race: both sides waiting would deadlock, so a
        // dice that already asked denies
        if self.state.entanglement_state == EntanglementState::EntangleRequested {
            log!(Level::Debug, "[{}] Already requesting, denying {} to break symmetry", self.own_mac, source);
            self.outbox.send(&DiceMessage::EntangleDenied, source);
            return;
        }

        // An entangled dice treats the request as a teleport initiation:
        // the requester (M) should send its state to our partner (B)
        if self.state.entanglement_state == EntanglementState::Entangled {
            log!(
                Level::Debug,
                "[{}] Entangled, answering {} with teleport request toward {}",
                self.own_mac,
                source,
                self.current_peer
            );
            self.outbox.send(&DiceMessage::TeleportRequest { target: self.current_peer }, source);
            self.next_peer = source;
            // State changes once TELEPORT_CONFIRM arrives
            return;
        }

        // Accept only when the table can actually bind the peer; anything
        // else (for example a Teleported dice) is denied so the peer slot
        // and the entanglement state never disagree
        if find_transition(self.state, Trigger::EntangleRequest).is_none() {
            log!(Level::Debug, "[{}] Cannot entangle in {}, denying {}", self.own_mac, self.state, source);
            self.outbox.send(&DiceMessage::EntangleDenied, source);
            return;
        }

        self.current_peer = source;
        let color = self.pick_entanglement_color();
        self.entanglement_color = color;
        log!(Level::Debug, "[{}] Accepting entanglement with {}, color {:#06X}", self.own_mac, source, color);
        self.outbox.send(&DiceMessage::EntangleConfirm { color }, source);
        if !self.show_colors {
            self.flash_color = true;
            self.flash_color_start = now;
        }
        self.clear_measurement();
        self.change_state(Trigger::EntangleRequest, now);
    }

    fn handle_teleport_request(&mut self, source: MacAddress, target: MacAddress, now: Instant) {
        // M's role: ship the current quantum condition to B
        log!(Level::Debug, "[{}] Teleporting own state to {}", self.own_mac, target);

        // If entangled, the old partner must learn its new far end first
        if self.state.entanglement_state == EntanglementState::Entangled && !self.current_peer.is_unbound() {
            self.outbox.send(&DiceMessage::TeleportPartner { new_partner: target }, self.current_peer);
        }

        self.outbox.send(
            &DiceMessage::TeleportPayload {
                state: self.state,
                axis: self.measure_axis,
                number: self.dice_number,
                upside: self.upside,
                entangled_peer: self.current_peer,
                color: self.entanglement_color,
            },
            target,
        );
        self.outbox.send(&DiceMessage::TeleportConfirm, source);

        if self.state.entanglement_state == EntanglementState::Entangled {
            self.current_peer = MacAddress::UNBOUND;
        }
        self.clear_measurement();
        self.engine.reset();
        self.change_state(Trigger::TeleportInitiated, now);
    }

    fn handle_teleport_payload(
        &mut self,
        payload_state: State,
        axis: MeasuredAxis,
        number: DiceNumber,
        entangled_peer: MacAddress,
        color: u16,
        now: Instant,
    ) {
        // B's role: adopt whatever condition M was in
        self.current_peer = MacAddress::UNBOUND;

        if payload_state.entanglement_state == EntanglementState::Entangled {
            log!(Level::Debug, "[{}] Teleported state is entangled, adopting partner {}", self.own_mac, entangled_peer);
            self.current_peer = entangled_peer;
            self.entanglement_color = color;
            if !self.show_colors {
                self.flash_color = true;
                self.flash_color_start = now;
            }
            self.clear_measurement();
            self.force_entanglement_state(EntanglementState::Entangled);
        } else if payload_state.throw_state == ThrowState::Observed {
            log!(Level::Debug, "[{}] Teleported state is observed: {:?} on {:?}", self.own_mac, number, axis);
            self.teleported_axis = axis;
            self.teleported_number = number;
            self.force_entanglement_state(EntanglementState::Teleported);
        } else {
            log!(Level::Debug, "[{}] Teleported state is pure", self.own_mac);
            self.change_state(Trigger::TeleportReceived, now);
        }
    }

    /// Adopts an entanglement state delivered by teleport, bypassing the
    /// transition table (the condition arrives from outside, it is not an
    /// own transition)
    fn force_entanglement_state(&mut self, entanglement_state: EntanglementState) {
        self.state.entanglement_state = entanglement_state;
        log!(Level::Debug, "[{}] State set to {} by teleport payload", self.own_mac, self.state);
        self.refresh_screens();
    }

    // ------------------------------------------------------------------
    // Entry handlers
    // ------------------------------------------------------------------

    fn enter_classic_idle(&mut self, now: Instant) {
        self.state_entry_time = now;
        self.clear_measurement();
        self.send_watchdog();
        self.refresh_screens();
    }

    fn enter_quantum_idle(&mut self, now: Instant) {
        self.state_entry_time = now;
        self.sensor.reset_tumble_detection();
        self.long_clicked = false;
        self.send_watchdog();
        self.refresh_screens();
    }

    fn enter_throwing(&mut self, now: Instant) {
        self.state_entry_time = now;
        self.refresh_screens();
        self.send_watchdog();
    }

    fn enter_observed(&mut self, now: Instant) {
        self.state_entry_time = now;

        // Still moving means the throw has not actually finished
        if self.sensor.moving() {
            log!(Level::Debug, "[{}] Still moving, measurement failed", self.own_mac);
            self.change_state(Trigger::MeasureFail, now);
            return;
        }

        let Some((axis, upside)) = axis_and_upside(self.sensor.orientation()) else {
            log!(Level::Debug, "[{}] No clear axis, measurement failed", self.own_mac);
            self.change_state(Trigger::MeasureFail, now);
            return;
        };
        self.measure_axis = axis;
        self.upside = upside;

        match self.state.entanglement_state {
            EntanglementState::Pure => {
                self.dice_number = self.engine.measure_pure(axis);
            }
            EntanglementState::Entangled => {
                // This dice measured first: roll fresh and tell the
                // partner, whose next same-basis measurement must
                // anti-correlate
                let number = self.engine.measure_entangled(axis);
                self.dice_number = number;
                self.outbox.send(
                    &DiceMessage::Measurement {
                        state: self.state,
                        axis,
                        number,
                        upside,
                    },
                    self.current_peer,
                );
                self.state.entanglement_state = EntanglementState::Pure;
                self.current_peer = MacAddress::UNBOUND;
                self.clear_quantum_caches();
            }
            EntanglementState::PostEntanglement => {
                self.dice_number = self.engine.measure_correlated(axis, self.partner_axis, self.partner_number);
                self.state.entanglement_state = EntanglementState::Pure;
                self.current_peer = MacAddress::UNBOUND;
                self.clear_quantum_caches();
            }
            EntanglementState::Teleported => {
                self.dice_number = self.engine.measure_teleported(axis, self.teleported_axis, self.teleported_number);
                self.state.entanglement_state = EntanglementState::Pure;
                self.clear_quantum_caches();
            }
            EntanglementState::EntangleRequested => {
                // Not reachable through the transition table; draw fresh
                self.dice_number = self.engine.measure_entangled(axis);
            }
        }

        log!(
            Level::Info,
            "[{}] Observed {:?} on {:?} (up side {:?})",
            self.own_mac,
            self.dice_number,
            self.measure_axis,
            self.upside
        );

        self.sensor.reset_tumble_detection();
        self.refresh_screens();
        self.send_watchdog();
    }

    fn enter_low_battery(&mut self, now: Instant) {
        log!(Level::Warn, "[{}] Battery low, shutting down protocol activity", self.own_mac);
        self.state_entry_time = now;
        self.clear_measurement();
        self.send_watchdog();
        self.refresh_screens();
    }

    // ------------------------------------------------------------------
    // While handlers
    // ------------------------------------------------------------------

    fn while_classic_idle(&mut self, now: Instant) {
        if self.voltage.check_minimum_voltage() {
            self.change_state(Trigger::LowBattery, now);
            return;
        }

        if self.long_clicked {
            self.long_clicked = false;
            self.change_state(Trigger::ButtonPressed, now);
        }
    }

    fn while_quantum_idle(&mut self, now: Instant) {
        if self.voltage.check_minimum_voltage() {
            self.change_state(Trigger::LowBattery, now);
            return;
        }

        if self.long_press_allowed() {
            self.long_clicked = false;
            self.change_state(Trigger::ButtonPressed, now);
            return;
        }

        if self.sensor.tumbled() {
            self.change_state(Trigger::StartRolling, now);
            return;
        }

        match self.state.entanglement_state {
            EntanglementState::Pure | EntanglementState::PostEntanglement | EntanglementState::Teleported => {
                if let Some(peer) = self.proximity.nearby(self.config.rssi_limit, self.current_peer, self.next_peer) {
                    log!(Level::Debug, "[{}] Nearby dice {} detected, requesting entanglement", self.own_mac, peer);
                    self.next_peer = peer;
                    self.outbox.send(&DiceMessage::EntangleRequest, peer);
                    self.proximity.consume();
                    self.change_state(Trigger::CloseBy, now);
                }
            }
            EntanglementState::Entangled => {
                // An entangled dice answers presence with a teleport
                // offer instead of a second entanglement
                if let Some(peer) = self.proximity.nearby(self.config.rssi_limit, self.current_peer, self.next_peer) {
                    log!(
                        Level::Debug,
                        "[{}] Nearby dice {} detected while entangled, offering teleport toward {}",
                        self.own_mac,
                        peer,
                        self.current_peer
                    );
                    self.next_peer = peer;
                    self.outbox.send(&DiceMessage::TeleportRequest { target: self.current_peer }, peer);
                    self.proximity.consume();
                    // State changes once TELEPORT_CONFIRM arrives
                }
            }
            EntanglementState::EntangleRequested => {
                if now.saturating_duration_since(self.state_entry_time) > Duration::from_millis(MAX_ENTANGLED_WAIT_MS) {
                    log!(Level::Debug, "[{}] Entanglement request timed out", self.own_mac);
                    self.change_state(Trigger::Timed, now);
                }
            }
        }
    }

    fn while_throwing(&mut self, now: Instant) {
        if self.voltage.check_minimum_voltage() {
            self.change_state(Trigger::LowBattery, now);
            return;
        }

        if self.long_press_allowed() {
            self.long_clicked = false;
            self.change_state(Trigger::ButtonPressed, now);
            return;
        }

        if self.sensor.stable() && self.sensor.on_table() {
            self.change_state(Trigger::StopRolling, now);
            return;
        }

        if self.state.entanglement_state == EntanglementState::Pure {
            if let Some(peer) = self.proximity.nearby(self.config.rssi_limit, self.current_peer, self.next_peer) {
                log!(Level::Debug, "[{}] Nearby dice {} detected mid-throw, requesting entanglement", self.own_mac, peer);
                self.next_peer = peer;
                self.outbox.send(&DiceMessage::EntangleRequest, peer);
                self.proximity.consume();
                self.change_state(Trigger::CloseBy, now);
            }
        }
    }

    fn while_observed(&mut self, now: Instant) {
        if self.voltage.check_minimum_voltage() {
            self.change_state(Trigger::LowBattery, now);
            return;
        }

        if self.long_press_allowed() {
            self.long_clicked = false;
            self.change_state(Trigger::ButtonPressed, now);
            return;
        }

        if self.sensor.tumbled() {
            self.change_state(Trigger::StartRolling, now);
            return;
        }

        if self.state.entanglement_state == EntanglementState::Pure {
            if let Some(peer) = self.proximity.nearby(self.config.rssi_limit, self.current_peer, self.next_peer) {
                log!(Level::Debug, "[{}] Nearby dice {} detected, requesting entanglement", self.own_mac, peer);
                self.next_peer = peer;
                self.outbox.send(&DiceMessage::EntangleRequest, peer);
                self.proximity.consume();
                self.change_state(Trigger::CloseBy, now);
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Mode toggle is only honored outside active entanglement protocol
    /// states
    fn long_press_allowed(&self) -> bool {
        self.long_clicked
            && matches!(
                self.state.entanglement_state,
                EntanglementState::Pure | EntanglementState::PostEntanglement | EntanglementState::Teleported
            )
    }

    fn pick_entanglement_color(&mut self) -> u16 {
        let count = (self.config.entang_colors_count as usize).min(self.config.entang_colors.len());
        if count == 0 {
            return DEFAULT_ENTANGLEMENT_COLOR;
        }
        self.config.entang_colors[self.engine.random_index(count)]
    }

    fn clear_measurement(&mut self) {
        self.dice_number = DiceNumber::None;
        self.upside = UpSide::None;
        self.measure_axis = MeasuredAxis::Undefined;
    }

    fn clear_quantum_caches(&mut self) {
        self.partner_axis = MeasuredAxis::Undefined;
        self.partner_number = DiceNumber::None;
        self.teleported_axis = MeasuredAxis::Undefined;
        self.teleported_number = DiceNumber::None;
    }

    fn send_watchdog(&mut self) {
        self.outbox.send(&DiceMessage::WatchDog { state: self.state }, MacAddress::BROADCAST);
    }

    fn refresh_screens(&mut self) {
        let color = if self.show_colors || self.flash_color {
            self.entanglement_color
        } else {
            COLOR_OFF_WHITE
        };
        self.display.request(self.state, self.dice_number, self.upside, color);
    }

    fn update_sleep_timer(&mut self, now: Instant) {
        if self.sensor.stable() {
            if self.sleep_moving {
                self.last_movement = now;
                self.sleep_moving = false;
            }
        } else {
            self.sleep_moving = true;
        }
    }
}
