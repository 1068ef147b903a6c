//! Per-face screen selection.
//!
//! The dice has six small displays, one per face. This module computes,
//! from the current state, which symbolic screen each face should show.
//! Rendering itself (pixels, fonts, animation) lives behind the
//! `DisplayPort` collaborator.
//!
//! Rules:
//! - Classic mode shows the fixed pip layout (opposite faces sum to 7).
//! - Low battery shows the battery glyph everywhere.
//! - Quantum idle/throwing shows the superposition glyph on all faces,
//!   the entangled variant while entangled or awaiting confirmation.
//! - Quantum observed shows superposition everywhere except the upward
//!   face, which shows the measured number.

use crate::messages::{DiceNumber, EntanglementState, Mode, State, ThrowState, UpSide};

/// Symbolic content of one face display
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScreenState {
    N1,
    N2,
    N3,
    N4,
    N5,
    N6,
    /// Superposition of all six faces
    Mix1To6,
    /// Superposition rendered in the entanglement color
    Mix1To6Entangled,
    LowBattery,
}

/// Screen assignment for all six faces
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ScreenConfiguration {
    pub x0: ScreenState,
    pub x1: ScreenState,
    pub y0: ScreenState,
    pub y1: ScreenState,
    pub z0: ScreenState,
    pub z1: ScreenState,
}

impl ScreenConfiguration {
    fn uniform(screen: ScreenState) -> Self {
        ScreenConfiguration {
            x0: screen,
            x1: screen,
            y0: screen,
            y1: screen,
            z0: screen,
            z1: screen,
        }
    }

    fn set_face(&mut self, upside: UpSide, screen: ScreenState) {
        match upside {
            UpSide::X0 => self.x0 = screen,
            UpSide::X1 => self.x1 = screen,
            UpSide::Y0 => self.y0 = screen,
            UpSide::Y1 => self.y1 = screen,
            UpSide::Z0 => self.z0 = screen,
            UpSide::Z1 => self.z1 = screen,
            UpSide::None | UpSide::Any | UpSide::Na => {}
        }
    }
}

fn pip_for(number: DiceNumber) -> ScreenState {
    match number {
        DiceNumber::One => ScreenState::N1,
        DiceNumber::Two => ScreenState::N2,
        DiceNumber::Three => ScreenState::N3,
        DiceNumber::Four => ScreenState::N4,
        DiceNumber::Five => ScreenState::N5,
        DiceNumber::Six => ScreenState::N6,
        DiceNumber::None => ScreenState::Mix1To6,
    }
}

fn superposition_for(entanglement_state: EntanglementState) -> ScreenState {
    match entanglement_state {
        EntanglementState::Entangled | EntanglementState::EntangleRequested => ScreenState::Mix1To6Entangled,
        _ => ScreenState::Mix1To6,
    }
}

/// Computes the screen for every face from the current state
pub fn determine_screens(state: State, number: DiceNumber, upside: UpSide) -> ScreenConfiguration {
    if state.mode == Mode::Classic {
        // Fixed pip layout: {X0:2, X1:5, Y0:3, Y1:4, Z0:6, Z1:1}
        return ScreenConfiguration {
            x0: ScreenState::N2,
            x1: ScreenState::N5,
            y0: ScreenState::N3,
            y1: ScreenState::N4,
            z0: ScreenState::N6,
            z1: ScreenState::N1,
        };
    }

    if state.mode == Mode::LowBattery {
        return ScreenConfiguration::uniform(ScreenState::LowBattery);
    }

    match state.throw_state {
        ThrowState::Idle | ThrowState::Throwing => ScreenConfiguration::uniform(superposition_for(state.entanglement_state)),
        ThrowState::Observed => {
            let mut config = ScreenConfiguration::uniform(superposition_for(state.entanglement_state));
            config.set_face(upside, pip_for(number));
            config
        }
    }
}

/// Rendering collaborator: pushes a screen assignment to the hardware
pub trait DisplayPort {
    /// `color` is the RGB565 accent used by the entangled superposition
    fn refresh(&mut self, screens: &ScreenConfiguration, color: u16);
}

/// Requests refreshes from the display, skipping no-op updates
///
/// A refresh is forwarded when the face assignment or the accent color
/// changed since the last one; a color change alone forces a redraw of
/// the entangled faces.
pub struct DisplayRequester<D: DisplayPort> {
    port: D,
    last: Option<(ScreenConfiguration, u16)>,
}

impl<D: DisplayPort> DisplayRequester<D> {
    pub fn new(port: D) -> Self {
        DisplayRequester { port, last: None }
    }

    pub fn request(&mut self, state: State, number: DiceNumber, upside: UpSide, color: u16) {
        let screens = determine_screens(state, number, upside);
        if self.last == Some((screens, color)) {
            return;
        }
        self.last = Some((screens, color));
        self.port.refresh(&screens, color);
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn state(mode: Mode, throw_state: ThrowState, entanglement_state: EntanglementState) -> State {
        State {
            mode,
            throw_state,
            entanglement_state,
        }
    }

    #[test]
    fn classic_mode_shows_fixed_pips() {
        let screens = determine_screens(
            state(Mode::Classic, ThrowState::Idle, EntanglementState::Pure),
            DiceNumber::None,
            UpSide::None,
        );
        assert_eq!(screens.x0, ScreenState::N2);
        assert_eq!(screens.x1, ScreenState::N5);
        assert_eq!(screens.y0, ScreenState::N3);
        assert_eq!(screens.y1, ScreenState::N4);
        assert_eq!(screens.z0, ScreenState::N6);
        assert_eq!(screens.z1, ScreenState::N1);
    }

    #[test]
    fn low_battery_covers_all_faces() {
        let screens = determine_screens(
            state(Mode::LowBattery, ThrowState::Idle, EntanglementState::Pure),
            DiceNumber::None,
            UpSide::None,
        );
        assert_eq!(screens, ScreenConfiguration::uniform(ScreenState::LowBattery));
    }

    #[test]
    fn quantum_idle_shows_superposition() {
        let screens = determine_screens(
            state(Mode::Quantum, ThrowState::Idle, EntanglementState::Pure),
            DiceNumber::None,
            UpSide::None,
        );
        assert_eq!(screens, ScreenConfiguration::uniform(ScreenState::Mix1To6));
    }

    #[test]
    fn entangled_superposition_while_entangled_or_requested() {
        for entanglement in [EntanglementState::Entangled, EntanglementState::EntangleRequested] {
            let screens = determine_screens(state(Mode::Quantum, ThrowState::Throwing, entanglement), DiceNumber::None, UpSide::None);
            assert_eq!(screens, ScreenConfiguration::uniform(ScreenState::Mix1To6Entangled));
        }
        for entanglement in [EntanglementState::Pure, EntanglementState::PostEntanglement, EntanglementState::Teleported] {
            let screens = determine_screens(state(Mode::Quantum, ThrowState::Throwing, entanglement), DiceNumber::None, UpSide::None);
            assert_eq!(screens, ScreenConfiguration::uniform(ScreenState::Mix1To6));
        }
    }

    #[test]
    fn observed_shows_number_on_upward_face_only() {
        let screens = determine_screens(
            state(Mode::Quantum, ThrowState::Observed, EntanglementState::Pure),
            DiceNumber::Four,
            UpSide::Z0,
        );
        assert_eq!(screens.z0, ScreenState::N4);
        assert_eq!(screens.z1, ScreenState::Mix1To6);
        assert_eq!(screens.x0, ScreenState::Mix1To6);
        assert_eq!(screens.y1, ScreenState::Mix1To6);
    }

    struct CountingPort {
        refreshes: std::rc::Rc<std::cell::Cell<usize>>,
    }

    impl DisplayPort for CountingPort {
        fn refresh(&mut self, _screens: &ScreenConfiguration, _color: u16) {
            self.refreshes.set(self.refreshes.get() + 1);
        }
    }

    #[test]
    fn requester_skips_identical_updates_but_honors_color_change() {
        let refreshes = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut requester = DisplayRequester::new(CountingPort { refreshes: refreshes.clone() });
        let current = state(Mode::Quantum, ThrowState::Idle, EntanglementState::Entangled);

        requester.request(current, DiceNumber::None, UpSide::None, 0xFFE0);
        requester.request(current, DiceNumber::None, UpSide::None, 0xFFE0);
        assert_eq!(refreshes.get(), 1);

        // Same screens, new color: must redraw
        requester.request(current, DiceNumber::None, UpSide::None, 0x07E0);
        assert_eq!(refreshes.get(), 2);
    }
}
