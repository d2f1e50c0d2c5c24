//! Function-pointer finite state machine for the brew cycle.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  StateTable                                                 │
//! │  ┌───────────────────┬──────────┬─────────┬──────────────┐  │
//! │  │ BrewState         │ on_enter │ on_exit │ on_update    │  │
//! │  ├───────────────────┼──────────┼─────────┼──────────────┤  │
//! │  │ Invalid           │    -     │    -    │ fn(ctx)      │  │
//! │  │ Deactivated       │    -     │    -    │ fn(ctx)      │  │
//! │  │ Heating           │ fn(ctx)  │    -    │ fn(ctx)      │  │
//! │  │ Active            │ fn(ctx)  │    -    │ fn(ctx)      │  │
//! │  │ Steam             │ fn(ctx)  │ fn(ctx) │ fn(ctx)      │  │
//! │  │ Extracting        │    -     │    -    │ fn(ctx)      │  │
//! │  │ ExtractingOneCup  │    -     │    -    │ fn(ctx)      │  │
//! │  │ ExtractingTwoCups │    -     │    -    │ fn(ctx)      │  │
//! │  └───────────────────┴──────────┴─────────┴──────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tick the engine calls `on_update` for the current state.  A
//! returned [`Transition`] either enters a detour state (remembering
//! where it came from), switches outright, or resumes the remembered
//! state.  A single `previous` slot is enough: detours (Steam and the
//! extraction states) never nest, because their commands are refused
//! while another detour is running.

pub mod context;
pub mod states;
pub mod stopwatch;

use context::FsmContext;
use log::info;
use serde::Serialize;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Enumeration of all brew states.
/// Must stay in sync with the table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum BrewState {
    Invalid = 0,
    Deactivated = 1,
    Heating = 2,
    Active = 3,
    Steam = 4,
    Extracting = 5,
    ExtractingOneCup = 6,
    ExtractingTwoCups = 7,
}

impl BrewState {
    /// Total number of states, used to size the table array.
    pub const COUNT: usize = 8;

    /// Convert an index back to `BrewState`; out-of-range maps to `Invalid`.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            1 => Self::Deactivated,
            2 => Self::Heating,
            3 => Self::Active,
            4 => Self::Steam,
            5 => Self::Extracting,
            6 => Self::ExtractingOneCup,
            7 => Self::ExtractingTwoCups,
            _ => Self::Invalid,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "Invalid",
            Self::Deactivated => "Deactivated",
            Self::Heating => "Heating",
            Self::Active => "Active",
            Self::Steam => "Steam",
            Self::Extracting => "Extracting",
            Self::ExtractingOneCup => "ExtractingOneCup",
            Self::ExtractingTwoCups => "ExtractingTwoCups",
        }
    }

    /// Manual or automatic extraction in progress.
    pub fn is_extracting(self) -> bool {
        matches!(
            self,
            Self::Extracting | Self::ExtractingOneCup | Self::ExtractingTwoCups
        )
    }
}

impl core::fmt::Display for BrewState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the engine moves between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Enter a detour state and remember the current one.
    Enter(BrewState),
    /// Replace the current state; the remembered state is kept.
    Switch(BrewState),
    /// Return to the remembered state.
    Resume,
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut FsmContext);

/// Signature for the per-tick update handler.
pub type StateUpdateFn = fn(&mut FsmContext) -> Option<Transition>;

/// Static descriptor for a single state.
pub struct StateDescriptor {
    pub id: BrewState,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

pub struct Fsm {
    /// Fixed-size table indexed by `BrewState as usize`.
    table: [StateDescriptor; BrewState::COUNT],
    current: usize,
    previous: usize,
}

impl Fsm {
    pub fn new(table: [StateDescriptor; BrewState::COUNT], initial: BrewState) -> Self {
        debug_assert!(
            table.iter().enumerate().all(|(i, d)| d.id as usize == i),
            "state table out of order"
        );
        Self {
            table,
            current: initial as usize,
            previous: initial as usize,
        }
    }

    /// Run the initial `on_enter`.  Call once before the first `tick()`.
    pub fn start(&mut self, ctx: &mut FsmContext) {
        info!("FSM starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Run `on_update` for the current state and apply its transition.
    /// Returns `(from, to)` when the state changed.
    pub fn tick(&mut self, ctx: &mut FsmContext) -> Option<(BrewState, BrewState)> {
        let transition = (self.table[self.current].on_update)(ctx)?;
        Some(self.apply(transition, ctx))
    }

    /// Apply a transition requested from outside the table (commands).
    /// Returns `(from, to)`.  Re-entering the current state still runs its
    /// exit and enter actions.
    pub fn apply(&mut self, transition: Transition, ctx: &mut FsmContext) -> (BrewState, BrewState) {
        let from = self.current_state();
        let to = match transition {
            Transition::Enter(next) => {
                self.previous = self.current;
                next
            }
            Transition::Switch(next) => next,
            Transition::Resume => self.previous_state(),
        };
        self.switch_to(to, ctx);
        (from, to)
    }

    pub fn current_state(&self) -> BrewState {
        BrewState::from_index(self.current)
    }

    /// The state a detour returns to.
    pub fn previous_state(&self) -> BrewState {
        BrewState::from_index(self.previous)
    }

    fn switch_to(&mut self, next: BrewState, ctx: &mut FsmContext) {
        let next_idx = next as usize;

        info!(
            "FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::context::{FsmContext, ShotLogAction};
    use super::*;
    use crate::config::SystemConfig;
    use crate::sensors::flow::FlowState;
    use std::time::Duration;

    fn make_ctx() -> FsmContext {
        FsmContext::new(SystemConfig::default(), Duration::ZERO)
    }

    fn make_fsm(initial: BrewState) -> (Fsm, FsmContext) {
        let mut fsm = Fsm::new(states::build_state_table(), initial);
        let mut ctx = make_ctx();
        fsm.start(&mut ctx);
        (fsm, ctx)
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn starting_in_heating_requests_preheat_profile() {
        let (fsm, ctx) = make_fsm(BrewState::Heating);
        assert_eq!(fsm.current_state(), BrewState::Heating);
        assert!(ctx.commands.refresh_regulator);
    }

    #[test]
    fn heating_waits_for_preheat_duration() {
        let (mut fsm, mut ctx) = make_fsm(BrewState::Heating);
        ctx.now = secs(599.9);
        assert_eq!(fsm.tick(&mut ctx), None);

        ctx.commands.clear();
        ctx.now = secs(600.0);
        assert_eq!(
            fsm.tick(&mut ctx),
            Some((BrewState::Heating, BrewState::Active))
        );
        assert!(ctx.commands.refresh_regulator);
        assert!(ctx.timers.idle.is_running());
    }

    #[test]
    fn manual_flow_is_debounced() {
        let (mut fsm, mut ctx) = make_fsm(BrewState::Active);
        ctx.timers.idle.start(secs(0.0));
        ctx.sensors.flow_state = FlowState::Flowing;

        ctx.now = secs(4.9);
        assert_eq!(fsm.tick(&mut ctx), None);

        ctx.now = secs(5.0);
        fsm.tick(&mut ctx);
        assert_eq!(fsm.current_state(), BrewState::Extracting);
        assert_eq!(fsm.previous_state(), BrewState::Active);
        assert!(ctx.timers.extraction.is_running());
        assert_eq!(ctx.commands.shot_log, Some(ShotLogAction::Open));
    }

    #[test]
    fn manual_extraction_ends_when_flow_stops() {
        let (mut fsm, mut ctx) = make_fsm(BrewState::Active);
        ctx.timers.idle.start(secs(0.0));
        ctx.sensors.flow_state = FlowState::Flowing;
        ctx.now = secs(10.0);
        fsm.tick(&mut ctx);

        ctx.commands.clear();
        ctx.sensors.flow_state = FlowState::Stopped;
        ctx.now = secs(30.0);
        assert_eq!(
            fsm.tick(&mut ctx),
            Some((BrewState::Extracting, BrewState::Active))
        );
        assert!(!ctx.timers.extraction.is_running());
        assert_eq!(ctx.timers.extraction.elapsed(ctx.now), secs(20.0));
        assert!(ctx.timers.idle.is_running());
        assert_eq!(ctx.timers.idle.elapsed(secs(31.0)), secs(1.0));
        assert_eq!(ctx.commands.shot_log, Some(ShotLogAction::Close));
    }

    #[test]
    fn steam_ignores_flow() {
        let (mut fsm, mut ctx) = make_fsm(BrewState::Steam);
        ctx.timers.idle.start(secs(0.0));
        ctx.sensors.flow_state = FlowState::Flowing;
        ctx.now = secs(60.0);
        assert_eq!(fsm.tick(&mut ctx), None);
    }

    #[test]
    fn resume_returns_to_remembered_state() {
        let (mut fsm, mut ctx) = make_fsm(BrewState::Heating);
        fsm.apply(Transition::Enter(BrewState::Steam), &mut ctx);
        assert_eq!(fsm.previous_state(), BrewState::Heating);
        assert_eq!(
            fsm.apply(Transition::Resume, &mut ctx),
            (BrewState::Steam, BrewState::Heating)
        );
    }

    #[test]
    fn switch_keeps_remembered_state() {
        let (mut fsm, mut ctx) = make_fsm(BrewState::Active);
        fsm.apply(Transition::Enter(BrewState::Steam), &mut ctx);
        fsm.apply(Transition::Switch(BrewState::Deactivated), &mut ctx);
        assert_eq!(fsm.previous_state(), BrewState::Active);
    }

    #[test]
    fn steam_enter_and_exit_refresh_regulator() {
        let (mut fsm, mut ctx) = make_fsm(BrewState::Active);
        ctx.commands.clear();
        fsm.apply(Transition::Enter(BrewState::Steam), &mut ctx);
        assert!(ctx.commands.refresh_regulator);
        ctx.commands.clear();
        fsm.apply(Transition::Resume, &mut ctx);
        assert!(ctx.commands.refresh_regulator);
    }

    #[test]
    fn state_index_roundtrip() {
        for i in 0..BrewState::COUNT {
            assert_eq!(BrewState::from_index(i) as usize, i);
        }
        assert_eq!(BrewState::from_index(99), BrewState::Invalid);
    }

    #[test]
    fn cup_extraction_stops_at_configured_volume() {
        let mut fsm = Fsm::new(states::build_state_table(), BrewState::Active);
        let mut ctx = FsmContext::new(
            SystemConfig {
                two_cups_ml: 40.0,
                ..SystemConfig::default()
            },
            Duration::ZERO,
        );
        fsm.start(&mut ctx);
        fsm.apply(Transition::Enter(BrewState::ExtractingTwoCups), &mut ctx);
        ctx.sensors.pump_on = true;
        ctx.sensors.flow_state = FlowState::Flowing;

        // 15 mL priming offset on top of the 40 mL cup.
        ctx.now = secs(10.0);
        ctx.sensors.flow_volume_ml = 54.9;
        assert_eq!(fsm.tick(&mut ctx), None);
        assert!(ctx.timers.extraction.is_running());

        ctx.now = secs(12.0);
        ctx.sensors.flow_volume_ml = 55.0;
        assert_eq!(
            fsm.tick(&mut ctx),
            Some((BrewState::ExtractingTwoCups, BrewState::Active))
        );
        assert_eq!(ctx.commands.pump, Some(false));
    }

    #[test]
    fn state_table_is_indexed_by_id() {
        for (i, d) in states::build_state_table().iter().enumerate() {
            assert_eq!(d.id as usize, i, "{} misplaced", d.name);
            assert_eq!(d.name, d.id.as_str());
        }
    }
}
