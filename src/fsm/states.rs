//! Concrete state handler functions and table builder.
//!
//! ```text
//!              power on                      preheat done
//!  Deactivated ────────▶ HEATING ──────────────────────────▶ ACTIVE
//!       ▲                   │  ▲                              │  ▲
//!       └── power off ──────┘  │                 steam / cup  │  │ resume
//!                              └──── resume ──── STEAM ◀──────┘  │
//!                                                EXTRACTING* ────┘
//!
//!  manual flow (idle ≥ debounce) ──▶ EXTRACTING ──[flow stops]──▶ resume
//!  cup command ──▶ EXTRACTING_ONE/TWO ──[target volume]──▶ pump off, resume
//! ```
//!
//! Commands (power, cup, steam) are applied by the brew service; the
//! handlers here cover only the autonomous, sensor-driven transitions.

use super::context::{FsmContext, ShotLogAction};
use super::{BrewState, StateDescriptor, Transition};
use crate::app::commands::CupSize;
use crate::sensors::flow::FlowState;
use log::info;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; BrewState::COUNT] {
    [
        StateDescriptor {
            id: BrewState::Invalid,
            name: "Invalid",
            on_enter: None,
            on_exit: None,
            on_update: stay,
        },
        StateDescriptor {
            id: BrewState::Deactivated,
            name: "Deactivated",
            on_enter: None,
            on_exit: None,
            on_update: detect_manual_extraction,
        },
        StateDescriptor {
            id: BrewState::Heating,
            name: "Heating",
            on_enter: Some(refresh_regulator),
            on_exit: None,
            on_update: heating_update,
        },
        StateDescriptor {
            id: BrewState::Active,
            name: "Active",
            on_enter: Some(refresh_regulator),
            on_exit: None,
            on_update: detect_manual_extraction,
        },
        StateDescriptor {
            id: BrewState::Steam,
            name: "Steam",
            on_enter: Some(refresh_regulator),
            on_exit: Some(refresh_regulator),
            on_update: stay,
        },
        StateDescriptor {
            id: BrewState::Extracting,
            name: "Extracting",
            on_enter: None,
            on_exit: None,
            on_update: manual_extraction_update,
        },
        StateDescriptor {
            id: BrewState::ExtractingOneCup,
            name: "ExtractingOneCup",
            on_enter: None,
            on_exit: None,
            on_update: one_cup_update,
        },
        StateDescriptor {
            id: BrewState::ExtractingTwoCups,
            name: "ExtractingTwoCups",
            on_enter: None,
            on_exit: None,
            on_update: two_cups_update,
        },
    ]
}

fn stay(_ctx: &mut FsmContext) -> Option<Transition> {
    None
}

fn refresh_regulator(ctx: &mut FsmContext) {
    ctx.commands.refresh_regulator = true;
}

// ═══════════════════════════════════════════════════════════════════════════
//  HEATING: preheat until the system timer passes the preheat duration
// ═══════════════════════════════════════════════════════════════════════════

fn heating_update(ctx: &mut FsmContext) -> Option<Transition> {
    if let Some(t) = detect_manual_extraction(ctx) {
        return Some(t);
    }

    let preheat = ctx.config.preheat_duration();
    if ctx.system_time() >= preheat {
        info!(
            "HEATING: preheat complete after {:.0}s",
            ctx.system_time().as_secs_f64()
        );
        ctx.timers.idle.reset(ctx.now);
        ctx.timers.idle.start(ctx.now);
        return Some(Transition::Switch(BrewState::Active));
    }

    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  Manual extraction: flow seen without a cup command
// ═══════════════════════════════════════════════════════════════════════════

fn detect_manual_extraction(ctx: &mut FsmContext) -> Option<Transition> {
    let debounce = ctx.config.manual_debounce();
    if ctx.sensors.flow_state == FlowState::Flowing && ctx.idle_time() >= debounce {
        info!(
            "Manual extraction detected after {:.1}s idle",
            ctx.idle_time().as_secs_f64()
        );
        ctx.timers.extraction.reset(ctx.now);
        ctx.timers.extraction.start(ctx.now);
        ctx.commands.shot_log = Some(ShotLogAction::Open);
        return Some(Transition::Enter(BrewState::Extracting));
    }
    None
}

fn manual_extraction_update(ctx: &mut FsmContext) -> Option<Transition> {
    if ctx.sensors.flow_state == FlowState::Flowing {
        return None;
    }
    ctx.finish_extraction();
    info!(
        "Manual extraction finished: {:.1}s, {:.1} mL",
        ctx.extraction_time().as_secs_f64(),
        ctx.sensors.flow_volume_ml
    );
    Some(Transition::Resume)
}

// ═══════════════════════════════════════════════════════════════════════════
//  Automatic extraction: pump runs until the cup volume is reached
// ═══════════════════════════════════════════════════════════════════════════

fn one_cup_update(ctx: &mut FsmContext) -> Option<Transition> {
    cup_extraction_update(ctx, CupSize::One)
}

fn two_cups_update(ctx: &mut FsmContext) -> Option<Transition> {
    cup_extraction_update(ctx, CupSize::Two)
}

fn cup_extraction_update(ctx: &mut FsmContext, cup: CupSize) -> Option<Transition> {
    let state = cup.state();
    let target_ml = cup.target_ml(&ctx.config);
    let offset = ctx.flow_offset_ml(state);

    // Time the shot from when liquid reaches the group, not from pump start.
    if ctx.sensors.flow_volume_ml >= offset
        && ctx.sensors.pump_on
        && !ctx.timers.extraction.is_running()
    {
        ctx.timers.extraction.start(ctx.now);
    }

    if ctx.corrected_volume_ml(state) >= target_ml {
        ctx.commands.pump = Some(false);
        ctx.finish_extraction();
        info!(
            "{}: {:.1} mL in {:.1}s",
            state,
            ctx.corrected_volume_ml(state),
            ctx.extraction_time().as_secs_f64()
        );
        return Some(Transition::Resume);
    }

    None
}
