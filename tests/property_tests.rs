//! Property tests across the brew service, sensor decoding and tank
//! calibration.

use std::sync::{Arc, Mutex};

use gaggia::adapters::sim::tsic_packet_edges;
use gaggia::adapters::time::ManualClock;
use gaggia::app::commands::{BrewCommand, CupSize};
use gaggia::app::events::AppEvent;
use gaggia::app::ports::{EventSink, PumpPort};
use gaggia::app::service::BrewService;
use gaggia::config::SystemConfig;
use gaggia::error::GpioError;
use gaggia::fsm::BrewState;
use gaggia::fsm::context::SensorSnapshot;
use gaggia::sensors::flow::FlowState;
use gaggia::sensors::ranger::{RangeSample, tank_level};
use gaggia::sensors::tsic::{FrameDecoder, decode_packet};
use proptest::prelude::*;

#[derive(Clone, Default)]
struct Pump(Arc<Mutex<bool>>);

impl PumpPort for Pump {
    fn set_power(&mut self, on: bool) -> Result<(), GpioError> {
        *self.0.lock().unwrap() = on;
        Ok(())
    }
    fn power(&self) -> bool {
        *self.0.lock().unwrap()
    }
}

struct Discard;

impl EventSink for Discard {
    fn emit(&mut self, _event: &AppEvent) {}
}

#[derive(Debug, Clone)]
enum Op {
    Tick { ms: u64, flowing: bool, raw_ml: f64 },
    Command(BrewCommand),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (1u64..2_000, any::<bool>(), 0.0f64..80.0)
            .prop_map(|(ms, flowing, raw_ml)| Op::Tick { ms, flowing, raw_ml }),
        1 => any::<bool>().prop_map(|on| Op::Command(BrewCommand::Power(on))),
        1 => prop_oneof![Just(CupSize::One), Just(CupSize::Two)]
            .prop_map(|cup| Op::Command(BrewCommand::Extract(cup))),
        1 => any::<bool>().prop_map(|on| Op::Command(BrewCommand::SetSteamMode(on))),
    ]
}

proptest! {
    /// Whatever arrives, the pump only runs during a cup extraction and
    /// the shot clock only runs while extracting.
    #[test]
    fn service_invariants_hold_for_any_sequence(
        ops in proptest::collection::vec(op(), 1..120),
        preheated in any::<bool>(),
    ) {
        let clock = Arc::new(ManualClock::new());
        let pump = Pump::default();
        let mut svc = BrewService::new(SystemConfig::default(), Box::new(pump.clone()), clock.clone());
        let mut sink = Discard;
        svc.start(&mut sink);
        if preheated {
            clock.advance_secs(601.0);
        }

        for op in ops {
            let before = svc.state();
            match op {
                Op::Tick { ms, flowing, raw_ml } => {
                    clock.advance_ms(ms);
                    let snapshot = SensorSnapshot {
                        temperature_c: 93.0,
                        flow_state: if flowing { FlowState::Flowing } else { FlowState::Stopped },
                        flow_volume_ml: raw_ml,
                        ..SensorSnapshot::default()
                    };
                    svc.tick(snapshot, &mut sink);
                }
                Op::Command(cmd) => {
                    svc.handle_command(cmd, &mut sink);
                    if matches!(cmd, BrewCommand::Extract(_))
                        && (before.is_extracting() || before == BrewState::Steam)
                    {
                        prop_assert_eq!(svc.state(), before, "guarded extract changed state");
                    }
                }
            }

            let state = svc.state();
            if pump.power() {
                prop_assert!(
                    matches!(state, BrewState::ExtractingOneCup | BrewState::ExtractingTwoCups),
                    "pump on in {}", state
                );
            }
            if svc.extraction_running() {
                prop_assert!(state.is_extracting(), "shot clock running in {}", state);
            }
            prop_assert!(svc.extraction_volume() >= 0.0);
            prop_assert!(state != BrewState::Invalid);
        }
    }

    /// A synthesised packet decodes to within one raw step of its input.
    #[test]
    fn tsic_packets_decode_to_input(celsius in -50.0f64..150.0, start in any::<u32>()) {
        let mut decoder = FrameDecoder::new();
        let mut word = None;
        for (level, tick) in tsic_packet_edges(celsius, -50.0, 150.0, start) {
            if let Some(w) = decoder.on_edge(level, tick) {
                word = Some(w);
            }
        }
        let word = word.expect("complete packet");
        let decoded = decode_packet(word, -50.0, 150.0).expect("valid packet");
        prop_assert!((decoded - celsius).abs() <= 200.0 / 2047.0);
    }

    /// Tank level is a fraction whatever the ranger reports.
    #[test]
    fn tank_level_is_a_fraction(metres in -1.0f64..2.0, valid in any::<bool>()) {
        let level = tank_level(RangeSample { metres, valid }, 0.12, 0.018);
        prop_assert!((0.0..=1.0).contains(&level));
        if !valid {
            prop_assert_eq!(level, 0.0);
        }
    }
}
