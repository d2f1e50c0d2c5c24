#![no_main]

use std::sync::Arc;

use gaggia::adapters::time::ManualClock;
use gaggia::app::commands::CupSize;
use gaggia::app::events::AppEvent;
use gaggia::app::ports::{EventSink, PumpPort};
use gaggia::app::service::BrewService;
use gaggia::config::SystemConfig;
use gaggia::error::GpioError;
use gaggia::fsm::context::SensorSnapshot;
use gaggia::sensors::flow::FlowState;
use libfuzzer_sys::fuzz_target;

#[derive(Default)]
struct Pump(bool);

impl PumpPort for Pump {
    fn set_power(&mut self, on: bool) -> Result<(), GpioError> {
        self.0 = on;
        Ok(())
    }
    fn power(&self) -> bool {
        self.0
    }
}

struct Discard;

impl EventSink for Discard {
    fn emit(&mut self, _event: &AppEvent) {}
}

fuzz_target!(|data: &[u8]| {
    let Ok(config) = serde_json::from_slice::<SystemConfig>(data) else {
        return;
    };
    if config.validate().is_err() {
        return;
    }
    assert!(config.control_tick_ms > 0);
    assert!(config.tank_empty_m > config.tank_full_m);

    // Any accepted config must drive the service without panicking.
    let clock = Arc::new(ManualClock::new());
    let preheat = config.preheat_duration_secs;
    let mut svc = BrewService::new(config, Box::new(Pump::default()), clock.clone());
    let mut sink = Discard;
    svc.start(&mut sink);
    svc.tick(SensorSnapshot::default(), &mut sink);

    clock.advance_secs(preheat + 1.0);
    svc.tick(SensorSnapshot::default(), &mut sink);
    svc.extract(CupSize::One, &mut sink);
    for raw_ml in [0.0, 10.0, 100.0] {
        clock.advance_ms(500);
        svc.tick(
            SensorSnapshot {
                flow_state: FlowState::Flowing,
                flow_volume_ml: raw_ml,
                ..SensorSnapshot::default()
            },
            &mut sink,
        );
    }
    let _ = svc.heating_rest_time();
    let _ = svc.telemetry().to_csv();
});
