//! BrewController end to end on the simulated GPIO: real worker threads,
//! real sensor decoders, wall-clock time.

use std::sync::Arc;
use std::time::Duration;

use gaggia::adapters::log_sink::LogEventSink;
use gaggia::adapters::time::SystemClock;
use gaggia::app::controller::BrewController;
use gaggia::app::events::AppEvent;
use gaggia::app::ports::Level;
use gaggia::config::SystemConfig;
use gaggia::fsm::BrewState;

use crate::mock_hw::{RecordingSink, TsicFeeder, fast_config, machine_gpio, wait_for};

const SETTLE: Duration = Duration::from_secs(3);

struct Machine {
    controller: BrewController,
    gpio: Arc<gaggia::adapters::sim::SimGpio>,
    sink: RecordingSink,
    config: SystemConfig,
    _feeder: TsicFeeder,
}

fn boot(config: SystemConfig) -> Machine {
    let gpio = machine_gpio(&config);
    let feeder = TsicFeeder::start(Arc::clone(&gpio), &config, 92.0);
    let sink = RecordingSink::default();
    let controller = BrewController::open(
        config.clone(),
        gpio.clone(),
        Arc::new(SystemClock::new()),
        Box::new(sink.clone()),
    )
    .expect("controller opens");
    Machine {
        controller,
        gpio,
        sink,
        config,
        _feeder: feeder,
    }
}

fn boot_active() -> Machine {
    let m = boot(fast_config());
    assert!(wait_for(SETTLE, || m.controller.state() == BrewState::Active));
    m
}

#[test]
fn open_fails_without_temperature_feed() {
    let config = SystemConfig {
        tsic_startup_attempts: 3,
        ..fast_config()
    };
    let gpio = machine_gpio(&config);
    let err = BrewController::open(
        config.clone(),
        gpio.clone(),
        Arc::new(SystemClock::new()),
        Box::new(LogEventSink::new()),
    )
    .err()
    .expect("no TSIC packets");
    assert!(format!("{err:#}").contains("temperature sensor"));
    assert!(!gpio.has_subscriber(config.pins.tsic));
}

#[test]
fn failed_open_releases_earlier_components() {
    let config = fast_config();
    let gpio = machine_gpio(&config);
    gpio.break_pin(config.pins.flow);
    let _feeder = TsicFeeder::start(Arc::clone(&gpio), &config, 92.0);

    let err = BrewController::open(
        config.clone(),
        gpio.clone(),
        Arc::new(SystemClock::new()),
        Box::new(RecordingSink::default()),
    )
    .err()
    .expect("flow pin is broken");
    assert!(format!("{err:#}").contains("flow meter"));

    assert!(!gpio.has_subscriber(config.pins.tsic));
    assert!(!gpio.has_subscriber(config.pins.ranger_echo));
    assert_eq!(gpio.level(config.pins.pump), Some(Level::Low));
    assert_eq!(gpio.pwm(config.pins.boiler).map(|(duty, _)| duty), Some(0.0));
}

#[test]
fn boots_through_preheat_into_active() {
    let m = boot(fast_config());
    assert!(m.controller.is_ready());
    assert!(m.controller.power_enabled());

    assert!(wait_for(SETTLE, || m.controller.state() == BrewState::Active));
    assert!(m.sink.saw_transition(BrewState::Heating, BrewState::Active));
    assert_eq!(m.sink.events().first(), Some(&AppEvent::Started(BrewState::Heating)));
    assert!(wait_for(SETTLE, || m.controller.boiler_target_temperature() == 93.0));
    assert_eq!(m.controller.heating_rest_time(), Duration::ZERO);

    let t = m.controller.boiler_temperature();
    assert!(t.valid);
    assert!((t.celsius - 92.0).abs() < 0.2, "got {}", t.celsius);
}

#[test]
fn reports_tank_level_from_ranger() {
    let m = boot(fast_config());
    assert!(
        wait_for(SETTLE, || (0.4..0.6).contains(&m.controller.water_tank_level())),
        "level {}",
        m.controller.water_tank_level()
    );
}

#[test]
fn boiler_is_driven_while_below_target() {
    let m = boot_active();
    let boiler = m.config.pins.boiler;
    // 92 °C against a 93 °C target: proportional term alone is positive.
    assert!(wait_for(SETTLE, || {
        m.gpio.pwm(boiler).is_some_and(|(duty, _)| duty > 0.0)
    }));
    let (_, hz) = m.gpio.pwm(boiler).unwrap_or_default();
    assert_eq!(hz, m.config.boiler_pwm_hz);
}

#[test]
fn power_off_cuts_the_boiler() {
    let m = boot_active();
    m.controller.power(false);
    assert_eq!(m.controller.state(), BrewState::Deactivated);
    assert!(!m.controller.power_enabled());

    let boiler = m.config.pins.boiler;
    assert!(wait_for(SETTLE, || {
        m.gpio.pwm(boiler).is_some_and(|(duty, _)| duty == 0.0)
    }));
}

#[test]
fn steam_mode_retargets_regulator() {
    let m = boot_active();
    m.controller.set_steam_mode(true);
    assert!(m.controller.steam_mode());
    assert_eq!(m.controller.boiler_target_temperature(), 125.0);

    m.controller.extract_one_cup();
    assert_eq!(m.controller.state(), BrewState::Steam);
    assert!(!m.controller.pump_on());

    m.controller.set_steam_mode(false);
    assert_eq!(m.controller.state(), BrewState::Active);
    assert_eq!(m.controller.boiler_target_temperature(), 93.0);
}

#[test]
fn one_cup_runs_pump_until_volume_reached() {
    let m = boot_active();
    let pump = m.config.pins.pump;
    let flow = m.config.pins.flow;

    m.controller.extract_one_cup();
    assert_eq!(m.controller.state(), BrewState::ExtractingOneCup);
    assert!(m.controller.pump_on());
    assert_eq!(m.gpio.level(pump), Some(Level::High));

    let mut pulses = 0;
    while m.controller.pump_on() && pulses < 1_000 {
        m.gpio.pulse_train(flow, 1, 1_000);
        pulses += 1;
        std::thread::sleep(Duration::from_millis(2));
    }

    assert!(wait_for(SETTLE, || m.controller.state() == BrewState::Active));
    assert!(!m.controller.pump_on());
    assert_eq!(m.gpio.level(pump), Some(Level::Low));
    assert!(m.controller.extraction_time() > Duration::ZERO);
    assert!(m.sink.saw_transition(BrewState::ExtractingOneCup, BrewState::Active));
    assert_eq!(m.sink.shots_completed(), 1);
}

#[test]
fn drop_leaves_machine_safe() {
    let m = boot_active();
    m.controller.extract_one_cup();
    assert_eq!(m.gpio.level(m.config.pins.pump), Some(Level::High));

    let Machine {
        controller,
        gpio,
        config,
        ..
    } = m;
    drop(controller);

    assert_eq!(gpio.level(config.pins.pump), Some(Level::Low));
    assert_eq!(gpio.pwm(config.pins.boiler).map(|(duty, _)| duty), Some(0.0));
    for pin in [config.pins.tsic, config.pins.flow, config.pins.ranger_echo] {
        assert!(!gpio.has_subscriber(pin), "pin {pin} still subscribed");
    }
}
