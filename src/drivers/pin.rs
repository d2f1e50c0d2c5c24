//! embedded-hal views of single GPIO daemon pins.
//!
//! [`OutputLine`] and [`PwmLine`] adapt one pin of a [`GpioPort`] to the
//! `embedded-hal` 1.0 digital and PWM traits, so the actuator drivers
//! are written against the standard traits rather than the daemon.

use std::sync::Arc;

use embedded_hal::digital::{ErrorType as DigitalErrorType, OutputPin, StatefulOutputPin};
use embedded_hal::pwm::{ErrorType as PwmErrorType, SetDutyCycle};

use crate::app::ports::{GpioPort, Level};
use crate::error::GpioError;

/// PWM resolution of the boiler relay output.
pub const PWM_RANGE: u16 = 20_000;

// ---------------------------------------------------------------------------
// Digital output
// ---------------------------------------------------------------------------

pub struct OutputLine {
    gpio: Arc<dyn GpioPort>,
    pin: u8,
    high: bool,
}

impl OutputLine {
    pub fn new(gpio: Arc<dyn GpioPort>, pin: u8) -> Self {
        Self {
            gpio,
            pin,
            high: false,
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    fn write(&mut self, level: Level) -> Result<(), GpioError> {
        self.gpio.set_level(self.pin, level)?;
        self.high = level.is_high();
        Ok(())
    }
}

impl DigitalErrorType for OutputLine {
    type Error = GpioError;
}

impl OutputPin for OutputLine {
    fn set_low(&mut self) -> Result<(), GpioError> {
        self.write(Level::Low)
    }

    fn set_high(&mut self) -> Result<(), GpioError> {
        self.write(Level::High)
    }
}

impl StatefulOutputPin for OutputLine {
    fn is_set_high(&mut self) -> Result<bool, GpioError> {
        Ok(self.high)
    }

    fn is_set_low(&mut self) -> Result<bool, GpioError> {
        Ok(!self.high)
    }
}

// ---------------------------------------------------------------------------
// PWM output
// ---------------------------------------------------------------------------

pub struct PwmLine {
    gpio: Arc<dyn GpioPort>,
    pin: u8,
    frequency_hz: u32,
    duty: u16,
}

impl PwmLine {
    pub fn new(gpio: Arc<dyn GpioPort>, pin: u8, frequency_hz: u32) -> Self {
        Self {
            gpio,
            pin,
            frequency_hz,
            duty: 0,
        }
    }

    pub fn duty(&self) -> u16 {
        self.duty
    }
}

impl PwmErrorType for PwmLine {
    type Error = GpioError;
}

impl SetDutyCycle for PwmLine {
    fn max_duty_cycle(&self) -> u16 {
        PWM_RANGE
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), GpioError> {
        let duty = duty.min(PWM_RANGE);
        let fraction = f64::from(duty) / f64::from(PWM_RANGE);
        self.gpio.set_pwm(self.pin, fraction, self.frequency_hz)?;
        self.duty = duty;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim::SimGpio;

    #[test]
    fn output_line_tracks_level() {
        let gpio = Arc::new(SimGpio::new());
        let mut line = OutputLine::new(gpio.clone(), 23);
        line.set_high().unwrap();
        assert_eq!(gpio.level(23), Some(Level::High));
        assert!(line.is_set_high().unwrap());
        line.set_low().unwrap();
        assert!(line.is_set_low().unwrap());
    }

    #[test]
    fn failed_write_keeps_state() {
        let gpio = Arc::new(SimGpio::new());
        gpio.break_pin(23);
        let mut line = OutputLine::new(gpio, 23);
        assert!(line.set_high().is_err());
        assert!(line.is_set_low().unwrap());
    }

    #[test]
    fn pwm_line_scales_duty() {
        let gpio = Arc::new(SimGpio::new());
        let mut line = PwmLine::new(gpio.clone(), 24, 10);
        line.set_duty_cycle_fraction(1, 4).unwrap();
        assert_eq!(line.duty(), 5_000);
        assert_eq!(gpio.pwm(24), Some((0.25, 10)));
        line.set_duty_cycle_fully_on().unwrap();
        assert_eq!(gpio.pwm(24), Some((1.0, 10)));
    }
}
