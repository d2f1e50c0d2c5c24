//! Boiler heater driver (solid-state relay on a slow PWM line).

use embedded_hal::pwm::SetDutyCycle;
use log::{info, warn};

use crate::app::ports::PowerOutput;
use crate::error::{GpioError, Result};

pub struct BoilerDriver<P: SetDutyCycle<Error = GpioError>> {
    pwm: P,
    power: f64,
}

impl<P: SetDutyCycle<Error = GpioError>> BoilerDriver<P> {
    /// Take the PWM line and start with the heater off.
    pub fn open(mut pwm: P) -> Result<Self> {
        pwm.set_duty_cycle_fully_off()?;
        info!("Boiler ready ({} duty steps)", pwm.max_duty_cycle());
        Ok(Self { pwm, power: 0.0 })
    }

    /// Last power fraction written.
    pub fn power(&self) -> f64 {
        self.power
    }
}

impl<P: SetDutyCycle<Error = GpioError> + Send> PowerOutput for BoilerDriver<P> {
    fn set_power(&mut self, fraction: f64) -> core::result::Result<(), GpioError> {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let max = self.pwm.max_duty_cycle();
        let duty = (fraction * f64::from(max)).round() as u16;
        self.pwm.set_duty_cycle(duty.min(max))?;
        self.power = fraction;
        Ok(())
    }
}

impl<P: SetDutyCycle<Error = GpioError>> Drop for BoilerDriver<P> {
    fn drop(&mut self) {
        if let Err(e) = self.pwm.set_duty_cycle_fully_off() {
            warn!("Boiler: failed to switch off on shutdown: {}", e);
        }
    }
}
