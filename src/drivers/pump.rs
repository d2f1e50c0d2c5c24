//! Vibration pump relay driver.
//!
//! On/off control through any `embedded-hal` output pin.
//!
//! ## Safety contract
//!
//! Only the brew core writes the pump.  The relay is driven low when the
//! driver is opened and again when it is dropped, so a torn-down
//! controller never leaves the pump running.

use embedded_hal::digital::OutputPin;
use log::{info, warn};

use crate::app::ports::PumpPort;
use crate::error::{GpioError, Result};

pub struct PumpDriver<P: OutputPin<Error = GpioError>> {
    pin: P,
    on: bool,
}

impl<P: OutputPin<Error = GpioError>> PumpDriver<P> {
    /// Take the relay pin and force the pump off.
    pub fn open(mut pin: P) -> Result<Self> {
        pin.set_low()?;
        info!("Pump ready");
        Ok(Self { pin, on: false })
    }

    pub fn is_running(&self) -> bool {
        self.on
    }
}

impl<P: OutputPin<Error = GpioError> + Send> PumpPort for PumpDriver<P> {
    fn set_power(&mut self, on: bool) -> core::result::Result<(), GpioError> {
        if on {
            self.pin.set_high()?;
        } else {
            self.pin.set_low()?;
        }
        if self.on != on {
            info!("Pump {}", if on { "on" } else { "off" });
        }
        self.on = on;
        Ok(())
    }

    fn power(&self) -> bool {
        self.on
    }
}

impl<P: OutputPin<Error = GpioError>> Drop for PumpDriver<P> {
    fn drop(&mut self) {
        if let Err(e) = self.pin.set_low() {
            warn!("Pump: failed to switch off on shutdown: {}", e);
        }
    }
}
