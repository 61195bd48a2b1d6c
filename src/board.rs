//! Board integration points
//!
//! The driver does not own GPIO, clocks, the interrupt controller or the
//! scheduler. The firmware provides them through the traits in this module.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::time::{Monotonic, Timeout};

/// Pins used by the SD slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdPin {
    /// Card detect switch (low = card present)
    Detect,
    /// Card power switch control
    PowerSwitch,
    /// Data line 0
    D0,
    /// Data line 1
    D1,
    /// Data line 2
    D2,
    /// Data line 3
    D3,
    /// Card clock
    Ck,
    /// Command line
    Cmd,
}

impl SdPin {
    /// The six pins routed to the SDMMC peripheral
    pub const BUS: [SdPin; 6] = [
        SdPin::D0,
        SdPin::D1,
        SdPin::D2,
        SdPin::D3,
        SdPin::Ck,
        SdPin::Cmd,
    ];
}

/// Pin configuration requested by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// Push-pull output, driven low
    Output,
    /// Input raising an interrupt on both edges
    InterruptRiseFall,
    /// SDMMC alternate function, very high speed
    AltFunction,
    /// Analog (lowest leakage, disconnected)
    Analog,
}

/// Something that services the SDMMC interrupt line
pub trait IrqHandler {
    /// Called from interrupt context
    fn on_interrupt(&self);
}

/// Board services consumed by the SD driver
pub trait Board {
    /// Configure one of the slot pins
    fn configure_pin(&mut self, pin: SdPin, mode: PinMode);

    /// Switch card power (true = powered)
    fn set_card_power(&mut self, on: bool);

    /// Raw state of the card detect switch
    fn card_detected(&self) -> bool;

    /// Install or remove the card detect edge callback
    fn set_detect_callback(&mut self, callback: Option<&'static (dyn Fn() + Sync)>);

    /// Select the peripheral kernel clock and enable its bus clock
    fn enable_bus(&mut self);

    /// Reset the peripheral and disable its bus clock
    fn disable_bus(&mut self);

    /// SDMMC kernel clock frequency in Hz
    fn kernel_clock_hz(&self) -> u32;

    /// Route the SDMMC interrupt to `handler`, or detach it
    fn set_isr(&mut self, handler: Option<&'static dyn IrqHandler>);

    /// Busy or sleeping wait
    fn delay_ms(&mut self, ms: u32);

    /// Short busy wait
    fn delay_us(&mut self, us: u32);
}

/// Returned when [`EventFlag::wait`] runs out of time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeout;

/// A set of event bits shared between a waiter and an interrupt handler
pub trait EventFlag {
    /// Wait until any bit of `mask` is set
    ///
    /// The bits that matched are cleared and returned.
    fn wait(&self, mask: u32, timeout_ms: u32) -> Result<u32, WaitTimeout>;

    /// Set bits (safe from interrupt context)
    fn set(&self, mask: u32);

    /// Clear bits
    fn clear(&self, mask: u32);
}

/// Spinning [`EventFlag`] over an atomic word
pub struct AtomicEventFlag<T> {
    bits: AtomicU32,
    timer: T,
}

impl<T: Monotonic> AtomicEventFlag<T> {
    pub const fn new(timer: T) -> Self {
        Self {
            bits: AtomicU32::new(0),
            timer,
        }
    }
}

impl<T: Monotonic> EventFlag for AtomicEventFlag<T> {
    fn wait(&self, mask: u32, timeout_ms: u32) -> Result<u32, WaitTimeout> {
        let timeout = Timeout::from_ms(&self.timer, timeout_ms);
        loop {
            let hit = self.bits.load(Ordering::Acquire) & mask;
            if hit != 0 {
                self.bits.fetch_and(!hit, Ordering::AcqRel);
                return Ok(hit);
            }
            if timeout.is_expired() {
                return Err(WaitTimeout);
            }
            core::hint::spin_loop();
        }
    }

    fn set(&self, mask: u32) {
        self.bits.fetch_or(mask, Ordering::Release);
    }

    fn clear(&self, mask: u32) {
        self.bits.fetch_and(!mask, Ordering::Release);
    }
}
