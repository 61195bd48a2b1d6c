//! SDMMC host register access
//!
//! [`SdmmcHw`] is the narrow set of register operations the protocol layers
//! need. [`Sdmmc`] implements it over the memory-mapped peripheral.

use core::ptr::NonNull;

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

use super::regs::*;

/// Response expected for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// No response (CMD0)
    None,
    /// 48-bit response with CRC (R1, R1b, R6, R7)
    Short,
    /// 48-bit response without valid CRC (R3)
    ShortNoCrc,
    /// 136-bit response (R2)
    Long,
}

/// A command as handed to the command path state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Command index (0-63)
    pub index: u8,
    /// Command argument
    pub arg: u32,
    /// Expected response
    pub response: Response,
    /// Command starts a data transfer
    pub trans: bool,
    /// Command is a stop transmission
    pub stop: bool,
}

impl Command {
    /// A plain command with no data phase
    pub const fn new(index: u8, arg: u32, response: Response) -> Self {
        Self {
            index,
            arg,
            response,
            trans: false,
            stop: false,
        }
    }
}

/// Data transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Controller to card (write)
    ToCard,
    /// Card to controller (read)
    ToHost,
}

/// Data path state machine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataConfig {
    /// Data timeout in card bus clock cycles
    pub timeout: u32,
    /// Number of bytes to transfer
    pub length: u32,
    /// Block size as a power of two (DBLOCKSIZE encoding)
    pub block_size: u32,
    /// Transfer direction
    pub direction: Direction,
    /// Start the DPSM immediately instead of waiting for a CMDTRANS command
    pub enable: bool,
}

/// Bus width selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    /// SDMMC_D0 only
    One,
    /// SDMMC_D[3:0]
    Four,
}

/// Clock and bus configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Clock divider (SDMMC_CK = kernel / (2 * div), 0 = kernel clock)
    pub clock_div: u16,
    /// Bus width
    pub bus_width: BusWidth,
    /// Stop the card clock while the bus is idle
    pub power_save: bool,
}

impl BusConfig {
    /// Card clock resulting from this configuration
    pub fn card_clock_hz(&self, kernel_hz: u32) -> u32 {
        if self.clock_div == 0 {
            kernel_hz
        } else {
            kernel_hz / (2 * u32::from(self.clock_div))
        }
    }
}

/// Register-level operations on an SDMMC host
///
/// All methods take `&self`: the registers are shared between the caller and
/// the interrupt handler.
pub trait SdmmcHw {
    /// Program clock divider, bus width and power saving
    fn configure_bus(&self, config: BusConfig);

    /// Current clock and bus configuration
    fn bus_config(&self) -> BusConfig;

    /// Switch the controller power state (clock to card) on or off
    fn set_power(&self, on: bool);

    /// Whether the controller power state is on
    fn is_powered(&self) -> bool;

    /// Load argument and command registers, starting the CPSM
    fn send_command(&self, cmd: &Command);

    /// Response register `n` (0-3, RESP1-RESP4)
    fn response(&self, n: usize) -> u32;

    /// Command index of the last response
    fn response_command(&self) -> u8;

    /// Current status flags
    fn flags(&self) -> StatusFlags;

    /// Clear static status flags
    fn clear_flags(&self, flags: StatusFlags);

    /// Unmask interrupt sources
    fn enable_interrupts(&self, flags: StatusFlags);

    /// Mask interrupt sources
    fn disable_interrupts(&self, flags: StatusFlags);

    /// Program data timer, length and control registers
    fn configure_data(&self, config: &DataConfig);

    /// Reset data length and data control registers
    fn clear_data_control(&self);

    /// Flush the data FIFO
    fn reset_fifo(&self);

    /// Pop one word from the data FIFO
    fn read_fifo(&self) -> u32;

    /// Enable the IDMA in single buffer mode on `buffer`, or disable it
    fn set_idma(&self, buffer: Option<NonNull<u8>>);

    /// Set or clear CMDTRANS in the command register
    fn set_cmd_trans(&self, on: bool);

    /// Set or clear CMDSTOP in the command register
    fn set_cmd_stop(&self, on: bool);
}

impl<T: SdmmcHw + ?Sized> SdmmcHw for &T {
    fn configure_bus(&self, config: BusConfig) {
        (**self).configure_bus(config)
    }
    fn bus_config(&self) -> BusConfig {
        (**self).bus_config()
    }
    fn set_power(&self, on: bool) {
        (**self).set_power(on)
    }
    fn is_powered(&self) -> bool {
        (**self).is_powered()
    }
    fn send_command(&self, cmd: &Command) {
        (**self).send_command(cmd)
    }
    fn response(&self, n: usize) -> u32 {
        (**self).response(n)
    }
    fn response_command(&self) -> u8 {
        (**self).response_command()
    }
    fn flags(&self) -> StatusFlags {
        (**self).flags()
    }
    fn clear_flags(&self, flags: StatusFlags) {
        (**self).clear_flags(flags)
    }
    fn enable_interrupts(&self, flags: StatusFlags) {
        (**self).enable_interrupts(flags)
    }
    fn disable_interrupts(&self, flags: StatusFlags) {
        (**self).disable_interrupts(flags)
    }
    fn configure_data(&self, config: &DataConfig) {
        (**self).configure_data(config)
    }
    fn clear_data_control(&self) {
        (**self).clear_data_control()
    }
    fn reset_fifo(&self) {
        (**self).reset_fifo()
    }
    fn read_fifo(&self) -> u32 {
        (**self).read_fifo()
    }
    fn set_idma(&self, buffer: Option<NonNull<u8>>) {
        (**self).set_idma(buffer)
    }
    fn set_cmd_trans(&self, on: bool) {
        (**self).set_cmd_trans(on)
    }
    fn set_cmd_stop(&self, on: bool) {
        (**self).set_cmd_stop(on)
    }
}

/// Memory-mapped SDMMC host
pub struct Sdmmc {
    regs: NonNull<SdmmcRegisters>,
}

// Safety: the registers are only touched through volatile accesses. Callers
// serialize data-path programming through the transfer context, the interrupt
// handler only runs while a transfer it owns is in flight.
unsafe impl Send for Sdmmc {}
unsafe impl Sync for Sdmmc {}

impl Sdmmc {
    /// Create a host for the peripheral at `base`
    ///
    /// # Safety
    ///
    /// `base` must be the address of an SDMMC register block that stays
    /// mapped for the lifetime of the returned value, and nothing else may
    /// drive the peripheral concurrently.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            // Safety: caller guarantees a valid, non-null MMIO address
            regs: unsafe { NonNull::new_unchecked(base as *mut SdmmcRegisters) },
        }
    }

    #[inline]
    fn regs(&self) -> &SdmmcRegisters {
        // Safety: see `new`
        unsafe { self.regs.as_ref() }
    }
}

impl SdmmcHw for Sdmmc {
    fn configure_bus(&self, config: BusConfig) {
        let width = match config.bus_width {
            BusWidth::One => CLKCR::WIDBUS::Bus1,
            BusWidth::Four => CLKCR::WIDBUS::Bus4,
        };
        let pwrsav = if config.power_save {
            CLKCR::PWRSAV::SET
        } else {
            CLKCR::PWRSAV::CLEAR
        };
        self.regs().clkcr.modify(
            CLKCR::CLKDIV.val(u32::from(config.clock_div)) + width + pwrsav + CLKCR::NEGEDGE::CLEAR,
        );
    }

    fn bus_config(&self) -> BusConfig {
        let clkcr = &self.regs().clkcr;
        BusConfig {
            clock_div: clkcr.read(CLKCR::CLKDIV) as u16,
            bus_width: match clkcr.read_as_enum(CLKCR::WIDBUS) {
                Some(CLKCR::WIDBUS::Value::Bus4) => BusWidth::Four,
                _ => BusWidth::One,
            },
            power_save: clkcr.is_set(CLKCR::PWRSAV),
        }
    }

    fn set_power(&self, on: bool) {
        let state = if on {
            POWER::PWRCTRL::On
        } else {
            POWER::PWRCTRL::Reset
        };
        self.regs().power.modify(state);
    }

    fn is_powered(&self) -> bool {
        matches!(
            self.regs().power.read_as_enum(POWER::PWRCTRL),
            Some(POWER::PWRCTRL::Value::On)
        )
    }

    fn send_command(&self, cmd: &Command) {
        let regs = self.regs();
        regs.argr.set(cmd.arg);

        let waitresp = match cmd.response {
            Response::None => CMDR::WAITRESP::NoResponse,
            Response::Short => CMDR::WAITRESP::Short,
            Response::ShortNoCrc => CMDR::WAITRESP::ShortNoCrc,
            Response::Long => CMDR::WAITRESP::Long,
        };

        regs.cmdr.write(
            CMDR::CMDINDEX.val(u32::from(cmd.index))
                + waitresp
                + CMDR::CMDTRANS.val(u32::from(cmd.trans))
                + CMDR::CMDSTOP.val(u32::from(cmd.stop))
                + CMDR::CPSMEN::SET,
        );
    }

    fn response(&self, n: usize) -> u32 {
        self.regs().resp[n & 3].get()
    }

    fn response_command(&self) -> u8 {
        self.regs().respcmdr.read(RESPCMDR::RESPCMD) as u8
    }

    fn flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.regs().star.get())
    }

    fn clear_flags(&self, flags: StatusFlags) {
        self.regs().icr.set(flags.bits());
    }

    fn enable_interrupts(&self, flags: StatusFlags) {
        let maskr = &self.regs().maskr;
        maskr.set(maskr.get() | flags.bits());
    }

    fn disable_interrupts(&self, flags: StatusFlags) {
        let maskr = &self.regs().maskr;
        maskr.set(maskr.get() & !flags.bits());
    }

    fn configure_data(&self, config: &DataConfig) {
        let regs = self.regs();
        regs.dtimer.set(config.timeout);
        regs.dlenr.write(DLENR::DATALENGTH.val(config.length));

        let dir = match config.direction {
            Direction::ToCard => DCTRL::DTDIR::ToCard,
            Direction::ToHost => DCTRL::DTDIR::ToHost,
        };
        regs.dctrl.modify(
            DCTRL::DBLOCKSIZE.val(config.block_size)
                + dir
                + DCTRL::DTMODE::Block
                + DCTRL::DTEN.val(u32::from(config.enable)),
        );
    }

    fn clear_data_control(&self) {
        let regs = self.regs();
        regs.dlenr.set(0);
        regs.dctrl.set(0);
    }

    fn reset_fifo(&self) {
        self.regs().dctrl.modify(DCTRL::FIFORST::SET);
    }

    fn read_fifo(&self) -> u32 {
        self.regs().fifo[0].get()
    }

    fn set_idma(&self, buffer: Option<NonNull<u8>>) {
        let regs = self.regs();
        match buffer {
            Some(buf) => {
                regs.idmabaser.set(buf.as_ptr() as usize as u32);
                regs.idmactrlr
                    .write(IDMACTRLR::IDMAEN::SET + IDMACTRLR::IDMABMODE::CLEAR);
            }
            None => regs.idmactrlr.set(0),
        }
    }

    fn set_cmd_trans(&self, on: bool) {
        self.regs().cmdr.modify(CMDR::CMDTRANS.val(u32::from(on)));
    }

    fn set_cmd_stop(&self, on: bool) {
        self.regs().cmdr.modify(CMDR::CMDSTOP.val(u32::from(on)));
    }
}
