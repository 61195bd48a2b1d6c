//! SD card driver for the STM32 SDMMC host
//!
//! This module brings a card from "just inserted" to a ready block device and
//! moves 512-byte blocks with the internal DMA (IDMA). The interrupt-shared
//! part of the driver lives in [`SdmmcHost`], which the firmware places in a
//! static. [`SdCard`] borrows it and owns everything the caller context needs.

pub mod card;
pub mod cmd;
pub mod dma;
pub mod error;
pub mod hw;
pub mod init;
pub mod regs;

#[cfg(test)]
pub(crate) mod sim;

pub use card::{CardCapacity, CardInfo, CardState, SdVersion, SpeedClass, BLOCK_SIZE};
pub use dma::{TransferContext, TransferState};
pub use error::{SdError, TransferErrors};
pub use hw::{BusWidth, Sdmmc, SdmmcHw};
pub use init::{InitError, InitPhase};

use crate::board::{Board, EventFlag, PinMode, SdPin};
use crate::time::Monotonic;
use cmd::CommandDriver;
use dma::DmaEvent;
use init::Bringup;
use regs::StatusFlags;

/// Largest transfer the 25-bit data length register can describe
const MAX_TRANSFER_BLOCKS: u32 = ((1 << 25) - 1) / BLOCK_SIZE;

/// Driver tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdmmcConfig {
    /// Card clock divider once the card is identified (0 = kernel clock)
    pub clock_div: u16,
    /// Deadline for a single command response
    pub cmd_timeout_ms: u32,
    /// Deadline for polled register reads and the transfer-state wait during
    /// bring-up
    pub data_timeout_ms: u32,
    /// ACMD41 attempts before giving up on the card
    pub max_volt_trials: u32,
    /// Time for the card supply to settle after switching it on
    pub power_settle_ms: u32,
    /// Hardware data timeout in card clock cycles (DTIMER)
    pub data_timer: u32,
}

impl Default for SdmmcConfig {
    fn default() -> Self {
        Self {
            clock_div: 0,
            cmd_timeout_ms: 5000,
            data_timeout_ms: 1000,
            max_volt_trials: 0xFFFF,
            power_settle_ms: 2,
            data_timer: 0xFFFF_FFFF,
        }
    }
}

// ============================================================================
// Interrupt-shared host
// ============================================================================

/// Host registers, transfer context and completion event
///
/// Everything here is reachable from the interrupt handler, so it is only
/// ever used through `&self`.
pub struct SdmmcHost<H: SdmmcHw, E: EventFlag, T: Monotonic> {
    pub(crate) hw: H,
    pub(crate) event: E,
    pub(crate) timer: T,
    pub(crate) transfer: TransferContext,
}

impl<H: SdmmcHw, E: EventFlag, T: Monotonic> SdmmcHost<H, E, T> {
    pub const fn new(hw: H, event: E, timer: T) -> Self {
        Self {
            hw,
            event,
            timer,
            transfer: TransferContext::new(),
        }
    }

    /// State of the DMA transfer in flight, if any
    pub fn transfer(&self) -> &TransferContext {
        &self.transfer
    }

    pub(crate) fn commands(&self, timeout_ms: u32) -> CommandDriver<'_, H, T> {
        CommandDriver::new(&self.hw, &self.timer, timeout_ms)
    }
}

// ============================================================================
// Driver façade
// ============================================================================

/// Per-slot runtime state
#[derive(Default)]
pub struct RuntimeState {
    rca: u16,
    card_alive: bool,
    info: CardInfo,
    presence_callback: Option<&'static (dyn Fn() + Sync)>,
}

/// An SD card slot
pub struct SdCard<H, E, T, B>
where
    H: SdmmcHw + 'static,
    E: EventFlag + 'static,
    T: Monotonic + 'static,
    B: Board,
{
    host: &'static SdmmcHost<H, E, T>,
    board: B,
    config: SdmmcConfig,
    state: RuntimeState,
}

impl<H, E, T, B> SdCard<H, E, T, B>
where
    H: SdmmcHw + 'static,
    E: EventFlag + 'static,
    T: Monotonic + 'static,
    B: Board,
{
    pub fn new(host: &'static SdmmcHost<H, E, T>, board: B, config: SdmmcConfig) -> Self {
        Self {
            host,
            board,
            config,
            state: RuntimeState::default(),
        }
    }

    /// Configure the power switch and detect lines
    ///
    /// The card stays unpowered until [`SdCard::init_card`].
    pub fn init(&mut self) {
        self.board.set_card_power(false);
        self.board.configure_pin(SdPin::PowerSwitch, PinMode::Output);
        self.board
            .configure_pin(SdPin::Detect, PinMode::InterruptRiseFall);
        self.host
            .event
            .clear((DmaEvent::COMPLETE | DmaEvent::ERROR).bits());
        self.state.card_alive = false;

        log::info!("SDMMC: init OK");
    }

    /// Undo [`SdCard::init`]
    pub fn deinit(&mut self) {
        if self.state.presence_callback.is_some() {
            self.set_presence_callback(None);
        }
        self.board.set_card_power(false);
        self.board.configure_pin(SdPin::PowerSwitch, PinMode::Analog);
        self.board.configure_pin(SdPin::Detect, PinMode::Analog);
        self.state.card_alive = false;
    }

    /// Card detect switch closed
    pub fn is_present(&self) -> bool {
        self.board.card_detected()
    }

    /// Call `callback` on every card detect edge, or stop doing so
    pub fn set_presence_callback(&mut self, callback: Option<&'static (dyn Fn() + Sync)>) {
        self.state.presence_callback = callback;
        self.board.set_detect_callback(callback);
    }

    /// Power the card and run the bring-up sequence
    pub fn init_card(&mut self) -> Result<CardInfo, SdError> {
        self.state.card_alive = false;

        self.attach_bus();
        self.board.set_card_power(true);
        self.board.delay_ms(self.config.power_settle_ms);

        let host = self.host;
        let bringup = Bringup::new(&host.hw, &host.timer, &mut self.board, &self.config);
        let (rca, info) = bringup.run().map_err(|err| {
            log::error!("SDMMC: card init failed: {}", err);
            SdError::from(err)
        })?;

        log::info!(
            "SDMMC: {} {}.{} SN {:#010x} {:02}/{}: {} blocks, {:?} {:?} {:?}",
            info.product_name,
            info.product_revision_major,
            info.product_revision_minor,
            info.product_serial_number,
            info.manufacturing_month,
            info.manufacturing_year,
            info.logical_block_count,
            info.version,
            info.capacity,
            info.speed
        );

        self.state.rca = rca;
        self.state.info = info.clone();
        self.state.card_alive = true;
        Ok(info)
    }

    /// Cut card power and release the peripheral
    pub fn deinit_card(&mut self) {
        if self.state.card_alive {
            if let Err(err) = self.host.commands(self.config.cmd_timeout_ms).deselect_card() {
                log::debug!("SDMMC: deselect failed: {}", err);
            }
        }

        self.host.hw.set_power(false);
        self.board.set_card_power(false);
        self.detach_bus();

        log::info!("SDMMC: card deinit OK");
        self.state.card_alive = false;
    }

    /// Read `count` blocks starting at block `address`
    ///
    /// `buf` must hold `count * 512` bytes and be 4-byte aligned.
    pub fn read_blocks(
        &mut self,
        buf: &mut [u8],
        address: u32,
        count: u32,
        timeout_ms: u32,
    ) -> Result<(), SdError> {
        self.check_request(buf, address, count)?;
        let card_addr = self.card_address(address)?;

        self.prepare_transfer();
        let host = self.host;
        let result = host
            .begin_read(
                buf,
                card_addr,
                count,
                self.config.data_timer,
                self.config.cmd_timeout_ms,
            )
            .and_then(|transfer| transfer.wait(timeout_ms));
        self.finish_transfer(result, timeout_ms)
    }

    /// Write `count` blocks starting at block `address`
    ///
    /// `buf` must hold `count * 512` bytes and be 4-byte aligned.
    pub fn write_blocks(
        &mut self,
        buf: &[u8],
        address: u32,
        count: u32,
        timeout_ms: u32,
    ) -> Result<(), SdError> {
        self.check_request(buf, address, count)?;
        let card_addr = self.card_address(address)?;

        self.prepare_transfer();
        let host = self.host;
        let result = host
            .begin_write(
                buf,
                card_addr,
                count,
                self.config.data_timer,
                self.config.cmd_timeout_ms,
            )
            .and_then(|transfer| transfer.wait(timeout_ms));
        self.finish_transfer(result, timeout_ms)
    }

    /// Summary of the last initialized card
    pub fn get_card_info(&self) -> CardInfo {
        self.state.info.clone()
    }

    /// Whether block I/O may proceed
    pub fn is_alive(&self) -> bool {
        self.state.card_alive
    }

    pub fn rca(&self) -> u16 {
        self.state.rca
    }

    pub fn config(&self) -> &SdmmcConfig {
        &self.config
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn attach_bus(&mut self) {
        for pin in SdPin::BUS {
            self.board.configure_pin(pin, PinMode::AltFunction);
        }
        self.board.enable_bus();
    }

    fn detach_bus(&mut self) {
        self.board.disable_bus();
        for pin in SdPin::BUS {
            self.board.configure_pin(pin, PinMode::Analog);
        }
    }

    /// Validate a block request without touching the hardware
    fn check_request(&self, buf: &[u8], address: u32, count: u32) -> Result<(), SdError> {
        let end = u64::from(address) + u64::from(count);
        if end > u64::from(self.state.info.logical_block_count) {
            log::error!("SDMMC: address out of range");
            return Err(SdError::AddressOutOfRange);
        }

        let needed = count as usize * BLOCK_SIZE as usize;
        if count == 0
            || count > MAX_TRANSFER_BLOCKS
            || buf.len() < needed
            || buf.as_ptr() as usize % 4 != 0
        {
            log::error!("SDMMC: bad buffer for {} block(s)", count);
            return Err(SdError::InvalidParameter);
        }

        if !self.state.card_alive {
            log::error!("SDMMC: card not initialized");
            return Err(SdError::RequestNotApplicable);
        }
        Ok(())
    }

    /// Block number to card address (bytes for SDSC)
    fn card_address(&self, address: u32) -> Result<u32, SdError> {
        match self.state.info.capacity {
            CardCapacity::HighExtended => Ok(address),
            CardCapacity::Standard => address
                .checked_mul(BLOCK_SIZE)
                .ok_or(SdError::AddressOutOfRange),
        }
    }

    fn prepare_transfer(&mut self) {
        let host = self.host;
        host.hw.disable_interrupts(StatusFlags::DATA_IRQS);
        host.hw.clear_flags(StatusFlags::STATIC);
        host.event
            .clear((DmaEvent::COMPLETE | DmaEvent::ERROR).bits());
        host.transfer.reset_errors();
        self.board.set_isr(Some(host));
    }

    fn finish_transfer(
        &mut self,
        result: Result<(), SdError>,
        timeout_ms: u32,
    ) -> Result<(), SdError> {
        self.board.set_isr(None);
        let host = self.host;

        let result = result.and_then(|()| {
            let cmd = host.commands(self.config.cmd_timeout_ms);
            init::wait_transfer_state(&cmd, self.state.rca, &host.timer, timeout_ms).inspect_err(
                |err| log::error!("SDMMC: card did not return to transfer state: {}", err),
            )
        });

        if let Err(err) = result {
            log::error!("SDMMC: block transfer failed: {}", err);
            host.hw.disable_interrupts(StatusFlags::DATA_IRQS);
            self.state.card_alive = false;
        }
        result
    }
}
