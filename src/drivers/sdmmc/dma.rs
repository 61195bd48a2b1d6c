//! Interrupt-driven IDMA block transfers
//!
//! A transfer is started from the caller's context, which then sleeps on the
//! host's event flag. The interrupt handler finishes the data phase (sending
//! STOP_TRANSMISSION for multi-block transfers) and signals completion or
//! error through that flag.

use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};

use bitflags::bitflags;

use super::SdmmcHost;
use super::card::BLOCK_SIZE;
use super::error::{SdError, TransferErrors};
use super::hw::{DataConfig, Direction, SdmmcHw};
use super::regs::*;
use crate::board::{EventFlag, IrqHandler, WaitTimeout};
use crate::time::Monotonic;

/// Timeout for the STOP_TRANSMISSION sent from interrupt context
const STOP_TRANSFER_TIMEOUT_MS: u32 = 100;

bitflags! {
    /// Kind of the transfer currently owned by the interrupt handler
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransferState: u8 {
        /// A DMA transfer is in flight
        const ENABLED = 1 << 0;
        /// Single block read
        const RX_SINGLE = 1 << 1;
        /// Multiple block read
        const RX_MULTI = 1 << 2;
        /// Single block write
        const TX_SINGLE = 1 << 3;
        /// Multiple block write
        const TX_MULTI = 1 << 4;
    }
}

impl TransferState {
    /// Transfers that must be ended with CMD12
    pub const MULTI: Self = Self::RX_MULTI.union(Self::TX_MULTI);
}

bitflags! {
    /// Bits signalled on the host event flag
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaEvent: u32 {
        const COMPLETE = 1 << 0;
        const ERROR = 1 << 1;
    }
}

/// State shared between the caller and the interrupt handler
pub struct TransferContext {
    state: AtomicU8,
    errors: AtomicU32,
    length: AtomicUsize,
}

impl TransferContext {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            errors: AtomicU32::new(0),
            length: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> TransferState {
        TransferState::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TransferState) {
        self.state.store(state.bits(), Ordering::Release);
    }

    /// Errors accumulated since the last reset
    pub fn errors(&self) -> TransferErrors {
        TransferErrors::from_bits_truncate(self.errors.load(Ordering::Acquire))
    }

    fn add_errors(&self, errors: TransferErrors) {
        self.errors.fetch_or(errors.bits(), Ordering::AcqRel);
    }

    /// Clear the error accumulator
    pub fn reset_errors(&self) {
        self.errors.store(0, Ordering::Release);
    }

    /// Bytes programmed for the transfer in flight
    pub fn length(&self) -> usize {
        self.length.load(Ordering::Relaxed)
    }
}

impl Default for TransferContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-flight DMA transfer borrowing its buffer
///
/// Dropping it without [`Transfer::wait`] aborts the transfer.
#[must_use = "a transfer is aborted when dropped"]
pub(crate) struct Transfer<'buf, H: SdmmcHw, E: EventFlag, T: Monotonic> {
    host: &'buf SdmmcHost<H, E, T>,
    finished: bool,
    _buffer: PhantomData<&'buf [u8]>,
}

impl<H: SdmmcHw, E: EventFlag, T: Monotonic> Transfer<'_, H, E, T> {
    /// Sleep until the interrupt handler reports the outcome
    pub fn wait(mut self, timeout_ms: u32) -> Result<(), SdError> {
        let host = self.host;
        let mask = (DmaEvent::COMPLETE | DmaEvent::ERROR).bits();
        let result = match host.event.wait(mask, timeout_ms) {
            Err(WaitTimeout) => {
                log::error!("SDMMC: DMA transfer timed out");
                host.abort_transfer();
                Err(SdError::Timeout)
            }
            Ok(bits) if DmaEvent::from_bits_truncate(bits).contains(DmaEvent::ERROR) => {
                let errors = host.transfer.errors();
                log::error!("SDMMC: DMA transfer failed: {:?}", errors);
                Err(errors.to_error().unwrap_or(SdError::GeneralUnknown))
            }
            Ok(_) => Ok(()),
        };
        self.finished = true;
        result
    }
}

impl<H: SdmmcHw, E: EventFlag, T: Monotonic> Drop for Transfer<'_, H, E, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.host.abort_transfer();
        }
    }
}

impl<H: SdmmcHw, E: EventFlag, T: Monotonic> SdmmcHost<H, E, T> {
    /// Start reading `count` blocks at `card_addr` into `buf`
    ///
    /// `card_addr` is already in the card's addressing unit (bytes for SDSC,
    /// blocks otherwise). Only reachable through `&mut SdCard`: a leaked
    /// [`Transfer`] would leave the IDMA armed on a released buffer.
    pub(crate) fn begin_read<'buf>(
        &'buf self,
        buf: &'buf mut [u8],
        card_addr: u32,
        count: u32,
        data_timer: u32,
        cmd_timeout_ms: u32,
    ) -> Result<Transfer<'buf, H, E, T>, SdError> {
        let kind = if count > 1 {
            TransferState::RX_MULTI
        } else {
            TransferState::RX_SINGLE
        };
        self.begin(
            NonNull::from(buf).cast(),
            Direction::ToHost,
            kind,
            card_addr,
            count,
            data_timer,
            cmd_timeout_ms,
        )
    }

    /// Start writing `count` blocks from `buf` at `card_addr`
    pub(crate) fn begin_write<'buf>(
        &'buf self,
        buf: &'buf [u8],
        card_addr: u32,
        count: u32,
        data_timer: u32,
        cmd_timeout_ms: u32,
    ) -> Result<Transfer<'buf, H, E, T>, SdError> {
        let kind = if count > 1 {
            TransferState::TX_MULTI
        } else {
            TransferState::TX_SINGLE
        };
        // The IDMA only reads from the buffer for writes
        self.begin(
            NonNull::from(buf).cast(),
            Direction::ToCard,
            kind,
            card_addr,
            count,
            data_timer,
            cmd_timeout_ms,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn begin<'buf>(
        &'buf self,
        buffer: NonNull<u8>,
        direction: Direction,
        kind: TransferState,
        card_addr: u32,
        count: u32,
        data_timer: u32,
        cmd_timeout_ms: u32,
    ) -> Result<Transfer<'buf, H, E, T>, SdError> {
        if self.transfer.state().contains(TransferState::ENABLED) {
            log::error!("SDMMC: transfer already in flight");
            return Err(SdError::RequestNotApplicable);
        }

        let hw = &self.hw;
        let length = count * BLOCK_SIZE;

        hw.clear_data_control();
        hw.configure_data(&DataConfig {
            timeout: data_timer,
            length,
            block_size: DBLOCKSIZE_512B,
            direction,
            enable: false,
        });
        hw.set_idma(Some(buffer));

        self.transfer
            .length
            .store(length as usize, Ordering::Relaxed);
        self.transfer.set_state(TransferState::ENABLED | kind);

        log::trace!(
            "SDMMC: {:?} {} block(s) at {:#x}",
            kind,
            count,
            card_addr
        );

        let cmd = self.commands(cmd_timeout_ms);
        let sent = match kind {
            TransferState::RX_SINGLE => cmd.read_single_block(card_addr),
            TransferState::RX_MULTI => cmd.read_multi_block(card_addr),
            TransferState::TX_SINGLE => cmd.write_single_block(card_addr),
            _ => cmd.write_multi_block(card_addr),
        };
        if let Err(err) = sent {
            log::error!("SDMMC: transfer command failed: {}", err);
            hw.set_idma(None);
            hw.set_cmd_trans(false);
            hw.clear_flags(StatusFlags::STATIC);
            self.transfer.set_state(TransferState::empty());
            return Err(err);
        }

        let fifo_error = if direction == Direction::ToHost {
            StatusFlags::RXOVERR
        } else {
            StatusFlags::TXUNDERR
        };
        hw.enable_interrupts(
            StatusFlags::DCRCFAIL | StatusFlags::DTIMEOUT | StatusFlags::DATAEND | fifo_error,
        );

        Ok(Transfer {
            host: self,
            finished: false,
            _buffer: PhantomData,
        })
    }

    /// Tear down a transfer the interrupt handler never finished
    ///
    /// After this returns the IDMA no longer touches the buffer.
    pub(crate) fn abort_transfer(&self) {
        let hw = &self.hw;
        hw.disable_interrupts(StatusFlags::DATA_IRQS);
        hw.set_idma(None);
        hw.set_cmd_trans(false);
        hw.reset_fifo();

        if self.transfer.state().contains(TransferState::ENABLED) {
            if let Err(err) = self.commands(STOP_TRANSFER_TIMEOUT_MS).stop_transfer() {
                log::debug!("SDMMC: CMD12 after abort failed: {}", err);
            }
        }

        hw.clear_data_control();
        hw.clear_flags(StatusFlags::STATIC);
        self.transfer.set_state(TransferState::empty());
        self.event
            .clear((DmaEvent::COMPLETE | DmaEvent::ERROR).bits());
    }
}

impl<H: SdmmcHw, E: EventFlag, T: Monotonic> IrqHandler for SdmmcHost<H, E, T> {
    fn on_interrupt(&self) {
        let hw = &self.hw;
        let flags = hw.flags();
        let state = self.transfer.state();

        if flags.contains(StatusFlags::DATAEND) {
            hw.clear_flags(StatusFlags::DATAEND);
            hw.disable_interrupts(StatusFlags::DATA_IRQS);
            hw.set_cmd_trans(false);

            if state.contains(TransferState::ENABLED) {
                hw.clear_data_control();
                hw.set_idma(None);

                if state.intersects(TransferState::MULTI) {
                    if self
                        .commands(STOP_TRANSFER_TIMEOUT_MS)
                        .stop_transfer()
                        .is_err()
                    {
                        self.transfer.add_errors(TransferErrors::STOP_TRANSFER);
                        self.event.set(DmaEvent::ERROR.bits());
                    }
                }

                self.transfer.set_state(TransferState::empty());
                self.event.set(DmaEvent::COMPLETE.bits());
            }
        } else if flags.intersects(StatusFlags::DATA_ERRORS) {
            self.transfer
                .add_errors(TransferErrors::from_status(flags));
            hw.clear_flags(StatusFlags::STATIC_DATA);
            hw.disable_interrupts(StatusFlags::DATA_IRQS);
            hw.set_cmd_trans(false);
            hw.reset_fifo();

            if self
                .commands(STOP_TRANSFER_TIMEOUT_MS)
                .stop_transfer()
                .is_err()
            {
                self.transfer.add_errors(TransferErrors::STOP_TRANSFER);
            }
            hw.clear_flags(StatusFlags::DABORT);

            if state.contains(TransferState::ENABLED) {
                hw.set_idma(None);
                self.transfer.set_state(TransferState::empty());
                self.event.set(DmaEvent::ERROR.bits());
            }
        }
    }
}
