//! Card bring-up
//!
//! Drives a freshly powered card through voltage negotiation, identification,
//! speed classification and bus configuration until it sits in transfer
//! state. Phases run strictly in order and the first failure ends the run.

use core::fmt;

use super::SdmmcConfig;
use super::card::*;
use super::cmd::CommandDriver;
use super::error::SdError;
use super::hw::{BusConfig, BusWidth, DataConfig, Direction, SdmmcHw};
use super::regs::*;
use crate::board::Board;
use crate::time::{Monotonic, Timeout};

/// Card identification clock (400 kHz)
pub const INIT_CLOCK_HZ: u32 = 400_000;

/// Default speed bus clock limit (25 MHz)
pub const NORMAL_CLOCK_HZ: u32 = 25_000_000;

/// High speed bus clock limit (50 MHz)
pub const HIGH_CLOCK_HZ: u32 = 50_000_000;

/// Card clock cycles required after power up before the first command
const POWER_UP_CYCLES: u64 = 74;

/// Largest CLKDIV value
const MAX_CLOCK_DIV: u32 = 0x3FF;

/// Bring-up phase, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    PowerUp,
    VoltageNegotiate,
    Identify,
    ClassifySpeed,
    ConfigureBus,
    WaitTransferReady,
}

/// A failed bring-up: where it stopped and why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitError {
    pub phase: InitPhase,
    pub error: SdError,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.phase, self.error)
    }
}

impl From<InitError> for SdError {
    fn from(err: InitError) -> Self {
        err.error
    }
}

fn at(phase: InitPhase) -> impl FnOnce(SdError) -> InitError {
    move |error| InitError { phase, error }
}

/// Divider giving the fastest clock not above `max_hz`
fn divider_for(kernel_hz: u32, max_hz: u32) -> u16 {
    if kernel_hz <= max_hz {
        return 0;
    }
    kernel_hz.div_ceil(2 * max_hz).min(MAX_CLOCK_DIV) as u16
}

/// Slower of the configured divider and the one for `max_hz`
fn clamp_div(configured: u16, kernel_hz: u32, max_hz: u32) -> u16 {
    let limit = divider_for(kernel_hz, max_hz);
    // Divider 0 bypasses the divider and is the fastest setting
    if configured == 0 {
        limit
    } else {
        configured.max(limit)
    }
}

/// Final card clock divider for the negotiated speed class
///
/// The configured divider stays when it already gives 25 MHz or less.
/// Otherwise UHS cards keep it while high and default speed cards are
/// clamped to 50 MHz and 25 MHz. Clamping never makes the clock faster than
/// configured.
pub fn select_clock_div(configured: u16, kernel_hz: u32, speed: SpeedClass) -> u16 {
    let bus = BusConfig {
        clock_div: configured,
        bus_width: BusWidth::One,
        power_save: false,
    };
    if bus.card_clock_hz(kernel_hz) <= NORMAL_CLOCK_HZ {
        return configured;
    }
    match speed {
        SpeedClass::UltraHigh => configured,
        SpeedClass::High => clamp_div(configured, kernel_hz, HIGH_CLOCK_HZ),
        SpeedClass::Normal => clamp_div(configured, kernel_hz, NORMAL_CLOCK_HZ),
    }
}

/// Poll CMD13 until the card reports transfer state
pub fn wait_transfer_state<H, T>(
    cmd: &CommandDriver<'_, H, T>,
    rca: u16,
    timer: &T,
    timeout_ms: u32,
) -> Result<(), SdError>
where
    H: SdmmcHw + ?Sized,
    T: Monotonic + ?Sized,
{
    let timeout = Timeout::from_ms(timer, timeout_ms);
    loop {
        let status = cmd.send_status(rca)?;
        if CardState::from_status(status) == CardState::Transfer {
            return Ok(());
        }
        if timeout.is_expired() {
            log::debug!(
                "SDMMC: card stuck in {:?}",
                CardState::from_status(status)
            );
            return Err(SdError::Timeout);
        }
        core::hint::spin_loop();
    }
}

/// One bring-up run
pub(crate) struct Bringup<'a, H: SdmmcHw, T: Monotonic, B: Board> {
    hw: &'a H,
    timer: &'a T,
    board: &'a mut B,
    config: &'a SdmmcConfig,
    cmd: CommandDriver<'a, H, T>,
    rca: u16,
}

impl<'a, H: SdmmcHw, T: Monotonic, B: Board> Bringup<'a, H, T, B> {
    pub(crate) fn new(hw: &'a H, timer: &'a T, board: &'a mut B, config: &'a SdmmcConfig) -> Self {
        Self {
            hw,
            timer,
            board,
            config,
            cmd: CommandDriver::new(hw, timer, config.cmd_timeout_ms),
            rca: 0,
        }
    }

    /// Run every phase; returns the card's RCA and summary
    pub(crate) fn run(mut self) -> Result<(u16, CardInfo), InitError> {
        log::debug!("SDMMC: power up");
        self.power_up().map_err(at(InitPhase::PowerUp))?;

        log::debug!("SDMMC: voltage negotiation");
        let (version, ocr) = self
            .negotiate_voltage()
            .map_err(at(InitPhase::VoltageNegotiate))?;
        let capacity = ocr.capacity();
        log::debug!("SDMMC: OCR={:#010x} {:?} {:?}", ocr.0, version, capacity);

        log::debug!("SDMMC: identification");
        let (cid, csd) = self.identify(capacity).map_err(at(InitPhase::Identify))?;

        log::debug!("SDMMC: speed classification");
        let speed = self
            .classify_speed(capacity)
            .map_err(at(InitPhase::ClassifySpeed))?;

        log::debug!("SDMMC: bus configuration");
        self.configure_bus(speed)
            .map_err(at(InitPhase::ConfigureBus))?;

        wait_transfer_state(&self.cmd, self.rca, self.timer, self.config.data_timeout_ms)
            .map_err(at(InitPhase::WaitTransferReady))?;

        Ok((self.rca, CardInfo::new(version, capacity, speed, &csd, &cid)))
    }

    // ========================================================================
    // Phases
    // ========================================================================

    /// Identification clock, 1-bit bus, controller power and 74 clocks
    fn power_up(&mut self) -> Result<(), SdError> {
        let kernel = self.board.kernel_clock_hz();
        if kernel == 0 {
            log::error!("SDMMC: kernel clock not running");
            return Err(SdError::RequestNotApplicable);
        }

        let bus = BusConfig {
            clock_div: divider_for(kernel, INIT_CLOCK_HZ),
            bus_width: BusWidth::One,
            power_save: true,
        };
        self.hw.configure_bus(bus);
        self.hw.set_power(true);

        let card_hz = u64::from(bus.card_clock_hz(kernel));
        let wait_us = POWER_UP_CYCLES * 1_000_000 / card_hz;
        self.board.delay_us(wait_us as u32 + 1);
        Ok(())
    }

    fn negotiate_voltage(&mut self) -> Result<(SdVersion, Ocr), SdError> {
        self.cmd.go_idle()?;

        let version = match self.cmd.send_if_cond() {
            Err(SdError::CmdRspTimeout) => {
                log::debug!("SDMMC: no CMD8 response, version 1.x card");
                self.cmd.go_idle()?;
                SdVersion::V1
            }
            _ => {
                self.cmd.app_command(0).map_err(|err| {
                    log::error!("SDMMC: CMD55 failed: {}", err);
                    SdError::UnsupportedFeature
                })?;
                SdVersion::V2
            }
        };

        let arg = OCR_VOLTAGE_WINDOW_SD | OCR_HCS | OCR_S18R;
        for _ in 0..self.config.max_volt_trials {
            self.cmd.app_command(0)?;
            let ocr = self
                .cmd
                .app_oper_command(arg)
                .map_err(|_| SdError::UnsupportedFeature)?;
            if ocr.is_ready() {
                return Ok((version, ocr));
            }
        }

        log::error!(
            "SDMMC: card still busy after {} ACMD41",
            self.config.max_volt_trials
        );
        Err(SdError::InvalidVoltRange)
    }

    fn identify(&mut self, capacity: CardCapacity) -> Result<(Cid, Csd), SdError> {
        if !self.hw.is_powered() {
            return Err(SdError::RequestNotApplicable);
        }

        let cid = Cid::parse(self.cmd.all_send_cid()?);

        let timeout = Timeout::from_ms(self.timer, self.config.cmd_timeout_ms);
        self.rca = loop {
            let rca = self.cmd.set_relative_address()?;
            if rca != 0 {
                break rca;
            }
            if timeout.is_expired() {
                return Err(SdError::Timeout);
            }
        };
        log::debug!("SDMMC: RCA={:#06x}", self.rca);

        let csd = Csd::parse(self.cmd.send_csd(self.rca)?, capacity);
        self.cmd.select_card(self.rca)?;
        self.cmd.block_length(BLOCK_SIZE)?;

        Ok((cid, csd))
    }

    fn classify_speed(&mut self, capacity: CardCapacity) -> Result<SpeedClass, SdError> {
        let status = self.read_sd_status();
        let restore = self.cmd.block_length(BLOCK_SIZE);
        let status = status?;
        restore?;

        log::debug!(
            "SDMMC: speed class {}, UHS grade {}, video class {}",
            status.speed_class,
            status.uhs_speed_grade,
            status.video_speed_class
        );
        Ok(classify_speed(capacity, &status))
    }

    fn configure_bus(&mut self, speed: SpeedClass) -> Result<(), SdError> {
        let scr = self.read_scr()?;

        let bus_width = if scr.supports_wide_bus() {
            self.cmd.app_command(self.rca)?;
            self.cmd.bus_width(SD_BUS_WIDTH_4BIT)?;
            BusWidth::Four
        } else {
            log::info!("SDMMC: card has no 4-bit bus, staying on 1-bit");
            BusWidth::One
        };

        let kernel = self.board.kernel_clock_hz();
        let clock_div = select_clock_div(self.config.clock_div, kernel, speed);
        let bus = BusConfig {
            clock_div,
            bus_width,
            power_save: true,
        };
        self.hw.configure_bus(bus);
        log::debug!(
            "SDMMC: {:?} bus at {} Hz",
            bus_width,
            bus.card_clock_hz(kernel)
        );

        self.cmd.block_length(BLOCK_SIZE)?;
        Ok(())
    }

    // ========================================================================
    // Register reads through the data FIFO
    // ========================================================================

    fn read_sd_status(&mut self) -> Result<SdStatus, SdError> {
        if self.hw.response(0) & R1_CARD_LOCKED != 0 {
            log::error!("SDMMC: card is locked");
            return Err(SdError::LockUnlockFailed);
        }

        self.cmd.block_length(64)?;
        self.cmd.app_command(self.rca)?;
        self.hw.configure_data(&DataConfig {
            timeout: self.config.data_timer,
            length: 64,
            block_size: DBLOCKSIZE_64B,
            direction: Direction::ToHost,
            enable: true,
        });
        self.cmd.sd_status()?;

        let mut words = [0u32; 16];
        self.read_fifo(&mut words)?;
        Ok(SdStatus::parse(words))
    }

    fn read_scr(&mut self) -> Result<Scr, SdError> {
        self.cmd.block_length(8)?;
        self.cmd.app_command(self.rca)?;
        self.hw.configure_data(&DataConfig {
            timeout: self.config.data_timer,
            length: 8,
            block_size: DBLOCKSIZE_8B,
            direction: Direction::ToHost,
            enable: true,
        });
        self.cmd.send_scr()?;

        let mut words = [0u32; 2];
        self.read_fifo(&mut words)?;
        Ok(Scr::from_fifo(words))
    }

    /// Drain a polled (non-DMA) read into `buf`
    fn read_fifo(&mut self, buf: &mut [u32]) -> Result<(), SdError> {
        let timeout = Timeout::from_ms(self.timer, self.config.data_timeout_ms);
        let mut n = 0;

        let result = loop {
            let flags = self.hw.flags();
            if flags.intersects(StatusFlags::DATA_ERRORS) {
                break if flags.contains(StatusFlags::DTIMEOUT) {
                    Err(SdError::DataTimeout)
                } else if flags.contains(StatusFlags::DCRCFAIL) {
                    Err(SdError::DataCrcFail)
                } else {
                    Err(SdError::RxOverrun)
                };
            }

            let left = buf.len() - n;
            if flags.contains(StatusFlags::RXFIFOHF) && left >= 8 {
                for slot in &mut buf[n..n + 8] {
                    *slot = self.hw.read_fifo();
                }
                n += 8;
                continue;
            }
            if !flags.contains(StatusFlags::RXFIFOE) && left > 0 {
                buf[n] = self.hw.read_fifo();
                n += 1;
                continue;
            }
            if flags.contains(StatusFlags::DATAEND) && !flags.contains(StatusFlags::DPSMACT) {
                break Ok(());
            }

            if timeout.is_expired() {
                break Err(SdError::Timeout);
            }
            core::hint::spin_loop();
        };

        self.hw.clear_flags(StatusFlags::STATIC_DATA);
        result
    }
}
