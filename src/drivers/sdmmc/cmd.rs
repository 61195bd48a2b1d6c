//! SD command protocol
//!
//! Issues single commands on the command path and interprets the response
//! into an [`SdError`].

use super::card::Ocr;
use super::error::SdError;
use super::hw::{Command, Response, SdmmcHw};
use super::regs::*;
use crate::time::{Monotonic, Timeout};

/// Flags that end the wait for a command with a response
const RESPONSE_FLAGS: StatusFlags = StatusFlags::CCRCFAIL
    .union(StatusFlags::CMDREND)
    .union(StatusFlags::CTIMEOUT);

/// Command path driver over a host and a clock
pub struct CommandDriver<'a, H: SdmmcHw + ?Sized, T: Monotonic + ?Sized> {
    hw: &'a H,
    timer: &'a T,
    timeout_ms: u32,
}

impl<'a, H: SdmmcHw + ?Sized, T: Monotonic + ?Sized> CommandDriver<'a, H, T> {
    pub fn new(hw: &'a H, timer: &'a T, timeout_ms: u32) -> Self {
        Self {
            hw,
            timer,
            timeout_ms,
        }
    }

    // ========================================================================
    // Command issue and response handling
    // ========================================================================

    fn issue(&self, cmd: &Command) {
        self.hw.clear_flags(StatusFlags::STATIC_CMD);
        self.hw.send_command(cmd);
    }

    /// Poll until one of `mask` is set and the CPSM is idle
    fn wait_flags(&self, mask: StatusFlags) -> Result<StatusFlags, SdError> {
        let timeout = Timeout::from_ms(self.timer, self.timeout_ms);
        loop {
            let flags = self.hw.flags();
            if flags.intersects(mask) && !flags.contains(StatusFlags::CPSMACT) {
                return Ok(flags);
            }
            if timeout.is_expired() {
                return Err(SdError::Timeout);
            }
            core::hint::spin_loop();
        }
    }

    /// Common timeout/CRC/index checks for responses that carry a CRC
    fn check_response(&self, index: u8, check_index: bool) -> Result<(), SdError> {
        let flags = self.wait_flags(RESPONSE_FLAGS)?;

        if flags.contains(StatusFlags::CTIMEOUT) {
            self.hw.clear_flags(StatusFlags::CTIMEOUT);
            log::debug!("SDMMC: CMD{} response timeout", index);
            return Err(SdError::CmdRspTimeout);
        }
        if flags.contains(StatusFlags::CCRCFAIL) {
            self.hw.clear_flags(StatusFlags::CCRCFAIL);
            log::debug!("SDMMC: CMD{} CRC error", index);
            return Err(SdError::CmdCrcFail);
        }

        self.hw.clear_flags(StatusFlags::STATIC_CMD);

        if check_index && self.hw.response_command() != index {
            log::debug!(
                "SDMMC: CMD{} answered by CMD{}",
                index,
                self.hw.response_command()
            );
            return Err(SdError::CmdCrcFail);
        }
        Ok(())
    }

    /// R1 / R1b: card status
    fn resp1(&self, cmd: &Command) -> Result<u32, SdError> {
        self.issue(cmd);
        self.check_response(cmd.index, true)?;

        let status = self.hw.response(0);
        match SdError::from_card_status(status) {
            Some(err) => {
                log::debug!("SDMMC: CMD{} card status {:#010x}", cmd.index, status);
                Err(err)
            }
            None => Ok(status),
        }
    }

    /// R2: CID or CSD in RESP1..RESP4
    fn resp2(&self, cmd: &Command) -> Result<[u32; 4], SdError> {
        self.issue(cmd);
        self.check_response(cmd.index, false)?;
        Ok([
            self.hw.response(0),
            self.hw.response(1),
            self.hw.response(2),
            self.hw.response(3),
        ])
    }

    /// R3: OCR, sent without a valid CRC
    fn resp3(&self, cmd: &Command) -> Result<u32, SdError> {
        self.issue(cmd);
        let flags = self.wait_flags(RESPONSE_FLAGS)?;
        if flags.contains(StatusFlags::CTIMEOUT) {
            self.hw.clear_flags(StatusFlags::CTIMEOUT);
            return Err(SdError::CmdRspTimeout);
        }
        self.hw.clear_flags(StatusFlags::STATIC_CMD);
        Ok(self.hw.response(0))
    }

    /// R6: published RCA
    fn resp6(&self, cmd: &Command) -> Result<u16, SdError> {
        self.issue(cmd);
        self.check_response(cmd.index, true)?;

        let response = self.hw.response(0);
        if let Some(err) = SdError::from_rca_status(response) {
            return Err(err);
        }
        Ok((response >> 16) as u16)
    }

    /// R7: interface condition
    fn resp7(&self, cmd: &Command) -> Result<(), SdError> {
        self.issue(cmd);
        let flags = self.wait_flags(RESPONSE_FLAGS)?;
        if flags.contains(StatusFlags::CTIMEOUT) {
            self.hw.clear_flags(StatusFlags::CTIMEOUT);
            return Err(SdError::CmdRspTimeout);
        }
        if flags.contains(StatusFlags::CCRCFAIL) {
            self.hw.clear_flags(StatusFlags::CCRCFAIL);
            return Err(SdError::CmdCrcFail);
        }
        self.hw.clear_flags(StatusFlags::CMDREND);
        Ok(())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// CMD0: reset the card to idle state
    pub fn go_idle(&self) -> Result<(), SdError> {
        log::trace!("SDMMC: CMD0 (GO_IDLE_STATE)");
        self.issue(&Command::new(MMC_CMD_GO_IDLE_STATE, 0, Response::None));
        self.wait_flags(StatusFlags::CMDSENT)?;
        self.hw.clear_flags(StatusFlags::STATIC_CMD);
        Ok(())
    }

    /// CMD8: check interface condition (2.7-3.6V, pattern 0xAA)
    pub fn send_if_cond(&self) -> Result<(), SdError> {
        log::trace!("SDMMC: CMD8 (SEND_IF_COND)");
        self.resp7(&Command::new(
            SD_CMD_SEND_IF_COND,
            SD_CHECK_PATTERN,
            Response::Short,
        ))
    }

    /// CMD55: next command is an application command
    pub fn app_command(&self, rca: u16) -> Result<u32, SdError> {
        self.resp1(&Command::new(
            MMC_CMD_APP_CMD,
            u32::from(rca) << 16,
            Response::Short,
        ))
    }

    /// ACMD41: send host capacity support and read the OCR
    pub fn app_oper_command(&self, arg: u32) -> Result<Ocr, SdError> {
        self.resp3(&Command::new(
            SD_CMD_APP_SEND_OP_COND,
            arg,
            Response::ShortNoCrc,
        ))
        .map(Ocr)
    }

    /// CMD2: read the CID
    pub fn all_send_cid(&self) -> Result<[u32; 4], SdError> {
        log::trace!("SDMMC: CMD2 (ALL_SEND_CID)");
        self.resp2(&Command::new(MMC_CMD_ALL_SEND_CID, 0, Response::Long))
    }

    /// CMD3: ask the card to publish a relative address
    pub fn set_relative_address(&self) -> Result<u16, SdError> {
        log::trace!("SDMMC: CMD3 (SEND_RELATIVE_ADDR)");
        self.resp6(&Command::new(
            SD_CMD_SEND_RELATIVE_ADDR,
            0,
            Response::Short,
        ))
    }

    /// CMD9: read the CSD
    pub fn send_csd(&self, rca: u16) -> Result<[u32; 4], SdError> {
        log::trace!("SDMMC: CMD9 (SEND_CSD)");
        self.resp2(&Command::new(
            MMC_CMD_SEND_CSD,
            u32::from(rca) << 16,
            Response::Long,
        ))
    }

    /// CMD7: move the card at `rca` to transfer state
    pub fn select_card(&self, rca: u16) -> Result<u32, SdError> {
        log::trace!("SDMMC: CMD7 (SELECT_CARD) rca={:#06x}", rca);
        self.resp1(&Command::new(
            MMC_CMD_SELECT_CARD,
            u32::from(rca) << 16,
            Response::Short,
        ))
    }

    /// CMD7 with RCA 0: put every card back to stand-by (no response)
    pub fn deselect_card(&self) -> Result<(), SdError> {
        log::trace!("SDMMC: CMD7 (DESELECT_CARD)");
        self.issue(&Command::new(MMC_CMD_SELECT_CARD, 0, Response::None));
        self.wait_flags(StatusFlags::CMDSENT)?;
        self.hw.clear_flags(StatusFlags::STATIC_CMD);
        Ok(())
    }

    /// CMD13: read the card status
    pub fn send_status(&self, rca: u16) -> Result<u32, SdError> {
        self.resp1(&Command::new(
            MMC_CMD_SEND_STATUS,
            u32::from(rca) << 16,
            Response::Short,
        ))
    }

    /// CMD16: set the block length for SDSC transfers and register reads
    pub fn block_length(&self, len: u32) -> Result<u32, SdError> {
        log::trace!("SDMMC: CMD16 (SET_BLOCKLEN) {}", len);
        self.resp1(&Command::new(MMC_CMD_SET_BLOCKLEN, len, Response::Short))
    }

    /// ACMD6: select the bus width
    pub fn bus_width(&self, width: u32) -> Result<u32, SdError> {
        log::trace!("SDMMC: ACMD6 (SET_BUS_WIDTH) {}", width);
        self.resp1(&Command::new(
            SD_CMD_APP_SET_BUS_WIDTH,
            width,
            Response::Short,
        ))
    }

    /// ACMD51: read the SCR through the data path
    pub fn send_scr(&self) -> Result<u32, SdError> {
        log::trace!("SDMMC: ACMD51 (SEND_SCR)");
        self.resp1(&Command::new(SD_CMD_APP_SEND_SCR, 0, Response::Short))
    }

    /// ACMD13: read the SD status through the data path
    pub fn sd_status(&self) -> Result<u32, SdError> {
        log::trace!("SDMMC: ACMD13 (SD_STATUS)");
        self.resp1(&Command::new(SD_CMD_APP_SD_STATUS, 0, Response::Short))
    }

    fn data_command(&self, index: u8, addr: u32) -> Result<u32, SdError> {
        log::trace!("SDMMC: CMD{} addr={:#x}", index, addr);
        self.resp1(&Command {
            trans: true,
            ..Command::new(index, addr, Response::Short)
        })
    }

    /// CMD17
    pub fn read_single_block(&self, addr: u32) -> Result<u32, SdError> {
        self.data_command(MMC_CMD_READ_SINGLE_BLOCK, addr)
    }

    /// CMD18
    pub fn read_multi_block(&self, addr: u32) -> Result<u32, SdError> {
        self.data_command(MMC_CMD_READ_MULTIPLE_BLOCK, addr)
    }

    /// CMD24
    pub fn write_single_block(&self, addr: u32) -> Result<u32, SdError> {
        self.data_command(MMC_CMD_WRITE_SINGLE_BLOCK, addr)
    }

    /// CMD25
    pub fn write_multi_block(&self, addr: u32) -> Result<u32, SdError> {
        self.data_command(MMC_CMD_WRITE_MULTIPLE_BLOCK, addr)
    }

    /// CMD12: end a multiple block transfer
    pub fn stop_transfer(&self) -> Result<u32, SdError> {
        log::trace!("SDMMC: CMD12 (STOP_TRANSMISSION)");
        let result = self.resp1(&Command {
            stop: true,
            ..Command::new(MMC_CMD_STOP_TRANSMISSION, 0, Response::Short)
        });
        self.hw.set_cmd_stop(false);
        result
    }
}
