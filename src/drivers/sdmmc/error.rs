//! SD driver error taxonomy
//!
//! Every failure the driver can report is one variant of [`SdError`]. Card
//! status (R1) error bits and data-phase interrupt flags are translated here.

use bitflags::bitflags;
use core::fmt;

use super::regs::*;

/// SD driver error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    /// Command response received but CRC check failed
    CmdCrcFail,
    /// Data block sent/received but CRC check failed
    DataCrcFail,
    /// Command response timeout
    CmdRspTimeout,
    /// Data timeout
    DataTimeout,
    /// Transmit FIFO underrun
    TxUnderrun,
    /// Receive FIFO overrun
    RxOverrun,
    /// Misaligned address
    AddressMisaligned,
    /// Transferred block length is not allowed for the card
    BlockLenErr,
    /// Error in the sequence of erase commands
    EraseSeqErr,
    /// Invalid selection of write-blocks for erase
    BadEraseParam,
    /// Attempt to program a write protected block
    WriteProtViolation,
    /// Lock/unlock sequence error, or the card is locked
    LockUnlockFailed,
    /// CRC check of the previous command failed
    ComCrcFailed,
    /// Command not legal for the card state
    IllegalCmd,
    /// Card internal ECC failed to correct the data
    CardEccFailed,
    /// Internal card controller error
    CcErr,
    /// General or unknown error
    GeneralUnknown,
    /// Card could not sustain data reading in stream mode
    StreamReadUnderrun,
    /// Card could not sustain data programming in stream mode
    StreamWriteOverrun,
    /// CID/CSD overwrite error
    CidCsdOverwrite,
    /// Only partial address space was erased
    WpEraseSkip,
    /// Command executed without internal ECC
    CardEccDisabled,
    /// Erase sequence cleared before executing
    EraseReset,
    /// Error in the authentication sequence
    AkeSeqErr,
    /// Card never reported power-up complete
    InvalidVoltRange,
    /// Address (or address + count) out of range
    AddressOutOfRange,
    /// Request not applicable in the current state
    RequestNotApplicable,
    /// Card does not support a mandatory feature
    UnsupportedFeature,
    /// Controller or card busy
    Busy,
    /// Internal DMA error
    Dma,
    /// Software deadline exceeded
    Timeout,
    /// Invalid parameter passed by the caller
    InvalidParameter,
}

impl SdError {
    /// Translate the error bits of an R1 card status word
    ///
    /// Returns `None` when the status carries no error.
    pub fn from_card_status(status: u32) -> Option<Self> {
        const MAP: &[(u32, SdError)] = &[
            (R1_ADDR_OUT_OF_RANGE, SdError::AddressOutOfRange),
            (R1_ADDR_MISALIGNED, SdError::AddressMisaligned),
            (R1_BLOCK_LEN_ERR, SdError::BlockLenErr),
            (R1_ERASE_SEQ_ERR, SdError::EraseSeqErr),
            (R1_BAD_ERASE_PARAM, SdError::BadEraseParam),
            (R1_WRITE_PROT_VIOLATION, SdError::WriteProtViolation),
            (R1_LOCK_UNLOCK_FAILED, SdError::LockUnlockFailed),
            (R1_COM_CRC_FAILED, SdError::ComCrcFailed),
            (R1_ILLEGAL_CMD, SdError::IllegalCmd),
            (R1_CARD_ECC_FAILED, SdError::CardEccFailed),
            (R1_CC_ERROR, SdError::CcErr),
            (R1_GENERAL_UNKNOWN_ERROR, SdError::GeneralUnknown),
            (R1_STREAM_READ_UNDERRUN, SdError::StreamReadUnderrun),
            (R1_STREAM_WRITE_OVERRUN, SdError::StreamWriteOverrun),
            (R1_CID_CSD_OVERWRITE, SdError::CidCsdOverwrite),
            (R1_WP_ERASE_SKIP, SdError::WpEraseSkip),
            (R1_CARD_ECC_DISABLED, SdError::CardEccDisabled),
            (R1_ERASE_RESET, SdError::EraseReset),
            (R1_AKE_SEQ_ERROR, SdError::AkeSeqErr),
        ];

        if status & R1_ERRORBITS == 0 {
            return None;
        }

        Some(
            MAP.iter()
                .find(|(bit, _)| status & bit != 0)
                .map_or(SdError::GeneralUnknown, |&(_, err)| err),
        )
    }

    /// Translate the error bits of an R6 (published RCA) response
    pub fn from_rca_status(response: u32) -> Option<Self> {
        if response & R6_GENERAL_UNKNOWN_ERROR != 0 {
            Some(SdError::GeneralUnknown)
        } else if response & R6_ILLEGAL_CMD != 0 {
            Some(SdError::IllegalCmd)
        } else if response & R6_COM_CRC_FAILED != 0 {
            Some(SdError::ComCrcFailed)
        } else {
            None
        }
    }
}

impl fmt::Display for SdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SdError::CmdCrcFail => "command response CRC check failed",
            SdError::DataCrcFail => "data block CRC check failed",
            SdError::CmdRspTimeout => "command response timeout",
            SdError::DataTimeout => "data timeout",
            SdError::TxUnderrun => "transmit FIFO underrun",
            SdError::RxOverrun => "receive FIFO overrun",
            SdError::AddressMisaligned => "misaligned address",
            SdError::BlockLenErr => "block length not allowed",
            SdError::EraseSeqErr => "erase command sequence error",
            SdError::BadEraseParam => "invalid erase block selection",
            SdError::WriteProtViolation => "write protect violation",
            SdError::LockUnlockFailed => "card locked or lock/unlock failed",
            SdError::ComCrcFailed => "previous command CRC failed",
            SdError::IllegalCmd => "illegal command",
            SdError::CardEccFailed => "card ECC failed",
            SdError::CcErr => "card controller error",
            SdError::GeneralUnknown => "general or unknown error",
            SdError::StreamReadUnderrun => "stream read underrun",
            SdError::StreamWriteOverrun => "stream write overrun",
            SdError::CidCsdOverwrite => "CID/CSD overwrite",
            SdError::WpEraseSkip => "write protected blocks skipped by erase",
            SdError::CardEccDisabled => "card ECC disabled",
            SdError::EraseReset => "erase sequence reset",
            SdError::AkeSeqErr => "authentication sequence error",
            SdError::InvalidVoltRange => "card did not accept the voltage range",
            SdError::AddressOutOfRange => "address out of range",
            SdError::RequestNotApplicable => "request not applicable",
            SdError::UnsupportedFeature => "unsupported feature",
            SdError::Busy => "busy",
            SdError::Dma => "DMA error",
            SdError::Timeout => "timeout",
            SdError::InvalidParameter => "invalid parameter",
        };
        f.write_str(msg)
    }
}

bitflags! {
    /// Errors accumulated during a DMA data transfer
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransferErrors: u32 {
        /// Data CRC failure
        const DATA_CRC_FAIL = 1 << 0;
        /// Data timeout
        const DATA_TIMEOUT = 1 << 1;
        /// Receive FIFO overrun
        const RX_OVERRUN = 1 << 2;
        /// Transmit FIFO underrun
        const TX_UNDERRUN = 1 << 3;
        /// STOP_TRANSMISSION failed after the data phase
        const STOP_TRANSFER = 1 << 4;
    }
}

impl TransferErrors {
    /// Map data-path status flags to transfer errors
    pub fn from_status(flags: StatusFlags) -> Self {
        let mut errors = Self::empty();
        if flags.contains(StatusFlags::DCRCFAIL) {
            errors |= Self::DATA_CRC_FAIL;
        }
        if flags.contains(StatusFlags::DTIMEOUT) {
            errors |= Self::DATA_TIMEOUT;
        }
        if flags.contains(StatusFlags::RXOVERR) {
            errors |= Self::RX_OVERRUN;
        }
        if flags.contains(StatusFlags::TXUNDERR) {
            errors |= Self::TX_UNDERRUN;
        }
        errors
    }

    /// The most specific single error for this set
    ///
    /// Returns `None` for an empty set.
    pub fn to_error(self) -> Option<SdError> {
        if self.is_empty() {
            None
        } else if self.contains(Self::DATA_CRC_FAIL) {
            Some(SdError::DataCrcFail)
        } else if self.contains(Self::DATA_TIMEOUT) {
            Some(SdError::DataTimeout)
        } else if self.contains(Self::RX_OVERRUN) {
            Some(SdError::RxOverrun)
        } else if self.contains(Self::TX_UNDERRUN) {
            Some(SdError::TxUnderrun)
        } else {
            Some(SdError::GeneralUnknown)
        }
    }
}
