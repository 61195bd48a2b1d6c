//! SDMMC Register Definitions using tock-registers
//!
//! This module defines the registers of the STM32-style SDMMC host peripheral
//! (with its internal DMA, "IDMA") and the SD card protocol constants used by
//! the driver.
//!
//! # References
//! - RM0456 (STM32U5) SDMMC chapter
//! - SD Specifications Part 1, Physical Layer Simplified Specification

use bitflags::bitflags;
use tock_registers::register_bitfields;
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};

// ============================================================================
// Register Bitfield Definitions
// ============================================================================

register_bitfields! [
    u32,
    /// Power Control Register (0x00)
    pub POWER [
        /// Power supply control
        PWRCTRL OFFSET(0) NUMBITS(2) [
            Reset = 0b00,
            PowerCycle = 0b10,
            On = 0b11
        ],
        /// Voltage switch sequence start
        VSWITCH OFFSET(2) NUMBITS(1) [],
        /// Voltage switch procedure enable
        VSWITCHEN OFFSET(3) NUMBITS(1) [],
        /// Data and command direction signals polarity
        DIRPOL OFFSET(4) NUMBITS(1) []
    ],

    /// Clock Control Register (0x04)
    pub CLKCR [
        /// Clock divide factor (SDMMC_CK = SDMMCCLK / (2 * CLKDIV), 0 = bypass)
        CLKDIV OFFSET(0) NUMBITS(10) [],
        /// Power saving configuration bit
        PWRSAV OFFSET(12) NUMBITS(1) [],
        /// Wide bus mode enable
        WIDBUS OFFSET(14) NUMBITS(2) [
            Bus1 = 0b00,
            Bus4 = 0b01,
            Bus8 = 0b10
        ],
        /// Clock edge selection (1 = falling)
        NEGEDGE OFFSET(16) NUMBITS(1) [],
        /// Hardware flow control enable
        HWFC_EN OFFSET(17) NUMBITS(1) [],
        /// Data rate signaling selection
        DDR OFFSET(18) NUMBITS(1) [],
        /// Bus speed for selection of SDMMC operating modes
        BUSSPEED OFFSET(19) NUMBITS(1) [],
        /// Receive clock selection
        SELCLKRX OFFSET(20) NUMBITS(2) []
    ],

    /// Command Register (0x0C)
    pub CMDR [
        /// Command index
        CMDINDEX OFFSET(0) NUMBITS(6) [],
        /// The CPSM treats the command as a data transfer command
        CMDTRANS OFFSET(6) NUMBITS(1) [],
        /// The CPSM treats the command as a Stop Transmission command
        CMDSTOP OFFSET(7) NUMBITS(1) [],
        /// Wait for response bits
        WAITRESP OFFSET(8) NUMBITS(2) [
            NoResponse = 0b00,
            Short = 0b01,
            ShortNoCrc = 0b10,
            Long = 0b11
        ],
        /// CPSM waits for interrupt request
        WAITINT OFFSET(10) NUMBITS(1) [],
        /// CPSM waits for end of data transfer (CmdPend internal signal)
        WAITPEND OFFSET(11) NUMBITS(1) [],
        /// Command path state machine enable
        CPSMEN OFFSET(12) NUMBITS(1) [],
        /// Hold new data block transmission and reception in the DPSM
        DTHOLD OFFSET(13) NUMBITS(1) [],
        /// SDIO suspend command
        CMDSUSPEND OFFSET(16) NUMBITS(1) []
    ],

    /// Command Response Register (0x10)
    pub RESPCMDR [
        /// Response command index
        RESPCMD OFFSET(0) NUMBITS(6) []
    ],

    /// Data Length Register (0x28)
    pub DLENR [
        /// Data length value
        DATALENGTH OFFSET(0) NUMBITS(25) []
    ],

    /// Data Control Register (0x2C)
    pub DCTRL [
        /// Data transfer enable bit
        DTEN OFFSET(0) NUMBITS(1) [],
        /// Data transfer direction selection (1 = card to controller)
        DTDIR OFFSET(1) NUMBITS(1) [
            ToCard = 0,
            ToHost = 1
        ],
        /// Data transfer mode selection
        DTMODE OFFSET(2) NUMBITS(2) [
            Block = 0b00,
            Sdio = 0b01,
            Emmc = 0b10,
            BlockStop = 0b11
        ],
        /// Data block size (2^n bytes)
        DBLOCKSIZE OFFSET(4) NUMBITS(4) [],
        /// Read wait start
        RWSTART OFFSET(8) NUMBITS(1) [],
        /// Read wait stop
        RWSTOP OFFSET(9) NUMBITS(1) [],
        /// Read wait mode
        RWMOD OFFSET(10) NUMBITS(1) [],
        /// SD I/O interrupt enable functions
        SDIOEN OFFSET(11) NUMBITS(1) [],
        /// Enable the reception of the boot acknowledgment
        BOOTACKEN OFFSET(12) NUMBITS(1) [],
        /// FIFO reset, flushes any remaining data
        FIFORST OFFSET(13) NUMBITS(1) []
    ],

    /// IDMA Control Register (0x50)
    pub IDMACTRLR [
        /// IDMA enable
        IDMAEN OFFSET(0) NUMBITS(1) [],
        /// Buffer mode selection (0 = single buffer)
        IDMABMODE OFFSET(1) NUMBITS(1) []
    ]
];

// ============================================================================
// SDMMC Register Memory Map
// ============================================================================

/// SDMMC peripheral registers memory map
#[repr(C)]
pub struct SdmmcRegisters {
    /// Power Control Register (0x00)
    pub power: ReadWrite<u32, POWER::Register>,
    /// Clock Control Register (0x04)
    pub clkcr: ReadWrite<u32, CLKCR::Register>,
    /// Argument Register (0x08)
    pub argr: ReadWrite<u32>,
    /// Command Register (0x0C)
    pub cmdr: ReadWrite<u32, CMDR::Register>,
    /// Command Response Register (0x10)
    pub respcmdr: ReadOnly<u32, RESPCMDR::Register>,
    /// Response 1..4 Registers (0x14-0x20)
    pub resp: [ReadOnly<u32>; 4],
    /// Data Timer Register (0x24)
    pub dtimer: ReadWrite<u32>,
    /// Data Length Register (0x28)
    pub dlenr: ReadWrite<u32, DLENR::Register>,
    /// Data Control Register (0x2C)
    pub dctrl: ReadWrite<u32, DCTRL::Register>,
    /// Data Counter Register (0x30)
    pub dcntr: ReadOnly<u32>,
    /// Status Register (0x34), layout of [`StatusFlags`]
    pub star: ReadOnly<u32>,
    /// Interrupt Clear Register (0x38), layout of [`StatusFlags`]
    pub icr: WriteOnly<u32>,
    /// Mask Register (0x3C), layout of [`StatusFlags`]
    pub maskr: ReadWrite<u32>,
    /// Acknowledgment Timer Register (0x40)
    pub acktimer: ReadWrite<u32>,
    /// Reserved (0x44-0x4F)
    _reserved0: [u32; 3],
    /// IDMA Control Register (0x50)
    pub idmactrlr: ReadWrite<u32, IDMACTRLR::Register>,
    /// IDMA Buffer Size Register (0x54)
    pub idmabsizer: ReadWrite<u32>,
    /// IDMA Buffer Base Address Register (0x58)
    pub idmabaser: ReadWrite<u32>,
    /// Reserved (0x5C-0x63)
    _reserved1: [u32; 2],
    /// IDMA Linked List Address Register (0x64)
    pub idmalar: ReadWrite<u32>,
    /// IDMA Linked List Memory Base Register (0x68)
    pub idmabar: ReadWrite<u32>,
    /// Reserved (0x6C-0x7F)
    _reserved2: [u32; 5],
    /// Data FIFO Registers (0x80-0xBF)
    pub fifo: [ReadWrite<u32>; 16],
}

// ============================================================================
// Status / Interrupt Clear / Mask Register Bits (0x34, 0x38, 0x3C)
// ============================================================================

bitflags! {
    /// Bits shared by STAR, ICR and MASKR
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u32 {
        /// Command response received (CRC check failed)
        const CCRCFAIL = 1 << 0;
        /// Data block sent/received (CRC check failed)
        const DCRCFAIL = 1 << 1;
        /// Command response timeout
        const CTIMEOUT = 1 << 2;
        /// Data timeout
        const DTIMEOUT = 1 << 3;
        /// Transmit FIFO underrun error
        const TXUNDERR = 1 << 4;
        /// Received FIFO overrun error
        const RXOVERR = 1 << 5;
        /// Command response received (CRC check passed)
        const CMDREND = 1 << 6;
        /// Command sent (no response required)
        const CMDSENT = 1 << 7;
        /// Data transfer ended correctly
        const DATAEND = 1 << 8;
        /// Data transfer hold
        const DHOLD = 1 << 9;
        /// Data block sent/received
        const DBCKEND = 1 << 10;
        /// Data transfer aborted by CMD12
        const DABORT = 1 << 11;
        /// Data path state machine active
        const DPSMACT = 1 << 12;
        /// Command path state machine active
        const CPSMACT = 1 << 13;
        /// Transmit FIFO half empty
        const TXFIFOHE = 1 << 14;
        /// Receive FIFO half full
        const RXFIFOHF = 1 << 15;
        /// Transmit FIFO full
        const TXFIFOF = 1 << 16;
        /// Receive FIFO full
        const RXFIFOF = 1 << 17;
        /// Transmit FIFO empty
        const TXFIFOE = 1 << 18;
        /// Receive FIFO empty
        const RXFIFOE = 1 << 19;
        /// Inverted value of SDMMC_D0 line (busy)
        const BUSYD0 = 1 << 20;
        /// End of SDMMC_D0 busy following a CMD response
        const BUSYD0END = 1 << 21;
        /// SDIO interrupt received
        const SDIOIT = 1 << 22;
        /// Boot acknowledgment received
        const ACKFAIL = 1 << 23;
        /// Boot acknowledgment timeout
        const ACKTIMEOUT = 1 << 24;
        /// Voltage switch critical timing section completion
        const VSWEND = 1 << 25;
        /// SDMMC_CK stopped in voltage switch procedure
        const CKSTOP = 1 << 26;
        /// IDMA transfer error
        const IDMATE = 1 << 27;
        /// IDMA buffer transfer complete
        const IDMABTC = 1 << 28;
    }
}

impl StatusFlags {
    /// Every flag that is cleared by writing ICR
    pub const STATIC: Self = Self::CCRCFAIL
        .union(Self::DCRCFAIL)
        .union(Self::CTIMEOUT)
        .union(Self::DTIMEOUT)
        .union(Self::TXUNDERR)
        .union(Self::RXOVERR)
        .union(Self::CMDREND)
        .union(Self::CMDSENT)
        .union(Self::DATAEND)
        .union(Self::DHOLD)
        .union(Self::DBCKEND)
        .union(Self::DABORT)
        .union(Self::BUSYD0END)
        .union(Self::SDIOIT)
        .union(Self::ACKFAIL)
        .union(Self::ACKTIMEOUT)
        .union(Self::VSWEND)
        .union(Self::CKSTOP)
        .union(Self::IDMATE)
        .union(Self::IDMABTC);

    /// Static flags belonging to the command path
    pub const STATIC_CMD: Self = Self::CCRCFAIL
        .union(Self::CTIMEOUT)
        .union(Self::CMDREND)
        .union(Self::CMDSENT)
        .union(Self::BUSYD0END);

    /// Static flags belonging to the data path
    pub const STATIC_DATA: Self = Self::DCRCFAIL
        .union(Self::DTIMEOUT)
        .union(Self::TXUNDERR)
        .union(Self::RXOVERR)
        .union(Self::DATAEND)
        .union(Self::DHOLD)
        .union(Self::DBCKEND)
        .union(Self::DABORT)
        .union(Self::IDMATE)
        .union(Self::IDMABTC);

    /// Data-phase errors reported by the DPSM
    pub const DATA_ERRORS: Self = Self::DCRCFAIL
        .union(Self::DTIMEOUT)
        .union(Self::TXUNDERR)
        .union(Self::RXOVERR);

    /// Interrupt sources used by DMA block transfers
    pub const DATA_IRQS: Self = Self::DATA_ERRORS.union(Self::DATAEND);
}

// ============================================================================
// Data Block Sizes (DCTRL.DBLOCKSIZE encoding)
// ============================================================================

/// 8 byte blocks (SCR)
pub const DBLOCKSIZE_8B: u32 = 3;

/// 64 byte blocks (SD status)
pub const DBLOCKSIZE_64B: u32 = 6;

/// 512 byte blocks
pub const DBLOCKSIZE_512B: u32 = 9;

// ============================================================================
// SD Commands
// ============================================================================

/// GO_IDLE_STATE - Resets all cards to idle state
pub const MMC_CMD_GO_IDLE_STATE: u8 = 0;

/// ALL_SEND_CID - Asks all cards to send their CID
pub const MMC_CMD_ALL_SEND_CID: u8 = 2;

/// SEND_RELATIVE_ADDR - Ask card to publish new RCA
pub const SD_CMD_SEND_RELATIVE_ADDR: u8 = 3;

/// SELECT/DESELECT_CARD - Toggles card between stand-by and transfer states
pub const MMC_CMD_SELECT_CARD: u8 = 7;

/// SEND_IF_COND - Sends SD interface condition
pub const SD_CMD_SEND_IF_COND: u8 = 8;

/// SEND_CSD - Asks card to send its CSD
pub const MMC_CMD_SEND_CSD: u8 = 9;

/// STOP_TRANSMISSION - Forces card to stop transmission
pub const MMC_CMD_STOP_TRANSMISSION: u8 = 12;

/// SEND_STATUS - Asks card to send its status
pub const MMC_CMD_SEND_STATUS: u8 = 13;

/// SET_BLOCKLEN - Sets block length for block commands
pub const MMC_CMD_SET_BLOCKLEN: u8 = 16;

/// READ_SINGLE_BLOCK - Reads a single block
pub const MMC_CMD_READ_SINGLE_BLOCK: u8 = 17;

/// READ_MULTIPLE_BLOCK - Continuously reads blocks until STOP_TRANSMISSION
pub const MMC_CMD_READ_MULTIPLE_BLOCK: u8 = 18;

/// WRITE_SINGLE_BLOCK - Writes a single block
pub const MMC_CMD_WRITE_SINGLE_BLOCK: u8 = 24;

/// WRITE_MULTIPLE_BLOCK - Continuously writes blocks until STOP_TRANSMISSION
pub const MMC_CMD_WRITE_MULTIPLE_BLOCK: u8 = 25;

/// APP_CMD - Indicates next command is application specific
pub const MMC_CMD_APP_CMD: u8 = 55;

// SD-specific commands (application commands after CMD55)

/// SET_BUS_WIDTH (ACMD6) - Sets bus width
pub const SD_CMD_APP_SET_BUS_WIDTH: u8 = 6;

/// SD_STATUS (ACMD13) - Sends SD status
pub const SD_CMD_APP_SD_STATUS: u8 = 13;

/// SD_SEND_OP_COND (ACMD41) - Sends host capacity support info
pub const SD_CMD_APP_SEND_OP_COND: u8 = 41;

/// SEND_SCR (ACMD51) - Reads SD Configuration Register
pub const SD_CMD_APP_SEND_SCR: u8 = 51;

/// CMD8 argument: 2.7-3.6V supply and check pattern 0xAA
pub const SD_CHECK_PATTERN: u32 = 0x0000_01AA;

/// ACMD6 argument selecting a 4-bit bus
pub const SD_BUS_WIDTH_4BIT: u32 = 2;

// ============================================================================
// OCR (Operation Conditions Register) Bitfields
// ============================================================================

/// Card power-up complete (bit 31 = 0 means busy)
pub const OCR_BUSY: u32 = 1 << 31;

/// Card Capacity Status (HCS) - set for SDHC/SDXC
pub const OCR_HCS: u32 = 1 << 30;

/// Switching to 1.8V accepted
pub const OCR_S18R: u32 = 1 << 24;

/// Voltage window requested by the host in ACMD41 (3.2-3.3V + busy bit)
pub const OCR_VOLTAGE_WINDOW_SD: u32 = 0x8010_0000;

// ============================================================================
// R1 Card Status Bitfields
// ============================================================================

/// Command argument out of range
pub const R1_ADDR_OUT_OF_RANGE: u32 = 1 << 31;

/// Misaligned address
pub const R1_ADDR_MISALIGNED: u32 = 1 << 30;

/// Transferred block length is not allowed
pub const R1_BLOCK_LEN_ERR: u32 = 1 << 29;

/// Error in the sequence of erase commands
pub const R1_ERASE_SEQ_ERR: u32 = 1 << 28;

/// Invalid selection of write-blocks for erase
pub const R1_BAD_ERASE_PARAM: u32 = 1 << 27;

/// Attempt to program a write protected block
pub const R1_WRITE_PROT_VIOLATION: u32 = 1 << 26;

/// Card is locked by the host
pub const R1_CARD_LOCKED: u32 = 1 << 25;

/// Sequence or password error in lock/unlock command
pub const R1_LOCK_UNLOCK_FAILED: u32 = 1 << 24;

/// CRC check of the previous command failed
pub const R1_COM_CRC_FAILED: u32 = 1 << 23;

/// Command not legal for the card state
pub const R1_ILLEGAL_CMD: u32 = 1 << 22;

/// Card internal ECC was applied but failed to correct the data
pub const R1_CARD_ECC_FAILED: u32 = 1 << 21;

/// Internal card controller error
pub const R1_CC_ERROR: u32 = 1 << 20;

/// General or unknown error
pub const R1_GENERAL_UNKNOWN_ERROR: u32 = 1 << 19;

/// Card could not sustain data reading in stream mode
pub const R1_STREAM_READ_UNDERRUN: u32 = 1 << 18;

/// Card could not sustain data programming in stream mode
pub const R1_STREAM_WRITE_OVERRUN: u32 = 1 << 17;

/// CID/CSD overwrite error
pub const R1_CID_CSD_OVERWRITE: u32 = 1 << 16;

/// Only partial address space was erased
pub const R1_WP_ERASE_SKIP: u32 = 1 << 15;

/// Command executed without using internal ECC
pub const R1_CARD_ECC_DISABLED: u32 = 1 << 14;

/// Erase sequence was cleared before executing
pub const R1_ERASE_RESET: u32 = 1 << 13;

/// Error in the sequence of the authentication process
pub const R1_AKE_SEQ_ERROR: u32 = 1 << 3;

/// Every R1 error bit
pub const R1_ERRORBITS: u32 = 0xFDFF_E008;

/// Card state field of R1 (bits 12:9)
pub const R1_CURRENT_STATE_SHIFT: u32 = 9;

/// Card state field mask (after shift)
pub const R1_CURRENT_STATE_MASK: u32 = 0x0F;

/// R6 general or unknown error
pub const R6_GENERAL_UNKNOWN_ERROR: u32 = 1 << 13;

/// R6 illegal command
pub const R6_ILLEGAL_CMD: u32 = 1 << 14;

/// R6 command CRC error
pub const R6_COM_CRC_FAILED: u32 = 1 << 15;

// ============================================================================
// SCR Bitfields
// ============================================================================

/// SD_BUS_WIDTHS bit for 4-bit support, in the upper SCR word (SCR[50])
pub const SCR_WIDE_BUS_SUPPORT: u32 = 1 << 18;

/// SD_BUS_WIDTHS bit for 1-bit support, in the upper SCR word (SCR[48])
pub const SCR_SINGLE_BUS_SUPPORT: u32 = 1 << 16;
