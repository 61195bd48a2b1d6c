//! SD card register decoders
//!
//! Pure functions turning the raw CID, CSD, SD status, SCR and OCR words
//! returned by the card into structured records.
//!
//! Long (R2) responses arrive in RESP1..RESP4 with RESP1 holding bits
//! [127:96] of the register. The SD status and SCR are read through the data
//! FIFO, which hands out the big-endian byte stream as little-endian words.

use heapless::String;

use super::regs::*;

/// Logical block size exposed by the driver
pub const BLOCK_SIZE: u32 = 512;

/// Physical layer version reported by CMD8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SdVersion {
    /// CMD8 timed out: version 1.x card
    #[default]
    V1,
    /// CMD8 answered: version 2.0 or later
    V2,
}

/// Addressing class of the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardCapacity {
    /// SDSC: byte addressed, CSD version 1.0
    #[default]
    Standard,
    /// SDHC/SDXC: block addressed, CSD version 2.0
    HighExtended,
}

/// Bus speed class negotiated for the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedClass {
    /// Default speed, up to 25 MHz
    #[default]
    Normal,
    /// High speed, up to 50 MHz
    High,
    /// UHS-I capable card
    UltraHigh,
}

/// Operation Conditions Register, as returned by ACMD41
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ocr(pub u32);

impl Ocr {
    /// Power-up routine finished
    pub fn is_ready(&self) -> bool {
        self.0 & OCR_BUSY != 0
    }

    /// Card capacity status; only meaningful once ready
    pub fn capacity(&self) -> CardCapacity {
        if self.0 & OCR_HCS != 0 {
            CardCapacity::HighExtended
        } else {
            CardCapacity::Standard
        }
    }

    /// Card accepted the switch to 1.8V signalling
    pub fn accepts_1v8(&self) -> bool {
        self.0 & OCR_S18R != 0
    }
}

/// Card state field of an R1 status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Idle,
    Ready,
    Identification,
    Standby,
    Transfer,
    Sending,
    Receiving,
    Programming,
    Disconnected,
    Unknown(u8),
}

impl CardState {
    /// Extract the state from an R1 card status word
    pub fn from_status(status: u32) -> Self {
        match (status >> R1_CURRENT_STATE_SHIFT) & R1_CURRENT_STATE_MASK {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Identification,
            3 => CardState::Standby,
            4 => CardState::Transfer,
            5 => CardState::Sending,
            6 => CardState::Receiving,
            7 => CardState::Programming,
            8 => CardState::Disconnected,
            other => CardState::Unknown(other as u8),
        }
    }
}

fn printable(byte: u32) -> char {
    let b = (byte & 0xFF) as u8;
    if b.is_ascii_graphic() || b == b' ' {
        b as char
    } else {
        '?'
    }
}

/// Card Identification register
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cid {
    /// Manufacturer ID
    pub manufacturer_id: u8,
    /// OEM/application ID (2 ASCII characters)
    pub oem_id: String<2>,
    /// Product name (5 ASCII characters)
    pub product_name: String<5>,
    /// Product revision, major digit
    pub revision_major: u8,
    /// Product revision, minor digit
    pub revision_minor: u8,
    /// Product serial number
    pub serial_number: u32,
    /// Manufacturing month (1-12)
    pub manufacturing_month: u8,
    /// Manufacturing year
    pub manufacturing_year: u16,
}

impl Cid {
    /// Decode the CID from the four R2 response words
    pub fn parse(cid: [u32; 4]) -> Self {
        let mut oem_id = String::new();
        for byte in [cid[0] >> 16, cid[0] >> 8] {
            let _ = oem_id.push(printable(byte));
        }

        let mut product_name = String::new();
        for byte in [cid[0], cid[1] >> 24, cid[1] >> 16, cid[1] >> 8, cid[1]] {
            let _ = product_name.push(printable(byte));
        }

        Self {
            manufacturer_id: (cid[0] >> 24) as u8,
            oem_id,
            product_name,
            revision_major: (cid[2] >> 28) as u8,
            revision_minor: ((cid[2] >> 24) & 0x0F) as u8,
            serial_number: ((cid[2] & 0x00FF_FFFF) << 8) | (cid[3] >> 24),
            manufacturing_month: ((cid[3] >> 8) & 0x0F) as u8,
            manufacturing_year: 2000 + ((cid[3] >> 12) & 0xFF) as u16,
        }
    }
}

/// Card Specific Data register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Csd {
    pub csd_structure: u8,
    pub spec_version: u8,
    /// Data read access time 1
    pub taac: u8,
    /// Data read access time 2 in CLK cycles (NSAC * 100)
    pub nsac: u8,
    /// Max data transfer rate code
    pub max_bus_clk_freq: u8,
    /// Card command classes
    pub card_command_classes: u16,
    /// Max read block length, log2 bytes
    pub read_block_len: u8,
    pub partial_block_read: bool,
    pub write_block_misalign: bool,
    pub read_block_misalign: bool,
    pub dsr_implemented: bool,
    /// C_SIZE (12 bits for SDSC, 22 bits for SDHC/SDXC)
    pub device_size: u32,
    pub max_read_current_vdd_min: u8,
    pub max_read_current_vdd_max: u8,
    pub max_write_current_vdd_min: u8,
    pub max_write_current_vdd_max: u8,
    /// C_SIZE_MULT (SDSC only)
    pub device_size_mul: u8,
    pub erase_group_size: u8,
    pub erase_group_size_mul: u8,
    pub write_protect_group_size: u8,
    pub write_protect_group_enable: bool,
    pub manufacturer_default_ecc: u8,
    pub write_speed_factor: u8,
    /// Max write block length, log2 bytes
    pub max_write_block_len: u8,
    pub write_block_partial: bool,
    pub content_protect_application: bool,
    pub file_format_group: bool,
    pub copy: bool,
    pub permanent_write_protect: bool,
    pub temporary_write_protect: bool,
    pub file_format: u8,
    pub ecc: u8,
    pub crc: u8,
}

impl Csd {
    /// Decode the CSD from the four R2 response words
    ///
    /// The layout of the device size fields depends on the capacity class,
    /// which is only known once ACMD41 has completed.
    pub fn parse(csd: [u32; 4], capacity: CardCapacity) -> Self {
        let bit = |word: u32, n: u32| (word >> n) & 1 != 0;

        let mut out = Self {
            csd_structure: ((csd[0] >> 30) & 0x3) as u8,
            spec_version: ((csd[0] >> 26) & 0xF) as u8,
            taac: (csd[0] >> 16) as u8,
            nsac: (csd[0] >> 8) as u8,
            max_bus_clk_freq: csd[0] as u8,
            card_command_classes: ((csd[1] >> 20) & 0xFFF) as u16,
            read_block_len: ((csd[1] >> 16) & 0xF) as u8,
            partial_block_read: bit(csd[1], 15),
            write_block_misalign: bit(csd[1], 14),
            read_block_misalign: bit(csd[1], 13),
            dsr_implemented: bit(csd[1], 12),
            erase_group_size: ((csd[2] >> 14) & 0x1) as u8,
            erase_group_size_mul: ((csd[2] >> 7) & 0x7F) as u8,
            write_protect_group_size: (csd[2] & 0x7F) as u8,
            write_protect_group_enable: bit(csd[3], 31),
            manufacturer_default_ecc: ((csd[3] >> 29) & 0x3) as u8,
            write_speed_factor: ((csd[3] >> 26) & 0x7) as u8,
            max_write_block_len: ((csd[3] >> 22) & 0xF) as u8,
            write_block_partial: bit(csd[3], 21),
            content_protect_application: bit(csd[3], 16),
            file_format_group: bit(csd[3], 15),
            copy: bit(csd[3], 14),
            permanent_write_protect: bit(csd[3], 13),
            temporary_write_protect: bit(csd[3], 12),
            file_format: ((csd[3] >> 10) & 0x3) as u8,
            ecc: ((csd[3] >> 8) & 0x3) as u8,
            crc: ((csd[3] >> 1) & 0x7F) as u8,
            ..Self::default()
        };

        match capacity {
            CardCapacity::Standard => {
                out.device_size = ((csd[1] & 0x3FF) << 2) | (csd[2] >> 30);
                out.max_read_current_vdd_min = ((csd[2] >> 27) & 0x7) as u8;
                out.max_read_current_vdd_max = ((csd[2] >> 24) & 0x7) as u8;
                out.max_write_current_vdd_min = ((csd[2] >> 21) & 0x7) as u8;
                out.max_write_current_vdd_max = ((csd[2] >> 18) & 0x7) as u8;
                out.device_size_mul = ((csd[2] >> 15) & 0x7) as u8;
            }
            CardCapacity::HighExtended => {
                out.device_size = ((csd[1] & 0x3F) << 16) | (csd[2] >> 16);
            }
        }

        out
    }
}

/// Card size as (number of 512-byte blocks, block size)
pub fn compute_capacity(csd: &Csd, capacity: CardCapacity) -> (u32, u32) {
    let blocks = match capacity {
        CardCapacity::Standard => {
            let mult = 1u64 << (u32::from(csd.device_size_mul & 0x7) + 2);
            let block_len = 1u64 << (csd.read_block_len & 0xF);
            (u64::from(csd.device_size) + 1) * mult * block_len / u64::from(BLOCK_SIZE)
        }
        CardCapacity::HighExtended => (u64::from(csd.device_size) + 1) * 1024,
    };
    (u32::try_from(blocks).unwrap_or(u32::MAX), BLOCK_SIZE)
}

/// SD Status (ACMD13)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdStatus {
    pub data_bus_width: u8,
    pub secured_mode: bool,
    pub card_type: u16,
    pub protected_area_size: u32,
    pub speed_class: u8,
    pub performance_move: u8,
    pub allocation_unit_size: u8,
    pub erase_size: u16,
    pub erase_timeout: u8,
    pub erase_offset: u8,
    pub uhs_speed_grade: u8,
    pub uhs_allocation_unit_size: u8,
    pub video_speed_class: u8,
}

impl SdStatus {
    /// Decode the first 16 FIFO words of the 64-byte SD status
    pub fn parse(w: [u32; 16]) -> Self {
        Self {
            data_bus_width: ((w[0] & 0xC0) >> 6) as u8,
            secured_mode: w[0] & 0x20 != 0,
            card_type: (((w[0] & 0x00FF_0000) >> 8) | ((w[0] & 0xFF00_0000) >> 24)) as u16,
            protected_area_size: w[1].swap_bytes(),
            speed_class: w[2] as u8,
            performance_move: (w[2] >> 8) as u8,
            allocation_unit_size: ((w[2] & 0x00F0_0000) >> 20) as u8,
            erase_size: (((w[2] & 0xFF00_0000) >> 16) | (w[3] & 0xFF)) as u16,
            erase_timeout: ((w[3] & 0xFC00) >> 10) as u8,
            erase_offset: ((w[3] & 0x0300) >> 8) as u8,
            uhs_speed_grade: ((w[3] & 0x00F0_0000) >> 20) as u8,
            uhs_allocation_unit_size: ((w[3] & 0x000F_0000) >> 16) as u8,
            video_speed_class: ((w[3] & 0xFF00_0000) >> 24) as u8,
        }
    }
}

/// SD Configuration Register (ACMD51)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scr(pub u64);

impl Scr {
    /// Build from the two FIFO words of the 8-byte SCR
    pub fn from_fifo(words: [u32; 2]) -> Self {
        Self((u64::from(words[0].swap_bytes()) << 32) | u64::from(words[1].swap_bytes()))
    }

    fn high(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn structure(&self) -> u8 {
        (self.0 >> 60) as u8
    }

    pub fn sd_spec(&self) -> u8 {
        ((self.0 >> 56) & 0xF) as u8
    }

    /// SD_BUS_WIDTHS field (bit 0 = 1-bit, bit 2 = 4-bit)
    pub fn bus_widths(&self) -> u8 {
        ((self.0 >> 48) & 0xF) as u8
    }

    pub fn supports_wide_bus(&self) -> bool {
        self.high() & SCR_WIDE_BUS_SUPPORT != 0
    }
}

/// Pick the bus speed class from capacity and SD status
pub fn classify_speed(capacity: CardCapacity, status: &SdStatus) -> SpeedClass {
    match capacity {
        CardCapacity::Standard => SpeedClass::Normal,
        CardCapacity::HighExtended
            if status.uhs_speed_grade != 0 || status.uhs_allocation_unit_size != 0 =>
        {
            SpeedClass::UltraHigh
        }
        CardCapacity::HighExtended => SpeedClass::High,
    }
}

/// Summary of an initialized card
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CardInfo {
    pub logical_block_count: u32,
    pub logical_block_size: u32,
    pub version: SdVersion,
    pub capacity: CardCapacity,
    pub speed: SpeedClass,
    pub manufacturer_id: u8,
    pub oem_id: String<2>,
    pub product_name: String<5>,
    pub product_revision_major: u8,
    pub product_revision_minor: u8,
    pub product_serial_number: u32,
    pub manufacturing_month: u8,
    pub manufacturing_year: u16,
}

impl CardInfo {
    pub fn new(
        version: SdVersion,
        capacity: CardCapacity,
        speed: SpeedClass,
        csd: &Csd,
        cid: &Cid,
    ) -> Self {
        let (logical_block_count, logical_block_size) = compute_capacity(csd, capacity);
        Self {
            logical_block_count,
            logical_block_size,
            version,
            capacity,
            speed,
            manufacturer_id: cid.manufacturer_id,
            oem_id: cid.oem_id.clone(),
            product_name: cid.product_name.clone(),
            product_revision_major: cid.revision_major,
            product_revision_minor: cid.revision_minor,
            product_serial_number: cid.serial_number,
            manufacturing_month: cid.manufacturing_month,
            manufacturing_year: cid.manufacturing_year,
        }
    }

    /// Card size in bytes
    pub fn capacity_bytes(&self) -> u64 {
        u64::from(self.logical_block_count) * u64::from(self.logical_block_size)
    }
}

#[cfg(test)]
pub(crate) fn words(bytes: [u8; 16]) -> [u32; 4] {
    let mut out = [0u32; 4];
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        out[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}
