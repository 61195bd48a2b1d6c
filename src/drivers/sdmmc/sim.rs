//! Simulated SDMMC host with an attached SD card
//!
//! Commands complete instantly: responses and data-phase flags are latched
//! inside `send_command`. DMA copies happen at the same time, so DATAEND is
//! pending as soon as a transfer command returns. [`SimEvent`] runs the
//! registered interrupt handler while a caller waits on it.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::rc::Rc;
use std::vec::Vec;

use super::card::{CardCapacity, CardState, SdVersion};
use super::hw::{BusConfig, BusWidth, Command, DataConfig, Direction, Response, SdmmcHw};
use super::regs::*;
use super::{SdCard, SdmmcConfig, SdmmcHost};
use crate::board::{Board, EventFlag, IrqHandler, PinMode, SdPin, WaitTimeout};
use crate::time::Monotonic;

/// R1 READY_FOR_DATA
const R1_READY_FOR_DATA: u32 = 1 << 8;

/// R1 APP_CMD
const R1_APP_CMD: u32 = 1 << 5;

/// RCA published by the simulated card
pub const SIM_RCA: u16 = 0xB368;

/// Failure injected into the next matching command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Next block transfer ends with a data CRC error
    DataCrc,
    /// Next block transfer ends with a data timeout
    DataTimeout,
    /// Next block write ends with a transmit FIFO underrun
    TxUnderrun,
    /// Next block transfer never finishes
    Hang,
    /// The given command index gets no response
    NoResponse(u8),
}

/// A command seen on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimCmd {
    pub index: u8,
    pub arg: u32,
    pub app: bool,
}

/// Static description of the simulated card
#[derive(Debug, Clone)]
pub struct SimCard {
    pub version: SdVersion,
    pub capacity: CardCapacity,
    /// Number of 512-byte blocks the CSD describes
    pub blocks: u32,
    pub csd: [u32; 4],
    pub cid: [u32; 4],
    /// ACMD41 polls before the card reports ready (`u32::MAX` = never)
    pub ready_after: u32,
    /// First CMD3 publishes RCA 0
    pub rca_zero_first: bool,
    /// CMD13 polls spent in programming state after a write
    pub busy_polls: u32,
    pub wide_bus: bool,
    pub uhs: bool,
    pub locked: bool,
}

impl SimCard {
    const CID: [u32; 4] = [0x0353_4453, 0x5531_3647, 0x8012_3456, 0x7800_D501];

    /// SDHC card, CSD 2.0 with C_SIZE 0 (1024 blocks)
    pub fn sdhc() -> Self {
        Self {
            version: SdVersion::V2,
            capacity: CardCapacity::HighExtended,
            blocks: 1024,
            csd: [0x400E_0032, 0x5B59_0000, 0x0000_7F80, 0x0A40_0001],
            cid: Self::CID,
            ready_after: 3,
            rca_zero_first: false,
            busy_polls: 2,
            wide_bus: true,
            uhs: false,
            locked: false,
        }
    }

    /// SDSC card answering CMD8, CSD 1.0 with C_SIZE 15, C_SIZE_MULT 2
    /// and 1024-byte read blocks (512 blocks)
    pub fn sdsc() -> Self {
        Self {
            capacity: CardCapacity::Standard,
            blocks: 512,
            csd: [0x0026_0032, 0x5F5A_8003, 0xC001_7F80, 0x1680_0001],
            ..Self::sdhc()
        }
    }

    /// Version 1.x SDSC card (no CMD8 response)
    pub fn sdsc_v1() -> Self {
        Self {
            version: SdVersion::V1,
            ..Self::sdsc()
        }
    }

    fn sd_status(&self, wide: bool) -> VecDeque<u32> {
        let mut words = [0u32; 16];
        if wide {
            words[0] = 0x0000_0080;
        }
        // Speed class code 4, AU size 9
        words[2] = 0x0190_0004;
        if self.uhs {
            words[3] = 0x0019_0000;
        }
        words.into_iter().collect()
    }

    fn scr(&self) -> VecDeque<u32> {
        let widths = if self.wide_bus { 0x35 } else { 0x31 };
        [u32::from_le_bytes([0x02, widths, 0x80, 0x00]), 0]
            .into_iter()
            .collect()
    }
}

struct SimState {
    card: SimCard,
    powered: bool,
    bus: BusConfig,
    card_wide: bool,
    flags: StatusFlags,
    mask: StatusFlags,
    resp: [u32; 4],
    respcmd: u8,
    cmd_trans: bool,
    cmd_stop: bool,
    data: Option<DataConfig>,
    fifo: VecDeque<u32>,
    idma: Option<NonNull<u8>>,
    state: CardState,
    app: bool,
    rca: u16,
    rca_requests: u32,
    op_cond_polls: u32,
    busy_left: u32,
    storage: HashMap<u32, [u8; 512]>,
    log: Vec<SimCmd>,
    fault: Option<Fault>,
}

fn state_code(state: CardState) -> u32 {
    match state {
        CardState::Idle => 0,
        CardState::Ready => 1,
        CardState::Identification => 2,
        CardState::Standby => 3,
        CardState::Transfer => 4,
        CardState::Sending => 5,
        CardState::Receiving => 6,
        CardState::Programming => 7,
        CardState::Disconnected => 8,
        CardState::Unknown(code) => u32::from(code),
    }
}

impl SimState {
    fn r1(&self, extra: u32) -> u32 {
        let mut status = (state_code(self.state) << R1_CURRENT_STATE_SHIFT) | extra;
        if self.state == CardState::Transfer {
            status |= R1_READY_FOR_DATA;
        }
        if self.card.locked {
            status |= R1_CARD_LOCKED;
        }
        if self.app {
            status |= R1_APP_CMD;
        }
        status
    }

    fn short(&mut self, index: u8, value: u32) {
        self.resp = [value, 0, 0, 0];
        self.respcmd = index;
        self.flags |= StatusFlags::CMDREND;
    }

    fn long(&mut self, words: [u32; 4]) {
        self.resp = words;
        self.respcmd = 0x3F;
        self.flags |= StatusFlags::CMDREND;
    }

    fn illegal(&mut self, index: u8) {
        let status = self.r1(R1_ILLEGAL_CMD);
        self.short(index, status);
    }

    fn enter_programming(&mut self) {
        if self.card.busy_polls == 0 {
            self.state = CardState::Transfer;
        } else {
            self.state = CardState::Programming;
            self.busy_left = self.card.busy_polls;
        }
    }

    fn execute(&mut self, cmd: &Command) {
        let app = core::mem::replace(&mut self.app, false);

        if cmd.response == Response::None {
            match cmd.index {
                MMC_CMD_GO_IDLE_STATE => {
                    self.state = CardState::Idle;
                    self.rca = 0;
                    self.op_cond_polls = 0;
                    self.card_wide = false;
                }
                MMC_CMD_SELECT_CARD if self.state == CardState::Transfer => {
                    self.state = CardState::Standby;
                }
                _ => {}
            }
            self.flags |= StatusFlags::CMDSENT;
            return;
        }

        let index = cmd.index;
        match (app, index) {
            (false, SD_CMD_SEND_IF_COND) => {
                if self.card.version == SdVersion::V1 {
                    self.flags |= StatusFlags::CTIMEOUT;
                } else {
                    self.short(index, cmd.arg & 0xFFF);
                }
            }
            (_, MMC_CMD_APP_CMD) => {
                self.app = true;
                let status = self.r1(0);
                self.short(index, status);
            }
            (true, SD_CMD_APP_SEND_OP_COND) if self.state == CardState::Idle => {
                self.op_cond_polls += 1;
                let mut ocr = 0x00FF_8000;
                if self.op_cond_polls >= self.card.ready_after {
                    ocr |= OCR_BUSY;
                    if self.card.capacity == CardCapacity::HighExtended && cmd.arg & OCR_HCS != 0
                    {
                        ocr |= OCR_HCS;
                    }
                    self.state = CardState::Ready;
                }
                self.resp = [ocr, 0, 0, 0];
                self.respcmd = 0x3F;
                // R3 carries no valid CRC
                self.flags |= StatusFlags::CCRCFAIL;
            }
            (false, MMC_CMD_ALL_SEND_CID) if self.state == CardState::Ready => {
                self.state = CardState::Identification;
                let cid = self.card.cid;
                self.long(cid);
            }
            (false, SD_CMD_SEND_RELATIVE_ADDR)
                if matches!(self.state, CardState::Identification | CardState::Standby) =>
            {
                self.rca_requests += 1;
                self.rca = if self.card.rca_zero_first && self.rca_requests == 1 {
                    0
                } else {
                    SIM_RCA
                };
                let status = state_code(self.state) << R1_CURRENT_STATE_SHIFT;
                self.state = CardState::Standby;
                self.short(index, (u32::from(self.rca) << 16) | status);
            }
            (false, MMC_CMD_SEND_CSD)
                if self.state == CardState::Standby && cmd.arg >> 16 == u32::from(self.rca) =>
            {
                let csd = self.card.csd;
                self.long(csd);
            }
            (false, MMC_CMD_SELECT_CARD)
                if self.state == CardState::Standby
                    && self.rca != 0
                    && cmd.arg >> 16 == u32::from(self.rca) =>
            {
                let status = self.r1(0);
                self.state = CardState::Transfer;
                self.short(index, status);
            }
            (false, MMC_CMD_SEND_STATUS) if cmd.arg >> 16 == u32::from(self.rca) => {
                let status = self.r1(0);
                if self.state == CardState::Programming {
                    self.busy_left = self.busy_left.saturating_sub(1);
                    if self.busy_left == 0 {
                        self.state = CardState::Transfer;
                    }
                }
                self.short(index, status);
            }
            (false, MMC_CMD_SET_BLOCKLEN) if self.state == CardState::Transfer => {
                let status = self.r1(0);
                self.short(index, status);
            }
            (true, SD_CMD_APP_SET_BUS_WIDTH) if self.state == CardState::Transfer => {
                self.card_wide = cmd.arg == SD_BUS_WIDTH_4BIT;
                let status = self.r1(0);
                self.short(index, status);
            }
            (true, SD_CMD_APP_SD_STATUS) if self.state == CardState::Transfer => {
                let status = self.r1(0);
                self.short(index, status);
                self.fifo = self.card.sd_status(self.card_wide);
                self.flags |= StatusFlags::DATAEND | StatusFlags::DBCKEND;
            }
            (true, SD_CMD_APP_SEND_SCR) if self.state == CardState::Transfer => {
                let status = self.r1(0);
                self.short(index, status);
                self.fifo = self.card.scr();
                self.flags |= StatusFlags::DATAEND | StatusFlags::DBCKEND;
            }
            (
                false,
                MMC_CMD_READ_SINGLE_BLOCK
                | MMC_CMD_READ_MULTIPLE_BLOCK
                | MMC_CMD_WRITE_SINGLE_BLOCK
                | MMC_CMD_WRITE_MULTIPLE_BLOCK,
            ) if self.state == CardState::Transfer => self.block_transfer(cmd),
            (false, MMC_CMD_STOP_TRANSMISSION) => {
                let status = self.r1(0);
                match self.state {
                    CardState::Sending => self.state = CardState::Transfer,
                    CardState::Receiving => self.enter_programming(),
                    _ => {}
                }
                self.short(index, status);
            }
            _ => self.illegal(index),
        }
    }

    fn block_transfer(&mut self, cmd: &Command) {
        let index = cmd.index;
        let (first, misaligned) = match self.card.capacity {
            CardCapacity::HighExtended => (cmd.arg, false),
            CardCapacity::Standard => (cmd.arg / 512, cmd.arg % 512 != 0),
        };
        if misaligned {
            let status = self.r1(R1_ADDR_MISALIGNED);
            return self.short(index, status);
        }

        let data = match self.data {
            Some(data) if cmd.trans => data,
            _ => return self.illegal(index),
        };
        let count = data.length / 512;
        if u64::from(first) + u64::from(count) > u64::from(self.card.blocks) {
            let status = self.r1(R1_ADDR_OUT_OF_RANGE);
            return self.short(index, status);
        }

        let status = self.r1(0);
        self.short(index, status);

        match self.fault.take() {
            Some(Fault::DataCrc) => {
                self.flags |= StatusFlags::DCRCFAIL;
                return;
            }
            Some(Fault::DataTimeout) => {
                self.flags |= StatusFlags::DTIMEOUT;
                return;
            }
            Some(Fault::TxUnderrun) if data.direction == Direction::ToCard => {
                self.flags |= StatusFlags::TXUNDERR;
                return;
            }
            Some(Fault::Hang) => return,
            other => self.fault = other,
        }

        let Some(buffer) = self.idma else {
            self.flags |= StatusFlags::IDMATE;
            return;
        };

        for i in 0..count {
            // Safety: the driver hands the IDMA a buffer of at least
            // `data.length` bytes that stays borrowed for the transfer
            let ptr = unsafe { buffer.as_ptr().add(i as usize * 512) };
            match data.direction {
                Direction::ToHost => {
                    let block = self
                        .storage
                        .get(&(first + i))
                        .copied()
                        .unwrap_or([0; 512]);
                    unsafe { core::ptr::copy_nonoverlapping(block.as_ptr(), ptr, 512) };
                }
                Direction::ToCard => {
                    let mut block = [0u8; 512];
                    unsafe { core::ptr::copy_nonoverlapping(ptr, block.as_mut_ptr(), 512) };
                    self.storage.insert(first + i, block);
                }
            }
        }

        self.state = match index {
            MMC_CMD_READ_MULTIPLE_BLOCK => CardState::Sending,
            MMC_CMD_WRITE_MULTIPLE_BLOCK => CardState::Receiving,
            _ => CardState::Transfer,
        };
        if index == MMC_CMD_WRITE_SINGLE_BLOCK {
            self.enter_programming();
        }
        self.flags |= StatusFlags::DATAEND | StatusFlags::DBCKEND;
    }
}

/// Simulated SDMMC peripheral
pub struct SimSdmmc {
    state: RefCell<SimState>,
    touches: Cell<usize>,
}

impl SimSdmmc {
    pub fn new(card: SimCard) -> Self {
        Self {
            state: RefCell::new(SimState {
                card,
                powered: false,
                bus: BusConfig {
                    clock_div: 0,
                    bus_width: BusWidth::One,
                    power_save: false,
                },
                card_wide: false,
                flags: StatusFlags::empty(),
                mask: StatusFlags::empty(),
                resp: [0; 4],
                respcmd: 0,
                cmd_trans: false,
                cmd_stop: false,
                data: None,
                fifo: VecDeque::new(),
                idma: None,
                state: CardState::Idle,
                app: false,
                rca: 0,
                rca_requests: 0,
                op_cond_polls: 0,
                busy_left: 0,
                storage: HashMap::new(),
                log: Vec::new(),
                fault: None,
            }),
            touches: Cell::new(0),
        }
    }

    fn touch(&self) {
        self.touches.set(self.touches.get() + 1);
    }

    /// Number of register operations performed so far
    pub fn touches(&self) -> usize {
        self.touches.get()
    }

    /// Skip bring-up: powered, selected, in transfer state
    pub fn force_selected(&self) {
        let mut st = self.state.borrow_mut();
        st.powered = true;
        st.rca = SIM_RCA;
        st.state = CardState::Transfer;
    }

    pub fn inject(&self, fault: Fault) {
        self.state.borrow_mut().fault = Some(fault);
    }

    pub fn store_block(&self, block: u32, data: &[u8; 512]) {
        self.state.borrow_mut().storage.insert(block, *data);
    }

    pub fn block(&self, block: u32) -> [u8; 512] {
        self.state
            .borrow()
            .storage
            .get(&block)
            .copied()
            .unwrap_or([0; 512])
    }

    /// Every command seen, oldest first
    pub fn log(&self) -> Vec<SimCmd> {
        self.state.borrow().log.clone()
    }

    /// Command indices seen, oldest first
    pub fn commands(&self) -> Vec<u8> {
        self.state.borrow().log.iter().map(|c| c.index).collect()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }

    pub fn card_state(&self) -> CardState {
        self.state.borrow().state
    }

    /// Whether the card itself was switched to a 4-bit bus
    pub fn card_wide(&self) -> bool {
        self.state.borrow().card_wide
    }

    pub fn idma_enabled(&self) -> bool {
        self.state.borrow().idma.is_some()
    }

    /// Buffer address the IDMA is programmed with
    pub fn idma_address(&self) -> Option<usize> {
        self.state.borrow().idma.map(|buf| buf.as_ptr() as usize)
    }

    /// An unmasked interrupt source is pending
    pub fn irq_pending(&self) -> bool {
        let st = self.state.borrow();
        st.flags.intersects(st.mask)
    }
}

impl SdmmcHw for SimSdmmc {
    fn configure_bus(&self, config: BusConfig) {
        self.touch();
        self.state.borrow_mut().bus = config;
    }

    fn bus_config(&self) -> BusConfig {
        self.state.borrow().bus
    }

    fn set_power(&self, on: bool) {
        self.touch();
        self.state.borrow_mut().powered = on;
    }

    fn is_powered(&self) -> bool {
        self.state.borrow().powered
    }

    fn send_command(&self, cmd: &Command) {
        self.touch();
        let mut st = self.state.borrow_mut();
        let app = st.app;
        st.log.push(SimCmd {
            index: cmd.index,
            arg: cmd.arg,
            app,
        });
        st.cmd_trans = cmd.trans;
        st.cmd_stop = cmd.stop;

        if !st.powered {
            return;
        }
        if st.fault == Some(Fault::NoResponse(cmd.index)) {
            st.fault = None;
            st.app = false;
            if cmd.response != Response::None {
                st.flags |= StatusFlags::CTIMEOUT;
            }
            return;
        }
        st.execute(cmd);
    }

    fn response(&self, n: usize) -> u32 {
        self.state.borrow().resp[n & 3]
    }

    fn response_command(&self) -> u8 {
        self.state.borrow().respcmd
    }

    fn flags(&self) -> StatusFlags {
        let st = self.state.borrow();
        let mut flags = st.flags;
        if st.fifo.is_empty() {
            flags |= StatusFlags::RXFIFOE;
        } else {
            flags |= StatusFlags::DPSMACT;
        }
        if st.fifo.len() >= 8 {
            flags |= StatusFlags::RXFIFOHF;
        }
        flags
    }

    fn clear_flags(&self, flags: StatusFlags) {
        self.touch();
        self.state.borrow_mut().flags &= !flags;
    }

    fn enable_interrupts(&self, flags: StatusFlags) {
        self.touch();
        self.state.borrow_mut().mask |= flags;
    }

    fn disable_interrupts(&self, flags: StatusFlags) {
        self.touch();
        self.state.borrow_mut().mask &= !flags;
    }

    fn configure_data(&self, config: &DataConfig) {
        self.touch();
        self.state.borrow_mut().data = Some(*config);
    }

    fn clear_data_control(&self) {
        self.touch();
        self.state.borrow_mut().data = None;
    }

    fn reset_fifo(&self) {
        self.touch();
        self.state.borrow_mut().fifo.clear();
    }

    fn read_fifo(&self) -> u32 {
        self.touch();
        self.state.borrow_mut().fifo.pop_front().unwrap_or(0)
    }

    fn set_idma(&self, buffer: Option<NonNull<u8>>) {
        self.touch();
        self.state.borrow_mut().idma = buffer;
    }

    fn set_cmd_trans(&self, on: bool) {
        self.touch();
        self.state.borrow_mut().cmd_trans = on;
    }

    fn set_cmd_stop(&self, on: bool) {
        self.touch();
        self.state.borrow_mut().cmd_stop = on;
    }
}

/// Clock that moves forward 10 µs every time it is read
pub struct SimClock(Cell<u64>);

impl SimClock {
    pub fn new() -> Self {
        Self(Cell::new(0))
    }

    pub fn advance(&self, us: u64) {
        self.0.set(self.0.get() + us);
    }
}

impl Monotonic for SimClock {
    fn now_us(&self) -> u64 {
        let now = self.0.get();
        self.0.set(now + 10);
        now
    }
}

type IrqLine = Rc<Cell<Option<&'static dyn IrqHandler>>>;

/// Event flag that runs the pending interrupt handler while waiting
pub struct SimEvent {
    bits: Cell<u32>,
    hw: &'static SimSdmmc,
    clock: &'static SimClock,
    line: IrqLine,
}

impl EventFlag for SimEvent {
    fn wait(&self, mask: u32, timeout_ms: u32) -> Result<u32, WaitTimeout> {
        let deadline = self.clock.now_us() + u64::from(timeout_ms) * 1000;
        loop {
            if let Some(isr) = self.line.get() {
                if self.hw.irq_pending() {
                    isr.on_interrupt();
                }
            }
            let hit = self.bits.get() & mask;
            if hit != 0 {
                self.bits.set(self.bits.get() & !hit);
                return Ok(hit);
            }
            if self.clock.now_us() >= deadline {
                return Err(WaitTimeout);
            }
        }
    }

    fn set(&self, mask: u32) {
        self.bits.set(self.bits.get() | mask);
    }

    fn clear(&self, mask: u32) {
        self.bits.set(self.bits.get() & !mask);
    }
}

/// Observable board state
#[derive(Debug, Default)]
pub struct BoardState {
    pub pins: HashMap<u8, PinMode>,
    pub card_power: bool,
    pub bus_enabled: bool,
    pub detect_level_low: bool,
    pub detect_callback: bool,
    pub isr_attached: bool,
    pub isr_attachments: usize,
}

impl BoardState {
    pub fn pin(&self, pin: SdPin) -> Option<PinMode> {
        self.pins.get(&(pin as u8)).copied()
    }
}

/// Board whose state is shared with the test
#[derive(Clone)]
pub struct SimBoard {
    state: Rc<RefCell<BoardState>>,
    clock: &'static SimClock,
    line: IrqLine,
    kernel_hz: u32,
}

impl Board for SimBoard {
    fn configure_pin(&mut self, pin: SdPin, mode: PinMode) {
        self.state.borrow_mut().pins.insert(pin as u8, mode);
    }

    fn set_card_power(&mut self, on: bool) {
        self.state.borrow_mut().card_power = on;
    }

    fn card_detected(&self) -> bool {
        self.state.borrow().detect_level_low
    }

    fn set_detect_callback(&mut self, callback: Option<&'static (dyn Fn() + Sync)>) {
        self.state.borrow_mut().detect_callback = callback.is_some();
    }

    fn enable_bus(&mut self) {
        self.state.borrow_mut().bus_enabled = true;
    }

    fn disable_bus(&mut self) {
        self.state.borrow_mut().bus_enabled = false;
    }

    fn kernel_clock_hz(&self) -> u32 {
        self.kernel_hz
    }

    fn set_isr(&mut self, handler: Option<&'static dyn IrqHandler>) {
        let mut st = self.state.borrow_mut();
        st.isr_attached = handler.is_some();
        if handler.is_some() {
            st.isr_attachments += 1;
        }
        self.line.set(handler);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock.advance(u64::from(ms) * 1000);
    }

    fn delay_us(&mut self, us: u32) {
        self.clock.advance(u64::from(us));
    }
}

pub type SimHost = SdmmcHost<&'static SimSdmmc, SimEvent, &'static SimClock>;

pub type SimSdCard = SdCard<&'static SimSdmmc, SimEvent, &'static SimClock, SimBoard>;

/// Host, card, clock and board wired together
pub struct SimRig {
    pub hw: &'static SimSdmmc,
    pub clock: &'static SimClock,
    pub host: &'static SimHost,
    pub board: SimBoard,
    line: IrqLine,
}

impl SimRig {
    /// Kernel clock of the simulated board (48 MHz)
    pub const KERNEL_HZ: u32 = 48_000_000;

    pub fn new(card: SimCard) -> Self {
        let hw: &'static SimSdmmc = Box::leak(Box::new(SimSdmmc::new(card)));
        let clock: &'static SimClock = Box::leak(Box::new(SimClock::new()));
        let line: IrqLine = Rc::new(Cell::new(None));
        let event = SimEvent {
            bits: Cell::new(0),
            hw,
            clock,
            line: line.clone(),
        };
        let host: &'static SimHost = Box::leak(Box::new(SdmmcHost::new(hw, event, clock)));
        let board = SimBoard {
            state: Rc::new(RefCell::new(BoardState {
                detect_level_low: true,
                ..BoardState::default()
            })),
            clock,
            line: line.clone(),
            kernel_hz: Self::KERNEL_HZ,
        };
        Self {
            hw,
            clock,
            host,
            board,
            line,
        }
    }

    /// A rig whose card is already selected and in transfer state
    pub fn selected(card: SimCard) -> Self {
        let rig = Self::new(card);
        rig.hw.force_selected();
        rig
    }

    /// Route the interrupt line to the host directly
    pub fn attach_isr(&self) {
        self.line.set(Some(self.host));
    }

    pub fn board_state(&self) -> std::cell::Ref<'_, BoardState> {
        self.board.state.borrow()
    }

    pub fn sd_card(&self, config: SdmmcConfig) -> SimSdCard {
        SdCard::new(self.host, self.board.clone(), config)
    }
}
