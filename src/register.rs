//! W5500 register addressing.
//!
//! The chip exposes 32 address blocks. Block 0 holds the common registers;
//! each socket `n` owns block `4n + 1` (registers), `4n + 2` (TX buffer) and
//! `4n + 3` (RX buffer). A [`Register`] carries its domain and its offset in
//! the block, the socket index is only supplied when a frame is built.

use crate::error::{Fault, Phase};

/// Default bound for [`RegisterBus::read_u16_stable`].
pub const STABLE_READ_LIMIT: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Common,
    Socket,
    TxBuffer,
    RxBuffer,
}

impl Domain {
    /// Multiplier applied to the socket index.
    fn socket_multiplier(self) -> u8 {
        match self {
            Domain::Common => 0,
            _ => 1,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Domain::Common => 0,
            Domain::Socket => 1,
            Domain::TxBuffer => 2,
            Domain::RxBuffer => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub domain: Domain,
    pub offset: u16,
}

impl Register {
    // Common register block
    pub const MR: Register = Register::common(0x0000);
    pub const GAR: Register = Register::common(0x0001);
    pub const SUBR: Register = Register::common(0x0005);
    pub const SHAR: Register = Register::common(0x0009);
    pub const SIPR: Register = Register::common(0x000f);
    pub const INTLEVEL: Register = Register::common(0x0013);
    pub const IR: Register = Register::common(0x0015);
    pub const IMR: Register = Register::common(0x0016);
    pub const SIR: Register = Register::common(0x0017);
    pub const SIMR: Register = Register::common(0x0018);
    pub const RTR: Register = Register::common(0x0019);
    pub const RCR: Register = Register::common(0x001b);
    pub const PHYCFGR: Register = Register::common(0x002e);
    pub const VERSIONR: Register = Register::common(0x0039);

    // Socket register block
    pub const SN_MR: Register = Register::socket(0x0000);
    pub const SN_CR: Register = Register::socket(0x0001);
    pub const SN_IR: Register = Register::socket(0x0002);
    pub const SN_SR: Register = Register::socket(0x0003);
    pub const SN_PORT: Register = Register::socket(0x0004);
    pub const SN_DHAR: Register = Register::socket(0x0006);
    pub const SN_DIPR: Register = Register::socket(0x000c);
    pub const SN_DPORT: Register = Register::socket(0x0010);
    pub const SN_MSSR: Register = Register::socket(0x0012);
    pub const SN_TOS: Register = Register::socket(0x0015);
    pub const SN_TTL: Register = Register::socket(0x0016);
    pub const SN_RXBUF_SIZE: Register = Register::socket(0x001e);
    pub const SN_TXBUF_SIZE: Register = Register::socket(0x001f);
    pub const SN_TX_FSR: Register = Register::socket(0x0020);
    pub const SN_TX_RD: Register = Register::socket(0x0022);
    pub const SN_TX_WR: Register = Register::socket(0x0024);
    pub const SN_RX_RSR: Register = Register::socket(0x0026);
    pub const SN_RX_RD: Register = Register::socket(0x0028);
    pub const SN_RX_WR: Register = Register::socket(0x002a);
    pub const SN_IMR: Register = Register::socket(0x002c);
    pub const SN_FRAG: Register = Register::socket(0x002d);
    pub const SN_KPALVTR: Register = Register::socket(0x002f);

    // Socket buffers
    pub const TX_BUF: Register = Register {
        domain: Domain::TxBuffer,
        offset: 0,
    };
    pub const RX_BUF: Register = Register {
        domain: Domain::RxBuffer,
        offset: 0,
    };

    const fn common(offset: u16) -> Self {
        Self {
            domain: Domain::Common,
            offset,
        }
    }

    const fn socket(offset: u16) -> Self {
        Self {
            domain: Domain::Socket,
            offset,
        }
    }

    /// Same block, `by` bytes further. Wraps at 64 KiB like the chip's
    /// buffer pointers do.
    pub fn offset_by(self, by: u16) -> Self {
        Self {
            domain: self.domain,
            offset: self.offset.wrapping_add(by),
        }
    }

    /// 5-bit block select for socket `socket`. Ignored for common registers.
    pub fn block(self, socket: u8) -> u8 {
        ((self.domain.socket_multiplier() * socket) << 2) + self.domain.bit()
    }

    /// Control byte of a SPI frame accessing `len` bytes.
    pub fn control(self, socket: u8, write: bool, len: usize) -> u8 {
        let rw = if write { 1 << 2 } else { 0 };
        (self.block(socket) << 3) | rw | length_hint(len)
    }

    /// The three header bytes sent before the data phase.
    pub fn frame_head(self, socket: u8, write: bool, len: usize) -> [u8; 3] {
        let [hi, lo] = self.offset.to_be_bytes();
        [hi, lo, self.control(socket, write, len)]
    }
}

/// Operation mode bits: fixed 1/2/4 byte frames, anything else is variable
/// length and ends when chip select is released.
fn length_hint(len: usize) -> u8 {
    match len {
        1 => 1,
        2 => 2,
        4 => 3,
        _ => 0,
    }
}

/// Register-level access to the offload controller.
pub trait RegisterBus {
    fn read(&mut self, reg: Register, socket: u8, dst: &mut [u8]) -> Result<(), Fault>;

    fn write(&mut self, reg: Register, socket: u8, src: &[u8]) -> Result<(), Fault>;

    fn stable_read_limit(&self) -> u32 {
        STABLE_READ_LIMIT
    }

    fn read_u8(&mut self, reg: Register, socket: u8) -> Result<u8, Fault> {
        let mut buf = [0u8; 1];
        self.read(reg, socket, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self, reg: Register, socket: u8) -> Result<u16, Fault> {
        let mut buf = [0u8; 2];
        self.read(reg, socket, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn write_u8(&mut self, reg: Register, socket: u8, value: u8) -> Result<(), Fault> {
        self.write(reg, socket, &[value])
    }

    fn write_u16(&mut self, reg: Register, socket: u8, value: u16) -> Result<(), Fault> {
        self.write(reg, socket, &value.to_be_bytes())
    }

    /// Reads a 16-bit register until two consecutive reads agree.
    ///
    /// Buffer management registers are updated by the chip while we clock
    /// them out, so a single read may be torn.
    fn read_u16_stable(&mut self, reg: Register, socket: u8) -> Result<u16, Fault> {
        let mut last = self.read_u16(reg, socket)?;
        for _ in 0..self.stable_read_limit() {
            let value = self.read_u16(reg, socket)?;
            if value == last {
                return Ok(value);
            }
            last = value;
        }
        log::warn!("register {:?} never settled (last {:#06x})", reg, last);
        Err(Fault::Timeout {
            during: Phase::StableRead,
        })
    }
}
