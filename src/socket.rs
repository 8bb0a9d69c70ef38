use core::cell::RefCell;
use core::cmp::min;

use embedded_hal::watchdog::Watchdog;

use crate::config::PollLimits;
use crate::error::{Fault, Phase};
use crate::register::{Register, RegisterBus};

/// Number of hardware sockets in the controller.
pub const MAX_SOCKETS: u8 = 8;

/// Sn_MR protocol field for TCP.
const MODE_TCP: u8 = 0x01;
/// Sn_IR bit set once a connection has been established.
const IR_CON: u8 = 0x01;

/// Values of the socket status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Closed,
    Init,
    Listen,
    SynSent,
    SynRecv,
    Established,
    FinWait,
    /// Not in the datasheet, met transiently while connecting.
    Undocumented19,
    Closing,
    TimeWait,
    CloseWait,
    LastAck,
    Udp,
    MacRaw,
    /// Not in the datasheet.
    Syn,
    /// Not in the datasheet, met regularly while accepting.
    SynAck,
    Unknown(u8),
}

impl From<u8> for Status {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Status::Closed,
            0x10 => Status::Syn,
            0x11 => Status::SynAck,
            0x13 => Status::Init,
            0x14 => Status::Listen,
            0x15 => Status::SynSent,
            0x16 => Status::SynRecv,
            0x17 => Status::Established,
            0x18 => Status::FinWait,
            0x19 => Status::Undocumented19,
            0x1a => Status::Closing,
            0x1b => Status::TimeWait,
            0x1c => Status::CloseWait,
            0x1d => Status::LastAck,
            0x22 => Status::Udp,
            0x42 => Status::MacRaw,
            other => Status::Unknown(other),
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        match status {
            Status::Closed => 0x00,
            Status::Syn => 0x10,
            Status::SynAck => 0x11,
            Status::Init => 0x13,
            Status::Listen => 0x14,
            Status::SynSent => 0x15,
            Status::SynRecv => 0x16,
            Status::Established => 0x17,
            Status::FinWait => 0x18,
            Status::Undocumented19 => 0x19,
            Status::Closing => 0x1a,
            Status::TimeWait => 0x1b,
            Status::CloseWait => 0x1c,
            Status::LastAck => 0x1d,
            Status::Udp => 0x22,
            Status::MacRaw => 0x42,
            Status::Unknown(other) => other,
        }
    }
}

/// Values of the socket command register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Open = 0x01,
    Listen = 0x02,
    Connect = 0x04,
    Disconnect = 0x08,
    Close = 0x10,
    Send = 0x20,
    SendMac = 0x21,
    SendKeep = 0x22,
    Recv = 0x40,
}

/// Result of an outgoing connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Established,
    /// The peer accepted then closed before we looked. Only data already in
    /// the RX buffer can still be drained, through [`Socket::read_avail`].
    ClosedByPeer,
    Refused,
}

impl Connection {
    pub fn is_connected(&self) -> bool {
        !matches!(self, Connection::Refused)
    }
}

fn unexpected(state: Status, during: Phase) -> Fault {
    log::error!("unexpected socket status {:?} during {:?}", state, during);
    Fault::UnexpectedState { state, during }
}

/// One hardware TCP socket. The connection state only lives in the
/// controller and is read back on demand.
pub struct Socket<'dev, Bus>
    where Bus: RegisterBus
{
    dev: &'dev RefCell<Bus>,
    no: u8,
    limits: PollLimits,
}

impl<'dev, Bus> Socket<'dev, Bus>
    where Bus: RegisterBus
{
    pub fn new(dev: &'dev RefCell<Bus>, no: u8) -> Result<Self, Fault> {
        if no >= MAX_SOCKETS {
            return Err(Fault::InvalidSocket(no));
        }
        Ok(Self {
            dev,
            no,
            limits: PollLimits::default(),
        })
    }

    pub fn with_limits(mut self, limits: PollLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn number(&self) -> u8 {
        self.no
    }

    pub fn status(&self) -> Result<Status, Fault> {
        let raw = self.dev.borrow_mut().read_u8(Register::SN_SR, self.no)?;
        Ok(Status::from(raw))
    }

    fn command(&self, command: Command) -> Result<(), Fault> {
        log::debug!("socket {} <- {:?}", self.no, command);
        self.dev
            .borrow_mut()
            .write_u8(Register::SN_CR, self.no, command as u8)
    }

    fn expect(&self, expected: Status, during: Phase) -> Result<(), Fault> {
        match self.status()? {
            state if state == expected => Ok(()),
            state => Err(unexpected(state, during)),
        }
    }

    fn open_tcp(&self, source_port: u16, during: Phase) -> Result<(), Fault> {
        self.expect(Status::Closed, during)?;
        {
            let mut dev = self.dev.borrow_mut();
            dev.write_u8(Register::SN_MR, self.no, MODE_TCP)?;
            dev.write_u16(Register::SN_PORT, self.no, source_port)?;
        }
        self.command(Command::Open)?;
        self.expect(Status::Init, Phase::Open)
    }

    /// Waits for an incoming connection on `port`.
    ///
    /// Returns `false` if the attempt ended with the socket closed. A peer
    /// that already asked to close (CLOSE_WAIT) counts as connected, there
    /// may be data waiting.
    pub fn listen<W: Watchdog>(&self, port: u16, watchdog: &mut W) -> Result<bool, Fault> {
        self.open_tcp(port, Phase::Listen)?;
        self.command(Command::Listen)?;
        for _ in 0..self.limits.accept {
            match self.status()? {
                Status::Listen | Status::SynRecv | Status::SynAck => {}
                Status::CloseWait | Status::Established => return Ok(true),
                Status::Closed => return Ok(false),
                state => return Err(unexpected(state, Phase::Listen)),
            }
            watchdog.feed();
        }
        Err(Fault::Timeout {
            during: Phase::Listen,
        })
    }

    /// Connects to `ip:port`, using `port` as source port too.
    pub fn connect(&self, ip: [u8; 4], port: u16) -> Result<Connection, Fault> {
        self.open_tcp(port, Phase::Connect)?;
        {
            let mut dev = self.dev.borrow_mut();
            dev.write_u8(Register::SN_IR, self.no, 0xff)?;
            dev.write_u16(Register::SN_DPORT, self.no, port)?;
            dev.write(Register::SN_DIPR, self.no, &ip)?;
        }
        self.command(Command::Connect)?;
        for _ in 0..self.limits.transition {
            match self.status()? {
                Status::Undocumented19 | Status::Init | Status::Syn | Status::SynSent => {}
                Status::Established => return Ok(Connection::Established),
                Status::Closed => {
                    let ir = self.dev.borrow_mut().read_u8(Register::SN_IR, self.no)?;
                    return if ir & IR_CON != 0 {
                        log::warn!("socket {} closed right after connecting", self.no);
                        Ok(Connection::ClosedByPeer)
                    } else {
                        Ok(Connection::Refused)
                    };
                }
                state => return Err(unexpected(state, Phase::Connect)),
            }
        }
        Err(Fault::Timeout {
            during: Phase::Connect,
        })
    }

    /// Queues `data` and sends it. The whole payload must fit in the free
    /// TX space, there is no partial write. Free space must exceed the
    /// payload, so an empty write still needs at least one free byte.
    pub fn write(&self, data: &[u8]) -> Result<(), Fault> {
        {
            let mut dev = self.dev.borrow_mut();
            let free = dev.read_u16_stable(Register::SN_TX_FSR, self.no)?;
            if usize::from(free) <= data.len() {
                log::error!("socket {}: {} bytes do not fit in {}", self.no, data.len(), free);
                return Err(Fault::TxBufferFull {
                    free,
                    requested: data.len(),
                });
            }
            let pointer = dev.read_u16_stable(Register::SN_TX_WR, self.no)?;
            dev.write(Register::TX_BUF.offset_by(pointer), self.no, data)?;
            dev.write_u16(
                Register::SN_TX_WR,
                self.no,
                pointer.wrapping_add(data.len() as u16),
            )?;
        }
        self.command(Command::Send)
    }

    pub fn print(&self, text: &str) -> Result<(), Fault> {
        self.write(text.as_bytes())
    }

    /// Number of received bytes waiting in the RX buffer.
    pub fn avail(&self) -> Result<u16, Fault> {
        self.dev
            .borrow_mut()
            .read_u16_stable(Register::SN_RX_RSR, self.no)
    }

    /// Fills `dst` completely. While nothing is pending the connection must
    /// stay ESTABLISHED.
    pub fn read_exact(&self, dst: &mut [u8]) -> Result<usize, Fault> {
        let mut received = 0;
        let mut idle = 0;
        while received < dst.len() {
            let n = min(usize::from(self.avail()?), dst.len() - received);
            if n > 0 {
                {
                    let mut dev = self.dev.borrow_mut();
                    let pointer = dev.read_u16(Register::SN_RX_RD, self.no)?;
                    dev.read(
                        Register::RX_BUF.offset_by(pointer),
                        self.no,
                        &mut dst[received..received + n],
                    )?;
                    dev.write_u16(
                        Register::SN_RX_RD,
                        self.no,
                        pointer.wrapping_add(n as u16),
                    )?;
                }
                self.command(Command::Recv)?;
                received += n;
            } else {
                match self.status()? {
                    Status::Established => {}
                    state => return Err(unexpected(state, Phase::Read)),
                }
                idle += 1;
                if idle >= self.limits.read_idle {
                    return Err(Fault::Timeout {
                        during: Phase::Read,
                    });
                }
            }
        }
        Ok(received)
    }

    /// Reads whatever is already received, up to `dst.len()` bytes.
    pub fn read_avail(&self, dst: &mut [u8]) -> Result<usize, Fault> {
        let n = min(dst.len(), usize::from(self.avail()?));
        self.read_exact(&mut dst[..n])
    }

    pub fn close(&self) -> Result<(), Fault> {
        self.command(Command::Close)?;
        self.expect(Status::Closed, Phase::Close)
    }

    /// Gracefully terminates the connection and waits for CLOSED.
    pub fn disconnect(&self) -> Result<(), Fault> {
        self.command(Command::Disconnect)?;
        for _ in 0..self.limits.transition {
            match self.status()? {
                Status::Closing | Status::TimeWait | Status::FinWait => {}
                Status::Closed => return Ok(()),
                state => return Err(unexpected(state, Phase::Disconnect)),
            }
        }
        Err(Fault::Timeout {
            during: Phase::Disconnect,
        })
    }
}
