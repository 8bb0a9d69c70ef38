//! Fakes standing in for the board peripherals in unit tests.

use core::convert::Infallible;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::rng;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial;
use embedded_hal::watchdog::Watchdog;

use crate::error::Fault;
use crate::protocol::{Pin, ACK_BAD_PIN, ACK_KEY_LOCKED, ACK_OK, BLOCK_SIZE, PIN_LENGTH};
use crate::register::{Register, RegisterBus};
use crate::ring_buffer::Producer;
use crate::serial::UsartConfig;
use crate::socket::{Command, Status, MAX_SOCKETS};

// ----------------------------------------------------------------------------
// Bus level
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wire {
    CsLow,
    CsHigh,
    RstLow,
    RstHigh,
    Mosi(u8),
    Delay(u32),
}

/// Shared recorder for everything the driver puts on the wires.
#[derive(Clone, Default)]
pub struct Bench {
    log: Rc<RefCell<Vec<Wire>>>,
    miso: Rc<RefCell<VecDeque<u8>>>,
}

impl Bench {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spi(&self) -> MockSpi {
        MockSpi(self.clone())
    }

    pub fn cs(&self) -> MockPin {
        MockPin {
            bench: self.clone(),
            low: Wire::CsLow,
            high: Wire::CsHigh,
        }
    }

    pub fn reset(&self) -> MockPin {
        MockPin {
            bench: self.clone(),
            low: Wire::RstLow,
            high: Wire::RstHigh,
        }
    }

    pub fn delay(&self) -> MockDelay {
        MockDelay(self.clone())
    }

    /// Queues bytes the device answers with, one per clocked byte.
    pub fn miso(&self, bytes: &[u8]) {
        self.miso.borrow_mut().extend(bytes.iter().copied());
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn wire(&self) -> Vec<Wire> {
        self.log.borrow().clone()
    }

    pub fn mosi(&self) -> Vec<u8> {
        self.log
            .borrow()
            .iter()
            .filter_map(|wire| match wire {
                Wire::Mosi(byte) => Some(*byte),
                _ => None,
            })
            .collect()
    }

    fn record(&self, wire: Wire) {
        self.log.borrow_mut().push(wire);
    }
}

pub struct MockSpi(Bench);

impl Transfer<u8> for MockSpi {
    type Error = Infallible;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        for word in words.iter_mut() {
            self.0.record(Wire::Mosi(*word));
            *word = self.0.miso.borrow_mut().pop_front().unwrap_or(0);
        }
        Ok(words)
    }
}

pub struct MockPin {
    bench: Bench,
    low: Wire,
    high: Wire,
}

impl OutputPin for MockPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.bench.record(self.low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.bench.record(self.high);
        Ok(())
    }
}

pub struct MockDelay(Bench);

impl DelayMs<u32> for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.record(Wire::Delay(ms));
    }
}

#[derive(Default)]
pub struct FeedCounter(pub u32);

impl Watchdog for FeedCounter {
    fn feed(&mut self) {
        self.0 += 1;
    }
}

/// Deterministic "random" bytes: 1, 2, 3...
#[derive(Default)]
pub struct CountingRng(pub u8);

impl rng::Read for CountingRng {
    type Error = Infallible;

    fn read(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        for byte in buf.iter_mut() {
            self.0 = self.0.wrapping_add(1);
            *byte = self.0;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Register level
// ----------------------------------------------------------------------------

type Hook = fn(&mut FakeChip);

/// Register file of a W5500 with scripted status and buffer pointers.
///
/// Sn_SR reads come from a script whose last entry sticks. Sn_IR is write-1
/// to clear. RECV recomputes Sn_RX_RSR from the RX pointers like the chip
/// does.
pub struct FakeChip {
    mem: BTreeMap<(u8, u16), u8>,
    status: VecDeque<u8>,
    scripted: BTreeMap<(u8, u16), VecDeque<u16>>,
    reads: BTreeMap<(u8, u16), usize>,
    commands: Vec<(u8, u8)>,
    hooks: Vec<(u8, Hook)>,
}

impl FakeChip {
    pub fn new() -> Self {
        let mut chip = Self {
            mem: BTreeMap::new(),
            status: VecDeque::new(),
            scripted: BTreeMap::new(),
            reads: BTreeMap::new(),
            commands: Vec::new(),
            hooks: Vec::new(),
        };
        for socket in 0..MAX_SOCKETS {
            chip.set_u16(Register::SN_TX_FSR, socket, 0x0800);
        }
        chip
    }

    fn key(reg: Register, socket: u8) -> (u8, u16) {
        (reg.block(socket), reg.offset)
    }

    pub fn script_status(&mut self, statuses: &[Status]) {
        self.status = statuses.iter().map(|status| u8::from(*status)).collect();
    }

    pub fn script_u16(&mut self, reg: Register, socket: u8, values: &[u16]) {
        self.scripted
            .insert(Self::key(reg, socket), values.iter().copied().collect());
    }

    pub fn on_command(&mut self, command: u8, hook: Hook) {
        self.hooks.push((command, hook));
    }

    pub fn reads_of(&self, reg: Register, socket: u8) -> usize {
        self.reads.get(&Self::key(reg, socket)).copied().unwrap_or(0)
    }

    pub fn commands(&self, socket: u8) -> Vec<u8> {
        self.commands
            .iter()
            .filter(|(no, _)| *no == socket)
            .map(|(_, command)| *command)
            .collect()
    }

    pub fn set_bytes(&mut self, reg: Register, socket: u8, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            let reg = reg.offset_by(i as u16);
            self.mem.insert(Self::key(reg, socket), *byte);
        }
    }

    pub fn get_bytes(&self, reg: Register, socket: u8, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let reg = reg.offset_by(i as u16);
                self.mem.get(&Self::key(reg, socket)).copied().unwrap_or(0)
            })
            .collect()
    }

    pub fn set_u8(&mut self, reg: Register, socket: u8, value: u8) {
        self.set_bytes(reg, socket, &[value]);
    }

    pub fn get_u8(&self, reg: Register, socket: u8) -> u8 {
        self.get_bytes(reg, socket, 1)[0]
    }

    pub fn set_u16(&mut self, reg: Register, socket: u8, value: u16) {
        self.set_bytes(reg, socket, &value.to_be_bytes());
    }

    pub fn get_u16(&self, reg: Register, socket: u8) -> u16 {
        let bytes = self.get_bytes(reg, socket, 2);
        u16::from_be_bytes([bytes[0], bytes[1]])
    }

    /// Makes `data` arrive on `socket`, after anything not read yet.
    pub fn load_rx(&mut self, socket: u8, data: &[u8]) {
        let write = self.get_u16(Register::SN_RX_WR, socket);
        self.set_bytes(Register::RX_BUF.offset_by(write), socket, data);
        self.set_u16(
            Register::SN_RX_WR,
            socket,
            write.wrapping_add(data.len() as u16),
        );
        self.update_rx_size(socket);
    }

    /// Everything sent on `socket` so far.
    pub fn sent(&self, socket: u8) -> Vec<u8> {
        let len = self.get_u16(Register::SN_TX_WR, socket);
        self.get_bytes(Register::TX_BUF, socket, usize::from(len))
    }

    fn update_rx_size(&mut self, socket: u8) {
        let write = self.get_u16(Register::SN_RX_WR, socket);
        let read = self.get_u16(Register::SN_RX_RD, socket);
        self.set_u16(Register::SN_RX_RSR, socket, write.wrapping_sub(read));
    }

    fn next_scripted(queue: &mut VecDeque<u16>) -> Option<u16> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        }
    }
}

impl RegisterBus for FakeChip {
    fn read(&mut self, reg: Register, socket: u8, dst: &mut [u8]) -> Result<(), Fault> {
        let key = Self::key(reg, socket);
        *self.reads.entry(key).or_insert(0) += 1;

        if reg == Register::SN_SR && !self.status.is_empty() {
            let value = if self.status.len() > 1 {
                self.status.pop_front()
            } else {
                self.status.front().copied()
            };
            dst[0] = value.unwrap_or(0);
            return Ok(());
        }
        if dst.len() == 2 {
            if let Some(value) = self.scripted.get_mut(&key).and_then(Self::next_scripted) {
                dst.copy_from_slice(&value.to_be_bytes());
                return Ok(());
            }
        }
        let bytes = self.get_bytes(reg, socket, dst.len());
        dst.copy_from_slice(&bytes);
        Ok(())
    }

    fn write(&mut self, reg: Register, socket: u8, src: &[u8]) -> Result<(), Fault> {
        if reg == Register::SN_IR {
            let old = self.get_u8(reg, socket);
            self.set_u8(reg, socket, old & !src[0]);
            return Ok(());
        }
        self.set_bytes(reg, socket, src);
        if reg == Register::SN_CR {
            let command = src[0];
            self.commands.push((socket, command));
            if command == Command::Recv as u8 {
                self.update_rx_size(socket);
            }
            let hooks: Vec<Hook> = self
                .hooks
                .iter()
                .filter(|(on, _)| *on == command)
                .map(|(_, hook)| *hook)
                .collect();
            for hook in hooks {
                hook(self);
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Serial level
// ----------------------------------------------------------------------------

/// Records what is transmitted; optionally busy for the first `busy` polls.
#[derive(Default)]
pub struct MockUsart {
    pub sent: Vec<u8>,
    pub busy: u32,
    pub polls: u32,
    pub divisor: Option<u32>,
    pub rx_interrupt: bool,
    incoming: VecDeque<u8>,
}

impl MockUsart {
    /// Not ready to transmit for the first `polls` attempts.
    pub fn busy(polls: u32) -> Self {
        Self {
            busy: polls,
            ..Self::default()
        }
    }

    pub fn receiving(bytes: &[u8]) -> Self {
        Self {
            incoming: bytes.iter().copied().collect(),
            ..Self::default()
        }
    }
}

impl serial::Write<u8> for MockUsart {
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.polls += 1;
        if self.busy > 0 {
            self.busy -= 1;
            return Err(nb::Error::WouldBlock);
        }
        self.sent.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

impl serial::Read<u8> for MockUsart {
    type Error = Infallible;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.incoming.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl UsartConfig for MockUsart {
    fn set_divisor(&mut self, divisor: u32) {
        self.divisor = Some(divisor);
    }

    fn enable_rx_interrupt(&mut self) {
        self.rx_interrupt = true;
    }
}

/// What [`FakeCompanion`] does to a block under key `key`.
pub fn transform(key: u8, data: &[u8]) -> Vec<u8> {
    data.iter().map(|byte| byte ^ key.wrapping_add(1)).collect()
}

enum Expect {
    Opcode,
    Pin { opcode: u8, got: usize },
    Key,
    Count { key: u8 },
    Block { key: u8, left: u8, got: usize },
}

/// Companion MCU simulator. Reacts to each byte it is sent and answers
/// straight into the receive buffer of the link, acting as its receive
/// interrupt. "Encryption" xors with the key index plus one.
pub struct FakeCompanion<'buf, const N: usize> {
    rx: Rc<RefCell<Producer<'buf, N>>>,
    pin: Pin,
    locked: [bool; 8],
    expect: Expect,
    entered: Pin,
    block: [u8; BLOCK_SIZE],
    sent: Rc<RefCell<Vec<u8>>>,
}

impl<'buf, const N: usize> FakeCompanion<'buf, N> {
    pub fn new(rx: Producer<'buf, N>, pin: Pin) -> Self {
        Self {
            rx: Rc::new(RefCell::new(rx)),
            pin,
            locked: [false; 8],
            expect: Expect::Opcode,
            entered: [0; PIN_LENGTH],
            block: [0; BLOCK_SIZE],
            sent: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn lock(mut self, key: u8) -> Self {
        self.locked[usize::from(key)] = true;
        self
    }

    pub fn sent(&self) -> Rc<RefCell<Vec<u8>>> {
        self.sent.clone()
    }

    /// Lets a test push unsolicited bytes onto the link.
    pub fn producer(&self) -> Rc<RefCell<Producer<'buf, N>>> {
        self.rx.clone()
    }

    fn reply(&self, bytes: &[u8]) {
        let mut rx = self.rx.borrow_mut();
        for byte in bytes {
            assert!(rx.put(*byte), "companion reply overflowed the link");
        }
    }

    fn receive(&mut self, byte: u8) {
        self.expect = match core::mem::replace(&mut self.expect, Expect::Opcode) {
            Expect::Opcode => match byte {
                1..=3 => Expect::Pin {
                    opcode: byte,
                    got: 0,
                },
                _ => Expect::Opcode,
            },
            Expect::Pin { opcode, got } => {
                self.entered[got] = byte;
                if got + 1 < PIN_LENGTH {
                    Expect::Pin {
                        opcode,
                        got: got + 1,
                    }
                } else if self.entered != self.pin {
                    self.reply(&[ACK_BAD_PIN]);
                    Expect::Opcode
                } else {
                    self.reply(&[ACK_OK]);
                    if opcode == 1 {
                        Expect::Opcode
                    } else {
                        Expect::Key
                    }
                }
            }
            Expect::Key => {
                let key = byte % 8;
                if self.locked[usize::from(key)] {
                    self.reply(&[ACK_KEY_LOCKED]);
                    Expect::Opcode
                } else {
                    self.reply(&[ACK_OK]);
                    Expect::Count { key }
                }
            }
            Expect::Count { key } => {
                if byte == 0 {
                    Expect::Opcode
                } else {
                    Expect::Block {
                        key,
                        left: byte,
                        got: 0,
                    }
                }
            }
            Expect::Block { key, left, got } => {
                self.block[got] = byte;
                if got + 1 < BLOCK_SIZE {
                    Expect::Block {
                        key,
                        left,
                        got: got + 1,
                    }
                } else {
                    let out = transform(key, &self.block);
                    self.reply(&out);
                    if left > 1 {
                        Expect::Block {
                            key,
                            left: left - 1,
                            got: 0,
                        }
                    } else {
                        Expect::Opcode
                    }
                }
            }
        };
    }
}

impl<const N: usize> serial::Write<u8> for FakeCompanion<'_, N> {
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.sent.borrow_mut().push(word);
        self.receive(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

impl<const N: usize> UsartConfig for FakeCompanion<'_, N> {
    fn set_divisor(&mut self, _divisor: u32) {}

    fn enable_rx_interrupt(&mut self) {}
}
