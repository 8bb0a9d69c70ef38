//! Opcode/acknowledge protocol spoken with the companion MCU, which holds the
//! PIN and the AES keys.
//!
//! ```text
//! verify:  -> [0x01][pin:8]                      <- [ack]
//! crypt:   -> [0x02|0x03][pin:8]                 <- [ack]
//!          -> [key]                              <- [ack]
//!          -> [blocks] ([block:16] <- [block:16])*
//! ```
//!
//! Every ack other than OK ends the exchange.

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial;
use embedded_time::duration::Milliseconds;

use crate::error::{CommandError, Fault, Rejection};
use crate::serial::SerialLine;

pub const PIN_LENGTH: usize = 8;
pub const BLOCK_SIZE: usize = 16;
pub const KEY_COUNT: u8 = 8;

pub type Pin = [u8; PIN_LENGTH];
pub type Block = [u8; BLOCK_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    VerifyPin = 1,
    Encrypt = 2,
    Decrypt = 3,
}

pub const ACK_OK: u8 = 1;
pub const ACK_BAD_PIN: u8 = 2;
pub const ACK_KEY_LOCKED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

impl Direction {
    fn opcode(self) -> Opcode {
        match self {
            Direction::Encrypt => Opcode::Encrypt,
            Direction::Decrypt => Opcode::Decrypt,
        }
    }
}

#[derive(Clone, Copy)]
enum Stage {
    Verify,
    Pin,
    Key,
}

pub struct SecureLink<'buf, Usart, ResetPin, const N: usize>
    where
        Usart: serial::Write<u8>,
        ResetPin: OutputPin,
{
    line: SerialLine<'buf, Usart, N>,
    reset: ResetPin,
}

impl<'buf, Usart, ResetPin, const N: usize> SecureLink<'buf, Usart, ResetPin, N>
    where
        Usart: serial::Write<u8>,
        ResetPin: OutputPin,
{
    pub fn new(line: SerialLine<'buf, Usart, N>, reset: ResetPin) -> Self {
        Self {
            line,
            reset,
        }
    }

    /// Restarts the companion MCU and forgets anything it sent before.
    pub fn reset<D: DelayMs<u32>>(&mut self, delay: &mut D, hold: Milliseconds) -> Result<(), Fault> {
        self.reset.set_low().map_err(|_| Fault::Pin)?;
        delay.delay_ms(hold.0);
        self.reset.set_high().map_err(|_| Fault::Pin)?;
        delay.delay_ms(hold.0);
        self.line.flush();
        Ok(())
    }

    /// Bytes received from the companion and not consumed yet.
    pub fn pending(&self) -> usize {
        self.line.avail()
    }

    fn ack(&mut self, stage: Stage) -> Result<(), CommandError> {
        let rejection = match (self.line.rx(), stage) {
            (ACK_OK, _) => return Ok(()),
            (_, Stage::Verify) | (ACK_BAD_PIN, Stage::Pin) => Rejection::BadPin,
            (ACK_KEY_LOCKED, Stage::Key) => Rejection::KeyLocked,
            (other, _) => Rejection::Unexpected(other),
        };
        log::warn!("companion refused: {:?}", rejection);
        Err(rejection.into())
    }

    pub fn verify_pin(&mut self, pin: &Pin) -> Result<(), CommandError> {
        self.line.flush();
        self.line.tx(Opcode::VerifyPin as u8)?;
        self.line.tx_buf(pin)?;
        self.ack(Stage::Verify)
    }

    /// Runs `data` through key `key`, one block at a time. Each processed
    /// block is handed to `sink` before the next one is sent.
    pub fn crypt<F>(
        &mut self,
        direction: Direction,
        pin: &Pin,
        key: u8,
        data: &[u8],
        mut sink: F,
    ) -> Result<(), CommandError>
        where F: FnMut(&Block) -> Result<(), Fault>
    {
        let blocks = data.chunks_exact(BLOCK_SIZE);
        if blocks.len() > usize::from(u8::MAX) {
            return Err(CommandError::DataTooLong);
        }
        let count = blocks.len() as u8;

        self.line.tx(direction.opcode() as u8)?;
        self.line.tx_buf(pin)?;
        self.ack(Stage::Pin)?;

        self.line.tx(key)?;
        self.ack(Stage::Key)?;

        self.line.tx(count)?;
        for block in blocks {
            self.line.tx_buf(block)?;
            let mut response: Block = [0; BLOCK_SIZE];
            self.line.rx_buf(&mut response);
            sink(&response)?;
        }
        Ok(())
    }
}
