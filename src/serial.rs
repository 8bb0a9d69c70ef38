use core::fmt;

use embedded_hal::serial;
use embedded_time::rate::{Baud, Hertz};

use crate::error::Fault;
use crate::ring_buffer::{Consumer, Producer};

/// Line carrying debug output.
pub const DEBUG_LINE: u8 = 1;
/// Line wired to the companion MCU.
pub const SECURE_LINE: u8 = 2;

/// USART setup that `embedded-hal` does not cover.
pub trait UsartConfig {
    /// Programs the baud rate divisor (`f_ck / baud`).
    fn set_divisor(&mut self, divisor: u32);
    /// Enables the receive-not-empty interrupt.
    fn enable_rx_interrupt(&mut self);
}

/// Hands out the two serial lines, each exactly once.
pub struct SerialBus {
    sys_clock: Hertz,
    initialized: [bool; 2],
}

impl SerialBus {
    pub fn new(sys_clock: Hertz) -> Self {
        Self {
            sys_clock,
            initialized: [false; 2],
        }
    }

    /// Configures line `line` and starts buffering what it receives into
    /// `rx`. Initializing a line twice, a line that does not exist, or a baud
    /// rate the clock cannot divide down to is a wiring error and faults.
    pub fn init<'buf, Usart, const N: usize>(
        &mut self,
        line: u8,
        baud: Baud,
        mut usart: Usart,
        mut rx: Consumer<'buf, N>,
    ) -> Result<SerialLine<'buf, Usart, N>, Fault>
        where Usart: serial::Write<u8> + UsartConfig
    {
        let slot = match line {
            DEBUG_LINE | SECURE_LINE => usize::from(line - 1),
            other => return Err(Fault::UnknownSerialLine(other)),
        };
        if self.initialized[slot] {
            return Err(Fault::SerialReinitialized(line));
        }
        let divisor = match self.sys_clock.0.checked_div(baud.0) {
            Some(divisor) if divisor > 0 => divisor,
            _ => {
                log::error!("serial line {}: cannot run at {} Bd", line, baud.0);
                return Err(Fault::InvalidBaud(baud.0));
            }
        };
        self.initialized[slot] = true;

        usart.set_divisor(divisor);
        rx.flush();
        usart.enable_rx_interrupt();
        log::debug!("serial line {} at {} Bd", line, baud.0);
        Ok(SerialLine {
            line,
            usart,
            rx,
        })
    }
}

/// Body of a USART receive interrupt: moves one received byte, if any, into
/// the line's buffer. Returns `false` when nothing was stored (no data,
/// receive error, or buffer full).
pub fn service_rx<Usart, const N: usize>(usart: &mut Usart, rx: &mut Producer<'_, N>) -> bool
    where Usart: serial::Read<u8>
{
    match usart.read() {
        Ok(byte) => rx.put(byte),
        Err(_) => false,
    }
}

/// A serial line: unbuffered blocking transmit, interrupt-buffered receive.
pub struct SerialLine<'buf, Usart, const N: usize>
    where Usart: serial::Write<u8>
{
    line: u8,
    usart: Usart,
    rx: Consumer<'buf, N>,
}

impl<'buf, Usart, const N: usize> SerialLine<'buf, Usart, N>
    where Usart: serial::Write<u8>
{
    pub fn line(&self) -> u8 {
        self.line
    }

    /// Sends a byte once the transmitter is ready.
    pub fn tx(&mut self, byte: u8) -> Result<(), Fault> {
        nb::block!(self.usart.write(byte)).map_err(|_| Fault::Serial)
    }

    pub fn tx_buf(&mut self, bytes: &[u8]) -> Result<(), Fault> {
        for byte in bytes {
            self.tx(*byte)?;
        }
        Ok(())
    }

    /// Receives a byte, spinning until one arrives.
    pub fn rx(&mut self) -> u8 {
        self.rx.pop()
    }

    pub fn rx_buf(&mut self, dst: &mut [u8]) {
        for byte in dst.iter_mut() {
            *byte = self.rx();
        }
    }

    /// Received bytes not consumed yet.
    pub fn avail(&self) -> usize {
        self.rx.size()
    }

    /// Drops every received byte. The USART itself is left untouched.
    pub fn flush(&mut self) {
        self.rx.flush();
    }

    pub fn print(&mut self, text: &str) -> Result<(), Fault> {
        self.tx_buf(text.as_bytes())
    }

    pub fn println(&mut self, text: &str) -> Result<(), Fault> {
        self.print(text)?;
        self.tx(b'\n')
    }

    pub fn release(self) -> Usart {
        self.usart
    }
}

impl<Usart, const N: usize> fmt::Write for SerialLine<'_, Usart, N>
    where Usart: serial::Write<u8>
{
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.print(s).map_err(|_| fmt::Error)
    }
}
