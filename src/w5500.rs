use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use embedded_time::duration::Milliseconds;

use crate::chip_select::ChipSelect;
use crate::config::NetworkConfig;
use crate::error::Fault;
use crate::register::{Register, RegisterBus, STABLE_READ_LIMIT};

/// WIZnet W5500 driven over a variable-length-data-mode SPI link.
///
/// Every access is one frame: 16-bit offset, control byte, data. Chip
/// select is held low for the whole frame and nothing else may use the bus
/// meanwhile.
pub struct W5500<Spi, ChipSelectPin, ResetPin>
    where
        Spi: Transfer<u8>,
        ChipSelectPin: OutputPin,
        ResetPin: OutputPin,
{
    spi: Spi,
    cs: ChipSelect<ChipSelectPin>,
    reset: ResetPin,
    stable_reads: u32,
}

impl<Spi, ChipSelectPin, ResetPin> W5500<Spi, ChipSelectPin, ResetPin>
    where
        Spi: Transfer<u8>,
        ChipSelectPin: OutputPin,
        ResetPin: OutputPin,
{
    /// Content of VERSIONR on a genuine chip.
    pub const VERSION: u8 = 0x04;

    pub fn new(spi: Spi, cs: ChipSelectPin, reset: ResetPin) -> Self {
        Self {
            spi,
            cs: ChipSelect::new(cs),
            reset,
            stable_reads: STABLE_READ_LIMIT,
        }
    }

    pub fn with_stable_read_limit(mut self, limit: u32) -> Self {
        self.stable_reads = limit;
        self
    }

    /// Hard reset through the reset line. Chip select is forced high while
    /// the chip is held in reset.
    pub fn reset<D: DelayMs<u32>>(&mut self, delay: &mut D, pulse: Milliseconds) -> Result<(), Fault> {
        self.reset.set_low().map_err(|_| Fault::Pin)?;
        delay.delay_ms(pulse.0);
        self.cs.release()?;
        self.reset.set_high().map_err(|_| Fault::Pin)?;
        delay.delay_ms(pulse.0);
        Ok(())
    }

    /// Refuses to go on with anything that is not a W5500.
    pub fn verify_version(&mut self) -> Result<(), Fault> {
        let found = self.read_u8(Register::VERSIONR, 0)?;
        if found != Self::VERSION {
            log::error!("unexpected W5500 version {:#04x}", found);
            return Err(Fault::VersionMismatch {
                expected: Self::VERSION,
                found,
            });
        }
        Ok(())
    }

    pub fn set_mac(&mut self, mac: &[u8; 6]) -> Result<(), Fault> {
        self.write(Register::SHAR, 0, mac)
    }

    pub fn set_gateway(&mut self, gateway: &[u8; 4]) -> Result<(), Fault> {
        self.write(Register::GAR, 0, gateway)
    }

    pub fn set_mask(&mut self, mask: &[u8; 4]) -> Result<(), Fault> {
        self.write(Register::SUBR, 0, mask)
    }

    pub fn set_ip(&mut self, ip: &[u8; 4]) -> Result<(), Fault> {
        self.write(Register::SIPR, 0, ip)
    }

    /// Reset, identify and address the controller.
    pub fn setup<D: DelayMs<u32>>(
        &mut self,
        network: &NetworkConfig,
        delay: &mut D,
        pulse: Milliseconds,
    ) -> Result<(), Fault> {
        self.reset(delay, pulse)?;
        self.verify_version()?;
        self.set_mac(&network.mac)?;
        self.set_gateway(&network.gateway)?;
        self.set_mask(&network.mask)?;
        self.set_ip(&network.ip)?;
        log::info!(
            "W5500 is ready at {}.{}.{}.{}",
            network.ip[0], network.ip[1], network.ip[2], network.ip[3]
        );
        Ok(())
    }
}

/// One full-duplex byte on the bus.
fn exchange<Spi: Transfer<u8>>(spi: &mut Spi, byte: u8) -> Result<u8, Fault> {
    let mut xfer = [byte];
    spi.transfer(&mut xfer).map_err(|_| Fault::Spi)?;
    Ok(xfer[0])
}

impl<Spi, ChipSelectPin, ResetPin> RegisterBus for W5500<Spi, ChipSelectPin, ResetPin>
    where
        Spi: Transfer<u8>,
        ChipSelectPin: OutputPin,
        ResetPin: OutputPin,
{
    fn read(&mut self, reg: Register, socket: u8, dst: &mut [u8]) -> Result<(), Fault> {
        let _cs = self.cs.select()?;
        for byte in reg.frame_head(socket, false, dst.len()).iter() {
            exchange(&mut self.spi, *byte)?;
        }
        for byte in dst.iter_mut() {
            *byte = exchange(&mut self.spi, 0x00)?;
        }
        Ok(())
    }

    fn write(&mut self, reg: Register, socket: u8, src: &[u8]) -> Result<(), Fault> {
        let _cs = self.cs.select()?;
        for byte in reg.frame_head(socket, true, src.len()).iter() {
            exchange(&mut self.spi, *byte)?;
        }
        for byte in src {
            exchange(&mut self.spi, *byte)?;
        }
        Ok(())
    }

    fn stable_read_limit(&self) -> u32 {
        self.stable_reads
    }
}
