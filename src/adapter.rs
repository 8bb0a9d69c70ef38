use core::cell::RefCell;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::rng;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial;
use embedded_hal::watchdog::Watchdog;

use crate::command::{DebugUnlock, Request, BANNER, HELP, INFO, PIN_OK, REQUEST_SIZE};
use crate::config::Config;
use crate::error::{CommandError, Fault, Phase};
use crate::parser::{encode_hex, tokenize};
use crate::protocol::SecureLink;
use crate::register::RegisterBus;
use crate::socket::Socket;

/// Socket used for client sessions.
const SERVER_SOCKET: u8 = 0;

/// Bridges TCP clients on the Ethernet controller to the companion MCU. One
/// client is served at a time, one request per connection.
pub struct Adapter<'a, 'buf, Bus, Usart, ResetPin, Delay, Wdt, Rng, const N: usize>
    where
        Bus: RegisterBus,
        Usart: serial::Write<u8>,
        ResetPin: OutputPin,
        Delay: DelayMs<u32>,
        Wdt: Watchdog,
        Rng: rng::Read,
{
    controller: &'a RefCell<Bus>,
    link: SecureLink<'buf, Usart, ResetPin, N>,
    delay: Delay,
    watchdog: Wdt,
    rng: Rng,
    debug: DebugUnlock,
    config: Config,
}

impl<'a, 'buf, Bus, Usart, ResetPin, Delay, Wdt, Rng, const N: usize>
    Adapter<'a, 'buf, Bus, Usart, ResetPin, Delay, Wdt, Rng, N>
    where
        Bus: RegisterBus,
        Usart: serial::Write<u8>,
        ResetPin: OutputPin,
        Delay: DelayMs<u32>,
        Wdt: Watchdog,
        Rng: rng::Read,
{
    /// `controller` must already be set up, see [`crate::w5500::W5500::setup`].
    pub fn new(
        controller: &'a RefCell<Bus>,
        link: SecureLink<'buf, Usart, ResetPin, N>,
        delay: Delay,
        watchdog: Wdt,
        mut rng: Rng,
        config: Config,
    ) -> Result<Self, Fault> {
        let debug = DebugUnlock::new(&mut rng)?;
        Ok(Self {
            controller,
            link,
            delay,
            watchdog,
            rng,
            debug,
            config,
        })
    }

    pub fn debug(&mut self) -> &mut DebugUnlock {
        &mut self.debug
    }

    /// Serves clients until something fatal happens. The returned fault is
    /// meant for the board's reset path.
    pub fn run(&mut self) -> Fault {
        loop {
            match self.serve_once() {
                Ok(true) => log::info!("client has been served"),
                Ok(false) => {}
                Err(fault) => {
                    log::error!("giving up: {:?}", fault);
                    return fault;
                }
            }
        }
    }

    /// One session: reset the companion, wait for a client, serve a single
    /// request, disconnect. Returns whether a client was served.
    pub fn serve_once(&mut self) -> Result<bool, Fault> {
        self.link.reset(&mut self.delay, self.config.companion_reset)?;

        let socket = Socket::new(self.controller, SERVER_SOCKET)?.with_limits(self.config.limits);
        log::info!("waiting for connection on port {}", self.config.listen_port);
        let outcome = match socket.listen(self.config.listen_port, &mut self.watchdog) {
            Ok(true) => {
                log::info!("connection established");
                self.watchdog.feed();
                self.handle_client(&socket).map(|_| true)
            }
            Ok(false) => {
                log::warn!("connection failed");
                Ok(false)
            }
            Err(fault) => Err(fault),
        };

        match outcome {
            Err(fault) if fault.is_recoverable() => {
                log::warn!("{:?}, dropping the socket", fault);
                socket.close()?;
                Ok(false)
            }
            Err(fault) => Err(fault),
            Ok(served) => {
                socket.disconnect()?;
                log::info!("connection closed");
                Ok(served)
            }
        }
    }

    fn handle_client(&mut self, socket: &Socket<'a, Bus>) -> Result<(), Fault> {
        socket.print(BANNER)?;

        let mut polls = 0;
        while socket.avail()? == 0 {
            polls += 1;
            if polls >= self.config.limits.command {
                return Err(Fault::Timeout {
                    during: Phase::AwaitCommand,
                });
            }
            self.watchdog.feed();
        }

        let mut buf = [0u8; REQUEST_SIZE];
        let size = socket.read_avail(&mut buf)?;
        let args = tokenize(&mut buf[..size]);
        log::debug!("request with {} argument(s)", args.len());

        match Request::parse(&args).and_then(|request| self.execute(socket, request)) {
            Ok(()) => Ok(()),
            Err(CommandError::Fault(fault)) => Err(fault),
            Err(error) => {
                log::warn!("request failed: {:?}", error);
                if let Some(reply) = error.reply() {
                    socket.print(reply)?;
                }
                Ok(())
            }
        }
    }

    fn execute(&mut self, socket: &Socket<'a, Bus>, request: Request) -> Result<(), CommandError> {
        match request {
            Request::Help => socket.print(HELP)?,
            Request::Info => socket.print(INFO)?,
            Request::GetFlag { key } => {
                self.debug.redeem(key, &mut self.rng)?;
                log::info!("debug key redeemed");
                socket.print(self.config.secret)?;
                socket.print("\n")?;
            }
            Request::Pin { pin } => {
                self.link.verify_pin(&pin)?;
                socket.print(PIN_OK)?;
            }
            Request::Crypt {
                direction,
                pin,
                key,
                data,
            } => {
                self.link.crypt(direction, &pin, key, &data, |block| {
                    socket.write(&encode_hex(block))
                })?;
                socket.print("\n")?;
            }
        }
        Ok(())
    }
}
