//! Client requests: validation of the tokenized arguments and the debug
//! unlock gating `getflag`.

use embedded_hal::blocking::rng;
use heapless::{consts::*, Vec};

use crate::error::{CommandError, Fault};
use crate::parser::{decode_hex, parse_decimal};
use crate::protocol::{Direction, Pin, KEY_COUNT, PIN_LENGTH};

/// Size of the buffer a request is read into.
pub const REQUEST_SIZE: usize = 768;
/// Largest payload accepted by encrypt and decrypt, in bytes.
pub const MAX_DATA: usize = 256;

pub const BANNER: &str = "Hello from picoHSM!\n\
                          Waiting for command...\n\
                          Timeout in 15 seconds...\n";

pub const HELP: &str = "help - print the list of commands.\n\
                        info - print equipment info.\n\
                        getflag [DEBUGKEY] - you already know what this is for...\n\
                        pin - verify pin.\n\
                        encrypt [PIN] [KEYID] [HEX] - encrypt a data blob.\n\
                        decrypt [PIN] [KEYID] [HEX] - decrypt a data blob.\n";

pub const INFO: &str = concat!("picoHSM v", env!("CARGO_PKG_VERSION"), "\n");

pub const PIN_OK: &str = "PIN OK\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Help,
    Info,
    GetFlag {
        key: u32,
    },
    Pin {
        pin: Pin,
    },
    Crypt {
        direction: Direction,
        pin: Pin,
        key: u8,
        data: Vec<u8, U256>,
    },
}

impl Request {
    /// Validates the arguments of a request, command name first. Checks run
    /// in a fixed order and the first failing one decides the error.
    pub fn parse(args: &[&[u8]]) -> Result<Self, CommandError> {
        let (command, rest) = match args.split_first() {
            Some(split) => split,
            None => return Err(CommandError::UnknownCommand),
        };
        match *command {
            b"help" => Ok(Request::Help),
            b"info" => Ok(Request::Info),
            b"getflag" => {
                let [key] = arguments::<1>(rest)?;
                let key = parse_decimal(key).ok_or(CommandError::KeyFormat)?;
                Ok(Request::GetFlag { key })
            }
            b"pin" => {
                let [pin] = arguments::<1>(rest)?;
                Ok(Request::Pin { pin: pin_of(pin)? })
            }
            b"encrypt" => crypt(Direction::Encrypt, rest),
            b"decrypt" => crypt(Direction::Decrypt, rest),
            _ => Err(CommandError::UnknownCommand),
        }
    }
}

/// Exactly `N` arguments after the command name.
fn arguments<'a, const N: usize>(rest: &[&'a [u8]]) -> Result<[&'a [u8]; N], CommandError> {
    if rest.len() != N {
        return Err(CommandError::ArgumentCount(N + 1));
    }
    let mut out: [&[u8]; N] = [&[]; N];
    out.copy_from_slice(rest);
    Ok(out)
}

fn pin_of(arg: &[u8]) -> Result<Pin, CommandError> {
    if arg.len() != PIN_LENGTH {
        return Err(CommandError::PinLength);
    }
    let mut pin = [0u8; PIN_LENGTH];
    pin.copy_from_slice(arg);
    Ok(pin)
}

fn crypt(direction: Direction, rest: &[&[u8]]) -> Result<Request, CommandError> {
    let [pin, key, data] = arguments::<3>(rest)?;
    let pin = pin_of(pin)?;

    let key = parse_decimal(key).ok_or(CommandError::KeyFormat)?;
    if key >= u32::from(KEY_COUNT) {
        return Err(CommandError::KeyRange);
    }

    if data.len() % 32 != 0 {
        return Err(CommandError::DataSize);
    }
    if data.len() / 2 > MAX_DATA {
        return Err(CommandError::DataTooLong);
    }
    let mut bytes = [0u8; MAX_DATA];
    let len = decode_hex(data, &mut bytes).ok_or(CommandError::DataFormat)?;
    let data = Vec::from_slice(&bytes[..len]).map_err(|_| CommandError::DataTooLong)?;

    Ok(Request::Crypt {
        direction,
        pin,
        key: key as u8,
        data,
    })
}

/// Debug mode and the key a client must present to use it. The key is
/// drawn from the hardware RNG and replaced after every successful use.
#[derive(Debug)]
pub struct DebugUnlock {
    enabled: bool,
    key: u32,
}

impl DebugUnlock {
    /// Starts locked. The first RNG output is discarded.
    pub fn new<R: rng::Read>(rng: &mut R) -> Result<Self, Fault> {
        draw(rng)?;
        Ok(Self {
            enabled: false,
            key: draw(rng)?,
        })
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    /// Consumes debug mode if `key` matches. On success debug mode is left
    /// disabled under a fresh key.
    pub fn redeem<R: rng::Read>(&mut self, key: u32, rng: &mut R) -> Result<(), CommandError> {
        if !self.enabled || key != self.key {
            log::warn!("debug unlock refused");
            return Err(CommandError::DebugLocked);
        }
        self.enabled = false;
        self.key = draw(rng)?;
        Ok(())
    }
}

fn draw<R: rng::Read>(rng: &mut R) -> Result<u32, Fault> {
    let mut buf = [0u8; 4];
    rng.read(&mut buf).map_err(|_| Fault::Rng)?;
    Ok(u32::from_le_bytes(buf))
}
