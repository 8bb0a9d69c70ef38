use crate::socket::Status;

/// What the driver was doing when a fault was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    Listen,
    Connect,
    Write,
    Read,
    Close,
    Disconnect,
    StableRead,
    AwaitCommand,
}

/// Unrecoverable condition. The only sane reaction is a device reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The socket status register held a value outside the set expected for
    /// the current operation.
    UnexpectedState { state: Status, during: Phase },
    /// A polling loop exhausted its iteration budget.
    Timeout { during: Phase },
    /// The Ethernet controller did not identify itself as expected.
    VersionMismatch { expected: u8, found: u8 },
    /// Socket index beyond what the controller supports.
    InvalidSocket(u8),
    /// Payload does not fit in the free TX space.
    TxBufferFull { free: u16, requested: usize },
    SerialReinitialized(u8),
    /// Baud rate of zero or above the system clock.
    InvalidBaud(u32),
    UnknownSerialLine(u8),
    Spi,
    Pin,
    Serial,
    Rng,
}

impl Fault {
    /// Faults that only mean "nobody is talking to us", as opposed to
    /// hardware in a state we do not model.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Fault::Timeout {
                during: Phase::Listen
            } | Fault::Timeout {
                during: Phase::AwaitCommand
            }
        )
    }
}

/// Non-OK acknowledgement from the companion MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BadPin,
    KeyLocked,
    Unexpected(u8),
}

/// Recoverable client-facing error. Reported on the socket, the connection
/// stays usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Expected token count, command name included.
    ArgumentCount(usize),
    PinLength,
    KeyFormat,
    KeyRange,
    DataSize,
    DataTooLong,
    DataFormat,
    Rejected(Rejection),
    UnknownCommand,
    DebugLocked,
    Fault(Fault),
}

impl CommandError {
    /// Text sent back to the client. `None` for faults, which never reach
    /// the client.
    pub fn reply(&self) -> Option<&'static str> {
        let text = match self {
            CommandError::ArgumentCount(2) => "Expected 2 arguments.\n",
            CommandError::ArgumentCount(_) => "Expected 3 arguments.\n",
            CommandError::PinLength => "PIN must have 8 characters.\n",
            CommandError::KeyFormat => "Invalid key format.\n",
            CommandError::KeyRange => "Key must be in [0, 7].\n",
            CommandError::DataSize => "Data size must be a multiple of 16.\n",
            CommandError::DataTooLong => "Data too long.\n",
            CommandError::DataFormat => "Invalid data format.\n",
            CommandError::Rejected(Rejection::BadPin) => "Invalid PIN.\n",
            CommandError::Rejected(Rejection::KeyLocked) => "Key is locked and cannot be used.\n",
            CommandError::Rejected(Rejection::Unexpected(_)) => "Unexpected error.\n",
            CommandError::UnknownCommand => "Unknown command. Use help to get help...\n",
            CommandError::DebugLocked => "Debug is not enabled or key is invalid.\n",
            CommandError::Fault(_) => return None,
        };
        Some(text)
    }
}

impl From<Fault> for CommandError {
    fn from(fault: Fault) -> Self {
        CommandError::Fault(fault)
    }
}

impl From<Rejection> for CommandError {
    fn from(rejection: Rejection) -> Self {
        CommandError::Rejected(rejection)
    }
}
