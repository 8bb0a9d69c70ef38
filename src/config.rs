use embedded_time::duration::Milliseconds;
use embedded_time::rate::{Baud, Hertz};

/// Addressing programmed into the Ethernet controller at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub mac: [u8; 6],
    pub ip: [u8; 4],
    pub gateway: [u8; 4],
    pub mask: [u8; 4],
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mac: [0x00, 0x08, 0xdc, 0x01, 0x02, 0x03],
            ip: [192, 168, 0, 10],
            gateway: [192, 168, 0, 1],
            mask: [255, 255, 255, 0],
        }
    }
}

/// Iteration budgets for the status polling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollLimits {
    /// Waiting for a client in LISTEN.
    pub accept: u32,
    /// Waiting for the first bytes of a command once connected.
    pub command: u32,
    /// Connection setup and teardown transitions.
    pub transition: u32,
    /// Idle polls while draining an exact read.
    pub read_idle: u32,
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            accept: 10_000_000,
            command: 2_000_000,
            transition: 100_000,
            read_idle: 2_000_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub network: NetworkConfig,
    pub listen_port: u16,
    pub sys_clock: Hertz,
    pub debug_baud: Baud,
    pub secure_baud: Baud,
    /// Hold and settle time of the controller reset line.
    pub controller_reset: Milliseconds,
    /// Hold and settle time of the companion MCU reset line.
    pub companion_reset: Milliseconds,
    pub limits: PollLimits,
    /// Released by `getflag` once debug mode is unlocked.
    pub secret: &'static str,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            listen_port: 1234,
            sys_clock: Hertz(50_000_000),
            debug_baud: Baud(115_200),
            secure_baud: Baud(625_000),
            controller_reset: Milliseconds(10),
            companion_reset: Milliseconds(100),
            limits: PollLimits::default(),
            secret: "",
        }
    }
}
