#![cfg_attr(not(test), no_std)]

pub mod adapter;
pub mod command;
pub mod config;
pub mod error;
pub mod parser;
pub mod protocol;
pub mod register;
pub mod ring_buffer;
pub mod serial;
pub mod socket;
pub mod w5500;
mod chip_select;

#[cfg(test)]
mod testing;

pub use adapter::Adapter;
pub use config::{Config, NetworkConfig, PollLimits};
pub use error::{CommandError, Fault, Phase, Rejection};
pub use register::RegisterBus;
pub use ring_buffer::{Consumer, Producer, RingBuffer};
pub use serial::{SerialBus, SerialLine};
pub use socket::{Connection, Socket, Status};
pub use w5500::W5500;
