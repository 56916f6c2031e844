#![cfg_attr(not(test), no_std)]

//! I2C bus layer shared by the DS1307, DS3231, PCF8523 and PCF8563 clock drivers.
//!
//! A [`BusController`] owns one port of an [`I2cPeripheral`] and optionally a
//! lock shared with every other controller on the same physical bus. Drivers
//! either use its single-shot register helpers or build a multi-step
//! [`Transaction`]: start, address, writes and reads, repeated starts, and a
//! final stop, all transmitted atomically by [`Transaction::execute`].
//!
//! ```ignore
//! let mut values = [0u8; 7];
//! let mut op = ctrl.create_read_op(DS3231_ADDRESS, Some(REG_SECONDS), "now");
//! op.read(&mut values)?;
//! op.execute()?;
//! ```

mod error;
mod master;
mod operation;
mod peripheral;

pub mod hal;

#[cfg(test)]
mod mock;

pub use error::Error;
pub use master::{BusController, PING_TIMEOUT_MS};
pub use operation::{Transaction, MAX_READ_SLOTS, OP_TIMEOUT_MS};
pub use peripheral::{BusConfig, Direction, I2cPeripheral, Port, ReadAck, DEFAULT_CLOCK_HZ};

pub use shared_bus::{BusMutex, NullMutex};
