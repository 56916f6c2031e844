//! [`I2cPeripheral`] on top of any embedded-hal blocking I2C bus.
//!
//! embedded-hal buses have no command link, so the link is kept in memory and
//! decoded at `cmd_begin`. A link may only restart into the same slave with
//! the opposite direction: embedded-hal offers no way to restart into another
//! address, and joins adjacent writes (or reads) without a repeated start.
//! Links that break this rule fail with [`HalError::Unsupported`] before
//! anything is sent.
//!
//! How a decoded link reaches the bus depends on the [`Transfer`] mode:
//! - [`Split`] uses `write`, `read` and `write_read`, so at most one
//!   write phase followed by one read phase.
//! - [`Exec`] hands every phase to `Transactional::exec` in one call, so any
//!   number of restarts between writing and reading the same slave.
//!
//! Per-byte ACK/NACK handling and the stop condition are left to the HAL
//! implementation.

use core::cell::RefCell;
use core::fmt::Debug;
use core::marker::PhantomData;

use embedded_hal::blocking::i2c::{Operation, Read, Transactional, Write, WriteRead};
use heapless::Vec;

use crate::{BusConfig, Port, ReadAck, MAX_READ_SLOTS};
use crate::peripheral::I2cPeripheral;

/// Commands one link can hold
pub const MAX_LINK_COMMANDS: usize = 32;
/// Bytes (addresses included) one link can write
pub const MAX_LINK_WRITE_BYTES: usize = 64;
/// Bytes one address phase can read
pub const MAX_LINK_READ_BYTES: usize = 64;

const MAX_PHASES: usize = 8;
const MAX_OPERATIONS: usize = MAX_PHASES + MAX_READ_SLOTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError<E> {
  /// Error reported by the embedded-hal bus
  I2c(E),
  /// The bus is already in use by a transfer on this thread
  Busy,
  /// The queued commands cannot be expressed as embedded-hal calls
  Unsupported,
  /// The link has no room for more commands or data
  Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
  Start,
  // `len` bytes taken in order from the link's write buffer
  Write(usize),
  Read(usize),
  Stop,
}

/// Command link kept in memory until it is transmitted
#[derive(Debug, Default)]
pub struct HalLink {
  commands: Vec<Command, MAX_LINK_COMMANDS>,
  data: Vec<u8, MAX_LINK_WRITE_BYTES>,
}

impl HalLink {
  fn push<E>(&mut self, command: Command) -> Result<(), HalError<E>> {
    self.commands.push(command).map_err(|_| HalError::Overflow)
  }

  fn payload(&self, phase: &Phase) -> &[u8] {
    &self.data[phase.start..phase.end]
  }

  // Split the link into address phases and check they form one transfer
  // against a single slave, alternating between writing and reading.
  fn phases<E>(&self) -> Result<Vec<Phase, MAX_PHASES>, HalError<E>> {
    let mut phases: Vec<Phase, MAX_PHASES> = Vec::new();
    let mut offset = 0;
    let mut expect_address = false;

    for command in self.commands.iter() {
      match *command {
        Command::Start => expect_address = true,
        Command::Write(len) => {
          let mut start = offset;
          offset += len;
          if expect_address {
            expect_address = false;
            let byte = *self.data.get(start).ok_or(HalError::Unsupported)?;
            start += 1;
            let phase = Phase {
              address: byte >> 1,
              read: byte & 1 == 1,
              start,
              end: start,
              read_len: 0,
              read_slots: 0,
            };
            phases.push(phase).map_err(|_| HalError::Overflow)?;
          }
          if start == offset {
            continue;
          }
          let phase = phases.last_mut().ok_or(HalError::Unsupported)?;
          if phase.read || phase.end != start {
            return Err(HalError::Unsupported);
          }
          phase.end = offset;
        }
        Command::Read(len) => {
          let phase = phases.last_mut().ok_or(HalError::Unsupported)?;
          if expect_address || !phase.read {
            return Err(HalError::Unsupported);
          }
          phase.read_len += len;
          phase.read_slots += 1;
        }
        Command::Stop => {}
      }
    }

    if phases.is_empty() || phases.iter().any(|phase| phase.read && phase.read_slots == 0) {
      return Err(HalError::Unsupported);
    }
    for pair in phases.windows(2) {
      if pair[1].address != pair[0].address || pair[1].read == pair[0].read {
        return Err(HalError::Unsupported);
      }
    }
    Ok(phases)
  }
}

// One start..restart/stop section of a link
#[derive(Debug, Clone, Copy)]
struct Phase {
  address: u8,
  read: bool,
  // payload range in the link's write buffer
  start: usize,
  end: usize,
  read_len: usize,
  read_slots: usize,
}

/// Puts a decoded link on an embedded-hal bus
pub trait Transfer<I2C> {
  type Error: Debug;

  fn transfer(i2c: &mut I2C, link: &HalLink, reads: &mut [&mut [u8]])
    -> Result<(), HalError<Self::Error>>;
}

/// Transfers through `Write`, `Read` and `WriteRead`
pub enum Split {}

/// Transfers through `Transactional::exec`
pub enum Exec {}

impl<I2C, E> Transfer<I2C> for Split
  where
    I2C: Write<Error = E> + Read<Error = E> + WriteRead<Error = E>,
    E: Debug,
{
  type Error = E;

  fn transfer(i2c: &mut I2C, link: &HalLink, reads: &mut [&mut [u8]])
    -> Result<(), HalError<E>> {
    let phases = link.phases::<E>()?;
    let (address, payload, read) = match phases.as_slice() {
      [write] if !write.read => {
        return i2c.write(write.address, link.payload(write)).map_err(HalError::I2c);
      }
      [read] => (read.address, None, read),
      [write, read] if read.read => (write.address, Some(link.payload(write)), read),
      _ => return Err(HalError::Unsupported),
    };

    if read.read_len > MAX_LINK_READ_BYTES {
      return Err(HalError::Overflow);
    }
    let mut scratch = [0u8; MAX_LINK_READ_BYTES];
    let buf = &mut scratch[..read.read_len];
    match payload {
      Some(payload) => i2c.write_read(address, payload, buf).map_err(HalError::I2c)?,
      None => i2c.read(address, buf).map_err(HalError::I2c)?,
    }

    // scatter into the destinations queued for the read phase
    let mut filled = 0;
    for dest in reads.iter_mut().take(read.read_slots) {
      let end = filled + dest.len();
      let src = buf.get(filled..end).ok_or(HalError::Unsupported)?;
      dest.copy_from_slice(src);
      filled = end;
    }
    Ok(())
  }
}

impl<I2C, E> Transfer<I2C> for Exec
  where
    I2C: Transactional<Error = E>,
    E: Debug,
{
  type Error = E;

  fn transfer(i2c: &mut I2C, link: &HalLink, reads: &mut [&mut [u8]])
    -> Result<(), HalError<E>> {
    let phases = link.phases::<E>()?;
    let address = phases.first().map(|phase| phase.address).ok_or(HalError::Unsupported)?;

    // adjacent reads are joined by exec, so each destination is its own operation
    let mut reads = reads.iter_mut();
    let mut operations: Vec<Operation<'_>, MAX_OPERATIONS> = Vec::new();
    for phase in phases.iter() {
      if phase.read {
        for _ in 0..phase.read_slots {
          let dest = reads.next().ok_or(HalError::Unsupported)?;
          operations.push(Operation::Read(&mut **dest)).map_err(|_| HalError::Overflow)?;
        }
      }
      else {
        operations.push(Operation::Write(link.payload(phase))).map_err(|_| HalError::Overflow)?;
      }
    }
    i2c.exec(address, operations.as_mut_slice()).map_err(HalError::I2c)
  }
}

/// Shares one embedded-hal I2C bus between controllers
pub struct HalBus<I2C, T = Split> {
  i2c: RefCell<I2C>,
  _transfer: PhantomData<fn() -> T>,
}

impl<I2C> HalBus<I2C, Split> {
  /// Bus driven through `write`, `read` and `write_read`
  pub fn new(i2c: I2C) -> Self {
    HalBus { i2c: RefCell::new(i2c), _transfer: PhantomData }
  }
}

impl<I2C> HalBus<I2C, Exec> {
  /// Bus driven through `Transactional::exec`, keeping every restart of a link
  pub fn new_transactional(i2c: I2C) -> Self {
    HalBus { i2c: RefCell::new(i2c), _transfer: PhantomData }
  }
}

impl<I2C, T> HalBus<I2C, T> {
  /// Give back the underlying bus
  pub fn release(self) -> I2C {
    self.i2c.into_inner()
  }
}

impl<I2C, T> I2cPeripheral for HalBus<I2C, T>
  where
    T: Transfer<I2C>,
{
  type Error = HalError<T::Error>;
  type Link = HalLink;

  /// Pins and clock are fixed when the embedded-hal bus is constructed
  fn configure(&self, _port: Port, _config: &BusConfig) -> Result<(), Self::Error> {
    Ok(())
  }

  fn link_create(&self) -> Option<Self::Link> {
    Some(HalLink::default())
  }

  fn link_delete(&self, _link: Self::Link) {}

  fn queue_start(&self, link: &mut Self::Link) -> Result<(), Self::Error> {
    link.push(Command::Start)
  }

  fn queue_write_byte(&self, link: &mut Self::Link, byte: u8, ack_check: bool)
    -> Result<(), Self::Error> {
    self.queue_write(link, &[byte], ack_check)
  }

  fn queue_write(&self, link: &mut Self::Link, bytes: &[u8], _ack_check: bool)
    -> Result<(), Self::Error> {
    link.data.extend_from_slice(bytes).map_err(|_| HalError::Overflow)?;
    link.push(Command::Write(bytes.len()))
  }

  fn queue_read(&self, link: &mut Self::Link, len: usize, _ack: ReadAck)
    -> Result<(), Self::Error> {
    link.push(Command::Read(len))
  }

  fn queue_stop(&self, link: &mut Self::Link) -> Result<(), Self::Error> {
    link.push(Command::Stop)
  }

  fn cmd_begin(&self, _port: Port, link: &mut Self::Link, reads: &mut [&mut [u8]], _timeout_ms: u32)
    -> Result<(), Self::Error> {
    let mut i2c = self.i2c.try_borrow_mut().map_err(|_| HalError::Busy)?;
    T::transfer(&mut *i2c, link, reads)
  }
}
