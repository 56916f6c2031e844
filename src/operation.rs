use core::mem;

use heapless::Vec;
use log::{error, trace, warn};
use shared_bus::BusMutex;

use crate::master::with_lock;
use crate::{Direction, Error, I2cPeripheral, Port, ReadAck};

/// Default timeout for transmitting a transaction
pub const OP_TIMEOUT_MS: u32 = 5000;

/// Read destinations one transaction can hold.
/// A multi-byte read takes two: the ACKed head and the NACKed last byte.
pub const MAX_READ_SLOTS: usize = 16;

const ACK_CHECK_EN: bool = true;

enum State<L> {
  // start + address queued, more commands may follow
  Accumulating(L),
  Executed,
  Failed,
}

/// One I2C transaction against a slave: start, address, queued writes and
/// reads, optional restarts, stop.
///
/// Commands are only queued until [`execute`](Transaction::execute), which
/// transmits them while holding the shared bus lock. A transaction that fails
/// at any step is retired: its command link is released and every further
/// call returns [`Error::InvalidState`].
///
/// Dropping a transaction that was never executed logs a warning and then
/// executes it, so the command link is always released exactly once.
pub struct Transaction<'a, P, M>
  where
    P: I2cPeripheral,
    M: BusMutex<Bus = ()>,
{
  peripheral: &'a P,
  port: Port,
  lock: Option<&'a M>,
  state: State<P::Link>,
  reads: Vec<&'a mut [u8], MAX_READ_SLOTS>,
  timeout_ms: u32,
  name: &'static str,
}

impl<'a, P, M> Transaction<'a, P, M>
  where
    P: I2cPeripheral,
    M: BusMutex<Bus = ()>,
{
  pub(crate) fn new(peripheral: &'a P, port: Port, lock: Option<&'a M>, link: P::Link,
                    timeout_ms: u32, name: &'static str) -> Self {
    Transaction {
      peripheral,
      port,
      lock,
      state: State::Accumulating(link),
      reads: Vec::new(),
      timeout_ms,
      name,
    }
  }

  /// A transaction whose creation failed; it never touches the peripheral
  pub(crate) fn null(peripheral: &'a P, port: Port, lock: Option<&'a M>, name: &'static str) -> Self {
    Transaction {
      peripheral,
      port,
      lock,
      state: State::Failed,
      reads: Vec::new(),
      timeout_ms: 0,
      name,
    }
  }

  /// True while commands can still be queued: the transaction was created
  /// successfully and has neither failed nor been executed.
  pub fn is_ready(&self) -> bool {
    matches!(self.state, State::Accumulating(_))
  }

  /// The diagnostic name given at creation
  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Queue a single byte write
  pub fn write_byte(&mut self, value: u8) -> Result<(), Error<P::Error>> {
    self.queue("write_byte", |p, link| p.queue_write_byte(link, value, ACK_CHECK_EN))
  }

  /// Queue a multi-byte write
  pub fn write(&mut self, bytes: &[u8]) -> Result<(), Error<P::Error>> {
    if bytes.is_empty() {
      return self.check_ready();
    }
    self.queue("write", |p, link| p.queue_write(link, bytes, ACK_CHECK_EN))
  }

  /// Queue a read into `dest`, which stays borrowed until the transaction is gone.
  /// All bytes but the last are ACKed; the last is NACKed to end the read.
  pub fn read(&mut self, dest: &'a mut [u8]) -> Result<(), Error<P::Error>> {
    self.check_ready()?;
    if dest.is_empty() {
      return Ok(());
    }

    let slots = if dest.len() > 1 { 2 } else { 1 };
    if self.reads.len() + slots > MAX_READ_SLOTS {
      error!("{} read failed: more than {} reads queued", self.name, MAX_READ_SLOTS);
      self.retire(State::Failed);
      return Err(Error::TooManyReads);
    }

    let last = dest.len() - 1;
    let (head, tail) = dest.split_at_mut(last);
    if !head.is_empty() {
      self.queue("read", |p, link| p.queue_read(link, last, ReadAck::Ack))?;
      self.reads.push(head).map_err(|_| Error::TooManyReads)?;
    }
    self.queue("read", |p, link| p.queue_read(link, 1, ReadAck::Nack))?;
    self.reads.push(tail).map_err(|_| Error::TooManyReads)?;
    Ok(())
  }

  /// Issue a repeated start to `address` in `direction`, without a stop
  /// and without releasing the bus.
  pub fn restart(&mut self, address: u8, direction: Direction) -> Result<(), Error<P::Error>> {
    self.queue("restart", |p, link| {
      p.queue_start(link)?;
      p.queue_write_byte(link, direction.address_byte(address), ACK_CHECK_EN)
    })
  }

  /// Restart and point the slave at register `reg`.
  /// For [`Direction::Read`] a second restart switches the slave to reading
  /// from `reg`; for [`Direction::Write`] subsequent writes land in `reg` onwards.
  pub fn restart_reg(&mut self, address: u8, reg: u8, direction: Direction)
    -> Result<(), Error<P::Error>> {
    self.restart(address, Direction::Write)?;
    self.write_byte(reg)?;
    if direction == Direction::Read {
      self.restart(address, Direction::Read)?;
    }
    Ok(())
  }

  /// Queue the stop condition and transmit the whole transaction while
  /// holding the bus lock, then release the command link.
  /// Calling this again after success does nothing and returns `Ok`.
  pub fn execute(&mut self) -> Result<(), Error<P::Error>> {
    let mut link = match mem::replace(&mut self.state, State::Executed) {
      State::Accumulating(link) => link,
      State::Executed => return Ok(()),
      State::Failed => {
        self.state = State::Failed;
        return Err(Error::InvalidState);
      }
    };

    let peripheral = self.peripheral;
    let (port, timeout_ms) = (self.port, self.timeout_ms);
    let result = match peripheral.queue_stop(&mut link) {
      Ok(()) => {
        let reads = self.reads.as_mut_slice();
        with_lock(self.lock, || peripheral.cmd_begin(port, &mut link, reads, timeout_ms))
      }
      Err(err) => Err(err),
    };
    peripheral.link_delete(link);
    self.reads.clear();

    match result {
      Ok(()) => {
        trace!("{} completed successfully", self.name);
        Ok(())
      }
      Err(err) => {
        error!("{} execute failed: {:?}", self.name, err);
        self.state = State::Failed;
        Err(Error::Bus(err))
      }
    }
  }

  fn check_ready(&self) -> Result<(), Error<P::Error>> {
    if self.is_ready() { Ok(()) } else { Err(Error::InvalidState) }
  }

  // Run one queue step against the link; any failure retires the transaction
  fn queue<F>(&mut self, what: &str, step: F) -> Result<(), Error<P::Error>>
    where
      F: FnOnce(&P, &mut P::Link) -> Result<(), P::Error>,
  {
    let link = match &mut self.state {
      State::Accumulating(link) => link,
      _ => return Err(Error::InvalidState),
    };
    match step(self.peripheral, link) {
      Ok(()) => Ok(()),
      Err(err) => {
        error!("{} {} failed: {:?}", self.name, what, err);
        self.retire(State::Failed);
        Err(Error::Bus(err))
      }
    }
  }

  // Move to a terminal state, releasing the link if one is still held
  fn retire(&mut self, state: State<P::Link>) {
    if let State::Accumulating(link) = mem::replace(&mut self.state, state) {
      self.peripheral.link_delete(link);
    }
    self.reads.clear();
  }
}

impl<'a, P, M> Drop for Transaction<'a, P, M>
  where
    P: I2cPeripheral,
    M: BusMutex<Bus = ()>,
{
  fn drop(&mut self) {
    if self.is_ready() {
      warn!("{} was created but never executed (doing so now)", self.name);
      let _ = self.execute();
    }
  }
}
