use log::{debug, error};
use shared_bus::{BusMutex, NullMutex};

use crate::operation::OP_TIMEOUT_MS;
use crate::{BusConfig, Direction, Error, I2cPeripheral, Port, Transaction};

/// Timeout for the single-shot ping command
pub const PING_TIMEOUT_MS: u32 = 1000;

const ACK_CHECK_EN: bool = true;

/// Run `f` holding the shared bus lock, if there is one
pub(crate) fn with_lock<M, R, F>(lock: Option<&M>, f: F) -> R
  where
    M: BusMutex<Bus = ()>,
    F: FnOnce() -> R,
{
  match lock {
    Some(mutex) => mutex.lock(|_| f()),
    None => f(),
  }
}

/// Does all I2C bus interaction for the clock drivers on one physical bus.
///
/// Several controllers (one per clock driver, typically) may share a bus:
/// hand each of them the same peripheral and the same lock. The lock is held
/// only while a transaction is transmitted, so each [`Transaction`] should be
/// built and executed on a single thread.
pub struct BusController<'a, P, M = NullMutex<()>> {
  peripheral: &'a P,
  port: Port,
  lock: Option<&'a M>,
  timeout_ms: u32,
}

impl<'a, P> BusController<'a, P>
  where
    P: I2cPeripheral,
{
  /// New controller for `port`, with no lock: only safe when nothing else
  /// drives this bus concurrently.
  pub fn new(peripheral: &'a P, port: Port) -> Self {
    BusController {
      peripheral,
      port,
      lock: None,
      timeout_ms: OP_TIMEOUT_MS,
    }
  }

  /// Configure pins and clock of `port` and install the peripheral's master driver.
  /// Call once per physical bus before creating controllers for it.
  pub fn initialize(peripheral: &P, port: Port, config: &BusConfig) -> Result<(), Error<P::Error>> {
    peripheral.configure(port, config).map_err(|err| {
      error!("Configuring I2C port {} failed: {:?}", port, err);
      Error::Bus(err)
    })
  }
}

impl<'a, P, M> BusController<'a, P, M>
  where
    P: I2cPeripheral,
    M: BusMutex<Bus = ()>,
{
  /// New controller for `port` that serializes all bus transmissions through `lock`.
  /// - `lock` : shared by every controller that drives the same physical bus
  pub fn new_with_lock(peripheral: &'a P, port: Port, lock: &'a M) -> Self {
    BusController {
      peripheral,
      port,
      lock: Some(lock),
      timeout_ms: OP_TIMEOUT_MS,
    }
  }

  /// Override the timeout used when transmitting transactions
  pub fn with_timeout(mut self, timeout_ms: u32) -> Self {
    self.timeout_ms = timeout_ms;
    self
  }

  pub fn port(&self) -> Port {
    self.port
  }

  /// Check whether a slave acknowledges `address`
  pub fn ping(&self, address: u8) -> Result<(), Error<P::Error>> {
    let mut link = self.start_command(address, Direction::Write, "ping")?;
    let result = match self.peripheral.queue_stop(&mut link) {
      Ok(()) => with_lock(self.lock, || {
        self.peripheral.cmd_begin(self.port, &mut link, &mut [], PING_TIMEOUT_MS)
      }),
      Err(err) => Err(err),
    };
    self.peripheral.link_delete(link);

    result.map_err(|err| {
      error!("Ping 0x{:x} failed: {:?}", address, err);
      Error::Bus(err)
    })
  }

  /// Read one register of the slave at `address`
  pub fn read_register(&self, address: u8, reg: u8) -> Result<u8, Error<P::Error>> {
    let mut value = [0u8; 1];
    self.read_registers(address, reg, &mut value)?;
    Ok(value[0])
  }

  /// Write one register of the slave at `address`
  pub fn write_register(&self, address: u8, reg: u8, value: u8) -> Result<(), Error<P::Error>> {
    let mut op = self.create_write_op(address, Some(reg), "write_register");
    op.write_byte(value)?;
    op.execute()
  }

  /// Read a block of consecutive registers, starting at `reg`, in one transaction
  pub fn read_registers(&self, address: u8, reg: u8, values: &mut [u8]) -> Result<(), Error<P::Error>> {
    let mut op = self.create_read_op(address, Some(reg), "read_registers");
    op.read(values)?;
    op.execute()
  }

  /// Write a block of consecutive registers, starting at `reg`, in one transaction
  pub fn write_registers(&self, address: u8, reg: u8, values: &[u8]) -> Result<(), Error<P::Error>> {
    let mut op = self.create_write_op(address, Some(reg), "write_registers");
    op.write(values)?;
    op.execute()
  }

  /// Set specific bits in a register: all bits must be high that you wish to set
  pub fn set_register_bits(&self, address: u8, reg: u8, bits: u8) -> Result<(), Error<P::Error>> {
    let value = self.read_register(address, reg)?;
    self.write_register(address, reg, value | bits)
  }

  /// Clear specific bits in a register: all bits must be high that you wish to clear
  pub fn clear_register_bits(&self, address: u8, reg: u8, bits: u8) -> Result<(), Error<P::Error>> {
    let value = self.read_register(address, reg)?;
    self.write_register(address, reg, value & !bits)
  }

  /// If `set` is true, set the high bits given in `bits`, otherwise clear those bits
  pub fn update_register_bits(&self, address: u8, reg: u8, bits: u8, set: bool)
    -> Result<(), Error<P::Error>> {
    if set {
      self.set_register_bits(address, reg, bits)
    }
    else {
      self.clear_register_bits(address, reg, bits)
    }
  }

  /// Start a write transaction to the slave at `address`.
  /// If `reg` is given it is written as the first byte, so following
  /// writes land in `reg` onwards.
  ///
  /// Check [`Transaction::is_ready`]: if the start could not be queued the
  /// returned transaction is null and every call on it fails.
  pub fn create_write_op<'b>(&'b self, address: u8, reg: Option<u8>, name: &'static str)
    -> Transaction<'b, P, M> {
    let link = self.start_command(address, Direction::Write, name).and_then(|mut link| {
      match reg {
        Some(reg) => match self.peripheral.queue_write_byte(&mut link, reg, ACK_CHECK_EN) {
          Ok(()) => Ok(link),
          Err(err) => self.abandon(link, err, name, "create_write_op"),
        },
        None => Ok(link),
      }
    });
    self.transaction(link, name)
  }

  /// Start a read transaction from the slave at `address`.
  /// If `reg` is given, the register index is written first and the bus
  /// restarted in read mode, so reads begin at `reg`.
  ///
  /// Check [`Transaction::is_ready`]: if the start could not be queued the
  /// returned transaction is null and every call on it fails.
  pub fn create_read_op<'b>(&'b self, address: u8, reg: Option<u8>, name: &'static str)
    -> Transaction<'b, P, M> {
    let link = match reg {
      Some(reg) => self.start_command(address, Direction::Write, name).and_then(|mut link| {
        let queued = self.peripheral.queue_write_byte(&mut link, reg, ACK_CHECK_EN)
          .and_then(|()| self.peripheral.queue_start(&mut link))
          .and_then(|()| {
            self.peripheral.queue_write_byte(&mut link, Direction::Read.address_byte(address), ACK_CHECK_EN)
          });
        match queued {
          Ok(()) => Ok(link),
          Err(err) => self.abandon(link, err, name, "create_read_op"),
        }
      }),
      None => self.start_command(address, Direction::Read, name),
    };
    self.transaction(link, name)
  }

  fn transaction<'b>(&'b self, link: Result<P::Link, Error<P::Error>>, name: &'static str)
    -> Transaction<'b, P, M> {
    match link {
      Ok(link) => Transaction::new(self.peripheral, self.port, self.lock, link, self.timeout_ms, name),
      Err(_) => Transaction::null(self.peripheral, self.port, self.lock, name),
    }
  }

  // Allocate a link and queue start + address; the link is released on failure
  fn start_command(&self, address: u8, direction: Direction, name: &str)
    -> Result<P::Link, Error<P::Error>> {
    let mut link = match self.peripheral.link_create() {
      Some(link) => link,
      None => {
        error!("{} failed: no I2C command link available", name);
        return Err(Error::NoResources);
      }
    };
    let queued = self.peripheral.queue_start(&mut link).and_then(|()| {
      self.peripheral.queue_write_byte(&mut link, direction.address_byte(address), ACK_CHECK_EN)
    });
    match queued {
      Ok(()) => {
        debug!("{}: started {:?} to 0x{:x}", name, direction, address);
        Ok(link)
      }
      Err(err) => self.abandon(link, err, name, "start"),
    }
  }

  fn abandon(&self, link: P::Link, err: P::Error, name: &str, what: &str)
    -> Result<P::Link, Error<P::Error>> {
    error!("{} {} failed: {:?}", name, what, err);
    self.peripheral.link_delete(link);
    Err(Error::Bus(err))
  }
}
