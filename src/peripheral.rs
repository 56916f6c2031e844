//! The platform-provided I2C master peripheral consumed by the bus controller.
//!
//! The interface follows the "command link" model: a caller allocates a link,
//! queues start / address / data / read / stop commands into it, then hands
//! the whole link to the peripheral which transmits it in one blocking call.

/// Identifies one physical I2C controller (port) of the microcontroller
pub type Port = u8;

/// Default bus clock, standard mode
pub const DEFAULT_CLOCK_HZ: u32 = 100_000;

/// Transfer direction encoded in bit 0 of the address byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Write = 0,
  Read = 1,
}

impl Direction {
  /// The address byte sent on the wire for a 7-bit `address` in this direction.
  /// Only 7-bit addressing is supported: `address` must be below 0x80.
  pub fn address_byte(self, address: u8) -> u8 {
    debug_assert!(address < 0x80, "I2C address 0x{:x} is not 7-bit", address);
    (address << 1) | self as u8
  }
}

/// Acknowledge sent by the master after each byte it reads.
/// The final byte of a read sequence must be NACKed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAck {
  Ack,
  Nack,
}

/// Pin and clock configuration for one I2C port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
  pub sda_gpio: u8,
  pub scl_gpio: u8,
  pub clock_hz: u32,
  /// Enable the internal pull-ups on SDA and SCL
  pub pullups: bool,
}

impl BusConfig {
  /// Standard-mode (100 kHz) configuration with external pull-ups
  pub fn new(sda_gpio: u8, scl_gpio: u8) -> Self {
    BusConfig {
      sda_gpio,
      scl_gpio,
      clock_hz: DEFAULT_CLOCK_HZ,
      pullups: false,
    }
  }

  pub fn with_clock_hz(mut self, clock_hz: u32) -> Self {
    self.clock_hz = clock_hz;
    self
  }

  pub fn with_pullups(mut self, pullups: bool) -> Self {
    self.pullups = pullups;
    self
  }
}

/// A command-link I2C master.
///
/// Queue methods only record commands in the link; nothing touches the wire
/// until [`cmd_begin`](I2cPeripheral::cmd_begin). All methods take `&self`:
/// the peripheral is shared by every controller on the bus and keeps whatever
/// interior state it needs.
pub trait I2cPeripheral {
  /// Error type
  type Error: core::fmt::Debug;

  /// Native command link handle
  type Link;

  /// Configure pins and clock for `port` and install the master driver
  fn configure(&self, port: Port, config: &BusConfig) -> Result<(), Self::Error>;

  /// Allocate an empty command link, `None` if none is available
  fn link_create(&self) -> Option<Self::Link>;

  /// Release a command link and everything queued in it
  fn link_delete(&self, link: Self::Link);

  /// Queue a start (or repeated start) condition
  fn queue_start(&self, link: &mut Self::Link) -> Result<(), Self::Error>;

  /// Queue a single byte write.
  /// With `ack_check` the transmission fails if the slave does not ACK the byte.
  fn queue_write_byte(&self, link: &mut Self::Link, byte: u8, ack_check: bool)
    -> Result<(), Self::Error>;

  /// Queue a multi-byte write; the bytes are copied into the link
  fn queue_write(&self, link: &mut Self::Link, bytes: &[u8], ack_check: bool)
    -> Result<(), Self::Error>;

  /// Queue a read of `len` bytes, each answered with `ack`
  fn queue_read(&self, link: &mut Self::Link, len: usize, ack: ReadAck)
    -> Result<(), Self::Error>;

  /// Queue a stop condition
  fn queue_stop(&self, link: &mut Self::Link) -> Result<(), Self::Error>;

  /// Transmit everything queued in `link` on `port`, blocking until the
  /// transfer completes or `timeout_ms` elapses.
  /// - `reads` holds one destination per queued read, in queue order,
  /// each exactly as long as the length given to `queue_read`.
  fn cmd_begin(&self, port: Port, link: &mut Self::Link, reads: &mut [&mut [u8]], timeout_ms: u32)
    -> Result<(), Self::Error>;
}
