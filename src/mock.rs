//! Recording I2C peripheral for the unit tests.
//!
//! Queue calls are counted, and `cmd_begin` replays each link onto a
//! simulated wire one event at a time. Every slave behaves like a typical RTC:
//! the first byte written after addressing sets its register pointer, further
//! writes and reads auto-increment it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::vec;
use std::vec::Vec;

use crate::{BusConfig, Direction, I2cPeripheral, Port, ReadAck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
  QueueRejected,
  AddressNack(u8),
  DataNack,
  Unconfigured,
}

/// Something observed on the simulated wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  Start,
  Address(u8, Direction),
  Write(u8),
  Read(ReadAck),
  Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
  Start,
  Write(Vec<u8>),
  Read(usize, ReadAck),
  Stop,
}

#[derive(Debug, Default)]
pub struct MockLink {
  commands: Vec<Command>,
}

struct Device {
  memory: [u8; 256],
  pointer: u8,
}

impl Default for Device {
  fn default() -> Self {
    Device { memory: [0u8; 256], pointer: 0 }
  }
}

#[derive(Default)]
struct Inner {
  fail_start: bool,
  fail_stop: bool,
  fail_link_create: bool,
  nacked: Vec<u8>,
  devices: HashMap<u8, Device>,
  configured: Vec<(Port, BusConfig)>,
  links_created: usize,
  links_deleted: usize,
  queue_calls: usize,
  begin_calls: usize,
  timeouts: Vec<u32>,
  wire: Vec<(ThreadId, Event)>,
}

#[derive(Default)]
pub struct MockBus {
  inner: Mutex<Inner>,
}

impl MockBus {
  pub fn new() -> Self {
    Self::default()
  }

  fn state(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap()
  }

  /// Make every queued start condition fail
  pub fn fail_start(&self, fail: bool) {
    self.state().fail_start = fail;
  }

  /// Make every queued stop condition fail
  pub fn fail_stop(&self, fail: bool) {
    self.state().fail_stop = fail;
  }

  /// Make link allocation fail
  pub fn fail_link_create(&self, fail: bool) {
    self.state().fail_link_create = fail;
  }

  /// The slave at `address` will not acknowledge its address
  pub fn nack_address(&self, address: u8) {
    self.state().nacked.push(address);
  }

  pub fn set_register(&self, address: u8, reg: u8, value: u8) {
    self.state().devices.entry(address).or_default().memory[reg as usize] = value;
  }

  pub fn register(&self, address: u8, reg: u8) -> u8 {
    self.state().devices.get(&address).map_or(0, |dev| dev.memory[reg as usize])
  }

  pub fn wire(&self) -> Vec<Event> {
    self.state().wire.iter().map(|(_, event)| *event).collect()
  }

  pub fn wire_with_threads(&self) -> Vec<(ThreadId, Event)> {
    self.state().wire.clone()
  }

  pub fn count(&self, event: Event) -> usize {
    self.state().wire.iter().filter(|(_, e)| *e == event).count()
  }

  pub fn links_created(&self) -> usize {
    self.state().links_created
  }

  /// Links created but not yet deleted
  pub fn links_live(&self) -> usize {
    let state = self.state();
    state.links_created - state.links_deleted
  }

  pub fn queue_calls(&self) -> usize {
    self.state().queue_calls
  }

  pub fn begin_calls(&self) -> usize {
    self.state().begin_calls
  }

  /// Timeout handed to each `cmd_begin`, in call order
  pub fn timeouts(&self) -> Vec<u32> {
    self.state().timeouts.clone()
  }

  /// Total number of peripheral calls of any kind
  pub fn calls(&self) -> usize {
    let state = self.state();
    state.links_created + state.links_deleted + state.queue_calls + state.begin_calls
  }

  pub fn configured(&self) -> Vec<(Port, BusConfig)> {
    self.state().configured.clone()
  }

  // Each event takes the state lock on its own and yields afterwards,
  // so unserialized transfers from several threads interleave on the wire.
  fn record(&self, event: Event) {
    self.state().wire.push((thread::current().id(), event));
    thread::yield_now();
  }

  fn queue(&self, link: &mut MockLink, command: Command) -> Result<(), MockFault> {
    let mut state = self.state();
    state.queue_calls += 1;
    let rejected = match command {
      Command::Start => state.fail_start,
      Command::Stop => state.fail_stop,
      _ => false,
    };
    if rejected {
      return Err(MockFault::QueueRejected);
    }
    link.commands.push(command);
    Ok(())
  }

  fn device_write(&self, address: u8, byte: u8, set_pointer: bool) {
    let mut state = self.state();
    let dev = state.devices.entry(address).or_default();
    if set_pointer {
      dev.pointer = byte;
    }
    else {
      dev.memory[dev.pointer as usize] = byte;
      dev.pointer = dev.pointer.wrapping_add(1);
    }
  }

  fn device_read(&self, address: u8) -> u8 {
    let mut state = self.state();
    let dev = state.devices.entry(address).or_default();
    let value = dev.memory[dev.pointer as usize];
    dev.pointer = dev.pointer.wrapping_add(1);
    value
  }
}

impl I2cPeripheral for MockBus {
  type Error = MockFault;
  type Link = MockLink;

  fn configure(&self, port: Port, config: &BusConfig) -> Result<(), Self::Error> {
    self.state().configured.push((port, *config));
    Ok(())
  }

  fn link_create(&self) -> Option<Self::Link> {
    let mut state = self.state();
    if state.fail_link_create {
      return None;
    }
    state.links_created += 1;
    Some(MockLink::default())
  }

  fn link_delete(&self, _link: Self::Link) {
    self.state().links_deleted += 1;
  }

  fn queue_start(&self, link: &mut Self::Link) -> Result<(), Self::Error> {
    self.queue(link, Command::Start)
  }

  fn queue_write_byte(&self, link: &mut Self::Link, byte: u8, _ack_check: bool)
    -> Result<(), Self::Error> {
    self.queue(link, Command::Write(vec![byte]))
  }

  fn queue_write(&self, link: &mut Self::Link, bytes: &[u8], _ack_check: bool)
    -> Result<(), Self::Error> {
    self.queue(link, Command::Write(bytes.to_vec()))
  }

  fn queue_read(&self, link: &mut Self::Link, len: usize, ack: ReadAck)
    -> Result<(), Self::Error> {
    self.queue(link, Command::Read(len, ack))
  }

  fn queue_stop(&self, link: &mut Self::Link) -> Result<(), Self::Error> {
    self.queue(link, Command::Stop)
  }

  fn cmd_begin(&self, port: Port, link: &mut Self::Link, reads: &mut [&mut [u8]], timeout_ms: u32)
    -> Result<(), Self::Error> {
    {
      let mut state = self.state();
      state.begin_calls += 1;
      state.timeouts.push(timeout_ms);
      if !state.configured.is_empty() && !state.configured.iter().any(|(p, _)| *p == port) {
        return Err(MockFault::Unconfigured);
      }
    }

    let mut reads = reads.iter_mut();
    let mut expect_address = false;
    let mut addressed: Option<(u8, Direction)> = None;
    let mut pointer_pending = false;

    for command in link.commands.iter() {
      match command {
        Command::Start => {
          self.record(Event::Start);
          expect_address = true;
        }
        Command::Write(bytes) => {
          for &byte in bytes.iter() {
            if expect_address {
              expect_address = false;
              let address = byte >> 1;
              let direction = if byte & 1 == 1 { Direction::Read } else { Direction::Write };
              self.record(Event::Address(address, direction));
              if self.state().nacked.contains(&address) {
                self.record(Event::Stop);
                return Err(MockFault::AddressNack(address));
              }
              addressed = Some((address, direction));
              pointer_pending = direction == Direction::Write;
              continue;
            }
            self.record(Event::Write(byte));
            match addressed {
              Some((address, Direction::Write)) => {
                self.device_write(address, byte, pointer_pending);
                pointer_pending = false;
              }
              _ => {
                self.record(Event::Stop);
                return Err(MockFault::DataNack);
              }
            }
          }
        }
        Command::Read(len, ack) => {
          let dest = reads.next().expect("read destination for every queued read");
          assert_eq!(dest.len(), *len, "read destination length");
          for slot in dest.iter_mut() {
            self.record(Event::Read(*ack));
            *slot = match addressed {
              Some((address, Direction::Read)) => self.device_read(address),
              _ => 0xFF,
            };
          }
        }
        Command::Stop => self.record(Event::Stop),
      }
    }
    Ok(())
  }
}
