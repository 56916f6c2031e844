/// Errors reported by the bus controller and its transactions.
/// `E` is the error type of the underlying [`I2cPeripheral`](crate::I2cPeripheral).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
  /// The peripheral rejected a queued command, or the transmission failed
  /// (address or data NACK, timeout, bus busy).
  Bus(E),
  /// No command link could be allocated
  NoResources,
  /// The transaction is null, has already failed, or has already been executed
  InvalidState,
  /// The transaction has no room left for another read destination
  TooManyReads,
}

