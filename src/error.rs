//! Crate-wide error types.
//!
//! Each layer (transport, DP, AP, discovery, flashing) defines its own
//! narrow error enum; [`Error`] composes them for callers that don't care
//! which layer failed.

use thiserror::Error;

/// Errors surfaced by the platform-specific SWD/JTAG transport.
///
/// This crate does not implement the wire transport (bit-banging or
/// USB-to-probe plumbing); it only depends on this error type being
/// returned by whatever implements [`crate::probe::RawDapAccess`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DebugProbeError {
    /// The probe exhausted its ack-retry budget waiting for a WAIT response
    /// to clear.
    #[error("probe timed out waiting for a WAIT response to clear")]
    Timeout,
    /// The target returned a protocol-level FAULT acknowledgement.
    #[error("target returned a FAULT acknowledgement")]
    Fault,
    /// Any other probe-specific transport failure (USB disconnect, parity
    /// error on the wire, etc).
    #[error("probe transport error: {0}")]
    ProbeSpecific(String),
}

/// Errors from the DP manager (component B).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DebugPortError {
    /// A transport-level fault occurred talking to the DP. Sticky until
    /// [`crate::dp::DebugPort::clear_error`] is called.
    #[error("transport fault communicating with the debug port")]
    Fault(#[from] DebugProbeError),
    /// A bounded wait (reset ack, power-up ack) expired.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    /// The DP has a sticky error set from a previous operation; the caller
    /// must clear it before continuing.
    #[error("debug port is in a faulted state")]
    Faulted,
}

/// Errors from the AP manager / MEM-AP memory engine (components C, D).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessPortError {
    /// Access to an address not aligned to the requested transfer size.
    #[error("address {0:#010x} is not aligned for a {1}-byte transfer")]
    MemoryNotAligned(u32, u8),
    /// The underlying DP access failed.
    #[error(transparent)]
    DebugPort(#[from] DebugPortError),
    /// The AP addressed by `apsel` does not exist (IDR read as zero).
    #[error("no access port at APSEL {0}")]
    ApNotPresent(u8),
}

/// Errors from the CoreSight discovery engine (component E).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RomTableError {
    /// Reading component identification registers failed.
    #[error(transparent)]
    AccessPort(#[from] AccessPortError),
    /// The DP accumulated a sticky fault mid-walk; discovery must abort.
    #[error("debug port faulted during component identification")]
    DebugPortFaulted,
}

/// Errors from the flash driver (components G, H).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error(transparent)]
    AccessPort(#[from] AccessPortError),
    /// The device-information page did not match any known schema / family.
    #[error("device not recognized: {0}")]
    UnrecognizedDevice(String),
    /// A flash operation (erase or write) was aborted by the MSC reporting
    /// an error status, or by a sticky DP fault.
    #[error("flash operation aborted: {0}")]
    Aborted(String),
    /// The on-target stub did not complete within its allotted time.
    #[error("flash stub timed out")]
    StubTimeout,
}

/// Errors from the Authentication Access Port unlock path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AapError {
    #[error(transparent)]
    AccessPort(#[from] AccessPortError),
    /// The AP's IDR did not match the AAP signature.
    #[error("access port is not an authentication access port")]
    NotAnAap,
    /// `DEVICEERASE` did not complete.
    #[error("device erase timed out")]
    EraseTimeout,
}

/// Crate-wide error, composed from the per-layer errors above.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    DebugPort(#[from] DebugPortError),
    #[error(transparent)]
    AccessPort(#[from] AccessPortError),
    #[error(transparent)]
    RomTable(#[from] RomTableError),
    #[error(transparent)]
    Flash(#[from] FlashError),
    #[error(transparent)]
    Aap(#[from] AapError),
}
