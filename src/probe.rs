//! External collaborator interfaces.
//!
//! This module names the boundary between this crate and the pieces the
//! spec explicitly keeps out of scope: the SWD/JTAG bit-banging transport,
//! and the Cortex-M / Cortex-A core drivers. Callers of this crate supply
//! implementations; this crate never implements them itself.

use crate::error::DebugProbeError;

/// Distinguishes a DP register transaction from an AP register transaction
/// on the wire (the `APnDP` bit of an SWD request, or the equivalent JTAG
/// IR selection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    DebugPort,
    AccessPort,
}

/// One raw DP or AP register transaction.
///
/// Implemented by the platform-specific probe driver. A single read or
/// write here corresponds to one 3-phase SWD (or JTAG DR-scan) transaction,
/// including the probe's own WAIT-retry policy; by the time this trait
/// returns, the ack/retry/timeout handling below the register level is
/// already resolved. Only the low 4 bits of `addr` are significant — bank
/// switching (writing `SELECT`) is entirely the caller's responsibility.
pub trait RawDapAccess {
    /// Read the 32-bit value at the given register address.
    fn raw_read_register(&mut self, port: PortType, addr: u8) -> Result<u32, DebugProbeError>;

    /// Write a 32-bit value to the given register address.
    fn raw_write_register(
        &mut self,
        port: PortType,
        addr: u8,
        value: u32,
    ) -> Result<(), DebugProbeError>;
}

/// Blocks the calling thread until `deadline_ms` milliseconds have elapsed
/// or `poll` returns `true`, whichever comes first.
///
/// Out of scope per the spec: platform-specific timer wrappers. Provided as
/// a trait so the DP reset sequence and MSC busy-polls can depend on it
/// without this crate owning a clock.
pub trait PlatformTimeout {
    /// Spin-poll `condition` until it returns true or `deadline_ms`
    /// elapses. Returns `true` if the condition was observed, `false` on
    /// timeout.
    fn poll_until(&mut self, deadline_ms: u64, condition: impl FnMut(&mut Self) -> bool) -> bool
    where
        Self: Sized;
}

/// Entry points into the Cortex-M / Cortex-A core drivers.
///
/// Out of scope per the spec: everything below "is this a Cortex-M/A core
/// and should I attach a target for it" belongs to those drivers. The
/// discovery engine (component E) only needs to know whether a probe
/// consumed the component.
pub trait CoreProbe<P> {
    /// Called when discovery identifies a Cortex-M core (or after
    /// `probe_armv8` resolves to `CortexM`). `forced` is `true` only for
    /// the post-walk fallback described in §4.E / §7.
    fn probe_cortexm(&mut self, ap: &mut crate::ap::AccessPort<P>, forced: bool) -> bool;

    /// Called when discovery identifies a Cortex-A core (or after
    /// `probe_armv8` resolves to `CortexA`). `base` is the component's
    /// 4 KiB-aligned base address.
    fn probe_cortexa(&mut self, ap: &mut crate::ap::AccessPort<P>, base: u64) -> bool;
}

/// Runs an already-uploaded flash-write stub on the attached Cortex-M core.
///
/// Out of scope per the spec: single-stepping/running the core and
/// detecting stub completion (watchpoint or timeout) belongs to the
/// Cortex-M core driver, not this crate (§4.H step 3).
pub trait StubRunner<P> {
    /// Run the stub loaded at `stub_entry`, which copies `len` bytes from
    /// `buffer_base` to `dest` using `msc_base`'s MSC, then returns control.
    fn run_stub(
        &mut self,
        ap: &mut crate::ap::AccessPort<P>,
        stub_entry: u32,
        dest: u32,
        buffer_base: u32,
        len: usize,
        msc_base: u32,
    ) -> Result<(), crate::error::FlashError>;
}
