//! ADIv5 debug transport, a recursive CoreSight discovery engine, and an
//! EFM32/EFR32/EZR32 flash controller driver built on top of them.
//!
//! This crate does not talk to hardware itself: the SWD/JTAG bit-banging
//! transport ([`probe::RawDapAccess`]), the platform clock
//! ([`probe::PlatformTimeout`]), and the Cortex-M/Cortex-A core drivers
//! ([`probe::CoreProbe`], [`probe::StubRunner`]) are all supplied by the
//! caller. What lives here is everything ADIv5 and CoreSight define in
//! terms of register reads and writes over that transport: the Debug Port
//! manager, the Access Port manager and MEM-AP memory engine, the ROM-table
//! walk, and (behind the `builtin-targets` feature) the EFM32 family
//! driver.
//!
//! ```text
//! dp        - Debug Port manager (component B)
//! ap        - Access Port manager (component C)
//! memory_ap - MEM-AP memory engine (component D)
//! component - CoreSight identification register decoding
//! rom_table - recursive discovery engine (component E)
//! probe     - external collaborator traits (transport, timeout, core probes)
//! error     - crate-wide error types
//! target    - per-target flash/RAM region and command surface (component I)
//! device_info, msc, aap, efm32 - EFM32 flash driver (components G, H)
//! mock      - in-memory test transport (feature `test`)
//! ```

pub mod ap;
pub mod component;
pub mod dp;
pub mod error;
pub mod memory_ap;
pub mod probe;
pub mod rom_table;
pub mod target;

#[cfg(any(test, feature = "test"))]
pub mod mock;

#[cfg(feature = "builtin-targets")]
pub mod aap;
#[cfg(feature = "builtin-targets")]
pub mod device_info;
#[cfg(feature = "builtin-targets")]
pub mod efm32;
#[cfg(feature = "builtin-targets")]
pub mod msc;

pub use error::Error;
