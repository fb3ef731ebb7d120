//! Target command surface — component I.
//!
//! A `Target` is created lazily by a matched core probe (§3 lifecycle) and
//! carries its flash/RAM regions and command table for the session's
//! remaining lifetime. Replaces the source's driver-tag string-packing
//! trick (Design Note 9.1) with a plain context struct.

use crate::ap::AccessPort;
use crate::error::{Error, FlashError};
use crate::probe::{RawDapAccess, StubRunner};

/// Per-target state a family driver needs to recover in its command/erase/
/// write handlers — what the source packed into bytes of a driver-tag
/// string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetContext {
    pub device_index: usize,
    pub di_version: u8,
    pub msc_base: u32,
}

pub type EraseFn<P> = fn(&mut Target<P>, u32, usize) -> Result<(), FlashError>;
/// Takes the external stub-run facility (§4.H step 3) as an explicit
/// argument rather than captured state, since it's the one flash operation
/// that needs the Cortex-M core driver rather than just register access.
pub type WriteFn<P> = fn(&mut Target<P>, u32, &[u8], &mut dyn StubRunner<P>) -> Result<(), FlashError>;
pub type CommandFn<P> = fn(&mut Target<P>, &[&str]) -> Result<String, Error>;

/// One contiguous flash range and the family driver functions that erase
/// and program it (§3 "Flash region").
pub struct FlashRegion<P> {
    pub start: u32,
    pub length: u32,
    pub blocksize: u32,
    pub erase_fn: EraseFn<P>,
    pub write_fn: WriteFn<P>,
    pub buffer_size: u32,
}

/// One contiguous RAM range.
#[derive(Debug, Clone, Copy)]
pub struct RamRegion {
    pub start: u32,
    pub length: u32,
}

/// A named, family-contributed CLI verb (§4.I).
pub struct Command<P> {
    pub name: &'static str,
    pub handler: CommandFn<P>,
}

/// The debug target attached to a probed core. Holds the AP it was
/// discovered on, plus whatever flash/RAM regions and commands the family
/// driver attached.
pub struct Target<P> {
    pub name: String,
    pub ap: AccessPort<P>,
    pub inhibit_srst: bool,
    pub context: TargetContext,
    pub flash_regions: Vec<FlashRegion<P>>,
    pub ram_regions: Vec<RamRegion>,
    pub commands: Vec<Command<P>>,
}

impl<P: RawDapAccess> Target<P> {
    pub fn new(name: impl Into<String>, ap: AccessPort<P>) -> Self {
        Target {
            name: name.into(),
            ap,
            inhibit_srst: false,
            context: TargetContext::default(),
            flash_regions: Vec::new(),
            ram_regions: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn find_command(&self, name: &str) -> Option<CommandFn<P>> {
        self.commands.iter().find(|c| c.name == name).map(|c| c.handler)
    }

    pub fn flash_region_containing(&self, addr: u32) -> Option<usize> {
        self.flash_regions
            .iter()
            .position(|r| addr >= r.start && addr < r.start + r.length)
    }
}
