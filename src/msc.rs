//! EFM32 Memory System Controller (MSC) register access — flash driver
//! component H.
//!
//! Register offsets from the MSC base are not uniform: three silicon
//! generations relocated a handful of registers, keyed off the base
//! address itself (§4.G / §4.H, `EFM32_MSC_*` macros).

use crate::ap::AccessPort;
use crate::error::FlashError;
use crate::memory_ap::{mem_read, mem_write};
use crate::probe::{RawDapAccess, StubRunner};

/// Third-generation (xG21/xG22) MSC base; registers from `WRITECTRL`
/// onward sit one word earlier than on every other generation.
const MSC_BASE_GEN3: u32 = 0x4003_0000;
/// First-generation and relocated second-generation (GG11/TG11/GG12) MSC
/// bases, which additionally share `LOCK`'s offset with `MSC_BASE_GEN3`.
const MSC_BASE_GEN1: u32 = 0x400c_0000;

fn writectrl(msc: u32) -> u32 {
    msc + if msc == MSC_BASE_GEN3 { 0x0c } else { 0x08 }
}
fn writecmd(msc: u32) -> u32 {
    msc + if msc == MSC_BASE_GEN3 { 0x10 } else { 0x0c }
}
fn addrb(msc: u32) -> u32 {
    msc + if msc == MSC_BASE_GEN3 { 0x14 } else { 0x10 }
}
fn wdata(msc: u32) -> u32 {
    msc + 0x018
}
fn status(msc: u32) -> u32 {
    msc + 0x01c
}
fn lock(msc: u32) -> u32 {
    msc + if msc == MSC_BASE_GEN3 || msc == MSC_BASE_GEN1 { 0x3c } else { 0x40 }
}
fn masslock(msc: u32) -> u32 {
    msc + if msc == MSC_BASE_GEN3 { 0x40 } else { 0x54 }
}

const LOCK_LOCKKEY: u32 = 0x1b71;
const MASSLOCK_LOCKKEY: u32 = 0x631a;

const WRITECMD_LADDRIM: u32 = 1 << 0;
const WRITECMD_ERASEPAGE: u32 = 1 << 1;
const WRITECMD_WRITEONCE: u32 = 1 << 3;
const WRITECMD_ERASEMAIN0: u32 = 1 << 8;

const STATUS_BUSY: u32 = 1 << 0;

fn read_word<P: RawDapAccess>(ap: &mut AccessPort<P>, addr: u32) -> Result<u32, FlashError> {
    let mut buf = [0u8; 4];
    mem_read(ap, &mut buf, addr)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_word<P: RawDapAccess>(ap: &mut AccessPort<P>, addr: u32, value: u32) -> Result<(), FlashError> {
    mem_write(ap, &value.to_le_bytes(), addr)?;
    Ok(())
}

fn unlock<P: RawDapAccess>(ap: &mut AccessPort<P>, msc: u32) -> Result<(), FlashError> {
    write_word(ap, lock(msc), LOCK_LOCKKEY)?;
    write_word(ap, writectrl(msc), 1)
}

fn poll_busy<P: RawDapAccess>(ap: &mut AccessPort<P>, msc: u32) -> Result<(), FlashError> {
    loop {
        let value = read_word(ap, status(msc))?;
        if value & STATUS_BUSY == 0 {
            return Ok(());
        }
    }
}

/// Erase `len` bytes starting at `addr`, one `blocksize`-sized row at a
/// time (§4.H / Scenario S4).
pub fn erase_pages<P: RawDapAccess>(
    ap: &mut AccessPort<P>,
    msc: u32,
    addr: u32,
    len: usize,
    blocksize: u32,
) -> Result<(), FlashError> {
    unlock(ap, msc)?;

    let mut addr = addr;
    let mut remaining = len as u32;
    while remaining > 0 {
        write_word(ap, addrb(msc), addr)?;
        write_word(ap, writecmd(msc), WRITECMD_LADDRIM)?;
        write_word(ap, writecmd(msc), WRITECMD_ERASEPAGE)?;
        poll_busy(ap, msc)?;

        addr += blocksize;
        remaining = remaining.saturating_sub(blocksize);
    }
    Ok(())
}

/// Program `data` at `dest` by uploading a flash-write stub and its input
/// buffer into SRAM and running it (§4.H step 3). The stub's binary is an
/// opaque byte array (§9: "treat it as an opaque byte array provided by
/// the build"); running it is delegated to `runner`.
pub fn write_via_stub<P: RawDapAccess>(
    ap: &mut AccessPort<P>,
    msc: u32,
    dest: u32,
    data: &[u8],
    stub: &[u8],
    sram_base: u32,
    runner: &mut dyn StubRunner<P>,
) -> Result<(), FlashError> {
    let stub_len = stub.len() as u32;
    let buffer_base = (sram_base + stub_len + 3) & !3;

    mem_write(ap, stub, sram_base)?;
    mem_write(ap, data, buffer_base)?;
    runner.run_stub(ap, sram_base, dest, buffer_base, data.len(), msc)
}

/// Erase the entire main flash array via `ERASEMAIN0` (§4.H mass erase,
/// distinct from the page-by-page path above).
pub fn mass_erase<P: RawDapAccess>(ap: &mut AccessPort<P>, msc: u32) -> Result<(), FlashError> {
    write_word(ap, writectrl(msc), 1)?;
    write_word(ap, masslock(msc), MASSLOCK_LOCKKEY)?;
    write_word(ap, writecmd(msc), WRITECMD_ERASEMAIN0)?;
    poll_busy(ap, msc)?;
    write_word(ap, masslock(msc), 0)?;
    Ok(())
}

/// Flip `CLW0.BOOTLOADER_ENABLE` via a single-word `WRITEONCE` program,
/// the lock-bits write path used by the `bootloader` command.
pub fn write_clw0<P: RawDapAccess>(
    ap: &mut AccessPort<P>,
    msc: u32,
    clw0_addr: u32,
    value: u32,
) -> Result<(), FlashError> {
    unlock(ap, msc)?;
    write_word(ap, addrb(msc), clw0_addr)?;
    write_word(ap, writecmd(msc), WRITECMD_LADDRIM)?;
    write_word(ap, wdata(msc), value)?;
    write_word(ap, writecmd(msc), WRITECMD_WRITEONCE)?;
    poll_busy(ap, msc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dp::DebugPort;
    use crate::mock::MockDapTransport;
    use crate::probe::PortType;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn mock_ap() -> (Rc<RefCell<DebugPort<MockDapTransport>>>, AccessPort<MockDapTransport>) {
        let mut transport = MockDapTransport::new();
        transport.add_memory_ap(0, 0x0477_0031, 0x2000_0000);
        let dp = Rc::new(RefCell::new(DebugPort::new(transport)));
        let ap = AccessPort::ap_new(dp.clone(), 0).unwrap().unwrap();
        (dp, ap)
    }

    #[test]
    fn erase_pages_issues_scenario_s4_sequence() {
        let (dp, mut ap) = mock_ap();
        let msc = MSC_BASE_GEN1;
        erase_pages(&mut ap, msc, 0x0000_0000, 4096, 2048).unwrap();

        let dp = dp.borrow();
        let drw_writes: Vec<u32> = dp
            .probe()
            .log
            .iter()
            .filter(|e| e.port == PortType::AccessPort && e.write && e.addr == 0x0C)
            .map(|e| e.value)
            .collect();
        // LOCK, WRITECTRL(=1), then per page: ADDRB, WRITECMD(LADDRIM),
        // WRITECMD(ERASEPAGE) -- two pages here.
        assert_eq!(drw_writes.len(), 2 + 3 * 2);
    }

    #[test]
    fn mass_erase_relocks_after_completion() {
        let (dp, mut ap) = mock_ap();
        let msc = MSC_BASE_GEN1;
        mass_erase(&mut ap, msc).unwrap();

        let dp = dp.borrow();
        let masslock_addr = masslock(msc);
        let last_masslock_write = dp
            .probe()
            .log
            .iter()
            .filter(|e| e.port == PortType::AccessPort && e.write)
            .filter(|e| {
                // DRW writes carry the lane-packed word, not the register
                // address, so inspect the preceding TAR write instead.
                e.addr == 0x04 && e.value == masslock_addr
            })
            .count();
        assert!(last_masslock_write >= 2);
    }
}
