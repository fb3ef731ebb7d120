//! MEM-AP memory engine — component D.
//!
//! Sized and aligned reads/writes of the target's 32-bit address space
//! through `CSW`/`TAR`/`DRW`, with the pipeline priming and 1 KiB
//! auto-increment rearm described in §4.D.

use crate::ap::{AccessPort, Csw};
use crate::error::AccessPortError;
use crate::probe::RawDapAccess;

const CSW_ADDR: u8 = 0x00;
const TAR_ADDR: u8 = 0x04;
const DRW_ADDR: u8 = 0x0C;

/// `SIZE` field encodings for `CSW`.
const SIZE_BYTE: u8 = 0;
const SIZE_HALFWORD: u8 = 1;
const SIZE_WORD: u8 = 2;

/// Single auto-increment, per §4.D step 2.
const ADDRINC_SINGLE: u8 = 1;

const TAR_WRAP_MASK: u32 = !0x3FF;

/// The largest transfer unit (in bytes) that both `addr` and `len` support:
/// WORD if both are a multiple of 4, HALFWORD if a multiple of 2, else BYTE.
fn transfer_align(addr: u32, len: u32) -> u32 {
    fn align_of(x: u32) -> u32 {
        if x & 0x3 == 0 {
            4
        } else if x & 0x1 == 0 {
            2
        } else {
            1
        }
    }
    align_of(addr).min(align_of(len))
}

fn size_field(align: u32) -> u8 {
    match align {
        1 => SIZE_BYTE,
        2 => SIZE_HALFWORD,
        _ => SIZE_WORD,
    }
}

fn lane_extract(word: u32, addr: u32, align: u32) -> u32 {
    match align {
        1 => (word >> ((addr & 0x3) * 8)) & 0xFF,
        2 => (word >> ((addr & 0x2) * 8)) & 0xFFFF,
        _ => word,
    }
}

fn lane_pack(value: u32, addr: u32, align: u32) -> u32 {
    match align {
        1 => (value & 0xFF) << ((addr & 0x3) * 8),
        2 => (value & 0xFFFF) << ((addr & 0x2) * 8),
        _ => value,
    }
}

fn crosses_tar_wrap(prev_addr: u32, addr: u32) -> bool {
    (addr ^ prev_addr) & TAR_WRAP_MASK != 0
}

fn program_csw<P: RawDapAccess>(ap: &mut AccessPort<P>, align: u32) -> Result<(), AccessPortError> {
    let mut csw = Csw::from(ap.csw);
    csw.set_size(size_field(align));
    csw.set_addrinc(ADDRINC_SINGLE);
    ap.write_register(CSW_ADDR, csw.into())
}

/// Read `dst.len()` bytes from the target's memory space starting at `src`.
pub fn mem_read<P: RawDapAccess>(
    ap: &mut AccessPort<P>,
    dst: &mut [u8],
    src: u32,
) -> Result<(), AccessPortError> {
    let len = dst.len() as u32;
    if len == 0 {
        return Ok(());
    }
    let align = transfer_align(src, len);
    let count = len / align;

    program_csw(ap, align)?;
    ap.write_register(TAR_ADDR, src)?;
    ap.read_register(DRW_ADDR)?; // priming read, discarded

    let mut addr = src;
    let mut offset = 0usize;
    for i in 0..count {
        let word = if i == count - 1 {
            ap.read_rdbuff()?
        } else {
            ap.read_register(DRW_ADDR)?
        };
        let value = lane_extract(word, addr, align);
        write_lane(dst, offset, value, align);

        let prev_addr = addr;
        addr = addr.wrapping_add(align);
        offset += align as usize;

        if i < count - 1 && crosses_tar_wrap(prev_addr, addr) {
            ap.write_register(TAR_ADDR, addr)?;
            ap.read_register(DRW_ADDR)?; // re-prime after rearm
        }
    }
    Ok(())
}

/// Write `data` to the target's memory space starting at `dst`.
pub fn mem_write<P: RawDapAccess>(
    ap: &mut AccessPort<P>,
    data: &[u8],
    dst: u32,
) -> Result<(), AccessPortError> {
    let len = data.len() as u32;
    if len == 0 {
        return Ok(());
    }
    let align = transfer_align(dst, len);
    let count = len / align;

    program_csw(ap, align)?;
    ap.write_register(TAR_ADDR, dst)?;

    let mut addr = dst;
    let mut offset = 0usize;
    for _ in 0..count {
        let value = read_lane(data, offset, align);
        let word = lane_pack(value, addr, align);
        ap.write_register(DRW_ADDR, word)?;

        let prev_addr = addr;
        addr = addr.wrapping_add(align);
        offset += align as usize;

        if crosses_tar_wrap(prev_addr, addr) {
            ap.write_register(TAR_ADDR, addr)?;
        }
    }
    Ok(())
}

fn write_lane(dst: &mut [u8], offset: usize, value: u32, align: u32) {
    match align {
        1 => dst[offset] = value as u8,
        2 => dst[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes()),
        _ => dst[offset..offset + 4].copy_from_slice(&value.to_le_bytes()),
    }
}

fn read_lane(src: &[u8], offset: usize, align: u32) -> u32 {
    match align {
        1 => src[offset] as u32,
        2 => u16::from_le_bytes([src[offset], src[offset + 1]]) as u32,
        _ => u32::from_le_bytes([
            src[offset],
            src[offset + 1],
            src[offset + 2],
            src[offset + 3],
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dp::DebugPort;
    use crate::mock::MockDapTransport;
    use crate::probe::PortType;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;
    use test_case::test_case;

    fn mock_ap() -> AccessPort<MockDapTransport> {
        let mut transport = MockDapTransport::new();
        transport.add_memory_ap(0, 0x0477_0031, 0x2000_0000);
        let dp = Rc::new(RefCell::new(DebugPort::new(transport)));
        AccessPort::ap_new(dp, 0).unwrap().unwrap()
    }

    #[test]
    fn tar_wrap_rearms_and_reprimes() {
        let mut transport = MockDapTransport::new();
        transport.add_memory_ap(0, 0x0477_0031, 0x2000_0000);
        let dp = Rc::new(RefCell::new(DebugPort::new(transport)));
        let mut ap = AccessPort::ap_new(dp.clone(), 0).unwrap().unwrap();

        let mut dst = [0u8; 16];
        mem_read(&mut ap, &mut dst, 0x2000_0FFC).unwrap();

        let dp = dp.borrow();
        let tar_writes: Vec<u32> = dp
            .probe()
            .log
            .iter()
            .filter(|e| e.port == PortType::AccessPort && e.write && e.addr == TAR_ADDR)
            .map(|e| e.value)
            .collect();
        assert_eq!(tar_writes, vec![0x2000_0FFC, 0x2000_1000]);

        let drw_reads = dp
            .probe()
            .log
            .iter()
            .filter(|e| e.port == PortType::AccessPort && !e.write && e.addr == DRW_ADDR)
            .count();
        // 2 priming reads (initial + post-rearm) + 3 DRW data reads.
        assert_eq!(drw_reads, 5);
    }

    #[test_case(0, 4; "word aligned")]
    #[test_case(1, 4; "offset by one byte")]
    #[test_case(2, 3; "halfword aligned, odd length")]
    #[test_case(3, 9; "byte aligned, odd length")]
    fn read_write_roundtrip_is_identity(addr_offset: u32, len: usize) {
        let mut ap = mock_ap();
        let base = 0x2000_0000 + addr_offset;
        let pattern: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(7).wrapping_add(3)).collect();

        mem_write(&mut ap, &pattern, base).unwrap();
        let mut readback = vec![0u8; len];
        mem_read(&mut ap, &mut readback, base).unwrap();

        assert_eq!(readback, pattern);
    }
}
