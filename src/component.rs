//! CoreSight component identification — part of discovery (component E).
//!
//! Reads and decodes the fixed identification block at the top of every
//! component's 4 KiB aperture (`CIDR`/`PIDR`/`DEVARCH`/`DEVTYPE`), and holds
//! the static part-number lookup table used to dispatch to a core probe.

use crate::ap::AccessPort;
use crate::error::AccessPortError;
use crate::memory_ap::mem_read;
use crate::probe::RawDapAccess;

const CIDR_OFFSET: u64 = 0xFF0;
const PIDR_HIGH_OFFSET: u64 = 0xFD0;
const PIDR_LOW_OFFSET: u64 = 0xFE0;
const DEVARCH_OFFSET: u64 = 0xFBC;
const DEVTYPE_OFFSET: u64 = 0xFCC;

const CIDR_PREAMBLE: [u32; 4] = [0x0D, 0x00, 0x05, 0xB1];
const CIDR_PREAMBLE_MASK: [u32; 4] = [0xFF, 0x0F, 0xFF, 0xFF];

/// ARM Ltd's JEP-106 continuation code and id, per JEP106AV (bank 4, id
/// 0x3B): used to validate `PIDR`'s designer field (§6 ARM-designer check).
const ARM_JEP106: jep106::JEP106Code = jep106::JEP106Code::new(4, 0x3B);

/// The `cid_class` nibble identifying a ROM table.
pub const CID_CLASS_ROM_TABLE: u8 = 0x1;
/// `cid_class` for a CoreSight-standard debug component (Cortex-A debug units).
pub const CID_CLASS_DEBUG_COMPONENT: u8 = 0x9;
/// `cid_class` for a generic IP component (Cortex-M SCS).
pub const CID_CLASS_GENERIC_IP: u8 = 0xE;

fn read_word<P: RawDapAccess>(ap: &mut AccessPort<P>, addr: u64) -> Result<u32, AccessPortError> {
    let mut buf = [0u8; 4];
    mem_read(ap, &mut buf, addr as u32)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read `CIDR0..CIDR3` at `base + 0xFF0` and check the preamble.
///
/// Returns `Ok(None)` (not an error) on a preamble mismatch, per §4.E step 3
/// and Scenario S1: an invalid CIDR is "not my component", not a fault.
pub fn read_cidr<P: RawDapAccess>(
    ap: &mut AccessPort<P>,
    base: u64,
) -> Result<Option<u8>, AccessPortError> {
    let mut cidr = [0u32; 4];
    for (i, word) in cidr.iter_mut().enumerate() {
        *word = read_word(ap, base + CIDR_OFFSET + 4 * i as u64)?;
    }

    for i in 0..4 {
        if cidr[i] & CIDR_PREAMBLE_MASK[i] != CIDR_PREAMBLE[i] {
            tracing::debug!(
                base,
                byte = i,
                expected = CIDR_PREAMBLE[i],
                got = cidr[i] & CIDR_PREAMBLE_MASK[i],
                "component: CIDR preamble mismatch, rejecting"
            );
            return Ok(None);
        }
    }

    let cid_class = ((cidr[1] >> 4) & 0x0F) as u8;
    Ok(Some(cid_class))
}

/// Read the 64-bit `PIDR` at `base + 0xFD0`/`0xFE0`.
pub fn read_pidr<P: RawDapAccess>(ap: &mut AccessPort<P>, base: u64) -> Result<u64, AccessPortError> {
    let mut high = [0u32; 4];
    for (i, word) in high.iter_mut().enumerate() {
        *word = read_word(ap, base + PIDR_HIGH_OFFSET + 4 * i as u64)? & 0xFF;
    }
    let mut low = [0u32; 4];
    for (i, word) in low.iter_mut().enumerate() {
        *word = read_word(ap, base + PIDR_LOW_OFFSET + 4 * i as u64)? & 0xFF;
    }

    let high = (high[3] as u64) << 24 | (high[2] as u64) << 16 | (high[1] as u64) << 8 | high[0] as u64;
    let low = (low[3] as u64) << 24 | (low[2] as u64) << 16 | (low[1] as u64) << 8 | low[0] as u64;
    Ok((high << 32) | low)
}

/// Extracts `PIDR`'s JEP-106 designer code: continuation count from
/// `PIDR4[3:0]`, id from `{PIDR2[2:0], PIDR1[7:4]}`.
fn designer_code(pidr: u64) -> jep106::JEP106Code {
    let cc = ((pidr >> 32) & 0xF) as u8;
    let des_1 = ((pidr >> 16) & 0x7) as u8;
    let des_0 = ((pidr >> 12) & 0xF) as u8;
    jep106::JEP106Code::new(cc, (des_1 << 4) | des_0)
}

/// `true` if `pidr` carries ARM's JEP-106 designer code (§6).
pub fn is_arm_designer(pidr: u64) -> bool {
    designer_code(pidr) == ARM_JEP106
}

pub fn part_number(pidr: u64) -> u16 {
    (pidr & 0xFFF) as u16
}

/// `DEVARCH` at `base + 0xFBC`: bit 20 is `PRESENT`, bits `[15:0]` are the
/// architecture ID.
pub fn read_devarch<P: RawDapAccess>(
    ap: &mut AccessPort<P>,
    base: u64,
) -> Result<Option<u16>, AccessPortError> {
    let raw = read_word(ap, base + DEVARCH_OFFSET)?;
    if raw & (1 << 20) != 0 {
        Ok(Some((raw & 0xFFFF) as u16))
    } else {
        Ok(None)
    }
}

/// `DEVTYPE` at `base + 0xFCC`: `[3:0]` major, `[7:4]` minor, combined as
/// `(major << 4) | minor` per §4.E `probe_armv8` step 2.
pub fn read_devtype<P: RawDapAccess>(ap: &mut AccessPort<P>, base: u64) -> Result<u8, AccessPortError> {
    let raw = read_word(ap, base + DEVTYPE_OFFSET)?;
    let major = (raw & 0xF) as u8;
    let minor = ((raw >> 4) & 0xF) as u8;
    Ok((major << 4) | minor)
}

/// `arch` field of a [`PartDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartArch {
    NoSupport,
    CortexM,
    CortexA,
    /// ARMv8 component whose family (M or A) is resolved by `probe_armv8`.
    V8,
}

/// One row of the static part-number lookup table (§3, §4.E step 7).
#[derive(Debug, Clone, Copy)]
pub struct PartDescriptor {
    pub part_number: u16,
    pub arch: PartArch,
    /// Expected `cid_class`; `None` means "don't check" (teacher's
    /// `Unknown` sentinel, §4.E step 7).
    pub expected_class: Option<u8>,
    pub label: &'static str,
}

/// Part numbers are ARM's, taken directly from `pidr_pn_bits[]` in the
/// originating driver. Not exhaustive (the source lists ~50 rows, most of
/// them trace/profiling components this crate never dispatches on); this
/// keeps every `aa_cortexm`/`aa_cortexa`/`aa_v8` row plus a representative
/// handful of `aa_nosupport` neighbors.
pub static PART_TABLE: &[PartDescriptor] = &[
    PartDescriptor {
        part_number: 0x000,
        arch: PartArch::CortexM,
        expected_class: Some(CID_CLASS_GENERIC_IP),
        label: "Cortex-M3 SCS",
    },
    PartDescriptor {
        part_number: 0x001,
        arch: PartArch::NoSupport,
        expected_class: None,
        label: "Cortex-M3 ITM",
    },
    PartDescriptor {
        part_number: 0x002,
        arch: PartArch::NoSupport,
        expected_class: None,
        label: "Cortex-M3 DWT",
    },
    PartDescriptor {
        part_number: 0x003,
        arch: PartArch::NoSupport,
        expected_class: None,
        label: "Cortex-M3 FBP",
    },
    PartDescriptor {
        part_number: 0x008,
        arch: PartArch::CortexM,
        expected_class: Some(CID_CLASS_GENERIC_IP),
        label: "Cortex-M0 SCS",
    },
    PartDescriptor {
        part_number: 0x00C,
        arch: PartArch::CortexM,
        expected_class: Some(CID_CLASS_GENERIC_IP),
        label: "Cortex-M4 SCS",
    },
    PartDescriptor {
        part_number: 0x00D,
        arch: PartArch::NoSupport,
        expected_class: None,
        label: "CoreSight ETM11",
    },
    PartDescriptor {
        part_number: 0x4C7,
        arch: PartArch::NoSupport,
        expected_class: None,
        label: "Cortex-M7 PPB",
    },
    PartDescriptor {
        part_number: 0xC05,
        arch: PartArch::CortexA,
        expected_class: Some(CID_CLASS_DEBUG_COMPONENT),
        label: "Cortex-A5 Debug",
    },
    PartDescriptor {
        part_number: 0xC07,
        arch: PartArch::CortexA,
        expected_class: Some(CID_CLASS_DEBUG_COMPONENT),
        label: "Cortex-A7 Debug",
    },
    PartDescriptor {
        part_number: 0xC08,
        arch: PartArch::CortexA,
        expected_class: Some(CID_CLASS_DEBUG_COMPONENT),
        label: "Cortex-A8 Debug",
    },
    PartDescriptor {
        part_number: 0xC09,
        arch: PartArch::CortexA,
        expected_class: Some(CID_CLASS_DEBUG_COMPONENT),
        label: "Cortex-A9 Debug",
    },
    PartDescriptor {
        part_number: 0xD21,
        arch: PartArch::V8,
        expected_class: None,
        label: "Cortex-M33",
    },
];

/// Linear-scan the static part table for `part_number`, per §4.E step 7.
pub fn lookup_part(part_number: u16) -> Option<&'static PartDescriptor> {
    PART_TABLE.iter().find(|p| p.part_number == part_number)
}

/// DEVARCH archid → architecture, for `probe_armv8` step 1. First matching
/// entry wins.
pub static DEVARCH_TABLE: &[(u16, PartArch)] = &[
    (0x2A04, PartArch::CortexM), // Armv8-M SCS
    (0x6A05, PartArch::CortexA), // Armv8-A/R debug
];

/// DEVTYPE `(major<<4)|minor` → architecture, for `probe_armv8` step 2.
pub static DEVTYPE_TABLE: &[(u8, PartArch)] = &[(0x11, PartArch::CortexM), (0x15, PartArch::CortexA)];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dp::DebugPort;
    use crate::mock::MockDapTransport;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ap_with_memory(words: &[(u32, u32)]) -> AccessPort<MockDapTransport> {
        let mut transport = MockDapTransport::new();
        transport.add_memory_ap(0, 0x0477_0031, 0x2000_0000);
        for &(addr, value) in words {
            transport.memory[addr as usize..addr as usize + 4].copy_from_slice(&value.to_le_bytes());
        }
        let dp = Rc::new(RefCell::new(DebugPort::new(transport)));
        AccessPort::ap_new(dp, 0).unwrap().unwrap()
    }

    #[test]
    fn valid_cidr_preamble_decodes_class() {
        let base = 0x1000u64;
        let mut ap = ap_with_memory(&[
            (base as u32 + 0xFF0, 0x0D),
            (base as u32 + 0xFF4, 0x10), // class 1 (ROM table) in bits[7:4]
            (base as u32 + 0xFF8, 0x05),
            (base as u32 + 0xFFC, 0xB1),
        ]);
        let class = read_cidr(&mut ap, base).unwrap();
        assert_eq!(class, Some(CID_CLASS_ROM_TABLE));
    }

    #[test]
    fn invalid_cidr_preamble_rejects() {
        // Scenario S1: top nibble 0xA instead of 0xB1's high byte.
        let base = 0x2000u64;
        let mut ap = ap_with_memory(&[
            (base as u32 + 0xFF0, 0x0D),
            (base as u32 + 0xFF4, 0x00),
            (base as u32 + 0xFF8, 0x05),
            (base as u32 + 0xFFC, 0xA1),
        ]);
        let class = read_cidr(&mut ap, base).unwrap();
        assert_eq!(class, None);
    }

    #[test]
    fn designer_mask_accepts_arm() {
        assert!(is_arm_designer(0x0000_0004_000B_B000));
        assert!(!is_arm_designer(0x0000_0001_2345_6000));
    }
}
