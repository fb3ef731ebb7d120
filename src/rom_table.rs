//! Recursive CoreSight ROM-table walk — component E.
//!
//! Drives the discovery engine described in §4.E: reads identification
//! registers through the MEM-AP memory engine, recurses into nested ROM
//! tables, and dispatches leaf components to the external core probes.

use crate::ap::AccessPort;
use crate::component::{
    self, PartArch, CID_CLASS_ROM_TABLE,
};
use crate::error::RomTableError;
use crate::memory_ap::mem_read;
use crate::probe::{CoreProbe, RawDapAccess};

/// ROM tables hold at most this many entries before the walk gives up
/// (§4.E step 5, also the termination argument behind Invariant 5).
const MAX_ROM_TABLE_ENTRIES: u32 = 960;

const ROM_ENTRY_PRESENT: u32 = 1;
const ROM_ENTRY_OFFSET_MASK: u32 = 0xFFFF_F000;

/// Walk the component at `addr`, recursing into ROM tables and dispatching
/// leaf components to `probe`. Returns whether any component was
/// identified and consumed along this path.
///
/// Mirrors `probe_component(ap, addr, recursion_depth, entry_index)` from
/// §4.E; `recursion_depth`/`entry_index` are accepted for parity with the
/// spec's signature and surfaced only in logging.
pub fn probe_component<P, C>(
    ap: &mut AccessPort<P>,
    addr: u32,
    recursion_depth: u32,
    entry_index: u32,
    probe: &mut C,
) -> Result<bool, RomTableError>
where
    P: RawDapAccess,
    C: CoreProbe<P>,
{
    let base = (addr & !0x3) as u64;

    let cid_class = match component::read_cidr(ap, base)? {
        Some(class) => class,
        None => {
            tracing::debug!(base, "discovery: rejecting component with invalid CIDR");
            return Ok(false);
        }
    };

    if cid_class == CID_CLASS_ROM_TABLE {
        tracing::trace!(
            base,
            recursion_depth,
            entry_index,
            "discovery: entering ROM table"
        );
        let mut found_any = false;
        for i in 0..MAX_ROM_TABLE_ENTRIES {
            let entry_addr = base as u32 + 4 * i;
            let mut buf = [0u8; 4];
            mem_read(ap, &mut buf, entry_addr)?;
            let entry = u32::from_le_bytes(buf);

            if entry == 0 {
                tracing::trace!(entry_addr, "discovery: zero entry, end of ROM table");
                break;
            }
            if entry & ROM_ENTRY_PRESENT == 0 {
                continue;
            }

            let child_addr = base as u32 + (entry & ROM_ENTRY_OFFSET_MASK);
            let found = probe_component(ap, child_addr, recursion_depth + 1, i, probe)?;
            found_any |= found;
        }
        return Ok(found_any);
    }

    // Leaf component: require the ARM JEP-106 designer before trusting
    // `part_number` against our table.
    let pidr = component::read_pidr(ap, base)?;
    if !component::is_arm_designer(pidr) {
        tracing::debug!(base, "discovery: non-ARM designer, rejecting");
        return Ok(false);
    }

    let part_number = component::part_number(pidr);
    let Some(descriptor) = component::lookup_part(part_number) else {
        tracing::debug!(part_number, "discovery: no part table match");
        return Ok(false);
    };

    if let Some(expected) = descriptor.expected_class {
        if expected != cid_class {
            tracing::warn!(
                part_number,
                expected,
                cid_class,
                "discovery: component class mismatch, proceeding anyway"
            );
        }
    }

    match descriptor.arch {
        PartArch::CortexM => Ok(probe.probe_cortexm(ap, false)),
        PartArch::CortexA => Ok(probe.probe_cortexa(ap, base as u64)),
        PartArch::V8 => match probe_armv8(ap, base)? {
            PartArch::CortexM => Ok(probe.probe_cortexm(ap, false)),
            PartArch::CortexA => Ok(probe.probe_cortexa(ap, base as u64)),
            _ => {
                tracing::debug!(base, "discovery: ARMv8 component, no supported dispatch");
                Ok(true)
            }
        },
        PartArch::NoSupport => {
            tracing::debug!(part_number, label = descriptor.label, "discovery: unsupported component");
            Ok(true)
        }
    }
}

/// Refine an ARMv8 component's architecture via `DEVARCH` (preferred) or
/// `DEVTYPE` (fallback), per §4.E `probe_armv8`.
pub fn probe_armv8<P: RawDapAccess>(
    ap: &mut AccessPort<P>,
    base: u64,
) -> Result<PartArch, RomTableError> {
    if let Some(archid) = component::read_devarch(ap, base)? {
        if let Some((_, arch)) = component::DEVARCH_TABLE.iter().find(|(id, _)| *id == archid) {
            return Ok(*arch);
        }
    } else {
        let devtype_id = component::read_devtype(ap, base)?;
        if let Some((_, arch)) = component::DEVTYPE_TABLE.iter().find(|(id, _)| *id == devtype_id) {
            return Ok(*arch);
        }
    }
    Ok(PartArch::NoSupport)
}

/// Low 12 bits of a DP IDCODE that identify an SWD-JTAG-DP whose Cortex-M
/// core discovery sometimes fails to enumerate (the forced fallback,
/// §4.E / §7).
const CORTEX_M_FORCED_IDCODE_MASK: u32 = 0xFFF;
const CORTEX_M_FORCED_IDCODE_VALUE: u32 = 0x477;

/// If `found_any` is false and the DP's IDCODE matches the forced-probe
/// signature, call `probe_cortexm(ap, forced=true)` exactly once
/// (Scenario S6).
pub fn forced_cortex_m_fallback<P, C>(
    ap: &mut AccessPort<P>,
    dp_idcode: u32,
    found_any: bool,
    probe: &mut C,
) -> bool
where
    P: RawDapAccess,
    C: CoreProbe<P>,
{
    if found_any {
        return false;
    }
    if dp_idcode & CORTEX_M_FORCED_IDCODE_MASK != CORTEX_M_FORCED_IDCODE_VALUE {
        return false;
    }
    tracing::debug!("discovery: no components found, forcing Cortex-M probe");
    probe.probe_cortexm(ap, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dp::DebugPort;
    use crate::mock::MockDapTransport;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct CountingProbe {
        cortexm_calls: Vec<bool>,
    }

    impl<P> CoreProbe<P> for CountingProbe {
        fn probe_cortexm(&mut self, _ap: &mut AccessPort<P>, forced: bool) -> bool {
            self.cortexm_calls.push(forced);
            true
        }
        fn probe_cortexa(&mut self, _ap: &mut AccessPort<P>, _base: u64) -> bool {
            true
        }
    }

    fn write_cidr(transport: &mut MockDapTransport, base: u32, class: u8, valid: bool) {
        let top = if valid { 0xB1 } else { 0xA1 };
        transport.memory[(base + 0xFF0) as usize..(base + 0xFF4) as usize]
            .copy_from_slice(&0x0D_u32.to_le_bytes());
        transport.memory[(base + 0xFF4) as usize..(base + 0xFF8) as usize]
            .copy_from_slice(&((class as u32) << 4).to_le_bytes());
        transport.memory[(base + 0xFF8) as usize..(base + 0xFFC) as usize]
            .copy_from_slice(&0x05_u32.to_le_bytes());
        transport.memory[(base + 0xFFC) as usize..(base + 0x1000) as usize]
            .copy_from_slice(&(top as u32).to_le_bytes());
    }

    fn write_pidr(transport: &mut MockDapTransport, base: u32, pidr: u64) {
        let low = pidr as u32;
        let high = (pidr >> 32) as u32;
        for i in 0..4 {
            let byte = (low >> (8 * i)) & 0xFF;
            let addr = (base + 0xFE0 + 4 * i) as usize;
            transport.memory[addr..addr + 4].copy_from_slice(&byte.to_le_bytes());
        }
        for i in 0..4 {
            let byte = (high >> (8 * i)) & 0xFF;
            let addr = (base + 0xFD0 + 4 * i) as usize;
            transport.memory[addr..addr + 4].copy_from_slice(&byte.to_le_bytes());
        }
    }

    fn mock_ap_with(setup: impl FnOnce(&mut MockDapTransport)) -> AccessPort<MockDapTransport> {
        let mut transport = MockDapTransport::new();
        transport.add_memory_ap(0, 0x0477_0031, 0x0000_0000);
        setup(&mut transport);
        let dp = Rc::new(RefCell::new(DebugPort::new(transport)));
        AccessPort::ap_new(dp, 0).unwrap().unwrap()
    }

    #[test]
    fn s1_invalid_cidr_preamble_rejects_without_child_probe() {
        let mut ap = mock_ap_with(|t| write_cidr(t, 0x0000_0000, 0, false));
        let mut probe = CountingProbe { cortexm_calls: vec![] };
        let found = probe_component(&mut ap, 0x0000_0000, 0, 0, &mut probe).unwrap();
        assert!(!found);
        assert!(probe.cortexm_calls.is_empty());
    }

    #[test]
    fn s2_cortex_m3_identification_dispatches_once() {
        let mut ap = mock_ap_with(|t| {
            write_cidr(t, 0x0000_0000, CID_CLASS_ROM_TABLE, true);
            let entry_addr = 0x0000_0000usize;
            t.memory[entry_addr..entry_addr + 4].copy_from_slice(&0x1001u32.to_le_bytes());
            let entry_end = 0x0000_0004usize;
            t.memory[entry_end..entry_end + 4].copy_from_slice(&0u32.to_le_bytes());

            write_cidr(t, 0x0000_1000, 0x9, true);
            write_pidr(t, 0x0000_1000, 0x0000_0004_000B_B000);
        });
        let mut probe = CountingProbe { cortexm_calls: vec![] };
        let found = probe_component(&mut ap, 0x0000_0000, 0, 0, &mut probe).unwrap();
        assert!(found);
        assert_eq!(probe.cortexm_calls, vec![false]);
    }

    #[test]
    fn s6_forced_fallback_fires_when_nothing_found() {
        let mut ap = mock_ap_with(|_| {});
        let mut probe = CountingProbe { cortexm_calls: vec![] };
        let found = forced_cortex_m_fallback(&mut ap, 0x0BA0_1477, false, &mut probe);
        assert!(found);
        assert_eq!(probe.cortexm_calls, vec![true]);
    }
}
