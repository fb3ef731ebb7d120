//! Authentication Access Port (AAP) — flash driver component H's lock-bypass
//! path.
//!
//! A second AP sits on the SW-DP even when the main AP is locked out. It
//! exposes exactly one command, `DEVICEERASE`, which wipes flash, SRAM and
//! the lock-bits page and leaves the user-data and bootloader regions
//! untouched (§4.H, Scenario S5).

use crate::ap::AccessPort;
use crate::error::AapError;
use crate::probe::RawDapAccess;

const CMD_ADDR: u8 = 0x00;
const CMDKEY_ADDR: u8 = 0x04;
const STATUS_ADDR: u8 = 0x08;

const STATUS_ERASEBUSY: u32 = 1 << 0;

const CMDKEY: u32 = 0xCFAC_C118;

/// `IDR` revision/jes106/class/variant/type fields identifying the AAP.
const AAP_IDR_MASK: u32 = 0x0FFF_FF0F;
const AAP_IDR_VALUE: u32 = 0x06E6_0001;

/// `true` if `idr` (the AP's raw `IDR` register) matches the AAP signature.
pub fn is_aap(idr: u32) -> bool {
    idr & AAP_IDR_MASK == AAP_IDR_VALUE
}

/// `IDR[31:28]`: AAP revision 1 and revision 2 devices have both been seen
/// in the wild (§4.H).
pub fn revision(idr: u32) -> u8 {
    ((idr >> 28) & 0xF) as u8
}

/// Issue `DEVICEERASE` and poll until it completes.
///
/// Refuses to start if an erase is already in progress, per the source's
/// guard; everything below that point is what Scenario S5 exercises.
pub fn device_erase<P: RawDapAccess>(ap: &mut AccessPort<P>) -> Result<(), AapError> {
    if !is_aap(ap.idr) {
        return Err(AapError::NotAnAap);
    }

    let status = ap.read_register(STATUS_ADDR)?;
    if status & STATUS_ERASEBUSY != 0 {
        return Err(AapError::EraseTimeout);
    }

    ap.write_register(CMDKEY_ADDR, CMDKEY)?;
    ap.write_register(CMD_ADDR, 1)?;

    loop {
        let status = ap.read_register(STATUS_ADDR)?;
        if status & STATUS_ERASEBUSY == 0 {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dp::DebugPort;
    use crate::mock::MockDapTransport;
    use crate::probe::PortType;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn mock_aap() -> AccessPort<MockDapTransport> {
        let mut transport = MockDapTransport::new();
        transport.add_memory_ap(0, AAP_IDR_VALUE, 0);
        let dp = Rc::new(RefCell::new(DebugPort::new(transport)));
        AccessPort::ap_new(dp, 0).unwrap().unwrap()
    }

    #[test]
    fn idr_mask_ignores_revision_nibble() {
        assert!(is_aap(AAP_IDR_VALUE));
        assert!(is_aap(AAP_IDR_VALUE | (2 << 28))); // revision 2 device
        assert!(!is_aap(0x0477_0031)); // an ordinary MEM-AP
    }

    #[test]
    fn revision_reads_top_nibble() {
        assert_eq!(revision(AAP_IDR_VALUE | (2 << 28)), 2);
    }

    #[test]
    fn s5_device_erase_issues_cmdkey_then_cmd() {
        let mut ap = mock_aap();
        device_erase(&mut ap).unwrap();

        let dp = ap.dp().borrow();
        let writes: Vec<(u8, u32)> = dp
            .probe()
            .log
            .iter()
            .filter(|e| e.port == PortType::AccessPort && e.write)
            .map(|e| (e.addr, e.value))
            .collect();
        // CMDKEY write, then CMD write with value 1.
        assert!(writes.contains(&(CMDKEY_ADDR, CMDKEY)));
        assert!(writes.contains(&(CMD_ADDR, 1)));
        let cmdkey_pos = writes.iter().position(|&(a, v)| a == CMDKEY_ADDR && v == CMDKEY).unwrap();
        let cmd_pos = writes.iter().position(|&(a, v)| a == CMD_ADDR && v == 1).unwrap();
        assert!(cmdkey_pos < cmd_pos);
    }

    #[test]
    fn rejects_non_aap_idr() {
        let mut transport = MockDapTransport::new();
        transport.add_memory_ap(0, 0x0477_0031, 0);
        let dp = Rc::new(RefCell::new(DebugPort::new(transport)));
        let mut ap = AccessPort::ap_new(dp, 0).unwrap().unwrap();
        assert!(matches!(device_erase(&mut ap), Err(AapError::NotAnAap)));
    }
}
