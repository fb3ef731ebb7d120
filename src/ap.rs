//! AP manager — component C.
//!
//! Enumerates Access Ports hanging off a DP and owns their handles. An
//! `AccessPort` holds a strong `Rc` reference to its DP (Design Note 9.2);
//! the DP never holds a strong reference back.

use std::cell::RefCell;
use std::rc::Rc;

use bitfield::bitfield;

use crate::dp::DebugPort;
use crate::error::AccessPortError;
use crate::probe::RawDapAccess;

const IDR_ADDR: u8 = 0xFC;
const BASE_ADDR: u8 = 0xF8;
const CFG_ADDR: u8 = 0xF4;
const CSW_ADDR: u8 = 0x00;

/// An AP is dropped (and never enumerated past) after 8 consecutive absent
/// APSEL slots, per §4.E.
const MAX_CONSECUTIVE_ABSENT: u8 = 8;

bitfield! {
    /// AP identification register (`IDR`).
    #[derive(Clone, Copy)]
    pub struct Idr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u16, designer_raw, _: 27, 17;
    pub u8, class, _: 16, 13;
    pub u8, variant, _: 7, 4;
    pub u8, ap_type, _: 3, 0;
}

impl From<u32> for Idr {
    fn from(raw: u32) -> Self {
        Idr(raw)
    }
}
impl From<Idr> for u32 {
    fn from(v: Idr) -> Self {
        v.0
    }
}

/// The class field of `IDR`, per ADIv5 table C1-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApClass {
    Undefined,
    ComAp,
    MemAp,
    Other(u8),
}

impl From<u8> for ApClass {
    fn from(v: u8) -> Self {
        match v {
            0b0000 => ApClass::Undefined,
            0b0001 => ApClass::ComAp,
            0b1000 => ApClass::MemAp,
            other => ApClass::Other(other),
        }
    }
}

bitfield! {
    /// Control/Status Word, with `SIZE`/`ADDRINC` masked out at rest
    /// (Invariant: "AP" in §3) and rewritten per-transfer by the memory
    /// engine.
    #[derive(Clone, Copy)]
    pub struct Csw(u32);
    impl Debug;
    pub u8, size, set_size: 2, 0;
    pub u8, addrinc, set_addrinc: 5, 4;
    pub trinprog, set_trinprog: 7;
}

impl From<u32> for Csw {
    fn from(raw: u32) -> Self {
        Csw(raw)
    }
}
impl From<Csw> for u32 {
    fn from(v: Csw) -> Self {
        v.0
    }
}

/// One Access Port, addressable at `apsel` behind a shared DP.
pub struct AccessPort<P> {
    dp: Rc<RefCell<DebugPort<P>>>,
    pub apsel: u8,
    pub idr: u32,
    pub base: u32,
    pub cfg: u32,
    pub csw: u32,
}

impl<P: RawDapAccess> AccessPort<P> {
    /// Construct the AP at `apsel`, or `Ok(None)` if `IDR` reads zero
    /// ("absent" is not an error — §4.C step 1).
    pub fn ap_new(
        dp: Rc<RefCell<DebugPort<P>>>,
        apsel: u8,
    ) -> Result<Option<Self>, AccessPortError> {
        let idr = {
            let mut dp_ref = dp.borrow_mut();
            dp_ref.select_ap(apsel, IDR_ADDR)?;
            dp_ref.ap_read_raw(IDR_ADDR)?
        };
        if idr == 0 {
            return Ok(None);
        }

        let (base, cfg, mut csw) = {
            let mut dp_ref = dp.borrow_mut();
            dp_ref.select_ap(apsel, BASE_ADDR)?;
            let base = dp_ref.ap_read_raw(BASE_ADDR)?;
            dp_ref.select_ap(apsel, CFG_ADDR)?;
            let cfg = dp_ref.ap_read_raw(CFG_ADDR)?;
            dp_ref.select_ap(apsel, CSW_ADDR)?;
            let csw = dp_ref.ap_read_raw(CSW_ADDR)?;
            (base, cfg, csw)
        };

        let mut csw_reg = Csw::from(csw);
        if csw_reg.trinprog() {
            tracing::warn!(apsel, "AP: CSW.TRINPROG set at construction, clearing");
            csw_reg.set_trinprog(false);
        }
        csw_reg.set_size(0);
        csw_reg.set_addrinc(0);
        csw = csw_reg.into();

        Ok(Some(AccessPort {
            dp,
            apsel,
            idr,
            base,
            cfg,
            csw,
        }))
    }

    pub fn class(&self) -> ApClass {
        ApClass::from(Idr::from(self.idr).class())
    }

    /// Read an AP register at `addr`, selecting `SELECT` first if needed.
    pub fn read_register(&mut self, addr: u8) -> Result<u32, AccessPortError> {
        let mut dp = self.dp.borrow_mut();
        dp.select_ap(self.apsel, addr)?;
        Ok(dp.ap_read_raw(addr)?)
    }

    /// Write an AP register at `addr`, selecting `SELECT` first if needed.
    pub fn write_register(&mut self, addr: u8, value: u32) -> Result<(), AccessPortError> {
        let mut dp = self.dp.borrow_mut();
        dp.select_ap(self.apsel, addr)?;
        Ok(dp.ap_write_raw(addr, value)?)
    }

    /// Read `RDBUFF` (DP address `0xC`) to drain the read pipeline, per
    /// §4.D step 6.
    pub fn read_rdbuff(&mut self) -> Result<u32, AccessPortError> {
        let mut dp = self.dp.borrow_mut();
        Ok(dp.dp_low_access(false, 0xC, 0)?)
    }

    pub fn dp(&self) -> &Rc<RefCell<DebugPort<P>>> {
        &self.dp
    }
}

/// Enumerate every AP on `dp`, stopping per the §4.E rules: `apsel == 0`
/// absent terminates immediately; 8 consecutive absent slots stop
/// enumeration; a BASE equal to the immediately preceding AP's BASE stops
/// enumeration (assume a mirrored aperture).
pub fn enumerate_aps<P: RawDapAccess>(
    dp: Rc<RefCell<DebugPort<P>>>,
) -> Result<Vec<AccessPort<P>>, AccessPortError> {
    let mut aps = Vec::new();
    let mut consecutive_absent = 0u8;
    let mut previous_base: Option<u32> = None;

    for apsel in 0u8..=255 {
        match AccessPort::ap_new(Rc::clone(&dp), apsel)? {
            None => {
                if apsel == 0 {
                    tracing::debug!("AP manager: APSEL 0 absent, stopping enumeration");
                    break;
                }
                consecutive_absent += 1;
                if consecutive_absent >= MAX_CONSECUTIVE_ABSENT {
                    tracing::debug!(
                        apsel,
                        "AP manager: {MAX_CONSECUTIVE_ABSENT} consecutive absent APs, stopping"
                    );
                    break;
                }
            }
            Some(ap) => {
                consecutive_absent = 0;
                if previous_base == Some(ap.base) {
                    tracing::debug!(
                        apsel,
                        base = ap.base,
                        "AP manager: BASE matches preceding AP, assuming mirrored aperture"
                    );
                    break;
                }
                previous_base = Some(ap.base);
                aps.push(ap);
            }
        }
        if apsel == 255 {
            break;
        }
    }

    Ok(aps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDapTransport;

    fn dp_with_aps(idrs: &[(u8, u32, u32)]) -> Rc<RefCell<DebugPort<MockDapTransport>>> {
        let mut transport = MockDapTransport::new();
        for &(apsel, idr, base) in idrs {
            transport.add_memory_ap(apsel, idr, base);
        }
        Rc::new(RefCell::new(DebugPort::new(transport)))
    }

    #[test]
    fn apsel_zero_absent_stops_immediately() {
        let dp = dp_with_aps(&[]);
        let aps = enumerate_aps(dp).unwrap();
        assert!(aps.is_empty());
    }

    #[test]
    fn enumerates_present_aps() {
        let dp = dp_with_aps(&[(0, 0x04770031, 0x1000_0000), (1, 0x04770031, 0x2000_0000)]);
        let aps = enumerate_aps(dp).unwrap();
        assert_eq!(aps.len(), 2);
        assert_eq!(aps[0].apsel, 0);
        assert_eq!(aps[1].apsel, 1);
    }

    #[test]
    fn stops_on_eight_consecutive_absent() {
        let dp = dp_with_aps(&[(0, 0x04770031, 0x1000_0000), (9, 0x04770031, 0x2000_0000)]);
        let aps = enumerate_aps(dp).unwrap();
        // APs 1..=8 absent (8 consecutive) stop enumeration before AP 9 is reached.
        assert_eq!(aps.len(), 1);
    }

    #[test]
    fn stops_on_duplicate_base() {
        let dp = dp_with_aps(&[(0, 0x04770031, 0x1000_0000), (1, 0x04770031, 0x1000_0000)]);
        let aps = enumerate_aps(dp).unwrap();
        assert_eq!(aps.len(), 1);
    }
}
