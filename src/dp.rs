//! Debug Port (DP) manager — component B.
//!
//! Owns the DP handle, drives the five-step init sequence (power-up, reset,
//! version probe, target-ID retrieval, AP enumeration), and exposes raw and
//! typed DP register access to the AP layer above it.

use std::cell::Cell;

use bitfield::bitfield;

use crate::error::{DebugPortError, DebugProbeError};
use crate::probe::{PlatformTimeout, PortType, RawDapAccess};

/// A DP register's 4-bit address, and the name used in error messages.
pub trait Register: From<u32> + Into<u32> + Clone {
    const ADDRESS: u8;
    const NAME: &'static str;
}

bitfield! {
    /// Write-only ABORT register: clears sticky error flags, or aborts an
    /// in-progress transaction.
    #[derive(Clone, Copy)]
    pub struct Abort(u32);
    impl Debug;
    pub orunerrclr, set_orunerrclr: 5;
    pub wderrclr, set_wderrclr: 4;
    pub stkerrclr, set_stkerrclr: 3;
    pub stkcmpclr, set_stkcmpclr: 2;
    pub dapabort, set_dapabort: 1;
}

impl From<u32> for Abort {
    fn from(raw: u32) -> Self {
        Abort(raw)
    }
}
impl From<Abort> for u32 {
    fn from(v: Abort) -> Self {
        v.0
    }
}
impl Register for Abort {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "ABORT";
}

bitfield! {
    /// CTRL/STAT register: power-up/reset request+ack bits plus the sticky
    /// error flags.
    #[derive(Clone, Copy)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub cdbgrstack, _: 27;
    pub cdbgrstreq, set_cdbgrstreq: 26;
    pub sticky_err, _: 5;
}

impl From<u32> for Ctrl {
    fn from(raw: u32) -> Self {
        Ctrl(raw)
    }
}
impl From<Ctrl> for u32 {
    fn from(v: Ctrl) -> Self {
        v.0
    }
}
impl Register for Ctrl {
    const ADDRESS: u8 = 0x4;
    const NAME: &'static str = "CTRL/STAT";
}

bitfield! {
    /// SELECT register: picks the active AP (APSEL/APBANKSEL) and the
    /// active DP register bank (DPBANKSEL).
    #[derive(Clone, Copy)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

impl From<u32> for Select {
    fn from(raw: u32) -> Self {
        Select(raw)
    }
}
impl From<Select> for u32 {
    fn from(v: Select) -> Self {
        v.0
    }
}
impl Register for Select {
    const ADDRESS: u8 = 0x8;
    const NAME: &'static str = "SELECT";
}

bitfield! {
    /// DPIDR: identifies the DP version and designer.
    #[derive(Clone, Copy)]
    pub struct Dpidr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    pub u16, designer, _: 11, 1;
}

impl From<u32> for Dpidr {
    fn from(raw: u32) -> Self {
        Dpidr(raw)
    }
}
impl From<Dpidr> for u32 {
    fn from(v: Dpidr) -> Self {
        v.0
    }
}
impl Register for Dpidr {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "DPIDR";
}

/// Debug Port version, decoded from `DPIDR.version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpVersion {
    V0,
    V1,
    V2,
    Unsupported(u8),
}

impl From<u8> for DpVersion {
    fn from(v: u8) -> Self {
        match v {
            0 => DpVersion::V0,
            1 => DpVersion::V1,
            2 => DpVersion::V2,
            other => DpVersion::Unsupported(other),
        }
    }
}

const DEADLINE_POWERUP_MS: u64 = 0; // no timeout: must succeed for the session
const DEADLINE_RESET_MS: u64 = 200;

/// The Debug Port. Shared via `Rc<RefCell<DebugPort<P>>>` between the
/// session and every `AccessPort` that references it (Design Note 9.2).
pub struct DebugPort<P> {
    probe: P,
    pub dp_idcode: u32,
    pub target_id: Option<u32>,
    current_dp_bank: Cell<u8>,
    current_ap_select: Cell<Option<(u8, u8)>>,
    error: Cell<bool>,
}

impl<P: RawDapAccess> DebugPort<P> {
    /// Borrow the underlying raw transport, for callers (and tests) that
    /// need transport-specific functionality beyond `RawDapAccess`.
    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Construct a DP around a raw transport, without running `dp_init`.
    pub fn new(probe: P) -> Self {
        DebugPort {
            probe,
            dp_idcode: 0,
            target_id: None,
            current_dp_bank: Cell::new(0),
            current_ap_select: Cell::new(None),
            error: Cell::new(false),
        }
    }

    /// Point `SELECT` at the given AP and register bank (`SELECT =
    /// (apsel << 24) | (addr & 0xF0)`), per §4.C. Skips the write if
    /// `SELECT` already addresses this AP/bank.
    pub fn select_ap(&mut self, apsel: u8, addr: u8) -> Result<(), DebugPortError> {
        let bank = addr & 0xF0;
        if self.current_ap_select.get() == Some((apsel, bank)) {
            return Ok(());
        }
        let select_value = ((apsel as u32) << 24) | (bank as u32);
        self.dp_write_raw(Select::ADDRESS, select_value)?;
        self.current_ap_select.set(Some((apsel, bank)));
        self.current_dp_bank.set(0);
        Ok(())
    }

    /// Raw AP-port register read. `SELECT` must already address the
    /// intended AP/bank (see [`select_ap`](Self::select_ap)).
    pub fn ap_read_raw(&mut self, addr: u8) -> Result<u32, DebugPortError> {
        self.check_error()?;
        self.probe
            .raw_read_register(PortType::AccessPort, addr)
            .map_err(|e| self.mark_fault(e))
    }

    /// Raw AP-port register write. `SELECT` must already address the
    /// intended AP/bank (see [`select_ap`](Self::select_ap)).
    pub fn ap_write_raw(&mut self, addr: u8, value: u32) -> Result<(), DebugPortError> {
        self.check_error()?;
        self.probe
            .raw_write_register(PortType::AccessPort, addr, value)
            .map_err(|e| self.mark_fault(e))
    }

    /// `true` if a sticky error has been recorded since the last
    /// [`clear_error`](Self::clear_error).
    pub fn has_error(&self) -> bool {
        self.error.get()
    }

    /// Clear the sticky error flag, permitting further operations.
    pub fn clear_error(&self) {
        self.error.set(false);
    }

    fn mark_fault(&self, err: DebugProbeError) -> DebugPortError {
        self.error.set(true);
        DebugPortError::Fault(err)
    }

    /// Cooperative cancellation checkpoint (§5): bail out early if a
    /// previous operation left the DP faulted.
    fn check_error(&self) -> Result<(), DebugPortError> {
        if self.error.get() {
            Err(DebugPortError::Faulted)
        } else {
            Ok(())
        }
    }

    fn select_dp_bank(&mut self, bank: u8) -> Result<(), DebugPortError> {
        if self.current_dp_bank.get() == bank {
            return Ok(());
        }
        let mut select = Select::from(0u32);
        select.set_dp_bank_sel(bank);
        self.dp_write_raw(Select::ADDRESS, select.into())?;
        self.current_dp_bank.set(bank);
        self.current_ap_select.set(None);
        Ok(())
    }

    fn dp_read_raw(&mut self, addr: u8) -> Result<u32, DebugPortError> {
        self.check_error()?;
        self.probe
            .raw_read_register(PortType::DebugPort, addr)
            .map_err(|e| self.mark_fault(e))
    }

    fn dp_write_raw(&mut self, addr: u8, value: u32) -> Result<(), DebugPortError> {
        self.check_error()?;
        self.probe
            .raw_write_register(PortType::DebugPort, addr, value)
            .map_err(|e| self.mark_fault(e))
    }

    /// Read a banked DP register, selecting its bank first if needed.
    pub fn dp_read<R: Register>(&mut self, bank: u8) -> Result<R, DebugPortError> {
        self.select_dp_bank(bank)?;
        Ok(R::from(self.dp_read_raw(R::ADDRESS)?))
    }

    /// Write a banked DP register, selecting its bank first if needed.
    pub fn dp_write<R: Register>(&mut self, bank: u8, register: R) -> Result<(), DebugPortError> {
        self.select_dp_bank(bank)?;
        self.dp_write_raw(R::ADDRESS, register.into())
    }

    /// Low-level single-transaction DP access, exposed for components (AP
    /// register access) that need to bypass the typed wrappers.
    pub fn dp_low_access(&mut self, is_write: bool, addr: u8, value: u32) -> Result<u32, DebugPortError> {
        if is_write {
            self.dp_write_raw(addr, value)?;
            Ok(0)
        } else {
            self.dp_read_raw(addr)
        }
    }

    /// Issue `ABORT` with the given flags set.
    pub fn dp_abort(&mut self, dapabort: bool) -> Result<(), DebugPortError> {
        let mut abort = Abort::from(0u32);
        abort.set_dapabort(dapabort);
        self.dp_write_raw(Abort::ADDRESS, abort.into())
    }

    /// Read the sticky-error bits out of CTRL/STAT (component 7's
    /// "transport fault" accessor).
    pub fn dp_error(&mut self) -> u32 {
        self.dp_read_raw(Ctrl::ADDRESS).unwrap_or(0)
    }

    fn dp_read_raw_in_bank(&mut self, bank: u8, addr: u8) -> Result<u32, DebugPortError> {
        self.select_dp_bank(bank)?;
        self.dp_read_raw(addr)
    }
}

/// The init sequence and its reset step need an actual wall-clock deadline
/// (§4.B step 3's 200ms), so this block additionally requires the probe to
/// implement [`PlatformTimeout`].
impl<P: RawDapAccess + PlatformTimeout> DebugPort<P> {
    /// Run the five-step init sequence from spec §4.B.
    ///
    /// On success, `dp_idcode` and (for DPv2) `target_id` are populated.
    /// AP enumeration itself is performed by the caller via
    /// [`crate::ap::enumerate_aps`] once the DP is initialized, since the
    /// DP doesn't own the notion of "which APs exist" (only that they
    /// reference it).
    pub fn dp_init(&mut self) -> Result<(), DebugPortError> {
        // Step 1: probe CTRL/STAT, retrying once via ABORT:DAPABORT on a
        // transport timeout.
        match self.dp_read_raw(Ctrl::ADDRESS) {
            Ok(_) => {}
            Err(DebugPortError::Fault(DebugProbeError::Timeout)) => {
                tracing::warn!("DP: initial CTRL/STAT read timed out, issuing DAPABORT and retrying");
                self.clear_error();
                self.dp_abort(true)?;
                self.dp_read_raw(Ctrl::ADDRESS)?;
            }
            Err(e) => return Err(e),
        }

        // Step 2: request power-up, poll until both acks are set. No
        // timeout — must succeed for the session to proceed.
        let mut ctrl = Ctrl::from(0u32);
        ctrl.set_csyspwrupreq(true);
        ctrl.set_cdbgpwrupreq(true);
        self.dp_write_raw(Ctrl::ADDRESS, ctrl.into())?;
        let _ = DEADLINE_POWERUP_MS;
        loop {
            let status = Ctrl::from(self.dp_read_raw(Ctrl::ADDRESS)?);
            if status.csyspwrupack() && status.cdbgpwrupack() {
                break;
            }
        }

        // Step 3: debug reset request/deassert, each with a 200ms deadline.
        // Failure here is non-fatal per spec.
        if let Err(e) = self.debug_reset_sequence() {
            tracing::warn!("DP: debug reset sequence failed (non-fatal): {e}");
        }

        // Step 4: read DPIDR; on DPv2, fetch TARGETID from bank 2.
        let dpidr = Dpidr::from(self.dp_read_raw(Dpidr::ADDRESS)?);
        self.dp_idcode = dpidr.into();
        if DpVersion::from(dpidr.version()) == DpVersion::V2 {
            self.target_id = Some(self.dp_read_raw_in_bank(2, 0x4)?);
            self.current_dp_bank.set(2);
            self.select_dp_bank(0)?;
        }

        Ok(())
    }

    /// Request `CDBGRSTREQ`, wait for `CDBGRSTACK` to assert, then deassert
    /// and wait for it to clear, each bounded by [`DEADLINE_RESET_MS`] on
    /// the platform's own clock via [`PlatformTimeout::poll_until`].
    fn debug_reset_sequence(&mut self) -> Result<(), DebugPortError> {
        let mut ctrl = Ctrl::from(self.dp_read_raw(Ctrl::ADDRESS)?);
        ctrl.set_cdbgrstreq(true);
        self.dp_write_raw(Ctrl::ADDRESS, ctrl.into())?;

        let acked = self.probe.poll_until(DEADLINE_RESET_MS, |probe| {
            probe
                .raw_read_register(PortType::DebugPort, Ctrl::ADDRESS)
                .map(|raw| Ctrl::from(raw).cdbgrstack())
                .unwrap_or(false)
        });
        if !acked {
            return Err(DebugPortError::Timeout("CDBGRSTACK"));
        }

        let mut ctrl = Ctrl::from(self.dp_read_raw(Ctrl::ADDRESS)?);
        ctrl.set_cdbgrstreq(false);
        self.dp_write_raw(Ctrl::ADDRESS, ctrl.into())?;

        let deasserted = self.probe.poll_until(DEADLINE_RESET_MS, |probe| {
            probe
                .raw_read_register(PortType::DebugPort, Ctrl::ADDRESS)
                .map(|raw| !Ctrl::from(raw).cdbgrstack())
                .unwrap_or(false)
        });
        if !deasserted {
            return Err(DebugPortError::Timeout("CDBGRSTACK deassert"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDapTransport;

    #[test]
    fn dp_init_retries_on_timeout() {
        let mut transport = MockDapTransport::new();
        transport.fail_next_read_with(DebugProbeError::Timeout);
        let mut dp = DebugPort::new(transport);
        dp.dp_init().expect("init should recover via ABORT retry");
        assert!(!dp.has_error());
    }

    #[test]
    fn dpv2_fetches_target_id() {
        let mut transport = MockDapTransport::new();
        transport.set_dpidr(0x6BA02477); // version field = 2 (DPv2)
        transport.set_targetid(0xDEAD_BEEF);
        let mut dp = DebugPort::new(transport);
        dp.dp_init().unwrap();
        assert_eq!(dp.target_id, Some(0xDEAD_BEEF));
    }

    #[test]
    fn dpv1_has_no_target_id() {
        let mut transport = MockDapTransport::new();
        transport.set_dpidr(0x0BA01477); // version field = 1 (DPv1)
        let mut dp = DebugPort::new(transport);
        dp.dp_init().unwrap();
        assert_eq!(dp.target_id, None);
    }
}
