//! A mock DP/AP transport, grounded on `ap/memory_ap/mock.rs` in the
//! teacher crate: a flat memory buffer plus a small register file, used by
//! every unit test in this crate instead of real hardware.
//!
//! Exposed unconditionally behind the `test` feature so downstream crates
//! that implement their own core probes can write integration tests
//! against this crate's transport layer too.

use std::collections::HashMap;

use crate::error::DebugProbeError;
use crate::probe::{PlatformTimeout, PortType, RawDapAccess};

const CTRL_STAT: u8 = 0x4;
const SELECT: u8 = 0x8;

const AP_CSW: u8 = 0x0;
const AP_TAR: u8 = 0x4;
const AP_DRW: u8 = 0xC;
const AP_RDBUFF_DP: u8 = 0xC;
const AP_BASE: u8 = 0xF8;
const AP_CFG: u8 = 0xF4;
const AP_IDR: u8 = 0xFC;
const AP_BASE2: u8 = 0xF0;

/// One recorded transaction, in issue order — used to assert on the exact
/// wire sequence a test scenario expects (S3, S4, S5 in the spec).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub port: PortType,
    pub write: bool,
    pub addr: u8,
    pub value: u32,
}

#[derive(Default)]
struct ApState {
    idr: u32,
    base: u32,
    cfg: u32,
    csw: u32,
    tar: u32,
    /// Data latched by the previous DRW/priming read, returned by the
    /// *next* DRW or RDBUFF read (models the one-transaction pipeline
    /// latency a real MEM-AP has for reads).
    pending_read: Option<u32>,
}

/// A simulated DP with zero or more MEM-APs behind it, each backed by a
/// shared flat byte buffer.
pub struct MockDapTransport {
    dpidr: u32,
    targetid: u32,
    select: u32,
    ctrl: u32,
    error_queue: Vec<DebugProbeError>,
    aps: HashMap<u8, ApState>,
    pub memory: Vec<u8>,
    pub log: Vec<LogEntry>,
}

impl MockDapTransport {
    pub fn new() -> Self {
        MockDapTransport {
            dpidr: 0x2BA0_1477,
            targetid: 0,
            select: 0,
            ctrl: 0,
            error_queue: Vec::new(),
            aps: HashMap::new(),
            memory: vec![0; 1 << 16],
            log: Vec::new(),
        }
    }

    pub fn set_dpidr(&mut self, dpidr: u32) {
        self.dpidr = dpidr;
    }

    pub fn set_targetid(&mut self, target_id: u32) {
        self.targetid = target_id;
    }

    /// Inject a transport fault on the *next* raw read only.
    pub fn fail_next_read_with(&mut self, err: DebugProbeError) {
        self.error_queue.push(err);
    }

    /// Register a MEM-AP at `apsel` with the given IDR/BASE/CFG, backed by
    /// the shared `memory` buffer.
    pub fn add_memory_ap(&mut self, apsel: u8, idr: u32, base: u32) {
        self.aps.insert(
            apsel,
            ApState {
                idr,
                base,
                cfg: 0,
                csw: 0,
                tar: 0,
                pending_read: None,
            },
        );
    }

    fn apsel(&self) -> u8 {
        (self.select >> 24) as u8
    }

    fn dp_bank(&self) -> u8 {
        (self.select & 0xF) as u8
    }

    fn transfer_len(csw: u32) -> u32 {
        match csw & 0x7 {
            0 => 1,
            1 => 2,
            _ => 4,
        }
    }
}

impl Default for MockDapTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformTimeout for MockDapTransport {
    /// No real clock here: each call to `condition` stands in for one
    /// notional millisecond, so a test that never satisfies `condition`
    /// still terminates deterministically after `deadline_ms` attempts.
    fn poll_until(&mut self, deadline_ms: u64, mut condition: impl FnMut(&mut Self) -> bool) -> bool {
        for _ in 0..=deadline_ms {
            if condition(self) {
                return true;
            }
        }
        false
    }
}

impl RawDapAccess for MockDapTransport {
    fn raw_read_register(&mut self, port: PortType, addr: u8) -> Result<u32, DebugProbeError> {
        if let Some(err) = self.error_queue.pop() {
            return Err(err);
        }

        let value = match port {
            PortType::DebugPort => match addr {
                0x0 => self.dpidr,
                CTRL_STAT if self.dp_bank() == 2 => self.targetid,
                CTRL_STAT => {
                    // Power-up/reset acks trail their request bits by one
                    // poll in real hardware; the mock grants them
                    // immediately so `dp_init`'s poll loops terminate.
                    let mut ctrl = self.ctrl;
                    if ctrl & (1 << 30) != 0 {
                        ctrl |= 1 << 31;
                    }
                    if ctrl & (1 << 28) != 0 {
                        ctrl |= 1 << 29;
                    }
                    if ctrl & (1 << 26) != 0 {
                        ctrl |= 1 << 27;
                    } else {
                        ctrl &= !(1 << 27);
                    }
                    ctrl
                }
                AP_RDBUFF_DP => {
                    let apsel = self.apsel();
                    let ap = self.aps.entry(apsel).or_default();
                    ap.pending_read.take().unwrap_or(0)
                }
                _ => 0,
            },
            PortType::AccessPort => {
                let apsel = self.apsel();
                let ap = self.aps.entry(apsel).or_default();
                match addr {
                    AP_IDR => ap.idr,
                    AP_BASE => ap.base,
                    AP_BASE2 => 0,
                    AP_CFG => ap.cfg,
                    AP_CSW => ap.csw,
                    AP_TAR => ap.tar,
                    AP_DRW => {
                        let out = ap.pending_read.take().unwrap_or(0);
                        let len = Self::transfer_len(ap.csw);
                        let word_addr = (ap.tar & !0x3) as usize & (self.memory.len() - 1);
                        let mut bytes = [0u8; 4];
                        bytes.copy_from_slice(&self.memory[word_addr..word_addr + 4]);
                        ap.pending_read = Some(u32::from_le_bytes(bytes));
                        ap.tar = ap.tar.wrapping_add(len);
                        out
                    }
                    _ => 0,
                }
            }
        };

        self.log.push(LogEntry {
            port,
            write: false,
            addr,
            value,
        });
        Ok(value)
    }

    fn raw_write_register(
        &mut self,
        port: PortType,
        addr: u8,
        value: u32,
    ) -> Result<(), DebugProbeError> {
        self.log.push(LogEntry {
            port,
            write: true,
            addr,
            value,
        });

        match port {
            PortType::DebugPort => match addr {
                SELECT => self.select = value,
                CTRL_STAT => self.ctrl = value,
                _ => {}
            },
            PortType::AccessPort => {
                let apsel = self.apsel();
                let ap = self.aps.entry(apsel).or_default();
                match addr {
                    AP_CSW => ap.csw = value,
                    AP_TAR => {
                        ap.tar = value;
                        ap.pending_read = None;
                    }
                    AP_DRW => {
                        let len = Self::transfer_len(ap.csw);
                        let shift = (ap.tar & 0x3) * 8;
                        let word_addr = (ap.tar & !0x3) as usize & (self.memory.len() - 1);
                        let mut bytes = [0u8; 4];
                        bytes.copy_from_slice(&self.memory[word_addr..word_addr + 4]);
                        let mut word = u32::from_le_bytes(bytes);
                        let mask: u32 = if len >= 4 { u32::MAX } else { (1u32 << (len * 8)) - 1 };
                        word = (word & !(mask << shift)) | ((value & mask) << shift);
                        self.memory[word_addr..word_addr + 4]
                            .copy_from_slice(&word.to_le_bytes());
                        ap.tar = ap.tar.wrapping_add(len);
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_stat_acks_follow_requests() {
        let mut t = MockDapTransport::new();
        t.raw_write_register(PortType::DebugPort, CTRL_STAT, 1 << 30).unwrap();
        let status = t.raw_read_register(PortType::DebugPort, CTRL_STAT).unwrap();
        assert_ne!(status & (1 << 31), 0);
    }
}
