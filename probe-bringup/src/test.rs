//! Helpers for testing the crate

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::arm::breakpoints::{BreakpointManager, WatchpointKind};
use crate::arm::memory::{ArmMemoryInterface, SecurityState};
use crate::arm::{ApAddress, ArmError, ArmProbeInterface, DapAccess};
use crate::session::BreakpointManagerFactory;

#[derive(Debug)]
enum MemOp {
    Read8 {
        address: u64,
        result: Result<Vec<u8>, ArmError>,
    },
    Read32 {
        address: u64,
        result: Result<Vec<u32>, ArmError>,
    },
    Write32 {
        address: u64,
        data: Vec<u32>,
    },
}

/// A scripted memory interface: every expected operation is declared up
/// front, in order, and any deviation panics the test.
#[derive(Debug)]
pub(crate) struct MockMemory {
    ops: VecDeque<MemOp>,
    security_state: SecurityState,
}

impl MockMemory {
    pub(crate) fn new() -> Self {
        MockMemory {
            ops: VecDeque::new(),
            security_state: SecurityState::NonSecure,
        }
    }

    pub(crate) fn secure(mut self) -> Self {
        self.security_state = SecurityState::Secure;
        self
    }

    pub(crate) fn expect_read_8(&mut self, address: u64, result: Result<Vec<u8>, ArmError>) {
        self.ops.push_back(MemOp::Read8 { address, result });
    }

    pub(crate) fn expect_read_32(&mut self, address: u64, result: Result<Vec<u32>, ArmError>) {
        self.ops.push_back(MemOp::Read32 { address, result });
    }

    pub(crate) fn expect_write_32(&mut self, address: u64, data: Vec<u32>) {
        self.ops.push_back(MemOp::Write32 { address, data });
    }
}

impl ArmMemoryInterface for MockMemory {
    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), ArmError> {
        match self.ops.pop_front() {
            Some(MemOp::Read8 {
                address: expected,
                result,
            }) => {
                assert_eq!(
                    address, expected,
                    "read_8 from unexpected address {address:#010x}"
                );
                let bytes = result?;
                assert_eq!(data.len(), bytes.len());
                data.copy_from_slice(&bytes);
                Ok(())
            }
            other => panic!("unexpected read_8 at {address:#010x}, next expectation: {other:?}"),
        }
    }

    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ArmError> {
        match self.ops.pop_front() {
            Some(MemOp::Read32 {
                address: expected,
                result,
            }) => {
                assert_eq!(
                    address, expected,
                    "read_32 from unexpected address {address:#010x}"
                );
                let words = result?;
                assert_eq!(data.len(), words.len());
                data.copy_from_slice(&words);
                Ok(())
            }
            other => panic!("unexpected read_32 at {address:#010x}, next expectation: {other:?}"),
        }
    }

    fn write_8(&mut self, _address: u64, _data: &[u8]) -> Result<(), ArmError> {
        todo!()
    }

    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), ArmError> {
        match self.ops.pop_front() {
            Some(MemOp::Write32 {
                address: expected,
                data: expected_data,
            }) => {
                assert_eq!(
                    address, expected,
                    "write_32 to unexpected address {address:#010x}"
                );
                assert_eq!(data, expected_data.as_slice());
                Ok(())
            }
            other => panic!("unexpected write_32 at {address:#010x}, next expectation: {other:?}"),
        }
    }

    fn flush(&mut self) -> Result<(), ArmError> {
        Ok(())
    }

    fn security_state(&mut self) -> Result<SecurityState, ArmError> {
        Ok(self.security_state)
    }
}

#[derive(Debug)]
enum DapOp {
    Read {
        ap: ApAddress,
        addr: u8,
        result: Result<u32, ArmError>,
    },
    Write {
        ap: ApAddress,
        addr: u8,
        value: u32,
    },
}

/// A scripted AP register client.
#[derive(Debug, Default)]
pub(crate) struct MockDap {
    ops: VecDeque<DapOp>,
}

impl MockDap {
    pub(crate) fn new() -> Self {
        MockDap::default()
    }

    pub(crate) fn expect_read(&mut self, ap: ApAddress, addr: u8, result: Result<u32, ArmError>) {
        self.ops.push_back(DapOp::Read { ap, addr, result });
    }

    pub(crate) fn expect_write(&mut self, ap: ApAddress, addr: u8, value: u32) {
        self.ops.push_back(DapOp::Write { ap, addr, value });
    }

    pub(crate) fn is_done(&self) -> bool {
        self.ops.is_empty()
    }
}

impl DapAccess for MockDap {
    fn read_raw_ap_register(&mut self, ap: ApAddress, addr: u8) -> Result<u32, ArmError> {
        match self.ops.pop_front() {
            Some(DapOp::Read {
                ap: expected_ap,
                addr: expected_addr,
                result,
            }) => {
                assert_eq!((ap, addr), (expected_ap, expected_addr), "unexpected AP read");
                result
            }
            other => panic!("unexpected read of {ap} register {addr:#04x}, next: {other:?}"),
        }
    }

    fn write_raw_ap_register(
        &mut self,
        ap: ApAddress,
        addr: u8,
        value: u32,
    ) -> Result<(), ArmError> {
        match self.ops.pop_front() {
            Some(DapOp::Write {
                ap: expected_ap,
                addr: expected_addr,
                value: expected_value,
            }) => {
                assert_eq!((ap, addr), (expected_ap, expected_addr), "unexpected AP write");
                assert_eq!(value, expected_value, "unexpected AP write value");
                Ok(())
            }
            other => panic!("unexpected write of {ap} register {addr:#04x}, next: {other:?}"),
        }
    }
}

/// A scripted probe: a [`MockDap`] plus pre-loaded per-AP memory
/// interfaces.
#[derive(Debug, Default)]
pub(crate) struct MockProbe {
    pub(crate) dap: MockDap,
    memories: HashMap<u8, MockMemory>,
}

impl MockProbe {
    pub(crate) fn new() -> Self {
        MockProbe::default()
    }

    pub(crate) fn add_memory(&mut self, ap: ApAddress, memory: MockMemory) {
        self.memories.insert(ap.0, memory);
    }
}

impl DapAccess for MockProbe {
    fn read_raw_ap_register(&mut self, ap: ApAddress, addr: u8) -> Result<u32, ArmError> {
        self.dap.read_raw_ap_register(ap, addr)
    }

    fn write_raw_ap_register(
        &mut self,
        ap: ApAddress,
        addr: u8,
        value: u32,
    ) -> Result<(), ArmError> {
        self.dap.write_raw_ap_register(ap, addr, value)
    }
}

impl ArmProbeInterface for MockProbe {
    fn memory_interface(
        &mut self,
        ap: ApAddress,
    ) -> Result<Box<dyn ArmMemoryInterface>, ArmError> {
        match self.memories.remove(&ap.0) {
            Some(memory) => Ok(Box::new(memory)),
            None => Err(ArmError::ApDoesNotExist(ap)),
        }
    }
}

/// Records watchpoint requests; memory filtering is a no-op.
#[derive(Debug)]
pub(crate) struct MockBreakpoints {
    watchpoints: Arc<Mutex<Vec<(u64, u32, WatchpointKind)>>>,
}

impl MockBreakpoints {
    /// A manager plus a handle onto its recorded watchpoint requests.
    pub(crate) fn shared() -> (
        Arc<Mutex<dyn BreakpointManager>>,
        Arc<Mutex<Vec<(u64, u32, WatchpointKind)>>>,
    ) {
        let watchpoints = Arc::new(Mutex::new(Vec::new()));
        let manager: Arc<Mutex<dyn BreakpointManager>> = Arc::new(Mutex::new(MockBreakpoints {
            watchpoints: watchpoints.clone(),
        }));
        (manager, watchpoints)
    }

    pub(crate) fn factory() -> BreakpointManagerFactory {
        Box::new(|_| {
            let (manager, _) = MockBreakpoints::shared();
            manager
        })
    }
}

impl BreakpointManager for MockBreakpoints {
    fn set_watchpoint(
        &mut self,
        address: u64,
        size: u32,
        kind: WatchpointKind,
    ) -> Result<(), ArmError> {
        self.watchpoints.lock().unwrap().push((address, size, kind));
        Ok(())
    }

    fn filter_memory(&mut self, _address: u64, _data: &mut [u8]) {}
}
