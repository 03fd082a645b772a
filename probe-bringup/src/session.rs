//! Debug session state and the generic base bring-up procedure.
//!
//! A [`Session`] owns the probe handle, the discovered access ports and the
//! created cores of one physical target. Sessions are fully isolated from
//! each other; nothing in here is shared across targets.
//!
//! The AP registry and the core list are mutated only while the one-time
//! bring-up sequence executes. Afterwards they are treated as immutable by
//! all reset and read operations, which is what makes the single-threaded
//! session model lock-free.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use probe_bringup_target::MemoryMap;

use crate::arm::armv8m::Dhcsr;
use crate::arm::breakpoints::BreakpointManager;
use crate::arm::core::{Core, MemoryMappedRegister, ResetType};
use crate::arm::memory::ArmMemoryInterface;
use crate::arm::{ApAddress, ArmProbeInterface};
use crate::event::Notifier;
use crate::sequencer::{Sequence, SequenceError, Step};
use crate::Error;

/// AP register offsets used during discovery.
const AP_BASE: u8 = 0xF8;
const AP_IDR: u8 = 0xFC;

/// The IDR class value identifying a memory access port.
const AP_CLASS_MEM_AP: u32 = 0x8;

/// An access port discovered during bring-up.
#[derive(Debug, Clone)]
pub struct AccessPort {
    /// The AP's address on the debug port.
    pub address: ApAddress,
    /// The AP's identification register value; zero while unknown.
    pub idr: u32,
    /// The debug component base read from the AP's BASE register.
    pub component_base: Option<u64>,
}

impl AccessPort {
    /// Whether the IDR identifies this AP as a memory access port.
    pub fn is_memory_ap(&self) -> bool {
        (self.idr >> 13) & 0xF == AP_CLASS_MEM_AP
    }
}

/// Produces the breakpoint and watchpoint manager for a newly created core.
pub type BreakpointManagerFactory = Box<dyn Fn(usize) -> Arc<Mutex<dyn BreakpointManager>> + Send>;

/// The state of one debug session against one physical target.
pub struct Session {
    pub(crate) probe: Box<dyn ArmProbeInterface>,
    pub(crate) memory_map: Arc<MemoryMap>,
    pub(crate) aps: BTreeMap<u8, AccessPort>,
    pub(crate) cores: Vec<Core>,
    pub(crate) events: Notifier,
    breakpoint_factory: BreakpointManagerFactory,
}

impl Session {
    /// Creates a session that is not yet brought up.
    ///
    /// Run a bring-up sequence against it (the [`Session::base_sequence`]
    /// or a family customization of it) to discover APs and create cores.
    pub fn new(
        probe: Box<dyn ArmProbeInterface>,
        memory_map: MemoryMap,
        breakpoint_factory: BreakpointManagerFactory,
    ) -> Self {
        Session {
            probe,
            memory_map: Arc::new(memory_map),
            aps: BTreeMap::new(),
            cores: Vec::new(),
            events: Notifier::new(),
            breakpoint_factory,
        }
    }

    /// The generic base bring-up procedure: AP discovery, component
    /// discovery, core creation and core debug setup.
    ///
    /// Chip families customize this sequence with structural edits instead
    /// of replacing it wholesale.
    pub fn base_sequence() -> Result<Sequence<Session>, SequenceError> {
        let mut seq = Sequence::new();
        seq.append(Step::new("find_aps", |s: &mut Session| s.find_aps()))?;
        seq.append(Step::new("find_components", |s: &mut Session| {
            s.find_components()
        }))?;
        seq.append(Step::new("create_cores", |s: &mut Session| s.create_cores()))?;
        seq.append(Step::new("create_components", |s: &mut Session| {
            s.create_components()
        }))?;
        Ok(seq)
    }

    /// Scan consecutive AP indices until one reads an all-zero IDR.
    pub(crate) fn find_aps(&mut self) -> Result<(), Error> {
        for index in 0..=u8::MAX {
            let address = ApAddress(index);
            let idr = self.probe.read_raw_ap_register(address, AP_IDR)?;
            if idr == 0 {
                break;
            }
            tracing::debug!("found {address}, IDR {idr:#010x}");
            self.aps
                .entry(index)
                .and_modify(|ap| ap.idr = idr)
                .or_insert(AccessPort {
                    address,
                    idr,
                    component_base: None,
                });
        }
        tracing::info!("{} access ports found", self.aps.len());
        Ok(())
    }

    /// Record the debug component base of every memory AP.
    pub(crate) fn find_components(&mut self) -> Result<(), Error> {
        let Session { probe, aps, .. } = self;
        for ap in aps.values_mut() {
            if !ap.is_memory_ap() {
                continue;
            }
            let base = probe.read_raw_ap_register(ap.address, AP_BASE)?;
            let base = (base & 0xFFFF_F000) as u64;
            tracing::debug!("{}: debug components at {base:#010x}", ap.address);
            ap.component_base = Some(base);
        }
        Ok(())
    }

    /// Create one core per memory AP, with default settings.
    pub(crate) fn create_cores(&mut self) -> Result<(), Error> {
        let addresses: Vec<ApAddress> = self
            .aps
            .values()
            .filter(|ap| ap.is_memory_ap())
            .map(|ap| ap.address)
            .collect();
        for address in addresses {
            let memory = self.probe.memory_interface(address)?;
            self.add_core(address, ResetType::default(), memory);
        }
        Ok(())
    }

    /// Enable halting debug on every created core.
    pub(crate) fn create_components(&mut self) -> Result<(), Error> {
        for core in &mut self.cores {
            let current = Dhcsr(core.read_word_32(Dhcsr::ADDRESS)?);
            if current.c_debugen() {
                tracing::debug!("core {} is already in debug mode", core.id());
                continue;
            }
            let mut dhcsr = Dhcsr(0);
            dhcsr.set_c_debugen(true);
            dhcsr.enable_write();
            core.write_word_32(Dhcsr::ADDRESS, dhcsr.into())?;
        }
        Ok(())
    }

    /// Registers an AP without probing it, if it is not already known.
    pub(crate) fn ensure_ap(&mut self, address: ApAddress) {
        self.aps.entry(address.0).or_insert(AccessPort {
            address,
            idr: 0,
            component_base: None,
        });
    }

    /// Whether an AP with the given index was discovered or registered.
    pub fn has_ap(&self, index: u8) -> bool {
        self.aps.contains_key(&index)
    }

    /// The discovered access ports, in index order.
    pub fn access_ports(&self) -> impl Iterator<Item = &AccessPort> {
        self.aps.values()
    }

    /// The shared memory map of the target.
    pub fn memory_map(&self) -> Arc<MemoryMap> {
        self.memory_map.clone()
    }

    /// The number of created cores.
    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    /// The core with the given index.
    pub fn core_mut(&mut self, index: usize) -> Result<&mut Core, Error> {
        self.cores.get_mut(index).ok_or(Error::CoreNotFound(index))
    }

    /// The session event notifier, e.g. to subscribe reset observers.
    pub fn events_mut(&mut self) -> &mut Notifier {
        &mut self.events
    }

    /// The id the next created core will get.
    pub fn next_core_id(&self) -> usize {
        self.cores.len()
    }

    /// Produces a breakpoint manager for the core with the given id.
    pub fn new_breakpoint_manager(&self, core_id: usize) -> Arc<Mutex<dyn BreakpointManager>> {
        (self.breakpoint_factory)(core_id)
    }

    /// Adds a core backed by the given memory interface and a freshly
    /// produced breakpoint manager. Returns the core's id.
    pub fn add_core(
        &mut self,
        ap: ApAddress,
        default_reset_type: ResetType,
        memory: Box<dyn ArmMemoryInterface>,
    ) -> usize {
        let breakpoints = self.new_breakpoint_manager(self.next_core_id());
        self.add_core_with_breakpoints(ap, default_reset_type, memory, breakpoints)
    }

    /// Adds a core backed by the given memory interface and breakpoint
    /// manager. Returns the core's id.
    pub fn add_core_with_breakpoints(
        &mut self,
        ap: ApAddress,
        default_reset_type: ResetType,
        memory: Box<dyn ArmMemoryInterface>,
        breakpoints: Arc<Mutex<dyn BreakpointManager>>,
    ) -> usize {
        let id = self.cores.len();
        self.cores.push(Core::new(
            id,
            ap,
            memory,
            breakpoints,
            self.memory_map.clone(),
            default_reset_type,
        ));
        tracing::debug!("created core {id} on {ap}");
        id
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("aps", &self.aps)
            .field("cores", &self.cores)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{MockBreakpoints, MockMemory, MockProbe};

    const MEM_AP_IDR: u32 = 0x8477_0001;

    #[test]
    fn base_sequence_discovers_aps_and_creates_cores() {
        let mut probe = MockProbe::new();
        // find_aps: two memory APs, then an empty slot.
        probe.dap.expect_read(ApAddress(0), 0xFC, Ok(MEM_AP_IDR));
        probe.dap.expect_read(ApAddress(1), 0xFC, Ok(MEM_AP_IDR));
        probe.dap.expect_read(ApAddress(2), 0xFC, Ok(0));
        // find_components: BASE of both memory APs.
        probe.dap.expect_read(ApAddress(0), 0xF8, Ok(0xE00F_E003));
        probe.dap.expect_read(ApAddress(1), 0xF8, Ok(0xE00F_C003));

        // create_components reads DHCSR on each core; core 1 already has
        // debug enabled.
        let mut mem0 = MockMemory::new();
        mem0.expect_read_32(0xE000_EDF0, Ok(vec![0]));
        mem0.expect_write_32(0xE000_EDF0, vec![0xA05F_0001]);
        let mut mem1 = MockMemory::new();
        mem1.expect_read_32(0xE000_EDF0, Ok(vec![0x0000_0001]));
        probe.add_memory(ApAddress(0), mem0);
        probe.add_memory(ApAddress(1), mem1);

        let mut session = Session::new(
            Box::new(probe),
            MemoryMap::default(),
            MockBreakpoints::factory(),
        );
        let sequence = Session::base_sequence().unwrap();
        assert_eq!(
            sequence.step_names(),
            vec![
                "find_aps",
                "find_components",
                "create_cores",
                "create_components"
            ]
        );

        sequence.execute(&mut session).unwrap();

        assert_eq!(session.core_count(), 2);
        assert!(session.has_ap(0) && session.has_ap(1) && !session.has_ap(2));
        let bases: Vec<Option<u64>> = session.access_ports().map(|ap| ap.component_base).collect();
        assert_eq!(bases, vec![Some(0xE00F_E000), Some(0xE00F_C000)]);
    }
}
