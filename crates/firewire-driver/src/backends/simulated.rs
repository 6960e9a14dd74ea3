//! Simulated (in-memory) bus backend
//!
//! Models a bus as a list of nodes, each with a sparse quadlet-addressed
//! CSR space. Enough of IEEE 1394 is reproduced for the protocol layer to
//! run end to end without an adapter:
//!
//! 1. **Configuration ROMs**: minimal and general format, with root
//!    directory, textual descriptor and keyword leaves ([`GeneralRom`]).
//! 2. **Maps**: topology map built from self-ID quadlets ([`self_id`]) and a
//!    packed speed map.
//! 3. **Faults**: failing addresses, offline nodes, rejected block reads and
//!    scripted register values (successive reads return successive values,
//!    which is how a bus reset during a map read looks from the outside).
//!
//! `SimulatedBus` is a cheap handle: clones share the same bus, so a test can
//! keep one while the controller owns another.

use firewire_csr::directory::keys;
use firewire_csr::node_id::{BROADCAST, LOCAL_BUS, MAX_NODES};
use firewire_csr::self_id::{
    SelfIdContinuation, SelfIdPacket0, PORTS_IN_FIRST_PACKET, PORTS_PER_CONTINUATION,
    SELF_ID_MARKER,
};
use firewire_csr::{
    csr, BusOptions, DirectoryEntry, KeyType, NodeId, PortState, RomHeader, Speed, QUADLET_SIZE,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::backend::BusBackend;
use crate::error::{BusError, Result};

/// In-memory bus backend
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    state: Arc<Mutex<BusState>>,
}

#[derive(Debug)]
struct BusState {
    open: bool,
    bus_id: u16,
    local_phy: u8,
    nodes: Vec<SimulatedNode>,
    node_count_override: Option<u32>,
    reject_block_reads: bool,
}

/// CSR space of one simulated node
#[derive(Debug, Clone, Default)]
pub struct SimulatedNode {
    quadlets: BTreeMap<u64, u32>,
    scripted: HashMap<u64, VecDeque<u32>>,
    failing: HashSet<u64>,
    offline: bool,
    reads: Vec<u64>,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    /// Empty bus on the local bus id, adapter closed
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                open: false,
                bus_id: LOCAL_BUS,
                local_phy: 0,
                nodes: Vec::new(),
                node_count_override: None,
                reject_block_reads: false,
            })),
        }
    }

    /// Append a node; returns its physical id
    ///
    /// `NODE_IDS` and `STATE_CLEAR` are filled in unless the node already
    /// defines them.
    ///
    /// # Panics
    ///
    /// Panics if the bus already has 63 nodes.
    pub fn add_node(&self, mut node: SimulatedNode) -> u8 {
        let mut state = self.state.lock();
        assert!(state.nodes.len() < MAX_NODES, "bus is full");
        #[allow(clippy::cast_possible_truncation)]
        let phy = state.nodes.len() as u8;
        let node_ids = u32::from(NodeId::new(phy, state.bus_id).raw()) << 16;
        node.quadlets.entry(csr::NODE_IDS).or_insert(node_ids);
        node.quadlets.entry(csr::STATE_CLEAR).or_insert(0);
        state.nodes.push(node);
        phy
    }

    /// Modify a node in place
    ///
    /// # Panics
    ///
    /// Panics if `phy` is not on the bus.
    pub fn update_node(&self, phy: u8, update: impl FnOnce(&mut SimulatedNode)) {
        let mut state = self.state.lock();
        update(&mut state.nodes[usize::from(phy)]);
    }

    /// Remove every node (a hot-unplug of the whole bus)
    pub fn clear_nodes(&self) {
        self.state.lock().nodes.clear();
    }

    /// Physical id reported as the local node
    pub fn set_local_phy(&self, phy: u8) {
        self.state.lock().local_phy = phy;
    }

    /// Bus id of this bus
    pub fn set_bus_id(&self, bus_id: u16) {
        self.state.lock().bus_id = bus_id;
    }

    /// Override the node count the adapter reports
    pub fn set_node_count(&self, count: Option<u32>) {
        self.state.lock().node_count_override = count;
    }

    /// Make every multi-quadlet read fail
    pub fn reject_block_reads(&self, reject: bool) {
        self.state.lock().reject_block_reads = reject;
    }

    /// CSR offsets read from `phy`, in order
    pub fn reads(&self, phy: u8) -> Vec<u64> {
        self.state
            .lock()
            .nodes
            .get(usize::from(phy))
            .map(|node| node.reads.clone())
            .unwrap_or_default()
    }

    /// Forget the access log of every node
    pub fn clear_reads(&self) {
        for node in &mut self.state.lock().nodes {
            node.reads.clear();
        }
    }

    /// Whether the adapter is open
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

impl BusBackend for SimulatedBus {
    fn open_adapter(&mut self, adapter: usize) -> Result<()> {
        if adapter != 0 {
            return Err(BusError::not_ready(format!("no host adapter {adapter}")));
        }
        self.state.lock().open = true;
        debug!("Simulated adapter {adapter} opened");
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().open = false;
        debug!("Simulated adapter closed");
    }

    fn number_of_nodes(&self) -> Result<u32> {
        let state = self.state.lock();
        if !state.open {
            return Err(BusError::not_ready("adapter not open"));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(state
            .node_count_override
            .unwrap_or(state.nodes.len() as u32))
    }

    fn local_id(&self) -> Result<NodeId> {
        let state = self.state.lock();
        if !state.open {
            return Err(BusError::not_ready("adapter not open"));
        }
        Ok(NodeId::new(state.local_phy, state.bus_id))
    }

    fn read(&self, node: NodeId, address: u64, buffer: &mut [u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(BusError::bus_access(node, address, "adapter not open"));
        }
        if !node.is_local_bus() && node.bus_id() != state.bus_id {
            return Err(BusError::bus_access(node, address, "no route to bus"));
        }
        if node.is_broadcast() {
            return Err(BusError::bus_access(node, address, "broadcast read"));
        }
        if address < csr::CSR_BASE_ADDRESS
            || address % QUADLET_SIZE as u64 != 0
            || buffer.is_empty()
            || buffer.len() % QUADLET_SIZE != 0
        {
            return Err(BusError::bus_access(node, address, "unaligned access"));
        }
        if buffer.len() > QUADLET_SIZE && state.reject_block_reads {
            return Err(BusError::bus_access(node, address, "block read rejected"));
        }

        let Some(sim) = state.nodes.get_mut(usize::from(node.physical_id())) else {
            return Err(BusError::bus_access(node, address, "no ack (node absent)"));
        };
        if sim.offline {
            return Err(BusError::bus_access(node, address, "no ack (node offline)"));
        }

        let base = address - csr::CSR_BASE_ADDRESS;
        for (i, chunk) in buffer.chunks_exact_mut(QUADLET_SIZE).enumerate() {
            let offset = base + (i * QUADLET_SIZE) as u64;
            sim.reads.push(offset);
            let value = sim
                .load(offset)
                .ok_or_else(|| BusError::bus_access(node, address, "address error"))?;
            chunk.copy_from_slice(&value.to_be_bytes());
        }
        Ok(())
    }
}

impl SimulatedNode {
    /// Node with an empty CSR space
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&mut self, offset: u64) -> Option<u32> {
        if self.failing.contains(&offset) {
            return None;
        }
        if let Some(values) = self.scripted.get_mut(&offset) {
            return if values.len() > 1 {
                values.pop_front()
            } else {
                values.front().copied()
            };
        }
        self.quadlets.get(&offset).copied()
    }

    /// Store a quadlet
    pub fn set_quadlet(&mut self, offset: u64, value: u32) {
        self.scripted.remove(&offset);
        self.quadlets.insert(offset, value);
    }

    /// Store consecutive quadlets
    pub fn set_quadlets(&mut self, offset: u64, values: &[u32]) {
        for (i, value) in values.iter().enumerate() {
            self.set_quadlet(offset + (i * QUADLET_SIZE) as u64, *value);
        }
    }

    /// Successive reads of `offset` return `values` in order; the last one sticks
    pub fn set_script(&mut self, offset: u64, values: impl IntoIterator<Item = u32>) {
        self.scripted.insert(offset, values.into_iter().collect());
    }

    /// Make reads of `offset` fail (or succeed again)
    pub fn set_failing(&mut self, offset: u64, failing: bool) {
        if failing {
            self.failing.insert(offset);
        } else {
            self.failing.remove(&offset);
        }
    }

    /// Stop (or resume) acknowledging any request
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Builder form of [`set_quadlet`](Self::set_quadlet)
    #[must_use]
    pub fn with_quadlet(mut self, offset: u64, value: u32) -> Self {
        self.set_quadlet(offset, value);
        self
    }

    /// Builder form of [`set_failing`](Self::set_failing)
    #[must_use]
    pub fn with_failing(mut self, offset: u64) -> Self {
        self.set_failing(offset, true);
        self
    }

    /// Minimal configuration ROM carrying only a vendor id
    #[must_use]
    pub fn with_minimal_rom(self, vendor_id: u32) -> Self {
        let header = RomHeader::new()
            .with_info_length(1)
            .into_bits()
            | (vendor_id & 0x00ff_ffff);
        self.with_quadlet(csr::CONFIGURATION_ROM, header)
    }

    /// General format configuration ROM
    #[must_use]
    pub fn with_general_rom(mut self, rom: &GeneralRom) -> Self {
        self.set_quadlets(csr::CONFIGURATION_ROM, &rom.layout());
        self
    }

    /// `BUS_MANAGER_ID` register (meaningful on the IRM)
    #[must_use]
    pub fn with_bus_manager_id(self, phy: u8) -> Self {
        self.with_quadlet(csr::BUS_MANAGER_ID, u32::from(phy & BROADCAST))
    }

    /// `CYCLE_TIME`/`BUS_TIME` registers, present on isochronous nodes
    #[must_use]
    pub fn with_cycle_timer(self, cycle_time: u32, bus_time: u32) -> Self {
        self.with_quadlet(csr::CYCLE_TIME, cycle_time)
            .with_quadlet(csr::BUS_TIME, bus_time)
    }

    /// Set the `cmstr` bit in `STATE_CLEAR`
    #[must_use]
    pub fn with_cycle_master_enabled(self) -> Self {
        self.with_quadlet(csr::STATE_CLEAR, csr::state_clear::CMSTR)
    }

    /// IRM resource registers; `channels` has channel `n` in bit `n`
    #[must_use]
    pub fn with_irm_resources(self, bandwidth: u32, channels: u64) -> Self {
        let wire = channels.reverse_bits();
        #[allow(clippy::cast_possible_truncation)]
        self.with_quadlet(csr::BANDWIDTH_AVAILABLE, bandwidth)
            .with_quadlet(csr::CHANNELS_AVAILABLE_HI, (wire >> 32) as u32)
            .with_quadlet(csr::CHANNELS_AVAILABLE_LO, wire as u32)
    }

    /// Topology map holding `self_ids`
    #[must_use]
    pub fn with_topology_map(mut self, generation: u32, self_ids: &[u32]) -> Self {
        let node_count = self_ids
            .iter()
            .filter(|q| !SelfIdPacket0::from_bits(**q).extended())
            .count();
        #[allow(clippy::cast_possible_truncation)]
        let (length, counts) = (
            (self_ids.len() + 2) as u16,
            ((node_count as u32) << 16) | self_ids.len() as u32,
        );
        self.set_quadlet(csr::TOPOLOGY_MAP, csr::map_header::new(length, 0));
        self.set_quadlet(csr::TOPOLOGY_MAP_GENERATION, generation);
        self.set_quadlet(csr::TOPOLOGY_MAP_COUNTS, counts);
        self.set_quadlets(csr::TOPOLOGY_MAP_SELF_IDS, self_ids);
        self
    }

    /// Speed map where `speed(from, to)` gives each entry
    #[must_use]
    pub fn with_speed_map(mut self, generation: u32, speed: impl Fn(u8, u8) -> Speed) -> Self {
        self.set_quadlet(
            csr::SPEED_MAP,
            csr::map_header::new(csr::SPEED_MAP_LENGTH, 0),
        );
        self.set_quadlet(csr::SPEED_MAP_GENERATION, generation);
        let packed: Vec<u32> = (0..csr::SPEED_MAP_BYTES / QUADLET_SIZE)
            .map(|q| {
                (0..QUADLET_SIZE).fold(0u32, |acc, b| {
                    let index = q * QUADLET_SIZE + b;
                    #[allow(clippy::cast_possible_truncation)]
                    let code = speed((index / 64) as u8, (index % 64) as u8).code();
                    acc | (u32::from(code) << (24 - 8 * b))
                })
            })
            .collect();
        self.set_quadlets(csr::SPEED_MAP_SPEEDS, &packed);
        self
    }
}

/// Contents of a general format configuration ROM
#[derive(Debug, Clone)]
pub struct GeneralRom {
    /// EUI-64
    pub guid: u64,
    /// Bus options quadlet
    pub options: BusOptions,
    /// Vendor id (24 bits)
    pub vendor_id: u32,
    /// Key value used for the vendor entry
    pub vendor_key: u8,
    /// Optional model id entry
    pub model_id: Option<u32>,
    /// Optional textual descriptor leaf
    pub description: Option<String>,
    /// Keyword leaf contents
    pub keywords: Vec<String>,
    /// Raw entries placed at the start of the root directory
    pub extra_entries: Vec<u32>,
}

impl GeneralRom {
    /// ROM with a vendor entry and nothing else
    pub fn new(guid: u64, vendor_id: u32, options: BusOptions) -> Self {
        Self {
            guid,
            options,
            vendor_id,
            vendor_key: keys::VENDOR_ID,
            model_id: None,
            description: None,
            keywords: Vec::new(),
            extra_entries: Vec::new(),
        }
    }

    /// Add a textual descriptor
    #[must_use]
    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Add keywords
    #[must_use]
    pub fn with_keywords<S: Into<String>>(mut self, words: impl IntoIterator<Item = S>) -> Self {
        self.keywords = words.into_iter().map(Into::into).collect();
        self
    }

    /// Add a model id entry
    #[must_use]
    pub fn with_model_id(mut self, model_id: u32) -> Self {
        self.model_id = Some(model_id);
        self
    }

    /// Prepend a raw directory entry
    #[must_use]
    pub fn with_entry(mut self, entry: u32) -> Self {
        self.extra_entries.push(entry);
        self
    }

    /// Quadlets from `CONFIGURATION_ROM` onwards
    pub fn layout(&self) -> Vec<u32> {
        // header, name, options, guid hi, guid lo, root directory header
        const FIRST_ENTRY: usize = 6;

        let mut entries = self.extra_entries.clone();
        entries.push(
            DirectoryEntry::with_key(KeyType::Immediate, self.vendor_key, self.vendor_id)
                .into_bits(),
        );
        if let Some(model) = self.model_id {
            entries.push(
                DirectoryEntry::with_key(KeyType::Immediate, keys::MODEL_ID, model).into_bits(),
            );
        }

        let mut leaves = Vec::new();
        if let Some(text) = &self.description {
            leaves.push((keys::TEXTUAL, textual_leaf(text)));
        }
        if !self.keywords.is_empty() {
            leaves.push((keys::KEYWORD, keyword_leaf(&self.keywords)));
        }

        let first_leaf_entry = FIRST_ENTRY + entries.len();
        let mut leaf_start = first_leaf_entry + leaves.len();
        let mut body = Vec::new();
        for (i, (key, leaf)) in leaves.into_iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let distance = (leaf_start - (first_leaf_entry + i)) as u32;
            entries.push(DirectoryEntry::with_key(KeyType::Leaf, key, distance).into_bits());
            leaf_start += leaf.len();
            body.extend(leaf);
        }

        #[allow(clippy::cast_possible_truncation)]
        let mut rom = vec![
            0,
            csr::BUS_INFO_MAGIC,
            self.options.into_bits(),
            (self.guid >> 32) as u32,
            self.guid as u32,
            (entries.len() as u32) << 16,
        ];
        rom.extend(entries);
        rom.extend(body);

        #[allow(clippy::cast_possible_truncation)]
        let crc_length = (rom.len() - 1).min(255) as u8;
        rom[0] = RomHeader::new()
            .with_info_length(4)
            .with_crc_length(crc_length)
            .into_bits();
        rom
    }
}

fn pack_text(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(QUADLET_SIZE)
        .map(|chunk| {
            let mut raw = [0u8; QUADLET_SIZE];
            raw[..chunk.len()].copy_from_slice(chunk);
            u32::from_be_bytes(raw)
        })
        .collect()
}

fn leaf(data: Vec<u32>) -> Vec<u32> {
    #[allow(clippy::cast_possible_truncation)]
    let mut leaf = vec![(data.len() as u32) << 16];
    leaf.extend(data);
    leaf
}

fn textual_leaf(text: &str) -> Vec<u32> {
    // descriptor type / specifier id, then width / charset / language
    let mut data = vec![0, 0];
    data.extend(pack_text(text.as_bytes()));
    leaf(data)
}

fn keyword_leaf(words: &[String]) -> Vec<u32> {
    let mut bytes = Vec::new();
    for word in words {
        bytes.extend_from_slice(word.as_bytes());
        bytes.push(0);
    }
    leaf(pack_text(&bytes))
}

/// Self-ID quadlets for one node: packet #0 plus continuations for ports 3+
///
/// The node is link-active with gap count 63 and power class 0.
pub fn self_id(phy_id: u8, speed: Speed, contender: bool, ports: &[PortState]) -> Vec<u32> {
    let port = |i: usize| ports.get(i).copied().unwrap_or_default() as u8;
    let continuations = ports
        .len()
        .saturating_sub(PORTS_IN_FIRST_PACKET)
        .div_ceil(PORTS_PER_CONTINUATION);

    let mut quadlets = vec![SelfIdPacket0::new()
        .with_marker(SELF_ID_MARKER)
        .with_phy_id(phy_id)
        .with_link_active(true)
        .with_gap_count(0x3f)
        .with_speed(speed.code().min(3))
        .with_contender(contender)
        .with_p0(port(0))
        .with_p1(port(1))
        .with_p2(port(2))
        .with_more(continuations > 0)
        .into_bits()];

    for n in 0..continuations {
        let first = PORTS_IN_FIRST_PACKET + n * PORTS_PER_CONTINUATION;
        let states = std::array::from_fn(|i| PortState::from_bits(port(first + i)));
        #[allow(clippy::cast_possible_truncation)]
        quadlets.push(
            SelfIdContinuation::new()
                .with_marker(SELF_ID_MARKER)
                .with_phy_id(phy_id)
                .with_extended(true)
                .with_sequence(n as u8)
                .with_port_bits(SelfIdContinuation::pack_ports(states))
                .with_more(n + 1 < continuations)
                .into_bits(),
        );
    }
    quadlets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{read_quadlet, read_quadlets};

    fn open(bus: &SimulatedBus) -> SimulatedBus {
        let mut handle = bus.clone();
        handle.open().expect("open simulated adapter");
        handle
    }

    #[test]
    fn test_reads_require_open_adapter() {
        let bus = SimulatedBus::new();
        bus.add_node(SimulatedNode::new().with_quadlet(csr::CYCLE_TIME, 7));
        let err = read_quadlet(&bus, NodeId::local(0), csr::CYCLE_TIME).unwrap_err();
        assert!(err.is_bus_access());

        let bus = open(&bus);
        assert_eq!(read_quadlet(&bus, NodeId::local(0), csr::CYCLE_TIME).unwrap(), 7);
    }

    #[test]
    fn test_absent_node_and_address_errors() {
        let bus = SimulatedBus::new();
        bus.add_node(SimulatedNode::new());
        let bus = open(&bus);
        assert!(read_quadlet(&bus, NodeId::local(1), csr::NODE_IDS).is_err());
        assert!(read_quadlet(&bus, NodeId::local(0), csr::CYCLE_TIME).is_err());
        assert_eq!(
            read_quadlet(&bus, NodeId::local(0), csr::NODE_IDS).unwrap() >> 16,
            u32::from(NodeId::local(0).raw())
        );
    }

    #[test]
    fn test_script_then_sticky_last_value() {
        let bus = SimulatedBus::new();
        bus.add_node(SimulatedNode::new());
        bus.update_node(0, |n| n.set_script(csr::BUS_TIME, [1, 2]));
        let bus = open(&bus);
        let node = NodeId::local(0);
        assert_eq!(read_quadlet(&bus, node, csr::BUS_TIME).unwrap(), 1);
        assert_eq!(read_quadlet(&bus, node, csr::BUS_TIME).unwrap(), 2);
        assert_eq!(read_quadlet(&bus, node, csr::BUS_TIME).unwrap(), 2);
    }

    #[test]
    fn test_block_read_rejection() {
        let bus = SimulatedBus::new();
        bus.add_node(SimulatedNode::new().with_topology_map(1, &self_id(0, Speed::S400, true, &[])));
        let bus = open(&bus);
        let node = NodeId::local(0);
        assert_eq!(read_quadlets(&bus, node, csr::TOPOLOGY_MAP, 3).unwrap().len(), 3);
        bus.reject_block_reads(true);
        assert!(read_quadlets(&bus, node, csr::TOPOLOGY_MAP, 3).is_err());
        assert!(read_quadlet(&bus, node, csr::TOPOLOGY_MAP).is_ok());
    }

    #[test]
    fn test_general_rom_layout() {
        let rom = GeneralRom::new(0x0011_2233_4455_6677, 0x00abcdef, BusOptions::new())
            .with_description("camera")
            .layout();
        let header = RomHeader::from_bits(rom[0]);
        assert_eq!(header.info_length(), 4);
        assert_eq!(rom[1], csr::BUS_INFO_MAGIC);
        assert_eq!(rom[3], 0x0011_2233);
        assert_eq!(rom[4], 0x4455_6677);
        // two root entries: vendor, textual leaf
        assert_eq!(rom[5] >> 16, 2);
        assert_eq!(rom[6], 0x03ab_cdef);
        let leaf = DirectoryEntry::from_bits(rom[7]);
        assert_eq!(leaf.key_type(), KeyType::Leaf);
        assert_eq!(leaf.value(), 1);
        assert_eq!(rom[8] >> 16, 4);
        assert_eq!(&rom[9..11], &[0, 0]);
        assert_eq!(rom[11], u32::from_be_bytes(*b"came"));
    }

    #[test]
    fn test_self_id_continuations() {
        let ports = [PortState::Child; 12];
        let quadlets = self_id(4, Speed::S200, false, &ports);
        assert_eq!(quadlets.len(), 3);
        let first = SelfIdPacket0::from_bits(quadlets[0]);
        assert!(first.more());
        assert_eq!(first.phy_id(), 4);
        let second = SelfIdContinuation::from_bits(quadlets[1]);
        assert!(second.extended());
        assert_eq!(second.sequence(), 0);
        assert!(second.more());
        let third = SelfIdContinuation::from_bits(quadlets[2]);
        assert_eq!(third.sequence(), 1);
        assert!(!third.more());
        assert_eq!(third.ports()[0], PortState::Child);
        assert_eq!(third.ports()[1], PortState::NotPresent);
    }
}
