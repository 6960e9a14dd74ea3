//! Topology map parser
//!
//! The bus manager (or IRM) keeps the self-ID packets of the last bus reset
//! in its `TOPOLOGY_MAP` CSR. This module reads that map and decodes it into
//! a fresh per-node table. Nothing caller-visible is modified: a torn or
//! malformed map yields an error and no table at all.

use firewire_csr::csr::{self, map_header};
use firewire_csr::node_id::MAX_NODES;
use firewire_csr::self_id::{
    DECODED_CONTINUATIONS, MAX_PORTS, PORTS_IN_FIRST_PACKET, PORTS_PER_CONTINUATION,
    SELF_ID_MARKER,
};
use firewire_csr::{
    Capabilities, NodeId, PortState, SelfIdContinuation, SelfIdPacket0, Speed, Standard,
};
use tracing::{debug, warn};

use crate::backend::{read_block, read_quadlet, BusBackend};
use crate::error::{BusError, Result};
use crate::rom::ConfigRom;

/// Everything known about one physical id after a reload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeRecord {
    /// A self-ID was seen for this physical id
    pub present: bool,
    /// Link layer active
    pub link_active: bool,
    /// Bus manager / IRM contender
    pub contender: bool,
    /// Gap count the PHY is using
    pub gap_count: u8,
    /// PHY speed
    pub speed: Speed,
    /// Link speed from the configuration ROM
    pub link_speed: Option<Speed>,
    /// Power class code
    pub power_class: u8,
    /// Capability bits from the configuration ROM
    pub capabilities: Capabilities,
    /// EUI-64, `None` if the ROM could not be read
    pub guid: Option<u64>,
    /// Standard the node complies with
    pub standard: Standard,
    /// This node initiated the last bus reset
    pub initiated_reset: bool,
    /// Number of entries of `ports` that were decoded
    pub port_count: usize,
    /// Port states
    pub ports: [PortState; MAX_PORTS],
}

impl NodeRecord {
    /// Ports connected to a parent or child
    pub fn connected_ports(&self) -> usize {
        self.ports[..self.port_count]
            .iter()
            .filter(|p| p.is_connected())
            .count()
    }
}

/// Decoded topology map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyMap {
    /// Generation counter of the map
    pub generation: u32,
    /// Nodes that sent self-IDs
    pub node_count: usize,
    /// Self-ID quadlets in the map
    pub self_id_count: usize,
    /// Per physical id records
    pub nodes: [NodeRecord; MAX_NODES],
}

impl TopologyMap {
    /// Map with no nodes
    pub fn empty(generation: u32) -> Self {
        Self {
            generation,
            node_count: 0,
            self_id_count: 0,
            nodes: [NodeRecord::default(); MAX_NODES],
        }
    }
}

/// Read and decode the topology map held by `host`
///
/// ROMs of the discovered nodes are read from `bus_id`; a node whose ROM
/// cannot be read is kept with `guid: None`.
///
/// # Errors
///
/// `InvalidTopologyMap` for malformed maps and maps that changed while being
/// read; read failures of the map itself are passed through.
pub fn read_topology_map(
    backend: &dyn BusBackend,
    host: NodeId,
    bus_id: u16,
) -> Result<TopologyMap> {
    let header = read_quadlet(backend, host, csr::TOPOLOGY_MAP)?;
    let length = map_header::length(header);
    if length < 3 {
        return Err(BusError::invalid_topology(format!(
            "map length {length} on {host} is too short"
        )));
    }

    let generation = read_quadlet(backend, host, csr::TOPOLOGY_MAP_GENERATION)?;
    let counts = read_quadlet(backend, host, csr::TOPOLOGY_MAP_COUNTS)?;
    let declared_nodes = counts >> 16;
    #[allow(clippy::cast_possible_truncation)]
    let self_id_count = (counts & 0xffff) as u16;
    if self_id_count == 0
        || self_id_count > csr::MAX_SELF_ID_COUNT
        || self_id_count > length - 2
    {
        return Err(BusError::invalid_topology(format!(
            "self-ID count {self_id_count} invalid for map length {length}"
        )));
    }

    let self_ids = read_block(
        backend,
        host,
        csr::TOPOLOGY_MAP_SELF_IDS,
        usize::from(self_id_count),
    )?;

    let again = read_quadlet(backend, host, csr::TOPOLOGY_MAP)?;
    if again != header {
        warn!("Topology map on {host} changed while reading ({header:#010x} -> {again:#010x})");
        return Err(BusError::invalid_topology("map changed while reading"));
    }

    let mut map = TopologyMap::empty(generation);
    map.self_id_count = self_ids.len();
    map.node_count = decode_self_ids(&self_ids, &mut map.nodes)?;
    if map.node_count as u32 != declared_nodes {
        debug!(
            "Topology map declares {declared_nodes} nodes, decoded {}",
            map.node_count
        );
    }

    for (phy, record) in map.nodes.iter_mut().take(map.node_count).enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let node = NodeId::new(phy as u8, bus_id);
        let rom = ConfigRom::new(backend, node);
        record.capabilities = rom.capabilities();
        record.standard = rom.compliance();
        match rom.identifier() {
            Ok(guid) => {
                record.guid = Some(guid);
                record.link_speed = rom.link_speed().ok().flatten();
                debug!("Node {node}: guid {guid:016x}, caps {}", record.capabilities);
            }
            Err(e) => warn!("Node {node}: configuration ROM unavailable: {e}"),
        }
    }

    debug!(
        "Topology generation {generation}: {} nodes from {} self-IDs",
        map.node_count, map.self_id_count
    );
    Ok(map)
}

/// Decode self-ID quadlets into `nodes`; returns the node count
fn decode_self_ids(self_ids: &[u32], nodes: &mut [NodeRecord; MAX_NODES]) -> Result<usize> {
    let mut expected = 0usize;
    let mut i = 0;

    while i < self_ids.len() {
        let packet = SelfIdPacket0::from_bits(self_ids[i]);
        if packet.marker() != SELF_ID_MARKER {
            return Err(BusError::invalid_topology(format!(
                "self-ID {i} has no self-ID marker"
            )));
        }
        if packet.extended() {
            return Err(BusError::invalid_topology(format!(
                "self-ID {i} is a continuation without packet #0"
            )));
        }
        if expected >= MAX_NODES {
            return Err(BusError::invalid_topology(format!(
                "self-ID {i} names phy {}, beyond the last physical id",
                packet.phy_id()
            )));
        }
        if usize::from(packet.phy_id()) != expected {
            return Err(BusError::invalid_topology(format!(
                "self-ID {i} from phy {}, expected {expected}",
                packet.phy_id()
            )));
        }

        let record = &mut nodes[expected];
        *record = NodeRecord {
            present: true,
            link_active: packet.link_active(),
            contender: packet.contender(),
            gap_count: packet.gap_count(),
            speed: Speed::from_code(packet.speed()).unwrap_or_default(),
            power_class: packet.power_class(),
            initiated_reset: packet.initiated_reset(),
            port_count: PORTS_IN_FIRST_PACKET,
            ..NodeRecord::default()
        };
        record.ports[..PORTS_IN_FIRST_PACKET].copy_from_slice(&packet.ports());

        let mut more = packet.more();
        i += 1;
        while more {
            let Some(&raw) = self_ids.get(i) else {
                return Err(BusError::invalid_topology(format!(
                    "self-IDs of phy {expected} are truncated"
                )));
            };
            let packet = SelfIdContinuation::from_bits(raw);
            if packet.marker() != SELF_ID_MARKER
                || !packet.extended()
                || usize::from(packet.phy_id()) != expected
            {
                return Err(BusError::invalid_topology(format!(
                    "self-ID {i} is not a continuation for phy {expected}"
                )));
            }
            // Packets past #3 carry no port states we can store
            if packet.sequence() < DECODED_CONTINUATIONS {
                let first = packet.first_port();
                record.ports[first..first + PORTS_PER_CONTINUATION]
                    .copy_from_slice(&packet.ports());
                record.port_count = record.port_count.max(first + PORTS_PER_CONTINUATION);
            }
            more = packet.more();
            i += 1;
        }
        expected += 1;
    }

    Ok(expected)
}
