//! Bus controller
//!
//! Owns the backend and the last published [`BusSnapshot`]. A reload builds
//! a complete new snapshot (roles, node table, speed map) and swaps it in
//! only when every step succeeded; readers holding an older `Arc` keep a
//! consistent view.
//!
//! `reload()` and `check_reset_generation()` are blocking and must not be
//! called concurrently with each other; the query methods may be called from
//! any thread at any time.

use firewire_csr::csr::{self, bandwidth, bus_manager_id, state_clear};
use firewire_csr::node_id::{BROADCAST, LOCAL_BUS, MAX_NODES};
use firewire_csr::{Capabilities, NodeId, Speed};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use crate::backend::{read_quadlet, BusBackend};
use crate::config::{GenerationChangePolicy, ReloadConfig};
use crate::error::{BusError, Result};
use crate::rom::ConfigRom;
use crate::roles::Role;
use crate::speed_map::{read_speed_map, SpeedMap};
use crate::topology::{read_topology_map, NodeRecord};

/// Bus state captured by one successful reload
#[derive(Debug, Clone)]
pub struct BusSnapshot {
    /// Our node id
    pub local_id: NodeId,
    /// Nodes on the bus, local node included
    pub node_count: usize,
    /// Per physical id records; empty on an unmanaged bus
    pub nodes: [NodeRecord; MAX_NODES],
    /// Root node (highest physical id)
    pub root_id: NodeId,
    /// Active cycle master, broadcast if none
    pub cycle_master_id: NodeId,
    /// Isochronous resource manager, broadcast if none
    pub isochronous_resource_manager_id: NodeId,
    /// Bus manager, broadcast if none
    pub bus_manager_id: NodeId,
    /// Node the topology and speed maps were read from
    pub topology_host: Option<NodeId>,
    /// EUI-64 of `topology_host`
    pub topology_host_guid: Option<u64>,
    /// Pairwise speeds
    pub speed_map: Option<SpeedMap>,
    /// Topology generation the snapshot belongs to
    pub reset_generation: Option<u32>,
}

impl Default for BusSnapshot {
    fn default() -> Self {
        Self::empty(LOCAL_BUS)
    }
}

impl BusSnapshot {
    /// No nodes, every role absent
    pub fn empty(bus_id: u16) -> Self {
        let absent = NodeId::broadcast(bus_id);
        Self {
            local_id: absent,
            node_count: 0,
            nodes: [NodeRecord::default(); MAX_NODES],
            root_id: absent,
            cycle_master_id: absent,
            isochronous_resource_manager_id: absent,
            bus_manager_id: absent,
            topology_host: None,
            topology_host_guid: None,
            speed_map: None,
            reset_generation: None,
        }
    }

    /// Whether an isochronous resource manager was found
    pub const fn is_managed(&self) -> bool {
        !self.isochronous_resource_manager_id.is_broadcast()
    }

    /// Node holding `role`
    pub const fn role(&self, role: Role) -> NodeId {
        match role {
            Role::CycleMaster => self.cycle_master_id,
            Role::IsochronousResourceManager => self.isochronous_resource_manager_id,
            Role::BusManager => self.bus_manager_id,
            Role::Root => self.root_id,
        }
    }

    /// Record of `node`, if it is present
    pub fn node(&self, node: NodeId) -> Option<&NodeRecord> {
        self.nodes
            .get(usize::from(node.physical_id()))
            .filter(|record| record.present)
    }

    /// Present nodes with their records
    pub fn present_nodes(&self) -> impl Iterator<Item = (NodeId, &NodeRecord)> + '_ {
        let bus_id = self.local_id.bus_id();
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, record)| record.present)
            .map(move |(phy, record)| {
                #[allow(clippy::cast_possible_truncation)]
                let node = NodeId::new(phy as u8, bus_id);
                (node, record)
            })
    }
}

/// IEEE 1394 bus controller
#[derive(Debug)]
pub struct BusController {
    backend: Box<dyn BusBackend>,
    config: ReloadConfig,
    snapshot: RwLock<Arc<BusSnapshot>>,
}

impl BusController {
    /// Open the first adapter of `backend` with the default configuration
    ///
    /// No reload is performed; call [`reload`](Self::reload) before querying.
    ///
    /// # Errors
    ///
    /// Returns the backend's open failure.
    pub fn new(backend: impl BusBackend + 'static) -> Result<Self> {
        Self::with_config(backend, ReloadConfig::default())
    }

    /// Open the first adapter of `backend` with an explicit configuration
    ///
    /// # Errors
    ///
    /// Returns the backend's open failure.
    pub fn with_config(mut backend: impl BusBackend + 'static, config: ReloadConfig) -> Result<Self> {
        backend.open()?;
        info!("Bus controller opened ({} reload attempts)", config.max_attempts);
        Ok(Self {
            backend: Box::new(backend),
            config,
            snapshot: RwLock::new(Arc::new(BusSnapshot::default())),
        })
    }

    /// Backend this controller drives
    pub fn backend(&self) -> &dyn BusBackend {
        self.backend.as_ref()
    }

    /// Reload configuration
    pub const fn config(&self) -> &ReloadConfig {
        &self.config
    }

    /// Last published snapshot
    pub fn snapshot(&self) -> Arc<BusSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    fn publish(&self, snapshot: BusSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    /// Rediscover the whole bus
    ///
    /// Every attempt builds a snapshot from scratch; the first one that
    /// completes is published. When the attempt budget runs out an empty
    /// snapshot is published instead.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub fn reload(&self) -> Result<()> {
        let attempts = self.config.max_attempts.max(1);
        let mut last = BusError::not_ready("bus was never read");

        for attempt in 1..=attempts {
            debug!("Reload attempt {attempt}/{attempts}");
            match self.load() {
                Ok(snapshot) => {
                    info!(
                        "Bus reloaded: {} nodes, local {}, root {}, irm {}, bm {}, cm {}",
                        snapshot.node_count,
                        snapshot.local_id,
                        snapshot.root_id,
                        snapshot.isochronous_resource_manager_id,
                        snapshot.bus_manager_id,
                        snapshot.cycle_master_id
                    );
                    self.publish(snapshot);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Reload attempt {attempt}/{attempts} failed: {e}");
                    last = e;
                    if attempt < attempts {
                        thread::sleep(self.config.retry_delay);
                    }
                }
            }
        }

        error!("Bus reload failed after {attempts} attempts: {last}");
        self.publish(BusSnapshot::default());
        Err(last)
    }

    /// One reload attempt
    fn load(&self) -> Result<BusSnapshot> {
        let backend = self.backend();

        let count = backend.number_of_nodes()?;
        if count == 0 || count as usize > MAX_NODES {
            return Err(BusError::not_ready(format!("adapter reports {count} nodes")));
        }
        #[allow(clippy::cast_possible_truncation)]
        let count = count as u8;
        let local_id = backend.local_id()?;
        if local_id.physical_id() >= count {
            return Err(BusError::not_ready(format!(
                "local id {local_id} outside {count} nodes"
            )));
        }
        let bus_id = local_id.bus_id();

        let mut snapshot = BusSnapshot::empty(bus_id);
        snapshot.local_id = local_id;
        snapshot.node_count = usize::from(count);
        snapshot.root_id = NodeId::new(count - 1, bus_id);

        snapshot.isochronous_resource_manager_id =
            self.scan(count, bus_id, Role::IsochronousResourceManager, |_, rom| {
                Ok(rom.try_capabilities()?.contains(Capabilities::IRMC))
            })?;
        snapshot.cycle_master_id = self.scan(count, bus_id, Role::CycleMaster, |node, rom| {
            if !rom
                .try_capabilities()?
                .contains(Capabilities::CMC | Capabilities::ISC)
            {
                return Ok(false);
            }
            Ok(read_quadlet(backend, node, csr::STATE_CLEAR)? & state_clear::CMSTR != 0)
        })?;

        if !snapshot.is_managed() {
            info!("No isochronous resource manager: bus is unmanaged");
            return Ok(snapshot);
        }

        let irm = snapshot.isochronous_resource_manager_id;
        let bm_phy = bus_manager_id::physical_id(read_quadlet(backend, irm, csr::BUS_MANAGER_ID)?);
        if bm_phy != BROADCAST && bm_phy < count {
            let bm = NodeId::new(bm_phy, bus_id);
            if ConfigRom::new(backend, bm)
                .try_capabilities()?
                .contains(Capabilities::BMC)
            {
                snapshot.bus_manager_id = bm;
            } else {
                debug!("{bm} is named bus manager but is not bus manager capable");
            }
        }

        let host = if snapshot.bus_manager_id.is_broadcast() {
            irm
        } else {
            snapshot.bus_manager_id
        };

        let before = read_quadlet(backend, host, csr::TOPOLOGY_MAP_GENERATION)?;
        let topology = read_topology_map(backend, host, bus_id)?;
        let speed_map = read_speed_map(backend, host, snapshot.node_count)?;
        let after = read_quadlet(backend, host, csr::TOPOLOGY_MAP_GENERATION)?;

        if after != before {
            match self.config.generation_policy {
                GenerationChangePolicy::Accept { settle } => {
                    warn!("Topology generation moved {before} -> {after} during reload, accepting");
                    thread::sleep(settle);
                }
                GenerationChangePolicy::Retry => {
                    return Err(BusError::invalid_topology(format!(
                        "generation moved {before} -> {after} during reload"
                    )));
                }
            }
        }

        snapshot.topology_host_guid = topology.nodes[usize::from(host.physical_id())].guid;
        snapshot.nodes = topology.nodes;
        snapshot.topology_host = Some(host);
        snapshot.speed_map = Some(speed_map);
        snapshot.reset_generation = Some(after);
        Ok(snapshot)
    }

    /// Descending scan that aborts on the first read failure
    fn scan(
        &self,
        count: u8,
        bus_id: u16,
        role: Role,
        accept: impl Fn(NodeId, &ConfigRom<'_>) -> Result<bool>,
    ) -> Result<NodeId> {
        for phy in (0..count).rev() {
            let node = NodeId::new(phy, bus_id);
            if accept(node, &ConfigRom::new(self.backend(), node))? {
                debug!("Elected {role}: {node}");
                return Ok(node);
            }
        }
        Ok(NodeId::broadcast(bus_id))
    }

    /// Reload only if the bus changed since the last reload
    ///
    /// The cached topology host is re-identified by GUID and its generation
    /// counter compared with the cached one. Any mismatch or read failure
    /// triggers a full [`reload`](Self::reload).
    ///
    /// # Errors
    ///
    /// Returns the reload failure, if a reload was needed and failed.
    pub fn check_reset_generation(&self) -> Result<bool> {
        let snapshot = self.snapshot();
        let current = match (
            snapshot.topology_host,
            snapshot.topology_host_guid,
            snapshot.reset_generation,
        ) {
            (Some(host), Some(guid), Some(generation)) => self.is_current(host, guid, generation),
            _ => false,
        };

        if current {
            return Ok(false);
        }
        self.reload()?;
        Ok(true)
    }

    fn is_current(&self, host: NodeId, guid: u64, generation: u32) -> bool {
        match ConfigRom::new(self.backend(), host).identifier() {
            Ok(live) if live == guid => {}
            Ok(live) => {
                info!("Topology host {host} changed identity ({guid:016x} -> {live:016x})");
                return false;
            }
            Err(e) => {
                debug!("Cannot identify topology host {host}: {e}");
                return false;
            }
        }

        match read_quadlet(self.backend(), host, csr::TOPOLOGY_MAP_GENERATION) {
            Ok(live) if live == generation => true,
            Ok(live) => {
                debug!("Topology generation moved {generation} -> {live}");
                false
            }
            Err(e) => {
                debug!("Cannot read topology generation of {host}: {e}");
                false
            }
        }
    }

    /// Our node id
    pub fn local_id(&self) -> NodeId {
        self.snapshot().local_id
    }

    /// Our physical id
    pub fn physical_id(&self) -> u8 {
        self.local_id().physical_id()
    }

    /// Nodes on the bus
    pub fn node_count(&self) -> usize {
        self.snapshot().node_count
    }

    /// Generation of the last successful reload
    pub fn reset_generation(&self) -> Option<u32> {
        self.snapshot().reset_generation
    }

    /// Root node
    pub fn root_id(&self) -> NodeId {
        self.snapshot().root_id
    }

    /// Active cycle master
    pub fn cycle_master_id(&self) -> NodeId {
        self.snapshot().cycle_master_id
    }

    /// Isochronous resource manager
    pub fn isochronous_resource_manager_id(&self) -> NodeId {
        self.snapshot().isochronous_resource_manager_id
    }

    /// Bus manager
    pub fn bus_manager_id(&self) -> NodeId {
        self.snapshot().bus_manager_id
    }

    /// Whether the bus has an isochronous resource manager
    pub fn is_managed(&self) -> bool {
        self.snapshot().is_managed()
    }

    /// Present nodes and their GUIDs
    pub fn nodes(&self) -> Vec<(NodeId, Option<u64>)> {
        self.snapshot()
            .present_nodes()
            .map(|(node, record)| (node, record.guid))
            .collect()
    }

    /// Node currently carrying `guid`
    pub fn find_node_by_guid(&self, guid: u64) -> Option<NodeId> {
        self.snapshot()
            .present_nodes()
            .find(|(_, record)| record.guid == Some(guid))
            .map(|(node, _)| node)
    }

    /// Configuration ROM reader for `node`
    pub fn rom(&self, node: NodeId) -> ConfigRom<'_> {
        ConfigRom::new(self.backend(), node)
    }

    /// `CYCLE_TIME` register of `node`
    ///
    /// # Errors
    ///
    /// Returns the read failure.
    pub fn cycle_time(&self, node: NodeId) -> Result<u32> {
        read_quadlet(self.backend(), node, csr::CYCLE_TIME)
    }

    /// `BUS_TIME` register of `node`
    ///
    /// # Errors
    ///
    /// Returns the read failure.
    pub fn bus_time(&self, node: NodeId) -> Result<u32> {
        read_quadlet(self.backend(), node, csr::BUS_TIME)
    }

    fn irm(&self) -> Result<NodeId> {
        let irm = self.isochronous_resource_manager_id();
        if irm.is_broadcast() {
            return Err(BusError::not_ready("no isochronous resource manager"));
        }
        Ok(irm)
    }

    /// Unallocated isochronous bandwidth, in allocation units
    ///
    /// # Errors
    ///
    /// `NotReady` on an unmanaged bus, or the read failure.
    pub fn available_bandwidth(&self) -> Result<u32> {
        let value = read_quadlet(self.backend(), self.irm()?, csr::BANDWIDTH_AVAILABLE)?;
        Ok(bandwidth::units(value))
    }

    /// Free isochronous channels, channel `n` in bit `n`
    ///
    /// The IRM stores channel 0 in the most significant bit, so the
    /// 64-bit register pair is bit-reversed.
    ///
    /// # Errors
    ///
    /// `NotReady` on an unmanaged bus, or the read failure.
    pub fn available_isochronous_channels(&self) -> Result<u64> {
        let irm = self.irm()?;
        let hi = read_quadlet(self.backend(), irm, csr::CHANNELS_AVAILABLE_HI)?;
        let lo = read_quadlet(self.backend(), irm, csr::CHANNELS_AVAILABLE_LO)?;
        Ok(((u64::from(hi) << 32) | u64::from(lo)).reverse_bits())
    }

    /// PHY speed of `node`, from its self-ID
    pub fn maximum_speed(&self, node: NodeId) -> Option<Speed> {
        self.snapshot().node(node).map(|record| record.speed)
    }

    /// Link speed of `node`, from its configuration ROM
    pub fn maximum_link_speed(&self, node: NodeId) -> Option<Speed> {
        self.snapshot().node(node).and_then(|record| record.link_speed)
    }

    fn query_speed_map<T>(&self, query: impl FnOnce(&SpeedMap, u8) -> T) -> Result<T> {
        let snapshot = self.snapshot();
        let map = snapshot
            .speed_map
            .as_ref()
            .ok_or_else(|| BusError::not_ready("no speed map loaded"))?;
        Ok(query(map, snapshot.local_id.physical_id()))
    }

    /// Fastest speed from `from` to `to`
    ///
    /// # Errors
    ///
    /// `NotReady` until a managed bus was reloaded.
    pub fn maximum_speed_between(&self, from: NodeId, to: NodeId) -> Result<Speed> {
        self.query_speed_map(|map, _| map.speed_between(from.physical_id(), to.physical_id()))
    }

    /// Speed of broadcast packets sent by the local node
    ///
    /// # Errors
    ///
    /// `NotReady` until a managed bus was reloaded.
    pub fn broadcast_speed(&self) -> Result<Speed> {
        self.query_speed_map(|map, local| map.broadcast_speed(local))
    }

    /// Slowest speed from the local node to the nodes in `mask`
    ///
    /// # Errors
    ///
    /// `NotReady` until a managed bus was reloaded.
    pub fn minimum_speed(&self, mask: u64) -> Result<Speed> {
        self.query_speed_map(|map, local| map.minimum_speed(local, mask))
    }
}

impl Drop for BusController {
    fn drop(&mut self) {
        self.backend.close();
        debug!("Bus controller closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{SimulatedBus, SimulatedNode};
    use std::time::Duration;

    fn fast() -> ReloadConfig {
        ReloadConfig::default()
            .with_max_attempts(2)
            .with_retry_delay(Duration::ZERO)
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = BusSnapshot::default();
        assert!(!snapshot.is_managed());
        assert_eq!(snapshot.present_nodes().count(), 0);
        assert!(snapshot.role(Role::Root).is_broadcast());
    }

    #[test]
    fn test_queries_before_reload() {
        let controller = BusController::with_config(SimulatedBus::new(), fast()).unwrap();
        assert!(controller.local_id().is_broadcast());
        assert!(matches!(
            controller.available_bandwidth(),
            Err(BusError::NotReady { .. })
        ));
        assert!(matches!(
            controller.broadcast_speed(),
            Err(BusError::NotReady { .. })
        ));
    }

    #[test]
    fn test_empty_bus_fails_reload() {
        let controller = BusController::with_config(SimulatedBus::new(), fast()).unwrap();
        assert!(matches!(
            controller.reload(),
            Err(BusError::NotReady { .. })
        ));
    }

    #[test]
    fn test_open_and_close() {
        let bus = SimulatedBus::new();
        bus.add_node(SimulatedNode::new());
        let controller = BusController::new(bus.clone()).unwrap();
        assert!(bus.is_open());
        drop(controller);
        assert!(!bus.is_open());
    }
}
