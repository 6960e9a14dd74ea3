//! Role resolution
//!
//! Stateless scans that locate the nodes holding a bus role. Each scan runs
//! from physical id 62 down to 0, so the root end of the bus is checked
//! first. A role that no node holds resolves to the broadcast id.

use firewire_csr::csr::{self, bus_manager_id, node_ids, state_clear};
use firewire_csr::node_id::BROADCAST;
use firewire_csr::{Capabilities, NodeId};
use std::fmt;
use tracing::{debug, warn};

use crate::backend::{read_quadlet, BusBackend};
use crate::rom::ConfigRom;

/// Special roles a node can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends cycle start packets
    CycleMaster,
    /// Owns the bandwidth and channel registers
    IsochronousResourceManager,
    /// Elected bus manager
    BusManager,
    /// Root of the tree
    Root,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleMaster => write!(f, "cycle master"),
            Self::IsochronousResourceManager => write!(f, "isochronous resource manager"),
            Self::BusManager => write!(f, "bus manager"),
            Self::Root => write!(f, "root"),
        }
    }
}

/// Find the node holding `role` on `bus_id`
///
/// Returns `NodeId::broadcast(bus_id)` when no node qualifies.
///
/// Read failures are handled per role: the cycle master scan gives up on
/// the first failing `STATE_CLEAR` read, the other scans skip the failing
/// node and keep going.
///
/// The root scan does not inspect port states: every responsive node
/// reports its own physical id in `NODE_IDS`, so the root is the highest
/// physical id that answers.
pub fn find_role(backend: &dyn BusBackend, role: Role, bus_id: u16) -> NodeId {
    let absent = NodeId::broadcast(bus_id);

    for phy in (0..BROADCAST).rev() {
        let node = NodeId::new(phy, bus_id);
        let found = match role {
            Role::CycleMaster => {
                let caps = ConfigRom::new(backend, node).capabilities();
                if !caps.contains(Capabilities::CMC | Capabilities::ISC) {
                    continue;
                }
                match read_quadlet(backend, node, csr::STATE_CLEAR) {
                    Ok(value) => value & state_clear::CMSTR != 0,
                    Err(e) => {
                        warn!("Cycle master scan aborted at {node}: {e}");
                        return absent;
                    }
                }
            }
            Role::IsochronousResourceManager => {
                if read_quadlet(backend, node, csr::CYCLE_TIME).is_err() {
                    continue;
                }
                ConfigRom::new(backend, node)
                    .capabilities()
                    .contains(Capabilities::IRMC)
            }
            Role::BusManager => match read_quadlet(backend, node, csr::BUS_MANAGER_ID) {
                Ok(value) => bus_manager_id::physical_id(value) == phy,
                Err(_) => continue,
            },
            Role::Root => match read_quadlet(backend, node, csr::NODE_IDS) {
                Ok(value) => node_ids::physical_id(value) == phy,
                Err(_) => continue,
            },
        };

        if found {
            debug!("Found {role} at {node}");
            return node;
        }
    }

    debug!("No {role} on bus {bus_id}");
    absent
}
