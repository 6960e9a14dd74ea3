//! IEEE-1394 (FireWire) bus management in pure Rust.
//!
//! This crate discovers the nodes on a serial bus, elects the bus roles,
//! decodes each node's configuration ROM and the bus-wide topology and speed
//! maps, and models isochronous transfer requests. All hardware access goes
//! through one small trait, [`BusBackend`], so the protocol logic runs the
//! same against a host adapter or the bundled [`SimulatedBus`].
//!
//! # Layers
//!
//! ```text
//! BusController      reload / check_reset_generation / queries
//!   ├─ roles         root, cycle master, IRM, bus manager election
//!   ├─ topology      topology map → per-node records
//!   ├─ speed_map     64×64 pairwise speed table
//!   └─ rom           configuration ROM (bus-info block, root directory)
//! BusBackend         quadlet / block reads of remote CSR space
//!
//! isoch::Channel     isochronous request queue over a ChannelBackend
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use firewire_driver::{BusController, ReloadConfig, SimulatedBus};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = SimulatedBus::new();
//! let controller = BusController::with_config(bus, ReloadConfig::from_env())?;
//! controller.reload()?;
//!
//! for (node, guid) in controller.nodes() {
//!     println!("{node}: {guid:?} at {:?}", controller.maximum_speed(node));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`backends`] | Simulated bus with fault injection |
//! | [`config`] | Reload attempts, delay, generation change policy |
//! | [`isoch`] | Request variants, channel, loopback channel backend |
//! | [`roles`] | Per-role node scans |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
pub mod config;
mod controller;
mod error;
pub mod isoch;
pub mod roles;
mod rom;
mod speed_map;
mod topology;

pub use backend::{read_block, read_quadlet, read_quadlets, read_quadlets_singly, BusBackend};
pub use backends::{GeneralRom, SimulatedBus, SimulatedNode};
pub use config::{GenerationChangePolicy, ReloadConfig};
pub use controller::{BusController, BusSnapshot};
pub use error::{BusError, Result};
pub use isoch::{AnyRequest, Channel, ChannelBackend, IsochRequest, LoopbackChannel};
pub use roles::{find_role, Role};
pub use rom::ConfigRom;
pub use speed_map::{read_speed_map, SpeedMap};
pub use topology::{read_topology_map, NodeRecord, TopologyMap};

/// Wire formats re-exported from firewire-csr.
pub mod csr {
    pub use firewire_csr::node_id::{BROADCAST, LOCAL_BUS, MAX_NODES};
    pub use firewire_csr::{
        csr::*, BusOptions, Capabilities, DirectoryEntry, KeyType, NodeId, PortState, RomHeader,
        Speed, Standard,
    };
}

/// Commonly used types.
pub mod prelude {
    pub use crate::isoch::{RequestKind, RequestStatus};
    pub use crate::{
        BusBackend, BusController, BusError, Channel, ConfigRom, IsochRequest, ReloadConfig,
        Result, Role, SimulatedBus,
    };
    pub use firewire_csr::{Capabilities, NodeId, Speed};
}
