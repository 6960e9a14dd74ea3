//! Protocol model for the IEEE-1394 (FireWire) serial bus.
//!
//! This crate has **no hardware access**: it is a pure model of the wire
//! and register formats the bus management layer decodes: the CSR address
//! map, node id encoding, bus-info block, configuration ROM directory
//! entries, self-ID packets and speed codes.
//!
//! Everything here follows IEEE 1394-1995 / 1394a-2000 and the CSR
//! architecture of IEEE 1212.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`node_id`] | 16-bit node id (`bus_id:physical_id`), textual form |
//! | [`csr`] | CSR register offsets, bus-info magic, `STATE_CLEAR` bits |
//! | [`bus_info`] | Bus-options quadlet, capability bits, ROM header, compliance |
//! | [`directory`] | Configuration ROM directory entries and key values |
//! | [`self_id`] | Self-ID packet 0 / continuation layouts, port states |
//! | [`speed`] | Speed codes `S100`..`S3200` |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bus_info;
pub mod csr;
pub mod directory;
pub mod node_id;
pub mod self_id;
pub mod speed;

pub use bus_info::{BusOptions, Capabilities, RomHeader, Standard};
pub use directory::{DirectoryEntry, KeyType};
pub use node_id::NodeId;
pub use self_id::{PortState, SelfIdContinuation, SelfIdPacket0};
pub use speed::Speed;

/// Size of a quadlet in bytes.
pub const QUADLET_SIZE: usize = 4;
