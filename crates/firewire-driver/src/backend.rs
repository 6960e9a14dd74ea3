//! Backend abstraction for bus access
//!
//! The backend is the driver layer that owns the host adapter: it reports
//! how many nodes are on the bus, which one is us, and performs raw CSR
//! reads. Everything above it is protocol logic.

use bytes::{Buf, BytesMut};
use firewire_csr::{csr, NodeId, QUADLET_SIZE};
use std::fmt::Debug;
use tracing::debug;

use crate::error::Result;

/// Host adapter backend - the only component that touches hardware
///
/// Reads are blocking and may fail at any time (hot-unplug, bus reset in
/// flight). Callers must treat every failure as recoverable.
pub trait BusBackend: Debug + Send + Sync {
    /// Open the first host adapter
    ///
    /// # Errors
    ///
    /// Returns error if no adapter can be opened.
    fn open(&mut self) -> Result<()> {
        self.open_adapter(0)
    }

    /// Open a specific host adapter
    ///
    /// # Errors
    ///
    /// Returns error if the adapter does not exist or cannot be opened.
    fn open_adapter(&mut self, adapter: usize) -> Result<()>;

    /// Release the adapter
    fn close(&mut self);

    /// Number of nodes on the bus, local node included
    ///
    /// # Errors
    ///
    /// Returns error if the adapter cannot report the bus size.
    fn number_of_nodes(&self) -> Result<u32>;

    /// Node id of the local node
    ///
    /// # Errors
    ///
    /// Returns error if the adapter has no valid node id (e.g. mid-reset).
    fn local_id(&self) -> Result<NodeId>;

    /// Read `buffer.len()` bytes from `address` on `node`
    ///
    /// Data is in bus order (big-endian quadlets).
    ///
    /// # Errors
    ///
    /// Returns `BusError::BusAccessFailure` on any failure.
    fn read(&self, node: NodeId, address: u64, buffer: &mut [u8]) -> Result<()>;
}

/// Read one quadlet at CSR `offset`
///
/// # Errors
///
/// Propagates the backend failure.
pub fn read_quadlet(backend: &dyn BusBackend, node: NodeId, offset: u64) -> Result<u32> {
    let mut raw = [0u8; QUADLET_SIZE];
    backend.read(node, csr::address(offset), &mut raw)?;
    Ok(u32::from_be_bytes(raw))
}

/// Read `count` consecutive quadlets starting at CSR `offset` in one access
///
/// # Errors
///
/// Propagates the backend failure; no partial data is returned.
pub fn read_quadlets(
    backend: &dyn BusBackend,
    node: NodeId,
    offset: u64,
    count: usize,
) -> Result<Vec<u32>> {
    let mut buffer = BytesMut::zeroed(count * QUADLET_SIZE);
    backend.read(node, csr::address(offset), &mut buffer)?;

    let mut data = buffer.freeze();
    let mut quadlets = Vec::with_capacity(count);
    while data.remaining() >= QUADLET_SIZE {
        quadlets.push(data.get_u32());
    }
    Ok(quadlets)
}

/// Read `count` quadlets one access at a time
///
/// Used when a node (or bridge) rejects block reads.
///
/// # Errors
///
/// Fails on the first quadlet that cannot be read.
pub fn read_quadlets_singly(
    backend: &dyn BusBackend,
    node: NodeId,
    offset: u64,
    count: usize,
) -> Result<Vec<u32>> {
    (0..count as u64)
        .map(|i| read_quadlet(backend, node, offset + i * QUADLET_SIZE as u64))
        .collect()
}

/// Read `count` quadlets, falling back to single-quadlet reads when the
/// block read is rejected
///
/// # Errors
///
/// Fails only if the quadlet-by-quadlet fallback fails too.
pub fn read_block(
    backend: &dyn BusBackend,
    node: NodeId,
    offset: u64,
    count: usize,
) -> Result<Vec<u32>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    match read_quadlets(backend, node, offset, count) {
        Ok(quadlets) => Ok(quadlets),
        Err(e) if count > 1 => {
            debug!("Block read of {count} quadlets from {node} failed ({e}), retrying singly");
            read_quadlets_singly(backend, node, offset, count)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{SimulatedBus, SimulatedNode};

    #[test]
    fn test_read_block_falls_back_to_quadlets() {
        let mut bus = SimulatedBus::new();
        bus.add_node(SimulatedNode::new().with_cycle_timer(0x1234_5678, 0x9abc));
        bus.open().unwrap();
        bus.reject_block_reads(true);

        let node = NodeId::local(0);
        assert!(read_quadlets(&bus, node, csr::CYCLE_TIME, 2).is_err());
        assert_eq!(
            read_block(&bus, node, csr::CYCLE_TIME, 2).unwrap(),
            vec![0x1234_5678, 0x9abc]
        );
    }

    #[test]
    fn test_read_quadlet_is_big_endian() {
        let mut bus = SimulatedBus::new();
        bus.add_node(SimulatedNode::new().with_quadlet(csr::BUS_INFO_NAME, csr::BUS_INFO_MAGIC));
        bus.open().unwrap();

        let mut raw = [0u8; 4];
        bus.read(NodeId::local(0), csr::address(csr::BUS_INFO_NAME), &mut raw)
            .unwrap();
        assert_eq!(&raw, b"1394");
    }
}
