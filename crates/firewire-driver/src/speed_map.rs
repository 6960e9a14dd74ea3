//! Speed map loader
//!
//! `SPEED_MAP` holds one byte per ordered pair of physical ids giving the
//! fastest speed a packet can travel between them. The matrix is kept as
//! read: `speed[a][b]` and `speed[b][a]` may differ.

use firewire_csr::csr::{self, map_header};
use firewire_csr::node_id::BROADCAST;
use firewire_csr::{NodeId, Speed, QUADLET_SIZE};
use std::fmt;
use tracing::{debug, warn};

use crate::backend::{read_block, read_quadlet, BusBackend};
use crate::error::{BusError, Result};

/// Rows and columns of the matrix
const DIMENSION: usize = 64;

/// Pairwise speed matrix
#[derive(Clone, PartialEq, Eq)]
pub struct SpeedMap {
    generation: u32,
    speeds: Box<[[Speed; DIMENSION]; DIMENSION]>,
}

impl fmt::Debug for SpeedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeedMap")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl SpeedMap {
    /// All pairs at S100
    pub fn new(generation: u32) -> Self {
        Self {
            generation,
            speeds: Box::new([[Speed::S100; DIMENSION]; DIMENSION]),
        }
    }

    /// Generation counter of the map this was loaded from
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Speed from `from` to `to`
    pub fn speed_between(&self, from: u8, to: u8) -> Speed {
        self.speeds[usize::from(from & BROADCAST)][usize::from(to & BROADCAST)]
    }

    /// Overwrite one entry
    pub fn set(&mut self, from: u8, to: u8, speed: Speed) {
        self.speeds[usize::from(from & BROADCAST)][usize::from(to & BROADCAST)] = speed;
    }

    /// Slowest speed from `local` to any node in `mask` (bit `n` = phy `n`)
    ///
    /// An empty mask places no constraint and yields [`Speed::S3200`].
    pub fn minimum_speed(&self, local: u8, mask: u64) -> Speed {
        (0..BROADCAST)
            .filter(|phy| mask & (1 << phy) != 0)
            .map(|phy| self.speed_between(local, phy))
            .min()
            .unwrap_or(Speed::S3200)
    }

    /// Speed of broadcast packets sent by `local`
    pub fn broadcast_speed(&self, local: u8) -> Speed {
        self.speed_between(local, BROADCAST)
    }
}

/// Read the speed map held by `host` for a bus of `node_count` nodes
///
/// # Errors
///
/// `InvalidSpeedMap` when the header has the wrong length or changed while
/// reading; read failures are passed through.
pub fn read_speed_map(backend: &dyn BusBackend, host: NodeId, node_count: usize) -> Result<SpeedMap> {
    let header = read_quadlet(backend, host, csr::SPEED_MAP)?;
    let length = map_header::length(header);
    if length != csr::SPEED_MAP_LENGTH {
        return Err(BusError::invalid_speed_map(format!(
            "length {length} on {host}, expected {}",
            csr::SPEED_MAP_LENGTH
        )));
    }

    let generation = read_quadlet(backend, host, csr::SPEED_MAP_GENERATION)?;
    let bytes = (DIMENSION * node_count + node_count).min(csr::SPEED_MAP_BYTES);
    let quadlets = read_block(
        backend,
        host,
        csr::SPEED_MAP_SPEEDS,
        bytes.div_ceil(QUADLET_SIZE),
    )?;

    let again = read_quadlet(backend, host, csr::SPEED_MAP)?;
    if again != header {
        warn!("Speed map on {host} changed while reading");
        return Err(BusError::invalid_speed_map("map changed while reading"));
    }

    let mut map = SpeedMap::new(generation);
    for (index, byte) in quadlets
        .iter()
        .flat_map(|q| q.to_be_bytes())
        .take(bytes)
        .enumerate()
    {
        map.speeds[index / DIMENSION][index % DIMENSION] = Speed::from_speed_map_byte(byte);
    }

    debug!("Speed map generation {generation}: {bytes} entries from {host}");
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{SimulatedBus, SimulatedNode};

    fn asymmetric(from: u8, to: u8) -> Speed {
        match (from, to) {
            (1, 2) => Speed::S400,
            (2, 1) => Speed::S200,
            (_, BROADCAST) => Speed::S200,
            _ => Speed::S100,
        }
    }

    fn bus(node: SimulatedNode) -> SimulatedBus {
        let mut bus = SimulatedBus::new();
        bus.add_node(node);
        bus.open().unwrap();
        bus
    }

    #[test]
    fn test_asymmetry_is_preserved() {
        let bus = bus(SimulatedNode::new().with_speed_map(3, asymmetric));
        let map = read_speed_map(&bus, NodeId::local(0), 3).unwrap();

        assert_eq!(map.generation(), 3);
        assert_eq!(map.speed_between(1, 2), Speed::S400);
        assert_eq!(map.speed_between(2, 1), Speed::S200);
        assert_eq!(map.broadcast_speed(1), Speed::S200);
    }

    #[test]
    fn test_only_present_rows_are_loaded() {
        let bus = bus(SimulatedNode::new().with_speed_map(1, |_, _| Speed::S400));
        let map = read_speed_map(&bus, NodeId::local(0), 2).unwrap();
        assert_eq!(map.speed_between(1, 63), Speed::S400);
        // byte 130 is the first one past 64*2 + 2
        assert_eq!(map.speed_between(2, 2), Speed::S100);
    }

    #[test]
    fn test_unknown_codes_fall_back() {
        let bus = bus(SimulatedNode::new().with_speed_map(1, |_, _| Speed::S800));
        let map = read_speed_map(&bus, NodeId::local(0), 1).unwrap();
        assert_eq!(map.speed_between(0, 0), Speed::S100);
    }

    #[test]
    fn test_bad_length() {
        let bus = bus(
            SimulatedNode::new()
                .with_speed_map(1, asymmetric)
                .with_quadlet(csr::SPEED_MAP, map_header::new(1008, 0)),
        );
        let err = read_speed_map(&bus, NodeId::local(0), 3).unwrap_err();
        assert!(matches!(err, BusError::InvalidSpeedMap { .. }));
    }

    #[test]
    fn test_torn_read() {
        let bus = bus(SimulatedNode::new().with_speed_map(1, asymmetric));
        bus.update_node(0, |n| {
            n.set_script(
                csr::SPEED_MAP,
                [
                    map_header::new(csr::SPEED_MAP_LENGTH, 0),
                    map_header::new(csr::SPEED_MAP_LENGTH, 0xbeef),
                ],
            );
        });
        let err = read_speed_map(&bus, NodeId::local(0), 3).unwrap_err();
        assert!(matches!(err, BusError::InvalidSpeedMap { .. }));
    }

    #[test]
    fn test_quadlet_fallback() {
        let bus = bus(SimulatedNode::new().with_speed_map(1, asymmetric));
        bus.reject_block_reads(true);
        let map = read_speed_map(&bus, NodeId::local(0), 3).unwrap();
        assert_eq!(map.speed_between(1, 2), Speed::S400);
    }

    #[test]
    fn test_full_bus_stays_in_bounds() {
        let bus = bus(SimulatedNode::new().with_speed_map(1, |_, _| Speed::S200));
        let map = read_speed_map(&bus, NodeId::local(0), 63).unwrap();
        assert_eq!(map.speed_between(62, 62), Speed::S200);
        assert_eq!(map.speed_between(63, 0), Speed::S100);
    }

    #[test]
    fn test_minimum_speed() {
        let mut map = SpeedMap::new(0);
        map.set(0, 1, Speed::S400);
        map.set(0, 2, Speed::S200);
        map.set(0, 3, Speed::S400);

        assert_eq!(map.minimum_speed(0, 0), Speed::S3200);
        assert_eq!(map.minimum_speed(0, 0b1010), Speed::S400);
        assert_eq!(map.minimum_speed(0, 0b1110), Speed::S200);
    }
}
