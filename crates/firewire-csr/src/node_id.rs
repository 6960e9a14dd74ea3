//! 16-bit node addressing.
//!
//! ```text
//!  15                6 5          0
//! ┌───────────────────┬────────────┐
//! │   bus_id (10)     │ phy_id (6) │
//! └───────────────────┴────────────┘
//! ```
//!
//! `bus_id == 1023` addresses the local bus, `phy_id == 63` is the
//! broadcast address (and doubles as "no node").

use std::fmt;

/// Bus id meaning "the bus the requester is attached to".
pub const LOCAL_BUS: u16 = 1023;

/// Physical id used for broadcast, also the "no node" sentinel.
pub const BROADCAST: u8 = 63;

/// Maximum number of nodes on one bus (physical ids `0..=62`).
pub const MAX_NODES: usize = 63;

const BUS_ID_MASK: u16 = 0x3ff;
const PHY_ID_MASK: u16 = 0x3f;

/// A 16-bit IEEE-1394 node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u16);

impl NodeId {
    /// Encode a node id. Out-of-range inputs are masked to their field width.
    pub const fn new(physical_id: u8, bus_id: u16) -> Self {
        Self(((bus_id & BUS_ID_MASK) << 6) | (physical_id as u16 & PHY_ID_MASK))
    }

    /// Node id of `physical_id` on the local bus.
    pub const fn local(physical_id: u8) -> Self {
        Self::new(physical_id, LOCAL_BUS)
    }

    /// Broadcast address on `bus_id`; also the "role not present" value.
    pub const fn broadcast(bus_id: u16) -> Self {
        Self::new(BROADCAST, bus_id)
    }

    /// Raw 16-bit value.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Physical id (low 6 bits).
    #[allow(clippy::cast_possible_truncation)]
    pub const fn physical_id(self) -> u8 {
        (self.0 & PHY_ID_MASK) as u8
    }

    /// Bus id (high 10 bits).
    pub const fn bus_id(self) -> u16 {
        self.0 >> 6
    }

    /// Split into `(physical_id, bus_id)`.
    pub const fn decode(self) -> (u8, u16) {
        (self.physical_id(), self.bus_id())
    }

    /// Same node, addressed on another bus.
    pub const fn with_bus(self, bus_id: u16) -> Self {
        Self::new(self.physical_id(), bus_id)
    }

    /// `true` if the bus id is [`LOCAL_BUS`].
    pub const fn is_local_bus(self) -> bool {
        self.bus_id() == LOCAL_BUS
    }

    /// `true` if the physical id is [`BROADCAST`].
    pub const fn is_broadcast(self) -> bool {
        self.physical_id() == BROADCAST
    }
}

impl From<u16> for NodeId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<NodeId> for u16 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local_bus() {
            f.write_str("local:")?;
        } else {
            write!(f, "{}:", self.bus_id())?;
        }
        if self.is_broadcast() {
            f.write_str("broadcast")
        } else {
            write!(f, "{}", self.physical_id())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_layout() {
        assert_eq!(NodeId::new(5, LOCAL_BUS).raw(), 0xffc5);
        assert_eq!(NodeId::new(0, 0).raw(), 0);
        assert_eq!(NodeId::broadcast(0).raw(), 0x3f);
    }

    #[test]
    fn test_masks_oversized_fields() {
        let id = NodeId::new(0xff, 0xffff);
        assert_eq!(id.physical_id(), 0x3f);
        assert_eq!(id.bus_id(), 0x3ff);
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeId::local(5).to_string(), "local:5");
        assert_eq!(NodeId::new(BROADCAST, 7).to_string(), "7:broadcast");
        assert_eq!(NodeId::broadcast(LOCAL_BUS).to_string(), "local:broadcast");
        assert_eq!(NodeId::new(12, 3).to_string(), "3:12");
    }

    #[test]
    fn test_helpers() {
        assert!(NodeId::local(0).is_local_bus());
        assert!(!NodeId::new(0, 4).is_local_bus());
        assert!(NodeId::broadcast(4).is_broadcast());
        assert!(!NodeId::local(62).is_broadcast());
        assert_eq!(NodeId::new(9, 4).with_bus(LOCAL_BUS), NodeId::local(9));
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(physical_id in 0u8..=63, bus_id in 0u16..=1023) {
            let id = NodeId::new(physical_id, bus_id);
            prop_assert_eq!(id.decode(), (physical_id, bus_id));
            prop_assert_eq!(NodeId::from(u16::from(id)), id);
        }
    }
}
