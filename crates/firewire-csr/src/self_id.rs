//! Self-ID packets (IEEE 1394a §4.3.4.1).
//!
//! Every node sends packet #0 after a bus reset, followed by continuation
//! packets #1..#3 when it has more than three ports.
//!
//! ```text
//! #0   10 phy_id(6) 0 L gap_cnt(6) sp(2) del(2) c pwr(3) p0 p1 p2 i m
//! #n   10 phy_id(6) 1 n(3) rsv(2) pa pb pc pd pe pf pg ph r m
//! ```

use bitfield_struct::bitfield;

/// Value of the two marker bits of every self-ID quadlet.
pub const SELF_ID_MARKER: u8 = 0b10;

/// Ports described by packet #0.
pub const PORTS_IN_FIRST_PACKET: usize = 3;

/// Ports described by each continuation packet.
pub const PORTS_PER_CONTINUATION: usize = 8;

/// Continuation packets that carry port states (sequence numbers 0..=2).
pub const DECODED_CONTINUATIONS: u8 = 3;

/// Largest number of ports a node can describe.
pub const MAX_PORTS: usize =
    PORTS_IN_FIRST_PACKET + PORTS_PER_CONTINUATION * DECODED_CONTINUATIONS as usize;

/// Self-ID packet #0.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SelfIdPacket0 {
    /// Another packet from this node follows.
    pub more: bool,
    /// This node initiated the bus reset.
    pub initiated_reset: bool,
    /// Port 2 state.
    #[bits(2)]
    pub p2: u8,
    /// Port 1 state.
    #[bits(2)]
    pub p1: u8,
    /// Port 0 state.
    #[bits(2)]
    pub p0: u8,
    /// Power class code.
    #[bits(3)]
    pub power_class: u8,
    /// Bus manager / IRM contender.
    pub contender: bool,
    /// Worst-case repeater delay.
    #[bits(2)]
    pub delay: u8,
    /// PHY speed code.
    #[bits(2)]
    pub speed: u8,
    /// Gap count.
    #[bits(6)]
    pub gap_count: u8,
    /// Link layer active.
    pub link_active: bool,
    /// Set on continuation packets, clear on packet #0.
    pub extended: bool,
    /// Physical id of the sender.
    #[bits(6)]
    pub phy_id: u8,
    /// Always [`SELF_ID_MARKER`].
    #[bits(2)]
    pub marker: u8,
}

impl SelfIdPacket0 {
    /// Port states for ports 0..=2.
    pub fn ports(&self) -> [PortState; PORTS_IN_FIRST_PACKET] {
        [
            PortState::from_bits(self.p0()),
            PortState::from_bits(self.p1()),
            PortState::from_bits(self.p2()),
        ]
    }
}

/// Self-ID continuation packet (#1..#3).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SelfIdContinuation {
    /// Another packet from this node follows.
    pub more: bool,
    #[bits(1)]
    _reserved0: u8,
    /// Eight 2-bit port states, `pa` in the most significant position.
    #[bits(16)]
    pub port_bits: u16,
    #[bits(2)]
    _reserved1: u8,
    /// Packet sequence number `n` (0 for packet #1).
    #[bits(3)]
    pub sequence: u8,
    /// Always set on continuation packets.
    pub extended: bool,
    /// Physical id of the sender.
    #[bits(6)]
    pub phy_id: u8,
    /// Always [`SELF_ID_MARKER`].
    #[bits(2)]
    pub marker: u8,
}

impl SelfIdContinuation {
    /// Port states carried by this packet, in port order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn ports(&self) -> [PortState; PORTS_PER_CONTINUATION] {
        let bits = self.port_bits();
        std::array::from_fn(|i| PortState::from_bits((bits >> (14 - 2 * i)) as u8))
    }

    /// Index of the first port this packet describes.
    pub const fn first_port(&self) -> usize {
        PORTS_IN_FIRST_PACKET + PORTS_PER_CONTINUATION * self.sequence() as usize
    }

    /// Pack port states into the 16-bit field, `ports[0]` as `pa`.
    pub fn pack_ports(ports: [PortState; PORTS_PER_CONTINUATION]) -> u16 {
        ports
            .iter()
            .enumerate()
            .fold(0u16, |acc, (i, port)| acc | (u16::from(*port as u8) << (14 - 2 * i)))
    }
}

/// State of one PHY port as reported in a self-ID packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PortState {
    /// Port not implemented.
    #[default]
    NotPresent = 0,
    /// Port implemented but not connected.
    NotConnected = 1,
    /// Connected to the parent node.
    Parent = 2,
    /// Connected to a child node.
    Child = 3,
}

impl PortState {
    /// Decode a 2-bit port code.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::NotPresent,
            1 => Self::NotConnected,
            2 => Self::Parent,
            _ => Self::Child,
        }
    }

    /// `true` for parent/child connections.
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Parent | Self::Child)
    }
}
