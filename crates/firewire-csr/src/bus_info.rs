//! Bus-info block: ROM header, bus options quadlet and node capabilities.
//!
//! ```text
//! 0x400  info_length(8) crc_length(8) rom_crc(16)
//! 0x404  "1394"
//! 0x408  irmc cmc isc bmc pmc ─ cyc_clk_acc(8) max_rec(4) ─ max_rom(2) gen(4) ─ link_spd(3)
//! 0x40C  EUI-64 high
//! 0x410  EUI-64 low
//! ```

use bitfield_struct::bitfield;
use std::fmt;
use std::ops::BitOr;

use crate::csr::BUS_INFO_BLOCK_SIZE;
use crate::speed::Speed;

/// First quadlet of the configuration ROM.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct RomHeader {
    /// CRC over the first `crc_length` quadlets.
    #[bits(16)]
    pub rom_crc: u16,
    /// Quadlets covered by the CRC.
    #[bits(8)]
    pub crc_length: u8,
    /// Quadlets in the bus-info block; `1` marks a minimal ROM.
    #[bits(8)]
    pub info_length: u8,
}

impl RomHeader {
    /// Minimal ROM: only a 24-bit vendor id follows the length byte.
    pub const fn is_minimal(&self) -> bool {
        self.info_length() == 1
    }

    /// Long enough to hold a full bus-info block.
    pub const fn has_bus_info_block(&self) -> bool {
        self.info_length() as usize * 4 >= BUS_INFO_BLOCK_SIZE
    }

    /// Vendor id carried by a minimal ROM (low 24 bits of the quadlet).
    pub const fn minimal_vendor_id(&self) -> u32 {
        self.into_bits() & 0x00ff_ffff
    }
}

/// Bus options quadlet (`BUS_INFO_FLAGS`).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct BusOptions {
    /// Link speed code (see [`Speed::from_code`]).
    #[bits(3)]
    pub link_spd: u8,
    #[bits(1)]
    _reserved0: u8,
    /// ROM generation; non-zero on 1394a nodes.
    #[bits(4)]
    pub generation: u8,
    /// Maximum ROM read size code.
    #[bits(2)]
    pub max_rom: u8,
    #[bits(2)]
    _reserved1: u8,
    /// Maximum asynchronous payload code.
    #[bits(4)]
    pub max_rec: u8,
    /// Cycle clock accuracy in ppm.
    #[bits(8)]
    pub cyc_clk_acc: u8,
    #[bits(3)]
    _reserved2: u8,
    /// Power manager capable.
    pub pmc: bool,
    /// Bus manager capable.
    pub bmc: bool,
    /// Isochronous capable.
    pub isc: bool,
    /// Cycle master capable.
    pub cmc: bool,
    /// Isochronous resource manager capable.
    pub irmc: bool,
}

impl BusOptions {
    /// Capability bits carried by this quadlet.
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        for (set, bit) in [
            (self.irmc(), Capabilities::IRMC),
            (self.cmc(), Capabilities::CMC),
            (self.isc(), Capabilities::ISC),
            (self.bmc(), Capabilities::BMC),
            (self.pmc(), Capabilities::PMC),
        ] {
            if set {
                caps = caps | bit;
            }
        }
        caps
    }

    /// Maximum asynchronous payload in bytes: `2^(max_rec+1)` quadlets.
    ///
    /// A zero code still allows the 2-quadlet minimum.
    pub fn max_payload_bytes(&self) -> u32 {
        let exponent = u32::from(self.max_rec()) + 1;
        (1u32 << exponent) * 4
    }

    /// Link speed, if the code is one we know.
    pub fn link_speed(&self) -> Option<Speed> {
        Speed::from_code(self.link_spd())
    }
}

/// Node capability bits from the bus options quadlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    /// Isochronous resource manager capable.
    pub const IRMC: Self = Self(1 << 0);
    /// Cycle master capable.
    pub const CMC: Self = Self(1 << 1);
    /// Isochronous capable.
    pub const ISC: Self = Self(1 << 2);
    /// Bus manager capable.
    pub const BMC: Self = Self(1 << 3);
    /// Power manager capable.
    pub const PMC: Self = Self(1 << 4);

    /// No capabilities.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bitmask.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// `true` if every bit in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `true` if no bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::IRMC, "irmc"),
            (Self::CMC, "cmc"),
            (Self::ISC, "isc"),
            (Self::BMC, "bmc"),
            (Self::PMC, "pmc"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// Standard a node complies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Standard {
    /// Unknown, or no node present.
    #[default]
    Unspecified,
    /// IEEE 1394-1995.
    Ieee1394,
    /// IEEE 1394a-2000.
    Ieee1394a,
    /// IEEE 1394b-2002.
    Ieee1394b,
}

impl fmt::Display for Standard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::Ieee1394 => write!(f, "IEEE 1394"),
            Self::Ieee1394a => write!(f, "IEEE 1394a"),
            Self::Ieee1394b => write!(f, "IEEE 1394b"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rom_header() {
        let minimal = RomHeader::from_bits(0x0100_1234);
        assert!(minimal.is_minimal());
        assert!(!minimal.has_bus_info_block());
        assert_eq!(minimal.minimal_vendor_id(), 0x001234);

        let general = RomHeader::new().with_info_length(4).with_crc_length(4);
        assert!(!general.is_minimal());
        assert!(general.has_bus_info_block());
        assert_eq!(general.into_bits(), 0x0404_0000);
    }

    #[test]
    fn test_bus_options_layout() {
        let opts = BusOptions::from_bits(0xe000_5022);
        assert!(opts.irmc());
        assert!(opts.cmc());
        assert!(opts.isc());
        assert!(!opts.bmc());
        assert!(!opts.pmc());
        assert_eq!(opts.max_rec(), 5);
        assert_eq!(opts.generation(), 2);
        assert_eq!(opts.link_spd(), 2);
        assert_eq!(opts.link_speed(), Some(Speed::S400));
    }

    #[test]
    fn test_max_payload() {
        assert_eq!(BusOptions::new().with_max_rec(0).max_payload_bytes(), 8);
        assert_eq!(BusOptions::new().with_max_rec(5).max_payload_bytes(), 256);
        assert_eq!(BusOptions::new().with_max_rec(8).max_payload_bytes(), 2048);
    }

    #[test]
    fn test_capabilities() {
        let caps = BusOptions::new().with_irmc(true).with_bmc(true).capabilities();
        assert!(caps.contains(Capabilities::IRMC));
        assert!(caps.contains(Capabilities::BMC));
        assert!(!caps.contains(Capabilities::CMC | Capabilities::ISC));
        assert_eq!(caps.to_string(), "irmc|bmc");
        assert_eq!(Capabilities::empty().to_string(), "none");
    }
}
