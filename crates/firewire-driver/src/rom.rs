//! Configuration ROM reader
//!
//! Interprets a node's configuration ROM through raw CSR reads: the
//! bus-info block (magic, bus options, EUI-64) and the root directory with
//! its textual and keyword leaves.
//!
//! Two flavours of query exist:
//! - **Best-effort** ([`ConfigRom::compliance`], [`ConfigRom::capabilities`])
//!   never fail and fall back to a conservative default.
//! - **Authoritative** (everything else) return the error to the caller.

use firewire_csr::directory::{block_header, keys};
use firewire_csr::{
    csr, BusOptions, Capabilities, DirectoryEntry, KeyType, NodeId, RomHeader, Speed, Standard,
    QUADLET_SIZE,
};
use tracing::debug;

use crate::backend::{read_block, read_quadlet, BusBackend};
use crate::error::{BusError, Result};

/// End of the configuration ROM window
const ROM_END: u64 = csr::CONFIGURATION_ROM + csr::CONFIGURATION_ROM_SIZE;

/// Configuration ROM of one node
#[derive(Debug, Clone, Copy)]
pub struct ConfigRom<'a> {
    backend: &'a dyn BusBackend,
    node: NodeId,
}

impl<'a> ConfigRom<'a> {
    /// Reader for `node`'s ROM
    pub fn new(backend: &'a dyn BusBackend, node: NodeId) -> Self {
        Self { backend, node }
    }

    /// Node this reader targets
    pub const fn node(&self) -> NodeId {
        self.node
    }

    fn quadlet(&self, offset: u64) -> Result<u32> {
        read_quadlet(self.backend, self.node, offset)
    }

    fn header(&self) -> Result<RomHeader> {
        self.quadlet(csr::CONFIGURATION_ROM).map(RomHeader::from_bits)
    }

    /// Fails with `NoGeneralConfigurationRom` unless the ROM carries a full
    /// bus-info block with the "1394" magic
    fn require_general(&self) -> Result<()> {
        let header = self.header()?;
        if header.is_minimal() || !header.has_bus_info_block() {
            return Err(BusError::NoGeneralConfigurationRom { node: self.node });
        }
        if self.quadlet(csr::BUS_INFO_NAME)? != csr::BUS_INFO_MAGIC {
            return Err(BusError::NoGeneralConfigurationRom { node: self.node });
        }
        Ok(())
    }

    /// Bus options quadlet of a general format ROM
    ///
    /// # Errors
    ///
    /// `NoGeneralConfigurationRom` for minimal or foreign ROMs, or the read
    /// failure.
    pub fn bus_options(&self) -> Result<BusOptions> {
        self.require_general()?;
        self.quadlet(csr::BUS_INFO_FLAGS).map(BusOptions::from_bits)
    }

    /// Standard the node complies with
    ///
    /// Never fails: any read failure or format mismatch reports plain
    /// IEEE 1394.
    pub fn compliance(&self) -> Standard {
        let probe = || -> Result<Standard> {
            if self.header()?.is_minimal() {
                return Ok(Standard::Ieee1394);
            }
            let options = self.bus_options()?;
            Ok(if options.generation() == 0 {
                Standard::Ieee1394
            } else {
                Standard::Ieee1394a
            })
        };
        probe().unwrap_or_else(|e| {
            debug!("Compliance of {} defaulted to IEEE 1394: {e}", self.node);
            Standard::Ieee1394
        })
    }

    /// EUI-64 of the node
    ///
    /// # Errors
    ///
    /// `NoGeneralConfigurationRom` for minimal or foreign ROMs, or the read
    /// failure.
    pub fn identifier(&self) -> Result<u64> {
        self.require_general()?;
        let hi = self.quadlet(csr::GUID_HI)?;
        let lo = self.quadlet(csr::GUID_LO)?;
        Ok((u64::from(hi) << 32) | u64::from(lo))
    }

    /// Largest asynchronous payload the node accepts, in bytes
    ///
    /// # Errors
    ///
    /// Same as [`bus_options`](Self::bus_options).
    pub fn maximum_payload(&self) -> Result<u32> {
        Ok(self.bus_options()?.max_payload_bytes())
    }

    /// Capability bits, empty on any failure
    pub fn capabilities(&self) -> Capabilities {
        self.try_capabilities().unwrap_or_else(|e| {
            debug!("Capabilities of {} unavailable: {e}", self.node);
            Capabilities::empty()
        })
    }

    /// Capability bits, surfacing read failures
    ///
    /// A minimal or foreign ROM is not an error here: such nodes simply have
    /// no capabilities.
    ///
    /// # Errors
    ///
    /// Returns the backend failure.
    pub fn try_capabilities(&self) -> Result<Capabilities> {
        match self.bus_options() {
            Ok(options) => Ok(options.capabilities()),
            Err(BusError::NoGeneralConfigurationRom { .. }) => Ok(Capabilities::empty()),
            Err(e) => Err(e),
        }
    }

    /// Link speed advertised in the bus options, `None` for unknown codes
    ///
    /// # Errors
    ///
    /// Same as [`bus_options`](Self::bus_options).
    pub fn link_speed(&self) -> Result<Option<Speed>> {
        Ok(self.bus_options()?.link_speed())
    }

    /// 24-bit vendor id
    ///
    /// A minimal ROM is answered from its first quadlet without touching the
    /// root directory.
    ///
    /// # Errors
    ///
    /// `InvalidConfigurationRom` if the ROM is malformed or the root
    /// directory has no vendor entry; read failures are passed through.
    pub fn vendor_id(&self) -> Result<u32> {
        let header = self.header()?;
        if header.is_minimal() {
            return Ok(header.minimal_vendor_id());
        }

        self.require_general().map_err(|e| match e {
            BusError::NoGeneralConfigurationRom { node } => {
                BusError::invalid_rom(node, "no bus-info block")
            }
            other => other,
        })?;

        self.root_directory()?
            .into_iter()
            .map(|(_, entry)| entry)
            .find(|entry| {
                entry.is(KeyType::Immediate, keys::VENDOR_ID)
                    || entry.is(KeyType::Immediate, keys::NODE_VENDOR_ID)
            })
            .map(|entry| entry.value())
            .ok_or_else(|| BusError::invalid_rom(self.node, "root directory has no vendor id"))
    }

    /// Model id from the root directory, if present
    ///
    /// # Errors
    ///
    /// Read failures and malformed directories.
    pub fn model_id(&self) -> Result<Option<u32>> {
        if self.header()?.is_minimal() {
            return Ok(None);
        }
        self.require_general()?;
        Ok(self
            .root_directory()?
            .into_iter()
            .find(|(_, entry)| entry.is(KeyType::Immediate, keys::MODEL_ID))
            .map(|(_, entry)| entry.value()))
    }

    /// Text of the first textual descriptor leaf in the root directory
    ///
    /// Leaves using a non-default character set are skipped.
    ///
    /// # Errors
    ///
    /// `NoGeneralConfigurationRom`, malformed directories or leaves, and read
    /// failures.
    pub fn description(&self) -> Result<Option<String>> {
        self.require_general()?;
        for (offset, entry) in self.root_directory()? {
            if !entry.is(KeyType::Leaf, keys::TEXTUAL) {
                continue;
            }
            let leaf = self.leaf(entry.target(offset))?;
            match leaf.as_slice() {
                [0, 0, text @ ..] => return Ok(Some(decode_text(text))),
                _ => debug!("Skipping textual leaf at {offset:#x} on {}", self.node),
            }
        }
        Ok(None)
    }

    /// Keywords from the root directory, space separated
    ///
    /// # Errors
    ///
    /// Same as [`description`](Self::description).
    pub fn keywords(&self) -> Result<Option<String>> {
        self.require_general()?;
        for (offset, entry) in self.root_directory()? {
            if entry.is(KeyType::Leaf, keys::KEYWORD) {
                let leaf = self.leaf(entry.target(offset))?;
                return Ok(Some(decode_keywords(&leaf)));
            }
        }
        Ok(None)
    }

    /// Root directory entries with their CSR offsets
    fn root_directory(&self) -> Result<Vec<(u64, DirectoryEntry)>> {
        let count = usize::from(block_header::length(self.quadlet(csr::ROOT_DIRECTORY)?));
        let first = csr::ROOT_DIRECTORY + QUADLET_SIZE as u64;
        if first + (count * QUADLET_SIZE) as u64 > ROM_END {
            return Err(BusError::invalid_rom(
                self.node,
                format!("root directory of {count} entries overruns the ROM"),
            ));
        }
        let entries = read_block(self.backend, self.node, first, count)?;
        debug!("Root directory of {}: {count} entries", self.node);
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                (
                    first + (i * QUADLET_SIZE) as u64,
                    DirectoryEntry::from_bits(raw),
                )
            })
            .collect())
    }

    /// Data quadlets of the leaf at `offset`
    fn leaf(&self, offset: u64) -> Result<Vec<u32>> {
        if offset >= ROM_END {
            return Err(BusError::invalid_rom(
                self.node,
                format!("leaf at {offset:#x} lies outside the ROM"),
            ));
        }
        let length = usize::from(block_header::length(self.quadlet(offset)?));
        let first = offset + QUADLET_SIZE as u64;
        if first + (length * QUADLET_SIZE) as u64 > ROM_END {
            return Err(BusError::invalid_rom(
                self.node,
                format!("leaf at {offset:#x} of {length} quadlets overruns the ROM"),
            ));
        }
        read_block(self.backend, self.node, first, length)
    }
}

fn leaf_bytes(quadlets: &[u32]) -> Vec<u8> {
    quadlets.iter().flat_map(|q| q.to_be_bytes()).collect()
}

/// Text up to the first NUL
fn decode_text(quadlets: &[u32]) -> String {
    let bytes = leaf_bytes(quadlets);
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// NUL separated tokens joined with spaces
fn decode_keywords(quadlets: &[u32]) -> String {
    leaf_bytes(quadlets)
        .split(|b| *b == 0)
        .filter(|word| !word.is_empty())
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{GeneralRom, SimulatedBus, SimulatedNode};

    fn bus_with(node: SimulatedNode) -> SimulatedBus {
        let mut bus = SimulatedBus::new();
        bus.add_node(node);
        bus.open().unwrap();
        bus
    }

    fn options(max_rec: u8) -> BusOptions {
        BusOptions::new()
            .with_irmc(true)
            .with_isc(true)
            .with_max_rec(max_rec)
            .with_link_spd(Speed::S400.code())
    }

    #[test]
    fn test_minimal_rom_vendor_without_directory_walk() {
        let bus = bus_with(SimulatedNode::new().with_minimal_rom(0x001234));
        bus.clear_reads();

        let rom = ConfigRom::new(&bus, NodeId::local(0));
        assert_eq!(rom.vendor_id().unwrap(), 0x001234);
        assert_eq!(bus.reads(0), vec![csr::CONFIGURATION_ROM]);
    }

    #[test]
    fn test_minimal_rom_has_no_identifier() {
        let bus = bus_with(SimulatedNode::new().with_minimal_rom(0x001234));
        let rom = ConfigRom::new(&bus, NodeId::local(0));
        assert_eq!(
            rom.identifier(),
            Err(BusError::NoGeneralConfigurationRom {
                node: NodeId::local(0)
            })
        );
        assert_eq!(rom.compliance(), Standard::Ieee1394);
        assert!(rom.capabilities().is_empty());
        assert_eq!(rom.model_id().unwrap(), None);
    }

    #[test]
    fn test_node_vendor_id_key() {
        let mut general = GeneralRom::new(1, 0x00ab_cdef, options(0));
        general.vendor_key = keys::NODE_VENDOR_ID;
        assert_eq!(general.layout()[6], 0x08ab_cdef);

        let bus = bus_with(SimulatedNode::new().with_general_rom(&general));
        let rom = ConfigRom::new(&bus, NodeId::local(0));
        assert_eq!(rom.vendor_id().unwrap(), 0x00ab_cdef);
    }

    #[test]
    fn test_identifier_and_capabilities() {
        let general = GeneralRom::new(0x0800_2800_0102_0304, 0x000a27, options(0));
        let bus = bus_with(SimulatedNode::new().with_general_rom(&general));
        let rom = ConfigRom::new(&bus, NodeId::local(0));

        assert_eq!(rom.identifier().unwrap(), 0x0800_2800_0102_0304);
        assert_eq!(rom.capabilities(), Capabilities::IRMC | Capabilities::ISC);
        assert_eq!(rom.link_speed().unwrap(), Some(Speed::S400));
        assert_eq!(rom.compliance(), Standard::Ieee1394);
    }

    #[test]
    fn test_maximum_payload() {
        for (max_rec, bytes) in [(0, 8), (5, 256), (9, 4096)] {
            let general = GeneralRom::new(1, 1, options(max_rec));
            let bus = bus_with(SimulatedNode::new().with_general_rom(&general));
            let rom = ConfigRom::new(&bus, NodeId::local(0));
            assert_eq!(rom.maximum_payload().unwrap(), bytes, "max_rec {max_rec}");
        }
    }

    #[test]
    fn test_compliance_generation() {
        let general = GeneralRom::new(1, 1, options(0).with_generation(2));
        let bus = bus_with(SimulatedNode::new().with_general_rom(&general));
        assert_eq!(
            ConfigRom::new(&bus, NodeId::local(0)).compliance(),
            Standard::Ieee1394a
        );
        // absent node
        assert_eq!(
            ConfigRom::new(&bus, NodeId::local(5)).compliance(),
            Standard::Ieee1394
        );
    }

    #[test]
    fn test_foreign_magic() {
        let general = GeneralRom::new(1, 1, options(0));
        let node = SimulatedNode::new()
            .with_general_rom(&general)
            .with_quadlet(csr::BUS_INFO_NAME, 0x3133_3935);
        let bus = bus_with(node);
        let rom = ConfigRom::new(&bus, NodeId::local(0));

        assert!(matches!(
            rom.identifier(),
            Err(BusError::NoGeneralConfigurationRom { .. })
        ));
        assert!(matches!(
            rom.vendor_id(),
            Err(BusError::InvalidConfigurationRom { .. })
        ));
        assert_eq!(rom.try_capabilities().unwrap(), Capabilities::empty());
    }

    #[test]
    fn test_capabilities_swallow_failures() {
        let bus = bus_with(SimulatedNode::new());
        let absent = ConfigRom::new(&bus, NodeId::local(9));
        assert!(absent.capabilities().is_empty());
        assert!(absent.try_capabilities().unwrap_err().is_bus_access());
    }

    #[test]
    fn test_missing_vendor_entry() {
        let general = GeneralRom::new(1, 1, options(0));
        // Shrink the root directory to zero entries
        let node = SimulatedNode::new()
            .with_general_rom(&general)
            .with_quadlet(csr::ROOT_DIRECTORY, 0);
        let bus = bus_with(node);
        let err = ConfigRom::new(&bus, NodeId::local(0)).vendor_id().unwrap_err();
        assert!(matches!(err, BusError::InvalidConfigurationRom { .. }));
    }

    #[test]
    fn test_directory_overrun() {
        let general = GeneralRom::new(1, 1, options(0));
        let node = SimulatedNode::new()
            .with_general_rom(&general)
            .with_quadlet(csr::ROOT_DIRECTORY, 0x0400 << 16);
        let bus = bus_with(node);
        let err = ConfigRom::new(&bus, NodeId::local(0)).vendor_id().unwrap_err();
        assert!(matches!(err, BusError::InvalidConfigurationRom { .. }));
    }

    #[test]
    fn test_description_and_keywords() {
        let unit = DirectoryEntry::with_key(KeyType::Directory, keys::UNIT, 3).into_bits();
        let general = GeneralRom::new(1, 0x00d04b, options(0))
            .with_entry(unit)
            .with_model_id(0x0100_08)
            .with_description("Studio Interface")
            .with_keywords(["audio", "midi"]);
        let bus = bus_with(SimulatedNode::new().with_general_rom(&general));
        let rom = ConfigRom::new(&bus, NodeId::local(0));

        assert_eq!(rom.vendor_id().unwrap(), 0x00d04b);
        assert_eq!(rom.model_id().unwrap(), Some(0x0100_08));
        assert_eq!(rom.description().unwrap().as_deref(), Some("Studio Interface"));
        assert_eq!(rom.keywords().unwrap().as_deref(), Some("audio midi"));
    }

    #[test]
    fn test_description_absent() {
        let general = GeneralRom::new(1, 1, options(0));
        let bus = bus_with(SimulatedNode::new().with_general_rom(&general));
        let rom = ConfigRom::new(&bus, NodeId::local(0));
        assert_eq!(rom.description().unwrap(), None);
        assert_eq!(rom.keywords().unwrap(), None);
    }

    #[test]
    fn test_textual_leaf_with_charset_is_skipped() {
        let general = GeneralRom::new(1, 1, options(0)).with_description("x");
        let layout = general.layout();
        // vendor entry, leaf entry, leaf header, descriptor type, charset
        let charset = csr::CONFIGURATION_ROM + (6 + 2 + 2) as u64 * 4;
        assert_eq!(layout[6 + 2 + 2], 0);
        let node = SimulatedNode::new()
            .with_general_rom(&general)
            .with_quadlet(charset, 0x0000_0409);
        let bus = bus_with(node);
        assert_eq!(
            ConfigRom::new(&bus, NodeId::local(0)).description().unwrap(),
            None
        );
    }

    #[test]
    fn test_bulk_rejection_falls_back() {
        let general = GeneralRom::new(1, 1, options(0)).with_description("fallback");
        let bus = bus_with(SimulatedNode::new().with_general_rom(&general));
        bus.reject_block_reads(true);
        let rom = ConfigRom::new(&bus, NodeId::local(0));
        assert_eq!(rom.description().unwrap().as_deref(), Some("fallback"));
    }
}
