//! CSR address map (IEEE 1212 / IEEE 1394 serial bus registers).
//!
//! Offsets are relative to [`CSR_BASE_ADDRESS`], the start of the
//! initial register space of every node. A full 64-bit bus address is
//! `(node_id << 48) | (CSR_BASE_ADDRESS + offset)`; backends receive the
//! node id separately, so only the 48-bit part is formed here.
//!
//! ```text
//! 0x0000  STATE_CLEAR ... BUS_MANAGER_ID   core + serial-bus registers
//! 0x0400  CONFIGURATION_ROM                1 KiB ROM (bus-info block first)
//! 0x1000  TOPOLOGY_MAP                     self-IDs of the last reset
//! 0x2000  SPEED_MAP                        64×64 packed speed codes
//! ```

/// Start of the CSR initial register space.
pub const CSR_BASE_ADDRESS: u64 = 0xFFFF_F000_0000;

/// Bus address of a CSR `offset`.
pub const fn address(offset: u64) -> u64 {
    CSR_BASE_ADDRESS + offset
}

// ── Core registers ───────────────────────────────────────────────────────────

/// State clear register.
pub const STATE_CLEAR: u64 = 0x000;
/// State set register.
pub const STATE_SET: u64 = 0x004;
/// Node ids register (`bus_id:offset_id` of the node).
pub const NODE_IDS: u64 = 0x008;
/// Reset start register.
pub const RESET_START: u64 = 0x00C;

// ── Serial-bus dependent registers ───────────────────────────────────────────

/// Cycle time register (cycle master / isochronous capable nodes).
pub const CYCLE_TIME: u64 = 0x200;
/// Bus time register.
pub const BUS_TIME: u64 = 0x204;
/// Bus manager id register (IRM only).
pub const BUS_MANAGER_ID: u64 = 0x21C;
/// Isochronous bandwidth remaining, in allocation units (IRM only).
pub const BANDWIDTH_AVAILABLE: u64 = 0x220;
/// Channels 0..=31 availability, channel 0 in the MSB (IRM only).
pub const CHANNELS_AVAILABLE_HI: u64 = 0x224;
/// Channels 32..=63 availability, channel 32 in the MSB (IRM only).
pub const CHANNELS_AVAILABLE_LO: u64 = 0x228;

// ── Configuration ROM ────────────────────────────────────────────────────────

/// First ROM quadlet: `info_length:crc_length:rom_crc`.
pub const CONFIGURATION_ROM: u64 = 0x400;
/// Bus name quadlet, [`BUS_INFO_MAGIC`] on 1394 nodes.
pub const BUS_INFO_NAME: u64 = 0x404;
/// Bus options quadlet (capabilities, generation, max_rec, link speed).
pub const BUS_INFO_FLAGS: u64 = 0x408;
/// EUI-64 high quadlet.
pub const GUID_HI: u64 = 0x40C;
/// EUI-64 low quadlet.
pub const GUID_LO: u64 = 0x410;
/// Root directory header quadlet (general format ROM).
pub const ROOT_DIRECTORY: u64 = 0x414;
/// Size of the configuration ROM window in bytes.
pub const CONFIGURATION_ROM_SIZE: u64 = 0x400;

/// ASCII "1394".
pub const BUS_INFO_MAGIC: u32 = 0x3133_3934;

/// Bus info block size in bytes (name, options, GUID hi/lo).
pub const BUS_INFO_BLOCK_SIZE: usize = 16;

// ── Maps ─────────────────────────────────────────────────────────────────────

/// Topology map: header, generation, `node_count:self_id_count`, self-IDs.
pub const TOPOLOGY_MAP: u64 = 0x1000;
/// Topology map generation quadlet.
pub const TOPOLOGY_MAP_GENERATION: u64 = TOPOLOGY_MAP + 4;
/// Topology map `node_count:self_id_count` quadlet.
pub const TOPOLOGY_MAP_COUNTS: u64 = TOPOLOGY_MAP + 8;
/// First self-ID quadlet.
pub const TOPOLOGY_MAP_SELF_IDS: u64 = TOPOLOGY_MAP + 12;
/// Largest self-ID count a topology map can hold (63 nodes × 9 quadlets).
pub const MAX_SELF_ID_COUNT: u16 = 567;

/// Speed map: header, generation, packed speed bytes.
pub const SPEED_MAP: u64 = 0x2000;
/// Speed map generation quadlet.
pub const SPEED_MAP_GENERATION: u64 = SPEED_MAP + 4;
/// First packed speed quadlet.
pub const SPEED_MAP_SPEEDS: u64 = SPEED_MAP + 8;
/// Fixed speed map length, in quadlets following the header.
#[allow(clippy::cast_possible_truncation)]
pub const SPEED_MAP_LENGTH: u16 = ((64 * 62 + 62 + 3) / 4 + 1) as u16;
/// Bytes of packed speed codes following the generation quadlet.
pub const SPEED_MAP_BYTES: usize = (SPEED_MAP_LENGTH as usize - 1) * 4;

// ── Register bit definitions ─────────────────────────────────────────────────

/// `STATE_CLEAR` / `STATE_SET` bits.
pub mod state_clear {
    /// Node is the active cycle master.
    pub const CMSTR: u32 = 1 << 8;
    /// Link is off.
    pub const LINKOFF: u32 = 1 << 9;
}

/// `NODE_IDS` register fields.
pub mod node_ids {
    /// Physical id the node currently answers to.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn physical_id(value: u32) -> u8 {
        ((value >> 16) & 0x3f) as u8
    }

    /// Bus id the node is configured for.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn bus_id(value: u32) -> u16 {
        (value >> 22) as u16
    }
}

/// `BUS_MANAGER_ID` register fields.
pub mod bus_manager_id {
    /// Physical id of the bus manager; `63` when none was elected.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn physical_id(value: u32) -> u8 {
        (value & 0x3f) as u8
    }
}

/// `BANDWIDTH_AVAILABLE` register fields.
pub mod bandwidth {
    /// Remaining allocation units (13 bits).
    pub const fn units(value: u32) -> u32 {
        value & 0x1fff
    }
}

/// Map header quadlet (`length:crc`), shared by topology and speed maps.
pub mod map_header {
    /// Number of quadlets following the header.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn length(value: u32) -> u16 {
        (value >> 16) as u16
    }

    /// Build a header quadlet.
    pub const fn new(length: u16, crc: u16) -> u32 {
        ((length as u32) << 16) | crc as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_map_length() {
        assert_eq!(SPEED_MAP_LENGTH, 1009);
        assert_eq!(SPEED_MAP_BYTES, 4032);
        // rows 0..=62, columns 0..=62 fit in the packed area
        assert!(64 * 62 + 63 <= SPEED_MAP_BYTES);
    }

    #[test]
    fn test_bus_info_magic_is_ascii() {
        assert_eq!(&BUS_INFO_MAGIC.to_be_bytes(), b"1394");
    }

    #[test]
    fn test_register_fields() {
        assert_eq!(node_ids::physical_id(0xffc5_0000), 5);
        assert_eq!(node_ids::bus_id(0xffc5_0000), 1023);
        assert_eq!(bus_manager_id::physical_id(0x3f), 63);
        assert_eq!(bandwidth::units(0xffff_ffff), 0x1fff);
        assert_eq!(map_header::length(map_header::new(1009, 0xbeef)), 1009);
        assert_eq!(address(CYCLE_TIME), 0xFFFF_F000_0200);
    }
}
