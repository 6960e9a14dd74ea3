//! Configuration ROM directory entries (IEEE 1212).
//!
//! Each entry is one quadlet: `key_type(2) key_value(6) value(24)`. For
//! `Leaf` and `Directory` entries `value` is an offset in quadlets, relative
//! to the address of the entry itself.

use bitfield_struct::bitfield;

/// One directory entry quadlet.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Immediate value, or offset in quadlets.
    #[bits(24)]
    pub value: u32,
    /// Semantic tag, see [`keys`].
    #[bits(6)]
    pub key_value: u8,
    /// Raw key type, see [`KeyType`].
    #[bits(2)]
    pub key_type_bits: u8,
}

impl DirectoryEntry {
    /// Build an entry.
    pub fn with_key(key_type: KeyType, key_value: u8, value: u32) -> Self {
        Self::new()
            .with_key_type_bits(key_type as u8)
            .with_key_value(key_value)
            .with_value(value & 0x00ff_ffff)
    }

    /// Key type.
    pub const fn key_type(&self) -> KeyType {
        KeyType::from_bits(self.key_type_bits())
    }

    /// `true` if the entry has this type and tag.
    pub const fn is(&self, key_type: KeyType, key_value: u8) -> bool {
        self.key_type_bits() == key_type as u8 && self.key_value() == key_value
    }

    /// Absolute CSR offset of the leaf/directory this entry points at.
    pub const fn target(&self, entry_offset: u64) -> u64 {
        entry_offset + self.value() as u64 * 4
    }
}

/// How the 24-bit value of an entry is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Value is the datum.
    Immediate = 0,
    /// Value is an offset into initial register space.
    Offset = 1,
    /// Value points at a leaf.
    Leaf = 2,
    /// Value points at a sub-directory.
    Directory = 3,
}

impl KeyType {
    /// Decode the 2-bit key type.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::Immediate,
            1 => Self::Offset,
            2 => Self::Leaf,
            _ => Self::Directory,
        }
    }
}

/// Key values used by the bus management layer.
pub mod keys {
    /// Textual descriptor (leaf).
    pub const TEXTUAL: u8 = 0x01;
    /// Module vendor id (IEEE 1394 root directory).
    pub const VENDOR_ID: u8 = 0x03;
    /// Node vendor id (IEEE 1212-1991 root directory).
    pub const NODE_VENDOR_ID: u8 = 0x08;
    /// Node capabilities.
    pub const NODE_CAPABILITIES: u8 = 0x0C;
    /// Unit directory.
    pub const UNIT: u8 = 0x11;
    /// Model id.
    pub const MODEL_ID: u8 = 0x17;
    /// Keyword leaf.
    pub const KEYWORD: u8 = 0x19;
}

/// Leaf/directory header quadlet: `length(16) crc(16)`.
pub mod block_header {
    /// Number of quadlets following the header.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn length(value: u32) -> u16 {
        (value >> 16) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_vendor_entries() {
        let entry = DirectoryEntry::from_bits(0x03ab_cdef);
        assert_eq!(entry.key_type(), KeyType::Immediate);
        assert!(entry.is(KeyType::Immediate, keys::VENDOR_ID));
        assert_eq!(entry.value(), 0x00ab_cdef);

        let entry = DirectoryEntry::from_bits(0x08ab_cdef);
        assert!(entry.is(KeyType::Immediate, keys::NODE_VENDOR_ID));
    }

    #[test]
    fn test_leaf_target() {
        let entry = DirectoryEntry::with_key(KeyType::Leaf, keys::TEXTUAL, 3);
        assert_eq!(entry.into_bits(), 0x8100_0003);
        assert_eq!(entry.target(0x41c), 0x428);
    }

    #[test]
    fn test_keyword_entry_encoding() {
        let entry = DirectoryEntry::with_key(KeyType::Leaf, keys::KEYWORD, 1);
        assert_eq!(entry.into_bits() >> 24, 0x99);
        assert_eq!(block_header::length(0x0004_1234), 4);
    }
}
