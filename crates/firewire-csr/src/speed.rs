//! Bus speed codes.

use std::fmt;

/// Transfer speed between two nodes.
///
/// Ordered from slowest to fastest so `min`/`max` pick the limiting speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Speed {
    /// 98.304 Mbit/s.
    #[default]
    S100,
    /// 196.608 Mbit/s.
    S200,
    /// 393.216 Mbit/s.
    S400,
    /// 786.432 Mbit/s (1394b).
    S800,
    /// 1572.864 Mbit/s (1394b).
    S1600,
    /// 3145.728 Mbit/s (1394b).
    S3200,
}

impl Speed {
    /// All speeds, slowest first.
    pub const ALL: [Self; 6] = [
        Self::S100,
        Self::S200,
        Self::S400,
        Self::S800,
        Self::S1600,
        Self::S3200,
    ];

    /// Decode a link/PHY speed code (`0` = S100 ... `5` = S3200).
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::S100),
            1 => Some(Self::S200),
            2 => Some(Self::S400),
            3 => Some(Self::S800),
            4 => Some(Self::S1600),
            5 => Some(Self::S3200),
            _ => None,
        }
    }

    /// Decode a speed map byte. Only the 1394a codes are defined there;
    /// anything else is treated as S100.
    pub const fn from_speed_map_byte(byte: u8) -> Self {
        match byte {
            1 => Self::S200,
            2 => Self::S400,
            _ => Self::S100,
        }
    }

    /// Speed for a nominal Mbit/s figure (`100`, `200`, ... `3200`).
    pub const fn from_mbps(mbps: u32) -> Option<Self> {
        match mbps {
            100 => Some(Self::S100),
            200 => Some(Self::S200),
            400 => Some(Self::S400),
            800 => Some(Self::S800),
            1600 => Some(Self::S1600),
            3200 => Some(Self::S3200),
            _ => None,
        }
    }

    /// Wire code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Nominal Mbit/s figure.
    pub const fn mbps(self) -> u32 {
        100 << (self as u32)
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.mbps())
    }
}
