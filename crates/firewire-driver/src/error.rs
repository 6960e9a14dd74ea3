//! Error types for bus management operations

use firewire_csr::NodeId;
use thiserror::Error;

/// Result type alias for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur while managing the bus or isochronous requests
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Object is not in a state that allows the operation
    #[error("Not ready: {reason}")]
    NotReady {
        /// What was not ready
        reason: String,
    },

    /// `reset()` was called on a request that is still queued
    #[error("Request is pending")]
    NotPending,

    /// Argument outside its protocol domain
    #[error("{what} out of range: {value}")]
    OutOfRange {
        /// Name of the offending parameter
        what: &'static str,
        /// Value that was rejected
        value: u64,
    },

    /// Node has only a minimal configuration ROM (or none at all)
    #[error("Node {node} has no general configuration ROM")]
    NoGeneralConfigurationRom {
        /// Node that was queried
        node: NodeId,
    },

    /// Configuration ROM is malformed or lacks a mandatory entry
    #[error("Invalid configuration ROM on node {node}: {reason}")]
    InvalidConfigurationRom {
        /// Node that was queried
        node: NodeId,
        /// What was wrong
        reason: String,
    },

    /// Topology map is malformed, or changed while it was read
    #[error("Invalid topology map: {reason}")]
    InvalidTopologyMap {
        /// What was wrong
        reason: String,
    },

    /// Speed map is malformed, or changed while it was read
    #[error("Invalid speed map: {reason}")]
    InvalidSpeedMap {
        /// What was wrong
        reason: String,
    },

    /// Channel is closed or was never opened
    #[error("Channel closed")]
    ChannelClosed,

    /// Backend could not complete a register access
    #[error("Bus access to {node} at {address:#014x} failed: {reason}")]
    BusAccessFailure {
        /// Target node
        node: NodeId,
        /// CSR address of the access
        address: u64,
        /// Backend's description of the failure
        reason: String,
    },
}

impl BusError {
    /// Create a not ready error
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotReady {
            reason: reason.into(),
        }
    }

    /// Create an out of range error
    pub fn out_of_range(what: &'static str, value: impl Into<u64>) -> Self {
        Self::OutOfRange {
            what,
            value: value.into(),
        }
    }

    /// Create an invalid configuration ROM error
    pub fn invalid_rom(node: NodeId, reason: impl Into<String>) -> Self {
        Self::InvalidConfigurationRom {
            node,
            reason: reason.into(),
        }
    }

    /// Create an invalid topology map error
    pub fn invalid_topology(reason: impl Into<String>) -> Self {
        Self::InvalidTopologyMap {
            reason: reason.into(),
        }
    }

    /// Create an invalid speed map error
    pub fn invalid_speed_map(reason: impl Into<String>) -> Self {
        Self::InvalidSpeedMap {
            reason: reason.into(),
        }
    }

    /// Create a bus access failure
    pub fn bus_access(node: NodeId, address: u64, reason: impl Into<String>) -> Self {
        Self::BusAccessFailure {
            node,
            address,
            reason: reason.into(),
        }
    }

    /// `true` for failures caused by a backend access rather than by data
    pub const fn is_bus_access(&self) -> bool {
        matches!(self, Self::BusAccessFailure { .. })
    }
}
