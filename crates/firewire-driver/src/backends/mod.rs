//! Bus backend implementations
//!
//! Only one backend ships with the crate:
//! - **Simulated**: an in-memory bus with per-node CSR spaces and fault
//!   injection. Used for CI, tests and the demo; no hardware required.
//!
//! Real host adapters (OHCI on Linux/Windows) live in separate driver
//! crates and implement [`BusBackend`](crate::BusBackend) directly.

pub mod simulated;

pub use simulated::{self_id, GeneralRom, SimulatedBus, SimulatedNode};
