//! Isochronous request and channel model
//!
//! Requests describe a transfer (six variants, see [`RequestKind`]); a
//! [`Channel`] owns queued requests until they finish. Only the contract
//! lives here. Data movement belongs to the channel backend, and the only
//! backend shipped is the in-memory [`LoopbackChannel`].

pub mod channel;
pub mod loopback;
pub mod request;

pub use channel::{Channel, ChannelBackend, ClosedChannel, MAX_TIMEOUT_US};
pub use loopback::LoopbackChannel;
pub use request::{
    AnyRequest, FixedPayloadBody, IsochRequest, ReadBody, ReadFixedData, ReadFixedDataRequest,
    ReadFixedPackets, ReadFixedPacketsRequest, ReadPackets, ReadPacketsRequest, Request,
    RequestBody, RequestKind, RequestOptions, RequestStatus, WriteBody, WriteData,
    WriteDataRequest, WriteFixedPackets, WriteFixedPacketsRequest, WritePackets,
    WritePacketsRequest,
};
