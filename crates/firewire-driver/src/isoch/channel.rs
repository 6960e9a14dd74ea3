//! Isochronous channel
//!
//! A [`Channel`] forwards to a pluggable [`ChannelBackend`]. A channel that
//! was never opened, or was closed, forwards to [`ClosedChannel`], which
//! fails every operation with `ChannelClosed`, so callers need no "is it
//! open" checks of their own.

use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, info};

use super::request::{
    AnyRequest, ReadFixedData, ReadFixedPackets, ReadPackets, Request, RequestBody, RequestKind,
    WriteData, WriteFixedPackets, WritePackets,
};
use crate::error::{BusError, Result};

/// Largest timeout accepted by `wait` and `dequeue`, in microseconds
pub const MAX_TIMEOUT_US: u32 = 999_999_999;

/// Validate a microsecond timeout
///
/// # Errors
///
/// `OutOfRange` above [`MAX_TIMEOUT_US`].
pub fn timeout(timeout_us: u32) -> Result<Duration> {
    if timeout_us > MAX_TIMEOUT_US {
        return Err(BusError::out_of_range("timeout", timeout_us));
    }
    Ok(Duration::from_micros(u64::from(timeout_us)))
}

/// Live channel implementation
pub trait ChannelBackend: Debug + Send + Sync {
    /// Reserved subchannel mask, subchannel `n` in bit `n`
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed.
    fn subchannels(&self) -> Result<u64>;

    /// Fail every pending request with `Error`
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed.
    fn cancel(&self) -> Result<()>;

    /// Approve creation of a request of `kind`
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed, or a backend-specific refusal.
    fn prepare_request(&self, kind: RequestKind) -> Result<()>;

    /// Take ownership of a `Ready` request and mark it `Pending`
    ///
    /// # Errors
    ///
    /// `ChannelClosed`, `OutOfRange` for an unreserved subchannel, or
    /// `NotReady` if the request is not `Ready`.
    fn queue(&self, request: AnyRequest) -> Result<()>;

    /// Wait up to `timeout_us` for `count` finished requests and return up
    /// to `count` of them
    ///
    /// # Errors
    ///
    /// `ChannelClosed`, or `OutOfRange` for a timeout above
    /// [`MAX_TIMEOUT_US`].
    fn dequeue(&self, count: usize, timeout_us: u32) -> Result<Vec<AnyRequest>>;

    /// Wait up to `timeout_us` for every pending request to finish
    ///
    /// Returns `true` if nothing is pending any more.
    ///
    /// # Errors
    ///
    /// `ChannelClosed`, or `OutOfRange` for a timeout above
    /// [`MAX_TIMEOUT_US`].
    fn wait(&self, timeout_us: u32) -> Result<bool>;

    /// Whether the backend accepts requests
    fn is_open(&self) -> bool;

    /// Release the backend; pending requests are cancelled
    fn close(&self) {}
}

/// Backend of a channel that is not open
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosedChannel;

impl ChannelBackend for ClosedChannel {
    fn subchannels(&self) -> Result<u64> {
        Err(BusError::ChannelClosed)
    }

    fn cancel(&self) -> Result<()> {
        Err(BusError::ChannelClosed)
    }

    fn prepare_request(&self, _kind: RequestKind) -> Result<()> {
        Err(BusError::ChannelClosed)
    }

    fn queue(&self, _request: AnyRequest) -> Result<()> {
        Err(BusError::ChannelClosed)
    }

    fn dequeue(&self, _count: usize, _timeout_us: u32) -> Result<Vec<AnyRequest>> {
        Err(BusError::ChannelClosed)
    }

    fn wait(&self, _timeout_us: u32) -> Result<bool> {
        Err(BusError::ChannelClosed)
    }

    fn is_open(&self) -> bool {
        false
    }
}

/// Isochronous channel handle
#[derive(Debug)]
pub struct Channel {
    backend: Box<dyn ChannelBackend>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    /// Closed channel
    pub fn new() -> Self {
        Self {
            backend: Box::new(ClosedChannel),
        }
    }

    /// Attach a live backend, closing the previous one
    pub fn open(&mut self, backend: impl ChannelBackend + 'static) {
        self.close();
        self.backend = Box::new(backend);
        info!("Isochronous channel opened");
    }

    /// Detach the backend; the channel behaves as never opened afterwards
    pub fn close(&mut self) {
        if self.backend.is_open() {
            self.backend.close();
            info!("Isochronous channel closed");
        }
        self.backend = Box::new(ClosedChannel);
    }

    /// Whether a live backend is attached
    pub fn is_open(&self) -> bool {
        self.backend.is_open()
    }

    /// Reserved subchannel mask
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed.
    pub fn subchannels(&self) -> Result<u64> {
        self.backend.subchannels()
    }

    /// Cancel every pending request
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed.
    pub fn cancel(&self) -> Result<()> {
        self.backend.cancel()
    }

    /// Create a request of variant `B`
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed.
    pub fn create_request<B: RequestBody>(&self) -> Result<Request<B>> {
        self.backend.prepare_request(B::KIND)?;
        debug!("Created {:?} request", B::KIND);
        Ok(Request::new())
    }

    /// Create a read packets request
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed.
    pub fn create_read_packets_request(&self) -> Result<Request<ReadPackets>> {
        self.create_request()
    }

    /// Create a read fixed packets request
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed.
    pub fn create_read_fixed_packets_request(&self) -> Result<Request<ReadFixedPackets>> {
        self.create_request()
    }

    /// Create a read fixed data request
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed.
    pub fn create_read_fixed_data_request(&self) -> Result<Request<ReadFixedData>> {
        self.create_request()
    }

    /// Create a write packets request
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed.
    pub fn create_write_packets_request(&self) -> Result<Request<WritePackets>> {
        self.create_request()
    }

    /// Create a write fixed packets request
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed.
    pub fn create_write_fixed_packets_request(&self) -> Result<Request<WriteFixedPackets>> {
        self.create_request()
    }

    /// Create a write data request
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when closed.
    pub fn create_write_data_request(&self) -> Result<Request<WriteData>> {
        self.create_request()
    }

    /// Hand a request to the channel
    ///
    /// # Errors
    ///
    /// See [`ChannelBackend::queue`].
    pub fn queue(&self, request: impl Into<AnyRequest>) -> Result<()> {
        self.backend.queue(request.into())
    }

    /// Collect finished requests
    ///
    /// # Errors
    ///
    /// See [`ChannelBackend::dequeue`].
    pub fn dequeue(&self, count: usize, timeout_us: u32) -> Result<Vec<AnyRequest>> {
        self.backend.dequeue(count, timeout_us)
    }

    /// Wait for the pending queue to drain
    ///
    /// # Errors
    ///
    /// See [`ChannelBackend::wait`].
    pub fn wait(&self, timeout_us: u32) -> Result<bool> {
        self.backend.wait(timeout_us)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}
