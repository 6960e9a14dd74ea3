//! Isochronous requests
//!
//! A request is a cloneable handle: the caller keeps one, the channel keeps
//! another while the request is queued. Status moves
//!
//! ```text
//! Ready ──queue──▶ Pending ──▶ Completed | Error | TimedOut
//!   ▲                                   │
//!   └──────────────── reset ────────────┘
//! ```
//!
//! Nothing about a request may change while it is `Pending`: setters fail
//! with `NotReady` and `reset()` fails with `NotPending`.

use bytes::{Bytes, BytesMut};
use firewire_csr::node_id::BROADCAST;
use firewire_csr::{Speed, QUADLET_SIZE};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{BusError, Result};

/// Request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestStatus {
    /// Idle, may be configured and queued
    #[default]
    Ready,
    /// Owned by a channel
    Pending,
    /// Failed or cancelled
    Error,
    /// Did not complete in time
    TimedOut,
    /// Finished successfully
    Completed,
}

impl RequestStatus {
    /// Completed, failed or timed out
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::TimedOut | Self::Completed)
    }
}

/// Request variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Receive variable-size packets
    ReadPackets,
    /// Receive packets of one fixed payload size
    ReadFixedPackets,
    /// Receive fixed-size packets split into header and payload buffers
    ReadFixedData,
    /// Transmit variable-size packets
    WritePackets,
    /// Transmit packets of one fixed payload size
    WriteFixedPackets,
    /// Transmit a buffer cut into packets
    WriteData,
}

impl RequestKind {
    /// Transmit variants
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            Self::WritePackets | Self::WriteFixedPackets | Self::WriteData
        )
    }
}

/// Isochronous packet header options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequestOptions {
    tag: u8,
    sync: u8,
}

impl RequestOptions {
    /// Options with the given `tag` (2 bits) and `sync` code (4 bits)
    ///
    /// # Errors
    ///
    /// `OutOfRange` if either field does not fit.
    pub fn new(tag: u8, sync: u8) -> Result<Self> {
        if tag > 3 {
            return Err(BusError::out_of_range("tag", tag));
        }
        if sync > 15 {
            return Err(BusError::out_of_range("sync", sync));
        }
        Ok(Self { tag, sync })
    }

    /// Tag field
    pub const fn tag(self) -> u8 {
        self.tag
    }

    /// Sync field
    pub const fn sync(self) -> u8 {
        self.sync
    }
}

/// Operations shared by every request variant
pub trait IsochRequest: Debug + Send + Sync {
    /// Variant tag
    fn kind(&self) -> RequestKind;

    /// Current status
    fn status(&self) -> RequestStatus;

    /// Packet header options
    fn options(&self) -> RequestOptions;

    /// Replace the packet header options
    ///
    /// # Errors
    ///
    /// `NotReady` while pending.
    fn set_options(&self, options: RequestOptions) -> Result<()>;

    /// Subchannel (0..=63) the request runs on
    fn subchannel(&self) -> u8;

    /// Select the subchannel
    ///
    /// # Errors
    ///
    /// `OutOfRange` above 63, `NotReady` while pending.
    fn set_subchannel(&self, subchannel: u8) -> Result<()>;

    /// Packets moved by the last completion
    fn transferred_packets(&self) -> u32;

    /// Bytes moved by the last completion
    fn transferred_bytes(&self) -> u64;

    /// Return a finished request to `Ready` and clear its counters
    ///
    /// # Errors
    ///
    /// `NotPending` while the request is queued.
    fn reset(&self) -> Result<()>;
}

/// Variant-specific request state
pub trait RequestBody: Debug + Default + Send + 'static {
    /// Variant tag
    const KIND: RequestKind;

    /// Wrap a handle of this variant
    fn wrap(request: Request<Self>) -> AnyRequest;
}

#[derive(Debug, Clone, Copy, Default)]
struct Core {
    status: RequestStatus,
    options: RequestOptions,
    subchannel: u8,
    packets: u32,
    bytes: u64,
}

#[derive(Debug, Default)]
struct Shared<B> {
    core: Core,
    body: B,
}

/// Handle to an isochronous request of variant `B`
#[derive(Debug)]
pub struct Request<B> {
    inner: Arc<Mutex<Shared<B>>>,
}

impl<B> Clone for Request<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: RequestBody> Request<B> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Run `update` on the core state unless the request is pending
    fn update_core(&self, update: impl FnOnce(&mut Core) -> Result<()>) -> Result<()> {
        let mut shared = self.inner.lock();
        if shared.core.status == RequestStatus::Pending {
            return Err(BusError::not_ready("request is pending"));
        }
        update(&mut shared.core)
    }

    /// Run `update` on the body unless the request is pending
    fn update<T>(&self, update: impl FnOnce(&mut B) -> Result<T>) -> Result<T> {
        let mut shared = self.inner.lock();
        if shared.core.status == RequestStatus::Pending {
            return Err(BusError::not_ready("request is pending"));
        }
        update(&mut shared.body)
    }

    fn inspect<T>(&self, inspect: impl FnOnce(&B) -> T) -> T {
        inspect(&self.inner.lock().body)
    }

    /// `Ready` → `Pending`
    pub(crate) fn begin(&self) -> Result<()> {
        let mut shared = self.inner.lock();
        match shared.core.status {
            RequestStatus::Ready => {
                shared.core.status = RequestStatus::Pending;
                Ok(())
            }
            RequestStatus::Pending => Err(BusError::not_ready("request is already queued")),
            status => Err(BusError::not_ready(format!(
                "request is {status:?}, reset it before queueing"
            ))),
        }
    }

    /// `Pending` → terminal `status`
    pub(crate) fn finish(&self, status: RequestStatus, packets: u32, bytes: u64) {
        let mut shared = self.inner.lock();
        if shared.core.status == RequestStatus::Pending && status.is_terminal() {
            shared.core.status = status;
            shared.core.packets = packets;
            shared.core.bytes = bytes;
        }
    }
}

impl<B: RequestBody> IsochRequest for Request<B> {
    fn kind(&self) -> RequestKind {
        B::KIND
    }

    fn status(&self) -> RequestStatus {
        self.inner.lock().core.status
    }

    fn options(&self) -> RequestOptions {
        self.inner.lock().core.options
    }

    fn set_options(&self, options: RequestOptions) -> Result<()> {
        self.update_core(|core| {
            core.options = options;
            Ok(())
        })
    }

    fn subchannel(&self) -> u8 {
        self.inner.lock().core.subchannel
    }

    fn set_subchannel(&self, subchannel: u8) -> Result<()> {
        if subchannel > BROADCAST {
            return Err(BusError::out_of_range("subchannel", subchannel));
        }
        self.update_core(|core| {
            core.subchannel = subchannel;
            Ok(())
        })
    }

    fn transferred_packets(&self) -> u32 {
        self.inner.lock().core.packets
    }

    fn transferred_bytes(&self) -> u64 {
        self.inner.lock().core.bytes
    }

    fn reset(&self) -> Result<()> {
        let mut shared = self.inner.lock();
        if shared.core.status == RequestStatus::Pending {
            return Err(BusError::NotPending);
        }
        shared.core.status = RequestStatus::Ready;
        shared.core.packets = 0;
        shared.core.bytes = 0;
        Ok(())
    }
}

fn quadlet_multiple(what: &'static str, size: usize) -> Result<usize> {
    if size % QUADLET_SIZE == 0 {
        Ok(size)
    } else {
        Err(BusError::out_of_range(what, size as u64))
    }
}

// ── Variant bodies ───────────────────────────────────────────────────────────

/// Receive variable-size packets into one buffer
#[derive(Debug, Default)]
pub struct ReadPackets {
    buffer: BytesMut,
}

/// Receive packets of a fixed payload size
#[derive(Debug, Default)]
pub struct ReadFixedPackets {
    buffer: BytesMut,
    payload_size: usize,
}

/// Receive fixed-size packets, headers into their own buffer
#[derive(Debug, Default)]
pub struct ReadFixedData {
    buffer: BytesMut,
    header_buffer: BytesMut,
    packet_count: u32,
    header_size: usize,
    payload_size: usize,
}

/// Transmit packets whose sizes are listed explicitly
#[derive(Debug, Default)]
pub struct WritePackets {
    buffer: Bytes,
    packet_sizes: Vec<usize>,
    speed: Speed,
}

/// Transmit packets of a fixed payload size
#[derive(Debug, Default)]
pub struct WriteFixedPackets {
    buffer: Bytes,
    payload_size: usize,
    speed: Speed,
}

/// Transmit `size` bytes of a buffer as `packet_count` packets
#[derive(Debug, Default)]
pub struct WriteData {
    buffer: Bytes,
    size: usize,
    packet_count: u32,
    speed: Speed,
}

/// Read packets request
pub type ReadPacketsRequest = Request<ReadPackets>;
/// Read fixed packets request
pub type ReadFixedPacketsRequest = Request<ReadFixedPackets>;
/// Read fixed data request
pub type ReadFixedDataRequest = Request<ReadFixedData>;
/// Write packets request
pub type WritePacketsRequest = Request<WritePackets>;
/// Write fixed packets request
pub type WriteFixedPacketsRequest = Request<WriteFixedPackets>;
/// Write data request
pub type WriteDataRequest = Request<WriteData>;

macro_rules! request_body {
    ($($body:ident),+ $(,)?) => {$(
        impl RequestBody for $body {
            const KIND: RequestKind = RequestKind::$body;

            fn wrap(request: Request<Self>) -> AnyRequest {
                AnyRequest::$body(request)
            }
        }
    )+};
}

request_body!(
    ReadPackets,
    ReadFixedPackets,
    ReadFixedData,
    WritePackets,
    WriteFixedPackets,
    WriteData,
);

/// Bodies that receive into a buffer
pub trait ReadBody: RequestBody {
    /// Receive buffer
    fn buffer_mut(&mut self) -> &mut BytesMut;
}

/// Bodies that transmit at a selectable speed
pub trait WriteBody: RequestBody {
    /// Transmit speed
    fn speed(&self) -> Speed;
    /// Transmit speed, mutably
    fn speed_mut(&mut self) -> &mut Speed;
}

/// Bodies with a fixed per-packet payload
pub trait FixedPayloadBody: RequestBody {
    /// Payload size in bytes
    fn payload_size(&self) -> usize;
    /// Payload size in bytes, mutably
    fn payload_size_mut(&mut self) -> &mut usize;
}

macro_rules! read_body {
    ($($body:ident),+) => {$(
        impl ReadBody for $body {
            fn buffer_mut(&mut self) -> &mut BytesMut {
                &mut self.buffer
            }
        }
    )+};
}

macro_rules! write_body {
    ($($body:ident),+) => {$(
        impl WriteBody for $body {
            fn speed(&self) -> Speed {
                self.speed
            }

            fn speed_mut(&mut self) -> &mut Speed {
                &mut self.speed
            }
        }
    )+};
}

macro_rules! fixed_payload_body {
    ($($body:ident),+) => {$(
        impl FixedPayloadBody for $body {
            fn payload_size(&self) -> usize {
                self.payload_size
            }

            fn payload_size_mut(&mut self) -> &mut usize {
                &mut self.payload_size
            }
        }
    )+};
}

read_body!(ReadPackets, ReadFixedPackets, ReadFixedData);
write_body!(WritePackets, WriteFixedPackets, WriteData);
fixed_payload_body!(ReadFixedPackets, ReadFixedData, WriteFixedPackets);

impl<B: ReadBody> Request<B> {
    /// Provide the receive buffer
    ///
    /// # Errors
    ///
    /// `NotReady` while pending.
    pub fn set_buffer(&self, buffer: BytesMut) -> Result<()> {
        self.update(|body| {
            *body.buffer_mut() = buffer;
            Ok(())
        })
    }

    /// Take the receive buffer back, leaving an empty one
    ///
    /// # Errors
    ///
    /// `NotReady` while pending.
    pub fn take_buffer(&self) -> Result<BytesMut> {
        self.update(|body| Ok(std::mem::take(body.buffer_mut())))
    }
}

impl<B: WriteBody> Request<B> {
    /// Transmit speed in Mbit/s: 100, 200, 400, 800, 1600 or 3200
    ///
    /// # Errors
    ///
    /// `OutOfRange` for any other value, `NotReady` while pending.
    pub fn set_speed(&self, mbps: u32) -> Result<()> {
        let speed = Speed::from_mbps(mbps).ok_or_else(|| BusError::out_of_range("speed", mbps))?;
        self.update(|body| {
            *body.speed_mut() = speed;
            Ok(())
        })
    }

    /// Transmit speed
    pub fn speed(&self) -> Speed {
        self.inspect(WriteBody::speed)
    }
}

impl<B: FixedPayloadBody> Request<B> {
    /// Per-packet payload in bytes, a multiple of four
    ///
    /// # Errors
    ///
    /// `OutOfRange` if not a quadlet multiple, `NotReady` while pending.
    pub fn set_payload_size(&self, size: usize) -> Result<()> {
        let size = quadlet_multiple("payload size", size)?;
        self.update(|body| {
            *body.payload_size_mut() = size;
            Ok(())
        })
    }

    /// Per-packet payload in bytes
    pub fn payload_size(&self) -> usize {
        self.inspect(FixedPayloadBody::payload_size)
    }
}

impl Request<ReadFixedData> {
    /// Provide the header buffer
    ///
    /// # Errors
    ///
    /// `NotReady` while pending.
    pub fn set_header_buffer(&self, buffer: BytesMut) -> Result<()> {
        self.update(|body| {
            body.header_buffer = buffer;
            Ok(())
        })
    }

    /// Take the header buffer back
    ///
    /// # Errors
    ///
    /// `NotReady` while pending.
    pub fn take_header_buffer(&self) -> Result<BytesMut> {
        self.update(|body| Ok(std::mem::take(&mut body.header_buffer)))
    }

    /// Per-packet header size in bytes, a multiple of four
    ///
    /// # Errors
    ///
    /// `OutOfRange` if not a quadlet multiple, `NotReady` while pending.
    pub fn set_header_size(&self, size: usize) -> Result<()> {
        let size = quadlet_multiple("header size", size)?;
        self.update(|body| {
            body.header_size = size;
            Ok(())
        })
    }

    /// Per-packet header size in bytes
    pub fn header_size(&self) -> usize {
        self.inspect(|body| body.header_size)
    }

    /// Number of packets to receive
    ///
    /// # Errors
    ///
    /// `NotReady` while pending.
    pub fn set_packet_count(&self, count: u32) -> Result<()> {
        self.update(|body| {
            body.packet_count = count;
            Ok(())
        })
    }

    /// Number of packets to receive
    pub fn packet_count(&self) -> u32 {
        self.inspect(|body| body.packet_count)
    }
}

impl Request<WritePackets> {
    /// Data and the size of each packet cut from it
    ///
    /// # Errors
    ///
    /// `OutOfRange` if the sizes add up to more than the buffer holds,
    /// `NotReady` while pending.
    pub fn set_packets(&self, buffer: Bytes, packet_sizes: Vec<usize>) -> Result<()> {
        let total: usize = packet_sizes.iter().sum();
        if total > buffer.len() {
            return Err(BusError::out_of_range("packet sizes", total as u64));
        }
        self.update(|body| {
            body.buffer = buffer;
            body.packet_sizes = packet_sizes;
            Ok(())
        })
    }

    /// Sizes of the packets to send
    pub fn packet_sizes(&self) -> Vec<usize> {
        self.inspect(|body| body.packet_sizes.clone())
    }
}

impl Request<WriteFixedPackets> {
    /// Data to send
    ///
    /// # Errors
    ///
    /// `NotReady` while pending.
    pub fn set_buffer(&self, buffer: Bytes) -> Result<()> {
        self.update(|body| {
            body.buffer = buffer;
            Ok(())
        })
    }
}

impl Request<WriteData> {
    /// Send the first `size` bytes of `buffer` as `packet_count` packets
    ///
    /// # Errors
    ///
    /// `OutOfRange` if `size` exceeds the buffer, `NotReady` while pending.
    pub fn set_data(&self, buffer: Bytes, size: usize, packet_count: u32) -> Result<()> {
        if size > buffer.len() {
            return Err(BusError::out_of_range("size", size as u64));
        }
        self.update(|body| {
            body.buffer = buffer;
            body.size = size;
            body.packet_count = packet_count;
            Ok(())
        })
    }

    /// Bytes to send
    pub fn size(&self) -> usize {
        self.inspect(|body| body.size)
    }

    /// Packets to send
    pub fn packet_count(&self) -> u32 {
        self.inspect(|body| body.packet_count)
    }
}

// ── Type-erased request ──────────────────────────────────────────────────────

/// Any request variant, as held by a channel
#[derive(Debug, Clone)]
pub enum AnyRequest {
    /// Read packets
    ReadPackets(ReadPacketsRequest),
    /// Read fixed packets
    ReadFixedPackets(ReadFixedPacketsRequest),
    /// Read fixed data
    ReadFixedData(ReadFixedDataRequest),
    /// Write packets
    WritePackets(WritePacketsRequest),
    /// Write fixed packets
    WriteFixedPackets(WriteFixedPacketsRequest),
    /// Write data
    WriteData(WriteDataRequest),
}

impl<B: RequestBody> From<Request<B>> for AnyRequest {
    fn from(request: Request<B>) -> Self {
        B::wrap(request)
    }
}

impl AnyRequest {
    /// Shared operations of the wrapped request
    pub fn as_request(&self) -> &dyn IsochRequest {
        match self {
            Self::ReadPackets(r) => r,
            Self::ReadFixedPackets(r) => r,
            Self::ReadFixedData(r) => r,
            Self::WritePackets(r) => r,
            Self::WriteFixedPackets(r) => r,
            Self::WriteData(r) => r,
        }
    }

    pub(crate) fn begin(&self) -> Result<()> {
        match self {
            Self::ReadPackets(r) => r.begin(),
            Self::ReadFixedPackets(r) => r.begin(),
            Self::ReadFixedData(r) => r.begin(),
            Self::WritePackets(r) => r.begin(),
            Self::WriteFixedPackets(r) => r.begin(),
            Self::WriteData(r) => r.begin(),
        }
    }

    pub(crate) fn finish(&self, status: RequestStatus, packets: u32, bytes: u64) {
        match self {
            Self::ReadPackets(r) => r.finish(status, packets, bytes),
            Self::ReadFixedPackets(r) => r.finish(status, packets, bytes),
            Self::ReadFixedData(r) => r.finish(status, packets, bytes),
            Self::WritePackets(r) => r.finish(status, packets, bytes),
            Self::WriteFixedPackets(r) => r.finish(status, packets, bytes),
            Self::WriteData(r) => r.finish(status, packets, bytes),
        }
    }
}

impl IsochRequest for AnyRequest {
    fn kind(&self) -> RequestKind {
        self.as_request().kind()
    }

    fn status(&self) -> RequestStatus {
        self.as_request().status()
    }

    fn options(&self) -> RequestOptions {
        self.as_request().options()
    }

    fn set_options(&self, options: RequestOptions) -> Result<()> {
        self.as_request().set_options(options)
    }

    fn subchannel(&self) -> u8 {
        self.as_request().subchannel()
    }

    fn set_subchannel(&self, subchannel: u8) -> Result<()> {
        self.as_request().set_subchannel(subchannel)
    }

    fn transferred_packets(&self) -> u32 {
        self.as_request().transferred_packets()
    }

    fn transferred_bytes(&self) -> u64 {
        self.as_request().transferred_bytes()
    }

    fn reset(&self) -> Result<()> {
        self.as_request().reset()
    }
}
