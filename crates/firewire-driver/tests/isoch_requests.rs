//! Isochronous request lifecycle through a channel
//!
//! Uses the loopback channel backend: the test plays the role of the
//! hardware and decides how each queued request finishes.

use bytes::{Bytes, BytesMut};
use firewire_driver::csr::Speed;
use firewire_driver::isoch::{
    Channel, IsochRequest, LoopbackChannel, RequestKind, RequestOptions, RequestStatus,
    MAX_TIMEOUT_US,
};
use firewire_driver::{BusError, ChannelBackend};
use std::thread;
use std::time::Duration;

fn open_channel(subchannels: u64) -> (Channel, LoopbackChannel) {
    let loopback = LoopbackChannel::new(subchannels);
    let mut channel = Channel::new();
    channel.open(loopback.clone());
    (channel, loopback)
}

#[test]
fn test_write_request_lifecycle() {
    let (channel, loopback) = open_channel(0b110);
    assert_eq!(channel.subchannels().expect("open"), 0b110);

    let request = channel.create_write_data_request().expect("create");
    request.set_subchannel(2).expect("subchannel");
    request.set_speed(400).expect("speed");
    request
        .set_options(RequestOptions::new(1, 0).expect("options"))
        .expect("set options");
    request
        .set_data(Bytes::from_static(&[0xa5; 64]), 64, 4)
        .expect("data");

    channel.queue(request.clone()).expect("queue");
    assert_eq!(request.status(), RequestStatus::Pending);
    assert!(matches!(
        request.set_speed(200),
        Err(BusError::NotReady { .. })
    ));
    assert_eq!(request.reset(), Err(BusError::NotPending));
    // the same handle cannot be queued twice
    assert!(channel.queue(request.clone()).is_err());

    assert_eq!(
        loopback
            .complete_next(RequestStatus::Completed, 4, 64)
            .expect("complete"),
        RequestKind::WriteData
    );
    assert!(channel.wait(0).expect("wait"));

    let done = channel.dequeue(4, 0).expect("dequeue");
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].kind(), RequestKind::WriteData);
    assert_eq!(done[0].transferred_packets(), 4);
    assert_eq!(request.status(), RequestStatus::Completed);
    assert_eq!(request.transferred_bytes(), 64);
    assert_eq!(request.speed(), Speed::S400);

    request.reset().expect("reset");
    assert_eq!(request.status(), RequestStatus::Ready);
    assert_eq!(request.transferred_packets(), 0);
    channel.queue(request).expect("requeue");
}

#[test]
fn test_read_request_buffers_survive_completion() {
    let (channel, loopback) = open_channel(1);
    let request = channel.create_read_fixed_data_request().expect("create");
    request.set_buffer(BytesMut::zeroed(4096)).expect("buffer");
    request.set_header_buffer(BytesMut::zeroed(256)).expect("headers");
    request.set_header_size(8).expect("header size");
    request.set_payload_size(480).expect("payload size");
    request.set_packet_count(32).expect("packet count");

    channel.queue(request.clone()).expect("queue");
    loopback
        .complete_next(RequestStatus::TimedOut, 3, 1464)
        .expect("complete");
    assert_eq!(channel.dequeue(1, 0).expect("dequeue").len(), 1);

    assert_eq!(request.status(), RequestStatus::TimedOut);
    assert_eq!(request.take_buffer().expect("buffer").len(), 4096);
    assert_eq!(request.take_header_buffer().expect("headers").len(), 256);
    assert_eq!(request.packet_count(), 32);
}

#[test]
fn test_invalid_speeds() {
    let (channel, _loopback) = open_channel(1);
    let request = channel.create_write_fixed_packets_request().expect("create");
    for mbps in [0, 300, 500, 6400] {
        assert_eq!(
            request.set_speed(mbps),
            Err(BusError::OutOfRange {
                what: "speed",
                value: u64::from(mbps)
            })
        );
    }
    request.set_speed(800).expect("s800");
    assert_eq!(request.speed(), Speed::S800);
    request.set_speed(3200).expect("s3200");
    assert_eq!(request.speed(), Speed::S3200);
}

#[test]
fn test_never_opened_channel() {
    let channel = Channel::default();
    assert!(!channel.is_open());
    assert_eq!(channel.dequeue(0, 0).unwrap_err(), BusError::ChannelClosed);
    assert_eq!(channel.wait(10).unwrap_err(), BusError::ChannelClosed);
    assert_eq!(channel.cancel().unwrap_err(), BusError::ChannelClosed);
    assert_eq!(channel.subchannels().unwrap_err(), BusError::ChannelClosed);
    assert_eq!(
        channel.create_read_packets_request().unwrap_err(),
        BusError::ChannelClosed
    );
    assert_eq!(
        channel.create_read_fixed_packets_request().unwrap_err(),
        BusError::ChannelClosed
    );
    assert_eq!(
        channel.create_read_fixed_data_request().unwrap_err(),
        BusError::ChannelClosed
    );
    assert_eq!(
        channel.create_write_packets_request().unwrap_err(),
        BusError::ChannelClosed
    );
    assert_eq!(
        channel.create_write_fixed_packets_request().unwrap_err(),
        BusError::ChannelClosed
    );
    assert_eq!(
        channel.create_write_data_request().unwrap_err(),
        BusError::ChannelClosed
    );

    // a request made on another channel is refused without being touched
    let (open, _loopback) = open_channel(1);
    let request = open.create_write_packets_request().expect("create");
    assert_eq!(
        channel.queue(request.clone()).unwrap_err(),
        BusError::ChannelClosed
    );
    assert_eq!(request.status(), RequestStatus::Ready);
}

#[test]
fn test_timeout_limit() {
    let (channel, _loopback) = open_channel(1);
    assert!(channel.dequeue(0, MAX_TIMEOUT_US).expect("in range").is_empty());
    assert!(matches!(
        channel.dequeue(0, MAX_TIMEOUT_US + 1),
        Err(BusError::OutOfRange { what: "timeout", .. })
    ));
    assert!(matches!(
        channel.wait(MAX_TIMEOUT_US + 1),
        Err(BusError::OutOfRange { what: "timeout", .. })
    ));
}

#[test]
fn test_cancel_fails_pending_requests() {
    let (channel, loopback) = open_channel(1);
    let first = channel.create_read_packets_request().expect("create");
    let second = channel.create_write_packets_request().expect("create");
    second
        .set_packets(Bytes::from_static(&[1; 24]), vec![8, 16])
        .expect("packets");
    channel.queue(first.clone()).expect("queue");
    channel.queue(second.clone()).expect("queue");
    assert_eq!(loopback.pending_len(), 2);

    channel.cancel().expect("cancel");
    assert!(channel.wait(0).expect("wait"));
    assert_eq!(first.status(), RequestStatus::Error);
    assert_eq!(second.status(), RequestStatus::Error);

    let done = channel.dequeue(2, 0).expect("dequeue");
    let kinds: Vec<_> = done.iter().map(IsochRequest::kind).collect();
    assert_eq!(kinds, [RequestKind::ReadPackets, RequestKind::WritePackets]);
}

#[test]
fn test_dequeue_blocks_until_completion() {
    let (channel, loopback) = open_channel(1);
    for _ in 0..3 {
        let request = channel.create_read_packets_request().expect("create");
        channel.queue(request).expect("queue");
    }

    let completer = thread::spawn(move || {
        for _ in 0..3 {
            thread::sleep(Duration::from_millis(5));
            loopback
                .complete_next(RequestStatus::Completed, 1, 8)
                .expect("complete");
        }
    });

    let done = channel.dequeue(3, 5_000_000).expect("dequeue");
    completer.join().expect("completer thread");
    assert_eq!(done.len(), 3);
    assert!(done
        .iter()
        .all(|request| request.status() == RequestStatus::Completed));
}

#[test]
fn test_close_cancels_and_closes() {
    let (mut channel, loopback) = open_channel(1);
    let request = channel.create_write_data_request().expect("create");
    channel.queue(request.clone()).expect("queue");

    channel.close();
    assert!(!channel.is_open());
    assert_eq!(request.status(), RequestStatus::Error);
    assert_eq!(loopback.subchannels().unwrap_err(), BusError::ChannelClosed);

    // reopening with a fresh backend works
    channel.open(LoopbackChannel::new(1));
    request.reset().expect("reset");
    channel.queue(request).expect("queue");
}
