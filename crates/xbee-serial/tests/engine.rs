//! Engine tests over an in-memory link standing in for the radio

use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Runtime;
use xbee_serial::protocol::{
    checksum, ConnectionState, Frame, ReceivePacket, SerialXbee, TransmitRequest, XbeeConfig,
    XbeeError,
};

const WAIT: Duration = Duration::from_secs(2);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine attached to one end of a duplex pipe, frames forwarded to a channel
fn attached_engine(config: XbeeConfig) -> (SerialXbee, DuplexStream, mpsc::Receiver<Frame>) {
    init_tracing();
    let (radio, host) = tokio::io::duplex(1024);
    let xbee = SerialXbee::new(config);
    let (tx, rx) = mpsc::channel();
    xbee.set_read_handler(move |frame: &Frame| {
        let _ = tx.send(frame.clone());
    });
    xbee.attach(host).expect("attach");
    (xbee, radio, rx)
}

fn radio_write(rt: &Runtime, radio: &mut DuplexStream, bytes: &[u8]) {
    rt.block_on(radio.write_all(bytes)).expect("radio write");
}

fn radio_read(rt: &Runtime, radio: &mut DuplexStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rt.block_on(async {
        tokio::time::timeout(WAIT, radio.read_exact(&mut buf))
            .await
            .expect("radio read timed out")
            .expect("radio read")
    });
    buf
}

/// Poll `condition` until it holds or `WAIT` elapses
fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Receive Packet with zero addresses, zero options and `payload`
fn zero_address_frame(payload: &[u8]) -> Vec<u8> {
    let length = 12 + payload.len() as u16;
    let mut bytes = vec![0x7E, (length >> 8) as u8, length as u8, 0x90];
    bytes.extend([0u8; 11]);
    bytes.extend_from_slice(payload);
    let cs = checksum(&bytes[3..]);
    bytes.push(cs);
    bytes
}

#[test]
fn test_dispatches_receive_packet_and_keeps_reading() {
    let rt = Runtime::new().unwrap();
    let (xbee, mut radio, frames) = attached_engine(XbeeConfig::default());
    assert_eq!(xbee.state(), ConnectionState::Connected);

    let first = zero_address_frame(&[]);
    assert_eq!(&first[..4], &[0x7E, 0x00, 0x0C, 0x90]);
    assert_eq!(first.last(), Some(&0x6F));
    radio_write(&rt, &mut radio, &first);

    match frames.recv_timeout(WAIT).expect("first frame") {
        Frame::Receive(packet) => {
            assert_eq!(packet.source_mac_64(), 0);
            assert_eq!(packet.source_mac_16(), 0);
            assert_eq!(packet.options(), 0);
            assert!(packet.data().is_empty());
        }
        other => panic!("expected receive packet, got {:?}", other),
    }

    // Leading noise before the next delimiter is skipped
    let mut second = vec![0x11, 0x22];
    second.extend(zero_address_frame(b"hello"));
    radio_write(&rt, &mut radio, &second);
    let frame = frames.recv_timeout(WAIT).expect("second frame");
    assert_eq!(frame.data(), b"hello");

    let stats = xbee.stats();
    assert_eq!(stats.frames_received, 2);
    assert_eq!(stats.bytes_received, (first.len() + second.len()) as u64);
    xbee.stop();
}

#[test]
fn test_unknown_frame_type_is_dropped() {
    let rt = Runtime::new().unwrap();
    let (xbee, mut radio, frames) = attached_engine(XbeeConfig::default());

    let mut bytes = vec![0x7E, 0x00, 0x0C, 0xFF];
    bytes.extend([0u8; 11]);
    bytes.push(0x00);
    bytes.extend(zero_address_frame(b"after"));
    radio_write(&rt, &mut radio, &bytes);

    let frame = frames.recv_timeout(WAIT).expect("valid frame");
    assert_eq!(frame.data(), b"after");
    assert!(frames.try_recv().is_err());
    assert_eq!(xbee.stats().decode_errors, 1);
    assert_eq!(xbee.stats().frames_received, 1);
    xbee.stop();
}

#[test]
fn test_bad_checksum_is_dropped() {
    let rt = Runtime::new().unwrap();
    let (xbee, mut radio, frames) = attached_engine(XbeeConfig::default());

    let mut corrupt = ReceivePacket::from_parts(7, 8, 0, b"abc".to_vec())
        .unwrap()
        .serialize();
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0x01;
    radio_write(&rt, &mut radio, &corrupt);
    radio_write(&rt, &mut radio, &zero_address_frame(b"ok"));

    assert_eq!(frames.recv_timeout(WAIT).unwrap().data(), b"ok");
    assert_eq!(xbee.stats().decode_errors, 1);
    xbee.stop();
}

#[test]
fn test_send_writes_transmit_request() {
    let rt = Runtime::new().unwrap();
    let (xbee, mut radio, _frames) = attached_engine(XbeeConfig::default());
    let (tx, written) = mpsc::channel();
    xbee.set_write_handler(move |frame: &Frame, outcome: Result<(), &XbeeError>| {
        let _ = tx.send((frame.clone(), outcome.is_ok()));
    });

    xbee.send_data("hi", 0x0013_A200_1234_5678, None).unwrap();

    let bytes = radio_read(&rt, &mut radio, 20);
    assert_eq!(
        bytes,
        vec![
            0x7E, 0x00, 0x10, 0x10, 0x00, 0x00, 0x13, 0xA2, 0x00, 0x12, 0x34, 0x56, 0x78, 0xFF,
            0xFE, 0x00, 0x00, 0x68, 0x69, 0x58,
        ]
    );

    let (frame, ok) = written.recv_timeout(WAIT).expect("write handler");
    assert!(ok);
    match frame {
        Frame::Transmit(request) => assert_eq!(request.target_mac_64(), 0x0013_A200_1234_5678),
        other => panic!("expected transmit request, got {:?}", other),
    }

    let stats = xbee.stats();
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.bytes_sent, 20);
    xbee.stop();
}

#[test]
fn test_writes_keep_submission_order() {
    let rt = Runtime::new().unwrap();
    let (xbee, mut radio, _frames) = attached_engine(XbeeConfig::default());
    xbee.set_write_handler(|_: &Frame, _: Result<(), &XbeeError>| {});

    let mut expected = Vec::new();
    for (i, text) in ["one", "two", "three"].iter().enumerate() {
        let mut request = TransmitRequest::with_addresses(0x0013_A200_0000_0000 + i as u64, 0x0001);
        request.set_data(text).unwrap();
        expected.extend(request.serialize());
        xbee.send(request).unwrap();
    }

    assert_eq!(radio_read(&rt, &mut radio, expected.len()), expected);
    xbee.stop();
}

#[test]
fn test_failed_write_reaches_write_handler() {
    init_tracing();
    let (radio, host) = tokio::io::duplex(64);
    drop(radio);

    let xbee = SerialXbee::new(XbeeConfig::default());
    let (tx, outcomes) = mpsc::channel();
    xbee.set_write_handler(move |_: &Frame, outcome: Result<(), &XbeeError>| {
        let _ = tx.send(outcome.map_err(|e| e.to_string()));
    });
    xbee.attach(host).unwrap();

    xbee.send_data("lost", 0x0013_A200_1234_5678, Some(0x1234))
        .unwrap();
    let outcome = outcomes.recv_timeout(WAIT).expect("write handler");
    assert!(outcome.is_err());
    assert!(xbee.stats().transport_errors >= 1);
    xbee.stop();
}

#[test]
fn test_header_timeout_resynchronises() {
    let rt = Runtime::new().unwrap();
    let config = XbeeConfig {
        read_timeout_ms: 50,
        ..XbeeConfig::default()
    };
    let (xbee, mut radio, frames) = attached_engine(config);

    radio_write(&rt, &mut radio, &[0x7E, 0x00]);
    std::thread::sleep(Duration::from_millis(300));
    radio_write(&rt, &mut radio, &zero_address_frame(b"late"));

    assert_eq!(frames.recv_timeout(WAIT).unwrap().data(), b"late");
    assert_eq!(xbee.stats().transport_errors, 1);
    xbee.stop();
}

#[test]
fn test_connect_twice_is_rejected() {
    let (xbee, _radio, _frames) = attached_engine(XbeeConfig::default());
    let (_other_radio, other_host) = tokio::io::duplex(64);
    assert!(matches!(
        xbee.attach(other_host),
        Err(XbeeError::AlreadyConnected)
    ));
    xbee.stop();

    // A stopped engine can be attached again
    let (_radio, host) = tokio::io::duplex(64);
    xbee.attach(host).unwrap();
    assert!(xbee.is_connected());
    xbee.stop();
}

#[test]
fn test_stop_with_pending_read() {
    let rt = Runtime::new().unwrap();
    init_tracing();
    let (mut radio, host) = tokio::io::duplex(256);
    let xbee = SerialXbee::new(XbeeConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    xbee.set_read_handler(move |_: &Frame| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    xbee.attach(host).unwrap();

    // Give the read pipeline time to block on the delimiter
    std::thread::sleep(Duration::from_millis(50));
    xbee.stop();
    assert_eq!(xbee.state(), ConnectionState::Disconnected);

    // The host end is gone, nothing can be delivered any more
    let _ = rt.block_on(radio.write_all(&zero_address_frame(b"too late")));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // Queue is gone with the worker
    assert!(matches!(
        xbee.send(TransmitRequest::new()),
        Err(XbeeError::NotConnected)
    ));
    xbee.stop();
}

#[test]
fn test_engines_are_independent() {
    let rt = Runtime::new().unwrap();
    let (first, mut first_radio, first_frames) = attached_engine(XbeeConfig::default());
    let (second, mut second_radio, second_frames) = attached_engine(XbeeConfig::default());

    radio_write(&rt, &mut first_radio, &zero_address_frame(b"first"));
    radio_write(&rt, &mut second_radio, &zero_address_frame(b"second"));

    assert_eq!(first_frames.recv_timeout(WAIT).unwrap().data(), b"first");
    assert_eq!(second_frames.recv_timeout(WAIT).unwrap().data(), b"second");

    first.stop();
    assert!(!first.is_connected());
    assert!(second.is_connected());
    second.stop();
}

#[test]
fn test_drop_stops_engine() {
    let rt = Runtime::new().unwrap();
    let (xbee, mut radio, frames) = attached_engine(XbeeConfig::default());
    drop(xbee);

    let _ = rt.block_on(radio.write_all(&zero_address_frame(b"nobody")));
    assert!(frames.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_reattach_after_transport_closes() {
    let rt = Runtime::new().unwrap();
    let (xbee, radio, frames) = attached_engine(XbeeConfig::default());
    drop(radio);
    assert!(wait_until(|| !xbee.is_connected()));
    assert_eq!(xbee.state(), ConnectionState::Disconnected);

    // The closed link is reaped instead of reported as still connected
    let (mut radio, host) = tokio::io::duplex(1024);
    xbee.attach(host).expect("reattach after end of stream");
    assert!(xbee.is_connected());

    radio_write(&rt, &mut radio, &zero_address_frame(b"again"));
    assert_eq!(frames.recv_timeout(WAIT).unwrap().data(), b"again");
    xbee.stop();
}

#[test]
fn test_panicking_handler_disconnects_engine() {
    let rt = Runtime::new().unwrap();
    init_tracing();
    let (mut radio, host) = tokio::io::duplex(256);
    let xbee = SerialXbee::new(XbeeConfig::default());
    xbee.set_read_handler(|_: &Frame| panic!("handler failure"));
    xbee.attach(host).unwrap();

    radio_write(&rt, &mut radio, &zero_address_frame(b"boom"));
    assert!(wait_until(|| !xbee.is_connected()));
    assert!(matches!(
        xbee.send_data("x", 1, None),
        Err(XbeeError::NotConnected)
    ));

    // The dead worker does not block a new connection
    let (tx, frames) = mpsc::channel();
    xbee.set_read_handler(move |frame: &Frame| {
        let _ = tx.send(frame.clone());
    });
    let (mut radio, host) = tokio::io::duplex(256);
    xbee.attach(host).unwrap();
    radio_write(&rt, &mut radio, &zero_address_frame(b"recovered"));
    assert_eq!(frames.recv_timeout(WAIT).unwrap().data(), b"recovered");
    xbee.stop();
}
