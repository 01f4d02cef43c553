mod common;

use common::{device_list, FakeDaemon};
use ioscmd_core::{forward, MuxError, RelayService, Usbmux};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::thread;

fn listing(devices: &'static [(&'static str, u64, &'static str)]) -> FakeDaemon {
    FakeDaemon::spawn(1, move |_, mut conn| {
        conn.read_request();
        conn.send(&device_list(devices));
    })
}

#[test]
fn test_no_device_attached() {
    let daemon = listing(&[]);
    let service = RelayService::new(Usbmux::new(daemon.endpoint.clone()), None, 22);
    assert!(matches!(service.resolve_device(), Err(MuxError::NoDevice)));
    daemon.join();
}

#[test]
fn test_several_devices_need_a_udid() {
    let daemon = listing(&[("udid-a", 1, "USB"), ("udid-b", 2, "USB")]);
    let service = RelayService::new(Usbmux::new(daemon.endpoint.clone()), None, 22);
    assert!(matches!(service.resolve_device(), Err(MuxError::AmbiguousDevice { count: 2 })));
    daemon.join();
}

#[test]
fn test_unknown_udid() {
    let daemon = listing(&[("udid-a", 1, "USB")]);
    let service =
        RelayService::new(Usbmux::new(daemon.endpoint.clone()), Some("udid-z".to_string()), 22);
    match service.resolve_device() {
        Err(MuxError::DeviceNotFound { udid }) => assert_eq!(udid, "udid-z"),
        other => panic!("expected DeviceNotFound, got {other:?}"),
    }
    daemon.join();
}

#[test]
fn test_selects_requested_udid() {
    let daemon = listing(&[("udid-a", 1, "USB"), ("udid-b", 2, "Network")]);
    let service =
        RelayService::new(Usbmux::new(daemon.endpoint.clone()), Some("udid-b".to_string()), 22);
    assert_eq!(service.resolve_device().unwrap().device_id, 2);
    daemon.join();
}

#[test]
fn test_serve_one_forwards_both_ways() {
    let daemon = FakeDaemon::spawn(2, |index, mut conn| {
        let request = conn.read_request();
        if index == 0 {
            conn.send(&device_list(&[("udid-a", 4, "USB")]));
            return;
        }

        assert_eq!(request.str("MessageType"), Some("Connect"));
        assert_eq!(request.uint("DeviceID"), Some(4));
        assert_eq!(request.uint("PortNumber"), Some(u64::from(2222u16.swap_bytes())));
        conn.send_result(0);

        // Echo service: read until the client half-closes, then answer.
        let mut received = Vec::new();
        conn.stream.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"ping");
        conn.stream.write_all(b"pong!").unwrap();
        conn.stream.shutdown(Shutdown::Write).unwrap();
    });

    let service = RelayService::new(Usbmux::new(daemon.endpoint.clone()), None, 2222);
    let listener = service.bind_ephemeral().unwrap();
    let addr = listener.local_addr().unwrap();
    assert!(addr.ip().is_loopback());

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"ping").unwrap();
        stream.shutdown(Shutdown::Write).unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).unwrap();
        reply
    });

    let stats = listener.serve_one().unwrap();
    assert_eq!(client.join().unwrap(), b"pong!");
    assert_eq!(stats.upstream, 4);
    assert_eq!(stats.downstream, 5);
    daemon.join();
}

#[test]
fn test_forward_keeps_one_direction_after_the_other_ends() {
    let (left, mut left_peer) = UnixStream::pair().unwrap();
    let (right, mut right_peer) = UnixStream::pair().unwrap();

    let worker = thread::spawn(move || forward(&left, &right).unwrap());

    // Left finishes first; right keeps talking afterwards.
    left_peer.write_all(b"abc").unwrap();
    left_peer.shutdown(Shutdown::Write).unwrap();

    let mut got = [0u8; 3];
    right_peer.read_exact(&mut got).unwrap();
    assert_eq!(&got, b"abc");

    right_peer.write_all(b"late reply").unwrap();
    right_peer.shutdown(Shutdown::Write).unwrap();

    let mut reply = Vec::new();
    left_peer.read_to_end(&mut reply).unwrap();
    assert_eq!(reply, b"late reply");

    let mut tail = Vec::new();
    right_peer.read_to_end(&mut tail).unwrap();
    assert!(tail.is_empty());

    let stats = worker.join().unwrap();
    assert_eq!(stats.upstream, 3);
    assert_eq!(stats.downstream, 10);
}
