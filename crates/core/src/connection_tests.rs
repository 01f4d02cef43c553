#[cfg(test)]
mod tests {
    use crate::connection::*;
    use crate::error::MuxError;
    use crate::protocol::*;
    use proptest::prelude::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;
    use std::thread;
    use std::time::Duration;

    fn payload(kind: &str) -> plist::Dictionary {
        let mut dict = plist::Dictionary::new();
        dict.insert("MessageType".to_string(), plist::Value::from(kind));
        dict
    }

    fn read_first_frame(peer: &mut UnixStream) -> (FrameHeader, plist::Dictionary) {
        let mut header = [0u8; FULL_HEADER_LEN];
        peer.read_exact(&mut header).unwrap();
        let header = FrameHeader::decode(&header);
        let mut body = vec![0u8; header.payload_len().unwrap()];
        peer.read_exact(&mut body).unwrap();
        (header, decode_payload(&body).unwrap())
    }

    fn read_short_frame(peer: &mut UnixStream) -> plist::Dictionary {
        let mut len = [0u8; SHORT_HEADER_LEN];
        peer.read_exact(&mut len).unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        peer.read_exact(&mut body).unwrap();
        decode_payload(&body).unwrap()
    }

    #[test]
    fn test_first_send_uses_full_header_then_short() {
        let (client, mut peer) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client, 42);
        assert_eq!(conn.send_state(), FrameState::AwaitingFirstFrame);

        conn.send_message(&payload("One")).unwrap();
        assert_eq!(conn.send_state(), FrameState::Streaming);
        conn.send_message(&payload("Two")).unwrap();

        let (header, first) = read_first_frame(&mut peer);
        assert_eq!(header.tag, 42);
        assert_eq!(header.version, PROTOCOL_VERSION);
        assert_eq!(header.message_type, PLIST_MESSAGE_TYPE);
        assert_eq!(first, payload("One"));
        assert_eq!(read_short_frame(&mut peer), payload("Two"));
    }

    #[test]
    fn test_send_and_receive_states_are_independent() {
        let (client, mut peer) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client, 1);

        conn.send_message(&payload("Request")).unwrap();
        assert_eq!(conn.recv_state(), FrameState::AwaitingFirstFrame);

        let body = encode_payload(&payload("Result")).unwrap();
        peer.write_all(&encode_frame(FrameState::AwaitingFirstFrame, 8, 1, &body).unwrap()).unwrap();
        peer.write_all(&encode_frame(FrameState::Streaming, 8, 1, &body).unwrap()).unwrap();

        assert_eq!(conn.receive_message().unwrap(), payload("Result"));
        assert_eq!(conn.recv_state(), FrameState::Streaming);
        assert_eq!(conn.receive_message().unwrap(), payload("Result"));
    }

    #[test]
    fn test_receive_full_message_after_first() {
        let (client, mut peer) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client, 1);

        let body = encode_payload(&payload("Attached")).unwrap();
        for _ in 0..2 {
            peer.write_all(&encode_frame(FrameState::AwaitingFirstFrame, 8, 0, &body).unwrap()).unwrap();
        }

        assert_eq!(conn.receive_message().unwrap(), payload("Attached"));
        assert_eq!(conn.receive_full_message().unwrap(), payload("Attached"));
    }

    #[test]
    fn test_truncated_frame_is_an_error_and_releases_socket() {
        let (client, mut peer) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client, 1);

        let body = encode_payload(&payload("Result")).unwrap();
        let frame = encode_frame(FrameState::AwaitingFirstFrame, 8, 1, &body).unwrap();
        peer.write_all(&frame[..frame.len() - 3]).unwrap();
        drop(peer);

        assert!(matches!(conn.receive_message(), Err(MuxError::Receive(_))));
        assert!(conn.is_closed());
        assert!(matches!(conn.send_message(&payload("Again")), Err(MuxError::UseAfterClose)));
    }

    #[test]
    fn test_close_is_idempotent_across_aliases() {
        let (client, _peer) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(client, 1);
        let alias = conn.close_handle();
        let other = alias.clone();

        assert!(!conn.is_closed());
        assert!(alias.close());
        assert!(!other.close());
        conn.close();

        assert!(conn.is_closed());
        assert!(matches!(other.stream(), Err(MuxError::UseAfterClose)));
    }

    #[test]
    fn test_close_from_another_thread_unblocks_receive() {
        let (client, _peer) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client, 1);
        let handle = conn.close_handle();

        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.close();
        });

        assert!(matches!(conn.receive_message(), Err(MuxError::UseAfterClose)));
        closer.join().unwrap();
    }

    #[test]
    fn test_send_and_receive_restores_timeout_on_success() {
        let (client, mut peer) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client, 1);
        let previous = Some(Duration::from_secs(30));
        conn.set_read_timeout(previous).unwrap();

        let server = thread::spawn(move || {
            read_first_frame(&mut peer);
            let body = encode_payload(&payload("Result")).unwrap();
            peer.write_all(&encode_frame(FrameState::AwaitingFirstFrame, 8, 1, &body).unwrap()).unwrap();
            peer
        });

        let reply = conn.send_and_receive(&payload("Request"), Some(Duration::from_secs(2))).unwrap();
        assert_eq!(reply, payload("Result"));
        assert_eq!(conn.read_timeout().unwrap(), previous);
        drop(server.join().unwrap());
    }

    #[test]
    fn test_send_and_receive_restores_timeout_on_error() {
        let (client, peer) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client, 1);
        assert_eq!(conn.read_timeout().unwrap(), None);

        // Peer never answers, so the scoped timeout fires.
        let result = conn.send_and_receive(&payload("Request"), Some(Duration::from_millis(50)));
        let err = result.unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err:?}");
        assert_eq!(conn.read_timeout().unwrap(), None);
        drop(peer);
    }

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(
            "127.0.0.1:27015".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp { host: "127.0.0.1".to_string(), port: 27015 }
        );
        assert_eq!(
            "/var/run/usbmuxd".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/var/run/usbmuxd"))
        );
        assert!("localhost:notaport".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_platform_default_is_daemon_socket() {
        assert_eq!(Endpoint::platform_default(), Endpoint::Unix(PathBuf::from(DEFAULT_SOCKET_PATH)));
        assert_eq!(Endpoint::platform_default().to_string(), "unix:/var/run/usbmuxd");
    }

    #[test]
    fn test_connect_missing_unix_path() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::Unix(dir.path().join("missing.sock"));

        assert!(matches!(Connection::open(&endpoint, 1), Err(MuxError::Connect { .. })));
    }

    #[test]
    fn test_connect_refused_tcp() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Endpoint::Tcp { host: "127.0.0.1".to_string(), port };
        assert!(matches!(Connection::open(&endpoint, 1), Err(MuxError::Connect { .. })));
    }

    #[test]
    fn test_oversized_first_frame_is_rejected_before_reading_body() {
        let (client, mut peer) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client, 1);

        let header = FrameHeader { length: u32::MAX, version: 1, message_type: 8, tag: 0 };
        let mut buf = bytes::BytesMut::new();
        header.encode(&mut buf);
        peer.write_all(&buf).unwrap();

        match conn.receive_message() {
            Err(MuxError::Receive(e)) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidData),
            other => panic!("expected Receive error, got {other:?}"),
        }
        assert!(conn.is_closed());
    }

    #[test]
    fn test_oversized_short_frame_is_rejected() {
        let (client, mut peer) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client, 1);

        let first = encode_frame(
            FrameState::AwaitingFirstFrame,
            PLIST_MESSAGE_TYPE,
            0,
            &encode_payload(&payload("Result")).unwrap(),
        )
        .unwrap();
        peer.write_all(&first).unwrap();
        peer.write_all(&0xFFFF_FFFFu32.to_be_bytes()).unwrap();

        assert_eq!(conn.receive_message().unwrap(), payload("Result"));
        assert!(matches!(conn.receive_message(), Err(MuxError::Receive(_))));
        assert!(conn.is_closed());
        assert!(matches!(conn.send_message(&payload("Late")), Err(MuxError::UseAfterClose)));
    }

    fn dictionary() -> impl Strategy<Value = plist::Dictionary> {
        let value = prop_oneof![
            "[ -~]{0,32}".prop_map(plist::Value::from),
            any::<u32>().prop_map(|n| plist::Value::from(u64::from(n))),
            any::<bool>().prop_map(plist::Value::from),
        ];
        prop::collection::btree_map("[A-Za-z][A-Za-z0-9]{0,15}", value, 0..8).prop_map(|entries| {
            let mut dict = plist::Dictionary::new();
            for (key, value) in entries {
                dict.insert(key, value);
            }
            dict
        })
    }

    proptest! {
        #[test]
        fn test_messages_roundtrip_between_connections(
            tag in any::<u32>(),
            messages in prop::collection::vec(dictionary(), 1..5),
        ) {
            let (a, b) = UnixStream::pair().unwrap();
            let mut sender = Connection::from_stream(a, tag);
            let mut receiver = Connection::from_stream(b, 0);

            for message in &messages {
                sender.send_message(message).unwrap();
            }
            for message in &messages {
                prop_assert_eq!(&receiver.receive_message().unwrap(), message);
            }
            prop_assert_eq!(receiver.recv_state(), FrameState::Streaming);
        }
    }
}
