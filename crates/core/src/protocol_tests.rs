#[cfg(test)]
mod tests {
    use crate::protocol::*;
    use proptest::prelude::*;

    fn sample_payload() -> plist::Dictionary {
        let mut dict = plist::Dictionary::new();
        dict.insert("MessageType".to_string(), plist::Value::from("ListDevices"));
        dict.insert("kLibUSBMuxVersion".to_string(), plist::Value::from(3u64));
        dict
    }

    #[test]
    fn test_first_frame_header_layout() {
        let body = b"<plist/>";
        let frame = encode_frame(FrameState::AwaitingFirstFrame, PLIST_MESSAGE_TYPE, 5, body).unwrap();

        assert_eq!(frame.len(), FULL_HEADER_LEN + body.len());
        let header = FrameHeader::decode(&frame[..FULL_HEADER_LEN]);
        assert_eq!(header.length as usize, FULL_HEADER_LEN + body.len());
        assert_eq!(header.version, PROTOCOL_VERSION);
        assert_eq!(header.message_type, PLIST_MESSAGE_TYPE);
        assert_eq!(header.tag, 5);
        assert_eq!(&frame[FULL_HEADER_LEN..], body);
    }

    #[test]
    fn test_first_frame_is_native_endian() {
        let frame = encode_frame(FrameState::AwaitingFirstFrame, 8, 1, &[]).unwrap();
        assert_eq!(&frame[0..4], &16u32.to_ne_bytes());
        assert_eq!(&frame[4..8], &1u32.to_ne_bytes());
        assert_eq!(&frame[8..12], &8u32.to_ne_bytes());
        assert_eq!(&frame[12..16], &1u32.to_ne_bytes());
    }

    #[test]
    fn test_streaming_frame_is_big_endian_length() {
        let body = vec![0xAB; 300];
        let frame = encode_frame(FrameState::Streaming, PLIST_MESSAGE_TYPE, 9, &body).unwrap();

        assert_eq!(frame.len(), SHORT_HEADER_LEN + 300);
        assert_eq!(&frame[..4], &[0x00, 0x00, 0x01, 0x2C]);
        assert_eq!(&frame[4..], &body[..]);
    }

    #[test]
    fn test_header_length_shorter_than_header_is_rejected() {
        let header = FrameHeader { length: 4, version: 1, message_type: 8, tag: 0 };
        assert!(header.payload_len().is_err());
    }

    #[test]
    fn test_payload_roundtrip() {
        let payload = sample_payload();
        let body = encode_payload(&payload).unwrap();

        assert!(body.starts_with(b"<?xml"));
        assert_eq!(decode_payload(&body).unwrap(), payload);
    }

    #[test]
    fn test_decode_payload_rejects_non_dictionary_root() {
        let mut body = Vec::new();
        plist::Value::from("just a string").to_writer_xml(&mut body).unwrap();
        assert!(decode_payload(&body).is_err());
    }

    #[test]
    fn test_decode_payload_rejects_garbage() {
        assert!(decode_payload(b"not a plist at all").is_err());
    }

    #[test]
    fn test_payload_len_cap() {
        assert_eq!(check_payload_len(MAX_PAYLOAD_LEN).unwrap(), MAX_PAYLOAD_LEN);
        match check_payload_len(u32::MAX as usize) {
            Err(crate::error::MuxError::Receive(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::InvalidData)
            }
            other => panic!("expected Receive error, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn test_first_frame_header_roundtrip(
            message_type in any::<u32>(),
            tag in any::<u32>(),
            payload in prop::collection::vec(any::<u8>(), 0..2048),
        ) {
            let frame = encode_frame(FrameState::AwaitingFirstFrame, message_type, tag, &payload).unwrap();
            let header = FrameHeader::decode(&frame[..FULL_HEADER_LEN]);

            prop_assert_eq!(header, FrameHeader::for_payload(payload.len(), message_type, tag).unwrap());
            prop_assert_eq!(header.payload_len().unwrap(), payload.len());
            prop_assert_eq!(&frame[FULL_HEADER_LEN..], &payload[..]);
        }
    }
}
