//! Protocol layer tests: frame codec, routed message envelopes and events.

#[cfg(test)]
mod tests {
    use pagestream_protocol::*;
    use serde_json::json;

    // ─────────────────────────────────────────────────────────────────────
    // Frames
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn decode_open_frame() {
        let frame = JsonCodec.decode(r#"{"type":"open","channel":"rpc"}"#).unwrap();
        assert_eq!(frame, Frame::open("rpc"));
        assert_eq!(frame.channel(), "rpc");
    }

    #[test]
    fn decode_data_frame_from_wire_format() {
        let wire = r#"{"type":"data","channel":"rpc","payload":{"responder":"echo","body":[1,2]}}"#;
        let frame = JsonCodec.decode(wire).unwrap();
        match frame {
            Frame::Data { channel, payload } => {
                assert_eq!(channel, "rpc");
                assert_eq!(payload["responder"], "echo");
                assert_eq!(payload["body"], json!([1, 2]));
            }
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[test]
    fn decode_end_frame() {
        let frame = JsonCodec.decode(r#"{"type":"end","channel":"rpc"}"#).unwrap();
        assert_eq!(frame, Frame::end("rpc"));
    }

    #[test]
    fn encode_open_frame() {
        let text = JsonCodec.encode(&Frame::open("events")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!({"type": "open", "channel": "events"}));
    }

    #[test]
    fn decode_invalid_json_is_malformed() {
        let err = JsonCodec.decode("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn decode_missing_channel() {
        let err = JsonCodec.decode(r#"{"type":"data","payload":1}"#).unwrap_err();
        assert_eq!(err, ProtocolError::MissingChannel);
    }

    #[test]
    fn decode_non_string_channel() {
        let err = JsonCodec.decode(r#"{"type":"data","channel":7,"payload":1}"#).unwrap_err();
        assert_eq!(err, ProtocolError::MissingChannel);
    }

    #[test]
    fn decode_data_without_payload_is_malformed() {
        let err = JsonCodec.decode(r#"{"type":"data","channel":"a"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Routed messages
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn routed_message_from_envelope() {
        let msg = RoutedMessage::from_payload(
            "conn-1",
            "rpc",
            json!({"responder": "echo", "body": {"text": "hi"}}),
        )
        .unwrap();
        assert_eq!(msg.connection_id, "conn-1");
        assert_eq!(msg.channel, "rpc");
        assert_eq!(msg.responder, "echo");
        assert_eq!(msg.body["text"], "hi");
    }

    #[test]
    fn routed_message_body_defaults_to_null() {
        let msg = RoutedMessage::from_payload("c", "rpc", json!({"responder": "ping"})).unwrap();
        assert!(msg.body.is_null());
    }

    #[test]
    fn routed_message_requires_responder() {
        let err = RoutedMessage::from_payload("c", "rpc", json!({"body": 1})).unwrap_err();
        assert_eq!(err, ProtocolError::MissingResponder { channel: "rpc".into() });

        let err = RoutedMessage::from_payload("c", "rpc", json!("just a string")).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingResponder { .. }));

        let err = RoutedMessage::from_payload("c", "rpc", json!({"responder": ""})).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingResponder { .. }));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn event_kind_names() {
        assert_eq!(EventKind::ClientRegistered.name(), "clientRegistered");
        assert_eq!(EventKind::ResponderMissing.name(), "responderMissing");
        assert_eq!(EventKind::MalformedFrame.to_string(), "malformedFrame");
    }

    #[test]
    fn event_reports_its_kind() {
        let event = SystemEvent::ResponderMissing {
            responder: "rpc".into(),
            connection_id: "c".into(),
            channel: "main".into(),
        };
        assert_eq!(event.kind(), EventKind::ResponderMissing);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Errors
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn config_error_messages() {
        assert_eq!(
            ConfigError::DuplicateClient("main".into()).to_string(),
            "client already registered: main"
        );
        assert!(ConfigError::InvalidRoute("admin".into()).to_string().contains("must begin with /"));
        assert!(ConfigError::MissingRootRoute.to_string().contains("\"/\""));
    }

    #[test]
    fn client_op_error_display() {
        assert_eq!(ClientOpError::new("boom").to_string(), "boom");
    }
}
