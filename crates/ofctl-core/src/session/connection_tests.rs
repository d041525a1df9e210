// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

    use super::*;
    use crate::protocol::{MultipartReply, PortNumber};

    const V10: ProtocolVersion = ProtocolVersion::V_1_0;
    const V13: ProtocolVersion = ProtocolVersion::V_1_3;

    fn supported() -> VersionSet {
        [V10, V13].into_iter().collect()
    }

    fn make_conn(now: Instant) -> Connection {
        Connection::new(
            7,
            "10.0.0.5:40001".parse().unwrap(),
            supported(),
            Duration::from_millis(200),
            LivenessConfig::default(),
            now,
        )
    }

    fn hello(version: ProtocolVersion, bitmap: &[ProtocolVersion]) -> Message {
        MessageBuilder::new(
            version,
            MessageBody::Hello(Hello {
                bitmap: bitmap.to_vec(),
            }),
        )
        .build()
    }

    fn features(version: ProtocolVersion, dpid: u64, aux_id: u8) -> Message {
        let ports = if version == V10 {
            vec![PortDesc {
                port_no: 1,
                name: "eth1".into(),
                ..Default::default()
            }]
        } else {
            Vec::new()
        };
        MessageBuilder::new(
            version,
            MessageBody::FeaturesReply(Features {
                dpid: DataPathId::from(dpid),
                num_buffers: 256,
                num_tables: 4,
                aux_id,
                capabilities: 0,
                ports,
            }),
        )
        .build()
    }

    fn mp_reply(version: ProtocolVersion, xid: u32, more: bool, body: MultipartReplyBody) -> Message {
        let mp_type = match &body {
            MultipartReplyBody::Desc(_) => MultipartType::Desc,
            MultipartReplyBody::PortDesc(_) => MultipartType::PortDesc,
            MultipartReplyBody::TableFeatures(_) => MultipartType::TableFeatures,
            MultipartReplyBody::PortStats(_) => MultipartType::PortStats,
            MultipartReplyBody::Raw(_) => MultipartType::Flow,
        };
        MessageBuilder::new(
            version,
            MessageBody::MultipartReply(MultipartReply {
                mp_type,
                more,
                body,
            }),
        )
        .xid(xid)
        .build()
    }

    fn error_reply(version: ProtocolVersion, xid: u32) -> Message {
        MessageBuilder::new(
            version,
            MessageBody::Error(ErrorBody::new(
                ErrorBody::BAD_REQUEST,
                ErrorBody::BAD_REQUEST_BAD_STAT,
                Vec::new(),
            )),
        )
        .xid(xid)
        .build()
    }

    /// Drives a fresh connection to BASIC_DONE and starts the extended
    /// handshake; returns the xid of each multipart request.
    fn to_extended(conn: &mut Connection, now: Instant) -> HashMap<MultipartType, u32> {
        conn.process_message(hello(V13, &[V13]), now).unwrap();
        conn.take_outbox();
        assert_eq!(
            conn.process_message(features(V13, 0x2a, 0), now).unwrap(),
            Step::BasicDone
        );
        conn.start_extended();
        conn.take_outbox()
            .into_iter()
            .map(|m| (m.multipart_type().unwrap(), m.xid()))
            .collect()
    }

    #[test]
    fn test_state_display_and_queries() {
        assert_eq!(HandshakeState::FeaturesPending.to_string(), "FEATURES_PENDING");
        assert!(HandshakeState::ExtendedPending.basic_done());
        assert!(!HandshakeState::FeaturesPending.basic_done());
        assert!(HandshakeState::Ready.is_ready());
    }

    #[test]
    fn test_new_connection() {
        let conn = make_conn(Instant::now());
        assert_eq!(conn.state(), HandshakeState::Accepted);
        assert!(conn.is_main());
        assert!(conn.dpid().is_none());
        assert!(!conn.hello_sent());
        assert!(!conn.has_outbound());
    }

    #[test]
    fn test_peer_hello_1_3_answered_with_bitmap() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        let peer = hello(V13, &[V13]);
        let peer_xid = peer.xid();

        assert_eq!(conn.process_message(peer, now).unwrap(), Step::Consumed);
        let out = conn.take_outbox();
        assert_eq!(out.len(), 2);

        assert_eq!(out[0].msg_type(), MessageType::Hello);
        assert_eq!(out[0].version(), V13);
        assert_eq!(out[0].xid(), peer_xid);
        match out[0].body() {
            MessageBody::Hello(h) => assert_eq!(h.bitmap, vec![V10, V13]),
            other => panic!("unexpected body {:?}", other),
        }

        assert_eq!(out[1].msg_type(), MessageType::FeaturesRequest);
        assert_eq!(out[1].version(), V13);
        assert_eq!(conn.negotiated(), Some(V13));
        assert_eq!(conn.state(), HandshakeState::FeaturesPending);
    }

    #[test]
    fn test_peer_hello_1_0_gets_copy() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        let peer = hello(V10, &[]);
        let peer_xid = peer.xid();

        conn.process_message(peer, now).unwrap();
        let out = conn.take_outbox();
        assert_eq!(out[0].version(), V10);
        assert_eq!(out[0].xid(), peer_xid);
        assert_eq!(out[0].body(), &MessageBody::Hello(Hello::default()));
        assert_eq!(out[1].version(), V10);
        assert_eq!(conn.negotiated(), Some(V10));
    }

    #[test]
    fn test_negotiation_failure_sends_error_and_revokes() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        let peer = hello(ProtocolVersion::from_wire(0x98), &[]);

        let step = conn.process_message(peer, now).unwrap();
        assert!(matches!(step, Step::Revoke(_)));
        assert!(conn.is_revoked());

        let out = conn.take_outbox();
        let error = out.last().unwrap();
        assert_eq!(error.version(), ProtocolVersion::from_wire(0x98));
        match error.body() {
            MessageBody::Error(e) => {
                assert_eq!(e.err_type, ErrorBody::HELLO_FAILED);
                assert_eq!(e.code, ErrorBody::HELLO_FAILED_INCOMPATIBLE);
            }
            other => panic!("unexpected body {:?}", other),
        }

        // revoked connections ignore further traffic
        assert_eq!(
            conn.process_message(features(V13, 1, 0), now).unwrap(),
            Step::Consumed
        );
        assert!(conn.dpid().is_none());
    }

    #[test]
    fn test_grace_timer_sends_controller_hello() {
        let start = Instant::now();
        let mut conn = make_conn(start);

        assert!(!conn.poll_hello_timer(start + Duration::from_millis(100)));
        assert!(conn.poll_hello_timer(start + Duration::from_millis(200)));
        let out = conn.take_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].version(), V13);
        assert_eq!(out[0].xid(), 0);
        assert!(conn.hello_sent());

        // fires once only
        assert!(!conn.poll_hello_timer(start + Duration::from_secs(1)));

        // the late peer HELLO negotiates without a second HELLO from us
        conn.process_message(hello(V13, &[V13]), start + Duration::from_millis(300))
            .unwrap();
        let out = conn.take_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].msg_type(), MessageType::FeaturesRequest);
    }

    #[test]
    fn test_peer_hello_cancels_grace_timer() {
        let start = Instant::now();
        let mut conn = make_conn(start);
        conn.process_message(hello(V13, &[V13]), start).unwrap();
        conn.take_outbox();
        assert!(!conn.poll_hello_timer(start + Duration::from_secs(1)));
        assert!(!conn.has_outbound());
    }

    #[test]
    fn test_duplicate_hello_is_violation() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        conn.process_message(hello(V13, &[V13]), now).unwrap();
        let err = conn.process_message(hello(V13, &[V13]), now).unwrap_err();
        assert!(matches!(err, OfError::Protocol(_)));
    }

    #[test]
    fn test_duplicate_features_is_violation() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        conn.process_message(hello(V13, &[V13]), now).unwrap();
        conn.process_message(features(V13, 5, 0), now).unwrap();
        let err = conn.process_message(features(V13, 5, 0), now).unwrap_err();
        assert!(matches!(err, OfError::Protocol(_)));
    }

    #[test]
    fn test_traffic_before_negotiation_dropped() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        assert_eq!(
            conn.process_message(features(V13, 5, 0), now).unwrap(),
            Step::Consumed
        );
        assert!(conn.dpid().is_none());
    }

    #[test]
    fn test_error_before_basic_done_revokes() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        conn.process_message(hello(V13, &[V13]), now).unwrap();
        let step = conn.process_message(error_reply(V13, 99), now).unwrap();
        assert!(matches!(step, Step::Revoke(_)));
    }

    #[test]
    fn test_aux_connection_ready_at_basic_done() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        conn.process_message(hello(V13, &[V13]), now).unwrap();
        let step = conn.process_message(features(V13, 0x2a, 2), now).unwrap();
        assert_eq!(step, Step::BasicDone);
        assert!(!conn.is_main());
        assert!(conn.full_handshake_done());

        // no extended handshake for aux channels
        conn.start_extended();
        assert!(conn.take_outbox().is_empty());
    }

    #[test]
    fn test_extended_handshake_1_3() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        let xids = to_extended(&mut conn, now);
        assert_eq!(xids.len(), 3);
        assert_eq!(conn.state(), HandshakeState::ExtendedPending);

        let desc = DeviceDescription {
            mfr_desc: "Acme".into(),
            ..Default::default()
        };
        let step = conn
            .process_message(
                mp_reply(V13, xids[&MultipartType::Desc], false, MultipartReplyBody::Desc(desc)),
                now,
            )
            .unwrap();
        assert_eq!(step, Step::Consumed);

        // port desc arrives in two fragments
        let port = |n| PortDesc {
            port_no: n,
            ..Default::default()
        };
        let pd_xid = xids[&MultipartType::PortDesc];
        conn.process_message(
            mp_reply(V13, pd_xid, true, MultipartReplyBody::PortDesc(vec![port(1), port(2)])),
            now,
        )
        .unwrap();
        assert_eq!(conn.state(), HandshakeState::ExtendedPending);
        conn.process_message(
            mp_reply(V13, pd_xid, false, MultipartReplyBody::PortDesc(vec![port(3)])),
            now,
        )
        .unwrap();

        let tf = TableFeatures {
            table_id: 0,
            name: "t0".into(),
            ..Default::default()
        };
        let step = conn
            .process_message(
                mp_reply(
                    V13,
                    xids[&MultipartType::TableFeatures],
                    false,
                    MultipartReplyBody::TableFeatures(vec![tf]),
                ),
                now,
            )
            .unwrap();
        assert_eq!(step, Step::ExtendedDone);
        assert!(conn.full_handshake_done());
        assert_eq!(conn.description().unwrap().mfr_desc, "Acme");
        let numbers: Vec<PortNumber> = conn.ports().iter().map(PortDesc::number).collect();
        assert_eq!(numbers, vec![PortNumber(1), PortNumber(2), PortNumber(3)]);
        assert!(!conn.no_table_features());
    }

    #[test]
    fn test_table_features_error_tolerated() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        let xids = to_extended(&mut conn, now);

        conn.process_message(
            mp_reply(
                V13,
                xids[&MultipartType::Desc],
                false,
                MultipartReplyBody::Desc(DeviceDescription::default()),
            ),
            now,
        )
        .unwrap();
        conn.process_message(
            mp_reply(V13, xids[&MultipartType::PortDesc], false, MultipartReplyBody::PortDesc(vec![])),
            now,
        )
        .unwrap();
        let step = conn
            .process_message(error_reply(V13, xids[&MultipartType::TableFeatures]), now)
            .unwrap();
        assert_eq!(step, Step::ExtendedDone);
        assert!(conn.no_table_features());
    }

    #[test]
    fn test_empty_table_features_sets_flag() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        let xids = to_extended(&mut conn, now);
        conn.process_message(
            mp_reply(
                V13,
                xids[&MultipartType::TableFeatures],
                false,
                MultipartReplyBody::TableFeatures(Vec::new()),
            ),
            now,
        )
        .unwrap();
        assert!(conn.no_table_features());
        assert_eq!(conn.state(), HandshakeState::ExtendedPending);
    }

    #[test]
    fn test_desc_error_is_fatal() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        let xids = to_extended(&mut conn, now);
        let step = conn
            .process_message(error_reply(V13, xids[&MultipartType::Desc]), now)
            .unwrap();
        assert!(matches!(step, Step::Revoke(_)));
        assert!(conn.is_revoked());
    }

    #[test]
    fn test_port_desc_error_is_fatal() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        let xids = to_extended(&mut conn, now);
        let step = conn
            .process_message(error_reply(V13, xids[&MultipartType::PortDesc]), now)
            .unwrap();
        assert!(matches!(step, Step::Revoke(_)));
    }

    #[test]
    fn test_unknown_xid_error_ignored() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        to_extended(&mut conn, now);
        let step = conn.process_message(error_reply(V13, 0x7fff_fff0), now).unwrap();
        assert_eq!(step, Step::Consumed);
        assert_eq!(conn.state(), HandshakeState::ExtendedPending);
    }

    #[test]
    fn test_unrequested_replies_do_not_complete_handshake() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        let xids = to_extended(&mut conn, now);
        let desc = |mfr: &str| {
            MultipartReplyBody::Desc(DeviceDescription {
                mfr_desc: mfr.into(),
                ..Default::default()
            })
        };

        conn.process_message(mp_reply(V13, xids[&MultipartType::Desc], false, desc("Acme")), now)
            .unwrap();
        // repeated and unknown xids are ignored
        for xid in [xids[&MultipartType::Desc], 0xdead, 0xbeef] {
            let step = conn.process_message(mp_reply(V13, xid, false, desc("Rogue")), now).unwrap();
            assert_eq!(step, Step::Consumed);
        }
        // right xid, wrong multipart type
        let step = conn
            .process_message(
                mp_reply(V13, xids[&MultipartType::PortDesc], false, desc("Rogue")),
                now,
            )
            .unwrap();
        assert_eq!(step, Step::Consumed);
        assert_eq!(conn.state(), HandshakeState::ExtendedPending);
        assert_eq!(conn.description().unwrap().mfr_desc, "Acme");

        conn.process_message(
            mp_reply(V13, xids[&MultipartType::PortDesc], false, MultipartReplyBody::PortDesc(vec![])),
            now,
        )
        .unwrap();
        assert_eq!(conn.state(), HandshakeState::ExtendedPending);
        let step = conn
            .process_message(
                mp_reply(
                    V13,
                    xids[&MultipartType::TableFeatures],
                    false,
                    MultipartReplyBody::TableFeatures(vec![TableFeatures::default()]),
                ),
                now,
            )
            .unwrap();
        assert_eq!(step, Step::ExtendedDone);
    }

    #[test]
    fn test_extended_handshake_1_0_desc_only() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        conn.process_message(hello(V10, &[]), now).unwrap();
        conn.process_message(features(V10, 9, 0), now).unwrap();
        assert_eq!(conn.ports().len(), 1);

        conn.take_outbox();
        conn.start_extended();
        let out = conn.take_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].multipart_type(), Some(MultipartType::Desc));

        let step = conn
            .process_message(
                mp_reply(V10, out[0].xid(), false, MultipartReplyBody::Desc(Default::default())),
                now,
            )
            .unwrap();
        assert_eq!(step, Step::ExtendedDone);
    }

    #[test]
    fn test_echo_request_answered_in_any_phase() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        conn.process_message(hello(V13, &[V13]), now).unwrap();
        conn.take_outbox();

        let echo = MessageBuilder::new(V13, MessageBody::EchoRequest(vec![1, 2, 3]))
            .xid(55)
            .build();
        assert_eq!(conn.process_message(echo, now).unwrap(), Step::Consumed);
        let out = conn.take_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].xid(), 55);
        assert_eq!(out[0].body(), &MessageBody::EchoReply(vec![1, 2, 3]));
    }

    #[test]
    fn test_post_handshake_messages_delivered() {
        let now = Instant::now();
        let mut conn = make_conn(now);
        conn.process_message(hello(V13, &[V13]), now).unwrap();
        conn.process_message(features(V13, 3, 1), now).unwrap();

        let reply = MessageBuilder::new(V13, MessageBody::EchoReply(Vec::new())).build();
        assert!(matches!(
            conn.process_message(reply, now).unwrap(),
            Step::Deliver(_)
        ));
        let barrier = MessageBuilder::new(V13, MessageBody::BarrierReply).build();
        assert!(matches!(
            conn.process_message(barrier, now).unwrap(),
            Step::Deliver(_)
        ));
    }

    #[test]
    fn test_liveness_echoes_then_gives_up() {
        let start = Instant::now();
        let mut conn = make_conn(start);
        conn.process_message(hello(V13, &[V13]), start).unwrap();
        conn.take_outbox();

        let l = LivenessConfig::default();
        assert!(conn.check_liveness(start + Duration::from_millis(100)));
        assert!(!conn.has_outbound());

        let mut now = start + l.max_idle;
        for _ in 0..l.max_echo_attempts {
            assert!(conn.check_liveness(now));
            let out = conn.take_outbox();
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].msg_type(), MessageType::EchoRequest);

            // inside the wait window nothing more is sent
            assert!(conn.check_liveness(now + Duration::from_millis(1)));
            assert!(!conn.has_outbound());
            now += l.max_echo_wait;
        }
        assert!(!conn.check_liveness(now));
    }

    #[test]
    fn test_any_traffic_resets_liveness() {
        let start = Instant::now();
        let mut conn = make_conn(start);
        conn.process_message(hello(V13, &[V13]), start).unwrap();
        conn.take_outbox();

        let later = start + Duration::from_secs(6);
        assert!(conn.check_liveness(later));
        assert_eq!(conn.take_outbox().len(), 1);

        let reply = MessageBuilder::new(V13, MessageBody::EchoReply(Vec::new())).build();
        conn.process_message(reply, later).unwrap();
        assert_eq!(conn.last_message_at(), later);
        assert!(conn.check_liveness(later + Duration::from_secs(1)));
        assert!(!conn.has_outbound());
    }

    #[test]
    fn test_liveness_before_negotiation_sends_nothing() {
        let start = Instant::now();
        let mut conn = make_conn(start);
        let l = LivenessConfig::default();
        let mut now = start + l.max_idle;
        for _ in 0..l.max_echo_attempts {
            assert!(conn.check_liveness(now));
            now += l.max_echo_wait;
        }
        assert!(conn.take_outbox().is_empty());
        assert!(!conn.check_liveness(now));
    }

    #[test]
    fn test_display() {
        let conn = make_conn(Instant::now());
        assert_eq!(conn.to_string(), "{OfConn:10.0.0.5:40001}");
    }
