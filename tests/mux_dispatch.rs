#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Dispatch-level behavior through the public API: correlation order,
//! violation policy, and the packet codec glue feeding dispatch.

use bytes::{Bytes, BytesMut};
use session_mux::core::packet::{Packet, PacketCodec};
use session_mux::protocol::message::{
    encode_channel_id, ChannelOpen, MessageType, OpenConfirmation,
};
use session_mux::{
    queue_sink, Channel, ChannelHandler, Connection, MuxConfig, MuxError,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::codec::{Decoder, Encoder};

struct Quiet;
impl ChannelHandler for Quiet {}

fn drain(rx: &mut UnboundedReceiver<Packet>) -> Vec<Packet> {
    let mut out = Vec::new();
    while let Ok(packet) = rx.try_recv() {
        out.push(packet);
    }
    out
}

#[tokio::test]
async fn ids_remain_unique_across_removal() {
    let (sink, _rx) = queue_sink();
    let mut conn = Connection::new(Arc::new(sink), MuxConfig::default());

    let a = conn.open_channel("session", Channel::default(), Quiet, &[]).unwrap();
    let b = conn.open_channel("session", Channel::default(), Quiet, &[]).unwrap();
    assert!(b > a);

    // Confirm and close `a`; the freed id is not reused.
    let confirm = OpenConfirmation {
        recipient_id: a,
        sender_id: 50,
        window_size: 10,
        max_packet: 10,
        extra: Bytes::new(),
    };
    conn.dispatch(MessageType::ChannelOpenConfirmation.as_u8(), &confirm.encode())
        .await
        .unwrap();
    conn.dispatch(MessageType::ChannelClose.as_u8(), &encode_channel_id(a))
        .await
        .unwrap();

    let c = conn.open_channel("session", Channel::default(), Quiet, &[]).unwrap();
    assert!(c > b);
    assert_eq!(conn.channel_count(), 2);
}

#[tokio::test]
async fn batched_replies_resolve_in_issue_order() {
    let (sink, _rx) = queue_sink();
    let mut conn = Connection::new(Arc::new(sink), MuxConfig::default());
    let id = conn.open_channel("session", Channel::default(), Quiet, &[]).unwrap();
    let confirm = OpenConfirmation {
        recipient_id: id,
        sender_id: 8,
        window_size: 100,
        max_packet: 10,
        extra: Bytes::new(),
    };
    conn.dispatch(MessageType::ChannelOpenConfirmation.as_u8(), &confirm.encode())
        .await
        .unwrap();

    let pending: Vec<_> = (0..4)
        .map(|i| {
            conn.send_request(id, &format!("req-{i}"), &[], true)
                .unwrap()
        })
        .collect();

    // All four replies land in one batch before anyone awaits.
    for i in 0..4u8 {
        let mut payload = encode_channel_id(id).to_vec();
        payload.push(i);
        conn.dispatch(MessageType::ChannelSuccess.as_u8(), &payload)
            .await
            .unwrap();
    }

    for (i, reply) in pending.into_iter().enumerate() {
        assert_eq!(&reply.wait().await.unwrap()[..], &[i as u8]);
    }
}

#[tokio::test]
async fn dispatch_errors_identify_the_violation() {
    let (sink, _rx) = queue_sink();
    let mut conn = Connection::new(Arc::new(sink), MuxConfig::default());

    assert!(matches!(
        conn.dispatch(MessageType::ChannelData.as_u8(), &encode_channel_id(1234))
            .await,
        // Truncated payload: data string missing entirely
        Err(MuxError::Truncated { .. })
    ));

    let mut payload = encode_channel_id(1234).to_vec();
    payload.extend_from_slice(&[0, 0, 0, 1, b'x']);
    assert!(matches!(
        conn.dispatch(MessageType::ChannelData.as_u8(), &payload).await,
        Err(MuxError::UnknownChannel(1234))
    ));

    assert!(matches!(
        conn.dispatch(7, &[]).await,
        Err(MuxError::UnsupportedMessage(7))
    ));

    assert!(matches!(
        conn.dispatch(MessageType::RequestFailure.as_u8(), &[]).await,
        Err(MuxError::ProtocolViolation(_))
    ));
}

#[tokio::test]
async fn packets_flow_from_codec_into_dispatch() {
    let (sink, mut rx) = queue_sink();
    let mut conn = Connection::new(Arc::new(sink), MuxConfig::default());
    conn.registry_mut().register_channel_type(
        "session",
        |_ctx: session_mux::protocol::dispatcher::OpenContext<'_>,
         _open: &ChannelOpen| {
            Ok((
                Channel::default(),
                Box::new(Quiet) as Box<dyn ChannelHandler>,
            ))
        },
    );

    // Peer's CHANNEL_OPEN arrives through the length-prefixed codec.
    let open = ChannelOpen {
        channel_type: "session".to_string(),
        sender_id: 1,
        window_size: 256,
        max_packet: 64,
        extra: Bytes::new(),
    };
    let mut codec = PacketCodec;
    let mut wire = BytesMut::new();
    codec
        .encode(
            Packet::new(MessageType::ChannelOpen.as_u8(), open.encode()),
            &mut wire,
        )
        .unwrap();

    let packet = codec.decode(&mut wire).unwrap().unwrap();
    conn.dispatch_packet(&packet).await.unwrap();

    assert_eq!(conn.channel_count(), 1);
    let reply = drain(&mut rx);
    assert_eq!(
        reply[0].msg_type,
        MessageType::ChannelOpenConfirmation.as_u8()
    );
}

#[tokio::test]
async fn open_failure_reaches_only_its_channel() {
    let (sink, _rx) = queue_sink();
    let mut conn = Connection::new(Arc::new(sink), MuxConfig::default());
    let doomed = conn.open_channel("session", Channel::default(), Quiet, &[]).unwrap();
    let healthy = conn.open_channel("session", Channel::default(), Quiet, &[]).unwrap();

    let failure = session_mux::protocol::message::OpenFailure::new(
        doomed,
        session_mux::OpenFailureReason::ResourceShortage,
        "out of channels",
    );
    conn.dispatch(MessageType::ChannelOpenFailure.as_u8(), &failure.encode())
        .await
        .unwrap();

    // Partial failure: the sibling channel is untouched.
    assert!(conn.channel(doomed).is_none());
    assert!(conn.channel(healthy).is_some());
}
