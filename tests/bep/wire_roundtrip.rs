//! Round-trips whole messages through the frame layer and the
//! parser/serializer pair, the way a peer connection actually uses them.

use syncspirit::bep::message::{Message, ResponseCode};
use syncspirit::bep::{frame, parser, serializer, BepError};

#[tokio::test]
async fn hello_and_a_request_survive_a_framed_round_trip_over_a_pipe() {
    let (mut client, mut server) = tokio::io::duplex(8192);

    let hello = Message::Hello {
        device_name: "desktop".into(),
        client_name: "syncspirit".into(),
        client_version: "0.0.0".into(),
    };
    let hello_body = serializer::message(&hello).unwrap();

    let request = Message::Request {
        id: 42,
        folder: "docs".into(),
        name: "report.pdf".into(),
        offset: 0,
        size: 4096,
        hash: [7u8; 32],
        from_temporary: false,
        weak_hash: 0xdead_beef,
    };
    let request_body = serializer::message(&request).unwrap();
    let request_tag = request.tag();

    let writer = tokio::spawn(async move {
        frame::write_hello(&mut client, &hello_body).await.unwrap();
        frame::write_frame(&mut client, request_tag, false, &request_body).await.unwrap();
        client
    });

    let read_hello_body = frame::read_hello(&mut server).await.unwrap();
    let parsed_hello = parser::message(0, &read_hello_body).unwrap();
    assert_eq!(parsed_hello, hello);

    let (tag, compressed, payload) = frame::read_frame(&mut server).await.unwrap();
    assert!(!compressed);
    let parsed_request = parser::message(tag, &payload).unwrap();
    assert_eq!(parsed_request, request);

    writer.await.unwrap();
}

#[test]
fn response_code_and_close_reason_round_trip_through_the_serializer() {
    let response = Message::Response { id: 9, data: vec![1, 2, 3], code: ResponseCode::NoSuchFile };
    let body = serializer::message(&response).unwrap();
    assert_eq!(parser::message(response.tag(), &body).unwrap(), response);

    let close = Message::Close { reason: "shutting down".into() };
    let body = serializer::message(&close).unwrap();
    assert_eq!(parser::message(close.tag(), &body).unwrap(), close);
}

#[test]
fn an_unknown_message_tag_is_rejected_rather_than_misparsed() {
    let err = parser::message(200, &[]).unwrap_err();
    assert_eq!(err, BepError::UnknownMessageType(200));
}

#[tokio::test]
async fn a_frame_header_claiming_an_implausible_length_is_rejected() {
    use tokio::io::AsyncWriteExt;
    let (mut client, mut server) = tokio::io::duplex(64);
    tokio::spawn(async move {
        client.write_u32(1).await.unwrap();
        client.write_u8(0).await.unwrap();
    });
    let err = frame::read_frame(&mut server).await.unwrap_err();
    assert!(matches!(err, BepError::Malformed(_)));
}
