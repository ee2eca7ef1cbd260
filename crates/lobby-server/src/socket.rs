//! Adapts an axum `WebSocket` to the hub's [`Frame`] transport.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use lobby_hub::Frame;

/// Split `socket` into a frame sink and a frame stream.
pub fn split(
    socket: WebSocket,
) -> (
    impl Sink<Frame, Error = axum::Error> + Unpin + Send + 'static,
    impl Stream<Item = Result<Frame, axum::Error>> + Unpin + Send + 'static,
) {
    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let stream = stream.map(|msg| msg.map(from_message));
    (sink, stream)
}

/// Outbound conversion. Text payloads that are not UTF-8 go out as binary.
pub fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(payload) => match std::str::from_utf8(&payload) {
            Ok(text) => Message::Text(text.into()),
            Err(_) => Message::Binary(payload),
        },
        Frame::Binary(payload) => Message::Binary(payload),
        Frame::Ping(payload) => Message::Ping(payload),
        Frame::Pong(payload) => Message::Pong(payload),
        Frame::Close => Message::Close(None),
    }
}

/// Inbound conversion.
pub fn from_message(msg: Message) -> Frame {
    match msg {
        Message::Text(text) => Frame::Text(Bytes::copy_from_slice(text.as_str().as_bytes())),
        Message::Binary(payload) => Frame::Binary(payload),
        Message::Ping(payload) => Frame::Ping(payload),
        Message::Pong(payload) => Frame::Pong(payload),
        Message::Close(_) => Frame::Close,
    }
}
