//! Deadline-bounded framed socket.
//!
//! A [`Connection`] wraps any sink/stream pair of [`Frame`]s. The HTTP layer
//! builds one from an axum WebSocket; tests build one from in-memory channels.
//! Every write must finish within `write_wait`. Every `receive` must see a
//! data frame within `pong_wait`, and the deadline is pushed back whenever a
//! pong arrives. Pings are answered here unless the transport already does
//! it, as the axum WebSocket does.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Operating over closed connection")]
    Closed,

    #[error("Connection deadline exceeded")]
    DeadlineExceeded,

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Closed sockets and missed deadlines end a session without being
    /// reported as failures.
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionError::Closed | ConnectionError::DeadlineExceeded)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub max_frame_size: usize,
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ConnectionError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ConnectionError>> + Send>>;

pub struct Connection {
    writer: Mutex<FrameSink>,
    reader: Mutex<FrameStream>,
    closed: AtomicBool,
    limits: ConnectionLimits,
    reply_to_pings: bool,
}

impl Connection {
    pub fn new(writer: FrameSink, reader: FrameStream, limits: ConnectionLimits) -> Self {
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            closed: AtomicBool::new(false),
            limits,
            reply_to_pings: true,
        }
    }

    /// Leave ping replies to the transport.
    pub fn without_ping_replies(mut self) -> Self {
        self.reply_to_pings = false;
        self
    }

    /// Adapt an upgraded axum WebSocket.
    pub fn from_websocket(socket: WebSocket, limits: ConnectionLimits) -> Self {
        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(|e| ConnectionError::Transport(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, ConnectionError>(to_ws_message(frame))));

        let stream = stream.map(|msg| {
            msg.map(from_ws_message)
                .map_err(|e| ConnectionError::Transport(e.to_string()))
        });

        // tungstenite queues a pong for every ping it reads.
        Self::new(Box::pin(sink), Box::pin(stream), limits).without_ping_replies()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write one frame within the write deadline.
    pub async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.limits.write_wait, writer.send(frame)).await {
            Ok(result) => result,
            Err(_) => {
                debug!("Write deadline exceeded");
                Err(ConnectionError::DeadlineExceeded)
            }
        }
    }

    /// Wait for the next data frame or close frame.
    ///
    /// Pings are answered (when replies are enabled) and pongs only extend the
    /// read deadline, so callers never see either.
    pub async fn receive(&self) -> Result<Frame, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let mut reader = self.reader.lock().await;
        let mut deadline = Instant::now() + self.limits.pong_wait;

        loop {
            let next = match tokio::time::timeout_at(deadline, reader.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!("Read deadline exceeded");
                    return Err(ConnectionError::DeadlineExceeded);
                }
            };

            let frame = match next {
                Some(frame) => frame?,
                None => return Err(ConnectionError::Closed),
            };

            match frame {
                Frame::Ping(payload) => {
                    if self.reply_to_pings {
                        trace!("Answering ping");
                        self.send(Frame::Pong(payload)).await?;
                    }
                }
                Frame::Pong(_) => {
                    deadline = Instant::now() + self.limits.pong_wait;
                }
                Frame::Text(ref text) => {
                    self.check_size(text.len())?;
                    return Ok(frame);
                }
                Frame::Binary(ref bytes) => {
                    self.check_size(bytes.len())?;
                    return Ok(frame);
                }
                Frame::Close => return Ok(Frame::Close),
            }
        }
    }

    /// Close the underlying socket. Only the first call has an effect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = tokio::time::timeout(self.limits.write_wait, writer.close()).await {
            debug!(error = %e, "Timed out closing connection");
        }
    }

    fn check_size(&self, size: usize) -> Result<(), ConnectionError> {
        if size > self.limits.max_frame_size {
            return Err(ConnectionError::FrameTooLarge {
                size,
                max: self.limits.max_frame_size,
            });
        }
        Ok(())
    }
}

fn to_ws_message(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text),
        Frame::Binary(bytes) => WsMessage::Binary(bytes),
        Frame::Ping(payload) => WsMessage::Ping(payload),
        Frame::Pong(payload) => WsMessage::Pong(payload),
        Frame::Close => WsMessage::Close(None),
    }
}

fn from_ws_message(msg: WsMessage) -> Frame {
    match msg {
        WsMessage::Text(text) => Frame::Text(text),
        WsMessage::Binary(bytes) => Frame::Binary(bytes),
        WsMessage::Ping(payload) => Frame::Ping(payload),
        WsMessage::Pong(payload) => Frame::Pong(payload),
        WsMessage::Close(_) => Frame::Close,
    }
}
