use std::mem;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::broadcast::broadcast_hub::BroadcastHub;
use crate::broadcast::domain::subscriber::{Subscriber, SubscriberId};
use crate::pipeline::frame_pipeline::{FrameError, FramePipeline};
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::shared::constants::DEFAULT_MAX_MESSAGE_BYTES;

/// One read from the inbound side of a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    Data { bytes: Vec<u8>, end_of_message: bool },
    Close,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed without a close frame")]
    Reset,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Duplex connection as seen by a session.
///
/// The transport implements this after the upgrade handshake; the session
/// only reads chunks and hands out the outbound side as a [`Subscriber`].
pub trait StreamChannel: Send {
    /// Blocks until the next chunk, a close, or a transport failure.
    fn receive(&mut self) -> Result<Chunk, TransportError>;

    fn subscriber(&self) -> Arc<dyn Subscriber>;

    /// Finishes the close handshake. Called exactly once per session.
    fn close(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    ReceivingChunks,
    FrameReady,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub max_message_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    PeerClosed,
    TransportFailed(String),
    Fatal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub received: usize,
    pub published: usize,
    pub dropped: usize,
    pub end: SessionEnd,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("fatal pipeline failure: {0}")]
    Fatal(FrameError),
}

/// What the session should do after a chunk.
#[derive(Debug)]
pub enum Step {
    /// Keep reading; the message is incomplete or being discarded.
    Pending,
    /// A full message is buffered and the session is in `FrameReady`.
    Frame { index: usize, bytes: Vec<u8> },
    /// The message was rejected before processing.
    Dropped(FrameError),
    /// The peer asked to close.
    Closed,
}

/// Reassembly and lifecycle state of one inbound connection.
///
/// Owns its receive buffer; nothing here is shared with other sessions.
pub struct StreamSession {
    state: SessionState,
    options: SessionOptions,
    buffer: Vec<u8>,
    discarding: bool,
    next_index: usize,
    subscriber: Option<SubscriberId>,
    received: usize,
    published: usize,
    dropped: usize,
}

impl StreamSession {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            state: SessionState::Open,
            options,
            buffer: Vec::new(),
            discarding: false,
            next_index: 0,
            subscriber: None,
            received: 0,
            published: 0,
            dropped: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscriber_id(&self) -> Option<SubscriberId> {
        self.subscriber
    }

    /// Registers this session's viewer and starts receiving.
    pub fn open(&mut self, hub: &BroadcastHub, subscriber: Arc<dyn Subscriber>) {
        if self.state != SessionState::Open {
            return;
        }
        self.subscriber = Some(hub.join(subscriber));
        self.state = SessionState::ReceivingChunks;
    }

    /// A close message ends the session from any state; data is only taken
    /// while `ReceivingChunks`.
    pub fn accept(&mut self, chunk: Chunk) -> Step {
        let (bytes, end_of_message) = match chunk {
            Chunk::Close => {
                if !self.buffer.is_empty() {
                    log::debug!(
                        "Discarding {} buffered bytes of an unfinished message",
                        self.buffer.len()
                    );
                }
                self.buffer.clear();
                return Step::Closed;
            }
            _ if self.state == SessionState::Closed => return Step::Closed,
            _ if self.state != SessionState::ReceivingChunks => return Step::Pending,
            Chunk::Data {
                bytes,
                end_of_message,
            } => (bytes, end_of_message),
        };

        if self.discarding {
            self.discarding = !end_of_message;
            return Step::Pending;
        }

        let size = self.buffer.len() + bytes.len();
        if size > self.options.max_message_bytes {
            self.buffer = Vec::new();
            self.discarding = !end_of_message;
            self.received += 1;
            self.dropped += 1;
            return Step::Dropped(FrameError::Oversized {
                size,
                limit: self.options.max_message_bytes,
            });
        }

        self.buffer.extend_from_slice(&bytes);
        if !end_of_message {
            return Step::Pending;
        }

        self.received += 1;
        self.state = SessionState::FrameReady;
        let index = self.next_index;
        self.next_index += 1;
        Step::Frame {
            index,
            bytes: mem::take(&mut self.buffer),
        }
    }

    /// Leaves `FrameReady` after the pipeline ran, whatever its outcome.
    pub fn frame_done(&mut self, published: bool) {
        if self.state != SessionState::FrameReady {
            return;
        }
        if published {
            self.published += 1;
        } else {
            self.dropped += 1;
        }
        self.state = SessionState::ReceivingChunks;
    }

    /// Leaves the hub and closes the channel. Idempotent.
    pub fn close(&mut self, hub: &BroadcastHub, channel: &mut dyn StreamChannel) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(id) = self.subscriber.take() {
            hub.leave(id);
        }
        self.buffer = Vec::new();
        self.state = SessionState::Closed;
        channel.close();
    }

    pub fn report(&self, end: SessionEnd) -> SessionReport {
        SessionReport {
            received: self.received,
            published: self.published,
            dropped: self.dropped,
            end,
        }
    }
}

/// Entry point the transport calls after the upgrade handshake.
///
/// Runs until the peer closes or the channel fails. Per-frame failures are
/// logged and skipped; only a fatal pipeline error is returned, after the
/// session has left the hub.
pub fn handle_stream(
    channel: &mut dyn StreamChannel,
    pipeline: &FramePipeline,
    hub: &BroadcastHub,
    logger: &mut dyn PipelineLogger,
    options: SessionOptions,
) -> Result<SessionReport, SessionError> {
    let mut session = StreamSession::new(options);
    session.open(hub, channel.subscriber());
    logger.info("Session opened");

    let end = loop {
        let chunk = match channel.receive() {
            Ok(chunk) => chunk,
            Err(e) => {
                log::warn!("Stream transport failed: {e}");
                break SessionEnd::TransportFailed(e.to_string());
            }
        };

        match session.accept(chunk) {
            Step::Pending => {}
            Step::Closed => break SessionEnd::PeerClosed,
            Step::Dropped(e) => {
                log::warn!("Dropped message: {e}");
                logger.frame_completed();
            }
            Step::Frame { index, bytes } => {
                let published = match pipeline.process(&bytes, index, logger) {
                    Ok(processed) => {
                        let start = Instant::now();
                        let report = hub.publish(Arc::from(processed.encoded));
                        logger.timing("publish", start.elapsed().as_secs_f64() * 1000.0);
                        logger.metric("subscribers", report.delivered as f64);
                        log::debug!(
                            "Frame {index}: {} regions, delivered to {} (skipped {}, removed {})",
                            processed.regions.len(),
                            report.delivered,
                            report.skipped,
                            report.removed
                        );
                        true
                    }
                    Err(e) if e.is_fatal() => {
                        log::error!("Frame {index}: {e}");
                        session.close(hub, channel);
                        logger.summary();
                        return Err(SessionError::Fatal(e));
                    }
                    Err(e) => {
                        log::warn!("Dropped frame {index}: {e}");
                        false
                    }
                };
                session.frame_done(published);
                logger.frame_completed();
            }
        }
    };

    session.close(hub, channel);
    let report = session.report(end);
    logger.info(&format!(
        "Session closed ({:?}): {} received, {} published, {} dropped",
        report.end, report.received, report.published, report.dropped
    ));
    logger.summary();
    Ok(report)
}
