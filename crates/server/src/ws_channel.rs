use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tungstenite::{Message, WebSocket};

use motion_relay_core::broadcast::domain::subscriber::Subscriber;
use motion_relay_core::broadcast::infrastructure::channel_subscriber::{
    ChannelSubscriber, OutboundFrames,
};
use motion_relay_core::pipeline::stream_session::{Chunk, StreamChannel, TransportError};

/// One upgraded WebSocket connection, seen as a [`StreamChannel`].
///
/// Each binary message is one complete frame. Frames published to this
/// connection's viewer wait in a bounded queue and are written out whenever
/// the session asks for input or the read poll times out. A connection that
/// has written nothing for the keep-alive interval gets a ping.
pub struct WebSocketChannel {
    ws: WebSocket<TcpStream>,
    subscriber: Arc<ChannelSubscriber>,
    outbound: OutboundFrames,
    keep_alive: Option<Duration>,
    last_write: Instant,
    closed: bool,
}

impl WebSocketChannel {
    pub fn new(
        ws: WebSocket<TcpStream>,
        queue: usize,
        poll_interval: Duration,
    ) -> Result<Self, TransportError> {
        ws.get_ref().set_read_timeout(Some(poll_interval))?;
        let (subscriber, outbound) = ChannelSubscriber::new(queue);
        Ok(Self {
            ws,
            subscriber: Arc::new(subscriber),
            outbound,
            keep_alive: None,
            last_write: Instant::now(),
            closed: false,
        })
    }

    pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval;
        self
    }

    fn flush_outbound(&mut self) -> Result<(), TransportError> {
        while let Some(frame) = self.outbound.try_next() {
            self.ws
                .write(Message::binary(frame.to_vec()))
                .map_err(to_transport_error)?;
            self.last_write = Instant::now();
        }
        if self
            .keep_alive
            .is_some_and(|interval| self.last_write.elapsed() >= interval)
        {
            self.ws
                .write(Message::Ping(Vec::new().into()))
                .map_err(to_transport_error)?;
            self.last_write = Instant::now();
        }
        match self.ws.flush() {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::Io(e)) if is_timeout(&e) => Ok(()),
            Err(e) => Err(to_transport_error(e)),
        }
    }
}

impl StreamChannel for WebSocketChannel {
    fn receive(&mut self) -> Result<Chunk, TransportError> {
        loop {
            self.flush_outbound()?;
            match self.ws.read() {
                Ok(Message::Binary(bytes)) => {
                    return Ok(Chunk::Data {
                        bytes: bytes.to_vec(),
                        end_of_message: true,
                    })
                }
                Ok(Message::Close(_)) => return Ok(Chunk::Close),
                // Pings are answered by tungstenite on the next flush.
                Ok(Message::Text(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(tungstenite::Error::Io(e)) if is_timeout(&e) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Ok(Chunk::Close)
                }
                Err(e) => return Err(to_transport_error(e)),
            }
        }
    }

    fn subscriber(&self) -> Arc<dyn Subscriber> {
        self.subscriber.clone()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.outbound.close();
        if let Err(e) = self.ws.close(None).and_then(|()| self.ws.flush()) {
            log::debug!("Close handshake incomplete: {e}");
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn to_transport_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::Io(io) => TransportError::Io(io),
        tungstenite::Error::Protocol(
            tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
        ) => TransportError::Reset,
        other => TransportError::Protocol(other.to_string()),
    }
}
