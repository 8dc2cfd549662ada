use std::fs;
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::{HandshakeError, WebSocket};

use motion_relay_core::annotation::infrastructure::rectangle_annotator::RectangleAnnotator;
use motion_relay_core::broadcast::broadcast_hub::BroadcastHub;
use motion_relay_core::detection::domain::motion_detector::MotionDetector;
use motion_relay_core::detection::infrastructure::background_model_factory::{
    BackgroundModelProvider, WarmStart,
};
use motion_relay_core::pipeline::diagnostics::{DiagnosticHook, MaskDumpHook};
use motion_relay_core::pipeline::frame_pipeline::{FrameError, FramePipeline};
use motion_relay_core::pipeline::pipeline_logger::LogPipelineLogger;
use motion_relay_core::pipeline::stream_session::{handle_stream, SessionError};
use motion_relay_core::video::domain::frame_codec::FrameCodec;
use motion_relay_core::video::infrastructure::image_frame_codec::ImageFrameCodec;

use crate::config::ServerConfig;
use crate::ws_channel::WebSocketChannel;

const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Builds the per-connection pipeline around the right background model.
struct PipelineFactory {
    codec: Arc<dyn FrameCodec>,
    detector: MotionDetector,
    annotator: Arc<RectangleAnnotator>,
    hook: Option<Arc<dyn DiagnosticHook>>,
    models: BackgroundModelProvider,
}

impl PipelineFactory {
    fn new(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let codec: Arc<dyn FrameCodec> =
            Arc::new(ImageFrameCodec::new().with_quality(config.jpeg_quality));

        let warm = match &config.reference_image {
            Some(path) => {
                let reference = codec.decode(&fs::read(path)?)?;
                log::info!(
                    "Warm-starting from {} ({}x{}, {} iterations)",
                    path.display(),
                    reference.width(),
                    reference.height(),
                    config.warmup_iterations
                );
                Some(WarmStart {
                    reference,
                    iterations: config.warmup_iterations,
                    learning_rate: config.warmup_learning_rate,
                })
            }
            None => None,
        };

        let hook = config.dump_masks.as_ref().map(|dir| {
            log::info!("Dumping foreground masks to {}", dir.display());
            Arc::new(MaskDumpHook::new(dir)) as Arc<dyn DiagnosticHook>
        });

        Ok(Self {
            codec,
            detector: MotionDetector::new(config.motion_config()),
            annotator: Arc::new(RectangleAnnotator::default()),
            hook,
            models: BackgroundModelProvider::new(
                config.background_config(),
                config.model_sharing(),
                warm,
            )?,
        })
    }

    fn pipeline(&self) -> Result<FramePipeline, SessionError> {
        let model = self
            .models
            .model_for_session()
            .map_err(|e| SessionError::Fatal(FrameError::ModelApply(e)))?;
        let pipeline = FramePipeline::new(
            Arc::clone(&self.codec),
            model,
            self.detector.clone(),
            self.annotator.clone(),
        );
        Ok(match &self.hook {
            Some(hook) => pipeline.with_hook(Arc::clone(hook)),
            None => pipeline,
        })
    }
}

struct Context {
    config: ServerConfig,
    hub: BroadcastHub,
    pipelines: PipelineFactory,
}

/// Accepts WebSocket connections on one path and runs a session per
/// connection on its own thread.
pub struct Server {
    listener: TcpListener,
    context: Arc<Context>,
}

impl Server {
    pub fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let pipelines = PipelineFactory::new(&config)?;
        let listener = TcpListener::bind(&config.bind)?;
        log::info!(
            "Listening on ws://{}{} ({:?} model, {:?} sharing, {:?} selection)",
            listener.local_addr()?,
            config.path,
            config.model,
            config.sharing,
            config.selection
        );
        Ok(Self {
            listener,
            context: Arc::new(Context {
                config,
                hub: BroadcastHub::new(),
                pipelines,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until a session reports a fatal error, which is returned.
    pub fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let (fatal_tx, fatal_rx) = crossbeam_channel::unbounded::<SessionError>();
        self.listener.set_nonblocking(true)?;
        let poll = self.context.config.poll_interval();

        loop {
            if let Ok(fatal) = fatal_rx.try_recv() {
                return Err(fatal.into());
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    let context = Arc::clone(&self.context);
                    let fatal_tx = fatal_tx.clone();
                    thread::Builder::new()
                        .name(format!("session-{peer}"))
                        .spawn(move || {
                            if let Err(e) = serve_connection(stream, peer, &context) {
                                log::error!("Session {peer} failed: {e}");
                                let _ = fatal_tx.send(e);
                            }
                        })?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(poll),
                Err(e) => log::warn!("Accept failed: {e}"),
            }
        }
    }
}

fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: &Context,
) -> Result<(), SessionError> {
    let config = &context.config;
    let Some(ws) = upgrade(stream, peer, config) else {
        return Ok(());
    };
    let mut channel =
        match WebSocketChannel::new(ws, config.subscriber_queue, config.poll_interval()) {
            Ok(channel) => channel.with_keep_alive(config.keep_alive()),
            Err(e) => {
                log::warn!("Could not set up connection from {peer}: {e}");
                return Ok(());
            }
        };
    let pipeline = context.pipelines.pipeline()?;
    let mut logger = LogPipelineLogger::new(peer.to_string());

    let report = handle_stream(
        &mut channel,
        &pipeline,
        &context.hub,
        &mut logger,
        config.session_options(),
    )?;
    log::info!(
        "Connection from {peer} ended ({:?}), {} viewers remain",
        report.end,
        context.hub.len()
    );
    Ok(())
}

/// Runs the upgrade handshake; rejected requests get a 404 for a wrong path
/// and a 400 for anything that is not a WebSocket upgrade.
fn upgrade(
    stream: TcpStream,
    peer: SocketAddr,
    config: &ServerConfig,
) -> Option<WebSocket<TcpStream>> {
    let path = config.path.as_str();
    let mut raw = match stream.try_clone() {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!("Could not clone stream from {peer}: {e}");
            return None;
        }
    };

    let check_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() == path {
            Ok(resp)
        } else {
            let mut err = ErrorResponse::new(Some(format!("no stream at {}", req.uri().path())));
            *err.status_mut() = StatusCode::NOT_FOUND;
            Err(err)
        }
    };

    let limits = Some(config.websocket_config());
    match tungstenite::accept_hdr_with_config(stream, check_path, limits) {
        Ok(ws) => {
            log::info!("Accepted stream from {peer}");
            Some(ws)
        }
        Err(HandshakeError::Failure(tungstenite::Error::Http(resp))) => {
            log::info!("Rejected {peer} with {}", resp.status());
            None
        }
        Err(e) => {
            log::info!("Rejected {peer}: {e}");
            if let Err(e) = raw.write_all(BAD_REQUEST).and_then(|()| raw.flush()) {
                log::debug!("Could not send 400 to {peer}: {e}");
            }
            None
        }
    }
}
