//! Camera frames: chunk reassembly, single shots and continuous streams.
//!
//! A device sends each JPEG frame as a run of `CameraImageResponse` chunks,
//! the last one flagged `done`. Chunks carry no sequence number; the
//! connection delivers them in order to a single standing waiter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use bytes::{Bytes, BytesMut};
use espapi_frame::{proto, Message, MessageKind};
use espapi_transport::TransportError;
use image::{DynamicImage, ImageFormat};
use tracing::{debug, trace, warn};

use crate::correlation::Waiter;
use crate::entity::Entity;
use crate::error::{ClientError, Result};
use crate::kinds::{Camera, CameraState};
use crate::sync::lock;

/// How long a stream waits for a frame before asking again.
pub const STREAM_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

const STREAM_THREAD_NAME: &str = "espapi-camera";

/// Where a capture is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    /// A request went out; no chunk has arrived yet.
    Requesting,
    /// At least one chunk of the current frame is buffered.
    Collecting,
}

/// Accumulates chunks into whole frames.
#[derive(Debug, Default)]
pub struct Reassembler {
    state: CaptureState,
    buffer: BytesMut,
    last_frame: Option<SystemTime>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Note that a frame was requested.
    pub fn request(&mut self) {
        if self.state == CaptureState::Idle {
            self.state = CaptureState::Requesting;
        }
    }

    /// Add a chunk. Returns the complete frame on the terminal chunk and
    /// goes back to idle.
    pub fn push(&mut self, data: &[u8], done: bool) -> Option<Bytes> {
        self.state = CaptureState::Collecting;
        self.buffer.extend_from_slice(data);
        if !done {
            return None;
        }

        self.state = CaptureState::Idle;
        self.last_frame = Some(SystemTime::now());
        Some(self.buffer.split().freeze())
    }

    /// Bytes of the frame in progress.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// When the last frame completed.
    pub fn last_frame(&self) -> Option<SystemTime> {
        self.last_frame
    }
}

fn frame_request() -> Message {
    proto::CameraImageRequest {
        single: false,
        stream: true,
    }
    .into()
}

fn decode_jpeg(frame: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory_with_format(frame, ImageFormat::Jpeg)?)
}

impl Entity<Camera> {
    /// When a frame for this camera was last assembled.
    pub fn last_frame(&self) -> Option<SystemTime> {
        self.state().last_frame
    }

    fn record_frame(&self, at: Option<SystemTime>) {
        self.replace_state(CameraState { last_frame: at });
    }

    /// Accept a chunk if it belongs to this camera.
    fn chunk(&self, message: Message) -> Result<Option<proto::CameraImageResponse>> {
        match message {
            Message::CameraImageResponse(chunk) if chunk.key == self.key() => Ok(Some(chunk)),
            Message::CameraImageResponse(chunk) => {
                trace!(key = chunk.key, "chunk for another camera");
                Ok(None)
            }
            other => Err(ClientError::UnexpectedMessage {
                expected: MessageKind::CameraImageResponse,
                got: other.kind(),
            }),
        }
    }

    /// Fetch one frame as raw JPEG bytes.
    ///
    /// Each chunk must arrive within the configured timeout.
    pub fn image(&self) -> Result<Bytes> {
        let shared = self.link()?;
        let waiter = shared.register_wait(MessageKind::CameraImageResponse)?;
        shared.send(&frame_request())?;

        let timeout = shared.config.timeout;
        let mut reassembler = Reassembler::new();
        reassembler.request();
        loop {
            let message = if timeout.is_zero() {
                waiter.recv()?
            } else {
                waiter.recv_timeout(timeout)?
            };
            let Some(chunk) = self.chunk(message)? else {
                continue;
            };
            if let Some(frame) = reassembler.push(&chunk.data, chunk.done) {
                debug!(key = self.key(), len = frame.len(), "camera frame");
                self.record_frame(reassembler.last_frame());
                return Ok(frame);
            }
        }
    }

    /// Fetch and decode one frame.
    pub fn decode_image(&self) -> Result<DynamicImage> {
        decode_jpeg(&self.image()?)
    }

    /// Continuous raw frames.
    ///
    /// A worker thread asks for a new frame as soon as one completes, and
    /// again whenever a full interval passes without a request going out.
    /// The stream ends when a request cannot be sent, the connection dies,
    /// or the returned [`FrameStream`] is dropped.
    pub fn stream(self: &Arc<Self>) -> Result<FrameStream> {
        let waiter = self.link()?.register_wait(MessageKind::CameraImageResponse)?;
        let (tx, rx) = mpsc::sync_channel(1);
        let closed = Arc::new(AtomicBool::new(false));
        let error = Arc::new(Mutex::new(None));

        let worker = StreamWorker {
            camera: Arc::clone(self),
            waiter,
            frames: tx,
            closed: Arc::clone(&closed),
            error: Arc::clone(&error),
        };
        thread::Builder::new()
            .name(STREAM_THREAD_NAME.to_string())
            .spawn(move || worker.run())
            .map_err(TransportError::Io)?;

        Ok(FrameStream {
            frames: rx,
            closed,
            error,
        })
    }

    /// Continuous decoded frames; frames that fail to decode are skipped.
    pub fn image_stream(self: &Arc<Self>) -> Result<impl Iterator<Item = DynamicImage>> {
        Ok(self.stream()?.filter_map(|frame| match decode_jpeg(&frame) {
            Ok(image) => Some(image),
            Err(err) => {
                debug!(error = %err, "skipping undecodable frame");
                None
            }
        }))
    }
}

struct StreamWorker {
    camera: Arc<Entity<Camera>>,
    waiter: Waiter,
    frames: SyncSender<Bytes>,
    closed: Arc<AtomicBool>,
    error: Arc<Mutex<Option<ClientError>>>,
}

impl StreamWorker {
    fn run(self) {
        if let Err(err) = self.pump() {
            debug!(error = %err, "camera stream ended");
            *lock(&self.error) = Some(err);
        }
    }

    fn pump(&self) -> Result<()> {
        let mut reassembler = Reassembler::new();
        let mut last_request = self.request(&mut reassembler)?;

        while !self.closed.load(Ordering::Acquire) {
            if let Some(message) = self.waiter.poll(STREAM_REQUEST_INTERVAL)? {
                let Some(chunk) = self.camera.chunk(message)? else {
                    continue;
                };
                if let Some(frame) = reassembler.push(&chunk.data, chunk.done) {
                    self.camera.record_frame(reassembler.last_frame());
                    if self.frames.send(frame).is_err() {
                        break;
                    }
                    last_request = self.request(&mut reassembler)?;
                    continue;
                }
            }

            if last_request.elapsed() >= STREAM_REQUEST_INTERVAL {
                last_request = self.request(&mut reassembler)?;
            }
        }
        Ok(())
    }

    fn request(&self, reassembler: &mut Reassembler) -> Result<Instant> {
        if let Err(err) = self.camera.send(frame_request()) {
            warn!(key = self.camera.key(), error = %err, "camera request failed");
            return Err(err);
        }
        reassembler.request();
        Ok(Instant::now())
    }
}

/// Raw JPEG frames from [`Entity::stream`].
///
/// Dropping the stream stops the worker.
#[derive(Debug)]
pub struct FrameStream {
    frames: Receiver<Bytes>,
    closed: Arc<AtomicBool>,
    error: Arc<Mutex<Option<ClientError>>>,
}

impl FrameStream {
    /// Why the stream ended, if it has.
    pub fn take_error(&self) -> Option<ClientError> {
        lock(&self.error).take()
    }
}

impl Iterator for FrameStream {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.frames.recv().ok()
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}
