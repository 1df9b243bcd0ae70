//! Ingest Pipeline (§4.1): demuxes one input stream into raw video frames,
//! raw audio frames, and periodic RMS level samples. Demuxing itself is
//! treated as a managed external subprocess (Design Notes §9) rather than
//! reimplemented against a codec library; this module owns the subprocess,
//! frames its stdout, and fans frames out onto bounded queues consumed by
//! the Worker Runner's cooperative loop.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::IngestError;
use crate::thread_utils::InitializableThread;
use crate::types::{FramePayload, LevelMessage, StreamEvent};

const HEADER_LEN: usize = 1 + 8 + 8 + 4;

/// Retry delays for the initial demuxer spawn (§6.1): up to three retries
/// after the first attempt, at 1s, 2s, 4s.
const INIT_RETRY_DELAYS: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

/// Why the demux thread stopped, reported to the Worker Runner so it can
/// decide whether to restart the pipeline (§4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestExitReason {
    /// Clean end of stream; no restart.
    Eos,
    /// `IngestTransient` (§7): the caller may restart with backoff.
    Transient,
    /// `IngestFatal` (§7): the caller should terminate.
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Video,
    Audio,
    Level,
}

impl FrameKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(FrameKind::Video),
            1 => Some(FrameKind::Audio),
            2 => Some(FrameKind::Level),
            _ => None,
        }
    }
}

pub struct IngestConfig {
    pub input_url: String,
    pub queue_capacity: usize,
}

pub struct IngestReceivers {
    pub video: Receiver<StreamEvent<FramePayload>>,
    pub audio: Receiver<StreamEvent<FramePayload>>,
    pub level: Receiver<LevelMessage>,
}

/// Handle retained by the Worker Runner: starts/stops the demux subprocess
/// and OS thread that owns it.
pub struct IngestPipeline {
    should_close: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    exit_reason: Arc<Mutex<Option<IngestExitReason>>>,
}

impl IngestPipeline {
    pub fn build(stream_id: &str, config: IngestConfig) -> Result<(Self, IngestReceivers), IngestError> {
        let parsed = url::Url::parse(&config.input_url).map_err(|_| IngestError::InvalidUrl(config.input_url.clone()))?;
        if !matches!(parsed.scheme(), "rtmp" | "http" | "https" | "srt") {
            return Err(IngestError::InvalidUrl(config.input_url));
        }

        let (video_tx, video_rx) = bounded(config.queue_capacity);
        let (audio_tx, audio_rx) = bounded(config.queue_capacity);
        let (level_tx, level_rx) = bounded(config.queue_capacity);
        let should_close = Arc::new(AtomicBool::new(false));
        let child = Arc::new(Mutex::new(None));
        let exit_reason = Arc::new(Mutex::new(None));

        let opts = IngestInitOptions {
            input_url: config.input_url,
            video_tx,
            audio_tx,
            level_tx,
            should_close: should_close.clone(),
            child_slot: child.clone(),
            exit_reason: exit_reason.clone(),
        };
        IngestThread::spawn(stream_id, opts)?;

        Ok((
            Self { should_close, child, exit_reason },
            IngestReceivers {
                video: video_rx,
                audio: audio_rx,
                level: level_rx,
            },
        ))
    }

    /// Signals the demux thread to stop and kills the managed subprocess.
    pub fn stop(&self) {
        self.should_close.store(true, Ordering::SeqCst);
        if let Some(child) = self.child.lock().expect("child mutex poisoned").as_mut() {
            let _ = child.kill();
        }
    }

    /// Takes the reason the demux thread last stopped running, if any. Used
    /// by the Worker Runner to decide whether to restart the pipeline.
    pub fn take_exit_reason(&self) -> Option<IngestExitReason> {
        self.exit_reason.lock().expect("exit reason mutex poisoned").take()
    }
}

impl Drop for IngestPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct IngestInitOptions {
    input_url: String,
    video_tx: Sender<StreamEvent<FramePayload>>,
    audio_tx: Sender<StreamEvent<FramePayload>>,
    level_tx: Sender<LevelMessage>,
    should_close: Arc<AtomicBool>,
    child_slot: Arc<Mutex<Option<Child>>>,
    exit_reason: Arc<Mutex<Option<IngestExitReason>>>,
}

struct IngestThread {
    stdout: std::process::ChildStdout,
    video_tx: Sender<StreamEvent<FramePayload>>,
    audio_tx: Sender<StreamEvent<FramePayload>>,
    level_tx: Sender<LevelMessage>,
    should_close: Arc<AtomicBool>,
    exit_reason: Arc<Mutex<Option<IngestExitReason>>>,
}

impl InitializableThread for IngestThread {
    type InitOptions = IngestInitOptions;
    type SpawnOutput = ();
    type SpawnError = IngestError;

    fn init(opts: Self::InitOptions) -> Result<(Self, Self::SpawnOutput), Self::SpawnError> {
        let mut attempt = 0usize;
        let mut child = loop {
            if attempt > 0 {
                std::thread::sleep(INIT_RETRY_DELAYS[attempt - 1]);
            }
            match Command::new("ffmpeg")
                .args(["-loglevel", "error", "-i"])
                .arg(&opts.input_url)
                .args(["-f", "dubbing_worker_framed", "pipe:1"])
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(child) => break child,
                Err(err) if attempt < INIT_RETRY_DELAYS.len() => {
                    tracing::warn!(error = %err, attempt, "demuxer spawn failed, retrying (§6.1)");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IngestError::ProcessExited("demuxer produced no stdout pipe".to_string()))?;

        *opts.child_slot.lock().expect("child mutex poisoned") = Some(child);

        Ok((
            Self {
                stdout,
                video_tx: opts.video_tx,
                audio_tx: opts.audio_tx,
                level_tx: opts.level_tx,
                should_close: opts.should_close,
                exit_reason: opts.exit_reason,
            },
            (),
        ))
    }

    fn run(mut self) {
        loop {
            if self.should_close.load(Ordering::SeqCst) {
                break;
            }
            match read_frame(&mut self.stdout) {
                Ok(Some((FrameKind::Video, payload))) => {
                    if self.video_tx.send(StreamEvent::Data(payload)).is_err() {
                        break;
                    }
                }
                Ok(Some((FrameKind::Audio, payload))) => {
                    if self.audio_tx.send(StreamEvent::Data(payload)).is_err() {
                        break;
                    }
                }
                Ok(Some((FrameKind::Level, payload))) => {
                    let rms_db = f64::from_le_bytes(payload.data[0..8].try_into().expect("8 bytes"));
                    let level = LevelMessage {
                        rms_db,
                        timestamp: payload.pts,
                    };
                    if self.level_tx.send(level).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    *self.exit_reason.lock().expect("exit reason mutex poisoned") = Some(IngestExitReason::Eos);
                    let _ = self.video_tx.send(StreamEvent::Eos);
                    let _ = self.audio_tx.send(StreamEvent::Eos);
                    break;
                }
                Err(err) => {
                    let reason = if err.is_transient() {
                        IngestExitReason::Transient
                    } else {
                        IngestExitReason::Fatal
                    };
                    tracing::warn!(error = %err, transient = err.is_transient(), "ingest demux stream error, stopping");
                    *self.exit_reason.lock().expect("exit reason mutex poisoned") = Some(reason);
                    let _ = self.video_tx.send(StreamEvent::Eos);
                    let _ = self.audio_tx.send(StreamEvent::Eos);
                    break;
                }
            }
        }
    }
}

/// Reads one length-prefixed frame from the demuxer's stdout.
///
/// Wire shape: `[kind: u8][pts_ns: u64 LE][duration_ns: u64 LE][len: u32 LE][payload: len bytes]`.
/// This is the framing contract between the worker and its demux
/// subprocess, not a public wire protocol (§1, §9).
fn read_frame(stdout: &mut std::process::ChildStdout) -> Result<Option<(FrameKind, FramePayload)>, IngestError> {
    let mut header = [0u8; HEADER_LEN];
    match read_exact_or_eof(stdout, &mut header)? {
        false => return Ok(None),
        true => {}
    }

    let kind = FrameKind::from_byte(header[0])
        .ok_or_else(|| IngestError::Transient(format!("unknown frame kind byte {}", header[0])))?;
    let pts_ns = u64::from_le_bytes(header[1..9].try_into().expect("8 bytes"));
    let duration_ns = u64::from_le_bytes(header[9..17].try_into().expect("8 bytes"));
    let len = u32::from_le_bytes(header[17..21].try_into().expect("4 bytes")) as usize;

    let mut buf = vec![0u8; len];
    stdout.read_exact(&mut buf)?;

    Ok(Some((
        kind,
        FramePayload {
            data: Bytes::from(buf),
            pts: std::time::Duration::from_nanos(pts_ns),
            duration: std::time::Duration::from_nanos(duration_ns),
        },
    )))
}

/// Like `read_exact`, but returns `Ok(false)` on a clean EOF at a frame
/// boundary instead of erroring.
fn read_exact_or_eof(stdout: &mut std::process::ChildStdout, buf: &mut [u8]) -> Result<bool, IngestError> {
    let mut read_total = 0;
    while read_total < buf.len() {
        match stdout.read(&mut buf[read_total..]) {
            Ok(0) => {
                return if read_total == 0 {
                    Ok(false)
                } else {
                    Err(IngestError::ProcessExited("truncated frame at EOF".to_string()))
                };
            }
            Ok(n) => read_total += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_kind_rejects_unknown_byte() {
        assert_eq!(FrameKind::from_byte(0), Some(FrameKind::Video));
        assert_eq!(FrameKind::from_byte(1), Some(FrameKind::Audio));
        assert_eq!(FrameKind::from_byte(2), Some(FrameKind::Level));
        assert_eq!(FrameKind::from_byte(9), None);
    }
}
