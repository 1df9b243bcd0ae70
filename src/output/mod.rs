//! Output Pipeline (§4.9): muxes each synced `(video, audio)` pair and
//! publishes it to the output URL in real time via a managed `ffmpeg`
//! subprocess. Corrects small audio/video duration mismatches with an
//! `atempo` filter; a mismatch outside the filter's usable range can't be
//! corrected, so that pair is dropped with a warning rather than published
//! out of sync (§4.9).

use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::OutputError;
use crate::thread_utils::InitializableThread;
use crate::types::SyncPair;

const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;
const RESTART_BUDGET: u32 = 3;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct OutputConfig {
    pub output_url: String,
    pub queue_capacity: usize,
}

enum OutputJob {
    Pair(SyncPair),
    Eos,
}

pub struct OutputPipeline {
    should_close: Arc<AtomicBool>,
    job_tx: Sender<OutputJob>,
}

impl OutputPipeline {
    pub fn build(stream_id: &str, config: OutputConfig) -> Result<Self, OutputError> {
        let parsed = url::Url::parse(&config.output_url).map_err(|_| OutputError::InvalidUrl(config.output_url.clone()))?;
        if !matches!(parsed.scheme(), "rtmp" | "srt") {
            return Err(OutputError::InvalidUrl(config.output_url));
        }

        let (job_tx, job_rx) = bounded(config.queue_capacity);
        let should_close = Arc::new(AtomicBool::new(false));

        let opts = OutputInitOptions {
            output_url: config.output_url,
            job_rx,
            should_close: should_close.clone(),
        };
        OutputThread::spawn(stream_id, opts)?;

        Ok(Self { should_close, job_tx })
    }

    /// Enqueues a synced pair for publishing. Backpressure is applied by
    /// the bounded channel itself; the caller is expected to have already
    /// paced sends against `wait_duration` upstream.
    pub fn push(&self, pair: SyncPair) -> Result<(), OutputError> {
        self.job_tx
            .send(OutputJob::Pair(pair))
            .map_err(|_| OutputError::ProcessExited("output thread gone".to_string()))
    }

    pub fn finish(&self) {
        let _ = self.job_tx.send(OutputJob::Eos);
    }

    pub fn stop(&self) {
        self.should_close.store(true, Ordering::SeqCst);
    }
}

impl Drop for OutputPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct OutputInitOptions {
    output_url: String,
    job_rx: Receiver<OutputJob>,
    should_close: Arc<AtomicBool>,
}

struct OutputThread {
    output_url: String,
    job_rx: Receiver<OutputJob>,
    should_close: Arc<AtomicBool>,
    publisher: Child,
    consecutive_restarts: u32,
    next_emit_at: Option<Instant>,
}

impl InitializableThread for OutputThread {
    type InitOptions = OutputInitOptions;
    type SpawnOutput = ();
    type SpawnError = OutputError;

    fn init(opts: Self::InitOptions) -> Result<(Self, Self::SpawnOutput), Self::SpawnError> {
        let publisher = spawn_publisher(&opts.output_url)?;
        Ok((
            Self {
                output_url: opts.output_url,
                job_rx: opts.job_rx,
                should_close: opts.should_close,
                publisher,
                consecutive_restarts: 0,
                next_emit_at: None,
            },
            (),
        ))
    }

    fn run(mut self) {
        loop {
            if self.should_close.load(Ordering::SeqCst) {
                break;
            }
            match self.job_rx.recv_timeout(POLL_INTERVAL) {
                Ok(OutputJob::Pair(pair)) => {
                    if let Err(err) = self.publish_pair(pair) {
                        tracing::warn!(error = %err, "output publish failed, attempting restart");
                        if self.restart().is_err() {
                            break;
                        }
                    }
                }
                Ok(OutputJob::Eos) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if self.publisher_exited() {
                        tracing::warn!("output publisher exited unexpectedly, restarting");
                        if self.restart().is_err() {
                            break;
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        let _ = self.publisher.kill();
    }
}

impl OutputThread {
    fn publisher_exited(&mut self) -> bool {
        matches!(self.publisher.try_wait(), Ok(Some(_)))
    }

    /// Discards any already-queued pairs (they're stale relative to the new
    /// publisher's clock) and relaunches the subprocess, up to
    /// `RESTART_BUDGET` consecutive attempts.
    fn restart(&mut self) -> Result<(), OutputError> {
        self.consecutive_restarts += 1;
        if self.consecutive_restarts > RESTART_BUDGET {
            return Err(OutputError::RestartBudgetExhausted(RESTART_BUDGET));
        }
        while self.job_rx.try_recv().is_ok() {}
        self.next_emit_at = None;
        let _ = self.publisher.kill();
        self.publisher = spawn_publisher(&self.output_url)?;
        Ok(())
    }

    fn publish_pair(&mut self, pair: SyncPair) -> Result<(), OutputError> {
        let Some(factor) = atempo_factor(pair.video.duration, pair.audio.duration) else {
            tracing::warn!(batch_number = pair.batch_number, "dropping pair, atempo correction not applicable");
            return Ok(());
        };
        let audio_path = pair
            .audio
            .dubbed_file_path
            .as_ref()
            .or(pair.audio.file_path.as_ref())
            .ok_or_else(|| OutputError::ProcessExited("audio segment has no file_path".to_string()))?;
        let video_path = pair
            .video
            .file_path
            .as_ref()
            .ok_or_else(|| OutputError::ProcessExited("video segment has no file_path".to_string()))?;

        let chunk = mux_pair(video_path, audio_path, factor)?;
        self.pace(pair.video.duration);

        let stdin = self
            .publisher
            .stdin
            .as_mut()
            .ok_or_else(|| OutputError::ProcessExited("publisher has no stdin".to_string()))?;
        stdin.write_all(&chunk)?;
        self.consecutive_restarts = 0;
        Ok(())
    }

    /// Sleeps until the expected wall-clock emission time for this pair,
    /// tracked independently of actual mux/write latency so small per-pair
    /// jitter doesn't accumulate into drift.
    fn pace(&mut self, duration: Duration) {
        let now = Instant::now();
        let target = self.next_emit_at.unwrap_or(now);
        if target > now {
            std::thread::sleep(target - now);
        }
        self.next_emit_at = Some(target.max(now) + duration);
    }
}

/// Computes the `atempo` speed factor needed to stretch/compress `audio`
/// onto `video`'s duration. Returns `None` when the required factor falls
/// outside `ffmpeg`'s single-filter range `[0.5, 2.0]`, or either duration
/// is zero; the caller drops the pair rather than publish it out of sync.
fn atempo_factor(video_duration: Duration, audio_duration: Duration) -> Option<f64> {
    if audio_duration.is_zero() || video_duration.is_zero() {
        return None;
    }
    let factor = audio_duration.as_secs_f64() / video_duration.as_secs_f64();
    if (ATEMPO_MIN..=ATEMPO_MAX).contains(&factor) {
        Some(factor)
    } else {
        tracing::warn!(factor, "atempo factor out of range, cannot correct pair");
        None
    }
}

fn spawn_publisher(output_url: &str) -> Result<Child, OutputError> {
    Command::new("ffmpeg")
        .args(["-loglevel", "error", "-f", "mpegts", "-i", "pipe:0", "-c", "copy", "-f", "flv"])
        .arg(output_url)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(OutputError::Io)
}

fn mux_pair(video_path: &std::path::Path, audio_path: &std::path::Path, atempo: f64) -> Result<Vec<u8>, OutputError> {
    let mut args = vec!["-loglevel".to_string(), "error".to_string(), "-i".to_string(), video_path.display().to_string(), "-i".to_string(), audio_path.display().to_string()];
    args.push("-filter:a".to_string());
    args.push(format!("atempo={atempo:.4}"));
    args.extend(["-c:v".to_string(), "copy".to_string(), "-f".to_string(), "mpegts".to_string(), "pipe:1".to_string()]);

    let output = Command::new("ffmpeg").args(&args).output()?;
    if !output.status.success() {
        return Err(OutputError::ProcessExited(format!("mux exited with {}", output.status)));
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atempo_factor_rejects_out_of_range() {
        assert_eq!(atempo_factor(Duration::from_secs(1), Duration::from_secs(1)), Some(1.0));
        assert_eq!(atempo_factor(Duration::from_secs(1), Duration::from_millis(300)), None);
        assert_eq!(atempo_factor(Duration::from_secs(1), Duration::from_secs(3)), None);
    }
}
