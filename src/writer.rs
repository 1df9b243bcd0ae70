//! Segment Writers (§4.4): persist audio segments to disk (required, since
//! the STS client uploads from the persisted form) and optionally mux
//! video segments into a container via an external muxer subprocess.

use std::path::{Path, PathBuf};

use crate::error::WriterError;
use crate::types::{AudioSegment, VideoSegment};

pub struct SegmentWriter {
    segment_dir: PathBuf,
}

impl SegmentWriter {
    pub fn new(segment_dir: PathBuf) -> Self {
        Self { segment_dir }
    }

    fn audio_path(&self, stream_id: &str, batch_number: u64) -> PathBuf {
        self.segment_dir.join(stream_id).join(format!("{batch_number:06}_audio.m4a"))
    }

    fn dubbed_path(&self, stream_id: &str, batch_number: u64) -> PathBuf {
        self.segment_dir.join(stream_id).join(format!("{batch_number:06}_audio_dubbed.m4a"))
    }

    fn video_path(&self, stream_id: &str, batch_number: u64) -> PathBuf {
        self.segment_dir.join(stream_id).join(format!("{batch_number:06}_video.mp4"))
    }

    /// Writes an audio segment atomically (write to a temp path, then
    /// rename) and updates `size_bytes`/`file_path`.
    pub fn write(&self, mut segment: AudioSegment) -> Result<AudioSegment, WriterError> {
        let path = self.audio_path(segment.stream_id.as_str(), segment.batch_number);
        write_atomic(&path, &segment.payload)?;
        segment.size_bytes = segment.payload.len();
        segment.file_path = Some(path);
        Ok(segment)
    }

    /// Stores the dubbed counterpart under a sibling filename and marks
    /// `is_dubbed`.
    pub fn write_dubbed(&self, mut segment: AudioSegment, dubbed_payload: bytes::Bytes) -> Result<AudioSegment, WriterError> {
        let path = self.dubbed_path(segment.stream_id.as_str(), segment.batch_number);
        write_atomic(&path, &dubbed_payload)?;
        segment.dubbed_file_path = Some(path);
        segment.dubbed_payload = Some(dubbed_payload);
        segment.is_dubbed = true;
        Ok(segment)
    }

    /// Muxes a concatenated video payload into an MP4 container via an
    /// external `ffmpeg` subprocess (codec-level muxing internals are
    /// out of scope per §1; this crate only enforces the contract: a
    /// valid, non-empty container or a loud failure).
    pub fn write_video_muxed(&self, mut segment: VideoSegment) -> Result<VideoSegment, WriterError> {
        let path = self.video_path(segment.stream_id.as_str(), segment.batch_number);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw_path = path.with_extension("h264");
        write_atomic(&raw_path, &segment.payload)?;

        let status = std::process::Command::new("ffmpeg")
            .args(["-y", "-loglevel", "error", "-f", "h264", "-i"])
            .arg(&raw_path)
            .args(["-c", "copy"])
            .arg(&path)
            .status()?;
        let _ = std::fs::remove_file(&raw_path);

        if !status.success() {
            return Err(WriterError::MuxerFailed(status));
        }
        let metadata = std::fs::metadata(&path)?;
        if metadata.len() == 0 {
            return Err(WriterError::EmptyOutput(path));
        }
        segment.size_bytes = metadata.len() as usize;
        segment.file_path = Some(path);
        Ok(segment)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), WriterError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, data)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmissionTrigger, StreamId};
    use bytes::Bytes;
    use std::time::Duration;

    fn audio_segment() -> AudioSegment {
        AudioSegment {
            fragment_id: uuid::Uuid::new_v4(),
            stream_id: StreamId::new("s1").unwrap(),
            batch_number: 3,
            start_pts: Duration::ZERO,
            duration: Duration::from_secs(1),
            trigger: EmissionTrigger::Duration,
            payload: Bytes::from_static(b"hello-audio"),
            file_path: None,
            size_bytes: 0,
            is_dubbed: false,
            dubbed_payload: None,
            dubbed_file_path: None,
        }
    }

    #[test]
    fn write_creates_file_with_matching_size() {
        let tmp = tempdir();
        let writer = SegmentWriter::new(tmp.clone());
        let segment = audio_segment();
        let written = writer.write(segment).unwrap();
        let path = written.file_path.unwrap();
        assert!(path.exists());
        assert_eq!(written.size_bytes, "hello-audio".len());
        std::fs::remove_dir_all(&tmp).ok();
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dubbing-worker-test-{}", uuid::Uuid::new_v4()));
        dir
    }
}
