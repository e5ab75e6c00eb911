//! FFmpeg-backed recording channel
//!
//! Encodes raw RGBA frames to an H.264 MP4 by piping them into an ffmpeg
//! child process. One writer per camera; the two writers in a session run
//! independently and only meet again at the coordinator's join.

use crate::capture::backend::CameraFormat;
use crate::capture::types::FrameBuffer;
use crate::recorder::channel::{RecordingChannel, RecordingError, RecordingResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Build the encoder invocation for raw RGBA input on stdin.
fn encoder_args(output: &Path, format: CameraFormat) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{}x{}", format.width, format.height),
        "-r".into(),
        format.frame_rate.to_string(),
        "-i".into(),
        "-".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-crf".into(),
        "18".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-g".into(),
        (format.frame_rate * 2).to_string(),
        "-movflags".into(),
        "+faststart".into(),
        output.to_string_lossy().to_string(),
    ]
}

/// Check that ffmpeg is on the path before a session depends on it.
pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .is_ok()
}

/// One camera's file writer.
pub struct FfmpegWriter {
    id: String,
    process: Mutex<Option<Child>>,
    output: Mutex<Option<PathBuf>>,
    frame_count: AtomicU64,
    accepting: AtomicBool,
    paused: AtomicBool,
}

impl FfmpegWriter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            process: Mutex::new(None),
            output: Mutex::new(None),
            frame_count: AtomicU64::new(0),
            accepting: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        // Reap an encoder abandoned without finalize
        if let Some(mut child) = self.process.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[async_trait]
impl RecordingChannel for FfmpegWriter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self, output: &Path, format: CameraFormat) -> RecordingResult<()> {
        if self.process.lock().is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        if !ffmpeg_available() {
            return Err(RecordingError::ConfigurationError(
                "ffmpeg not found on PATH".into(),
            ));
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let child = Command::new("ffmpeg")
            .args(encoder_args(output, format))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RecordingError::WriterFailed(format!("failed to start ffmpeg: {e}")))?;

        tracing::info!(
            id = %self.id,
            output = %output.display(),
            width = format.width,
            height = format.height,
            fps = format.frame_rate,
            "writer started"
        );

        *self.process.lock() = Some(child);
        *self.output.lock() = Some(output.to_path_buf());
        self.frame_count.store(0, Ordering::Relaxed);
        self.paused.store(false, Ordering::Relaxed);
        self.accepting.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn append(&self, frame: &FrameBuffer) -> bool {
        if !self.accepting.load(Ordering::SeqCst) || self.paused.load(Ordering::SeqCst) {
            return false;
        }

        let mut guard = self.process.lock();
        let Some(process) = guard.as_mut() else {
            return false;
        };
        let Some(stdin) = process.stdin.as_mut() else {
            return false;
        };
        if stdin.write_all(frame.data()).is_ok() {
            self.frame_count.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    async fn finalize(&self) -> RecordingResult<PathBuf> {
        self.accepting.store(false, Ordering::SeqCst);

        let Some(mut process) = self.process.lock().take() else {
            return Err(RecordingError::NotRecording);
        };
        let output = self
            .output
            .lock()
            .take()
            .ok_or(RecordingError::NotRecording)?;

        // Closing stdin signals EOF; waiting can take a moment while the
        // encoder flushes, so it happens off the async executor
        drop(process.stdin.take());
        let id = self.id.clone();
        let frames = self.frame_count.load(Ordering::Relaxed);
        let result = tokio::task::spawn_blocking(move || process.wait_with_output())
            .await
            .map_err(|e| RecordingError::WriterFailed(format!("finalize task failed: {e}")))?
            .map_err(|e| RecordingError::WriterFailed(format!("ffmpeg wait failed: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(RecordingError::WriterFailed(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr.chars().take(500).collect::<String>()
            )));
        }

        tracing::info!(%id, frames, output = %output.display(), "writer finalized");
        Ok(output)
    }

    fn frames_written(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_args_describe_raw_rgba_input() {
        let format = CameraFormat {
            width: 1280,
            height: 720,
            frame_rate: 30,
        };
        let args = encoder_args(Path::new("/tmp/out.mp4"), format);
        let joined = args.join(" ");
        assert!(joined.contains("-s 1280x720"));
        assert!(joined.contains("-r 30"));
        assert!(joined.contains("-pix_fmt rgba"));
        assert!(joined.contains("libx264"));
        assert!(joined.ends_with("/tmp/out.mp4"));
    }

    #[test]
    fn append_before_start_is_rejected() {
        use crate::capture::types::{CameraPosition, FrameSource, PixelFormat};
        let writer = FfmpegWriter::new("front");
        let frame = FrameBuffer::from_vec(
            vec![0u8; 16],
            2,
            2,
            PixelFormat::Rgba8,
            std::time::Duration::ZERO,
            FrameSource::Camera(CameraPosition::Front),
        );
        assert!(!writer.append(&frame));
        assert_eq!(writer.frames_written(), 0);
    }

    #[tokio::test]
    async fn finalize_without_start_reports_not_recording() {
        let writer = FfmpegWriter::new("back");
        assert!(matches!(
            writer.finalize().await,
            Err(RecordingError::NotRecording)
        ));
    }
}
