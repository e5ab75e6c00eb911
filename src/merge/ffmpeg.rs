//! FFmpeg wrappers for the offline merge
//!
//! Probing, raw-RGBA frame decoding, and the single encoder process that
//! receives composited frames on stdin and muxes the front recording's
//! audio track alongside them.

use crate::merge::types::{MergeError, MergeQuality};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

/// Metadata for one input recording
#[derive(Debug, Clone, Copy)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: u64,
    pub has_audio: bool,
}

impl MediaInfo {
    pub fn duration_secs(&self) -> f64 {
        if self.fps > 0.0 {
            self.total_frames as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Probe an input file for dimensions, frame rate, frame count, and whether
/// it carries an audio stream.
pub fn probe_media(path: &Path) -> Result<MediaInfo, MergeError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_packets",
            "-show_entries",
            "stream=width,height,nb_read_packets,r_frame_rate",
            "-of",
            "csv=p=0",
            path.to_str().unwrap_or(""),
        ])
        .output()
        .map_err(|e| MergeError::TrackLoadFailed(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MergeError::TrackLoadFailed(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            stderr
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parts: Vec<&str> = stdout.trim().split(',').collect();
    if parts.len() < 4 {
        return Err(MergeError::TrackLoadFailed(format!(
            "unexpected ffprobe output: {stdout}"
        )));
    }

    let width: u32 = parts[0]
        .parse()
        .map_err(|_| MergeError::TrackLoadFailed("invalid width".into()))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|_| MergeError::TrackLoadFailed("invalid height".into()))?;
    let fps = parse_frame_rate(parts[2]);
    let total_frames: u64 = parts[3].parse().unwrap_or(0);

    Ok(MediaInfo {
        width,
        height,
        fps,
        total_frames,
        has_audio: probe_has_audio(path),
    })
}

/// Parse an ffprobe rate like "30/1" or "30000/1001"
fn parse_frame_rate(raw: &str) -> f64 {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() == 2 {
        let num: f64 = parts[0].parse().unwrap_or(30.0);
        let den: f64 = parts[1].parse().unwrap_or(1.0);
        if den > 0.0 {
            num / den
        } else {
            30.0
        }
    } else {
        raw.parse().unwrap_or(30.0)
    }
}

fn probe_has_audio(path: &Path) -> bool {
    Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=codec_type",
            "-of",
            "csv=p=0",
            path.to_str().unwrap_or(""),
        ])
        .output()
        .map(|o| o.status.success() && !o.stdout.is_empty())
        .unwrap_or(false)
}

/// Decodes one recording to raw RGBA frames on stdout.
pub struct FrameDecoder {
    process: Child,
    stdout: BufReader<ChildStdout>,
    frame_size: usize,
    frames_read: u64,
}

impl FrameDecoder {
    pub fn open(path: &Path, info: &MediaInfo) -> Result<Self, MergeError> {
        tracing::info!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            frames = info.total_frames,
            fps = info.fps,
            "opening decoder"
        );

        // -s pins the output size so every read is exactly one frame
        let mut process = Command::new("ffmpeg")
            .args([
                "-i",
                path.to_str().unwrap_or(""),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "-s",
                &format!("{}x{}", info.width, info.height),
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MergeError::TrackLoadFailed(format!("failed to start decoder: {e}")))?;

        let frame_size = (info.width * info.height * 4) as usize;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| MergeError::TrackLoadFailed("failed to capture decoder stdout".into()))?;

        Ok(Self {
            process,
            stdout: BufReader::with_capacity(frame_size * 2, stdout),
            frame_size,
            frames_read: 0,
        })
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Read the next RGBA frame; `None` when the stream is exhausted.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, MergeError> {
        let mut buffer = vec![0u8; self.frame_size];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {
                self.frames_read += 1;
                Ok(Some(buffer))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(MergeError::TrackLoadFailed(format!(
                "failed to read frame: {e}"
            ))),
        }
    }
}

impl Drop for FrameDecoder {
    fn drop(&mut self) {
        let _ = self.process.kill();
    }
}

/// Encodes composited RGBA frames from stdin, pulling the audio track from
/// the front recording when it has one.
pub struct MergeEncoder {
    process: Child,
    stdin: ChildStdin,
    frame_count: u64,
}

impl MergeEncoder {
    pub fn start(
        output: &Path,
        width: u32,
        height: u32,
        fps: f64,
        duration_secs: f64,
        quality: MergeQuality,
        audio_source: Option<&Path>,
    ) -> Result<Self, MergeError> {
        let mut args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            "-s".to_string(),
            format!("{width}x{height}"),
            "-r".to_string(),
            fps.to_string(),
            "-i".to_string(),
            "-".to_string(),
        ];

        if let Some(audio) = audio_source {
            args.extend([
                "-i".to_string(),
                audio.to_string_lossy().to_string(),
                "-map".to_string(),
                "0:v".to_string(),
                "-map".to_string(),
                "1:a:0".to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                "192k".to_string(),
            ]);
        }

        args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            quality.h264_preset().to_string(),
            "-crf".to_string(),
            quality.crf().to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            // Both streams cut at the shorter recording's length
            "-t".to_string(),
            format!("{duration_secs:.3}"),
        ]);
        args.push(output.to_string_lossy().to_string());

        tracing::info!(output = %output.display(), ?args, "starting merge encoder");

        let mut process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MergeError::ExportFailed(format!("failed to start encoder: {e}")))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| MergeError::ExportFailed("failed to capture encoder stdin".into()))?;

        Ok(Self {
            process,
            stdin,
            frame_count: 0,
        })
    }

    pub fn write_frame(&mut self, rgba_data: &[u8]) -> Result<(), MergeError> {
        self.stdin
            .write_all(rgba_data)
            .map_err(|e| MergeError::ExportFailed(format!("failed to write frame: {e}")))?;
        self.frame_count += 1;
        Ok(())
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Signal EOF and wait for the encoder to flush.
    pub fn finish(self) -> Result<(), MergeError> {
        drop(self.stdin);
        let output = self
            .process
            .wait_with_output()
            .map_err(|e| MergeError::ExportFailed(format!("failed to wait for encoder: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MergeError::ExportFailed(format!(
                "encoder exited with {}: {}",
                output.status,
                stderr.chars().take(500).collect::<String>()
            )));
        }

        tracing::info!(frames = self.frame_count, "merge encoder finished");
        Ok(())
    }

    /// Abandon the encode without finishing; the partial output is the
    /// caller's to remove.
    pub fn abort(mut self) {
        drop(self.stdin);
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_parses_fractions() {
        assert_eq!(parse_frame_rate("30/1"), 30.0);
        let ntsc = parse_frame_rate("30000/1001");
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("24"), 24.0);
        assert_eq!(parse_frame_rate("bad/0"), 30.0);
    }

    #[test]
    fn duration_follows_frames_over_fps() {
        let info = MediaInfo {
            width: 1280,
            height: 720,
            fps: 30.0,
            total_frames: 90,
            has_audio: false,
        };
        assert!((info.duration_secs() - 3.0).abs() < f64::EPSILON);
    }
}
