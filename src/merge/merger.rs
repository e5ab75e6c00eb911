//! Offline merge pipeline
//!
//! Re-times, composites, and re-encodes the two per-camera recordings of a
//! finished session into a single file. The front stream drives timing; the
//! back stream is advanced by time index so mismatched frame rates stay in
//! sync. Output goes to a work-directory temporary and only moves into the
//! store once the encoder has finished cleanly.

use crate::capture::types::{CameraPosition, FrameBuffer, FrameSource, PixelFormat};
use crate::compose::compositor::FrameCompositor;
use crate::merge::ffmpeg::{probe_media, FrameDecoder, MediaInfo, MergeEncoder};
use crate::merge::store::MediaStore;
use crate::merge::types::{MergeError, MergeProgress, MergeRequest};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Frames between progress reports
const PROGRESS_STRIDE: u64 = 15;

pub struct OfflineVideoMerger {
    store: Arc<dyn MediaStore>,
    work_dir: PathBuf,
}

impl OfflineVideoMerger {
    pub fn new(store: Arc<dyn MediaStore>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            work_dir: work_dir.into(),
        }
    }

    /// Merge one finished recording pair into a single composited file.
    ///
    /// Reports progress through `on_progress` and polls `cancel` between
    /// frames. On success the returned path is the stored output; on
    /// failure or cancellation the partial output is removed and the two
    /// input recordings are untouched.
    pub async fn merge<F>(
        &self,
        request: MergeRequest,
        on_progress: F,
        cancel: Arc<AtomicBool>,
    ) -> Result<PathBuf, MergeError>
    where
        F: Fn(MergeProgress) + Send + Sync + 'static,
    {
        request
            .layout
            .validate()
            .map_err(|e| MergeError::CompositionFailed(e.to_string()))?;

        let store = self.store.clone();
        let work_dir = self.work_dir.clone();

        // The whole pipeline is blocking process I/O
        let result = tokio::task::spawn_blocking(move || {
            run_merge(&request, store.as_ref(), &work_dir, &on_progress, &cancel)
        })
        .await
        .map_err(|e| MergeError::ExportFailed(format!("merge task failed: {e}")))?;

        result
    }
}

fn run_merge<F>(
    request: &MergeRequest,
    store: &dyn MediaStore,
    work_dir: &Path,
    on_progress: &F,
    cancel: &AtomicBool,
) -> Result<PathBuf, MergeError>
where
    F: Fn(MergeProgress),
{
    on_progress(MergeProgress::preparing());
    if cancel.load(Ordering::SeqCst) {
        on_progress(MergeProgress::cancelled());
        return Err(MergeError::Cancelled);
    }

    let front_info = probe_media(&request.front_path)?;
    let back_info = probe_media(&request.back_path)?;

    let timeline = OutputTimeline::for_pair(&front_info, &back_info);
    if timeline.trimmed_secs > 0.05 {
        tracing::warn!(
            trimmed_secs = timeline.trimmed_secs,
            "recordings differ in length; merging to the shorter one"
        );
    }
    let fps = timeline.fps;
    let duration_secs = timeline.duration_secs;
    let total_frames = timeline.total_frames;

    let mut front = FrameDecoder::open(&request.front_path, &front_info)?;
    let mut back = FrameDecoder::open(&request.back_path, &back_info)?;

    std::fs::create_dir_all(work_dir)?;
    let temp_output = work_dir.join(format!(
        "merge-{}-{}.mp4",
        Utc::now().format("%Y%m%d-%H%M%S"),
        Uuid::new_v4()
    ));

    let audio_source = front_info.has_audio.then_some(request.front_path.as_path());
    let mut encoder = MergeEncoder::start(
        &temp_output,
        request.render_size.width,
        request.render_size.height,
        fps,
        duration_secs,
        request.quality,
        audio_source,
    )?;

    let compositor = FrameCompositor::new();
    let mut last_back_frame: Option<Vec<u8>> = None;

    let outcome = (|| {
        for frame_index in 0..total_frames {
            if cancel.load(Ordering::SeqCst) {
                return Err(MergeError::Cancelled);
            }

            let Some(front_pixels) = front.read_frame()? else {
                tracing::warn!(frame_index, total_frames, "front stream ended early");
                break;
            };

            let t = frame_index as f64 / fps;
            let back_target = back_index_for(t, back_info.fps);
            while back.frames_read() <= back_target {
                match back.read_frame()? {
                    Some(pixels) => last_back_frame = Some(pixels),
                    // Hold the last decoded frame through the tail
                    None => break,
                }
            }
            let Some(back_pixels) = last_back_frame.as_ref() else {
                return Err(MergeError::TrackLoadFailed(
                    "back recording produced no frames".into(),
                ));
            };

            let pts = Duration::from_secs_f64(t);
            let front_frame = FrameBuffer::from_vec(
                front_pixels,
                front_info.width,
                front_info.height,
                PixelFormat::Rgba8,
                pts,
                FrameSource::Camera(CameraPosition::Front),
            );
            let back_frame = FrameBuffer::from_vec(
                back_pixels.clone(),
                back_info.width,
                back_info.height,
                PixelFormat::Rgba8,
                pts,
                FrameSource::Camera(CameraPosition::Back),
            );

            let composited = compositor
                .composite(&front_frame, &back_frame, &request.layout, request.render_size)
                .map_err(|e| MergeError::CompositionFailed(e.to_string()))?;
            encoder.write_frame(composited.data())?;

            if frame_index % PROGRESS_STRIDE == 0 {
                on_progress(MergeProgress::compositing(frame_index, total_frames));
            }
        }
        Ok(())
    })();

    if let Err(e) = outcome {
        encoder.abort();
        let _ = std::fs::remove_file(&temp_output);
        match e {
            MergeError::Cancelled => {
                tracing::info!("merge cancelled; partial output removed");
                on_progress(MergeProgress::cancelled());
            }
            ref other => {
                tracing::error!(error = %other, "merge failed; partial output removed");
                on_progress(MergeProgress::failed(other.to_string()));
            }
        }
        return Err(e);
    }

    on_progress(MergeProgress::finalizing(total_frames));
    if let Err(e) = encoder.finish() {
        let _ = std::fs::remove_file(&temp_output);
        on_progress(MergeProgress::failed(e.to_string()));
        return Err(e);
    }

    let saved = match store.save(&temp_output) {
        Ok(path) => path,
        Err(e) => {
            let _ = std::fs::remove_file(&temp_output);
            on_progress(MergeProgress::failed(e.to_string()));
            return Err(e);
        }
    };

    on_progress(MergeProgress::complete(total_frames));
    tracing::info!(output = %saved.display(), frames = total_frames, "merge complete");
    Ok(saved)
}

/// Output timing derived from the two probed inputs. The front stream sets
/// the frame rate; the shorter recording bounds the duration.
#[derive(Debug, Clone, Copy)]
struct OutputTimeline {
    fps: f64,
    duration_secs: f64,
    total_frames: u64,
    trimmed_secs: f64,
}

impl OutputTimeline {
    fn for_pair(front: &MediaInfo, back: &MediaInfo) -> Self {
        let duration_secs = front.duration_secs().min(back.duration_secs());
        let fps = front.fps;
        Self {
            fps,
            duration_secs,
            total_frames: ((duration_secs * fps).round() as u64).max(1),
            trimmed_secs: (front.duration_secs() - back.duration_secs()).abs(),
        }
    }
}

/// Back-stream frame index for output time `t`.
fn back_index_for(t: f64, back_fps: f64) -> u64 {
    (t * back_fps).floor().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::layout::{CompositionLayout, Corner, RenderSize};
    use crate::merge::store::DirectoryStore;
    use crate::merge::types::MergeQuality;
    use tempfile::tempdir;

    fn request(front: PathBuf, back: PathBuf) -> MergeRequest {
        MergeRequest {
            front_path: front,
            back_path: back,
            layout: CompositionLayout::SideBySide,
            render_size: RenderSize {
                width: 640,
                height: 480,
            },
            quality: MergeQuality::Medium,
        }
    }

    fn merger(dir: &std::path::Path) -> OfflineVideoMerger {
        OfflineVideoMerger::new(
            Arc::new(DirectoryStore::new(dir.join("store"))),
            dir.join("work"),
        )
    }

    #[test]
    fn output_is_bounded_by_the_shorter_recording() {
        let front = MediaInfo {
            width: 1280,
            height: 720,
            fps: 30.0,
            total_frames: 300, // 10s
            has_audio: true,
        };
        let back = MediaInfo {
            width: 1280,
            height: 720,
            fps: 60.0,
            total_frames: 570, // 9.5s
            has_audio: false,
        };

        let timeline = OutputTimeline::for_pair(&front, &back);
        assert_eq!(timeline.fps, 30.0);
        assert!((timeline.duration_secs - 9.5).abs() < 1e-9);
        assert_eq!(timeline.total_frames, 285);
        assert!((timeline.trimmed_secs - 0.5).abs() < 1e-9);
    }

    #[test]
    fn back_index_tracks_output_time() {
        // 60fps back stream against a 30fps front timeline
        assert_eq!(back_index_for(0.0, 60.0), 0);
        assert_eq!(back_index_for(1.0 / 30.0, 60.0), 2);
        assert_eq!(back_index_for(0.5, 60.0), 30);
        // Slower back stream repeats frames
        assert_eq!(back_index_for(0.1, 15.0), 1);
        assert_eq!(back_index_for(0.11, 15.0), 1);
    }

    #[tokio::test]
    async fn degenerate_layout_is_rejected_before_any_io() {
        let dir = tempdir().unwrap();
        let mut req = request("missing-front.mp4".into(), "missing-back.mp4".into());
        req.layout = CompositionLayout::PictureInPicture {
            corner: Corner::TopRight,
            size_fraction: 0.0,
        };

        let result = merger(dir.path())
            .merge(req, |_| {}, Arc::new(AtomicBool::new(false)))
            .await;
        assert!(matches!(result, Err(MergeError::CompositionFailed(_))));
    }

    #[tokio::test]
    async fn missing_input_reports_track_load_failure() {
        let dir = tempdir().unwrap();
        let req = request(
            dir.path().join("no-front.mp4"),
            dir.path().join("no-back.mp4"),
        );

        let result = merger(dir.path())
            .merge(req, |_| {}, Arc::new(AtomicBool::new(false)))
            .await;
        assert!(matches!(result, Err(MergeError::TrackLoadFailed(_))));
    }

    #[tokio::test]
    async fn pre_cancelled_merge_stops_without_touching_inputs() {
        let dir = tempdir().unwrap();
        let front = dir.path().join("front.mp4");
        let back = dir.path().join("back.mp4");
        std::fs::write(&front, b"front bytes").unwrap();
        std::fs::write(&back, b"back bytes").unwrap();

        let cancel = Arc::new(AtomicBool::new(true));
        let result = merger(dir.path())
            .merge(request(front.clone(), back.clone()), |_| {}, cancel)
            .await;

        assert!(matches!(result, Err(MergeError::Cancelled)));
        assert_eq!(std::fs::read(&front).unwrap(), b"front bytes");
        assert_eq!(std::fs::read(&back).unwrap(), b"back bytes");
    }
}
