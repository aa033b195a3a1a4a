//! FFmpeg-based streaming decode to fixed-format PCM frames.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, trace};

use tunebot_core::{
    DecodePort, Error, Frame, FrameStream, Result, CHANNELS, FRAME_BYTES, SAMPLE_RATE,
};

/// Spawns one ffmpeg process per track and reads s16le PCM from its stdout.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg_path: PathBuf,
    /// Read input at its native rate (`-re`) so frames arrive at playback pace.
    realtime: bool,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            realtime: true,
        }
    }

    /// Decode as fast as possible instead of at playback pace.
    #[must_use]
    pub const fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    fn args(&self, source: &Path) -> Vec<OsString> {
        // -re               = read input at native frame rate
        // -ac 2 / -ar 48000 = stereo at 48kHz
        // -f s16le          = raw signed 16-bit little-endian
        // pipe:1            = write to stdout
        let mut args: Vec<OsString> = Vec::with_capacity(16);
        if self.realtime {
            args.push("-re".into());
        }
        args.push("-i".into());
        args.push(source.as_os_str().to_owned());
        for arg in [
            "-ac".to_string(),
            CHANNELS.to_string(),
            "-ar".to_string(),
            SAMPLE_RATE.to_string(),
            "-f".to_string(),
            "s16le".to_string(),
            "-acodec".to_string(),
            "pcm_s16le".to_string(),
            "-v".to_string(),
            "quiet".to_string(),
            "pipe:1".to_string(),
        ] {
            args.push(arg.into());
        }
        args
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl DecodePort for FfmpegDecoder {
    async fn start(&self, source: &Path) -> Result<Box<dyn FrameStream>> {
        info!("Starting ffmpeg for {}", source.display());

        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.args(source))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Decode(format!("Failed to spawn ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Decode("Failed to capture ffmpeg stdout".to_string()))?;

        Ok(Box::new(FfmpegStream {
            child,
            stdout,
            buffer: vec![0; FRAME_BYTES],
            frames: 0,
        }))
    }
}

/// A running ffmpeg process.
struct FfmpegStream {
    child: Child,
    stdout: ChildStdout,
    buffer: Vec<u8>,
    frames: u64,
}

#[async_trait]
impl FrameStream for FfmpegStream {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut filled = 0;
        while filled < FRAME_BYTES {
            let n = self
                .stdout
                .read(&mut self.buffer[filled..])
                .await
                .map_err(|e| Error::Decode(format!("Failed to read ffmpeg output: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            let status = self
                .child
                .wait()
                .await
                .map_err(|e| Error::Decode(format!("Failed to wait for ffmpeg: {e}")))?;
            if !status.success() {
                return Err(Error::Decode(format!(
                    "ffmpeg exited with error (exit code: {:?})",
                    status.code()
                )));
            }
            debug!("ffmpeg finished after {} frames", self.frames);
            return Ok(None);
        }

        self.frames += 1;
        trace!("Read frame {} ({filled} bytes)", self.frames);
        Ok(Some(Frame::from_le_bytes(&self.buffer[..filled])))
    }

    async fn cancel(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("ffmpeg already exited: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_args_request_paced_stereo_s16() {
        let args = FfmpegDecoder::default().args(Path::new("/tmp/a.opus"));
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "-re");
        assert_eq!(args[2], "/tmp/a.opus");
        assert!(args.windows(2).any(|w| w == ["-f", "s16le"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "48000"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "2"]));
    }

    #[test]
    fn test_unpaced_drops_re() {
        let args = FfmpegDecoder::default()
            .unpaced()
            .args(Path::new("x"));
        assert_eq!(args[0], "-i");
    }

    #[tokio::test]
    async fn test_missing_binary_is_decode_error() {
        let decoder = FfmpegDecoder::new("/nonexistent/ffmpeg");
        let err = decoder.start(Path::new("/tmp/a.opus")).await.err().unwrap();
        assert!(matches!(err, Error::Decode(_)));
    }
}
