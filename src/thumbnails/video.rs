use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

use super::ThumbnailError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Find ffmpeg: an explicitly configured binary if it exists, otherwise
/// whatever `ffmpeg` resolves to on `PATH`.
pub fn locate_ffmpeg(configured: Option<&Path>) -> Option<PathBuf> {
    let found = match configured {
        Some(path) if path.is_file() => Some(path.to_path_buf()),
        Some(path) => {
            tracing::warn!("Configured ffmpeg {} does not exist", path.display());
            None
        }
        None => which::which("ffmpeg").ok(),
    };
    match &found {
        Some(path) => tracing::info!("ffmpeg found at {} (video thumbnails enabled)", path.display()),
        None => tracing::info!("ffmpeg not found (video thumbnails disabled)"),
    }
    found
}

fn scale_filter(max: u32) -> String {
    format!("scale='min({max},iw)':'min({max},ih)':force_original_aspect_ratio=decrease")
}

/// Extract one frame scaled to fit `max`, first at one second in and then,
/// if that fails, at the very start. The frame lives in a temp file that is
/// removed when the returned handle drops.
pub fn extract_frame(
    ffmpeg: &Path,
    src: &Path,
    max: u32,
    timeout: Duration,
) -> Result<NamedTempFile, ThumbnailError> {
    let frame = tempfile::Builder::new()
        .prefix("photoshelf-frame-")
        .suffix(".jpg")
        .tempfile()
        .map_err(|e| ThumbnailError::Write(e.to_string()))?;

    let first = run_ffmpeg(ffmpeg, src, frame.path(), max, Some("1"), timeout);
    match first {
        Ok(()) if has_data(frame.path()) => return Ok(frame),
        Err(ThumbnailError::ToolTimeout(t)) => return Err(ThumbnailError::ToolTimeout(t)),
        _ => {}
    }

    // Shorter than a second, or seeking failed.
    let first_msg = match first {
        Err(e) => e.to_string(),
        Ok(()) => "no frame at 1s".to_string(),
    };
    match run_ffmpeg(ffmpeg, src, frame.path(), max, None, timeout) {
        Ok(()) if has_data(frame.path()) => Ok(frame),
        Ok(()) => Err(ThumbnailError::Tool(format!("{first_msg} / no frame extracted"))),
        Err(ThumbnailError::ToolTimeout(t)) => Err(ThumbnailError::ToolTimeout(t)),
        Err(e) => Err(ThumbnailError::Tool(format!("{first_msg} / {e}"))),
    }
}

fn has_data(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

fn run_ffmpeg(
    ffmpeg: &Path,
    src: &Path,
    out: &Path,
    max: u32,
    seek: Option<&str>,
    timeout: Duration,
) -> Result<(), ThumbnailError> {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-v", "error"]);
    if let Some(seek) = seek {
        cmd.args(["-ss", seek]);
    }
    cmd.arg("-i")
        .arg(src)
        .args(["-frames:v", "1", "-vf"])
        .arg(scale_filter(max))
        .arg("-y")
        .arg(out)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let child = cmd
        .spawn()
        .map_err(|e| ThumbnailError::Tool(format!("failed to start ffmpeg: {e}")))?;
    wait_with_timeout(child, timeout)
}

/// Keep only the tail of ffmpeg's stderr in error messages.
const STDERR_TAIL: usize = 1024;

/// Poll until the child exits, killing it once `timeout` has passed.
/// Stderr is drained on its own thread so a chatty child never blocks on a
/// full pipe.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<(), ThumbnailError> {
    let drain = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });
    let collect = |drain: Option<thread::JoinHandle<Vec<u8>>>| -> String {
        drain
            .and_then(|h| h.join().ok())
            .map(|buf| stderr_tail(&buf))
            .unwrap_or_default()
    };

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => {
                collect(drain);
                return Ok(());
            }
            Ok(Some(status)) => {
                return Err(ThumbnailError::Tool(format!(
                    "ffmpeg exited with {status}: {}",
                    collect(drain)
                )));
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    collect(drain);
                    return Err(ThumbnailError::ToolTimeout(timeout));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                collect(drain);
                return Err(ThumbnailError::Tool(format!("failed to wait for ffmpeg: {e}")));
            }
        }
    }
}

fn stderr_tail(buf: &[u8]) -> String {
    let text = String::from_utf8_lossy(buf);
    let text = text.trim();
    match text.char_indices().rev().nth(STDERR_TAIL) {
        Some((i, _)) => text[i..].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_filter() {
        assert_eq!(
            scale_filter(250),
            "scale='min(250,iw)':'min(250,ih)':force_original_aspect_ratio=decrease"
        );
    }

    #[test]
    fn test_missing_configured_binary() {
        assert_eq!(locate_ffmpeg(Some(Path::new("/nonexistent/bin/ffmpeg"))), None);
    }

    #[test]
    fn test_unstartable_tool_is_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_frame(
            &dir.path().join("no-such-ffmpeg"),
            &dir.path().join("clip.mp4"),
            250,
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, ThumbnailError::Tool(_)), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_tool_is_killed() {
        let child = Command::new("sleep")
            .arg("30")
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let start = Instant::now();
        let err = wait_with_timeout(child, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ThumbnailError::ToolTimeout(_)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_tool_reports_exit() {
        let child = Command::new("false").stderr(Stdio::piped()).spawn().unwrap();
        let err = wait_with_timeout(child, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ThumbnailError::Tool(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_noisy_failing_tool_is_not_a_timeout() {
        let child = Command::new("sh")
            .args(["-c", "head -c 200000 /dev/zero >&2; echo decode failed >&2; exit 1"])
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let start = Instant::now();
        let err = wait_with_timeout(child, Duration::from_secs(20)).unwrap_err();
        match err {
            ThumbnailError::Tool(msg) => assert!(msg.ends_with("decode failed"), "got {msg}"),
            other => panic!("expected tool error, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let long = "x".repeat(5000);
        assert_eq!(stderr_tail(long.as_bytes()).len(), STDERR_TAIL + 1);
        assert_eq!(stderr_tail(b"  short\n"), "short");
    }

    /// A stand-in ffmpeg: logs the output path it was given to `log`, runs
    /// `on_seek` when called with `-ss`, and otherwise copies `frame` into place.
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, on_seek: &str, frame: &Path) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;
        let script = dir.join("ffmpeg");
        let log = dir.join("calls.log");
        let body = format!(
            "#!/bin/sh\n\
             for a; do out=\"$a\"; done\n\
             echo \"$out\" >> \"{log}\"\n\
             case \" $* \" in *\" -ss \"*) {on_seek} ;; esac\n\
             cp \"{frame}\" \"$out\"\n",
            log = log.display(),
            frame = frame.display(),
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script, log)
    }

    #[cfg(unix)]
    fn logged_outputs(log: &Path) -> Vec<PathBuf> {
        std::fs::read_to_string(log)
            .unwrap()
            .lines()
            .map(PathBuf::from)
            .collect()
    }

    #[cfg(unix)]
    #[test]
    fn test_seek_failure_retries_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let frame_src = dir.path().join("frame.jpg");
        std::fs::write(&frame_src, b"jpegish").unwrap();
        let (ffmpeg, log) =
            fake_ffmpeg(dir.path(), "echo seek past end >&2; exit 1", &frame_src);

        let frame = extract_frame(&ffmpeg, &dir.path().join("clip.mp4"), 250, Duration::from_secs(10))
            .unwrap();
        assert_eq!(std::fs::read(frame.path()).unwrap(), b"jpegish");

        let outputs = logged_outputs(&log);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0], outputs[1]);

        let frame_path = frame.path().to_path_buf();
        drop(frame);
        assert!(!frame_path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_seek_output_retries_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let frame_src = dir.path().join("frame.jpg");
        std::fs::write(&frame_src, b"jpegish").unwrap();
        let (ffmpeg, log) = fake_ffmpeg(dir.path(), "exit 0", &frame_src);

        let frame = extract_frame(&ffmpeg, &dir.path().join("short.mp4"), 250, Duration::from_secs(10))
            .unwrap();
        assert_eq!(std::fs::read(frame.path()).unwrap(), b"jpegish");
        assert_eq!(logged_outputs(&log).len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_both_attempts_failing_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (ffmpeg, log) = fake_ffmpeg(
            dir.path(),
            "echo seek failed >&2; exit 1",
            &dir.path().join("missing.jpg"),
        );

        let err = extract_frame(&ffmpeg, &dir.path().join("bad.mp4"), 250, Duration::from_secs(10))
            .unwrap_err();
        match err {
            ThumbnailError::Tool(msg) => assert!(msg.contains("seek failed"), "got {msg}"),
            other => panic!("expected tool error, got {other:?}"),
        }
        for out in logged_outputs(&log) {
            assert!(!out.exists(), "{} left behind", out.display());
        }
    }
}
