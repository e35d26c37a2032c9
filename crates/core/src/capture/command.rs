use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::CaptureDevice;
use crate::error::{Result, RobocamError};
use crate::media::FrameAssembler;
use crate::media::jpeg::FrameSplitter;

const READ_CHUNK: usize = 64 * 1024;

/// How long a freshly spawned encoder must survive before `start` reports
/// success. `rpicam-vid` without a camera attached exits well within this.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(300);

pub const DEFAULT_WIDTH: u32 = 320;
pub const DEFAULT_HEIGHT: u32 = 240;
pub const DEFAULT_FRAMERATE: u32 = 10;

/// External encoder process whose stdout is a Motion JPEG stream.
///
/// The default runs the Raspberry Pi camera stack:
///
/// ```text
/// rpicam-vid --codec mjpeg --width 320 --height 240 --framerate 10 \
///            --timeout 0 --nopreview --output -
/// ```
///
/// 320×240 at 10 fps is roughly 1.5 Mbit/s of MJPEG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    pub program: String,
    pub args: Vec<String>,
    pub startup_grace: Duration,
}

impl CommandConfig {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            startup_grace: DEFAULT_STARTUP_GRACE,
        }
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// `rpicam-vid` producing MJPEG on stdout at the given size and rate.
    pub fn rpicam(width: u32, height: u32, framerate: u32) -> Self {
        let (width, height, framerate) =
            (width.to_string(), height.to_string(), framerate.to_string());
        Self::new(
            "rpicam-vid",
            &[
                "--codec",
                "mjpeg",
                "--width",
                &width,
                "--height",
                &height,
                "--framerate",
                &framerate,
                "--timeout",
                "0",
                "--nopreview",
                "--output",
                "-",
            ],
        )
    }

    /// Parse a whitespace-separated command line. Returns `None` if empty.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
            startup_grace: DEFAULT_STARTUP_GRACE,
        })
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self::rpicam(DEFAULT_WIDTH, DEFAULT_HEIGHT, DEFAULT_FRAMERATE)
    }
}

/// Capture device backed by a child process.
///
/// `start` spawns the process and a reader thread that pumps its stdout
/// through a [`FrameSplitter`] into the assembler, then waits out the
/// startup grace so an encoder that exits at once is a start failure. `stop`
/// kills the process and joins the reader.
pub struct CommandDevice {
    config: CommandConfig,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
    /// Set by the reader once the encoder's output has ended.
    exited: Arc<AtomicBool>,
}

impl CommandDevice {
    pub fn new(config: CommandConfig) -> Self {
        Self {
            config,
            child: None,
            reader: None,
            stopping: Arc::new(AtomicBool::new(false)),
            exited: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    fn spawn_reader(
        &self,
        stdout: ChildStdout,
        sink: FrameAssembler,
    ) -> std::io::Result<JoinHandle<()>> {
        let stopping = self.stopping.clone();
        let exited = self.exited.clone();
        let program = self.config.program.clone();
        thread::Builder::new()
            .name("capture-reader".to_string())
            .spawn(move || {
                pump(stdout, sink, &program, &stopping);
                exited.store(true, Ordering::SeqCst);
            })
    }

    /// Wait out the startup grace. Returns the exit status if the encoder
    /// died during it.
    fn await_startup(&self, child: &mut Child) -> std::io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + self.config.startup_grace;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl CaptureDevice for CommandDevice {
    fn start(&mut self, sink: FrameAssembler) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RobocamError::DeviceStart(format!("{}: {}", self.config.program, e)))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RobocamError::DeviceStart(format!(
                "{}: stdout not captured",
                self.config.program
            )));
        };

        self.stopping.store(false, Ordering::SeqCst);
        self.exited.store(false, Ordering::SeqCst);
        let reader = match self.spawn_reader(stdout, sink) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RobocamError::DeviceStart(format!("reader thread: {}", e)));
            }
        };

        tracing::debug!(program = %self.config.program, pid = child.id(), "encoder process spawned");

        let early_exit = match self.await_startup(&mut child) {
            Ok(None) => None,
            Ok(Some(status)) => Some(format!("exited during startup ({})", status)),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Some(format!("wait: {}", e))
            }
        };
        if let Some(reason) = early_exit {
            let _ = reader.join();
            return Err(RobocamError::DeviceStart(format!(
                "{}: {}",
                self.config.program, reason
            )));
        }
        self.child = Some(child);
        self.reader = Some(reader);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        self.stopping.store(true, Ordering::SeqCst);

        let killed = child.kill();
        let waited = child.wait();

        if self.reader.take().is_some_and(|r| r.join().is_err()) {
            tracing::warn!("capture reader thread panicked");
        }

        killed.map_err(|e| RobocamError::DeviceStop(format!("kill: {}", e)))?;
        let status = waited.map_err(|e| RobocamError::DeviceStop(format!("wait: {}", e)))?;
        tracing::debug!(program = %self.config.program, %status, "encoder process exited");
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.child.is_some() && !self.exited.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.config.program
    }
}

impl Drop for CommandDevice {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "encoder cleanup failed");
        }
    }
}

/// Reader thread body: encoder stdout → splitter → assembler.
///
/// Only complete images are published when the output ends. If the encoder
/// went away without being asked to, the broadcaster is told the source is
/// lost so waiting viewers end instead of blocking on a dead camera.
fn pump(mut stdout: impl Read, mut sink: FrameAssembler, program: &str, stopping: &AtomicBool) {
    let mut splitter = FrameSplitter::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => splitter.push(&buf[..n], |frame| {
                sink.write(frame);
            }),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(program, error = %e, "encoder read failed");
                break;
            }
        }
    }

    // Splitter segments are whole images, so the assembler's buffer is safe
    // to flush; a truncated tail never leaves the splitter.
    splitter.finish(|frame| {
        sink.write(frame);
    });
    sink.flush();

    if stopping.load(Ordering::SeqCst) {
        tracing::debug!(program, frames = sink.frames(), "encoder output closed");
    } else {
        tracing::error!(program, frames = sink.frames(), "encoder exited unexpectedly");
        sink.source_lost();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FrameBroadcaster;

    fn image(tag: u8) -> Vec<u8> {
        vec![0xFF, 0xD8, 0xFF, 0xE0, tag, tag, 0xFF, 0xD9]
    }

    #[test]
    fn default_is_rpicam_qvga() {
        let cfg = CommandConfig::default();
        assert_eq!(cfg.program, "rpicam-vid");
        assert!(cfg.args.windows(2).any(|w| w == ["--codec", "mjpeg"]));
        assert!(cfg.args.windows(2).any(|w| w == ["--width", "320"]));
        assert!(cfg.args.windows(2).any(|w| w == ["--height", "240"]));
        assert!(cfg.args.windows(2).any(|w| w == ["--framerate", "10"]));
        assert!(cfg.args.ends_with(&["--output".to_string(), "-".to_string()]));
    }

    #[test]
    fn parse_command_line() {
        let cfg = CommandConfig::from_command_line("  cat  /tmp/clip.mjpeg ").unwrap();
        assert_eq!(cfg, CommandConfig::new("cat", &["/tmp/clip.mjpeg"]));
        assert!(CommandConfig::from_command_line("   ").is_none());
    }

    #[test]
    fn pump_publishes_every_frame_at_eof() {
        let broadcaster = Arc::new(FrameBroadcaster::new());
        let sink = FrameAssembler::new(broadcaster.clone());
        let stream = [image(1), image(2), image(3)].concat();
        let stopping = AtomicBool::new(true);

        // One read carrying several frames back to back.
        let reader = std::io::Cursor::new(stream);
        pump(reader, sink, "test", &stopping);

        assert_eq!(broadcaster.published(), 3);
        assert_eq!(broadcaster.latest().unwrap().as_bytes(), image(3).as_slice());
        assert!(!broadcaster.is_source_lost());
    }

    #[test]
    fn pump_drops_truncated_tail_and_flags_crash() {
        let broadcaster = Arc::new(FrameBroadcaster::new());
        let sink = FrameAssembler::new(broadcaster.clone());
        let cut = image(3);
        let stream = [image(1), image(2), cut[..cut.len() - 3].to_vec()].concat();
        let stopping = AtomicBool::new(false);

        pump(std::io::Cursor::new(stream), sink, "test", &stopping);

        assert_eq!(broadcaster.published(), 2);
        assert_eq!(broadcaster.latest().unwrap().as_bytes(), image(2).as_slice());
        assert!(broadcaster.is_source_lost());
    }

    /// `sh` command printing `frames` tiny JPEGs, then staying alive.
    fn shell_camera(frames: usize, then: &str) -> CommandConfig {
        let jpeg = r"\377\330\377\340\001\377\331";
        let script = format!("printf '{}'; {}", jpeg.repeat(frames), then);
        CommandConfig::new("sh", &["-c", &script]).with_startup_grace(Duration::from_millis(50))
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            if Instant::now() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    #[test]
    fn child_process_frames_then_clean_stop() {
        let broadcaster = Arc::new(FrameBroadcaster::new());
        let mut device = CommandDevice::new(shell_camera(3, "exec sleep 30"));

        device.start(FrameAssembler::new(broadcaster.clone())).unwrap();
        assert!(device.is_running());
        assert!(device.is_alive());

        // Frames 1 and 2 are closed by the following start marker; the third
        // waits for more output.
        assert!(wait_until(|| broadcaster.published() >= 2));
        assert_eq!(broadcaster.latest().unwrap().len(), 7);

        let started = Instant::now();
        device.stop().unwrap();
        // Killed, reaped and joined, not left to finish its sleep.
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!device.is_running());
        assert!(!device.is_alive());
        assert!(device.child.is_none());
        assert!(device.reader.is_none());
        // A requested stop is not a lost source.
        assert!(!broadcaster.is_source_lost());
    }

    #[test]
    fn drop_stops_child_process() {
        let broadcaster = Arc::new(FrameBroadcaster::new());
        let mut device = CommandDevice::new(shell_camera(0, "exec sleep 30"));
        device.start(FrameAssembler::new(broadcaster.clone())).unwrap();

        let started = Instant::now();
        drop(device);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!broadcaster.is_source_lost());
    }

    #[test]
    fn encoder_exiting_at_once_fails_start() {
        let broadcaster = Arc::new(FrameBroadcaster::new());
        let mut device = CommandDevice::new(CommandConfig::new("true", &[]));
        let err = device.start(FrameAssembler::new(broadcaster)).unwrap_err();
        assert!(matches!(err, RobocamError::DeviceStart(_)));
        assert!(!device.is_running());
    }

    #[test]
    fn encoder_dying_later_releases_viewers() {
        let broadcaster = Arc::new(FrameBroadcaster::new());
        let mut device = CommandDevice::new(shell_camera(0, "sleep 0.3"));
        device.start(FrameAssembler::new(broadcaster.clone())).unwrap();

        let waiter = {
            let b = broadcaster.clone();
            thread::spawn(move || b.await_next())
        };
        assert!(waiter.join().unwrap().is_none());
        assert!(wait_until(|| !device.is_alive()));
        assert!(device.is_running());

        device.stop().unwrap();
        assert!(!device.is_running());
    }

    #[test]
    fn missing_program_fails_start() {
        let broadcaster = Arc::new(FrameBroadcaster::new());
        let mut device = CommandDevice::new(CommandConfig::new(
            "/nonexistent/robocam-encoder",
            &[],
        ));
        let err = device
            .start(FrameAssembler::new(broadcaster))
            .unwrap_err();
        assert!(matches!(err, RobocamError::DeviceStart(_)));
        assert!(!device.is_running());
    }

    #[test]
    fn stop_when_idle_is_ok() {
        let mut device = CommandDevice::new(CommandConfig::default());
        assert!(device.stop().is_ok());
    }
}
