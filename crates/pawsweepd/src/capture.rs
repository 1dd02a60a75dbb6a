//! Capture gate: rate-limited, serialized still-image acquisition.
//!
//! The rate limit is measured from request acceptance, not completion. Every
//! call publishes exactly one `captureSuccess` or `captureError` live event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pawsweep_shared::{CaptureError, LiveEvent};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CaptureCommandConfig;
use crate::live::LiveBus;

const PHOTO_PREFIX: &str = "photo_";
const PHOTO_SUFFIX: &str = ".jpg";

/// One successful acquisition.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: Arc<[u8]>,
    pub captured_at: DateTime<Utc>,
}

// ============================================================================
// Backends
// ============================================================================

/// Physical capture mechanism.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Acquire one JPEG, leaving it at `target`, and return its bytes.
    async fn capture(&self, target: &Path) -> anyhow::Result<Vec<u8>>;
}

/// Runs an fswebcam-compatible command.
pub struct CommandCapture {
    config: CaptureCommandConfig,
}

impl CommandCapture {
    pub fn new(config: CaptureCommandConfig) -> Self {
        Self { config }
    }

    fn args(&self, target: &Path) -> Vec<String> {
        vec![
            "-q".to_string(),
            "--no-banner".to_string(),
            "-d".to_string(),
            self.config.device.clone(),
            "-r".to_string(),
            format!("{}x{}", self.config.width, self.config.height),
            "--jpeg".to_string(),
            self.config.quality.to_string(),
            target.display().to_string(),
        ]
    }
}

#[async_trait]
impl CaptureBackend for CommandCapture {
    fn name(&self) -> &str {
        &self.config.program
    }

    async fn capture(&self, target: &Path) -> anyhow::Result<Vec<u8>> {
        let run = Command::new(&self.config.program)
            .args(self.args(target))
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), run)
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {}s", self.config.timeout_secs))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.config.program, output.status, stderr.trim());
        }

        let bytes = tokio::fs::read(target).await?;
        if bytes.is_empty() {
            anyhow::bail!("{} produced an empty file", self.config.program);
        }
        Ok(bytes)
    }
}

/// In-memory backend returning canned bytes, or a canned failure.
pub struct FakeCapture {
    result: std::result::Result<Vec<u8>, String>,
    calls: std::sync::atomic::AtomicU64,
}

impl FakeCapture {
    pub fn returning(bytes: Vec<u8>) -> Self {
        Self {
            result: Ok(bytes),
            calls: Default::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: Default::default(),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureBackend for FakeCapture {
    fn name(&self) -> &str {
        "fake"
    }

    async fn capture(&self, _target: &Path) -> anyhow::Result<Vec<u8>> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.result.clone().map_err(anyhow::Error::msg)
    }
}

// ============================================================================
// Gate
// ============================================================================

#[derive(Default)]
struct GateState {
    last_accepted: Option<Instant>,
    last_stamp_ms: i64,
    last_photo: Option<CapturedImage>,
}

pub struct CaptureGate {
    backend: Option<Arc<dyn CaptureBackend>>,
    dir: PathBuf,
    min_interval: Duration,
    state: Mutex<GateState>,
    /// Held for the whole acquisition so the device sees one request at a time.
    acquire: Mutex<()>,
    bus: LiveBus,
}

impl CaptureGate {
    pub fn new(
        backend: Option<Arc<dyn CaptureBackend>>,
        dir: PathBuf,
        min_interval: Duration,
        bus: LiveBus,
    ) -> Self {
        Self {
            backend,
            dir,
            min_interval,
            state: Mutex::new(GateState::default()),
            acquire: Mutex::new(()),
            bus,
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Acquire a new image, subject to the rate limit.
    pub async fn request_capture(&self) -> Result<CapturedImage, CaptureError> {
        let result = self.capture_inner().await;
        match &result {
            Ok(image) => {
                info!("Capture complete: {}", image.filename);
                self.bus.publish(LiveEvent::CaptureSuccess {
                    filename: image.filename.clone(),
                });
            }
            Err(e) => {
                warn!("Capture failed: {}", e);
                self.bus.publish(LiveEvent::CaptureError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Most recent successful capture.
    pub async fn last_photo(&self) -> Option<CapturedImage> {
        self.state.lock().await.last_photo.clone()
    }

    async fn capture_inner(&self) -> Result<CapturedImage, CaptureError> {
        let backend = self.backend.clone().ok_or(CaptureError::NoBackend)?;

        let filename = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            if let Some(last) = state.last_accepted {
                let since = now.saturating_duration_since(last);
                if since < self.min_interval {
                    let retry_after_ms = (self.min_interval - since).as_millis() as u64;
                    return Err(CaptureError::RateLimited { retry_after_ms });
                }
            }
            state.last_accepted = Some(now);

            let stamp = Utc::now().timestamp_millis().max(state.last_stamp_ms + 1);
            state.last_stamp_ms = stamp;
            format!("{}{}{}", PHOTO_PREFIX, stamp, PHOTO_SUFFIX)
        };

        let _device = self.acquire.lock().await;
        self.purge_previous();

        let path = self.dir.join(&filename);
        let started = Instant::now();
        let bytes = backend
            .capture(&path)
            .await
            .map_err(|e| CaptureError::DeviceError(e.to_string()))?;
        debug!(
            "{} captured {} bytes in {}ms",
            backend.name(),
            bytes.len(),
            started.elapsed().as_millis()
        );

        let image = CapturedImage {
            filename,
            path,
            bytes: bytes.into(),
            captured_at: Utc::now(),
        };
        self.state.lock().await.last_photo = Some(image.clone());
        Ok(image)
    }

    /// Remove earlier `photo_*.jpg` files; the directory holds one photo at most.
    fn purge_previous(&self) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Cannot create capture dir {}: {}", self.dir.display(), e);
            return;
        }
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping photo cleanup: {}", e);
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(PHOTO_PREFIX) && name.ends_with(PHOTO_SUFFIX) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => debug!("Removed old photo {}", name),
                    Err(e) => warn!("Could not remove {}: {}", name, e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_with(backend: Option<Arc<dyn CaptureBackend>>, dir: &Path, bus: LiveBus) -> CaptureGate {
        CaptureGate::new(backend, dir.to_path_buf(), Duration::from_millis(3_000), bus)
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_capture_within_interval_is_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeCapture::returning(vec![1, 2, 3]));
        let gate = gate_with(Some(backend.clone()), dir.path(), LiveBus::default());

        let first = gate.request_capture().await.unwrap();
        tokio::time::advance(Duration::from_millis(1_000)).await;

        let second = gate.request_capture().await;
        assert!(matches!(second, Err(CaptureError::RateLimited { retry_after_ms: 2_000 })));
        assert_eq!(backend.calls(), 1);

        let last = gate.last_photo().await.unwrap();
        assert_eq!(last.filename, first.filename);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_allowed_after_interval() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with(
            Some(Arc::new(FakeCapture::returning(vec![9]))),
            dir.path(),
            LiveBus::default(),
        );

        let first = gate.request_capture().await.unwrap();
        tokio::time::advance(Duration::from_millis(3_000)).await;
        let second = gate.request_capture().await.unwrap();

        assert_ne!(first.filename, second.filename);
        assert_eq!(gate.last_photo().await.unwrap().filename, second.filename);
    }

    #[tokio::test]
    async fn test_no_backend() {
        let dir = tempfile::tempdir().unwrap();
        let bus = LiveBus::default();
        let mut rx = bus.subscribe();
        let gate = gate_with(None, dir.path(), bus);

        assert_eq!(gate.request_capture().await.unwrap_err(), CaptureError::NoBackend);
        match rx.recv().await.unwrap() {
            LiveEvent::CaptureError { code, .. } => assert_eq!(code, "no_backend"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(gate.last_photo().await.is_none());
    }

    #[tokio::test]
    async fn test_device_error_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let bus = LiveBus::default();
        let mut rx = bus.subscribe();
        let gate = gate_with(Some(Arc::new(FakeCapture::failing("no frame"))), dir.path(), bus);

        let err = gate.request_capture().await.unwrap_err();
        assert_eq!(err, CaptureError::DeviceError("no frame".to_string()));
        assert!(matches!(rx.recv().await.unwrap(), LiveEvent::CaptureError { .. }));
        assert!(rx.try_recv().is_err());
        assert!(gate.last_photo().await.is_none());
    }

    #[tokio::test]
    async fn test_success_notifies_observers() {
        let dir = tempfile::tempdir().unwrap();
        let bus = LiveBus::default();
        let mut rx = bus.subscribe();
        let gate = gate_with(Some(Arc::new(FakeCapture::returning(vec![7]))), dir.path(), bus);

        let image = gate.request_capture().await.unwrap();
        assert!(image.filename.starts_with("photo_"));
        assert!(image.filename.ends_with(".jpg"));
        assert_eq!(&*image.bytes, &[7]);
        match rx.recv().await.unwrap() {
            LiveEvent::CaptureSuccess { filename } => assert_eq!(filename, image.filename),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accepted_capture_purges_old_photos() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("photo_1.jpg"), b"old").unwrap();
        fs::write(dir.path().join("photo_2.jpg"), b"older").unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        let gate = gate_with(
            Some(Arc::new(FakeCapture::returning(vec![1]))),
            dir.path(),
            LiveBus::default(),
        );
        gate.request_capture().await.unwrap();

        assert!(!dir.path().join("photo_1.jpg").exists());
        assert!(!dir.path().join("photo_2.jpg").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_command_args() {
        let capture = CommandCapture::new(CaptureCommandConfig::default());
        let args = capture.args(Path::new("/tmp/photo_5.jpg"));
        assert_eq!(
            args,
            vec![
                "-q", "--no-banner", "-d", "/dev/video0", "-r", "480x360", "--jpeg", "85",
                "/tmp/photo_5.jpg"
            ]
        );
    }

    #[tokio::test]
    async fn test_command_capture_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let capture = CommandCapture::new(CaptureCommandConfig {
            program: "/nonexistent/fswebcam".to_string(),
            ..CaptureCommandConfig::default()
        });
        assert!(capture.capture(&dir.path().join("photo_1.jpg")).await.is_err());
    }
}
