//! Inference gate.
//!
//! Serializes classification (a concurrent call is rejected with `Busy`
//! instead of queued), applies the same preprocessing on every call, and
//! keeps running latency stats.
//!
//! ## Preprocessing
//!
//! decode → RGB8 → bilinear resize to `input_size`² → `(v / 255 - 0.5) * 2`,
//! laid out NHWC as `[1, S, S, 3]`.

use async_trait::async_trait;
use image::imageops::FilterType;
use pawsweep_shared::{InferenceError, InferenceVerdict, PerformanceSnapshot, Thresholds};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Normalized model input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    pub size: u32,
    pub data: Vec<f32>,
}

impl InputTensor {
    pub fn zeros(size: u32) -> Self {
        Self {
            size,
            data: vec![0.0; (size as usize) * (size as usize) * 3],
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        [1, self.size as usize, self.size as usize, 3]
    }
}

/// Decode and normalize an encoded image into model input.
pub fn preprocess(bytes: &[u8], size: u32) -> Result<InputTensor, InferenceError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| InferenceError::BadImage(e.to_string()))?;
    let rgb = decoded.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let data = rgb
        .as_raw()
        .iter()
        .map(|&v| (f32::from(v) / 255.0 - 0.5) * 2.0)
        .collect();
    Ok(InputTensor { size, data })
}

// ============================================================================
// Model runtime
// ============================================================================

/// Opaque classifier: input tensor → `[waste, liquid, none]` scores.
#[async_trait]
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    async fn predict(&self, input: &InputTensor) -> anyhow::Result<Vec<f32>>;

    /// Release runtime memory. Called periodically by the gate.
    fn reclaim(&self) {}
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    shape: [usize; 4],
    data: &'a [f32],
}

#[derive(Deserialize)]
struct PredictResponse {
    probabilities: Vec<f32>,
}

/// Model served by an external HTTP runtime.
pub struct HttpModel {
    client: reqwest::Client,
    url: String,
}

impl HttpModel {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Model for HttpModel {
    fn name(&self) -> &str {
        &self.url
    }

    async fn predict(&self, input: &InputTensor) -> anyhow::Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.url)
            .json(&PredictRequest {
                shape: input.shape(),
                data: &input.data,
            })
            .send()
            .await?
            .error_for_status()?;
        let body: PredictResponse = response.json().await?;
        Ok(body.probabilities)
    }
}

/// Fixed-output model with an optional simulated latency.
pub struct FakeModel {
    outputs: std::sync::Mutex<Vec<f32>>,
    latency: Duration,
    fail: AtomicBool,
    predictions: AtomicU64,
    reclaims: AtomicU64,
}

impl FakeModel {
    pub fn new(outputs: Vec<f32>) -> Self {
        Self {
            outputs: std::sync::Mutex::new(outputs),
            latency: Duration::ZERO,
            fail: AtomicBool::new(false),
            predictions: AtomicU64::new(0),
            reclaims: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_outputs(&self, outputs: Vec<f32>) {
        *self.outputs.lock().unwrap_or_else(|e| e.into_inner()) = outputs;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn predictions(&self) -> u64 {
        self.predictions.load(Ordering::SeqCst)
    }

    pub fn reclaims(&self) -> u64 {
        self.reclaims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Model for FakeModel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn predict(&self, _input: &InputTensor) -> anyhow::Result<Vec<f32>> {
        self.predictions.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("runtime fault");
        }
        Ok(self.outputs.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn reclaim(&self) {
        self.reclaims.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Gate
// ============================================================================

pub struct InferenceGate {
    model: RwLock<Option<Arc<dyn Model>>>,
    in_flight: AtomicBool,
    inference_count: AtomicU64,
    total_latency_ms: AtomicU64,
    input_size: u32,
    thresholds: Thresholds,
    reclaim_every: u64,
}

/// Clears the in-flight flag on drop.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl InferenceGate {
    pub fn new(input_size: u32, thresholds: Thresholds, reclaim_every: u64) -> Self {
        Self {
            model: RwLock::new(None),
            in_flight: AtomicBool::new(false),
            inference_count: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            input_size,
            thresholds,
            reclaim_every,
        }
    }

    /// Warm the model up with an all-zero input, then make it available.
    /// A failed warm-up leaves the gate not ready.
    pub async fn load(&self, model: Arc<dyn Model>) -> anyhow::Result<()> {
        info!("Warming up model {}", model.name());
        let started = Instant::now();
        model.predict(&InputTensor::zeros(self.input_size)).await?;
        info!(
            "Model {} ready ({}ms warm-up, input {}x{}, thresholds sum>{} margin>{})",
            model.name(),
            started.elapsed().as_millis(),
            self.input_size,
            self.input_size,
            self.thresholds.sum,
            self.thresholds.margin
        );
        *self.model.write().await = Some(model);
        Ok(())
    }

    pub async fn is_ready(&self) -> bool {
        self.model.read().await.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn inference_count(&self) -> u64 {
        self.inference_count.load(Ordering::SeqCst)
    }

    pub fn performance(&self) -> PerformanceSnapshot {
        let count = self.inference_count();
        let total = self.total_latency_ms.load(Ordering::SeqCst);
        PerformanceSnapshot {
            inference_count: count,
            avg_inference_ms: if count > 0 { total as f64 / count as f64 } else { 0.0 },
            input_size: self.input_size,
            inference_running: self.is_busy(),
        }
    }

    /// Classify one encoded image.
    pub async fn classify(&self, bytes: &[u8]) -> Result<InferenceVerdict, InferenceError> {
        let _guard = self.try_begin().ok_or(InferenceError::Busy)?;

        let model = self
            .model
            .read()
            .await
            .clone()
            .ok_or(InferenceError::NotReady)?;

        let started = Instant::now();
        let owned = bytes.to_vec();
        let size = self.input_size;
        let input = tokio::task::spawn_blocking(move || preprocess(&owned, size))
            .await
            .map_err(|e| {
                warn!("Preprocess task error: {}", e);
                InferenceError::Prediction(e.to_string())
            })??;
        let outputs = model.predict(&input).await.map_err(|e| {
            warn!("Prediction failed on {}: {}", model.name(), e);
            InferenceError::Prediction(e.to_string())
        })?;
        let verdict = InferenceVerdict::from_outputs(&outputs, self.thresholds);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let count = self.inference_count.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total_latency_ms.fetch_add(elapsed_ms, Ordering::SeqCst) + elapsed_ms;
        info!(
            "[AI-{}] {}ms (avg:{}ms) {}",
            count,
            elapsed_ms,
            total / count,
            verdict
        );

        if self.reclaim_every > 0 && count % self.reclaim_every == 0 {
            debug!("Reclaiming model resources after {} inferences", count);
            model.reclaim();
        }

        Ok(verdict)
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard {
                flag: &self.in_flight,
            })
    }
}

/// Encode a solid-color PNG, for tests and bench runs.
pub fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut buf = std::io::Cursor::new(Vec::new());
    // Writing a small in-memory PNG cannot fail.
    let _ = image::DynamicImage::ImageRgb8(img).write_to(&mut buf, image::ImageFormat::Png);
    buf.into_inner()
}
