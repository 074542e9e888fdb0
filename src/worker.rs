//! Render worker - runs in separate thread(s)
//!
//! Each task goes through the stages page fetch, rasterize, format convert,
//! scale and text extract. The cancel flag is checked after every stage and
//! a cancelled task posts no result.

use std::sync::Arc;

use flume::{Receiver, Sender};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, Rgba};
use log::{debug, error, warn};

use crate::backend::{BackendError, DocumentBackend, RawPixmap, RawWord};
use crate::request::{CancelFlag, RenderFault, RenderParams, RenderRequest, RenderResponse, RenderTask};
use crate::settings::{DpiTiers, ViewerConfig};
use crate::types::{PageSize, PixelBuffer, PixelFormat, QualityTier, Word};

/// Largest raster edge a single page may be rendered at, in pixels
const MAX_RASTER_DIMENSION: f32 = 8192.0;

/// Points per inch
const POINTS_PER_INCH: f32 = 72.0;

/// Immutable rasterization settings handed to every worker at spawn time
#[derive(Clone, Debug, PartialEq)]
pub struct RasterConfig {
    pub dpi_tiers: DpiTiers,
    pub preview_dpi: f32,
    pub max_display_width: f32,
}

impl From<&ViewerConfig> for RasterConfig {
    fn from(config: &ViewerConfig) -> Self {
        Self {
            dpi_tiers: config.dpi_tiers.clone(),
            preview_dpi: config.preview_dpi,
            max_display_width: config.max_display_width,
        }
    }
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self::from(&ViewerConfig::default())
    }
}

/// Pre-computed rasterization parameters for a page
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterSpec {
    /// DPI actually rendered at
    pub dpi: f32,
    /// Pixels per point handed to the backend
    pub scale: f32,
}

impl RasterSpec {
    /// Scale for the full-quality pass.
    ///
    /// A known target width overrides the zoom as the base scale. Final
    /// renders raise the DPI to a floor that grows with the base scale so
    /// small pages stay crisp.
    #[must_use]
    pub fn compute(
        page: PageSize,
        params: &RenderParams,
        tier: QualityTier,
        tiers: &DpiTiers,
    ) -> Self {
        let base = match params.target_width {
            Some(width) if page.width > 0.0 && width > 0 => width as f32 / page.width,
            _ => params.zoom,
        };

        let dpi = params.dpi.max(tiers.min_dpi);
        let dpi = match tier {
            QualityTier::Final if base <= 1.0 => dpi.max(tiers.low_zoom),
            QualityTier::Final if base <= 2.0 => dpi.max(tiers.mid_zoom),
            QualityTier::Final => dpi.max(tiers.high_zoom),
            QualityTier::Preview => dpi,
        };

        Self::capped(page, dpi, base * dpi / POINTS_PER_INCH)
    }

    /// Scale for the fast low-DPI preview pass
    #[must_use]
    pub fn preview(page: PageSize, params: &RenderParams, preview_dpi: f32) -> Self {
        Self::capped(page, preview_dpi, params.zoom * preview_dpi / POINTS_PER_INCH)
    }

    fn capped(page: PageSize, dpi: f32, scale: f32) -> Self {
        let max_dim = page.width.max(page.height) * scale;
        if max_dim > MAX_RASTER_DIMENSION {
            let reduction = MAX_RASTER_DIMENSION / max_dim;
            Self {
                dpi: dpi * reduction,
                scale: scale * reduction,
            }
        } else {
            Self { dpi, scale }
        }
    }
}

/// Why a task stopped before posting a page
enum Abort {
    Cancelled,
    Fault(RenderFault),
}

impl From<RenderFault> for Abort {
    fn from(fault: RenderFault) -> Self {
        Self::Fault(fault)
    }
}

impl From<BackendError> for Abort {
    fn from(err: BackendError) -> Self {
        Self::Fault(RenderFault::Backend(err))
    }
}

fn checkpoint(cancel: &CancelFlag) -> Result<(), Abort> {
    if cancel.is_cancelled() {
        Err(Abort::Cancelled)
    } else {
        Ok(())
    }
}

/// Main worker function - runs in a dedicated thread
#[expect(
    clippy::needless_pass_by_value,
    reason = "Values moved into thread, need ownership"
)]
pub fn render_worker(
    config: RasterConfig,
    requests: Receiver<RenderRequest>,
    responses: Sender<RenderResponse>,
) {
    for request in requests.iter() {
        match request {
            RenderRequest::Render(task) => handle_task(&config, task, &responses),
            RenderRequest::Shutdown => break,
        }
    }

    let _ = responses.send(RenderResponse::WorkerExited);
}

fn handle_task(config: &RasterConfig, task: RenderTask, responses: &Sender<RenderResponse>) {
    let RenderTask { id, page, .. } = task;

    let response = match render_page(task.doc.as_ref(), config, &task, responses) {
        Ok((pixels, words)) => RenderResponse::Page {
            id,
            page,
            pixels: Arc::new(pixels),
            words: words.into(),
        },
        Err(Abort::Cancelled) => {
            debug!("Render of page {page} cancelled");
            RenderResponse::Cancelled { id, page }
        }
        Err(Abort::Fault(error)) => {
            error!("Failed to render page {page}: {error}");
            RenderResponse::Failed { id, page, error }
        }
    };

    let _ = responses.send(response);
}

/// Render a single page, posting a preview first for the preview tier
fn render_page(
    doc: &dyn DocumentBackend,
    config: &RasterConfig,
    task: &RenderTask,
    responses: &Sender<RenderResponse>,
) -> Result<(PixelBuffer, Vec<Word>), Abort> {
    let cancel = &task.cancel;
    checkpoint(cancel)?;

    let page_size = doc.page_size(task.page)?;
    checkpoint(cancel)?;

    let target_width = task
        .params
        .target_width
        .unwrap_or(config.max_display_width as u32);

    if task.tier == QualityTier::Preview {
        match render_preview(doc, config, task, page_size, target_width) {
            Ok(pixels) => {
                checkpoint(cancel)?;
                let _ = responses.send(RenderResponse::Preview {
                    id: task.id,
                    page: task.page,
                    pixels: Arc::new(pixels),
                });
            }
            Err(Abort::Fault(e)) => warn!("Preview of page {} failed: {e}", task.page),
            Err(Abort::Cancelled) => return Err(Abort::Cancelled),
        }
    }

    let spec = RasterSpec::compute(page_size, &task.params, task.tier, &config.dpi_tiers);
    debug!(
        "Rendering page {} at {:.0} dpi (scale {:.3}, {:?})",
        task.page, spec.dpi, spec.scale, task.tier
    );

    let raw = doc.rasterize(task.page, spec.scale)?;
    checkpoint(cancel)?;

    let pixels = convert_pixmap(&raw)?;
    checkpoint(cancel)?;

    let pixels = downscale_to_width(pixels, target_width)?;
    checkpoint(cancel)?;

    let words = collect_words(doc.extract_words(task.page)?, task.page, cancel)?;
    checkpoint(cancel)?;

    Ok((pixels, words))
}

fn render_preview(
    doc: &dyn DocumentBackend,
    config: &RasterConfig,
    task: &RenderTask,
    page_size: PageSize,
    target_width: u32,
) -> Result<PixelBuffer, Abort> {
    let spec = RasterSpec::preview(page_size, &task.params, config.preview_dpi);
    let raw = doc.rasterize(task.page, spec.scale)?;
    checkpoint(&task.cancel)?;

    let pixels = convert_pixmap(&raw)?;
    checkpoint(&task.cancel)?;

    Ok(downscale_to_width(pixels, target_width)?)
}

/// Convert to the RGBA display format, falling back to plain RGB
pub fn convert_pixmap(raw: &RawPixmap) -> Result<PixelBuffer, RenderFault> {
    match pixmap_to_rgba(raw) {
        Ok(pixels) => Ok(pixels),
        Err(e) => {
            warn!("RGBA conversion failed ({e}), falling back to RGB");
            pixmap_to_rgb(raw)
        }
    }
}

fn pixmap_to_rgba(raw: &RawPixmap) -> Result<PixelBuffer, RenderFault> {
    let n = usize::from(raw.channels);
    if n != 3 && n != 4 {
        return Err(RenderFault::conversion(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let width = raw.width as usize;
    let height = raw.height as usize;
    if width == 0 || height == 0 {
        return Err(RenderFault::conversion("Empty pixmap"));
    }

    let row_bytes = width * n;
    let expected_min = raw.stride.saturating_mul(height - 1) + row_bytes;
    if raw.samples.len() < expected_min || row_bytes > raw.stride {
        return Err(RenderFault::conversion("Pixmap buffer size mismatch"));
    }

    let mut out = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        let row_start = y * raw.stride;
        let row = &raw.samples[row_start..row_start + row_bytes];
        for px in row.chunks_exact(n) {
            out.extend_from_slice(&px[..3]);
            out.push(0xFF);
        }
    }

    Ok(PixelBuffer {
        width: raw.width,
        height: raw.height,
        format: PixelFormat::Rgba8,
        data: out,
    })
}

/// Accepts gray, gray+alpha, RGB and RGBA and tolerates a short buffer,
/// padding missing samples with white.
fn pixmap_to_rgb(raw: &RawPixmap) -> Result<PixelBuffer, RenderFault> {
    let n = usize::from(raw.channels);
    let width = raw.width as usize;
    let height = raw.height as usize;
    if n == 0 || width == 0 || height == 0 {
        return Err(RenderFault::conversion("Empty pixmap"));
    }

    let stride = raw.stride.max(width * n);
    let sample = |offset: usize| raw.samples.get(offset).copied().unwrap_or(0xFF);

    let mut out = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            let offset = y * stride + x * n;
            if n < 3 {
                let v = sample(offset);
                out.extend_from_slice(&[v, v, v]);
            } else {
                out.extend_from_slice(&[sample(offset), sample(offset + 1), sample(offset + 2)]);
            }
        }
    }

    Ok(PixelBuffer {
        width: raw.width,
        height: raw.height,
        format: PixelFormat::Rgb8,
        data: out,
    })
}

/// Downscale with a bilinear filter when wider than `target_width`,
/// preserving the aspect ratio. Narrower bitmaps are returned untouched.
pub fn downscale_to_width(
    pixels: PixelBuffer,
    target_width: u32,
) -> Result<PixelBuffer, RenderFault> {
    if target_width == 0 || pixels.width <= target_width {
        return Ok(pixels);
    }

    let ratio = target_width as f32 / pixels.width as f32;
    let target_height = ((pixels.height as f32 * ratio).round() as u32).max(1);
    let (width, height, format) = (pixels.width, pixels.height, pixels.format);

    let resized = match format {
        PixelFormat::Rgba8 => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, pixels.data)
            .map(|img| {
                imageops::resize(&img, target_width, target_height, FilterType::Triangle).into_raw()
            }),
        PixelFormat::Rgb8 => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, pixels.data)
            .map(|img| {
                imageops::resize(&img, target_width, target_height, FilterType::Triangle).into_raw()
            }),
    };

    let data = resized.ok_or_else(|| {
        RenderFault::conversion(format!("pixel buffer does not match {width}x{height}"))
    })?;
    Ok(PixelBuffer {
        width: target_width,
        height: target_height,
        format,
        data,
    })
}

fn collect_words(
    raw: Vec<RawWord>,
    page: usize,
    cancel: &CancelFlag,
) -> Result<Vec<Word>, Abort> {
    let mut words = Vec::with_capacity(raw.len());
    for word in raw {
        checkpoint(cancel)?;
        if word.text.trim().is_empty() {
            continue;
        }
        words.push(Word {
            text: word.text,
            bbox: word.bbox,
            page_index: page,
        });
    }
    Ok(words)
}
