//! Bounded-concurrency image download and optimization.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tokio::sync::Semaphore;
use tokio_retry::strategy::ExponentialBackoff;

use crate::config::{
    IMAGE_CONCURRENCY, IMAGE_DOWNLOAD_ATTEMPTS, IMAGE_DOWNLOAD_TIMEOUT, IMAGE_JPEG_QUALITY,
    IMAGE_MAX_BYTES, IMAGE_MAX_DIMENSION, IMAGE_MIN_DIMENSION,
};

/// One successfully processed image.
#[derive(Debug, Clone)]
pub struct ImageResult {
    /// URL the image was downloaded from.
    pub source_url: String,
    /// Product the image belongs to.
    pub product_id: String,
    /// Where the optimized JPEG was written.
    pub path: PathBuf,
    /// Pixel dimensions after optimization.
    pub width: u32,
    /// Pixel dimensions after optimization.
    pub height: u32,
    /// Size of the written file in bytes.
    pub byte_size: u64,
    /// Display hint: first successfully processed image for the product.
    /// Completion order is non-deterministic, so which URL wins is too.
    pub primary: bool,
}

/// Outcome of one [`ImagePipeline::process`] call.
#[derive(Debug, Default)]
pub struct ProcessedImages {
    /// Successfully processed images, primary first if any.
    pub results: Vec<ImageResult>,
    /// Per-URL failures; one bad image never fails the whole product.
    pub errors: Vec<String>,
    /// Raw bytes downloaded, for bandwidth accounting.
    pub bytes_fetched: u64,
}

/// Downloads, validates, and optimizes product images under a fixed
/// concurrency ceiling.
///
/// Output files are written to `<root>/<product_id>/<url-hash>.jpg`; the
/// name is derived from the source URL only, so re-processing the same URL
/// deterministically overwrites the same file.
pub struct ImagePipeline {
    root: PathBuf,
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
}

impl ImagePipeline {
    pub fn new(root: PathBuf) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(IMAGE_DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(ImagePipeline {
            root,
            client,
            semaphore: Arc::new(Semaphore::new(IMAGE_CONCURRENCY)),
        })
    }

    /// Root directory images are written under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Processes a product's image URLs concurrently.
    ///
    /// Input URLs are deduplicated (order-preserving). Each URL is
    /// downloaded with bounded retries, validated (content type, minimum
    /// dimensions, maximum byte size), normalized to RGB, downscaled if its
    /// longest side exceeds the maximum, and re-encoded as JPEG. The first
    /// URL to finish successfully is flagged primary.
    pub async fn process(&self, urls: &[String], product_id: &str) -> ProcessedImages {
        let mut outcome = ProcessedImages::default();

        let mut seen = HashSet::new();
        let unique: Vec<&String> = urls.iter().filter(|u| seen.insert(u.as_str())).collect();
        if unique.is_empty() {
            return outcome;
        }

        let product_dir = self.root.join(product_id);
        if let Err(e) = tokio::fs::create_dir_all(&product_dir).await {
            outcome
                .errors
                .push(format!("failed to create {}: {e}", product_dir.display()));
            return outcome;
        }

        let mut tasks = FuturesUnordered::new();
        for url in unique {
            let url = url.clone();
            let product_id = product_id.to_string();
            let dest = product_dir.join(format!("{}.jpg", url_hash(&url)));
            let client = self.client.clone();
            let semaphore = Arc::clone(&self.semaphore);
            tasks.push(async move {
                let _permit = semaphore.acquire_owned().await;
                process_one(&client, &url, &product_id, dest).await
            });
        }

        while let Some(result) = tasks.next().await {
            match result {
                Ok((mut image, fetched)) => {
                    outcome.bytes_fetched += fetched;
                    image.primary = outcome.results.is_empty();
                    outcome.results.push(image);
                }
                Err(e) => {
                    log::warn!("image processing failed: {e}");
                    outcome.errors.push(e);
                }
            }
        }
        outcome
    }

    /// Reconciliation pass: removes files under the storage root that are
    /// not in `active_paths`, then removes emptied product directories.
    ///
    /// Returns the number of files deleted. Running it twice with the same
    /// input is a no-op the second time.
    pub fn cleanup(&self, active_paths: &HashSet<PathBuf>) -> std::io::Result<usize> {
        let mut removed = 0;
        if !self.root.exists() {
            return Ok(0);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let product_dir = entry?.path();
            if !product_dir.is_dir() {
                continue;
            }
            for file in std::fs::read_dir(&product_dir)? {
                let path = file?.path();
                if !active_paths.contains(&path) {
                    if let Err(e) = std::fs::remove_file(&path) {
                        log::warn!("failed to remove {}: {e}", path.display());
                    } else {
                        log::debug!("removed unreferenced image {}", path.display());
                        removed += 1;
                    }
                }
            }
            if std::fs::read_dir(&product_dir)?.next().is_none() {
                std::fs::remove_dir(&product_dir)?;
            }
        }
        Ok(removed)
    }
}

/// Deterministic file stem for a source URL.
fn url_hash(url: &str) -> String {
    blake3::hash(url.as_bytes()).to_hex()[..10].to_string()
}

/// Downloads and optimizes one image; any failure becomes a descriptive
/// per-URL error string.
async fn process_one(
    client: &reqwest::Client,
    url: &str,
    product_id: &str,
    dest: PathBuf,
) -> Result<(ImageResult, u64), String> {
    let body = download_with_retries(client, url).await?;
    let fetched = body.len() as u64;

    let source_url = url.to_string();
    let product_id = product_id.to_string();
    let written = tokio::task::spawn_blocking(move || optimize_and_write(&body, &dest))
        .await
        .map_err(|e| format!("image task for {source_url} panicked: {e}"))??;

    Ok((
        ImageResult {
            source_url: url.to_string(),
            product_id,
            path: written.path,
            width: written.width,
            height: written.height,
            byte_size: written.byte_size,
            primary: false,
        },
        fetched,
    ))
}

async fn download_with_retries(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, String> {
    let mut delays = ExponentialBackoff::from_millis(500)
        .factor(2)
        .max_delay(Duration::from_secs(5))
        .take(IMAGE_DOWNLOAD_ATTEMPTS - 1);

    loop {
        match try_download(client, url).await {
            Ok(body) => return Ok(body),
            Err(e) => match delays.next() {
                Some(delay) => {
                    log::debug!("retrying image download {url}: {e}");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(format!("download failed for {url}: {e}")),
            },
        }
    }
}

async fn try_download(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status().as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("image/") {
        return Err(format!("not an image: content-type {content_type:?}"));
    }

    let body = response.bytes().await.map_err(|e| e.to_string())?;
    if body.len() > IMAGE_MAX_BYTES {
        return Err(format!("image too large: {} bytes", body.len()));
    }
    Ok(body.to_vec())
}

#[derive(Debug)]
struct WrittenImage {
    path: PathBuf,
    width: u32,
    height: u32,
    byte_size: u64,
}

/// Decode, validate, normalize, downscale, re-encode, write. CPU-bound, run
/// on the blocking pool.
fn optimize_and_write(body: &[u8], dest: &Path) -> Result<WrittenImage, String> {
    let decoded = image::load_from_memory(body).map_err(|e| format!("decode failed: {e}"))?;

    let (width, height) = (decoded.width(), decoded.height());
    if width < IMAGE_MIN_DIMENSION || height < IMAGE_MIN_DIMENSION {
        return Err(format!("image too small: {width}x{height}"));
    }

    // Normalize color mode, then downscale preserving aspect ratio.
    let mut image = DynamicImage::ImageRgb8(decoded.to_rgb8());
    if width.max(height) > IMAGE_MAX_DIMENSION {
        image = image.resize(IMAGE_MAX_DIMENSION, IMAGE_MAX_DIMENSION, FilterType::Lanczos3);
    }

    let mut encoded = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut encoded), IMAGE_JPEG_QUALITY);
    image
        .write_with_encoder(encoder)
        .map_err(|e| format!("encode failed: {e}"))?;

    std::fs::write(dest, &encoded).map_err(|e| format!("write {} failed: {e}", dest.display()))?;

    Ok(WrittenImage {
        path: dest.to_path_buf(),
        width: image.width(),
        height: image.height(),
        byte_size: encoded.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_hash_is_deterministic() {
        let a = url_hash("https://example.com/ring.jpg");
        let b = url_hash("https://example.com/ring.jpg");
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        assert_ne!(a, url_hash("https://example.com/other.jpg"));
    }

    #[test]
    fn test_optimize_rejects_undersized_image() {
        let mut png = Vec::new();
        let small = image::RgbImage::new(50, 50);
        DynamicImage::ImageRgb8(small)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let err = optimize_and_write(&png, &dir.path().join("out.jpg")).unwrap_err();
        assert!(err.contains("too small"), "unexpected error: {err}");
    }

    #[test]
    fn test_optimize_downscales_oversized_image() {
        let mut png = Vec::new();
        let big = image::RgbImage::new(2400, 1200);
        DynamicImage::ImageRgb8(big)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let written = optimize_and_write(&png, &dir.path().join("out.jpg")).unwrap();
        assert_eq!(written.width, IMAGE_MAX_DIMENSION);
        assert_eq!(written.height, IMAGE_MAX_DIMENSION / 2);
        assert!(written.path.exists());
    }

    #[test]
    fn test_optimize_keeps_valid_image_dimensions() {
        let mut png = Vec::new();
        let ok = image::RgbImage::new(640, 480);
        DynamicImage::ImageRgb8(ok)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let written = optimize_and_write(&png, &dir.path().join("out.jpg")).unwrap();
        assert_eq!((written.width, written.height), (640, 480));
        assert!(written.byte_size > 0);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ImagePipeline::new(dir.path().to_path_buf()).unwrap();

        let product_dir = dir.path().join("prod-1");
        std::fs::create_dir_all(&product_dir).unwrap();
        let keep = product_dir.join("keep.jpg");
        let drop = product_dir.join("drop.jpg");
        std::fs::write(&keep, b"jpg").unwrap();
        std::fs::write(&drop, b"jpg").unwrap();

        let active: HashSet<PathBuf> = [keep.clone()].into_iter().collect();
        let removed = pipeline.cleanup(&active).unwrap();
        assert_eq!(removed, 1);
        assert!(keep.exists());
        assert!(!drop.exists());

        // Second pass with identical input changes nothing.
        let removed_again = pipeline.cleanup(&active).unwrap();
        assert_eq!(removed_again, 0);
        assert!(keep.exists());
    }

    #[tokio::test]
    async fn test_cleanup_removes_emptied_directories() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ImagePipeline::new(dir.path().to_path_buf()).unwrap();

        let product_dir = dir.path().join("prod-2");
        std::fs::create_dir_all(&product_dir).unwrap();
        std::fs::write(product_dir.join("stale.jpg"), b"jpg").unwrap();

        pipeline.cleanup(&HashSet::new()).unwrap();
        assert!(!product_dir.exists());
    }

    #[tokio::test]
    async fn test_process_deduplicates_urls() {
        // Unreachable host: every request errors, so the dedupe is visible
        // in the error count alone.
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ImagePipeline::new(dir.path().to_path_buf()).unwrap();
        let url = "http://127.0.0.1:1/one.jpg".to_string();
        let outcome = pipeline
            .process(&[url.clone(), url.clone(), url], "prod-3")
            .await;
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }
}
