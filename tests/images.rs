//! Integration tests for the image pipeline against a mock HTTP server.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage};
use listing_engine::ImagePipeline;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
        width,
        height,
        image::Rgb([180, 120, 40]),
    ));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .expect("encode jpeg");
    bytes
}

#[tokio::test]
async fn test_one_valid_and_one_missing_url_yields_one_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(jpeg_bytes(400, 400), "image/jpeg"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let pipeline = ImagePipeline::new(dir.path().to_path_buf()).expect("pipeline");
    let urls = vec![
        format!("{}/ok.jpg", server.uri()),
        format!("{}/missing.jpg", server.uri()),
    ];

    let processed = pipeline.process(&urls, "item-1").await;
    assert_eq!(processed.results.len(), 1);
    assert_eq!(processed.errors.len(), 1);

    let result = &processed.results[0];
    assert!(result.primary);
    assert!(result.path.exists());
    assert_eq!(result.width, 400);
    assert_eq!(result.height, 400);
    assert!(processed.bytes_fetched > 0);
}

#[tokio::test]
async fn test_undersized_image_yields_no_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tiny.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(jpeg_bytes(100, 100), "image/jpeg"))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let pipeline = ImagePipeline::new(dir.path().to_path_buf()).expect("pipeline");
    let urls = vec![format!("{}/tiny.jpg", server.uri())];

    let processed = pipeline.process(&urls, "item-2").await;
    assert!(processed.results.is_empty());
    assert_eq!(processed.errors.len(), 1);
}

#[tokio::test]
async fn test_non_image_content_type_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page.jpg"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>not an image</html>", "text/html"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let pipeline = ImagePipeline::new(dir.path().to_path_buf()).expect("pipeline");
    let urls = vec![format!("{}/page.jpg", server.uri())];

    let processed = pipeline.process(&urls, "item-3").await;
    assert!(processed.results.is_empty());
    assert_eq!(processed.errors.len(), 1);
}

#[tokio::test]
async fn test_oversized_image_is_downscaled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(jpeg_bytes(2400, 1200), "image/jpeg"))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let pipeline = ImagePipeline::new(dir.path().to_path_buf()).expect("pipeline");
    let urls = vec![format!("{}/big.jpg", server.uri())];

    let processed = pipeline.process(&urls, "item-4").await;
    assert_eq!(processed.results.len(), 1);
    let result = &processed.results[0];
    assert_eq!(result.width, 1200);
    assert_eq!(result.height, 600);
}

#[tokio::test]
async fn test_reprocessing_overwrites_the_same_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stable.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(jpeg_bytes(400, 400), "image/jpeg"))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let pipeline = ImagePipeline::new(dir.path().to_path_buf()).expect("pipeline");
    let urls = vec![format!("{}/stable.jpg", server.uri())];

    let first = pipeline.process(&urls, "item-5").await;
    let second = pipeline.process(&urls, "item-5").await;
    assert_eq!(first.results[0].path, second.results[0].path);

    // Only one file under the product directory after both runs.
    let entries: Vec<_> = std::fs::read_dir(dir.path().join("item-5"))
        .expect("product dir")
        .collect();
    assert_eq!(entries.len(), 1);
}
