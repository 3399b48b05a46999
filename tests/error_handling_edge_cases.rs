//! Error conditions, rejected transitions and boundary inputs

mod common;

use bgremove_pipeline::{
    loader::to_data_url, AlphaCompositor, BgRemovalError, ErrorKind, ImageHandle, ImageLoader,
    ImageSource, Outcome, PipelineConfig, PipelineState, SegmentationMask, UploadedFile,
};
use common::{png_bytes, png_upload, Behaviour, Harness, ScriptedFactory};
use image::RgbaImage;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_config_boundaries() {
    assert!(PipelineConfig::builder().max_dimension(1).build().is_ok());
    assert!(PipelineConfig::builder().transport_quality(1).build().is_ok());
    assert!(PipelineConfig::builder().transport_quality(100).build().is_ok());

    for result in [
        PipelineConfig::builder().max_dimension(0).build(),
        PipelineConfig::builder().transport_quality(0).build(),
        PipelineConfig::builder().transport_quality(101).build(),
        PipelineConfig::builder().download_file_name("  ").build(),
    ] {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}

#[test]
fn test_config_file_errors() {
    assert!(PipelineConfig::from_json_file("/nonexistent/pipeline.json").is_err());

    let mut malformed = NamedTempFile::new().unwrap();
    malformed.write_all(b"{ max_dimension: ").unwrap();
    let err = PipelineConfig::from_json_file(malformed.path()).unwrap_err();
    assert!(matches!(err, BgRemovalError::InvalidConfig(_)));

    let mut invalid = NamedTempFile::new().unwrap();
    invalid.write_all(br#"{ "max_dimension": 0 }"#).unwrap();
    let err = PipelineConfig::from_json_file(invalid.path()).unwrap_err();
    assert!(err.to_string().contains("max dimension"));

    let mut partial = NamedTempFile::new().unwrap();
    partial.write_all(br#"{ "max_dimension": 256 }"#).unwrap();
    let config = PipelineConfig::from_json_file(partial.path()).unwrap();
    assert_eq!(config.max_dimension, 256);
    assert_eq!(config.download_file_name, "processed-image.png");
}

#[tokio::test]
async fn test_non_image_uploads_are_rejected() {
    let mut harness = Harness::new(ScriptedFactory::new(Behaviour::SplitHalves));
    let pipeline = &harness.pipeline;

    let declared = UploadedFile::new(b"hello".to_vec().into()).with_mime_type("text/plain");
    let data_url = UploadedFile::new(ImageSource::DataUrl(to_data_url(
        "application/pdf",
        b"%PDF-1.4",
    )));
    let sniffed = UploadedFile::new(b"just some text".to_vec().into());

    for file in [declared, data_url, sniffed] {
        assert_eq!(
            pipeline.upload(file).await,
            Outcome::Failed {
                kind: ErrorKind::InvalidFileType
            }
        );
        assert_eq!(pipeline.state(), PipelineState::Empty);
    }
    assert_eq!(
        harness.notice_titles(),
        vec!["Invalid file type", "Invalid file type", "Invalid file type"]
    );
}

#[tokio::test]
async fn test_corrupt_image_fails_to_decode() {
    let mut harness = Harness::new(ScriptedFactory::new(Behaviour::SplitHalves));
    let mut bytes = png_bytes(16, 16);
    bytes.truncate(40);
    let file = UploadedFile::new(bytes.into()).with_mime_type("image/png");

    assert_eq!(
        harness.pipeline.upload(file).await,
        Outcome::Failed {
            kind: ErrorKind::Decode
        }
    );
    assert_eq!(harness.pipeline.state(), PipelineState::Empty);
    assert_eq!(harness.notice_titles(), vec!["Error"]);
}

#[tokio::test]
async fn test_missing_file_upload_is_an_io_failure() {
    let harness = Harness::new(ScriptedFactory::new(Behaviour::SplitHalves));
    let outcome = harness
        .pipeline
        .upload(UploadedFile::from_path("/nonexistent/photo.png"))
        .await;
    assert_eq!(outcome, Outcome::Failed { kind: ErrorKind::Io });
}

#[tokio::test]
async fn test_upload_from_disk_and_data_url() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("photo.png");
    std::fs::write(&path, png_bytes(12, 9)).unwrap();

    let harness = Harness::new(ScriptedFactory::new(Behaviour::SplitHalves));
    assert_eq!(
        harness.pipeline.upload(UploadedFile::from_path(&path)).await,
        Outcome::Applied
    );
    assert_eq!(harness.pipeline.original().unwrap().dimensions(), (12, 9));
    harness.pipeline.delete();

    let url = to_data_url("image/png", &png_bytes(3, 4));
    assert_eq!(
        harness
            .pipeline
            .upload(UploadedFile::new(ImageSource::DataUrl(url)))
            .await,
        Outcome::Applied
    );
    assert_eq!(harness.pipeline.original().unwrap().dimensions(), (3, 4));
}

#[tokio::test]
async fn test_operations_rejected_in_wrong_state() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(ScriptedFactory::new(Behaviour::SplitHalves));
    let pipeline = &harness.pipeline;

    assert!(matches!(pipeline.process().await, Outcome::Rejected { .. }));
    assert!(matches!(pipeline.edit(), Outcome::Rejected { .. }));
    assert!(matches!(pipeline.back(), Outcome::Rejected { .. }));
    assert!(matches!(pipeline.download(dir.path()).await, Outcome::Rejected { .. }));
    assert!(pipeline.export_png().is_none());

    pipeline.upload(png_upload(8, 8)).await;
    assert!(matches!(pipeline.upload(png_upload(8, 8)).await, Outcome::Rejected { .. }));
    assert!(matches!(pipeline.edit(), Outcome::Rejected { .. }));
    assert!(matches!(pipeline.download(dir.path()).await, Outcome::Rejected { .. }));
    assert_eq!(pipeline.state(), PipelineState::Loaded);

    pipeline.process().await;
    assert!(matches!(pipeline.process().await, Outcome::Rejected { .. }));
    assert!(matches!(pipeline.upload(png_upload(8, 8)).await, Outcome::Rejected { .. }));
    assert_eq!(pipeline.state(), PipelineState::Processed);
    assert!(!dir.path().join("processed-image.png").exists());
}

#[tokio::test]
async fn test_dropped_files_use_the_first_only() {
    let harness = Harness::new(ScriptedFactory::new(Behaviour::SplitHalves));
    let pipeline = &harness.pipeline;

    assert!(matches!(pipeline.upload_dropped(Vec::new()).await, Outcome::Rejected { .. }));

    let outcome = pipeline
        .upload_dropped(vec![png_upload(5, 7), png_upload(9, 9)])
        .await;
    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(pipeline.original().unwrap().dimensions(), (5, 7));
}

#[tokio::test]
async fn test_download_into_missing_directory_fails() {
    let mut harness = Harness::new(ScriptedFactory::new(Behaviour::SplitHalves));
    harness.pipeline.upload(png_upload(8, 8)).await;
    harness.pipeline.process().await;
    harness.notice_titles();

    let outcome = harness.pipeline.download(std::path::Path::new("/nonexistent/output")).await;
    assert_eq!(outcome, Outcome::Failed { kind: ErrorKind::Io });
    assert_eq!(harness.pipeline.state(), PipelineState::Processed);
    assert_eq!(harness.notice_titles(), vec!["Error"]);
}

#[test]
fn test_one_pixel_images() {
    let handle = ImageHandle::new(RgbaImage::new(1, 1));
    let mask = SegmentationMask::new(1, 1, vec![0.25]).unwrap();
    let processed = AlphaCompositor::composite(handle, mask).unwrap();
    assert_eq!(processed.alpha_at(0, 0), Some(191));
    assert_eq!(processed.alpha_at(1, 0), None);
}

#[test]
fn test_mask_size_mismatch() {
    assert!(SegmentationMask::new(2, 2, vec![0.0; 3]).is_err());

    let handle = ImageHandle::new(RgbaImage::new(4, 4));
    let mask = SegmentationMask::filled(2, 8, 0.0);
    let err = AlphaCompositor::composite(handle, mask).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Inference);
}

#[test]
fn test_out_of_range_scores_are_clamped() {
    assert_eq!(AlphaCompositor::alpha_for(-3.0), 255);
    assert_eq!(AlphaCompositor::alpha_for(7.5), 0);
    assert_eq!(AlphaCompositor::alpha_for(f32::NAN), 0);
    assert_eq!(AlphaCompositor::alpha_for(0.5), 128);
}

#[test]
fn test_decode_rejects_empty_and_garbage() {
    assert_eq!(ImageLoader::decode(&[]).unwrap_err().kind(), ErrorKind::Decode);
    assert_eq!(
        ImageLoader::decode(b"\x89PNG not really").unwrap_err().kind(),
        ErrorKind::Decode
    );
}
