// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use std::collections::HashSet;
use usb_camera::Resolution;
use usb_camera::constants::{
    DEFAULT_PREVIEW_HEIGHT, DEFAULT_PREVIEW_WIDTH, EncoderType, PreviewFormat, SUFFIX_MP4,
    SUFFIX_PNG,
};

#[test]
fn test_encoder_codes_are_distinct() {
    // Test that all encoder types exist (Surface, Video, VideoBuffer)
    assert_eq!(EncoderType::ALL.len(), 3);

    let codes: HashSet<u32> = EncoderType::ALL.iter().map(|e| e.code()).collect();
    assert_eq!(codes.len(), 3, "Encoder codes should be unique");
}

#[test]
fn test_preview_format_display_names() {
    for format in [PreviewFormat::Yuyv, PreviewFormat::Mjpeg] {
        assert!(
            !format.to_string().is_empty(),
            "Format {:?} has empty display name",
            format
        );
    }
}

#[test]
fn test_default_resolution_matches_constants() {
    let resolution = Resolution::default();
    assert_eq!(resolution.width, DEFAULT_PREVIEW_WIDTH);
    assert_eq!(resolution.height, DEFAULT_PREVIEW_HEIGHT);
}

#[test]
fn test_suffixes_have_dots() {
    assert!(SUFFIX_PNG.starts_with('.'));
    assert!(SUFFIX_MP4.starts_with('.'));
}

#[test]
fn test_resolution_parsing() {
    assert_eq!("1280x720".parse::<Resolution>(), Ok(Resolution::new(1280, 720)));
    assert_eq!("1920X1080".parse::<Resolution>(), Ok(Resolution::new(1920, 1080)));
    assert!("1280".parse::<Resolution>().is_err());
    assert!("0x720".parse::<Resolution>().is_err());
}
