use std::{
    error::Error,
    ffi::OsString,
    fmt::Display,
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use image::ImageFormat;

pub const HEALTH: &str = "I'm Alive";

const OUTPUT_SUFFIX: &str = "_compressed.jpg";
const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

pub fn read_input(filename: &Option<PathBuf>) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    if let Some(filename) = filename {
        bytes = fs::read(filename)
            .with_context(|| format!("Reading {}", filename.to_string_lossy()))
            .context(InputError::Unreadable)?;
    } else {
        io::stdin()
            .read_to_end(&mut bytes)
            .context("Reading stdin")
            .context(InputError::Unreadable)?;
    }
    Ok(bytes)
}

/// Work out the media type of the input: the declared one if given, then
/// the file extension, then the leading bytes.
pub fn media_type(declared: Option<&str>, filename: &Option<PathBuf>, bytes: &[u8]) -> String {
    if let Some(declared) = declared {
        return declared.trim().to_string();
    }

    let from_ext = filename.as_ref()
        .and_then(|f| f.extension())
        .map(|ext| {
            ImageFormat::from_extension(ext)
                .map(|f| f.to_mime_type())
                .unwrap_or(UNKNOWN_MEDIA_TYPE)
        });
    if let Some(media_type) = from_ext {
        return media_type.to_string();
    }

    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or(UNKNOWN_MEDIA_TYPE)
        .to_string()
}

pub fn ensure_image(media_type: &str) -> Result<(), InputError> {
    if media_type.starts_with("image/") {
        Ok(())
    } else {
        Err(InputError::NotAnImage(media_type.to_string()))
    }
}

/// `photo.png` becomes `photo.png_compressed.jpg` in the same directory.
pub fn output_path(input: &Path) -> PathBuf {
    let mut name: OsString = input.file_name().unwrap_or_default().to_os_string();
    name.push(OUTPUT_SUFFIX);
    input.with_file_name(name)
}

/// Human readable size, e.g. `1.5 KB`. Trailing zeros are dropped.
pub fn format_bytes(bytes: u64, decimals: usize) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let sizes = ["B", "KB", "MB", "GB"];
    let k = 1024_f64;
    let i = ((bytes as f64).ln() / k.ln()).floor() as usize;
    let i = i.min(sizes.len() - 1);
    let value = bytes as f64 / k.powi(i as i32);

    let mut number = format!("{:.*}", decimals, value);
    if number.contains('.') {
        number = number.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{} {}", number, sizes[i])
}

/// Percentage saved going from `original` to `compressed` bytes, one
/// decimal place. Negative when the output grew.
pub fn reduction_percent(original: u64, compressed: u64) -> String {
    if original == 0 || compressed == 0 {
        return "0".to_string();
    }
    let saved = (original as f64 - compressed as f64) / original as f64 * 100.0;
    format!("{:.1}", saved)
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputError {
    Unreadable,
    NotAnImage(String),
}

impl Display for InputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputError::Unreadable => write!(f, "Could not read input"),
            InputError::NotAnImage(media_type) => {
                write!(f, "Uploaded file must be an image, got {}", media_type)
            }
        }
    }
}

impl Error for InputError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_declared_wins() {
        let filename = Some(PathBuf::from("photo.png"));

        let result = media_type(Some("text/plain"), &filename, &[]);

        assert_eq!(result, "text/plain");
    }

    #[test]
    fn test_media_type_from_extension() {
        let png = Some(PathBuf::from("dir/photo.PNG"));
        let txt = Some(PathBuf::from("notes.txt"));

        assert_eq!(media_type(None, &png, &[]), "image/png");
        assert_eq!(media_type(None, &txt, &[]), UNKNOWN_MEDIA_TYPE);
    }

    #[test]
    fn test_media_type_sniffed_from_bytes() {
        let jpeg_magic = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

        assert_eq!(media_type(None, &None, &jpeg_magic), "image/jpeg");
        assert_eq!(media_type(None, &None, b"hello"), UNKNOWN_MEDIA_TYPE);
    }

    #[test]
    fn test_ensure_image() {
        assert_eq!(ensure_image("image/webp"), Ok(()));
        assert_eq!(
            ensure_image("application/pdf"),
            Err(InputError::NotAnImage("application/pdf".to_string()))
        );
    }

    #[test]
    fn test_output_path() {
        let result = output_path(Path::new("/tmp/pics/cat.png"));

        assert_eq!(result, PathBuf::from("/tmp/pics/cat.png_compressed.jpg"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0, 2), "0 B");
        assert_eq!(format_bytes(500, 2), "500 B");
        assert_eq!(format_bytes(1024, 2), "1 KB");
        assert_eq!(format_bytes(1536, 2), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024, 2), "5 MB");
        assert_eq!(format_bytes(1234567, 0), "1 MB");
    }

    #[test]
    fn test_reduction_percent() {
        assert_eq!(reduction_percent(0, 10), "0");
        assert_eq!(reduction_percent(1000, 250), "75.0");
        assert_eq!(reduction_percent(300, 200), "33.3");
        assert_eq!(reduction_percent(100, 150), "-50.0");
    }
}
