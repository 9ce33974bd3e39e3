//! Sidecar metadata files for directory-watch mode
//!
//! Capture tools like ASICap drop a `.txt` next to each image:
//!
//! ```text
//! [ZWO ASI676MC]
//! Exposure = 30s
//! Gain = 250
//! Capture Area Size = 3552 * 3552
//! ```

use std::path::Path;

use chrono::Local;

use camera_core::frame::keys;
use camera_core::Metadata;

/// Parse a sidecar file into a metadata map
///
/// The `[Camera Name]` header becomes `CAMERA`; `Key = Value` lines are
/// stored under the uppercased key. A missing or unreadable file yields an
/// empty map.
pub fn parse_sidecar(path: &Path) -> Metadata {
    let mut metadata = Metadata::new();
    let Ok(contents) = std::fs::read_to_string(path) else {
        return metadata;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.len() >= 2 && line.starts_with('[') && line.ends_with(']') {
            metadata.insert(keys::CAMERA.into(), line[1..line.len() - 1].to_string());
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            metadata.insert(key.trim().to_uppercase(), value.trim().to_string());
        }
    }
    metadata
}

/// Fill in the derived keys the overlay pipeline expects
pub fn derive_metadata(metadata: &mut Metadata, filename: &str, session: &str) {
    // "3552 * 3552" -> "3552x3552"
    if let Some(area) = metadata.get("CAPTURE AREA SIZE") {
        let res: String = area.replace('*', "x").split_whitespace().collect();
        metadata.insert(keys::RES.into(), res);
    }
    metadata.insert(keys::FILENAME.into(), filename.to_string());
    metadata.insert(keys::SESSION.into(), session.to_string());
    metadata
        .entry(keys::DATETIME.to_string())
        .or_insert_with(|| Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("sidecar-{}-{name}", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_header_and_pairs() {
        let path = write_temp(
            "basic.txt",
            "[ZWO ASI676MC]\nExposure = 30s\nGain = 250\nCapture Area Size = 3552 * 3552\n",
        );
        let mut meta = parse_sidecar(&path);
        assert_eq!(meta.get("CAMERA").unwrap(), "ZWO ASI676MC");
        assert_eq!(meta.get("EXPOSURE").unwrap(), "30s");
        assert_eq!(meta.get("GAIN").unwrap(), "250");

        derive_metadata(&mut meta, "img_0001.png", "2026-08-23");
        assert_eq!(meta.get("RES").unwrap(), "3552x3552");
        assert_eq!(meta.get("FILENAME").unwrap(), "img_0001.png");
        assert_eq!(meta.get("SESSION").unwrap(), "2026-08-23");
        assert!(meta.contains_key("DATETIME"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let meta = parse_sidecar(Path::new("/nonexistent/sidecar.txt"));
        assert!(meta.is_empty());
    }
}
