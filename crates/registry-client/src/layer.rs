//! Reading files out of image layer tarballs

use crate::error::RegistryError;
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn normalize(path: &str) -> &str {
    path.trim_start_matches("./").trim_start_matches('/')
}

/// Looks up `path` in a layer blob, gzipped or plain tar.
///
/// Returns `Ok(None)` when the layer does not contain the file.
pub fn find_file(blob: &[u8], path: &str) -> Result<Option<Vec<u8>>, RegistryError> {
    if blob.starts_with(&GZIP_MAGIC) {
        scan(GzDecoder::new(Cursor::new(blob)), path)
    } else {
        scan(Cursor::new(blob), path)
    }
}

fn scan<R: Read>(reader: R, path: &str) -> Result<Option<Vec<u8>>, RegistryError> {
    let wanted = normalize(path);
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| RegistryError::Layer(format!("unreadable layer: {}", e)))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| RegistryError::Layer(format!("corrupt entry: {}", e)))?;
        let entry_path = entry.path()?.to_string_lossy().into_owned();
        if normalize(&entry_path) == wanted {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(Some(content));
        }
    }
    Ok(None)
}

/// Builds a gzipped tar layer from `(path, content)` pairs
pub fn build_layer(files: &[(&str, &[u8])]) -> Result<Vec<u8>, RegistryError> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *content)?;
    }
    Ok(builder.into_inner()?.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_file_in_gzipped_layer() {
        let layer = build_layer(&[
            ("etc/os-release", b"ID=rhcos".as_slice()),
            ("etc/driver-toolkit-release.json", br#"{"KERNEL_VERSION":"5.14.0"}"#.as_slice()),
        ])
        .expect("layer");
        let found = find_file(&layer, "/etc/driver-toolkit-release.json").expect("readable");
        assert_eq!(found.as_deref(), Some(br#"{"KERNEL_VERSION":"5.14.0"}"#.as_slice()));
        assert!(find_file(&layer, "etc/missing").expect("readable").is_none());
    }

    #[test]
    fn test_garbage_layer_is_an_error() {
        assert!(matches!(
            find_file(&[0x1f, 0x8b, 0, 1, 2], "etc/x"),
            Err(RegistryError::Layer(_) | RegistryError::Io(_))
        ));
    }
}
