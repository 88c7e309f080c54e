use crate::error::ImageError;
use flate2::read::GzDecoder;
use std::path::Path;
use tar::Archive;

/// Extracts one gzipped layer tar into `dest`, applying OCI whiteout
/// semantics so that later layers override earlier ones.
///
/// Ownership metadata in the tar entries is deliberately not applied;
/// extracted files belong to the invoking process.
pub fn extract_layer(layer: &[u8], dest: &Path) -> Result<(), ImageError> {
    let mut archive = Archive::new(GzDecoder::new(layer));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let entries = archive
        .entries()
        .map_err(|e| ImageError::UnpackFailure(format!("reading archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| ImageError::UnpackFailure(format!("reading entry: {}", e)))?;

        let path = entry
            .path()
            .map_err(|e| ImageError::UnpackFailure(format!("entry path: {}", e)))?
            .into_owned();

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if file_name == ".wh..wh..opq" {
            let dir = dest.join(path.parent().unwrap_or(Path::new("")));
            clear_directory(&dir)?;
            continue;
        }

        if let Some(hidden) = file_name.strip_prefix(".wh.") {
            let target = dest.join(path.parent().unwrap_or(Path::new(""))).join(hidden);
            remove_tree(&target)?;
            continue;
        }

        entry
            .unpack_in(dest)
            .map_err(|e| ImageError::UnpackFailure(format!("unpacking {}: {}", path.display(), e)))?;
    }

    Ok(())
}

/// Removes a file or directory tree left by a lower layer, if present.
fn remove_tree(path: &Path) -> Result<(), ImageError> {
    if !path.exists() {
        return Ok(());
    }

    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    result.map_err(|e| {
        ImageError::UnpackFailure(format!("removing whiteout target {}: {}", path.display(), e))
    })
}

/// Empties a directory marked opaque without removing the directory itself.
fn clear_directory(dir: &Path) -> Result<(), ImageError> {
    if !dir.is_dir() {
        return Ok(());
    }

    let entries = std::fs::read_dir(dir).map_err(|e| {
        ImageError::UnpackFailure(format!("reading opaque dir {}: {}", dir.display(), e))
    })?;

    for entry in entries {
        let entry = entry
            .map_err(|e| ImageError::UnpackFailure(format!("reading opaque dir entry: {}", e)))?;
        remove_tree(&entry.path())?;
    }

    Ok(())
}
