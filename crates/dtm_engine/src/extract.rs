use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use dtm_logging::{dtm_debug, dtm_warn};
use zip::ZipArchive;

use crate::fetch::{tile_event, ProgressSink};
use crate::{FetchError, TileStatus};

/// `.tif` / `.tiff`, any case.
pub fn is_raster_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
}

fn open_archive(archive_path: &Path) -> Result<ZipArchive<File>, FetchError> {
    let file = File::open(archive_path)
        .map_err(|err| FetchError::write(format!("{}: {err}", archive_path.display())))?;
    ZipArchive::new(file).map_err(|err| FetchError::corrupt(err.to_string()))
}

/// Unpacks `archive_path` into `destination`, returning the raster files it holds.
///
/// Emits one progress event per member, counting members rather than bytes.
/// Members whose path would leave `destination` are skipped, never written.
pub fn unpack_archive(
    archive_path: &Path,
    destination: &Path,
    tile_name: &str,
    sink: &dyn ProgressSink,
) -> Result<Vec<PathBuf>, FetchError> {
    let mut archive = open_archive(archive_path)?;
    fs::create_dir_all(destination)
        .map_err(|err| FetchError::write(format!("{}: {err}", destination.display())))?;

    let total = archive.len() as u64;
    let mut rasters = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| FetchError::corrupt(err.to_string()))?;

        match entry.enclosed_name() {
            None => {
                dtm_warn!(
                    "Rejected archive entry {:?} in {}: path escapes destination",
                    entry.name(),
                    tile_name
                );
            }
            Some(relative) => {
                let out_path = destination.join(relative);
                if entry.is_dir() {
                    fs::create_dir_all(&out_path)
                        .map_err(|err| FetchError::write(err.to_string()))?;
                } else {
                    if let Some(parent) = out_path.parent() {
                        fs::create_dir_all(parent)
                            .map_err(|err| FetchError::write(err.to_string()))?;
                    }

                    let up_to_date = fs::metadata(&out_path)
                        .map(|meta| meta.len() == entry.size())
                        .unwrap_or(false);
                    if !up_to_date {
                        let mut out_file = File::create(&out_path)
                            .map_err(|err| FetchError::write(err.to_string()))?;
                        io::copy(&mut entry, &mut out_file).map_err(map_copy_error)?;
                    }

                    if is_raster_path(&out_path) {
                        rasters.push(out_path);
                    }
                }
            }
        }

        sink.emit(tile_event(
            tile_name,
            index as u64 + 1,
            total,
            0.0,
            None,
            TileStatus::Extracting,
        ));
    }

    dtm_debug!("Extracted {} rasters from {}", rasters.len(), tile_name);
    Ok(rasters)
}

/// Raster paths of a previous complete extraction, or `None` if anything is missing.
pub fn verify_extraction(archive_path: &Path, destination: &Path) -> Option<Vec<PathBuf>> {
    let mut archive = open_archive(archive_path).ok()?;
    let mut rasters = Vec::new();

    for index in 0..archive.len() {
        let entry = archive.by_index(index).ok()?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = destination.join(relative);
        let on_disk = fs::metadata(&out_path).ok()?.len();
        if on_disk != entry.size() {
            return None;
        }
        if is_raster_path(&out_path) {
            rasters.push(out_path);
        }
    }

    if rasters.is_empty() {
        None
    } else {
        Some(rasters)
    }
}

/// Decompression errors surface as invalid data; everything else is the disk side.
fn map_copy_error(err: io::Error) -> FetchError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            FetchError::corrupt(err.to_string())
        }
        _ => FetchError::write(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_extension_check_ignores_case() {
        assert!(is_raster_path(Path::new("a/b/Tile.TIF")));
        assert!(is_raster_path(Path::new("tile.tiff")));
        assert!(!is_raster_path(Path::new("tile.tfw")));
        assert!(!is_raster_path(Path::new("tif")));
    }
}
