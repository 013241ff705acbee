use std::fs;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::FetchError;

/// Ensure a job's output directory exists and accepts new files.
pub fn ensure_output_dir(dir: &Path) -> Result<(), FetchError> {
    match fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => {
            return Err(FetchError::write(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        Ok(_) => {}
        Err(_) => fs::create_dir_all(dir)
            .map_err(|err| FetchError::write(format!("{}: {err}", dir.display())))?,
    }
    // Writability check; the file is removed on drop.
    NamedTempFile::new_in(dir)
        .map_err(|err| FetchError::write(format!("{} not writable: {err}", dir.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_directories() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("jobs").join("abc");
        ensure_output_dir(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn rejects_a_file_in_the_way() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("taken");
        fs::write(&file, b"x").unwrap();
        let err = ensure_output_dir(&file).unwrap_err();
        assert_eq!(err.kind, crate::FetchFailure::WriteFailure);
    }
}
