//! Small file access helpers built on `cap-std` ambient directory handles.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

fn split(path: &Utf8Path) -> io::Result<(Dir, &str)> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path is missing a filename")
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, file_name))
}

/// Reads a whole file as bytes.
pub(crate) fn read_bytes(path: &Utf8Path) -> io::Result<Vec<u8>> {
    let (dir, file_name) = split(path)?;
    dir.read(file_name)
}

/// Reads a whole file as UTF-8 text.
pub(crate) fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (dir, file_name) = split(path)?;
    dir.read_to_string(file_name)
}

/// Reads a file when present, returning `None` when it (or its directory)
/// does not exist.
pub(crate) fn read_optional(path: &Utf8Path) -> io::Result<Option<String>> {
    match read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn utf8_dir(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()))
    }

    #[test]
    fn read_optional_returns_none_for_missing_directory() {
        let tmp = TempDir::new().expect("tempdir");
        let path = utf8_dir(&tmp).join("absent").join("config");
        assert_eq!(read_optional(&path).expect("missing is not an error"), None);
    }

    #[test]
    fn read_to_string_reads_file_contents() {
        let tmp = TempDir::new().expect("tempdir");
        let path = utf8_dir(&tmp).join("spec.json");
        std::fs::write(&path, "{}").expect("write");
        assert_eq!(read_to_string(&path).expect("read"), "{}");
    }
}
