use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Error type for I/O operations
#[derive(Error, Debug)]
pub enum IoError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("IO error: {0}")]
    StdIo(#[from] std::io::Error),
    #[error("Binary serialization error: {0}")]
    Binary(#[from] bincode::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn map_not_found(path: &Path) -> impl FnOnce(std::io::Error) -> IoError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IoError::FileNotFound(path.to_path_buf())
        } else {
            IoError::StdIo(e)
        }
    }
}

fn open(path: &Path) -> Result<File, IoError> {
    File::open(path).map_err(map_not_found(path))
}

fn create(path: &Path) -> Result<File, IoError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(File::create(path)?)
}

/// Reads a file to string, reporting a missing file by path
pub fn read_to_string(path: impl AsRef<Path>) -> Result<String, IoError> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(map_not_found(path))
}

/// Reads a whole file into memory
pub fn read_bytes(path: impl AsRef<Path>) -> Result<Vec<u8>, IoError> {
    let path = path.as_ref();
    fs::read(path).map_err(map_not_found(path))
}

/// Serializes data to a binary file using bincode
pub fn serialize_to_file<T: Serialize>(path: impl AsRef<Path>, data: &T) -> Result<(), IoError> {
    let writer = BufWriter::new(create(path.as_ref())?);
    bincode::serialize_into(writer, data)?;
    Ok(())
}

/// Deserializes data from a binary file using bincode
pub fn deserialize_from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, IoError> {
    let reader = BufReader::new(open(path.as_ref())?);
    Ok(bincode::deserialize_from(reader)?)
}

/// Writes pretty-printed JSON, creating parent directories if needed
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, data: &T) -> Result<(), IoError> {
    let writer = BufWriter::new(create(path.as_ref())?);
    serde_json::to_writer_pretty(writer, data)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, IoError> {
    let reader = BufReader::new(open(path.as_ref())?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct TestData {
        value: i32,
        text: String,
    }

    #[test]
    fn test_serialize_deserialize() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("nested").join("test.bin");

        let data = TestData { value: 42, text: "hello".to_string() };

        serialize_to_file(&file_path, &data).unwrap();
        let loaded: TestData = deserialize_from_file(&file_path).unwrap();

        assert_eq!(data, loaded);
    }

    #[test]
    fn test_json_round_trip() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("test.json");

        let data = TestData { value: -1, text: "<NL>".to_string() };
        write_json(&file_path, &data).unwrap();
        let loaded: TestData = read_json(&file_path).unwrap();

        assert_eq!(data, loaded);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("absent.json");

        match read_json::<TestData>(&file_path) {
            Err(IoError::FileNotFound(p)) => assert_eq!(p, file_path),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(read_to_string(&file_path), Err(IoError::FileNotFound(_))));
        assert!(matches!(read_bytes(&file_path), Err(IoError::FileNotFound(_))));
        assert!(matches!(deserialize_from_file::<TestData>(&file_path), Err(IoError::FileNotFound(_))));
    }
}
