//! Filesystem-backed sink: `seek` + `write`.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use super::Sink;
use crate::error::SinkError;

pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self { file })
    }
}

impl Sink for FileSink {
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), SinkError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<(), SinkError> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_at_offsets_and_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk.bin");
        let mut sink = FileSink::create(&path).unwrap();
        sink.write(0, b"hello").unwrap();
        sink.write(5, b" world").unwrap();
        Box::new(sink).finalize().unwrap();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, b"hello world");
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c/chunk.bin");
        let mut sink = FileSink::create(&path).unwrap();
        sink.write(0, b"x").unwrap();
        Box::new(sink).finalize().unwrap();
        assert!(path.exists());
    }
}
