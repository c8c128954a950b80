//! Reading an ISO9660 image out of a local file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::SourceError;
use crate::source::{BlockFetcher, SECTOR_LENGTH};

/// A [`BlockFetcher`] backed by a local file opened in binary mode.
pub struct FileBackend {
    file: File,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, io::Error> {
        let file = File::open(path)?;
        Ok(Self { file })
    }
}

impl BlockFetcher for FileBackend {
    fn fetch(&mut self, sector: u32, count: u32) -> Result<Vec<u8>, SourceError> {
        let offset = u64::from(sector) * u64::try_from(SECTOR_LENGTH).unwrap();
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; usize::try_from(count).unwrap() * SECTOR_LENGTH];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn open_stream(&mut self, sector: u32, length: usize) -> Result<Box<dyn Read>, SourceError> {
        let offset = u64::from(sector) * u64::try_from(SECTOR_LENGTH).unwrap();
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(Box::new(file.take(u64::try_from(length).unwrap())))
    }
}
