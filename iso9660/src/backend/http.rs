//! Reading an ISO9660 image over HTTP, via range requests.
//!
//! Built on [`ureq`], a minimal blocking HTTP client, rather than an async stack: this crate's
//! concurrency model (see the top-level documentation) is single-threaded and synchronous
//! throughout, so an async runtime would only be pulled in for this one backend.

use std::io::Read;

use crate::error::SourceError;
use crate::source::{BlockFetcher, SECTOR_LENGTH};

/// A [`BlockFetcher`] backed by HTTP range requests (`Range: bytes=S-E`) against a server that
/// supports them.
pub struct HttpBackend {
    url: String,
    agent: ureq::Agent,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: ureq::Agent::new(),
        }
    }

    fn range_request(&self, start: u64, length: usize) -> Result<Box<dyn Read + Send + Sync + 'static>, SourceError> {
        let end = start + u64::try_from(length).unwrap() - 1;
        let range = format!("bytes={}-{}", start, end);
        tracing::debug!(url = %self.url, range = %range, "issuing HTTP range request");

        let response = self.agent.get(&self.url)
            .set("Range", &range)
            .call()
            .map_err(|e| SourceError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        Ok(response.into_reader())
    }
}

impl BlockFetcher for HttpBackend {
    fn fetch(&mut self, sector: u32, count: u32) -> Result<Vec<u8>, SourceError> {
        let start = u64::from(sector) * u64::try_from(SECTOR_LENGTH).unwrap();
        let length = usize::try_from(count).unwrap() * SECTOR_LENGTH;
        let mut reader = self.range_request(start, length)?;
        let mut buf = vec![0u8; length];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn open_stream(&mut self, sector: u32, length: usize) -> Result<Box<dyn Read>, SourceError> {
        let start = u64::from(sector) * u64::try_from(SECTOR_LENGTH).unwrap();
        let reader = self.range_request(start, length)?;
        Ok(Box::new(reader))
    }
}
