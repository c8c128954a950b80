//! The sector-cached, cursor-addressed byte source that backs every decoder in this crate.

use std::collections::HashMap;
use std::io::Read;

use crate::error::SourceError;

/// The number of bytes in one logical sector, per ISO9660 §6.1.2 (sectors are always a power of
/// two bytes long and, on every CD-ROM encountered in practice, exactly this size).
pub const SECTOR_LENGTH: usize = 2048;


/// A collaborator able to fetch whole sectors, or stream a byte range, from wherever the image
/// actually lives (a local file, an HTTP range server, ...).
pub trait BlockFetcher {
    /// Fetches `count` consecutive sectors starting at `sector`, returning exactly
    /// `count * SECTOR_LENGTH` bytes.
    fn fetch(&mut self, sector: u32, count: u32) -> Result<Vec<u8>, SourceError>;

    /// Opens a sequential reader over `length` bytes starting at the given sector, without
    /// populating any cache.
    fn open_stream(&mut self, sector: u32, length: usize) -> Result<Box<dyn Read>, SourceError>;
}


/// The state of System Use Sharing Protocol detection for this image.
///
/// Modeled as a three-way enum rather than the `None`/`False`/positive-integer overload a
/// dynamically typed implementation might use for the same idea.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SuspSkip {
    /// Not yet determined; true only before the root directory's own record has been parsed.
    Unknown,

    /// SUSP was checked for and found absent.
    Disabled,

    /// SUSP is active; skip this many bytes of every record's system-use area before decoding
    /// SUSP entries.
    Skip(u8),
}


/// A directory-form ("short") on-disc timestamp: years since 1900, month, day, hour, minute,
/// second, and a quarter-hour GMT offset. See ISO9660 §9.1.5.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RawDirDatetime {
    pub years_since_1900: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub gmt_offset_15min: i8,
}

/// A volume-descriptor-form ("long") on-disc timestamp: ASCII digits plus a quarter-hour GMT
/// offset. See ISO9660 §8.4.26.1.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RawVdDatetime {
    pub digits: [u8; 16],
    pub gmt_offset_15min: i8,
}

/// A field decoded by [`Source::unpack_smart`].
#[derive(Clone, Copy, Debug)]
pub enum SmartValue {
    SByte(i8),
    UByte(u8),
    U16(u16),
    U32(u32),
    DirDatetime(RawDirDatetime),
    VdDatetime(RawVdDatetime),
}
impl SmartValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UByte(v) => Some((*v).into()),
            Self::U16(v) => Some((*v).into()),
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum FieldKind {
    SByte,
    UByte,
    Both16,
    Both32,
    DirDatetime,
    VdDatetime,
}

fn compile_smart_format(fmt: &str) -> Vec<FieldKind> {
    fmt.chars().map(|c| match c {
        'b' => FieldKind::SByte,
        'B' => FieldKind::UByte,
        'H' => FieldKind::Both16,
        'I' => FieldKind::Both32,
        't' => FieldKind::DirDatetime,
        'T' => FieldKind::VdDatetime,
        other => panic!("unsupported unpack_smart code {:?}", other),
    }).collect()
}


/// A random-access, sector-cached reader over an ISO9660 image.
///
/// Holds a cursor and a "working window" (the bytes loaded by the most recent [`seek`](Self::seek))
/// plus a cache of whole sectors that is never invalidated, since the underlying image is
/// read-only for the lifetime of a `Source`.
pub struct Source<F> {
    fetcher: F,
    sector_cache: HashMap<u32, [u8; SECTOR_LENGTH]>,
    smart_plan_cache: HashMap<String, Vec<FieldKind>>,
    window: Vec<u8>,
    cursor: usize,

    /// Whether sectors read as file content should also be retained in the sector cache.
    /// Disabled by default, since content is usually read once and can dwarf the image's
    /// metadata in size.
    pub cache_content: bool,

    /// The minimum number of sectors to prefetch on a cache-populating seek, even if fewer are
    /// strictly needed for the requested length.
    pub min_fetch: u32,

    /// Whether SUSP framing has been detected, and if so, how many bytes of a record's
    /// system-use area to skip before SUSP entries begin.
    pub susp_starting_index: SuspSkip,

    /// Whether a Rock Ridge extension reference was found among the root directory's SUSP
    /// entries.
    pub rockridge: bool,
}

impl<F: BlockFetcher> Source<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            sector_cache: HashMap::new(),
            smart_plan_cache: HashMap::new(),
            window: Vec::new(),
            cursor: 0,
            cache_content: false,
            min_fetch: 1,
            susp_starting_index: SuspSkip::Unknown,
            rockridge: false,
        }
    }

    /// The number of unread bytes remaining in the current window.
    pub fn remaining(&self) -> usize {
        self.window.len() - self.cursor
    }

    /// Snapshots the current window and cursor so they can be restored later.
    ///
    /// Used around any operation (such as reading a record's Rock Ridge name) that might itself
    /// seek, so the caller's own iteration position survives the call.
    pub fn save_cursor(&self) -> (Vec<u8>, usize) {
        (self.window.clone(), self.cursor)
    }

    pub fn restore_cursor(&mut self, saved: (Vec<u8>, usize)) {
        self.window = saved.0;
        self.cursor = saved.1;
    }

    /// Loads `length` bytes starting at `start_sector` into the working window and resets the
    /// cursor to zero.
    ///
    /// `is_content` distinguishes a read of file payload bytes from a read of filesystem
    /// metadata; metadata sectors are always cached, content sectors only if `cache_content` is
    /// set.
    pub fn seek(&mut self, start_sector: u32, length: usize, is_content: bool) -> Result<(), SourceError> {
        let n_sectors = u32::try_from((length + SECTOR_LENGTH - 1) / SECTOR_LENGTH).unwrap().max(1);
        let should_cache = !is_content || self.cache_content;
        let fetch_sectors = if should_cache {
            n_sectors.max(self.min_fetch)
        } else {
            n_sectors
        };

        tracing::trace!(start_sector, fetch_sectors, is_content, "seeking");

        let mut buffer = Vec::with_capacity(usize::try_from(fetch_sectors).unwrap() * SECTOR_LENGTH);
        let mut offset = 0u32;
        while offset < fetch_sectors {
            let sector = start_sector + offset;
            if let Some(cached) = self.sector_cache.get(&sector) {
                buffer.extend_from_slice(cached);
                offset += 1;
                continue;
            }

            // coalesce a run of consecutive cache misses into a single fetcher call
            let run_start = offset;
            let mut run_len = 0u32;
            while offset < fetch_sectors && !self.sector_cache.contains_key(&(start_sector + offset)) {
                run_len += 1;
                offset += 1;
            }
            tracing::debug!(sector = start_sector + run_start, run_len, "fetching sectors");
            let fetched = self.fetcher.fetch(start_sector + run_start, run_len)?;
            if should_cache {
                for (i, chunk) in fetched.chunks_exact(SECTOR_LENGTH).enumerate() {
                    let sector_index = start_sector + run_start + u32::try_from(i).unwrap();
                    let mut sector_buf = [0u8; SECTOR_LENGTH];
                    sector_buf.copy_from_slice(chunk);
                    self.sector_cache.insert(sector_index, sector_buf);
                }
            }
            buffer.extend_from_slice(&fetched);
        }

        buffer.truncate(length);
        self.window = buffer;
        self.cursor = 0;
        Ok(())
    }

    /// Opens a sequential, non-caching reader over `length` bytes starting at `sector`.
    pub fn get_stream(&mut self, sector: u32, length: usize) -> Result<Box<dyn Read>, SourceError> {
        self.fetcher.open_stream(sector, length)
    }

    fn take(&mut self, count: usize) -> Result<&[u8], SourceError> {
        if self.remaining() < count {
            return Err(SourceError::BufferUnderrun { wanted: count, available: self.remaining() });
        }
        let start = self.cursor;
        self.cursor += count;
        Ok(&self.window[start..start + count])
    }

    /// Moves the cursor backward by `count` bytes without touching the window.
    pub fn rewind(&mut self, count: usize) -> Result<(), SourceError> {
        if count > self.cursor {
            return Err(SourceError::RewindUnderrun { cursor: self.cursor, amount: count });
        }
        self.cursor -= count;
        Ok(())
    }

    /// Advances the cursor to the next sector boundary within the window (used when a
    /// zero-length directory record is encountered).
    pub fn skip_to_sector_boundary(&mut self) {
        let remainder = self.cursor % SECTOR_LENGTH;
        if remainder != 0 {
            self.cursor += SECTOR_LENGTH - remainder;
        }
    }

    /// Reads `count` raw bytes without interpretation.
    pub fn unpack_raw(&mut self, count: usize) -> Result<Vec<u8>, SourceError> {
        Ok(self.take(count)?.to_vec())
    }

    /// Reads every remaining byte in the window.
    pub fn unpack_all(&mut self) -> Result<Vec<u8>, SourceError> {
        let remaining = self.remaining();
        self.unpack_raw(remaining)
    }

    /// Reads exactly `count` bytes and asserts the cursor lands on `target` afterward, i.e. a
    /// bounds check for fixed-size structures whose end offset is known up front.
    pub fn unpack_boundary(&mut self, count: usize, target: usize) -> Result<Vec<u8>, SourceError> {
        let bytes = self.unpack_raw(count)?;
        if self.cursor < target {
            let pad = target - self.cursor;
            self.unpack_raw(pad)?;
        }
        Ok(bytes)
    }

    pub fn unpack_u8(&mut self) -> Result<u8, SourceError> {
        Ok(self.take(1)?[0])
    }

    pub fn unpack_i8(&mut self) -> Result<i8, SourceError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn unpack_u16_le(&mut self) -> Result<u16, SourceError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn unpack_u16_be(&mut self) -> Result<u16, SourceError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn unpack_u32_le(&mut self) -> Result<u32, SourceError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn unpack_u32_be(&mut self) -> Result<u32, SourceError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Reads a little-endian half followed by a big-endian half of the same field, asserting
    /// they agree, and returns the (single) value. See ISO9660 §7.2/§7.3.
    pub fn unpack_both_u16(&mut self) -> Result<u16, SourceError> {
        let le = self.unpack_u16_le()?;
        let be = self.unpack_u16_be()?;
        if le != be {
            return Err(SourceError::EndianMismatch { little_endian: le.into(), big_endian: be.into() });
        }
        Ok(le)
    }

    pub fn unpack_both_u32(&mut self) -> Result<u32, SourceError> {
        let le = self.unpack_u32_le()?;
        let be = self.unpack_u32_be()?;
        if le != be {
            return Err(SourceError::EndianMismatch { little_endian: le.into(), big_endian: be.into() });
        }
        Ok(le)
    }

    pub fn unpack_string(&mut self, count: usize) -> Result<String, SourceError> {
        let bytes = self.unpack_raw(count)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn unpack_dir_datetime(&mut self) -> Result<RawDirDatetime, SourceError> {
        let bytes = self.take(7)?;
        Ok(RawDirDatetime {
            years_since_1900: bytes[0],
            month: bytes[1],
            day: bytes[2],
            hour: bytes[3],
            minute: bytes[4],
            second: bytes[5],
            gmt_offset_15min: bytes[6] as i8,
        })
    }

    fn unpack_vd_datetime(&mut self) -> Result<RawVdDatetime, SourceError> {
        let bytes = self.take(17)?;
        let mut digits = [0u8; 16];
        digits.copy_from_slice(&bytes[0..16]);
        Ok(RawVdDatetime {
            digits,
            gmt_offset_15min: bytes[16] as i8,
        })
    }

    /// Decodes a composite record described by `fmt`, where each character selects one field:
    ///
    /// - `b`/`B`: signed/unsigned byte.
    /// - `H`/`I`: a both-endian `u16`/`u32` pair.
    /// - `t`: a directory-form ("short") timestamp.
    /// - `T`: a volume-descriptor-form ("long") timestamp.
    ///
    /// The parsed plan for a given `fmt` is compiled once and cached, so repeated calls with the
    /// same format string never re-parse it.
    pub fn unpack_smart(&mut self, fmt: &str) -> Result<Vec<SmartValue>, SourceError> {
        if !self.smart_plan_cache.contains_key(fmt) {
            let plan = compile_smart_format(fmt);
            self.smart_plan_cache.insert(fmt.to_string(), plan);
        }
        let plan = self.smart_plan_cache.get(fmt).unwrap().clone();

        let mut values = Vec::with_capacity(plan.len());
        for kind in plan {
            let value = match kind {
                FieldKind::SByte => SmartValue::SByte(self.unpack_i8()?),
                FieldKind::UByte => SmartValue::UByte(self.unpack_u8()?),
                FieldKind::Both16 => SmartValue::U16(self.unpack_both_u16()?),
                FieldKind::Both32 => SmartValue::U32(self.unpack_both_u32()?),
                FieldKind::DirDatetime => SmartValue::DirDatetime(self.unpack_dir_datetime()?),
                FieldKind::VdDatetime => SmartValue::VdDatetime(self.unpack_vd_datetime()?),
            };
            values.push(value);
        }
        Ok(values)
    }
}



#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::MemoryFetcher;

    #[test]
    fn both_endian_u32_matching_halves_succeeds() {
        let mut fetcher = MemoryFetcher::new(1);
        fetcher.data[0..4].copy_from_slice(&42u32.to_le_bytes());
        fetcher.data[4..8].copy_from_slice(&42u32.to_be_bytes());
        let mut source = Source::new(fetcher);
        source.seek(0, 8, false).unwrap();
        assert_eq!(source.unpack_both_u32().unwrap(), 42);
    }

    #[test]
    fn both_endian_u32_mismatched_halves_errors() {
        let mut fetcher = MemoryFetcher::new(1);
        fetcher.data[0..4].copy_from_slice(&42u32.to_le_bytes());
        fetcher.data[4..8].copy_from_slice(&43u32.to_be_bytes());
        let mut source = Source::new(fetcher);
        source.seek(0, 8, false).unwrap();
        assert!(matches!(source.unpack_both_u32(), Err(SourceError::EndianMismatch { .. })));
    }

    #[test]
    fn seek_coalesces_a_run_of_cache_misses_into_one_fetch() {
        let fetcher = MemoryFetcher::new(4);
        let mut source = Source::new(fetcher);
        source.seek(0, 4 * SECTOR_LENGTH, false).unwrap();
        assert_eq!(source.fetcher.fetch_calls, vec![(0, 4)]);
    }

    #[test]
    fn seek_does_not_refetch_cached_sectors() {
        let fetcher = MemoryFetcher::new(2);
        let mut source = Source::new(fetcher);
        source.seek(0, SECTOR_LENGTH, false).unwrap();
        source.seek(0, SECTOR_LENGTH, false).unwrap();
        source.seek(1, SECTOR_LENGTH, false).unwrap();
        assert_eq!(source.fetcher.fetch_calls, vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn reading_past_the_window_underruns() {
        let fetcher = MemoryFetcher::new(1);
        let mut source = Source::new(fetcher);
        source.seek(0, 4, false).unwrap();
        source.unpack_raw(4).unwrap();
        assert!(matches!(source.unpack_u8(), Err(SourceError::BufferUnderrun { .. })));
    }

    #[test]
    fn unpack_smart_compiles_its_plan_once_and_reuses_it() {
        let mut fetcher = MemoryFetcher::new(1);
        fetcher.data[0] = 5;
        fetcher.data[1] = 6;
        let mut source = Source::new(fetcher);
        source.seek(0, 2, false).unwrap();
        source.unpack_smart("BB").unwrap();
        assert_eq!(source.smart_plan_cache.len(), 1);
        source.seek(0, 2, false).unwrap();
        source.unpack_smart("BB").unwrap();
        assert_eq!(source.smart_plan_cache.len(), 1);
    }
}
