//! Directory records: one entry (file or subdirectory) within a directory's extent, its
//! embedded system-use area, and the Rock Ridge name/child navigation built on top of it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use bitflags::bitflags;

use crate::error::{NotFoundError, SourceError};
use crate::rockridge::{NameFlags, RockRidgeEntry};
use crate::source::{BlockFetcher, RawDirDatetime, Source, SuspSkip};
use crate::susp::{self, Ce, SuspEntry};

bitflags! {
    /// Directory record flags. See ISO9660 §9.1.6.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct FileFlags: u8 {
        const HIDDEN = 0x01;
        const DIRECTORY = 0x02;
        const ASSOCIATED_FILE = 0x04;
        const RECORD = 0x08;
        const PROTECTION = 0x10;
        const MULTI_EXTENT = 0x80;
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum ChildScanState {
    NotStarted,
    At(usize),
    Exhausted,
}

/// One directory record: a file or subdirectory entry, with its decoded embedded SUSP entries
/// and lazily resolved Rock Ridge name and children.
///
/// Cheap to clone: a clone shares the same underlying [`Source`] and the same child/name
/// caches, so repeated lookups through either handle benefit from one another. The exception is
/// [`Record::copy_shallow`], used for cached file (non-directory) entries, which starts those
/// caches fresh.
pub struct Record<F> {
    source: Rc<RefCell<Source<F>>>,
    pub location: u32,
    pub length: u32,
    pub datetime: RawDirDatetime,
    pub flags: FileFlags,
    /// The on-disc identifier, version suffix already stripped. `[0]` denotes the directory's
    /// own "current directory" self-entry, `[1]` its parent.
    pub raw_name: Vec<u8>,
    /// SUSP entries embedded directly in this record (not counting any continuation area).
    pub embedded_susp_entries: Vec<SuspEntry>,
    pending_continuation: Option<Ce>,
    embedded_terminated: bool,
    name_cache: Rc<RefCell<Option<String>>>,
    child_cache: Rc<RefCell<HashMap<String, Record<F>>>>,
    child_scan: Rc<RefCell<ChildScanState>>,
}

impl<F> Clone for Record<F> {
    fn clone(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
            location: self.location,
            length: self.length,
            datetime: self.datetime,
            flags: self.flags,
            raw_name: self.raw_name.clone(),
            embedded_susp_entries: self.embedded_susp_entries.clone(),
            pending_continuation: self.pending_continuation,
            embedded_terminated: self.embedded_terminated,
            name_cache: Rc::clone(&self.name_cache),
            child_cache: Rc::clone(&self.child_cache),
            child_scan: Rc::clone(&self.child_scan),
        }
    }
}

fn raw_name_to_string(raw_name: &[u8]) -> String {
    match raw_name {
        [0x00] => String::new(),
        other => String::from_utf8_lossy(other).into_owned(),
    }
}

impl<F: BlockFetcher> Record<F> {
    /// Returns an independent handle to the same on-disc record, with fresh (empty) name and
    /// child caches.
    ///
    /// Used when handing out a non-directory record from a directory's child cache, so a
    /// caller reading its content doesn't share mutable state with the cached copy.
    fn copy_shallow(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
            location: self.location,
            length: self.length,
            datetime: self.datetime,
            flags: self.flags,
            raw_name: self.raw_name.clone(),
            embedded_susp_entries: self.embedded_susp_entries.clone(),
            pending_continuation: self.pending_continuation,
            embedded_terminated: self.embedded_terminated,
            name_cache: Rc::new(RefCell::new(None)),
            child_cache: Rc::new(RefCell::new(HashMap::new())),
            child_scan: Rc::new(RefCell::new(ChildScanState::NotStarted)),
        }
    }

    /// Decodes one directory record, given its length byte (already read by the caller) and a
    /// mutable borrow of `source` positioned at the first byte after that length.
    ///
    /// `source_handle` is stored in the returned record so it can perform its own future seeks
    /// (for `children`, `content`, the Rock Ridge name, ...); `source` is the same source,
    /// already borrowed by the caller, used to actually read the fixed fields here.
    pub(crate) fn read_after_length(
        source_handle: &Rc<RefCell<Source<F>>>,
        source: &mut Source<F>,
        length: u8,
    ) -> Result<Self, SourceError> {
        let start_remaining = source.remaining();

        let _ext_attr_length = source.unpack_u8()?;
        let location = source.unpack_both_u32()?;
        let data_length = source.unpack_both_u32()?;
        let datetime = {
            let values = source.unpack_smart("t")?;
            match values[0] {
                crate::source::SmartValue::DirDatetime(dt) => dt,
                _ => unreachable!(),
            }
        };
        let flags = FileFlags::from_bits_retain(source.unpack_u8()?);
        let _file_unit_size = source.unpack_u8()?;
        let _interleave_gap_size = source.unpack_u8()?;
        let _volume_sequence_number = source.unpack_both_u16()?;
        let name_length = source.unpack_u8()?;

        let name_bytes = source.unpack_raw(usize::from(name_length))?;
        let raw_name = match name_bytes.iter().position(|&b| b == b';') {
            Some(idx) => name_bytes[..idx].to_vec(),
            None => name_bytes,
        };

        if name_length % 2 == 0 {
            source.unpack_u8()?;
        }

        let consumed = start_remaining - source.remaining();
        let total_after_length_byte = usize::from(length) - 1;
        let system_use_len = total_after_length_byte.saturating_sub(consumed);

        let (skip_bytes, was_unknown) = match source.susp_starting_index {
            SuspSkip::Skip(n) => (usize::from(n), false),
            SuspSkip::Disabled => (system_use_len, false),
            SuspSkip::Unknown => (0, true),
        };
        let rockridge_enabled = source.rockridge;

        let (embedded_susp_entries, pending_continuation, embedded_terminated) =
            susp::decode_embedded(source, system_use_len, skip_bytes, rockridge_enabled)?;

        if was_unknown {
            source.susp_starting_index = match embedded_susp_entries.first() {
                Some(SuspEntry::Sp(sp)) => SuspSkip::Skip(sp.len_skp.saturating_sub(7)),
                _ => {
                    tracing::trace!("no SP entry on the first directory record; disabling SUSP");
                    SuspSkip::Disabled
                }
            };
        }

        Ok(Self {
            source: Rc::clone(source_handle),
            location,
            length: data_length,
            datetime,
            flags,
            raw_name,
            embedded_susp_entries,
            pending_continuation,
            embedded_terminated,
            name_cache: Rc::new(RefCell::new(None)),
            child_cache: Rc::new(RefCell::new(HashMap::new())),
            child_scan: Rc::new(RefCell::new(ChildScanState::NotStarted)),
        })
    }

    /// All SUSP entries belonging to this record, chasing any `CE` continuation areas (possibly
    /// across sectors) to completion.
    ///
    /// Rust has no generator syntax to mirror the original streaming iterator faithfully, so
    /// this variant, which would otherwise be internal-only, already returns an eagerly
    /// materialized `Vec` and doubles as the public, reentrancy-safe API.
    pub fn susp_entries(&self) -> Result<Vec<SuspEntry>, SourceError> {
        let mut entries = self.embedded_susp_entries.clone();
        if self.embedded_terminated {
            return Ok(entries);
        }

        let mut pending = self.pending_continuation;
        let mut source = self.source.borrow_mut();
        let rockridge_enabled = source.rockridge;
        while let Some(ce) = pending.take() {
            source.seek(ce.location, usize::try_from(ce.offset + ce.length).unwrap(), false)?;
            source.unpack_raw(usize::try_from(ce.offset).unwrap())?;
            let (more, next_pending, terminated) = susp::decode_embedded(
                &mut source,
                usize::try_from(ce.length).unwrap(),
                0,
                rockridge_enabled,
            )?;
            entries.extend(more);
            if terminated {
                break;
            }
            pending = next_pending;
        }
        Ok(entries)
    }

    /// The first SUSP entry satisfying `predicate`, chasing continuation areas if necessary.
    pub fn find_susp_entry(&self, mut predicate: impl FnMut(&SuspEntry) -> bool) -> Result<Option<SuspEntry>, SourceError> {
        Ok(self.susp_entries()?.into_iter().find(|e| predicate(e)))
    }

    /// This record's effective name: the reassembled Rock Ridge `NM` chain if present, else the
    /// raw ISO9660 identifier.
    pub fn name(&self) -> Result<String, SourceError> {
        if let Some(cached) = self.name_cache.borrow().clone() {
            return Ok(cached);
        }

        let saved = self.source.borrow().save_cursor();
        let result = self.compute_name();
        self.source.borrow_mut().restore_cursor(saved);

        if let Ok(name) = &result {
            *self.name_cache.borrow_mut() = Some(name.clone());
        }
        result
    }

    fn compute_name(&self) -> Result<String, SourceError> {
        let entries = self.susp_entries()?;
        let mut fragments = Vec::new();
        let mut found = false;

        for entry in &entries {
            let SuspEntry::RockRidge(RockRidgeEntry::Nm(nm)) = entry else { continue };
            found = true;
            if nm.flags.contains(NameFlags::CURRENT) {
                fragments.push(b'.');
            } else if nm.flags.contains(NameFlags::PARENT) {
                fragments.extend_from_slice(b"..");
            } else {
                fragments.extend_from_slice(&nm.name);
            }
            if !nm.flags.contains(NameFlags::CONTINUE) {
                break;
            }
        }

        if found {
            Ok(String::from_utf8_lossy(&fragments).into_owned())
        } else {
            Ok(raw_name_to_string(&self.raw_name))
        }
    }

    /// This directory's own "." self-entry, re-read from the start of its extent.
    ///
    /// Distinct from `self.clone()`: the copy stored in a parent directory's listing (or in a
    /// volume descriptor's root record) does not necessarily carry the same system-use data as
    /// the self-entry written inside the directory's own extent.
    pub fn current_directory(&self) -> Result<Record<F>, SourceError> {
        let mut source = self.source.borrow_mut();
        source.seek(self.location, usize::try_from(self.length).unwrap(), false)?;
        let len0 = source.unpack_u8()?;
        Record::read_after_length(&self.source, &mut source, len0)
    }

    /// This directory's ".." parent entry, re-read from the start of its extent.
    pub fn parent_directory(&self) -> Result<Record<F>, SourceError> {
        let mut source = self.source.borrow_mut();
        source.seek(self.location, usize::try_from(self.length).unwrap(), false)?;
        let len0 = source.unpack_u8()?;
        Record::read_after_length(&self.source, &mut source, len0)?;
        let len1 = source.unpack_u8()?;
        Record::read_after_length(&self.source, &mut source, len1)
    }

    /// Every child of this directory, in on-disc order, excluding the "." and ".." self-entries.
    pub fn children(&self) -> Result<Vec<Record<F>>, SourceError> {
        let mut source = self.source.borrow_mut();
        source.seek(self.location, usize::try_from(self.length).unwrap(), false)?;

        let len0 = source.unpack_u8()?;
        Record::read_after_length(&self.source, &mut source, len0)?;
        let len1 = source.unpack_u8()?;
        Record::read_after_length(&self.source, &mut source, len1)?;

        let mut out = Vec::new();
        loop {
            if source.remaining() == 0 {
                break;
            }
            let length = source.unpack_u8()?;
            if length == 0 {
                if source.remaining() == 0 {
                    break;
                }
                source.skip_to_sector_boundary();
                continue;
            }
            out.push(Record::read_after_length(&self.source, &mut source, length)?);
        }
        Ok(out)
    }

    /// Resolves one child by its effective (Rock Ridge-aware) name, scanning forward from
    /// wherever the last `find_child` call on this directory left off and caching every child
    /// visited along the way.
    pub fn find_child(&self, name: &str) -> Result<Record<F>, NotFoundError> {
        if let Some(hit) = self.child_cache.borrow().get(name) {
            return Ok(Self::hand_out(hit));
        }
        if *self.child_scan.borrow() == ChildScanState::Exhausted {
            return Err(NotFoundError::NoSuchChild { name: name.to_string() });
        }

        let mut first_pass = *self.child_scan.borrow() == ChildScanState::NotStarted;
        let mut offset = match *self.child_scan.borrow() {
            ChildScanState::At(off) => off,
            _ => 0,
        };

        loop {
            let mut source = self.source.borrow_mut();
            source.seek(self.location, usize::try_from(self.length).unwrap(), false)?;
            source.unpack_raw(offset)?;

            if first_pass {
                let len0 = source.unpack_u8()?;
                Record::read_after_length(&self.source, &mut source, len0)?;
                let len1 = source.unpack_u8()?;
                Record::read_after_length(&self.source, &mut source, len1)?;
                first_pass = false;
            }

            if source.remaining() == 0 {
                drop(source);
                *self.child_scan.borrow_mut() = ChildScanState::Exhausted;
                return Err(NotFoundError::NoSuchChild { name: name.to_string() });
            }

            let length = source.unpack_u8()?;
            if length == 0 {
                if source.remaining() == 0 {
                    drop(source);
                    *self.child_scan.borrow_mut() = ChildScanState::Exhausted;
                    return Err(NotFoundError::NoSuchChild { name: name.to_string() });
                }
                source.skip_to_sector_boundary();
                offset = usize::try_from(self.length).unwrap() - source.remaining();
                continue;
            }

            let child = Record::read_after_length(&self.source, &mut source, length)?;
            offset = usize::try_from(self.length).unwrap() - source.remaining();
            drop(source);

            // `child.name()` may itself seek (to chase a CE into a continuation sector), so the
            // cursor we're mid-scan with must be saved and restored around it.
            let saved = self.source.borrow().save_cursor();
            let child_name = child.name()?;
            self.source.borrow_mut().restore_cursor(saved);

            self.child_cache.borrow_mut().insert(child_name.clone(), child.copy_shallow());
            *self.child_scan.borrow_mut() = ChildScanState::At(offset);

            if child_name == name {
                return Ok(Self::hand_out(&child));
            }
        }
    }

    fn hand_out(record: &Record<F>) -> Record<F> {
        if record.flags.contains(FileFlags::DIRECTORY) {
            record.clone()
        } else {
            record.copy_shallow()
        }
    }

    /// This file's content, read in full.
    pub fn content(&self) -> Result<Vec<u8>, SourceError> {
        let mut source = self.source.borrow_mut();
        source.seek(self.location, usize::try_from(self.length).unwrap(), true)?;
        source.unpack_all()
    }

    /// A sequential, non-caching reader over this file's content.
    pub fn get_stream(&self) -> Result<Box<dyn Read>, SourceError> {
        let mut source = self.source.borrow_mut();
        source.get_stream(self.location, usize::try_from(self.length).unwrap())
    }
}
