//! [`Iso`], the facade binding descriptor parsing, the path table, and directory navigation
//! into a single entry point.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{NotFoundError, SourceError};
use crate::path_table::PathTable;
use crate::record::{FileFlags, Record};
use crate::source::{BlockFetcher, Source, SECTOR_LENGTH};
use crate::susp::SuspEntry;
use crate::volume_descriptor::{self, VolumeDescriptor};

/// An ISO9660 image opened for reading, with its volume descriptors, path table and Rock Ridge
/// detection already resolved.
pub struct Iso<F> {
    source: Rc<RefCell<Source<F>>>,
    pub descriptors: Vec<VolumeDescriptor<F>>,
    pub path_table: PathTable,
    pub root: Record<F>,
    path_cache: RefCell<HashMap<Vec<String>, Record<F>>>,
}

impl<F: BlockFetcher> Iso<F> {
    /// Opens an image over `fetcher`: reads the volume descriptor set from sector 16, loads the
    /// path table, and determines whether Rock Ridge extensions are in use.
    pub fn new(fetcher: F) -> Result<Self, SourceError> {
        let source = Rc::new(RefCell::new(Source::new(fetcher)));

        let mut descriptors = Vec::new();
        let mut sector = 16u32;
        loop {
            source.borrow_mut().seek(sector, SECTOR_LENGTH, false)?;
            let descriptor = volume_descriptor::unpack_volume_descriptor(&source)?;
            let is_terminator = matches!(descriptor, VolumeDescriptor::Terminator);
            tracing::debug!(sector, descriptor_type = ?descriptor.descriptor_type(), "parsed volume descriptor");
            descriptors.push(descriptor);
            sector += 1;
            if is_terminator {
                break;
            }
        }

        let primary = descriptors.iter()
            .find_map(|d| match d {
                VolumeDescriptor::Primary(p) => Some(p),
                _ => None,
            })
            .ok_or(SourceError::NoPrimaryDescriptor)?;

        let root = primary.root_directory_record.clone();
        let path_table = PathTable::read(
            &source,
            primary.path_table_l_loc,
            usize::try_from(primary.path_table_size).unwrap(),
        )?;

        // `SP`/`ER` are decoded unconditionally by the SUSP engine regardless of the
        // `rockridge` flag, so the root's own entries are trustworthy even though they were
        // decoded before we knew whether Rock Ridge extensions were active.
        let root_entries = root.susp_entries()?;
        let rock_ridge_er = root_entries.iter().find_map(|entry| match entry {
            SuspEntry::Er(er) if er.is_rock_ridge() => Some(er),
            _ => None,
        });
        if let Some(er) = rock_ridge_er {
            tracing::debug!(ext_id = %er.ext_id, ext_ver = er.ext_ver, "found Rock Ridge ER entry");
        }
        let rockridge = rock_ridge_er.is_some();
        source.borrow_mut().rockridge = rockridge;
        tracing::debug!(rockridge, "Rock Ridge detection complete");

        Ok(Self {
            source,
            descriptors,
            path_table,
            root,
            path_cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn rockridge(&self) -> bool {
        self.source.borrow().rockridge
    }

    /// Reads the directory self-entry ("." record) sitting at the start of the extent at
    /// `location`, as found via [`PathTable::resolve`].
    ///
    /// The path table only records a directory's extent location, not its length, so the
    /// self-entry's own `length` field (decoded here) is the only way to recover it.
    fn record_at(&self, location: u32) -> Result<Record<F>, SourceError> {
        let mut source = self.source.borrow_mut();
        source.seek(location, SECTOR_LENGTH, false)?;
        let length = source.unpack_u8()?;
        Record::read_after_length(&self.source, &mut source, length)
    }

    /// Resolves a path (given as components from the root) to its directory record.
    ///
    /// Components are matched case-insensitively when Rock Ridge is not active, since plain
    /// ISO9660 identifiers are always upper-case; case-sensitively otherwise. Directory
    /// prefixes resolved along the way are cached, so repeated lookups under a common ancestor
    /// don't repeat any work beyond the child walk for the new suffix. When Rock Ridge is not
    /// active, a prefix miss in the cache also consults the path table for an exact match at
    /// that same prefix depth before shrinking the prefix further, matching the original
    /// reader's behavior of trying `path_table.record(*path)` ahead of the directory walk.
    pub fn record(&self, path: &[&str]) -> Result<Record<F>, NotFoundError> {
        let rockridge = self.rockridge();
        let components: Vec<String> = path.iter()
            .map(|c| if rockridge { c.to_string() } else { c.to_uppercase() })
            .collect();

        if components.is_empty() {
            return Ok(self.root.clone());
        }

        let mut prefix_len = components.len();
        let (mut record, mut matched) = loop {
            if prefix_len == 0 {
                break (self.root.clone(), 0);
            }
            if let Some(hit) = self.path_cache.borrow().get(&components[..prefix_len]) {
                break (hit.clone(), prefix_len);
            }
            if !rockridge {
                if let Some((matched_len, location)) = self.path_table.resolve(&components[..prefix_len]) {
                    if matched_len == prefix_len {
                        let hit = self.record_at(location)?;
                        self.path_cache.borrow_mut().insert(components[..prefix_len].to_vec(), hit.clone());
                        break (hit, prefix_len);
                    }
                }
            }
            prefix_len -= 1;
        };

        while matched < components.len() {
            record = record.find_child(&components[matched])?;
            matched += 1;
            if record.flags.contains(FileFlags::DIRECTORY) {
                self.path_cache.borrow_mut().insert(components[..matched].to_vec(), record.clone());
            }
        }

        Ok(record)
    }
}
