//! The L-type path table: a compact, directory-only index into the hierarchy, stored separately
//! from the directories themselves.

use std::collections::HashMap;
use std::rc::Rc;
use std::cell::RefCell;

use crate::error::SourceError;
use crate::source::{BlockFetcher, Source};

/// One entry of the path table: a directory's extent location together with the 1-based index
/// of its parent entry (both as stored on disc).
#[derive(Clone, Debug)]
pub struct PathTableEntry {
    pub extent_location: u32,
    pub parent_index: u16,
    pub name: Vec<u8>,
}

/// The decoded path table, indexed for `(parent_index, name)` lookup.
pub struct PathTable {
    entries: Vec<PathTableEntry>,
    by_parent_and_name: HashMap<(u16, String), u32>,
}

impl PathTable {
    /// Reads the little-endian path table image of `size` bytes starting at `location`.
    pub fn read<F: BlockFetcher>(
        source_handle: &Rc<RefCell<Source<F>>>,
        location: u32,
        size: usize,
    ) -> Result<Self, SourceError> {
        let mut source = source_handle.borrow_mut();
        source.seek(location, size, false)?;

        let mut entries = Vec::new();
        let mut by_parent_and_name = HashMap::new();

        while source.remaining() > 0 {
            let name_length = source.unpack_u8()?;
            let _ext_attr_length = source.unpack_u8()?;
            let extent_location = source.unpack_u32_le()?;
            let parent_index = source.unpack_u16_le()?;
            let name = source.unpack_raw(usize::from(name_length))?;
            if name_length % 2 == 1 {
                source.unpack_u8()?;
            }

            let index = u32::try_from(entries.len() + 1).unwrap();
            let key = (parent_index, String::from_utf8_lossy(&name).to_uppercase());
            by_parent_and_name.insert(key, index);
            entries.push(PathTableEntry { extent_location, parent_index, name });
        }

        Ok(Self { entries, by_parent_and_name })
    }

    fn entry_at(&self, index: u32) -> Option<&PathTableEntry> {
        self.entries.get(usize::try_from(index).ok()?.checked_sub(1)?)
    }

    /// Resolves a sequence of path components (from the root) to the extent location of the
    /// deepest matching directory.
    ///
    /// Returns `None` if the first component does not match any entry; only entire-prefix
    /// matches are reported, since the path table only indexes directories and cannot tell
    /// whether an unmatched suffix component is simply a plain file.
    pub fn resolve(&self, path: &[String]) -> Option<(usize, u32)> {
        let mut current_index: u16 = 1; // root is always path table entry 1
        let mut matched = 0;
        let mut location = self.entry_at(1)?.extent_location;

        for component in path {
            let key = (current_index, component.to_uppercase());
            let Some(&next_index) = self.by_parent_and_name.get(&key) else {
                break;
            };
            let entry = self.entry_at(next_index)?;
            location = entry.extent_location;
            current_index = u16::try_from(next_index).ok()?;
            matched += 1;
        }

        Some((matched, location))
    }

    pub fn root_location(&self) -> Option<u32> {
        self.entry_at(1).map(|e| e.extent_location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::MemoryFetcher;

    fn push_entry(buf: &mut Vec<u8>, name: &[u8], extent_location: u32, parent_index: u16) {
        let name_length = u8::try_from(name.len()).unwrap();
        buf.push(name_length);
        buf.push(0); // ext attr length
        buf.extend_from_slice(&extent_location.to_le_bytes());
        buf.extend_from_slice(&parent_index.to_le_bytes());
        buf.extend_from_slice(name);
        if name_length % 2 == 1 {
            buf.push(0);
        }
    }

    fn build_table() -> PathTable {
        let mut buf = Vec::new();
        push_entry(&mut buf, &[0x00], 20, 1); // root, self-referential parent per convention
        push_entry(&mut buf, b"DOCS", 30, 1);
        push_entry(&mut buf, b"IMG", 40, 2); // child of DOCS

        let mut fetcher = MemoryFetcher::new(1);
        fetcher.data[..buf.len()].copy_from_slice(&buf);
        let source = Rc::new(RefCell::new(Source::new(fetcher)));
        PathTable::read(&source, 0, buf.len()).unwrap()
    }

    #[test]
    fn resolve_finds_a_nested_directory() {
        let table = build_table();
        let path = vec!["DOCS".to_string(), "IMG".to_string()];
        let (matched, location) = table.resolve(&path).unwrap();
        assert_eq!(matched, 2);
        assert_eq!(location, 40);
    }

    #[test]
    fn resolve_reports_the_longest_matching_prefix() {
        let table = build_table();
        let path = vec!["DOCS".to_string(), "NOPE".to_string()];
        let (matched, location) = table.resolve(&path).unwrap();
        assert_eq!(matched, 1);
        assert_eq!(location, 30);
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let table = build_table();
        let path = vec!["docs".to_string()];
        let (matched, location) = table.resolve(&path).unwrap();
        assert_eq!(matched, 1);
        assert_eq!(location, 30);
    }

    #[test]
    fn root_location_is_the_first_entry() {
        let table = build_table();
        assert_eq!(table.root_location(), Some(20));
    }
}
