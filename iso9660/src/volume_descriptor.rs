//! The volume descriptor set: the fixed sequence of metadata records starting at sector 16 of
//! every ISO9660 image.

use std::rc::Rc;
use std::cell::RefCell;

use bitflags::bitflags;
use from_to_repr::from_to_other;

use crate::error::SourceError;
use crate::record::Record;
use crate::source::{BlockFetcher, Source};

/// The fixed standard identifier every volume descriptor carries. See ISO9660 §8.1.
pub const STANDARD_IDENTIFIER: [u8; 5] = *b"CD001";

/// A volume descriptor's type byte. See ISO9660 §8.1.1.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum DescriptorType {
    BootRecord = 0x00,
    Primary = 0x01,
    Supplementary = 0x02,
    Partition = 0x03,
    SetTerminator = 0xFF,
    Other(u8),
}

bitflags! {
    /// Flags on a primary/supplementary volume descriptor. Always zero on primary descriptors.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct VolumeFlags: u8 {
        /// At least one escape sequence in `escape_sequences` is not registered per ISO 2375.
        const NON_ISO_2375_ESCAPE = 0x01;
    }
}

/// A boot record descriptor (`vd_type` 0x00). Its boot-catalog contents are not interpreted; El
/// Torito and other boot formats are out of scope.
#[derive(Clone, Debug)]
pub struct BootDescriptor {
    pub boot_system_identifier: [u8; 32],
    pub boot_identifier: [u8; 32],
    pub boot_system_use: Vec<u8>,
}

/// A primary (or supplementary/enhanced) volume descriptor. See ISO9660 §8.4/§8.5.
pub struct PrimaryDescriptor<F> {
    pub flags: VolumeFlags,
    pub system_identifier: [u8; 32],
    pub volume_identifier: [u8; 32],
    pub volume_space_size: u32,
    pub escape_sequences: [u8; 32],
    pub volume_set_size: u16,
    pub volume_sequence_number: u16,
    pub logical_block_size: u16,
    pub path_table_size: u32,
    pub path_table_l_loc: u32,
    pub path_table_m_loc: u32,
    pub root_directory_record: Record<F>,
    pub volume_set_identifier: [u8; 128],
    pub publisher_identifier: [u8; 128],
    pub data_preparer_identifier: [u8; 128],
    pub application_identifier: [u8; 128],
}

/// A volume partition descriptor (`vd_type` 0x03). See ISO9660 §8.6.
#[derive(Clone, Copy, Debug)]
pub struct PartitionDescriptor {
    pub system_identifier: [u8; 32],
    pub partition_identifier: [u8; 32],
    pub partition_location: u32,
    pub partition_size: u32,
}

/// Any volume descriptor encountered while walking the descriptor set.
pub enum VolumeDescriptor<F> {
    Boot(BootDescriptor),
    Primary(PrimaryDescriptor<F>),
    Supplementary(PrimaryDescriptor<F>),
    Partition(PartitionDescriptor),
    Terminator,
}
impl<F> VolumeDescriptor<F> {
    pub fn descriptor_type(&self) -> DescriptorType {
        match self {
            Self::Boot(_) => DescriptorType::BootRecord,
            Self::Primary(_) => DescriptorType::Primary,
            Self::Supplementary(_) => DescriptorType::Supplementary,
            Self::Partition(_) => DescriptorType::Partition,
            Self::Terminator => DescriptorType::SetTerminator,
        }
    }
}

fn read_fixed<F: BlockFetcher>(source: &mut Source<F>, len: usize) -> Result<Vec<u8>, SourceError> {
    source.unpack_raw(len)
}

fn read_array32<F: BlockFetcher>(source: &mut Source<F>) -> Result<[u8; 32], SourceError> {
    Ok(read_fixed(source, 32)?.try_into().unwrap())
}

fn read_array128<F: BlockFetcher>(source: &mut Source<F>) -> Result<[u8; 128], SourceError> {
    Ok(read_fixed(source, 128)?.try_into().unwrap())
}

/// Reads one volume descriptor, assuming the source is positioned at the start of one logical
/// sector containing it.
pub fn unpack_volume_descriptor<F: BlockFetcher>(
    source_handle: &Rc<RefCell<Source<F>>>,
) -> Result<VolumeDescriptor<F>, SourceError> {
    let mut source = source_handle.borrow_mut();

    let vd_type_byte = source.unpack_u8()?;
    let identifier: [u8; 5] = source.unpack_raw(5)?.try_into().unwrap();
    if identifier != STANDARD_IDENTIFIER {
        return Err(SourceError::BadStandardIdentifier { found: identifier.into() });
    }
    let version = source.unpack_u8()?;
    if version != 1 {
        return Err(SourceError::BadDescriptorVersion { found: version });
    }

    let vd_type = DescriptorType::from(vd_type_byte);
    match vd_type {
        DescriptorType::BootRecord => {
            let boot_system_identifier = read_array32(&mut source)?;
            let boot_identifier = read_array32(&mut source)?;
            let boot_system_use = source.unpack_raw(1977)?;
            Ok(VolumeDescriptor::Boot(BootDescriptor {
                boot_system_identifier,
                boot_identifier,
                boot_system_use,
            }))
        }
        DescriptorType::Primary | DescriptorType::Supplementary => {
            let flags = VolumeFlags::from_bits_retain(source.unpack_u8()?);
            let system_identifier = read_array32(&mut source)?;
            let volume_identifier = read_array32(&mut source)?;
            let _reserved0 = source.unpack_raw(8)?;
            let volume_space_size = source.unpack_both_u32()?;
            let escape_sequences = read_array32(&mut source)?;
            let volume_set_size = source.unpack_both_u16()?;
            let volume_sequence_number = source.unpack_both_u16()?;
            let logical_block_size = source.unpack_both_u16()?;
            let path_table_size = source.unpack_both_u32()?;
            let path_table_l_loc = source.unpack_u32_le()?;
            let _path_table_opt_l_loc = source.unpack_u32_le()?;
            let path_table_m_loc = source.unpack_u32_be()?;
            let _path_table_opt_m_loc = source.unpack_u32_be()?;

            let root_entry_length = source.unpack_u8()?;
            drop(source);
            let root_directory_record = {
                let mut s = source_handle.borrow_mut();
                Record::read_after_length(source_handle, &mut s, root_entry_length)?
            };
            let mut source = source_handle.borrow_mut();

            let volume_set_identifier = read_array128(&mut source)?;
            let publisher_identifier = read_array128(&mut source)?;
            let data_preparer_identifier = read_array128(&mut source)?;
            let application_identifier = read_array128(&mut source)?;
            let _copyright_file_identifier = source.unpack_raw(37)?;
            let _abstract_file_identifier = source.unpack_raw(37)?;
            let _bibliographic_file_identifier = source.unpack_raw(37)?;
            let _creation = source.unpack_smart("T")?;
            let _modification = source.unpack_smart("T")?;
            let _expiration = source.unpack_smart("T")?;
            let _effective = source.unpack_smart("T")?;
            let _file_structure_version = source.unpack_u8()?;
            let _reserved1 = source.unpack_u8()?;
            let _application_use = source.unpack_raw(512)?;
            let _reserved2 = source.unpack_raw(653)?;

            let descriptor = PrimaryDescriptor {
                flags,
                system_identifier,
                volume_identifier,
                volume_space_size,
                escape_sequences,
                volume_set_size,
                volume_sequence_number,
                logical_block_size,
                path_table_size,
                path_table_l_loc,
                path_table_m_loc,
                root_directory_record,
                volume_set_identifier,
                publisher_identifier,
                data_preparer_identifier,
                application_identifier,
            };
            Ok(if vd_type == DescriptorType::Primary {
                VolumeDescriptor::Primary(descriptor)
            } else {
                VolumeDescriptor::Supplementary(descriptor)
            })
        }
        DescriptorType::Partition => {
            let _reserved0 = source.unpack_u8()?;
            let system_identifier = read_array32(&mut source)?;
            let partition_identifier = read_array32(&mut source)?;
            let partition_location = source.unpack_both_u32()?;
            let partition_size = source.unpack_both_u32()?;
            Ok(VolumeDescriptor::Partition(PartitionDescriptor {
                system_identifier,
                partition_identifier,
                partition_location,
                partition_size,
            }))
        }
        DescriptorType::SetTerminator => Ok(VolumeDescriptor::Terminator),
        DescriptorType::Other(other) => Err(SourceError::UnknownDescriptorType { found: other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::MemoryFetcher;

    fn both_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
        buf.extend_from_slice(&v.to_be_bytes());
    }
    fn both_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
        buf.extend_from_slice(&v.to_be_bytes());
    }

    /// A minimal root directory record: the "." self-entry, with no Rock Ridge system use.
    fn root_directory_record_bytes(location: u32, length: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(34); // record length: 1 + 32 fixed + 1 name
        buf.push(0); // ext attr length
        both_u32(&mut buf, location);
        both_u32(&mut buf, length);
        buf.extend_from_slice(&[120, 1, 1, 0, 0, 0, 0]);
        buf.push(0x02); // DIRECTORY flag
        buf.push(0);
        buf.push(0);
        both_u16(&mut buf, 1);
        buf.push(1); // name length
        buf.push(0x00); // "."
        buf
    }

    fn terminator_sector() -> Vec<u8> {
        let mut buf = vec![0xFF];
        buf.extend_from_slice(&STANDARD_IDENTIFIER);
        buf.push(1);
        buf.resize(2048, 0);
        buf
    }

    fn primary_sector() -> Vec<u8> {
        let mut buf = vec![0x01];
        buf.extend_from_slice(&STANDARD_IDENTIFIER);
        buf.push(1);
        buf.push(0); // flags
        buf.extend_from_slice(&[0u8; 32]); // system identifier
        let mut vol_id = [0x20u8; 32];
        vol_id[..4].copy_from_slice(b"DISK");
        buf.extend_from_slice(&vol_id);
        buf.extend_from_slice(&[0u8; 8]); // reserved
        both_u32(&mut buf, 100); // volume space size
        buf.extend_from_slice(&[0u8; 32]); // escape sequences
        both_u16(&mut buf, 1); // volume set size
        both_u16(&mut buf, 1); // volume sequence number
        both_u16(&mut buf, 2048); // logical block size
        both_u32(&mut buf, 10); // path table size
        buf.extend_from_slice(&20u32.to_le_bytes()); // path_table_l_loc
        buf.extend_from_slice(&0u32.to_le_bytes()); // optional L loc
        buf.extend_from_slice(&21u32.to_be_bytes()); // path_table_m_loc
        buf.extend_from_slice(&0u32.to_be_bytes()); // optional M loc

        buf.extend_from_slice(&root_directory_record_bytes(18, 2048));

        buf.extend_from_slice(&[0x20u8; 128]); // volume set identifier
        buf.extend_from_slice(&[0x20u8; 128]); // publisher identifier
        buf.extend_from_slice(&[0x20u8; 128]); // data preparer identifier
        buf.extend_from_slice(&[0x20u8; 128]); // application identifier
        buf.extend_from_slice(&[0x20u8; 37]); // copyright
        buf.extend_from_slice(&[0x20u8; 37]); // abstract
        buf.extend_from_slice(&[0x20u8; 37]); // bibliographic
        buf.extend_from_slice(&[b'0'; 16]); buf.push(0); // creation
        buf.extend_from_slice(&[b'0'; 16]); buf.push(0); // modification
        buf.extend_from_slice(&[b'0'; 16]); buf.push(0); // expiration
        buf.extend_from_slice(&[b'0'; 16]); buf.push(0); // effective
        buf.push(1); // file structure version
        buf.push(0); // reserved
        buf.extend_from_slice(&[0u8; 512]); // application use
        buf.resize(2048, 0);
        buf
    }

    #[test]
    fn decodes_a_primary_descriptor() {
        let bytes = primary_sector();
        let mut fetcher = MemoryFetcher::new(1);
        fetcher.data[..bytes.len()].copy_from_slice(&bytes);
        let source = Rc::new(RefCell::new(Source::new(fetcher)));
        source.borrow_mut().seek(0, 2048, false).unwrap();

        let descriptor = unpack_volume_descriptor(&source).unwrap();
        let VolumeDescriptor::Primary(p) = descriptor else { panic!("expected Primary") };
        assert_eq!(p.volume_space_size, 100);
        assert_eq!(p.path_table_l_loc, 20);
        assert_eq!(p.path_table_m_loc, 21);
        assert_eq!(p.root_directory_record.location, 18);
    }

    #[test]
    fn decodes_a_terminator() {
        let bytes = terminator_sector();
        let mut fetcher = MemoryFetcher::new(1);
        fetcher.data[..bytes.len()].copy_from_slice(&bytes);
        let source = Rc::new(RefCell::new(Source::new(fetcher)));
        source.borrow_mut().seek(0, 2048, false).unwrap();

        let descriptor = unpack_volume_descriptor(&source).unwrap();
        assert!(matches!(descriptor, VolumeDescriptor::Terminator));
        assert_eq!(descriptor.descriptor_type(), DescriptorType::SetTerminator);
    }

    #[test]
    fn rejects_a_bad_standard_identifier() {
        let mut bytes = vec![0x01];
        bytes.extend_from_slice(b"NOPE1");
        bytes.push(1);
        bytes.resize(2048, 0);
        let mut fetcher = MemoryFetcher::new(1);
        fetcher.data[..bytes.len()].copy_from_slice(&bytes);
        let source = Rc::new(RefCell::new(Source::new(fetcher)));
        source.borrow_mut().seek(0, 2048, false).unwrap();

        let result = unpack_volume_descriptor(&source);
        assert!(matches!(result, Err(SourceError::BadStandardIdentifier { .. })));
    }
}
