//! Rock Ridge Interchange Protocol (RRIP) entries: the SUSP extension family that layers
//! POSIX-like names, permissions and symlinks onto an ISO9660 image.

use bitflags::bitflags;

use crate::source::{RawDirDatetime, RawVdDatetime};


bitflags! {
    /// Flags shared by [`Nm`] fragments and by each [`SlComponent`].
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct NameFlags: u8 {
        /// The name continues into the next `NM` entry.
        const CONTINUE = 0x01;
        /// This component is the current directory (".").
        const CURRENT = 0x02;
        /// This component is the parent directory ("..").
        const PARENT = 0x04;
    }
}

bitflags! {
    /// Flags on an individual [`SlComponent`]; a superset of [`NameFlags`] with a root marker.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct SlComponentFlags: u8 {
        const CONTINUE = 0x01;
        const CURRENT = 0x02;
        const PARENT = 0x04;
        /// This component is the filesystem root ("/").
        const ROOT = 0x08;
    }
}

/// `NM`: a fragment of a POSIX-style file name. See RRIP §4.1.4.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Nm {
    pub flags: NameFlags,
    pub name: Vec<u8>,
}

/// `PX`: POSIX file attributes. See RRIP §4.1.1.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Px {
    pub mode: u32,
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
    /// Present (and non-`None`) only when the entry is 40 bytes long (the 1994 RRIP revision).
    pub inode: Option<u32>,
}

/// `PN`: the major/minor device numbers of a device node. See RRIP §4.1.2.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Pn {
    pub dev_high: u32,
    pub dev_low: u32,
}

/// One component of a reconstructed symbolic link target.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SlComponent {
    pub flags: SlComponentFlags,
    /// Raw payload bytes; meaningful only when no special flag (`CURRENT`/`PARENT`/`ROOT`) is
    /// set.
    pub content: Vec<u8>,
}

/// `SL`: a symbolic link target, recorded as a sequence of components. See RRIP §4.1.3.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Sl {
    /// Whether the last component of this entry continues into the next `SL` entry.
    pub continues: bool,
    pub components: Vec<SlComponent>,
}
impl Sl {
    /// Renders the components of a single `SL` entry (not a chain) into a path fragment,
    /// following the separator rules: "/" after every component except one flagged `CONTINUE`,
    /// and no separator after the final component if `self.continues` is set.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, component) in self.components.iter().enumerate() {
            let is_last = i + 1 == self.components.len();
            if component.flags.contains(SlComponentFlags::ROOT) {
                // nothing to append; the following separator supplies the leading '/'
            } else if component.flags.contains(SlComponentFlags::CURRENT) {
                out.push('.');
            } else if component.flags.contains(SlComponentFlags::PARENT) {
                out.push_str("..");
            } else {
                out.push_str(&String::from_utf8_lossy(&component.content));
            }

            let suppress_separator = component.flags.contains(SlComponentFlags::CONTINUE)
                || (is_last && self.continues);
            if !suppress_separator {
                out.push('/');
            }
        }
        out
    }
}

bitflags! {
    /// Selects which timestamps a `TF` entry carries, and in which form. See RRIP §4.1.6.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct TfFlags: u8 {
        const CREATION = 0x01;
        const MODIFY = 0x02;
        const ACCESS = 0x04;
        const ATTRIBUTES = 0x08;
        const BACKUP = 0x10;
        const EXPIRATION = 0x20;
        const EFFECTIVE = 0x40;
        /// If set, timestamps use the 17-byte volume-descriptor form instead of the 7-byte
        /// directory form.
        const LONG_FORM = 0x80;
    }
}

/// One of the possibly several timestamps making up a [`Tf`] entry, still in its on-disc form;
/// conversion to a broken-down date is left to the caller and is not performed eagerly.
#[derive(Clone, Copy, Debug)]
pub enum RawTimestamp {
    Short(RawDirDatetime),
    Long(RawVdDatetime),
}

/// `TF`: POSIX-style timestamps (creation, modification, access, ...). See RRIP §4.1.6.
#[derive(Clone, Debug)]
pub struct Tf {
    pub flags: TfFlags,
    /// Present timestamps, in the fixed bit order: creation, modify, access, attributes,
    /// backup, expiration, effective.
    pub timestamps: Vec<RawTimestamp>,
}

/// `RR`: the legacy bitmask of which Rock Ridge entries a record carries. Superseded in
/// practice by simply checking for the presence of each entry, but still emitted by some
/// writers. See RRIP §4.1.5.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Rr {
    pub present: u8,
}

/// Any Rock Ridge SUSP entry.
#[derive(Clone, Debug)]
pub enum RockRidgeEntry {
    Rr(Rr),
    Px(Px),
    Pn(Pn),
    Nm(Nm),
    Sl(Sl),
    Tf(Tf),
}

pub(crate) fn decode_rr(payload: &[u8]) -> Option<RockRidgeEntry> {
    if payload.len() != 1 {
        return None;
    }
    Some(RockRidgeEntry::Rr(Rr { present: payload[0] }))
}

pub(crate) fn decode_px(payload: &[u8]) -> Option<RockRidgeEntry> {
    if payload.len() != 32 && payload.len() != 40 {
        return None;
    }
    let both_u32 = |bytes: &[u8]| -> Option<u32> {
        let le = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let be = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
        (le == be).then_some(le)
    };
    let mode = both_u32(&payload[0..8])?;
    let links = both_u32(&payload[8..16])?;
    let uid = both_u32(&payload[16..24])?;
    let gid = both_u32(&payload[24..32])?;
    let inode = if payload.len() == 40 {
        Some(both_u32(&payload[32..40])?)
    } else {
        None
    };
    Some(RockRidgeEntry::Px(Px { mode, links, uid, gid, inode }))
}

pub(crate) fn decode_pn(payload: &[u8]) -> Option<RockRidgeEntry> {
    if payload.len() != 16 {
        return None;
    }
    let both_u32 = |bytes: &[u8]| -> Option<u32> {
        let le = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let be = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
        (le == be).then_some(le)
    };
    let dev_high = both_u32(&payload[0..8])?;
    let dev_low = both_u32(&payload[8..16])?;
    Some(RockRidgeEntry::Pn(Pn { dev_high, dev_low }))
}

pub(crate) fn decode_nm(payload: &[u8]) -> Option<RockRidgeEntry> {
    if payload.is_empty() {
        return None;
    }
    let flags = NameFlags::from_bits_retain(payload[0]);
    let name = payload[1..].to_vec();
    Some(RockRidgeEntry::Nm(Nm { flags, name }))
}

pub(crate) fn decode_sl(payload: &[u8]) -> Option<RockRidgeEntry> {
    if payload.is_empty() {
        return None;
    }
    let continues = payload[0] & 0x01 != 0;
    let mut components = Vec::new();
    let mut pos = 1;
    while pos + 2 <= payload.len() {
        let raw_flags = payload[pos];
        let len = usize::from(payload[pos + 1]);
        pos += 2;

        // Each component's flag byte must be exactly one of these five values; bitwise
        // combinations (e.g. ROOT|CURRENT) are not valid on-disc data.
        let flags = match raw_flags {
            0x00 | 0x01 | 0x02 | 0x04 | 0x08 => SlComponentFlags::from_bits_retain(raw_flags),
            _ => return None,
        };
        let is_special = flags.intersects(
            SlComponentFlags::CURRENT | SlComponentFlags::PARENT | SlComponentFlags::ROOT,
        );
        if is_special {
            if len != 0 {
                return None;
            }
        } else if len == 0 {
            return None;
        }

        if pos + len > payload.len() {
            return None;
        }
        let content = payload[pos..pos + len].to_vec();
        pos += len;
        components.push(SlComponent { flags, content });
    }
    if pos != payload.len() {
        return None;
    }
    Some(RockRidgeEntry::Sl(Sl { continues, components }))
}

pub(crate) fn decode_tf(payload: &[u8]) -> Option<RockRidgeEntry> {
    if payload.is_empty() {
        return None;
    }
    let flags = TfFlags::from_bits_retain(payload[0]);
    let long_form = flags.contains(TfFlags::LONG_FORM);
    let field_width = if long_form { 17 } else { 7 };

    let selectors = [
        TfFlags::CREATION, TfFlags::MODIFY, TfFlags::ACCESS, TfFlags::ATTRIBUTES,
        TfFlags::BACKUP, TfFlags::EXPIRATION, TfFlags::EFFECTIVE,
    ];
    let count = selectors.iter().filter(|f| flags.contains(**f)).count();
    if payload.len() != 1 + count * field_width {
        return None;
    }

    let mut timestamps = Vec::with_capacity(count);
    let mut pos = 1;
    for _ in 0..count {
        let field = &payload[pos..pos + field_width];
        let timestamp = if long_form {
            let mut digits = [0u8; 16];
            digits.copy_from_slice(&field[0..16]);
            RawTimestamp::Long(RawVdDatetime { digits, gmt_offset_15min: field[16] as i8 })
        } else {
            RawTimestamp::Short(RawDirDatetime {
                years_since_1900: field[0],
                month: field[1],
                day: field[2],
                hour: field[3],
                minute: field[4],
                second: field[5],
                gmt_offset_15min: field[6] as i8,
            })
        };
        timestamps.push(timestamp);
        pos += field_width;
    }

    Some(RockRidgeEntry::Tf(Tf { flags, timestamps }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn px_without_inode_is_32_bytes() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0o755u32.to_le_bytes());
        payload.extend_from_slice(&0o755u32.to_be_bytes());
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        let Some(RockRidgeEntry::Px(px)) = decode_px(&payload) else { panic!("expected Px") };
        assert_eq!(px.mode, 0o755);
        assert_eq!(px.inode, None);
    }

    #[test]
    fn px_with_inode_is_40_bytes() {
        let mut payload = Vec::new();
        for field in [0o755u32, 1, 0, 0] {
            payload.extend_from_slice(&field.to_le_bytes());
            payload.extend_from_slice(&field.to_be_bytes());
        }
        payload.extend_from_slice(&99u32.to_le_bytes());
        payload.extend_from_slice(&99u32.to_be_bytes());
        let Some(RockRidgeEntry::Px(px)) = decode_px(&payload) else { panic!("expected Px") };
        assert_eq!(px.inode, Some(99));
    }

    #[test]
    fn px_rejects_mismatched_halves() {
        let mut payload = vec![0u8; 32];
        payload[0..4].copy_from_slice(&1u32.to_le_bytes());
        payload[4..8].copy_from_slice(&2u32.to_be_bytes());
        assert!(decode_px(&payload).is_none());
    }

    #[test]
    fn nm_fragment_round_trips_name_bytes() {
        let mut payload = vec![NameFlags::CONTINUE.bits()];
        payload.extend_from_slice(b"foo");
        let Some(RockRidgeEntry::Nm(nm)) = decode_nm(&payload) else { panic!("expected Nm") };
        assert!(nm.flags.contains(NameFlags::CONTINUE));
        assert_eq!(nm.name, b"foo");
    }

    #[test]
    fn sl_render_joins_plain_components_with_slashes() {
        let sl = Sl {
            continues: false,
            components: vec![
                SlComponent { flags: SlComponentFlags::empty(), content: b"usr".to_vec() },
                SlComponent { flags: SlComponentFlags::empty(), content: b"bin".to_vec() },
            ],
        };
        assert_eq!(sl.render(), "usr/bin/");
    }

    #[test]
    fn sl_render_handles_root_current_and_parent_markers() {
        let sl = Sl {
            continues: false,
            components: vec![
                SlComponent { flags: SlComponentFlags::ROOT, content: Vec::new() },
                SlComponent { flags: SlComponentFlags::PARENT, content: Vec::new() },
                SlComponent { flags: SlComponentFlags::CURRENT, content: Vec::new() },
            ],
        };
        assert_eq!(sl.render(), "/.././");
    }

    #[test]
    fn sl_render_suppresses_separator_across_a_continued_component() {
        let sl = Sl {
            continues: false,
            components: vec![
                SlComponent { flags: SlComponentFlags::CONTINUE, content: b"foo".to_vec() },
                SlComponent { flags: SlComponentFlags::empty(), content: b"bar".to_vec() },
            ],
        };
        assert_eq!(sl.render(), "foobar/");
    }

    #[test]
    fn sl_render_suppresses_trailing_separator_when_entry_continues() {
        let sl = Sl {
            continues: true,
            components: vec![
                SlComponent { flags: SlComponentFlags::empty(), content: b"foo".to_vec() },
            ],
        };
        assert_eq!(sl.render(), "foo");
    }

    #[test]
    fn sl_decode_rejects_a_truncated_component() {
        let payload = vec![0x00, 0x00, 0x05, b'a', b'b'];
        assert!(decode_sl(&payload).is_none());
    }

    #[test]
    fn sl_decode_rejects_a_combined_root_and_current_flag() {
        let payload = vec![0x00, 0x0a, 0x00]; // ROOT|CURRENT, zero-length
        assert!(decode_sl(&payload).is_none());
    }

    #[test]
    fn sl_decode_rejects_a_non_empty_root_component() {
        let payload = vec![0x00, SlComponentFlags::ROOT.bits(), 0x01, b'x'];
        assert!(decode_sl(&payload).is_none());
    }

    #[test]
    fn sl_decode_rejects_a_zero_length_plain_component() {
        let payload = vec![0x00, 0x00, 0x00];
        assert!(decode_sl(&payload).is_none());
    }

    #[test]
    fn sl_decode_accepts_a_well_formed_plain_component() {
        let payload = vec![0x00, 0x00, 0x03, b'f', b'o', b'o'];
        let Some(RockRidgeEntry::Sl(sl)) = decode_sl(&payload) else { panic!("expected Sl") };
        assert_eq!(sl.components.len(), 1);
        assert_eq!(sl.components[0].content, b"foo");
    }

    #[test]
    fn tf_short_form_decodes_selected_timestamps_in_bit_order() {
        let mut payload = vec![(TfFlags::CREATION | TfFlags::MODIFY).bits()];
        payload.extend_from_slice(&[120, 1, 1, 0, 0, 0, 0]);
        payload.extend_from_slice(&[120, 6, 15, 12, 30, 0, 4]);
        let Some(RockRidgeEntry::Tf(tf)) = decode_tf(&payload) else { panic!("expected Tf") };
        assert_eq!(tf.timestamps.len(), 2);
        match &tf.timestamps[1] {
            RawTimestamp::Short(d) => assert_eq!(d.month, 6),
            _ => panic!("expected short form"),
        }
    }

    #[test]
    fn tf_long_form_uses_17_byte_fields() {
        let mut payload = vec![(TfFlags::MODIFY | TfFlags::LONG_FORM).bits()];
        payload.extend_from_slice(b"2026072712000000");
        payload.push(0);
        let Some(RockRidgeEntry::Tf(tf)) = decode_tf(&payload) else { panic!("expected Tf") };
        assert_eq!(tf.timestamps.len(), 1);
        assert!(matches!(tf.timestamps[0], RawTimestamp::Long(_)));
    }

    #[test]
    fn rr_decodes_the_presence_bitmask() {
        let Some(RockRidgeEntry::Rr(rr)) = decode_rr(&[0b0010_1010]) else { panic!("expected Rr") };
        assert_eq!(rr.present, 0b0010_1010);
    }
}
