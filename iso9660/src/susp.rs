//! System Use Sharing Protocol (SUSP) entry framing: the tagged, length-prefixed extension
//! records appended to every directory record's system-use area.

use display_bytes::DisplayBytesVec;

use crate::rockridge::{self, RockRidgeEntry};
use crate::source::{BlockFetcher, Source};
use crate::error::SourceError;

/// `SP`: marks the start of SUSP-formatted data and declares how many bytes of every record's
/// system-use area are reserved (and must be skipped) before SUSP entries begin.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Sp {
    pub check_bytes: [u8; 2],
    pub len_skp: u8,
}

/// `CE`: points at a continuation area holding more SUSP entries for the same record.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Ce {
    pub location: u32,
    pub offset: u32,
    pub length: u32,
}

/// `ER`: identifies one extension specification this image's SUSP entries conform to.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Er {
    pub ext_id: DisplayBytesVec,
    pub ext_des: DisplayBytesVec,
    pub ext_src: DisplayBytesVec,
    pub ext_ver: u8,
}

/// A recognized Rock Ridge version, as identified by an [`Er`] entry.
pub const RRIP_1991A: (&str, u8) = ("RRIP_1991A", 1);
pub const IEEE_P1282: (&str, u8) = ("IEEE_P1282", 1);

impl Er {
    /// Whether this extension reference names one of the Rock Ridge specifications this crate
    /// understands.
    pub fn is_rock_ridge(&self) -> bool {
        let id: &[u8] = self.ext_id.as_ref();
        let id = String::from_utf8_lossy(id);
        (id == RRIP_1991A.0 && self.ext_ver == RRIP_1991A.1)
            || (id == IEEE_P1282.0 && self.ext_ver == IEEE_P1282.1)
    }
}

/// A SUSP entry whose tag was not recognized (or whose payload failed to parse); its bytes are
/// preserved verbatim rather than discarded.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct UnknownEntry {
    pub signature: [u8; 2],
    pub version: u8,
    pub payload: Vec<u8>,
}

/// Any decoded SUSP entry, base-protocol or Rock Ridge.
#[derive(Clone, Debug)]
pub enum SuspEntry {
    Sp(Sp),
    Ce(Ce),
    St,
    Er(Er),
    RockRidge(RockRidgeEntry),
    Unknown(UnknownEntry),
}

fn decode_sp(payload: &[u8]) -> Option<Sp> {
    if payload.len() != 3 {
        return None;
    }
    Some(Sp { check_bytes: [payload[0], payload[1]], len_skp: payload[2] })
}

fn decode_ce<F: BlockFetcher>(source: &mut Source<F>, payload: &[u8]) -> Option<Ce> {
    if payload.len() != 24 {
        return None;
    }
    let both_u32 = |bytes: &[u8]| -> Option<u32> {
        let le = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let be = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
        (le == be).then_some(le)
    };
    let _ = source; // decoding is pure; kept for symmetry with the other decode_* helpers
    let location = both_u32(&payload[0..8])?;
    let offset = both_u32(&payload[8..16])?;
    let length = both_u32(&payload[16..24])?;
    Some(Ce { location, offset, length })
}

fn decode_er(payload: &[u8]) -> Option<Er> {
    if payload.len() < 4 {
        return None;
    }
    let len_id = usize::from(payload[0]);
    let len_des = usize::from(payload[1]);
    let len_src = usize::from(payload[2]);
    let ext_ver = payload[3];
    let total = 4 + len_id + len_des + len_src;
    if total != payload.len() {
        return None;
    }
    let mut pos = 4;
    let ext_id = payload[pos..pos + len_id].to_vec().into();
    pos += len_id;
    let ext_des = payload[pos..pos + len_des].to_vec().into();
    pos += len_des;
    let ext_src = payload[pos..pos + len_src].to_vec().into();
    Some(Er { ext_id, ext_des, ext_src, ext_ver })
}

/// Reads one SUSP entry out of `maxlen` remaining bytes of system-use area.
///
/// Returns `Ok(None)` once there is no further entry to decode (fewer than 4 bytes remain, or
/// the next entry's declared length would overrun `maxlen`), in which case the 4 header bytes
/// (if any were read) are left unconsumed.
pub fn unpack_susp<F: BlockFetcher>(
    source: &mut Source<F>,
    maxlen: usize,
    rockridge_enabled: bool,
) -> Result<Option<(SuspEntry, usize)>, SourceError> {
    if maxlen < 4 {
        return Ok(None);
    }

    let signature: [u8; 2] = source.unpack_raw(2)?.try_into().unwrap();
    let length = source.unpack_u8()?;
    let version = source.unpack_u8()?;

    if length < 4 || usize::from(length) > maxlen {
        source.rewind(4)?;
        return Ok(None);
    }

    let payload_len = usize::from(length) - 4;
    let payload = source.unpack_raw(payload_len)?;

    let decoded = match (&signature, version) {
        (b"SP", 1) => decode_sp(&payload).map(SuspEntry::Sp),
        (b"CE", 1) => decode_ce(source, &payload).map(SuspEntry::Ce),
        (b"ST", 1) => Some(SuspEntry::St),
        (b"ER", 1) => decode_er(&payload).map(SuspEntry::Er),
        (b"RR", 1) if rockridge_enabled => rockridge::decode_rr(&payload).map(SuspEntry::RockRidge),
        (b"PX", 1) if rockridge_enabled => rockridge::decode_px(&payload).map(SuspEntry::RockRidge),
        (b"PN", 1) if rockridge_enabled => rockridge::decode_pn(&payload).map(SuspEntry::RockRidge),
        (b"NM", 1) if rockridge_enabled => rockridge::decode_nm(&payload).map(SuspEntry::RockRidge),
        (b"SL", 1) if rockridge_enabled => rockridge::decode_sl(&payload).map(SuspEntry::RockRidge),
        (b"TF", 1) if rockridge_enabled => rockridge::decode_tf(&payload).map(SuspEntry::RockRidge),
        _ => None,
    };

    let entry = decoded.unwrap_or_else(|| SuspEntry::Unknown(UnknownEntry {
        signature,
        version,
        payload,
    }));

    Ok(Some((entry, usize::from(length))))
}

/// Decodes every SUSP entry in a `total_len`-byte system-use area, after skipping `skip_bytes`
/// of reserved prefix (per a prior `SP` entry's `len_skp`, ISO9660-wise a no-op for `skip_bytes`
/// == 0).
///
/// Stops early on `ST`. Always consumes exactly `total_len` bytes, whether or not entries filled
/// all of it. Returns the decoded entries, the last `CE` seen (if any; continuation areas may
/// chain so only the most recent matters), and whether an `ST` was hit.
pub fn decode_embedded<F: BlockFetcher>(
    source: &mut Source<F>,
    total_len: usize,
    skip_bytes: usize,
    rockridge_enabled: bool,
) -> Result<(Vec<SuspEntry>, Option<Ce>, bool), SourceError> {
    let skip = skip_bytes.min(total_len);
    source.unpack_raw(skip)?;

    let mut remaining = total_len - skip;
    let mut entries = Vec::new();
    let mut pending_ce = None;
    let mut terminated = false;

    while remaining > 0 {
        match unpack_susp(source, remaining, rockridge_enabled)? {
            None => break,
            Some((entry, consumed)) => {
                remaining -= consumed;
                match &entry {
                    SuspEntry::Ce(ce) => pending_ce = Some(*ce),
                    SuspEntry::St => terminated = true,
                    _ => {}
                }
                let stop = terminated;
                entries.push(entry);
                if stop {
                    break;
                }
            }
        }
    }

    if remaining > 0 {
        source.unpack_raw(remaining)?;
    }

    Ok((entries, pending_ce, terminated))
}
