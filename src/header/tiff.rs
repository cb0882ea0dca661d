//! Merge a header into the ImageDescription tag of a classic TIFF file.
//!
//! The rewrite only appends: the new description text and a copy of the first IFD
//! carrying the updated tag are written at the end of the file, then the header is
//! pointed at the new IFD. Every other offset in the file stays valid. The result is
//! written to a hidden sibling and renamed over the original.

use anyhow::{Result, bail};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File};
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

use crate::fs_ops::io_error_with_help;

use super::metadata::Header;

const TAG_IMAGE_DESCRIPTION: u16 = 270;
const TYPE_ASCII: u16 = 2;
const ENTRY_LEN: usize = 12;

/// Outcome of a merge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffMerge {
    Updated,
    /// Not a classic TIFF (bad magic, BigTIFF, truncated); the file was left alone.
    NotTiff,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    tag: u16,
    kind: u16,
    count: u32,
    value: [u8; 4],
}

/// Merge `header` into the ImageDescription of the TIFF at `path`.
pub fn merge_into_tiff(path: &Path, header: &Header) -> Result<TiffMerge> {
    let data = fs::read(path).map_err(io_error_with_help("read artifact", path))?;
    let rewritten = match data.get(..4) {
        Some(b"II*\0") => rewrite::<LittleEndian>(data, header),
        Some(b"MM\0*") => rewrite::<BigEndian>(data, header),
        _ => return Ok(TiffMerge::NotTiff),
    };
    let Some(bytes) = rewritten else {
        return Ok(TiffMerge::NotTiff);
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tmp = dir.join(format!(".pe_watch.{name}.hdr"));
    let write = || -> std::io::Result<()> {
        let mut f = File::create(&tmp)?;
        f.write_all(&bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(io_error_with_help("rewrite artifact", path)(e));
    }
    debug!(path = %path.display(), fields = header.len(), "TIFF header updated");
    Ok(TiffMerge::Updated)
}

/// Read the current ImageDescription of a classic TIFF, if any.
pub fn read_description(path: &Path) -> Result<Option<String>> {
    let data = fs::read(path).map_err(io_error_with_help("read artifact", path))?;
    let found = match data.get(..4) {
        Some(b"II*\0") => first_ifd::<LittleEndian>(&data).map(|(e, _)| description::<LittleEndian>(&data, &e)),
        Some(b"MM\0*") => first_ifd::<BigEndian>(&data).map(|(e, _)| description::<BigEndian>(&data, &e)),
        _ => bail!("not a TIFF file: {}", path.display()),
    };
    Ok(found.flatten())
}

fn first_ifd<E: ByteOrder>(data: &[u8]) -> Option<(Vec<Entry>, u32)> {
    let mut c = Cursor::new(data);
    c.set_position(4);
    let ifd = c.read_u32::<E>().ok()?;
    c.seek(SeekFrom::Start(u64::from(ifd))).ok()?;
    let n = c.read_u16::<E>().ok()?;
    if data.len() < ifd as usize + 2 + n as usize * ENTRY_LEN + 4 {
        return None;
    }
    let mut entries = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let tag = c.read_u16::<E>().ok()?;
        let kind = c.read_u16::<E>().ok()?;
        let count = c.read_u32::<E>().ok()?;
        let mut value = [0u8; 4];
        std::io::Read::read_exact(&mut c, &mut value).ok()?;
        entries.push(Entry { tag, kind, count, value });
    }
    let next = c.read_u32::<E>().ok()?;
    Some((entries, next))
}

fn description<E: ByteOrder>(data: &[u8], entries: &[Entry]) -> Option<String> {
    let e = entries.iter().find(|e| e.tag == TAG_IMAGE_DESCRIPTION && e.kind == TYPE_ASCII)?;
    let len = e.count as usize;
    let raw = if len <= 4 {
        &e.value[..len]
    } else {
        let off = E::read_u32(&e.value) as usize;
        data.get(off..off.checked_add(len)?)?
    };
    let text = raw.split(|b| *b == 0).next().unwrap_or_default();
    Some(String::from_utf8_lossy(text).into_owned())
}

/// Keep existing lines, update `key=value` lines whose key is in `header`, append the rest.
pub fn merge_description(existing: &str, header: &Header) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut used = vec![false; header.len()];
    for line in existing.lines().filter(|l| !l.trim().is_empty()) {
        let key = line.split_once('=').map(|(k, _)| k.trim());
        match key.and_then(|k| header.iter().enumerate().find(|(_, (hk, _))| *hk == k)) {
            Some((i, (k, v))) => {
                lines.push(format!("{k}={v}"));
                used[i] = true;
            }
            None => lines.push(line.to_string()),
        }
    }
    for (i, (k, v)) in header.iter().enumerate() {
        if !used[i] {
            lines.push(format!("{k}={v}"));
        }
    }
    lines.join("\n")
}

fn rewrite<E: ByteOrder>(mut data: Vec<u8>, header: &Header) -> Option<Vec<u8>> {
    let (mut entries, next) = first_ifd::<E>(&data)?;
    let existing = description::<E>(&data, &entries).unwrap_or_default();
    let mut text = merge_description(&existing, header).into_bytes();
    text.push(0);

    // Word alignment for the appended blocks.
    if data.len() % 2 == 1 {
        data.push(0);
    }
    let count = u32::try_from(text.len()).ok()?;
    let mut value = [0u8; 4];
    if text.len() <= 4 {
        value[..text.len()].copy_from_slice(&text);
    } else {
        E::write_u32(&mut value, u32::try_from(data.len()).ok()?);
        data.extend_from_slice(&text);
        if data.len() % 2 == 1 {
            data.push(0);
        }
    }
    let updated = Entry {
        tag: TAG_IMAGE_DESCRIPTION,
        kind: TYPE_ASCII,
        count,
        value,
    };
    match entries.iter_mut().find(|e| e.tag == TAG_IMAGE_DESCRIPTION) {
        Some(slot) => *slot = updated,
        None => {
            entries.push(updated);
            entries.sort_by_key(|e| e.tag);
        }
    }

    let ifd_offset = u32::try_from(data.len()).ok()?;
    let mut ifd = Vec::with_capacity(2 + entries.len() * ENTRY_LEN + 4);
    ifd.write_u16::<E>(u16::try_from(entries.len()).ok()?).ok()?;
    for e in &entries {
        ifd.write_u16::<E>(e.tag).ok()?;
        ifd.write_u16::<E>(e.kind).ok()?;
        ifd.write_u32::<E>(e.count).ok()?;
        ifd.extend_from_slice(&e.value);
    }
    ifd.write_u32::<E>(next).ok()?;
    data.extend_from_slice(&ifd);
    E::write_u32(&mut data[4..8], ifd_offset);
    Some(data)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::header::metadata::parse_header;

    /// Smallest useful little-endian TIFF: one IFD with width, height and an optional description.
    pub(crate) fn tiny_tiff(description: Option<&str>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"II*\0");
        out.write_u32::<LittleEndian>(8).unwrap();
        let n: u16 = if description.is_some() { 3 } else { 2 };
        let text_off = 8 + 2 + u32::from(n) * 12 + 4;
        out.write_u16::<LittleEndian>(n).unwrap();
        for (tag, v) in [(256u16, 1u32), (257, 1)] {
            out.write_u16::<LittleEndian>(tag).unwrap();
            out.write_u16::<LittleEndian>(4).unwrap();
            out.write_u32::<LittleEndian>(1).unwrap();
            out.write_u32::<LittleEndian>(v).unwrap();
        }
        if let Some(d) = description {
            out.write_u16::<LittleEndian>(TAG_IMAGE_DESCRIPTION).unwrap();
            out.write_u16::<LittleEndian>(TYPE_ASCII).unwrap();
            out.write_u32::<LittleEndian>(d.len() as u32 + 1).unwrap();
            out.write_u32::<LittleEndian>(text_off).unwrap();
        }
        out.write_u32::<LittleEndian>(0).unwrap();
        if let Some(d) = description {
            out.extend_from_slice(d.as_bytes());
            out.push(0);
        }
        out
    }

    #[test]
    fn adds_description_when_absent() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("a.tif");
        fs::write(&p, tiny_tiff(None)).unwrap();
        let h = parse_header(["exposureTime=0.5", "summedExposures=3"]);
        assert_eq!(merge_into_tiff(&p, &h).unwrap(), TiffMerge::Updated);
        assert_eq!(
            read_description(&p).unwrap().as_deref(),
            Some("exposureTime=0.5\nsummedExposures=3")
        );
    }

    #[test]
    fn updates_existing_lines_and_keeps_others() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("a.tif");
        fs::write(&p, tiny_tiff(Some("operator=x\nexposureTime=9"))).unwrap();
        let h = parse_header(["exposureTime=0.5", "dateString=today"]);
        merge_into_tiff(&p, &h).unwrap();
        assert_eq!(
            read_description(&p).unwrap().as_deref(),
            Some("operator=x\nexposureTime=0.5\ndateString=today")
        );
    }

    #[test]
    fn description_values_replaced_in_place() {
        let h = parse_header(["summedExposures=4", "exposureTime=0.5", "dateString=today"]);
        assert_eq!(
            merge_description("operator=x\nexposureTime=9\n\ndateString=old", &h),
            "operator=x\nexposureTime=0.5\ndateString=today\nsummedExposures=4"
        );
    }

    #[test]
    fn non_tiff_is_left_alone() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("a.tif");
        fs::write(&p, b"not a tiff at all").unwrap();
        let h = parse_header(["exposureTime=1"]);
        assert_eq!(merge_into_tiff(&p, &h).unwrap(), TiffMerge::NotTiff);
        assert_eq!(fs::read(&p).unwrap(), b"not a tiff at all");
    }
}
