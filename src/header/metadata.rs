//! Sidecar (`<artifact>.metadata`) parsing.
//! Only the head of the file is scanned; the detector writes the interesting keys first.

use anyhow::Result;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

use crate::fs_ops::io_error_with_help;

/// Lines of the sidecar examined for header fields.
pub const HEADER_SCAN_LINES: usize = 30;

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(dateString|userComment[0-9]|exposureTime|summedExposures)=(.*)$")
            .expect("static regex")
    })
}

/// Header fields in order of first appearance; a repeated key keeps its last value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Header(Vec<(String, String)>);

impl Header {
    pub fn insert(&mut self, key: &str, value: &str) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.0.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn parse_header<I, S>(lines: I) -> Header
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut header = Header::default();
    for line in lines.into_iter().take(HEADER_SCAN_LINES) {
        if let Some(caps) = field_re().captures(line.as_ref().trim()) {
            header.insert(&caps[1], caps[2].trim_end());
        }
    }
    header
}

/// Read and parse the head of a sidecar file. Non-UTF-8 bytes are replaced.
pub fn read_header(path: &Path) -> Result<Header> {
    let file = File::open(path).map_err(io_error_with_help("open sidecar", path))?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::with_capacity(HEADER_SCAN_LINES);
    let mut buf = Vec::new();
    while lines.len() < HEADER_SCAN_LINES {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(io_error_with_help("read sidecar", path))?;
        if n == 0 {
            break;
        }
        lines.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(parse_header(lines))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_known_fields_only() {
        let h = parse_header([
            "  dateString=2024-01-02 10:11:12",
            "userComment1=sample A",
            "userComment=ignored",
            "exposureTime=0.5",
            "gain=3",
            "summedExposures=10",
        ]);
        assert_eq!(h.len(), 4);
        assert_eq!(h.get("dateString"), Some("2024-01-02 10:11:12"));
        assert_eq!(h.get("userComment1"), Some("sample A"));
        assert_eq!(h.get("gain"), None);
    }

    #[test]
    fn stops_after_scan_window() {
        let mut lines: Vec<String> = (0..HEADER_SCAN_LINES).map(|i| format!("line{i}")).collect();
        lines.push("exposureTime=1".into());
        assert!(parse_header(lines).is_empty());
    }

    #[test]
    fn reads_from_file_with_crlf() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("a.tif.metadata");
        std::fs::write(&p, b"exposureTime=2.0\r\nsummedExposures=4\r\n").unwrap();
        let h = read_header(&p).unwrap();
        assert_eq!(h.get("exposureTime"), Some("2.0"));
        assert_eq!(h.get("summedExposures"), Some("4"));
    }
}
