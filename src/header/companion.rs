//! Companion tree written next to each merged artifact.
//!
//! Layout (NeXus-style classes kept as attributes):
//! root (NXentry, default = data)
//!   instrument (NXinstrument): name, detector (NXdetector): name, header{...}
//!   data (NXdata): source, raw_path, meta_path

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fs_ops::io_error_with_help;

use super::metadata::Header;

pub const COMPANION_EXT: &str = "nxs.json";
pub const INSTRUMENT_NAME: &str = "P02.2 beamline of Petra-III";
pub const DETECTOR_NAME: &str = "PE XRD1621";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Companion {
    pub default: String,
    pub root: Entry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "NX_class")]
    pub class: String,
    pub default: String,
    pub instrument: Instrument,
    pub data: Data,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    #[serde(rename = "NX_class")]
    pub class: String,
    pub name: String,
    pub detector: Detector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    #[serde(rename = "NX_class")]
    pub class: String,
    pub name: String,
    pub header: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    #[serde(rename = "NX_class")]
    pub class: String,
    pub source: String,
    pub raw_path: String,
    pub meta_path: String,
}

/// `<dir>/<stem>.nxs.json` for an artifact path.
pub fn companion_path(artifact: &Path) -> PathBuf {
    let stem = artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    artifact.with_file_name(format!("{stem}.{COMPANION_EXT}"))
}

fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Companion {
    pub fn build(artifact: &Path, sidecar: &Path, header: &Header) -> Self {
        let header = header
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        Companion {
            default: "root".into(),
            root: Entry {
                class: "NXentry".into(),
                default: "data".into(),
                instrument: Instrument {
                    class: "NXinstrument".into(),
                    name: INSTRUMENT_NAME.into(),
                    detector: Detector {
                        class: "NXdetector".into(),
                        name: DETECTOR_NAME.into(),
                        header,
                    },
                },
                data: Data {
                    class: "NXdata".into(),
                    source: artifact.display().to_string(),
                    raw_path: file_name(artifact),
                    meta_path: file_name(sidecar),
                },
            },
        }
    }
}

/// Write the companion for `artifact`; returns its path.
pub fn write_companion(artifact: &Path, sidecar: &Path, header: &Header) -> Result<PathBuf> {
    let path = companion_path(artifact);
    let doc = Companion::build(artifact, sidecar, header);
    let json = serde_json::to_vec_pretty(&doc).context("serialize companion")?;
    fs::write(&path, json).map_err(io_error_with_help("write companion", &path))?;
    Ok(path)
}
