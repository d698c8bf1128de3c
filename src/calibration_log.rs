// Readers for the scan application's XML calibration log
//
// The log is a plain XML document (also stored as `calibration.log` inside
// exported calibration archives). Only a handful of elements are needed, so
// documents are loaded into a small element tree and queried by path.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::poses::{PoseError, Result};

/// Name of the log inside a calibration archive
pub const CALIBRATION_LOG: &str = "calibration.log";

/// One XML element with its attributes, text and children
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            ..Self::default()
        })
    }

    /// Parse a document and return its root element
    pub fn parse(xml: &str) -> Result<Element> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(Element::open(&start)?),
                Event::Empty(start) => {
                    let element = Element::open(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::End(_) => {
                    let Some(element) = stack.pop() else {
                        return Err(PoseError::Malformed("unbalanced end tag".to_string()));
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(PoseError::Malformed(format!(
                "unclosed element <{}>",
                stack[stack.len() - 1].name
            )));
        }
        root.ok_or_else(|| PoseError::Malformed("document has no root element".to_string()))
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All descendants matching a `/`-separated path of child names, relative to this element
    pub fn find_all(&self, path: &str) -> Vec<&Element> {
        let mut current = vec![self];
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|e| e.children.iter())
                .filter(|child| segment == "*" || child.name == segment)
                .collect();
        }
        current
    }
}

/// Read a calibration log, either bare or from inside a calibration archive
pub fn read_log(path: &Path) -> Result<String> {
    let is_zip = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));

    let mut text = String::new();
    if is_zip {
        let mut archive = zip::ZipArchive::new(File::open(path)?)?;
        let mut entry = archive.by_name(CALIBRATION_LOG)?;
        entry.read_to_string(&mut text)?;
    } else {
        File::open(path)?.read_to_string(&mut text)?;
    }
    debug!("Read {} bytes of calibration log from {}", text.len(), path.display());
    Ok(text)
}

/// Where the scan application keeps its latest calibration log
pub fn default_log_path() -> Option<PathBuf> {
    std::env::var_os("LOCALAPPDATA")
        .map(|dir| PathBuf::from(dir).join("SCAN6").join("Logs").join(CALIBRATION_LOG))
}

/// Projector pose from the last calibration. Positions in mm;
/// `rx` and `ry` in rad, `rz` as logged (deg).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectorPose {
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

pub fn parse_projector_pose(xml: &str) -> Result<ProjectorPose> {
    let root = Element::parse(xml)?;
    let parts = root.find_all("calibrationInfo/projectorModel/pose/*");
    if parts.is_empty() {
        return Err(PoseError::Malformed(
            "no calibrationInfo/projectorModel/pose in calibration log".to_string(),
        ));
    }

    let mut pose = ProjectorPose::default();
    for part in parts {
        let prefix = part.name.chars().next().unwrap_or_default();
        for (attr, value) in &part.attributes {
            let suffix = attr.chars().last().unwrap_or_default();
            let number: f64 = value.trim().parse().map_err(|_| PoseError::NotNumeric {
                id: part.name.clone(),
                key: attr.clone(),
                value: value.clone(),
            })?;
            match (prefix, suffix) {
                ('p', 'x') => pose.px = number,
                ('p', 'y') => pose.py = number,
                ('p', 'z') => pose.pz = number,
                ('r', 'x') => pose.rx = number.to_radians(),
                ('r', 'y') => pose.ry = number.to_radians(),
                ('r', 'z') => pose.rz = number,
                _ => debug!("Ignoring projector pose entry {}{}", prefix, suffix),
            }
        }
    }
    Ok(pose)
}

pub fn projector_pose(path: &Path) -> Result<ProjectorPose> {
    parse_projector_pose(&read_log(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LOG: &str = r#"<?xml version="1.0"?>
<calibrationLog>
  <calibrationInfo>
    <projectorModel>
      <pose>
        <position x="1.5" y="-121.6" z="454.0"/>
        <rotation rx="90" ry="0.5" rz="2"/>
      </pose>
    </projectorModel>
  </calibrationInfo>
</calibrationLog>"#;

    #[test]
    fn test_element_tree() {
        let root = Element::parse("<a><b n=\"1\">x</b><b n=\"2\"/><c><b/></c></a>").unwrap();
        assert_eq!(root.name, "a");
        let bs = root.find_all("b");
        assert_eq!(bs.len(), 2);
        assert_eq!(bs[0].text, "x");
        assert_eq!(bs[1].attr("n"), Some("2"));
        assert_eq!(root.find_all("c/b").len(), 1);
        assert_eq!(root.find_all("*").len(), 3);
    }

    #[test]
    fn test_malformed_document() {
        assert!(Element::parse("<a><b></a>").is_err());
        assert!(Element::parse("").is_err());
    }

    #[test]
    fn test_projector_pose() {
        let pose = parse_projector_pose(LOG).unwrap();
        assert_eq!(pose.px, 1.5);
        assert_eq!(pose.py, -121.6);
        assert_eq!(pose.pz, 454.0);
        assert!((pose.rx - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((pose.ry - 0.5f64.to_radians()).abs() < 1e-12);
        assert_eq!(pose.rz, 2.0);
    }

    #[test]
    fn test_missing_projector_model() {
        let result = parse_projector_pose("<calibrationLog/>");
        assert!(matches!(result, Err(PoseError::Malformed(_))));
    }

    #[test]
    fn test_projector_pose_from_file() {
        let mut file = tempfile::Builder::new().suffix(".log").tempfile().unwrap();
        file.write_all(LOG.as_bytes()).unwrap();
        let pose = projector_pose(file.path()).unwrap();
        assert_eq!(pose.pz, 454.0);
    }
}
