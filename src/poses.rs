// Pose files
//
// Loads pose sequences from CSV, XML or calibration archives into
// uniform `(id, ordered key -> value)` records.

use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::calibration_log::{self, Element};

/// Fixture poses (left, right) used for calibration views
pub const GOLDEN: [(f64, f64); 9] = [
    (0.0, 0.0),
    (-6.0, -6.0),
    (-2.0, -4.0),
    (-4.0, -2.0),
    (6.0, 3.0),
    (3.0, 6.0),
    (9.0, 9.0),
    (3.0, -3.0),
    (-3.0, 3.0),
];

/// Compact keys of the columns that hold axis or kinematic values
const AXIS_KEYS: &str = "ylinzlinyrotxrotattack";

/// Separators and unit markers stripped from column headers
const HEADER_NOISE: [&str; 6] = ["_", " ", "mm", "rad", "deg", "um"];

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Pose {id}: '{key}' value '{value}' is not a number")]
    NotNumeric {
        id: String,
        key: String,
        value: String,
    },

    #[error("Malformed pose document: {0}")]
    Malformed(String),

    #[error("Unsupported pose file '{0}' (expected .csv, .xml or .zip)")]
    UnsupportedFile(String),
}

pub type Result<T> = std::result::Result<T, PoseError>;

/// One pose: an identifier and ordered key/value pairs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoseRecord {
    pub id: String,
    pub values: Vec<(String, f64)>,
}

impl PoseRecord {
    pub fn new(id: impl Into<String>, values: Vec<(String, f64)>) -> Self {
        Self {
            id: id.into(),
            values,
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(k, _)| k.as_str())
    }
}

/// Lowercase a header and drop separators and unit markers
pub fn compact_key(key: &str) -> String {
    let mut key = key.to_lowercase();
    for noise in HEADER_NOISE {
        key = key.replace(noise, "");
    }
    key
}

fn is_axis_column(header: &str) -> bool {
    let key = compact_key(header);
    !key.is_empty() && AXIS_KEYS.contains(&key)
}

fn parse_value(id: &str, key: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| PoseError::NotNumeric {
            id: id.to_string(),
            key: key.to_string(),
            value: raw.to_string(),
        })
}

/// Decode a CSV field. Sheets saved from Excel are often Windows-1252 rather than UTF-8;
/// those fields are read as Latin-1, which agrees with Windows-1252 outside 0x80..0x9F.
fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Read CSV poses. The first non-axis column is the pose id (row number when there is none).
pub fn read_csv<R: std::io::Read>(input: R) -> Result<Vec<PoseRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let headers: Vec<String> = reader.byte_headers()?.iter().map(decode_field).collect();
    let axis_columns: Vec<bool> = headers.iter().map(|h| is_axis_column(h)).collect();
    let id_column = axis_columns.iter().position(|axis| !axis);

    let mut records = Vec::new();
    let mut record = csv::ByteRecord::new();
    let mut row = 0;
    while reader.read_byte_record(&mut record)? {
        row += 1;
        let id = id_column
            .and_then(|i| record.get(i))
            .map(decode_field)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| row.to_string());

        let mut values = Vec::new();
        for (i, header) in headers.iter().enumerate() {
            if !axis_columns[i] {
                continue;
            }
            let cell = record.get(i).map(decode_field).unwrap_or_default();
            if cell.is_empty() {
                continue;
            }
            values.push((header.clone(), parse_value(&id, header, &cell)?));
        }
        records.push(PoseRecord::new(id, values));
    }
    if row > 0 {
        debug!("Read {} CSV rows with columns {:?}", row, headers);
    }
    Ok(records)
}

/// Strip the quoting some exporters leave around numbers (`="1.5"`)
fn clean_number(text: &str) -> String {
    text.replace("=\"", "").replace('"', "")
}

/// Read XML poses: `<root><poses><pose number="1"><y_lin_mm>..</y_lin_mm>..</pose></poses></root>`
pub fn parse_xml(xml: &str) -> Result<Vec<PoseRecord>> {
    let root = Element::parse(xml)?;
    root.find_all("poses/pose")
        .into_iter()
        .enumerate()
        .map(|(i, pose)| {
            let id = pose
                .attr("number")
                .map(str::to_string)
                .unwrap_or_else(|| (i + 1).to_string());
            let values = pose
                .children
                .iter()
                .map(|child| {
                    let value = parse_value(&id, &child.name, &clean_number(&child.text))?;
                    Ok((child.name.clone(), value))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(PoseRecord::new(id, values))
        })
        .collect()
}

/// Plate poses recorded in a calibration log (`multiView/world_T_plate`)
pub fn parse_calibration_poses(xml: &str) -> Result<Vec<PoseRecord>> {
    let root = Element::parse(xml)?;
    root.find_all("multiView/world_T_plate")
        .into_iter()
        .enumerate()
        .map(|(i, plate)| {
            let id = (i + 1).to_string();
            let mut values = Vec::new();
            for part in &plate.children {
                let keys = if part.attr("rx").is_some() {
                    [("rx", "x_rot"), ("ry", "y_rot"), ("rz", "z_rot")]
                } else {
                    [("x", "x_lin"), ("y", "y_lin"), ("z", "z_lin")]
                };
                for (attr, key) in keys {
                    let raw = part.attr(attr).ok_or_else(|| {
                        PoseError::Malformed(format!("{} is missing '{}'", part.name, attr))
                    })?;
                    values.push((key.to_string(), parse_value(&id, key, raw)?));
                }
            }
            Ok(PoseRecord::new(id, values))
        })
        .collect()
}

pub fn load_csv(path: &Path) -> Result<Vec<PoseRecord>> {
    read_csv(std::fs::File::open(path)?)
}

pub fn load_xml(path: &Path) -> Result<Vec<PoseRecord>> {
    parse_xml(&std::fs::read_to_string(path)?)
}

pub fn load_zip(path: &Path) -> Result<Vec<PoseRecord>> {
    parse_calibration_poses(&calibration_log::read_log(path)?)
}

/// Load poses, choosing the reader from the file extension
pub fn load(path: &Path) -> Result<Vec<PoseRecord>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let records = match extension.as_str() {
        "csv" => load_csv(path)?,
        "xml" => load_xml(path)?,
        "zip" => load_zip(path)?,
        _ => {
            debug!("Extension '{}' is not a pose file", extension);
            return Err(PoseError::UnsupportedFile(path.display().to_string()));
        }
    };

    info!("Loaded {} poses from {}", records.len(), path.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CSV: &str = "pose,y_lin_mm,z_lin_mm,x_rot_deg,notes\n\
                       1,300.5,200,-5,first\n\
                       2,310,,2.5,second\n";

    const XML: &str = r#"<root>
  <poses>
    <pose number="1"><y_lin_mm>300.5</y_lin_mm><z_lin_mm>200</z_lin_mm><x_rot_deg>="-5"</x_rot_deg></pose>
    <pose number="2"><y_lin_mm>310</y_lin_mm><x_rot_deg>2.5</x_rot_deg></pose>
  </poses>
</root>"#;

    const CALIBRATION: &str = r#"<calibrationLog>
  <multiView>
    <world_T_plate><rotation rx="1" ry="2" rz="3"/><translation x="10" y="20" z="30"/></world_T_plate>
    <world_T_plate><translation x="11" y="21" z="31"/></world_T_plate>
  </multiView>
</calibrationLog>"#;

    #[test]
    fn test_axis_column_detection() {
        assert!(is_axis_column("y_lin_mm"));
        assert!(is_axis_column("X ROT deg"));
        assert!(is_axis_column("attack"));
        assert!(is_axis_column("rot"), "any fragment of the axis key list matches");
        assert!(!is_axis_column("pose"));
        assert!(!is_axis_column("mm"), "empty after stripping");
    }

    #[test]
    fn test_csv_records() {
        let records = read_csv(CSV.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "1");
        assert_eq!(
            records[0].values,
            vec![
                ("y_lin_mm".to_string(), 300.5),
                ("z_lin_mm".to_string(), 200.0),
                ("x_rot_deg".to_string(), -5.0),
            ]
        );
        assert_eq!(records[1].get("z_lin_mm"), None, "empty cells are skipped");
    }

    #[test]
    fn test_csv_without_id_column_uses_row_number() {
        let records = read_csv("y_lin,attack\n1,2\n3,4\n".as_bytes()).unwrap();
        assert_eq!(records[1].id, "2");
        assert_eq!(records[1].get("attack"), Some(4.0));
    }

    #[test]
    fn test_csv_rejects_text_in_axis_column() {
        let result = read_csv("pose,y_lin\n1,abc\n".as_bytes());
        assert!(matches!(result, Err(PoseError::NotNumeric { .. })));
    }

    #[test]
    fn test_csv_rejects_non_finite_values() {
        for cell in ["NaN", "inf", "-infinity"] {
            let result = read_csv(format!("pose,y_lin\n1,{}\n", cell).as_bytes());
            assert!(
                matches!(result, Err(PoseError::NotNumeric { ref value, .. }) if value == cell),
                "{} must not load",
                cell
            );
        }
        let xml = r#"<root><poses><pose number="1"><y_lin>NaN</y_lin></pose></poses></root>"#;
        assert!(matches!(parse_xml(xml), Err(PoseError::NotNumeric { .. })));
    }

    #[test]
    fn test_csv_saved_as_windows_1252() {
        // "Posición,y_lin_mm,x_rot_deg" / "ángulo 1,12.5,-3" in Windows-1252
        let mut sheet = b"Posici\xf3n,y_lin_mm,x_rot_deg\r\n".to_vec();
        sheet.extend_from_slice(b"\xe1ngulo 1,12.5,-3\r\n");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("excel.csv");
        std::fs::write(&path, &sheet).unwrap();

        let records = load(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "ángulo 1");
        assert_eq!(records[0].get("y_lin_mm"), Some(12.5));
        assert_eq!(records[0].get("x_rot_deg"), Some(-3.0));
    }

    #[test]
    fn test_csv_and_xml_give_same_records() {
        let from_csv = read_csv(CSV.as_bytes()).unwrap();
        let from_xml = parse_xml(XML).unwrap();
        assert_eq!(from_csv, from_xml);
    }

    #[test]
    fn test_calibration_poses() {
        let records = parse_calibration_poses(CALIBRATION).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "1");
        assert_eq!(
            records[0].keys().collect::<Vec<_>>(),
            vec!["x_rot", "y_rot", "z_rot", "x_lin", "y_lin", "z_lin"]
        );
        assert_eq!(records[1].get("z_lin"), Some(31.0));
    }

    #[test]
    fn test_load_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();

        let csv_path = dir.path().join("poses.CSV");
        std::fs::write(&csv_path, CSV).unwrap();
        assert_eq!(load(&csv_path).unwrap().len(), 2);

        let xml_path = dir.path().join("poses.xml");
        std::fs::write(&xml_path, XML).unwrap();
        assert_eq!(load(&xml_path).unwrap().len(), 2);

        let zip_path = dir.path().join("CalibrationData.zip");
        let mut archive = zip::ZipWriter::new(std::fs::File::create(&zip_path).unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        archive.start_file("calibration.log", options).unwrap();
        archive.write_all(CALIBRATION.as_bytes()).unwrap();
        archive.finish().unwrap();
        assert_eq!(load(&zip_path).unwrap().len(), 2);

        let txt_path = dir.path().join("poses.txt");
        std::fs::write(&txt_path, "").unwrap();
        assert!(matches!(
            load(&txt_path),
            Err(PoseError::UnsupportedFile(_))
        ));
    }

    #[test]
    fn test_golden_poses() {
        assert_eq!(GOLDEN.len(), 9);
        assert_eq!(GOLDEN[0], (0.0, 0.0));
    }
}
