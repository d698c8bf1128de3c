// Message types: scan application requests/responses and jog runtime state

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// Remote methods exposed by the scan application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    AddCalibrationView,
    CalibrateUsingFlatPlateTarget,
    ChangeNavigationTab,
    ClearProject,
    DeleteCalibrationViews,
    ExportCalibrationViews,
    FlatPlateCalibrationStepForwards,
    ImportHardwareSetup,
    SaveProject,
    SaveProjectAs,
    ScanAddToFusion,
    ScanStart,
    SetBaseScanName,
    SetCalibrationTargetType,
    SetExportBasePathEvaluationResult,
    SetScanReferenceDataPath,
    StartCalibration,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::AddCalibrationView => "AddCalibrationView",
            Method::CalibrateUsingFlatPlateTarget => "CalibrateUsingFlatPlateTarget",
            Method::ChangeNavigationTab => "ChangeNavigationTab",
            Method::ClearProject => "ClearProject",
            Method::DeleteCalibrationViews => "DeleteCalibrationViews",
            Method::ExportCalibrationViews => "ExportCalibrationViews",
            Method::FlatPlateCalibrationStepForwards => "FlatPlateCalibrationStepForwards",
            Method::ImportHardwareSetup => "ImportHardwareSetup",
            Method::SaveProject => "SaveProject",
            Method::SaveProjectAs => "SaveProjectAs",
            Method::ScanAddToFusion => "ScanAddToFusion",
            Method::ScanStart => "ScanStart",
            Method::SetBaseScanName => "SetBaseScanName",
            Method::SetCalibrationTargetType => "SetCalibrationTargetType",
            Method::SetExportBasePathEvaluationResult => "SetExportBasePathEvaluationResult",
            Method::SetScanReferenceDataPath => "SetScanReferenceDataPath",
            Method::StartCalibration => "StartCalibration",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Request line: one JSON object, params only when a parameter is given
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<[String; 1]>,
}

impl Request {
    pub fn new(method: Method, id: u64, param: Option<&str>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.as_str(),
            id,
            // The application expects forward slashes in paths
            params: param.map(|p| [p.replace('\\', "/")]),
        }
    }
}

/// Response line; any object carrying a `result` key (even null) is a success
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Response {
    pub fields: Map<String, Value>,
}

impl Response {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    pub fn is_success(&self) -> bool {
        self.fields.contains_key("result")
    }

    /// Failure detail for logging: the `error` member, or the whole object
    pub fn failure(&self) -> String {
        match self.fields.get("error") {
            Some(error) => error.to_string(),
            None => Value::Object(self.fields.clone()).to_string(),
        }
    }
}

/// Navigation tabs of the scan application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UiTab {
    Calibration,
    Scanning,
    Alignment,
}

impl UiTab {
    pub fn as_str(&self) -> &'static str {
        match self {
            UiTab::Calibration => "Calibration",
            UiTab::Scanning => "Scanning",
            UiTab::Alignment => "Alignment",
        }
    }
}

/// Calibration target in front of the scanner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetType {
    #[default]
    FlatPlate,
    Artefact,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::FlatPlate => "FlatPlate",
            TargetType::Artefact => "Artefact",
        }
    }
}

/// Jog runtime health, reported on every state change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum JogHealth {
    Ok,
    CmdStale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_params() {
        let line = serde_json::to_string(&Request::new(Method::ScanStart, 3, None)).unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","method":"ScanStart","id":3}"#);
    }

    #[test]
    fn test_request_params_use_forward_slashes() {
        let request = Request::new(Method::SaveProjectAs, 7, Some(r"C:\scans\a.3dscanprojzip"));
        let line = serde_json::to_string(&request).unwrap();
        assert_eq!(
            line,
            r#"{"jsonrpc":"2.0","method":"SaveProjectAs","id":7,"params":["C:/scans/a.3dscanprojzip"]}"#
        );
    }

    #[test]
    fn test_response_success_is_result_key() {
        assert!(Response::parse(r#"{"id":1,"result":null}"#).unwrap().is_success());
        assert!(Response::parse(r#"{"id":1,"result":true}"#).unwrap().is_success());

        let failed = Response::parse(r#"{"id":1,"error":{"code":-1}}"#).unwrap();
        assert!(!failed.is_success());
        assert_eq!(failed.failure(), r#"{"code":-1}"#);

        assert!(Response::parse("not json").is_err());
        assert!(Response::parse("[1,2]").is_err(), "responses are objects");
    }
}
