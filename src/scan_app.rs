// Remote control of the scan application
//
// The application runs this program as a child and exchanges one JSON object per
// line: requests on our stdout, responses on our stdin. Calls block until the
// response line arrives. Failed captures and scans are retried a bounded number
// of times with a fixed delay.

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::axis::AxisLabel;
use crate::config::{RETRY_DELAY, SCAN_RETRIES, ScanAppConfig, VIEW_RETRIES};
use crate::messages::{Method, Request, Response, TargetType, UiTab};

const PROJECT_EXTENSION: &str = ".3dscanproj";
const PROJECT_ZIP_EXTENSION: &str = ".3dscanprojzip";
const SETUP_EXTENSION: &str = "3dscansetup";
const METADATA_FILE: &str = "custom-scan-metadata.xml";

#[derive(Debug, thiserror::Error)]
pub enum ScanAppError {
    #[error("{method} (request {id}) failed: {detail}")]
    Rejected {
        method: Method,
        id: u64,
        detail: String,
    },

    #[error("Invalid response to {method} (request {id}): {source}")]
    InvalidResponse {
        method: Method,
        id: u64,
        source: serde_json::Error,
    },

    #[error("Scan application closed the connection")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("View '{name}' not captured after {attempts} attempts")]
    ViewCaptureFailed { name: String, attempts: u32 },

    #[error("Scan '{name}' failed after {attempts} attempts")]
    ScanFailed { name: String, attempts: u32 },

    #[error("Project has never been saved; give a file path")]
    NoProjectPath,

    #[error("No .3dscansetup file in {0}")]
    NoSetupFile(PathBuf),

    #[error("Failed to write scan metadata: {0}")]
    Metadata(String),
}

impl ScanAppError {
    /// The application answered but refused; worth trying again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanAppError::Rejected { .. } | ScanAppError::InvalidResponse { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ScanAppError>;

/// What we know about the application's state
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub tab: UiTab,
    pub file_path: Option<String>,
    pub saved: bool,
    /// Number given to the next scan added to the project
    pub sequence: u32,
    /// A reference data file is attached to scans
    pub custom_metadata: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            tab: UiTab::Calibration,
            file_path: None,
            saved: false,
            sequence: 1,
            custom_metadata: false,
        }
    }
}

/// Alignment guide written into scan metadata; absent fields are left out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentGuide {
    pub rot_x: Option<f64>,
    pub rot_y: Option<f64>,
    pub rot_z: Option<f64>,
    pub angle_tolerance: Option<f64>,
    pub icr: Option<String>,
}

impl AlignmentGuide {
    fn is_empty(&self) -> bool {
        self.rot_x.is_none()
            && self.rot_y.is_none()
            && self.rot_z.is_none()
            && self.angle_tolerance.is_none()
            && self.icr.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub repeats: u32,
    /// Base name; scans are named `{name}_R{repeat}_S{sequence}`
    pub name: Option<String>,
    /// Export path for base path evaluation results
    pub base_path: Option<String>,
    /// Absolute axis positions in mm or rad
    pub positions: Vec<(AxisLabel, f64)>,
    pub alignment: Option<AlignmentGuide>,
    /// Free metadata entries
    pub entries: Vec<(String, String)>,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            repeats: 1,
            name: None,
            base_path: None,
            positions: Vec::new(),
            alignment: None,
            entries: Vec::new(),
        }
    }
}

impl ScanRequest {
    fn has_metadata(&self) -> bool {
        !self.positions.is_empty()
            || self.alignment.as_ref().is_some_and(|g| !g.is_empty())
            || !self.entries.is_empty()
    }
}

/// Metadata document attached to scans
pub fn metadata_xml(request: &ScanRequest) -> Result<String> {
    let mut elements: Vec<BytesStart<'static>> = Vec::new();

    if let Some(guide) = request.alignment.as_ref().filter(|g| !g.is_empty()) {
        let mut element = BytesStart::new("alignmentGuide");
        for (key, value) in [("rotX", guide.rot_x), ("rotY", guide.rot_y), ("rotZ", guide.rot_z)] {
            if let Some(value) = value {
                element.push_attribute((key, value.to_string().as_str()));
            }
        }
        let tolerance = guide.angle_tolerance.unwrap_or(5.0).to_string();
        element.push_attribute(("angleTolerance", tolerance.as_str()));
        element.push_attribute(("icr", guide.icr.as_deref().unwrap_or("None")));
        elements.push(element);
    }

    for (label, value) in &request.positions {
        let unit = label.kind().base_unit();
        let mut element = BytesStart::new("metaentry");
        element.push_attribute(("name", format!("{}-absolute_{}", label, unit).as_str()));
        element.push_attribute(("value", value.to_string().as_str()));
        elements.push(element);
    }

    for (name, value) in &request.entries {
        let mut element = BytesStart::new("metaentry");
        element.push_attribute(("name", name.as_str()));
        element.push_attribute(("value", value.as_str()));
        elements.push(element);
    }

    let metadata = |e: io::Error| ScanAppError::Metadata(e.to_string());
    let mut writer = Writer::new(Vec::new());
    let mut root = BytesStart::new("metatree");
    root.push_attribute(("name", "python"));
    writer.write_event(Event::Start(root)).map_err(metadata)?;
    writer
        .write_event(Event::Text(BytesText::new("\n\t")))
        .map_err(metadata)?;
    let count = elements.len();
    for (i, element) in elements.into_iter().enumerate() {
        writer.write_event(Event::Empty(element)).map_err(metadata)?;
        let tail = if i + 1 < count { "\n\t" } else { "\n" };
        writer
            .write_event(Event::Text(BytesText::new(tail)))
            .map_err(metadata)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("metatree")))
        .map_err(metadata)?;

    String::from_utf8(writer.into_inner()).map_err(|e| ScanAppError::Metadata(e.to_string()))
}

/// `path` with the project archive extension unless it already names a project
fn project_path(path: &str) -> String {
    if path.ends_with(PROJECT_EXTENSION) || path.ends_with(PROJECT_ZIP_EXTENSION) {
        path.to_string()
    } else {
        format!("{}{}", path, PROJECT_ZIP_EXTENSION)
    }
}

fn ensure_parent(path: &str) -> io::Result<()> {
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Newest `.3dscansetup` file in `dir`
pub fn newest_setup_file(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_setup = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == SETUP_EXTENSION);
        if !is_setup {
            continue;
        }
        let modified = fs::metadata(&path)?.modified()?;
        if newest.as_ref().is_none_or(|(time, _)| modified > *time) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

pub struct ScanApp<R, W> {
    input: R,
    output: W,
    last_id: u64,
    session: Session,
    view_retries: u32,
    scan_retries: u32,
    retry_delay: Duration,
    metadata_path: PathBuf,
}

impl ScanApp<io::StdinLock<'static>, io::Stdout> {
    /// Requests on stdout, responses on stdin
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ScanApp<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            last_id: 0,
            session: Session::default(),
            view_retries: VIEW_RETRIES,
            scan_retries: SCAN_RETRIES,
            retry_delay: RETRY_DELAY,
            metadata_path: std::env::temp_dir().join(METADATA_FILE),
        }
    }

    pub fn with_config(mut self, config: &ScanAppConfig) -> Self {
        self.view_retries = config.view_retries;
        self.scan_retries = config.scan_retries;
        self.retry_delay = config.retry_delay();
        if let Some(path) = &config.metadata_path {
            self.metadata_path = path.clone();
        }
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_metadata_path(mut self, path: PathBuf) -> Self {
        self.metadata_path = path;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn writer(&self) -> &W {
        &self.output
    }

    /// One request/response exchange
    pub fn call(&mut self, method: Method, param: Option<&str>) -> Result<()> {
        self.last_id += 1;
        let id = self.last_id;
        let request = Request::new(method, id, param);
        info!("{} --> Requesting: {}, params: {:?}", id, method, param);

        let line = serde_json::to_string(&request).map_err(io::Error::from)?;
        writeln!(self.output, "{}", line)?;
        self.output.flush()?;

        let mut reply = String::new();
        if self.input.read_line(&mut reply)? == 0 {
            return Err(ScanAppError::Disconnected);
        }
        debug!("{} <-- {}", id, reply.trim_end());

        let response = Response::parse(reply.trim())
            .map_err(|source| ScanAppError::InvalidResponse { method, id, source })?;
        if response.is_success() {
            info!("<-- {} succeeded", id);
            Ok(())
        } else {
            let detail = response.failure();
            warn!("<-- {} ***FAILED***: {}", id, detail);
            Err(ScanAppError::Rejected { method, id, detail })
        }
    }

    /// Log a refused call and carry on; connection failures still propagate
    fn tolerate(&self, result: Result<()>, context: &str) -> Result<bool> {
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_retryable() => {
                warn!("{}: {}", context, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn switch_tab(&mut self, tab: UiTab) -> Result<()> {
        self.session.tab = tab;
        self.call(Method::ChangeNavigationTab, Some(tab.as_str()))
    }

    pub fn set_target_type(&mut self, target: TargetType) -> Result<()> {
        self.call(Method::SetCalibrationTargetType, Some(target.as_str()))
    }

    pub fn start_calibration(&mut self) -> Result<()> {
        self.call(Method::StartCalibration, None)
    }

    pub fn step_calibration_forward(&mut self) -> Result<()> {
        self.call(Method::FlatPlateCalibrationStepForwards, None)
    }

    /// Capture the current view, retrying with `{name}-attempt{n}` names
    pub fn add_calibration_view(&mut self, name: Option<&str>, target: TargetType) -> Result<()> {
        if let Err(e) = self.set_target_type(target) {
            warn!("Failed to set target type to {}", target.as_str());
            return Err(e);
        }

        let first = self.call(Method::AddCalibrationView, name);
        if !self.tolerate(first, "Add calibration view")? {
            for attempt in 0..self.view_retries {
                warn!(
                    "Failed to add calibration view, re-attempt {}...",
                    attempt + 1
                );
                thread::sleep(self.retry_delay);
                let retry_name = name.map(|n| format!("{}-attempt{}", n, attempt + 2));
                let result = self.call(Method::AddCalibrationView, retry_name.as_deref());
                if self.tolerate(result, "Add calibration view")? {
                    return Ok(());
                }
            }
            warn!("View capture failed!");
            return Err(ScanAppError::ViewCaptureFailed {
                name: name.unwrap_or_default().to_string(),
                attempts: self.view_retries + 1,
            });
        }
        Ok(())
    }

    /// Calibrate from the captured views and export the result archive
    pub fn calibrate(&mut self, zip_path: &str, auto_clear_views: bool) -> Result<()> {
        let zip_path = if zip_path.ends_with(".zip") {
            zip_path.to_string()
        } else {
            format!("{}.zip", zip_path)
        };
        ensure_parent(&zip_path)?;
        self.call(Method::CalibrateUsingFlatPlateTarget, Some(&zip_path))?;
        info!("Calibration exported to {}", zip_path);
        if auto_clear_views {
            self.clear_views()?;
        }
        Ok(())
    }

    pub fn clear_views(&mut self) -> Result<()> {
        self.call(Method::DeleteCalibrationViews, None)
    }

    /// Start a new project
    pub fn clear_project(&mut self) -> Result<()> {
        self.session.saved = false;
        self.session.sequence = 1;
        self.session.file_path = None;
        info!("Project cleared, starting new project");
        self.call(Method::ClearProject, None)
    }

    /// Export the captured views without calibrating
    pub fn export_calibration_views(&mut self, zip_path: &str) -> Result<()> {
        ensure_parent(zip_path)?;
        self.call(Method::ExportCalibrationViews, Some(zip_path))
    }

    pub fn load_setup_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading hardware setup file from {}", path.display());
        self.call(Method::ImportHardwareSetup, Some(&path.to_string_lossy()))
    }

    /// Reload the newest hardware setup in `dir`, then give the scanner `delay` to settle
    pub fn reconnect_scanner(&mut self, dir: &Path, delay: Duration) -> Result<()> {
        let Some(setup) = newest_setup_file(dir)? else {
            return Err(ScanAppError::NoSetupFile(dir.to_path_buf()));
        };
        if let Err(e) = self.load_setup_file(&setup) {
            warn!("Failed to load most recent setup file, reconnect failed");
            return Err(e);
        }
        debug!("Scanner reconnected");
        thread::sleep(delay);
        Ok(())
    }

    pub fn save_project_as(&mut self, path: &str) -> Result<()> {
        let path = project_path(path);
        ensure_parent(&path)?;
        self.session.saved = true;
        self.session.file_path = Some(path.clone());
        info!("Saving project to {}", path);
        self.call(Method::SaveProjectAs, Some(&path))
    }

    /// Save the project. The first save needs a path; a different path starts a new project there.
    pub fn save_project(&mut self, path: Option<&str>) -> Result<()> {
        if !self.session.saved {
            let Some(path) = path else {
                return Err(ScanAppError::NoProjectPath);
            };
            let saved = self.save_project_as(path);
            self.tolerate(saved, &format!("Error saving to {}", path))?;
        } else if let Some(path) = path {
            let path = project_path(path);
            if self.session.file_path.as_deref() != Some(path.as_str()) {
                self.clear_project()?;
                self.save_project_as(&path)?;
            }
        }
        self.call(Method::SaveProject, None)
    }

    pub fn scan_names(&mut self, base_name: &str) -> Result<()> {
        debug!("New scan name: {}", base_name);
        self.call(Method::SetBaseScanName, Some(base_name))
    }

    /// Export path for base path evaluation results; empty disables the export
    pub fn base_path(&mut self, path: &str) -> Result<()> {
        self.call(Method::SetExportBasePathEvaluationResult, Some(path))
    }

    /// Attach a reference data file to subsequent scans; empty detaches it
    pub fn set_scan_reference_data_path(&mut self, path: &str) -> Result<()> {
        match self.call(Method::SetScanReferenceDataPath, Some(path)) {
            Ok(()) => {
                info!("Scan reference data path set to '{}'", path);
                self.session.custom_metadata = !path.is_empty();
                Ok(())
            }
            Err(e) => {
                warn!("Failed to set scan reference data path");
                Err(e)
            }
        }
    }

    fn start_scan(&mut self) -> Result<()> {
        let first = self.call(Method::ScanStart, None);
        if self.tolerate(first, "Scan start")? {
            return Ok(());
        }
        warn!("Failed starting scan, switching to scanning tab to retry");
        let switched = self.switch_tab(UiTab::Scanning);
        self.tolerate(switched, "Switch to scanning tab")?;
        self.call(Method::ScanStart, None)
    }

    fn add_scan_to_fusion(&mut self) -> Result<()> {
        self.call(Method::ScanAddToFusion, None)?;
        self.session.sequence += 1;
        self.session.tab = UiTab::Alignment;
        Ok(())
    }

    fn scan_once(&mut self, name: &str) -> Result<()> {
        let mut failed = 0;
        while failed < self.scan_retries {
            if self.session.tab != UiTab::Scanning {
                let switched = self.switch_tab(UiTab::Scanning);
                self.tolerate(switched, &format!("{}: failed switching to scan tab", name))?;
            }

            let started = self.start_scan();
            if self.tolerate(started, &format!("{}: scan failed to start", name))? {
                let added = self.add_scan_to_fusion();
                if self.tolerate(added, &format!("{}: add to fusion failed", name))? {
                    return Ok(());
                }
            }

            // The calibration tab resets the projector
            let reset = self.switch_tab(UiTab::Calibration);
            self.tolerate(reset, "Switch to calibration tab")?;
            failed += 1;
            warn!(
                "Scan {} failed {} times, retrying in {:?}",
                name, failed, self.retry_delay
            );
            thread::sleep(self.retry_delay);
            let back = self.switch_tab(UiTab::Scanning);
            self.tolerate(back, "Switch to scanning tab")?;
        }

        Err(ScanAppError::ScanFailed {
            name: name.to_string(),
            attempts: self.scan_retries,
        })
    }

    /// Capture `repeats` scans and add them to the project, autosaving a saved project
    pub fn scan(&mut self, request: &ScanRequest) -> Result<()> {
        let with_metadata = request.has_metadata();
        if with_metadata {
            info!("Writing custom metadata to {}", self.metadata_path.display());
            fs::write(&self.metadata_path, metadata_xml(request)?)?;
            let path = self.metadata_path.to_string_lossy().into_owned();
            let attached = self.set_scan_reference_data_path(&path);
            self.tolerate(attached, "Scan metadata")?;
        }

        let result = self.scan_repeats(request);

        if with_metadata {
            let detached = self.set_scan_reference_data_path("");
            self.tolerate(detached, "Scan metadata")?;
        }
        result
    }

    fn scan_repeats(&mut self, request: &ScanRequest) -> Result<()> {
        for repeat in 0..request.repeats {
            let name = match &request.name {
                Some(base) => {
                    let name = format!("{}_R{}_S{}", base, repeat, self.session.sequence);
                    let named = self.scan_names(&name);
                    self.tolerate(named, "Set scan name")?;
                    name
                }
                None => format!("scan R{}", repeat),
            };

            if let Some(base_path) = &request.base_path {
                let set = self.base_path(base_path);
                self.tolerate(set, &format!("Error setting base path for scan {}", name))?;
            }

            self.scan_once(&name)?;

            if self.session.saved {
                let path = self.session.file_path.clone();
                if let Err(e) = self.save_project(path.as_deref()) {
                    warn!("Error autosaving scan {}", name);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Step out of calibration into scanning and capture scans
    pub fn scan_after_calibrating(&mut self, repeats: u32, name: Option<&str>) -> Result<()> {
        let stepped = self.step_calibration_forward();
        self.tolerate(stepped, "Step calibration forward")?;
        let switched = self.switch_tab(UiTab::Scanning);
        self.tolerate(switched, "Switch to scanning tab")?;
        self.scan(&ScanRequest {
            repeats,
            name: name.map(str::to_string),
            ..ScanRequest::default()
        })
    }
}
