//! Camera and classifier provided by an external helper process.
//!
//! The helper is started once and talks JSON lines on stdin/stdout: one
//! request per line, answered by exactly one response line.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use memory_game::Label;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{Camera, Classifier, Frame, Roi};

/// Request for the helper to do something.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HelperRequest {
    /// Open the camera. The response should be an [`Okay`].
    Start,
    /// Take a picture. The response should be a full sensor [`Frame`].
    Capture,
    /// Run the vision model. The response should be a [`Prediction`].
    Predict { frame: Frame },
    /// Release the camera. The response should be an [`Okay`].
    Stop,
}

/// Acknowledgement without data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Okay();

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prediction {
    pub label: Label,
}

pub struct VisionHelper {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    // A re-usable buffer for IO.
    // Should always be empty before and after perform_request().
    buf: String,
}

impl VisionHelper {
    pub fn spawn(executable_path: &str, args: &[&str]) -> anyhow::Result<Self> {
        let mut child = Command::new(executable_path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("Could not start vision helper '{}'", executable_path))?;
        debug!(executable_path, pid = child.id(), "Vision helper started");

        Ok(Self {
            name: String::from(executable_path),
            stdin: child.stdin.take().expect("Could not access stdin"),
            stdout: BufReader::new(child.stdout.take().expect("Could not access stdout")),
            child,
            buf: String::new(),
        })
    }

    pub fn perform_request<T: serde::de::DeserializeOwned>(
        &mut self,
        req: &HelperRequest,
    ) -> anyhow::Result<T> {
        let mut req_json = serde_json::to_string(req)?;
        trace!(helper = &self.name, request = ?req, "Sending request");
        req_json.push('\n');
        self.stdin.write_all(req_json.as_bytes())?;
        self.stdin.flush()?;
        self.buf.clear();
        let read = self.stdout.read_line(&mut self.buf)?;
        if read == 0 {
            anyhow::bail!("Vision helper '{}' closed its output", self.name);
        }
        let response = serde_json::from_str::<T>(self.buf.trim_end());
        self.buf.clear();
        Ok(response?)
    }

    /// Splits the helper into its camera and classifier halves, which share
    /// the process.
    pub fn into_parts(self, roi: Roi) -> (HelperCamera, HelperClassifier) {
        let shared = Arc::new(Mutex::new(self));
        (
            HelperCamera {
                helper: Arc::clone(&shared),
                roi,
            },
            HelperClassifier { helper: shared },
        )
    }
}

impl Drop for VisionHelper {
    fn drop(&mut self) {
        if let Err(err) = self.child.kill() {
            trace!(%err, "Vision helper already gone");
        }
        let _ = self.child.wait();
    }
}

fn lock(helper: &Mutex<VisionHelper>) -> std::sync::MutexGuard<'_, VisionHelper> {
    helper.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct HelperCamera {
    helper: Arc<Mutex<VisionHelper>>,
    roi: Roi,
}

impl Camera for HelperCamera {
    fn start(&mut self) -> anyhow::Result<()> {
        let Okay() = lock(&self.helper).perform_request(&HelperRequest::Start)?;
        Ok(())
    }

    fn capture(&mut self) -> anyhow::Result<Frame> {
        let raw: Frame = lock(&self.helper).perform_request(&HelperRequest::Capture)?;
        raw.crop(self.roi).with_context(|| {
            format!(
                "Region {:?} does not fit a {}x{} frame",
                self.roi, raw.width, raw.height
            )
        })
    }

    fn stop(&mut self) {
        if let Err(err) = lock(&self.helper).perform_request::<Okay>(&HelperRequest::Stop) {
            warn!(%err, "Could not stop the camera");
        }
    }
}

pub struct HelperClassifier {
    helper: Arc<Mutex<VisionHelper>>,
}

impl Classifier for HelperClassifier {
    fn top_prediction(&mut self, frame: &Frame) -> anyhow::Result<Label> {
        let req = HelperRequest::Predict {
            frame: frame.clone(),
        };
        let prediction: Prediction = lock(&self.helper).perform_request(&req)?;
        Ok(prediction.label)
    }
}
