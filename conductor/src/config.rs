use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use memory_game::Difficulty;
use serde::{Deserialize, Serialize};

use crate::{Roi, Timing};

/// Settings of the conductor, read from a JSON file.
///
/// Every field may be left out.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub robot: RobotConfig,
    pub timing: TimingConfig,
    pub camera: CameraConfig,
    pub vision: VisionConfig,
    pub difficulty: Difficulty,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RobotConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// Timeout of a single Modbus request.
    pub io_timeout_ms: u64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            host: String::from("192.168.1.2"),
            port: 502,
            unit_id: 1,
            io_timeout_ms: 3000,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    pub camera_timeout_ms: u64,
    pub home_timeout_ms: u64,
    pub settle_ms: u64,
    /// How long to wait for a running flip when exiting.
    pub shutdown_wait_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            camera_timeout_ms: 30_000,
            home_timeout_ms: 30_000,
            settle_ms: 100,
            shutdown_wait_ms: 5000,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    pub roi: Roi,
}

/// The external program providing camera and classifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisionConfig {
    pub helper: Option<String>,
    pub args: Vec<String>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file: {}", path.display()))?;
        let config = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.robot.io_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.timing.poll_interval_ms)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.timing.shutdown_wait_ms)
    }

    pub fn timing(&self) -> Timing {
        Timing {
            camera_timeout: Duration::from_millis(self.timing.camera_timeout_ms),
            home_timeout: Duration::from_millis(self.timing.home_timeout_ms),
            settle: Duration::from_millis(self.timing.settle_ms),
        }
    }
}
