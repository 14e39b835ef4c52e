//! A rig that exists only in memory, for playing and testing without hardware.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use memory_game::{CellIndex, Label, CELL_COUNT};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::trace;

use crate::link::coils;
use crate::{CoilBus, Camera, Classifier, Frame, ModbusError, Roi, FN_WRITE_SINGLE_COIL};

/// Resolution of the simulated sensor.
pub const SENSOR_WIDTH: u32 = 960;
pub const SENSOR_HEIGHT: u32 = 540;

const BACKGROUND: [u8; 3] = [255, 255, 255];
const FIRST_COIL: u16 = coils::CELL_BASE;
const LAST_COIL: u16 = coils::TEST_CAMERA;

#[derive(Debug)]
struct RigState {
    layout: [Label; CELL_COUNT],
    coils: Vec<bool>,
    open: bool,
    failing_coil: Option<u16>,
    frozen: bool,
}

impl RigState {
    fn coil(&self, address: u16) -> bool {
        address
            .checked_sub(FIRST_COIL)
            .and_then(|offset| self.coils.get(offset as usize))
            .copied()
            .unwrap_or(false)
    }

    fn commanded_cell(&self) -> Option<CellIndex> {
        CellIndex::all().find(|&cell| self.coil(crate::cell_coil(cell)))
    }

    /// The tile currently in front of the camera.
    fn tile_at_camera(&self) -> Option<CellIndex> {
        if self.coil(coils::TEST_CAMERA) {
            return CellIndex::new(0);
        }
        if self.coil(coils::PLACE_BACK) {
            return None;
        }
        let moving = self.coil(coils::NEW_COMMAND) || self.coil(coils::WITHOUT_CAMERA);
        self.commanded_cell().filter(|_| moving)
    }

    fn signals(&self) -> [bool; 3] {
        if self.frozen {
            return [false; 3];
        }
        let in_position = self.tile_at_camera().is_some();
        let home = self.commanded_cell().is_none() && !self.coil(coils::TEST_CAMERA);
        [in_position, home, in_position]
    }
}

/// The robot and the board, answering every motion instantly.
///
/// Clones share the same rig.
#[derive(Clone, Debug)]
pub struct SimulatedRig {
    state: Arc<Mutex<RigState>>,
}

impl SimulatedRig {
    pub fn new(layout: [Label; CELL_COUNT]) -> Self {
        let state = RigState {
            layout,
            coils: vec![false; (LAST_COIL - FIRST_COIL + 1) as usize],
            open: false,
            failing_coil: None,
            frozen: false,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A rig with every label placed twice, in random order.
    pub fn shuffled<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(shuffled_layout(rng))
    }

    fn state(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn layout(&self) -> [Label; CELL_COUNT] {
        self.state().layout
    }

    pub fn coil(&self, address: u16) -> bool {
        self.state().coil(address)
    }

    /// Makes every write to `coil` fail, or none with `None`.
    pub fn fail_writes_to(&self, coil: Option<u16>) {
        self.state().failing_coil = coil;
    }

    /// While frozen, the robot never reports any signal.
    pub fn freeze(&self, frozen: bool) {
        self.state().frozen = frozen;
    }

    pub fn camera(&self, roi: Roi) -> SimulatedCamera {
        SimulatedCamera {
            rig: self.clone(),
            roi,
            started: false,
        }
    }
}

pub fn shuffled_layout<R: Rng + ?Sized>(rng: &mut R) -> [Label; CELL_COUNT] {
    let mut tiles: Vec<Label> = Label::ALL
        .iter()
        .flat_map(|&label| [label, label])
        .collect();
    tiles.shuffle(rng);
    tiles
        .try_into()
        .expect("two tiles per label fill the board")
}

impl CoilBus for SimulatedRig {
    fn open(&mut self) -> Result<(), ModbusError> {
        self.state().open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.state().open = false;
    }

    fn write_coil(&mut self, address: u16, value: bool) -> Result<(), ModbusError> {
        let mut state = self.state();
        if !state.open {
            return Err(ModbusError::Io(std::io::ErrorKind::NotConnected.into()));
        }
        if state.failing_coil == Some(address) || !(FIRST_COIL..=LAST_COIL).contains(&address) {
            // Illegal data address
            return Err(ModbusError::Exception {
                function: FN_WRITE_SINGLE_COIL,
                code: 2,
            });
        }
        trace!(address, value, "Simulated coil write");
        state.coils[(address - FIRST_COIL) as usize] = value;
        Ok(())
    }

    fn read_discrete_inputs(&mut self, address: u16, count: u16) -> Result<Vec<bool>, ModbusError> {
        let state = self.state();
        if !state.open {
            return Err(ModbusError::Io(std::io::ErrorKind::NotConnected.into()));
        }
        let signals = state.signals();
        let bits = (address..address.saturating_add(count))
            .map(|addr| {
                addr.checked_sub(coils::SIGNAL_BASE)
                    .and_then(|bit| signals.get(bit as usize))
                    .copied()
                    .unwrap_or(false)
            })
            .collect();
        Ok(bits)
    }
}

/// Sees the label of whatever tile the simulated robot holds.
///
/// The tile is drawn into the region of interest of a sensor-sized frame,
/// encoding the label's index in the red channel.
pub struct SimulatedCamera {
    rig: SimulatedRig,
    roi: Roi,
    started: bool,
}

impl Camera for SimulatedCamera {
    fn start(&mut self) -> anyhow::Result<()> {
        self.started = true;
        Ok(())
    }

    fn capture(&mut self) -> anyhow::Result<Frame> {
        if !self.started {
            anyhow::bail!("Camera was not started");
        }
        let label = {
            let state = self.rig.state();
            let cell = state
                .tile_at_camera()
                .context("No tile in front of the camera")?;
            state.layout[cell.get()]
        };
        let mut raw = Frame::filled(SENSOR_WIDTH, SENSOR_HEIGHT, BACKGROUND);
        let tile = [label.to_index() as u8, 0, 0];
        for y in self.roi.y..self.roi.y + self.roi.height {
            for x in self.roi.x..self.roi.x + self.roi.width {
                let start = (y as usize * SENSOR_WIDTH as usize + x as usize) * crate::CHANNELS;
                if let Some(px) = raw.pixels.get_mut(start..start + crate::CHANNELS) {
                    px.copy_from_slice(&tile);
                }
            }
        }
        raw.crop(self.roi).context("Region of interest is outside the sensor")
    }

    fn stop(&mut self) {
        self.started = false;
    }
}

/// Decodes the label drawn by [`SimulatedCamera`].
#[derive(Default)]
pub struct SimulatedClassifier;

impl Classifier for SimulatedClassifier {
    fn top_prediction(&mut self, frame: &Frame) -> anyhow::Result<Label> {
        let [red, _, _] = frame.pixel(0, 0).context("Empty frame")?;
        Label::from_index(red as usize).with_context(|| format!("No label with index {}", red))
    }
}
