use std::thread;
use std::time::{Duration, Instant};

use memory_game::CellIndex;
use tracing::{debug, info, trace, warn};

use crate::{error_chain, CoilBus, LinkError};

/// Coil addresses of the robot controller.
pub mod coils {
    /// The coil for cell `k` is `CELL_BASE + k`.
    pub const CELL_BASE: u16 = 511;
    /// Put the tile held at the camera back onto its cell.
    pub const PLACE_BACK: u16 = 539;
    /// Take the commanded tile to the camera.
    pub const NEW_COMMAND: u16 = 540;
    /// Lift the commanded tile without visiting the camera.
    pub const WITHOUT_CAMERA: u16 = 541;
    pub const GO_CAM_2: u16 = 542;
    pub const GO_CAM_3: u16 = 543;
    /// Armed while a game is running.
    pub const START_GAME: u16 = 544;
    /// Bring a tile to the camera for calibration.
    pub const TEST_CAMERA: u16 = 545;

    /// The command bank that is zeroed between commands.
    pub const COMMAND_BANK: std::ops::RangeInclusive<u16> = CELL_BASE..=GO_CAM_3;

    /// Start of the three acknowledgement bits.
    pub const SIGNAL_BASE: u16 = 511;
    pub const SIGNAL_COUNT: u16 = 3;
}

/// An acknowledgement bit reported by the robot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    /// The commanded tile is in position, at the camera or lifted in place.
    CameraReached,
    HomeReached,
    MagnetEngaged,
}

impl Signal {
    fn bit(self) -> usize {
        match self {
            Signal::CameraReached => 0,
            Signal::HomeReached => 1,
            Signal::MagnetEngaged => 2,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::CameraReached => write!(f, "camera point reached"),
            Signal::HomeReached => write!(f, "home position reached"),
            Signal::MagnetEngaged => write!(f, "electromagnet engaged"),
        }
    }
}

/// One of the two extra camera poses used while photographing a tile.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Waypoint {
    #[default]
    A,
    B,
}

impl Waypoint {
    fn coil(self) -> u16 {
        match self {
            Waypoint::A => coils::GO_CAM_2,
            Waypoint::B => coils::GO_CAM_3,
        }
    }
}

/// What the link remembers between commands.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkSession {
    pub connected: bool,
    /// The cell whose coil is currently set, if any.
    pub last_commanded_cell: Option<CellIndex>,
    /// The waypoint the next camera leg goes to. Kept across commands.
    pub camera_leg: Waypoint,
}

/// Typed access to the robot's coil-based command protocol.
///
/// Every logical command is a sequence of coil writes followed by polling the
/// acknowledgement bits. Writes are not transactional: if one fails, the ones
/// before it stay in effect, and the next [`RobotLink::send_cell()`] starts over.
pub struct RobotLink<B> {
    bus: B,
    session: LinkSession,
    poll_interval: Duration,
}

impl<B: CoilBus> RobotLink<B> {
    pub fn new(bus: B, poll_interval: Duration) -> Self {
        Self {
            bus,
            session: LinkSession::default(),
            poll_interval,
        }
    }

    pub fn session(&self) -> LinkSession {
        self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.connected
    }

    /// Opens the transport, arms the game flag and zeroes the command bank.
    pub fn connect(&mut self) -> Result<(), LinkError> {
        if self.session.connected {
            return Ok(());
        }
        self.bus.open().map_err(LinkError::Unreachable)?;
        if let Err(err) = self.bus.write_coil(coils::START_GAME, true) {
            self.bus.close();
            return Err(LinkError::Unreachable(err));
        }
        self.session = LinkSession {
            connected: true,
            ..LinkSession::default()
        };
        if let Err(err) = self.clear_commands() {
            self.disconnect();
            return Err(match err {
                LinkError::CommandRejected { err, .. } => LinkError::Unreachable(err),
                other => other,
            });
        }
        info!("Robot connected and armed");
        Ok(())
    }

    /// Zeroes the command bank, disarms and closes the transport.
    ///
    /// Errors are logged, not returned. Calling this when not connected does nothing.
    pub fn disconnect(&mut self) {
        if !self.session.connected {
            return;
        }
        if let Err(err) = self.clear_commands() {
            warn!(err = %error_chain(&err), "Could not clear commands while disconnecting");
        }
        if let Err(err) = self.bus.write_coil(coils::START_GAME, false) {
            warn!(err = %error_chain(&err), "Could not disarm the robot");
        }
        self.bus.close();
        self.session = LinkSession::default();
        info!("Robot disconnected");
    }

    /// Zeroes every coil of the command bank.
    pub fn clear_commands(&mut self) -> Result<(), LinkError> {
        for coil in coils::COMMAND_BANK {
            self.write(coil, false)?;
        }
        self.session.last_commanded_cell = None;
        Ok(())
    }

    /// Commands the robot to pick up the tile at `cell`.
    ///
    /// With `via_camera` the tile is brought to the camera, otherwise it is
    /// only lifted in place.
    pub fn send_cell(&mut self, cell: CellIndex, via_camera: bool) -> Result<(), LinkError> {
        debug!(%cell, via_camera, "Sending cell to robot");
        self.write(coils::PLACE_BACK, false)?;
        if let Some(stale) = self.session.last_commanded_cell.filter(|&c| c != cell) {
            self.write(cell_coil(stale), false)?;
            self.session.last_commanded_cell = None;
        }
        let mode = if via_camera {
            coils::NEW_COMMAND
        } else {
            coils::WITHOUT_CAMERA
        };
        self.write(mode, true)?;
        self.write(cell_coil(cell), true)?;
        self.session.last_commanded_cell = Some(cell);
        Ok(())
    }

    /// Reads the three acknowledgement bits.
    pub fn read_signals(&mut self) -> Result<[bool; 3], LinkError> {
        if !self.session.connected {
            return Err(LinkError::NotConnected);
        }
        let bits = self
            .bus
            .read_discrete_inputs(coils::SIGNAL_BASE, coils::SIGNAL_COUNT)
            .map_err(LinkError::ReadbackFailed)?;
        match bits[..] {
            [camera, home, magnet, ..] => Ok([camera, home, magnet]),
            _ => Err(LinkError::ReadbackFailed(crate::ModbusError::Malformed(
                "fewer signal bits than requested",
            ))),
        }
    }

    /// Polls until the robot reports `signal`, or `timeout` has passed.
    ///
    /// This is the only place that waits for physical motion. It cannot be
    /// interrupted other than by the timeout.
    pub fn await_signal(&mut self, signal: Signal, timeout: Duration) -> Result<(), LinkError> {
        let start = Instant::now();
        loop {
            if self.read_signals()?[signal.bit()] {
                trace!(%signal, elapsed = ?start.elapsed(), "Signal received");
                return Ok(());
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(LinkError::Timeout { signal, waited });
            }
            thread::sleep(self.poll_interval.min(timeout - waited));
        }
    }

    /// Returns the tile held at the camera to `cell` and resets the command
    /// coils for the next command.
    pub fn restore_and_clear(&mut self, cell: CellIndex) -> Result<(), LinkError> {
        debug!(%cell, "Placing tile back");
        self.write(coils::GO_CAM_2, false)?;
        self.write(coils::GO_CAM_3, false)?;
        self.write(coils::PLACE_BACK, true)?;
        self.write(coils::NEW_COMMAND, false)?;
        self.write(coils::WITHOUT_CAMERA, false)?;
        self.write(cell_coil(cell), false)?;
        self.session.last_commanded_cell = None;
        Ok(())
    }

    /// Returns the waypoint to move to next. Successive calls alternate
    /// between the two, also across flips.
    ///
    /// Only changes local state, see [`Self::goto_waypoint()`].
    pub fn advance_camera_leg(&mut self) -> Waypoint {
        let waypoint = self.session.camera_leg;
        self.session.camera_leg = match waypoint {
            Waypoint::A => Waypoint::B,
            Waypoint::B => Waypoint::A,
        };
        waypoint
    }

    pub fn goto_waypoint(&mut self, waypoint: Waypoint) -> Result<(), LinkError> {
        trace!(?waypoint, "Moving to camera waypoint");
        self.write(waypoint.coil(), true)
    }

    /// Raises or lowers the calibration flag.
    pub fn set_test_mode(&mut self, enabled: bool) -> Result<(), LinkError> {
        self.write(coils::TEST_CAMERA, enabled)
    }

    fn write(&mut self, coil: u16, value: bool) -> Result<(), LinkError> {
        if !self.session.connected {
            return Err(LinkError::NotConnected);
        }
        trace!(coil, value, "Writing coil");
        self.bus
            .write_coil(coil, value)
            .map_err(|err| LinkError::CommandRejected { coil, err })
    }
}

pub fn cell_coil(cell: CellIndex) -> u16 {
    coils::CELL_BASE + cell.get() as u16
}
