use std::time::Duration;

use memory_game::FlipRejection;

use crate::{Phase, Signal};

/// Error type for a single Modbus transaction.
#[derive(Debug)]
pub enum ModbusError {
    Io(std::io::Error),
    /// The device answered with an exception response.
    Exception { function: u8, code: u8 },
    /// The response could not be parsed.
    Malformed(&'static str),
    TransactionMismatch { expected: u16, received: u16 },
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Io(err)
    }
}

impl std::error::Error for ModbusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModbusError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModbusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModbusError::Io(_) => write!(f, "Communication with the device failed"),
            ModbusError::Exception { function, code } => write!(
                f,
                "The device rejected function {:#04x} with exception code {}",
                function, code
            ),
            ModbusError::Malformed(what) => write!(f, "Malformed response: {}", what),
            ModbusError::TransactionMismatch { expected, received } => write!(
                f,
                "Expected a response to transaction {}, but got one for {}",
                expected, received
            ),
        }
    }
}

/// Error type for robot operations.
#[derive(Debug)]
pub enum LinkError {
    /// The transport could not be opened, or the robot refused to arm.
    Unreachable(ModbusError),
    /// Writing a coil failed. Earlier writes of the same command are not rolled back.
    CommandRejected { coil: u16, err: ModbusError },
    /// Reading the acknowledgement bits failed.
    ReadbackFailed(ModbusError),
    /// The robot did not report `signal` in time.
    Timeout { signal: Signal, waited: Duration },
    NotConnected,
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Unreachable(err)
            | LinkError::CommandRejected { err, .. }
            | LinkError::ReadbackFailed(err) => Some(err),
            LinkError::Timeout { .. } | LinkError::NotConnected => None,
        }
    }
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::Unreachable(_) => write!(f, "The robot is unreachable"),
            LinkError::CommandRejected { coil, .. } => {
                write!(f, "The robot rejected a write to coil {}", coil)
            }
            LinkError::ReadbackFailed(_) => write!(f, "Could not read the robot's status bits"),
            LinkError::Timeout { signal, waited } => write!(
                f,
                "The robot did not report {} within {:.1}s",
                signal,
                waited.as_secs_f32()
            ),
            LinkError::NotConnected => write!(f, "The robot is not connected"),
        }
    }
}

/// Error type for one flip.
///
/// Apart from [`TurnError::WrongPhase`], all of these leave the game exactly
/// as it was before the flip, so the same actor may simply try again.
#[derive(Debug)]
pub enum TurnError {
    Rejected(FlipRejection),
    Link(LinkError),
    /// The camera or the classifier failed.
    Vision(anyhow::Error),
    /// The operation is not allowed right now.
    WrongPhase { phase: Phase },
}

impl From<LinkError> for TurnError {
    fn from(err: LinkError) -> Self {
        TurnError::Link(err)
    }
}

impl From<FlipRejection> for TurnError {
    fn from(reason: FlipRejection) -> Self {
        TurnError::Rejected(reason)
    }
}

impl std::error::Error for TurnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TurnError::Rejected(reason) => Some(reason),
            TurnError::Link(err) => Some(err),
            TurnError::Vision(err) => Some(&**err),
            TurnError::WrongPhase { .. } => None,
        }
    }
}

impl std::fmt::Display for TurnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnError::Rejected(_) => write!(f, "The flip was rejected"),
            TurnError::Link(_) => write!(f, "The flip was aborted by a robot error"),
            TurnError::Vision(_) => write!(f, "The flip was aborted by a vision error"),
            TurnError::WrongPhase { phase } => {
                write!(f, "This is not possible while the game is {}", phase)
            }
        }
    }
}

/// Renders an error and all of its sources on one line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut result = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        result += ": ";
        result += &err.to_string();
        source = err.source();
    }
    result
}
