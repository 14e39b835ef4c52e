mod config;
mod error;
mod helper;
mod link;
mod modbus;
mod recording;
mod sim;
mod turn;
mod vision;
mod worker;
pub use config::*;
pub use error::*;
pub use helper::*;
pub use link::*;
pub use modbus::*;
pub use recording::*;
pub use sim::*;
pub use turn::*;
pub use vision::*;
pub use worker::*;
