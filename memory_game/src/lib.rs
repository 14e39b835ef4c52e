pub use board::*;
pub use errors::*;
pub use labels::*;
pub use protocol::*;
pub use score::*;
pub use strategist::*;
pub use visualization::*;

#[cfg(test)]
mod arbitrary;
mod board;
mod errors;
mod labels;
mod protocol;
mod score;
mod strategist;
mod visualization;
