pub mod message;
pub mod position;

pub use position::{NewPosition, Position};
