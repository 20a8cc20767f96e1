mod error;
mod handler;
mod message;

pub use error::*;
pub use handler::*;
pub use message::*;
