//! Shared protocol definitions for the Parley wire format.

pub mod codec;
pub mod record;

pub use record::{FileHeader, Frame, TextFrame};
