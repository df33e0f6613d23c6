mod error;
mod frame;
mod message;

pub use error::{WireError, WireResult};
pub use frame::{read_frame, write_frame, Frame, FrameHeader, MessageType, HEADER_LEN};
pub use message::{Message, ProtocolVersion};
