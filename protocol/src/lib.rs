//! Wire protocol for the Kestrel network: canonical payload encoding,
//! typed message frames, and the length-prefixed frame codec.

pub mod codec;
pub mod error;
pub mod messages;
pub mod wire;

pub use codec::{decode_frame, encode_frame, read_frame, write_frame, RawFrame, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use messages::{codes, Message, PeriodState, VoteState};
