//! RESP Protocol Surface
//!
//! - `frame`: decodes the request byte stream into command argument lists
//! - `types`: the `RespValue` replies are rendered into
//!
//! ## Example
//!
//! ```
//! use resp_gateway::protocol::{frame, RespValue};
//! use bytes::{Bytes, BytesMut};
//!
//! let mut buf = BytesMut::from(&b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n"[..]);
//! let args = frame::decode(&mut buf).unwrap().unwrap();
//! assert_eq!(args[0], Bytes::from("ECHO"));
//!
//! let reply = RespValue::bulk_string(args[1].clone());
//! assert_eq!(reply.serialize(), b"$2\r\nhi\r\n");
//! ```

pub mod frame;
pub mod types;

pub use frame::FrameError;
pub use types::RespValue;
