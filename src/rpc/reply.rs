use crate::client::{RedisResponse, ResponseCode, ResponseValue};
use crate::protocol::RespValue;

/// The single answer a call receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success(RedisResponse),
    Failure(String),
}

impl Reply {
    /// Renders the reply in the client's wire form.
    pub fn to_resp(&self) -> RespValue {
        match self {
            Reply::Failure(message) => RespValue::error(format!("ERR {}", message)),
            Reply::Success(response) => match response.code {
                ResponseCode::Ok => match &response.value {
                    ResponseValue::None => RespValue::null(),
                    ResponseValue::Status(s) => RespValue::simple_string(*s),
                    ResponseValue::String(data) => RespValue::bulk_string(data.clone()),
                    ResponseValue::Int(n) => RespValue::integer(*n),
                },
                ResponseCode::NotFound => RespValue::null(),
                ResponseCode::WrongType => RespValue::error(
                    "WRONGTYPE Operation against a key holding the wrong kind of value",
                ),
                ResponseCode::NotAnInteger => {
                    RespValue::error("ERR value is not an integer or out of range")
                }
                ResponseCode::OutOfRange => RespValue::error("ERR offset is out of range"),
            },
        }
    }
}
