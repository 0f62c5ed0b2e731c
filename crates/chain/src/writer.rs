//! Pluggable collaborators that produce response bodies.

use crate::error::{BoxError, ChainError};
use crate::response::ResponseWriter;
use crate::value::Value;
use crate::RequestContext;
use bytes::Bytes;

/// Serializes a payload into the response body.
///
/// The writer used by [`RequestContext::write`] can be replaced for one request with
/// [`RequestContext::set_data_writer`].
pub trait DataWriter: Send + Sync {
    fn write(&self, response: &mut ResponseWriter, data: Value) -> Result<(), ChainError>;
}

/// Writes strings and bytes as they are, numbers and booleans in their textual form.
///
/// [`Value::Null`] writes nothing, [`Value::Any`] is rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDataWriter;

impl DataWriter for DefaultDataWriter {
    fn write(&self, response: &mut ResponseWriter, data: Value) -> Result<(), ChainError> {
        match data {
            Value::Null => {}
            Value::Str(s) => {
                response.write(s.as_bytes());
            }
            Value::Bytes(bytes) => {
                response.write(&bytes);
            }
            Value::Bool(b) => {
                let text: &[u8] = if b { b"true" } else { b"false" };
                response.write(text);
            }
            Value::Int(i) => {
                response.write(i.to_string().as_bytes());
            }
            Value::UInt(u) => {
                response.write(u.to_string().as_bytes());
            }
            Value::Float(f) => {
                response.write(f.to_string().as_bytes());
            }
            any @ Value::Any(_) => return Err(ChainError::UnsupportedPayload { kind: any.kind() }),
        }
        Ok(())
    }
}

/// Renders a named template, used by [`RequestContext::render`].
#[cfg_attr(test, mockall::automock)]
pub trait Renderer: Send + Sync {
    fn render(&self, name: &str, ctx: &RequestContext) -> Result<Bytes, BoxError>;
}
