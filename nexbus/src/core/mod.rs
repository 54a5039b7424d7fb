mod builder;
mod bus;
mod handler;
mod message;
pub mod response;

pub use builder::BusBuilder;
pub use bus::BusCore;
pub use handler::{AsyncHandler, BatchedHandler, ContextAwareHandler, Handler};
pub use message::{MessagePayload, RawMessage};
pub use response::{
    Error, HandlerError, IntoResponse, Response, ResponseMessage, HANDLER_ERROR_CODE,
};
