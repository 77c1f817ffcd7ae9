//! Request dispatch subsystem.

pub mod dispatcher;
pub mod handler;

pub use dispatcher::{DispatchError, Dispatcher};
pub use handler::{handler_fn, FnHandler, Handler, HandlerError};
