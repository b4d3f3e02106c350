//! Helpers shared by the mesh and public listeners.

mod http_error;

pub(crate) use http_error::{HttpError, HttpResult};
