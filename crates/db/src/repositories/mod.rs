//! Database repositories.

mod form;
mod response;

pub use form::FormRepository;
pub use response::ResponseRepository;
