//! Database entities.

pub mod form;
pub mod response;

pub use form::Entity as Form;
pub use response::Entity as Response;
