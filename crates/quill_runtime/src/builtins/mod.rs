mod helpers;

pub mod error;
pub mod globals;

pub use error::{create_error_constructor, make_error};
pub use globals::install_globals;
