pub mod common;
pub mod cronjob;
pub mod quantity;

pub use common::{API_VERSION, FIELD_MANAGER, KIND, owner_reference};
