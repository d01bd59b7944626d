mod auth;
mod broadcast;
pub mod utils;

pub use utils::test_utils;
