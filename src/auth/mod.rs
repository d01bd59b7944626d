pub mod authentication;
pub mod permissions;
pub mod service;
pub mod session;
pub mod user;

pub use authentication::*;
pub use permissions::*;
pub use service::*;
pub use session::*;
pub use user::*;
