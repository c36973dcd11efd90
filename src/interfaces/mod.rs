pub mod error;
pub mod http;

pub use error::ApiError;
pub use http::create_router;
