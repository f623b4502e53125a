pub mod http;
pub mod replay;

pub use http::HttpDetectorBackend;
pub use replay::ReplayBackend;
