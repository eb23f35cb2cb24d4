mod client;
mod engine;
mod error;
mod jar;
mod types;

pub use client::HttpClient;
pub use engine::{
    AfterResponseHook, BeforeRequestHook, HttpEngine, HttpEngineConfig, HttpHooks,
    PreparedRequest,
};
pub use error::{Error, HttpTransportErrorKind, Result};
pub use jar::CookieJar;
pub use types::{HttpRequest, HttpResponse};
