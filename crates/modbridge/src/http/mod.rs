//! HTTP plumbing shared by the wiki and forum clients.

pub mod client;
pub mod cookies;
pub mod session;

pub use client::{HttpClient, HttpResponse};
pub use cookies::CookieJar;
pub use session::{Page, Session};
