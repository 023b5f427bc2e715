//! Client-side data synchronization for a todo API.
//!
//! - [`transport`] issues requests with auth, timeout and retries
//! - [`session`] holds the signed-in identity across restarts
//! - [`cache`] keeps fetched collections coherent across concurrent reads
//! - [`todos`] has the typed services, the filter-to-key mapper and the
//!   mutation coordinator
//! - [`app`] wires everything together

pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod query;
pub mod session;
pub mod todos;
pub mod transport;

pub use app::App;
pub use error::{ApiError, ErrorKind};
