//! In-process static HTTP server for the packaged frontend.

mod server;

pub use server::EmbeddedFrontend;
