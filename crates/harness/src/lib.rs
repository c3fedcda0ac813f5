mod client;
mod server;
mod source;

pub use client::TestClient;
pub use server::TestServer;
pub use source::TestSource;
