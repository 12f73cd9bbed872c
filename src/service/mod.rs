pub mod client;
pub mod protocol;
pub mod server;

pub use client::ServiceClient;
pub use server::{handle_request, ServiceServer};
