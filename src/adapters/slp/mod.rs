//! Minecraft Java Edition "Server List Ping" status queries.

mod client;
mod codec;

pub use client::SlpClient;
