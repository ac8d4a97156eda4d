//! Typed access to the slice of the GitHub REST API the tool reads.

pub mod client;
pub mod models;

pub use client::{Client, ClientConfig, Paginated};
