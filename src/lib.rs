pub mod cloudflare;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod reconciler;
pub mod resources;

pub use error::Error;
