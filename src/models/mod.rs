//! Domain model module declarations.

pub mod config;
pub mod offer;
pub mod pier;
pub mod service;

pub use config::{Config, Dht, Email, Journal, LogLevel, Nat};
pub use offer::{load_offer, save_offer, Offer, OfferedService};
pub use pier::text_hash;
pub use service::{Service, ServiceUpdate};
