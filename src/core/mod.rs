//! Layered virtual filesystem engine

pub mod address;
pub mod cache;
pub mod carver;
pub mod case;
pub mod drivers;
pub mod extent;
pub mod layer;
pub mod reassembly;
pub mod registry;
pub mod resolver;
pub mod store;

pub use case::{Case, CaseBuilder};
