//! Capability handlers exposed over the Model Context Protocol
//!
//! Provides the coffee shop sample catalog: tools, a menu resource and prompts.

pub mod coffee;
