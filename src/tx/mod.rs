//! Transaction Module
//!
//! The three pure stages of the pipeline: build the unsigned transaction
//! and its digest, attach the device signature, serialize for the wire.

mod builder;
mod encoder;
mod serializer;

pub use builder::*;
pub use encoder::*;
pub use serializer::*;
