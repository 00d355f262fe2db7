//! Built-in output drivers

pub mod null;

pub use null::NullOutputDriver;
