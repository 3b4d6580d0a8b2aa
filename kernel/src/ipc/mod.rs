//! Inter-process communication

pub mod pipe;

pub use pipe::Pipe;
