pub mod btle;
pub mod constants;
pub mod decoder;
pub mod publisher;
pub mod scanner;
pub mod supervisor;
pub mod timer;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;
