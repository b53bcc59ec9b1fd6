//! CLI command implementations.
//!
//! Thin glue between parsed arguments and the library: each function
//! wires a command to the stores and the docker backend and prints its
//! result for the operator.

pub mod backup;
pub mod instance;
pub mod run;
