//! Utilities for assembling stepflow networks.

pub mod helper_kernels;
