//! Engine modules: pure translation of configuration into operation plans.
//!
//! Nothing here touches the system; the installer executes the plans.

pub mod storage;
