//! Domain model: orders, pricing catalog, workflow steps and the ports the
//! application layer talks to.

pub mod catalog;
pub mod geo;
pub mod order;
pub mod ports;
pub mod workflow;
