//! Owns exactly one browser page per session and executes actions against it
//!. See [`worker::Worker`] for the execution
//! contract and [`driver::BrowserDriver`] for the transport seam.

pub mod driver;
pub mod element;
pub mod frame;
pub mod simulated;
pub mod worker;

pub use driver::BrowserDriver;
pub use element::ElementInfo;
pub use frame::Frame;
pub use simulated::SimulatedDriver;
pub use worker::Worker;
