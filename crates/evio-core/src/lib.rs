//! # evio-core — Type and trait boundaries for the evio event core
//!
//! This crate defines the vocabulary shared by every evio component:
//! the per-direction [`Event`] record, the reactor capability word
//! ([`Caps`]), the [`Driver`] trait every readiness backend implements,
//! the [`Notifier`] wake contract, error types, and leveled logging.
//!
//! ## Design principle
//!
//! > "Program to the interface. Branch on capabilities, never on
//! >  backend types."
//!
//! Calling code reads driver operations through the [`Driver`] trait
//! only, and every registration decision is made from the capability
//! word a driver reports at construction time. Swapping the readiness
//! backend is a one-line change at reactor setup.
//!
//! | Concern        | Here               | Implemented in |
//! |----------------|--------------------|----------------|
//! | Event record   | `event::Event`     | —              |
//! | Capabilities   | `caps::Caps`       | each driver    |
//! | Driver surface | `driver::Driver`   | evio-runtime   |
//! | Wake contract  | `notifier::Notifier` | evio-runtime |
//! | Errors         | `error::EvioError` | —              |
//! | Logging        | `log` macros       | —              |

pub mod caps;
pub mod driver;
pub mod error;
pub mod event;
pub mod log;
pub mod notifier;

pub use caps::Caps;
pub use driver::{Direction, Driver, OpFlags, ProcessStats};
pub use error::{EvioError, Result};
pub use event::{Conn, Event, EventHandler, INVALID_INDEX};
pub use log::{Log, LogLevel};
pub use notifier::Notifier;
