//! Guided playback sequencer.
//!
//! `machine` holds the pure Context -> Analysis -> Result state machine; `driver`
//! owns it on a tokio task together with the one tick timer and turns user
//! commands and timer expiry into state transitions.

mod driver;
mod machine;

use thiserror::Error;

pub(crate) use driver::{run_driver, DriverOptions, PlaybackCommand};
pub(crate) use machine::validate_speed;

#[derive(Debug, Error, PartialEq)]
pub enum SequencerError {
    #[error(
        "speed must be between {min} and {max}, got {0}",
        min = machine::MIN_SPEED,
        max = machine::MAX_SPEED
    )]
    InvalidSpeed(f64),
}
