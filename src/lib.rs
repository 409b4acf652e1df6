//! Sample acquisition pipeline for precision ADC evaluation firmware.
//!
//! A periodic trigger (data-ready edge or timer) fires [`AcquisitionController::trigger_handler`],
//! which pulls one scan of raw codes from a [`SampleSource`] and appends it to a
//! [`RingBuffer`]. The host transport drains the ring buffer, or in burst mode asks for a
//! fixed number of bytes through [`AcquisitionController::submit`]. Devices that stream
//! over TDM fill the ring buffer by DMA through the async window protocol.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod budget;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod ring;
pub mod sampler;
pub mod tdm;
pub mod trigger;

pub use budget::Budget;
pub use channel::{Channel, ChannelSet, Rotation};
pub use config::{Config, Mode};
pub use controller::{AcquisitionController, Backend, DeviceInfo, PolledController, Session, State};
pub use error::{Error, ErrorCode, RingError};
pub use ring::{AsyncWindow, RingBuffer};
pub use sampler::{SampleSource, SourceError};
pub use tdm::{NoDma, TdmCapture, TdmPort};
pub use trigger::{Latch, NoTrigger, TriggerBinding, TriggerSource};
