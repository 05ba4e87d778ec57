//! MotorBench is the host side of a lab bench for a motor fault classifier
//! that runs on a microcontroller. The classifier takes a 64x64 spectrogram
//! of the motor's sound and answers whether the motor is healthy or faulty.
//!
//! This crate feeds it those spectrograms over a serial line and checks what
//! it says. Samples come either from the held-out test set the model was
//! trained against ([dataset]) or straight from raw recordings of each fault
//! type ([recording] and [stft]). Each sample is scaled to bytes and framed
//! ([wire]), sent and answered ([transport], [reply_decoder]), and the
//! verdicts are scored ([batch], [metrics], [probe]) and drawn ([plot]).
//!
//! Two binaries sit on top: `motorbench` runs and scores the test set, and
//! `faultprobe` walks the fault types one recording at a time.

#![warn(missing_docs)]
pub mod args;
pub mod batch;
pub mod compare;
pub mod config;
pub mod dataset;
pub mod diagnosis;
pub mod fault;
pub mod gui;
pub mod metrics;
pub mod npy;
pub mod plot;
pub mod probe;
pub mod recording;
pub mod reply_decoder;
pub mod spectrogram;
pub mod stft;
pub mod transport;
pub mod wire;
