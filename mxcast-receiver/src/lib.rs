//! # mxcast-receiver: Frame Receiver Service
//!
//! Stands in for the display end of the link: accepts publishers over
//! TCP, reassembles chunked RGB565 frames and writes every completed
//! frame to disk as a PNG, plus `latest.png` for the most recent one.

pub mod config;
pub mod service;
