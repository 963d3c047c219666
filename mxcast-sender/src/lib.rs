//! # mxcast-sender: Image Sender
//!
//! Operator-side driver: loads a set of images, previews the current
//! one as it will look on the 128×128 panel, steps forwards and
//! backwards through the set, and sends the previewed image as one
//! frame over the configured transport.
//!
//! ## Modes
//!
//! - **send**: Send every listed image once, in order.
//! - **preview**: Write the converted image to a PNG and exit.
//! - **interactive**: `n`/`p`/`s`/`q` on stdin to browse and send.

pub mod app;
pub mod config;
pub mod playlist;
