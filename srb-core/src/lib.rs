//! Core of the serial relay bridge: a line protocol shared by control panels
//! and the relay, a single-owner serial channel to the microcontroller, the
//! TCP bridge server, and the client-side send discipline.
//!
//! For the runnable daemon and headless panel, see `srb-app/`.

pub mod utils;
