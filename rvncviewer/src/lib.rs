//! Library surface for the `rvncviewer` binary, so its `main.rs` can
//! reference submodules through the crate's own name like any other
//! dependency.

pub mod app;
pub mod args;
pub mod fullscreen;
pub mod ui;
pub mod vnc_connection;
