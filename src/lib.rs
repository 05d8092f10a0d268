//! termweb - terminal sessions over HTTP and WebSocket.
//!
//! Each session wraps a PTY-backed subprocess, drains its output into a
//! stateful screen emulator, and fans the raw byte stream out to any number
//! of WebSocket subscribers. A late joiner receives a snapshot of the
//! current screen followed by exactly the output produced after it.

pub mod activity;
pub mod api;
pub mod config;
pub mod protocol;
pub mod pty;
pub mod reaper;
pub mod screen;
pub mod session;
