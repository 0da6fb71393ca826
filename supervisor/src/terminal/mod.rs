//! Terminal multiplexing: one pseudo-terminal pane per agent, scrollback
//! capture, activity monitoring and adaptive polling.

pub mod controller;
pub mod monitor;
pub mod streamer;

pub use controller::{PaneHandle, TerminalController, TerminalError};
pub use monitor::{AgentMonitor, MonitorConfig, MonitorEvent};
pub use streamer::{OutputStreamer, StreamerConfig, StreamerEvent};
