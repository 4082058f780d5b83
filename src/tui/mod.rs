//! TUI module for terminal user interfaces

mod scan_monitor;

pub use scan_monitor::ScanMonitorApp;
