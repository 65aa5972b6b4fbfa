//! Process-wide logging setup shared by every `catalogsync` entry point.

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize with human-readable output (used by interactive subcommands).
pub fn init_pretty() {
    tracing::init(LogFormat::Pretty);
}

/// Output format for the fmt subscriber.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Tracing configuration (filters, layers).
pub mod tracing;
