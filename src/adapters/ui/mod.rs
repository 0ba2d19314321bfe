//! Terminal output shown at startup.

pub mod banner;

/// Print the welcome banner. Call once at startup, after tracing init.
pub fn init_ui(listen_addr: &str) {
    banner::print_welcome(listen_addr);
}
