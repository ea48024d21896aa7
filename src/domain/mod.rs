//! Domain layer: sensor data, enablement logic and display-side helpers that
//! do not depend on any Bluetooth stack.

pub mod enablement;
pub mod history;
pub mod models;
pub mod render_limiter;
pub mod settings;
