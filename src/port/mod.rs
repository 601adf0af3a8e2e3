pub mod listeners;
pub mod resolver;

pub use listeners::{find_listeners, Listener};
pub use resolver::{
    derive_port, find_available_port, in_derived_range, is_port_bindable, PORT_FALLBACK_ATTEMPTS,
    PORT_RANGE_BASE, PORT_RANGE_SIZE,
};
