pub mod tunnel;

pub use tunnel::TunnelController;
