pub mod credentials;
pub mod tunnel;
