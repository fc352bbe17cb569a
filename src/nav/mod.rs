//! Navigation: the reducer state machine and the session that owns the
//! engine's services.

pub mod reducer;
pub mod session;
