//! Process lifecycle for the intake crash collector.
//!
//! The one hard requirement at shutdown is that every crash already
//! acknowledged with a 200 gets a chance to reach storage: the HTTP server
//! must stop accepting connections while the crash mover keeps draining its
//! queue, bounded by a deadline. The [`Controller`] turns process signals
//! into exactly that instruction — a [`Shutdown`] carrying the drain
//! deadline, or none for an immediate stop — and fans it out to whoever
//! holds a [`ShutdownHandle`].
//!
//! There is no global shutdown state; the controller is constructed at
//! startup and threaded through like configuration.

mod controller;

pub use controller::*;
