//! The native helper: the long-lived process the browser spawns over native
//! messaging. Owns the framed stdio loop, the dispatch router, and the
//! composition root that wires every subsystem together.

pub mod dispatcher;
pub mod methods;
pub mod prompter;
pub mod server;
pub mod services;
pub mod text_sessions;

pub use {
    server::run_helper,
    services::{Services, ServicesBuilder},
};
