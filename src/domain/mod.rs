//! Domain layer: entities, value objects and the ports the application layer
//! talks to. Nothing here performs I/O.

pub mod event;
pub mod investment;
pub mod ledger;
pub mod location;
pub mod money;
pub mod ports;
