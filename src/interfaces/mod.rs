pub mod api;
pub mod csv;
pub mod replay;
pub mod webhook;
