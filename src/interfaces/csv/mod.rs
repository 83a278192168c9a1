pub mod command_reader;
pub mod ledger_writer;
pub mod location_reader;
