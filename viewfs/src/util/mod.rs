pub mod open_options;
