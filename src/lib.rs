#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod browser_controller;
pub mod connector;
pub mod crawler;
pub mod driver;
pub mod extractor;
pub mod reporter;
pub mod runner;
pub mod store;
pub mod types;
pub mod utils;
