//! Command line program for running batches of simulation experiments.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

extern crate anyhow;
extern crate clap;
extern crate colored;

pub mod cli;
pub mod config;

use colored::*;

fn main() {
    // Run the program based on user input
    let code = match cli::start(cli::app_matches()) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            println!("{}{}", "error: ".red(), e);
            if e.root_cause().to_string() != e.to_string() {
                println!("Caused by:\n{}", e.root_cause())
            }
            1
        }
    };
    std::process::exit(code);
}
