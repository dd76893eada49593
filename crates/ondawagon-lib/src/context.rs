//! Operation context — program name, verbosity, and configuration.
//!
//! Threaded explicitly through every operation that logs or formats errors,
//! so the library holds no process-wide state.

use std::fmt;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct Context {
    program: String,
    verbosity: u8,
    config: Config,
}

impl Default for Context {
    fn default() -> Self {
        Context::new("ondawagon", 0, Config::default())
    }
}

impl Context {
    pub fn new(program: impl Into<String>, verbosity: u8, config: Config) -> Self {
        Context {
            program: program.into(),
            verbosity,
            config,
        }
    }

    /// Context with default configuration, for library users and tests.
    pub fn with_program(program: impl Into<String>) -> Self {
        Context::new(program, 0, Config::default())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    pub fn is_verbose(&self) -> bool {
        self.verbosity > 0
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Prefix an error with the program name: `"<program>: <error>"`.
    pub fn describe(&self, err: &dyn fmt::Display) -> String {
        format!("{}: {err}", self.program)
    }
}
