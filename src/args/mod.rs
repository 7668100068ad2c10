//! Command-line flags for the `volley` binary.
mod cli;
mod parsers;

#[cfg(test)]
mod tests;

pub use cli::CliArgs;
