pub mod cli;
pub mod config;
#[cfg(test)]
mod tests;
