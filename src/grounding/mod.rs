pub mod consensus;
pub mod engine;
pub mod formatter;
pub mod oracle;
pub mod refinement;
pub mod sampler;
pub mod types;
pub mod voting_grid;

#[cfg(test)]
pub(crate) mod testing;
