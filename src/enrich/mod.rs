// In-place enrichment of knowledge-base rows. Each enricher fills exactly
// one NULL column family and never overwrites existing values, so the three
// can run in any order with the same end state.

pub mod embedding;
pub mod outcome;
pub mod sentiment;
