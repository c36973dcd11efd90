pub mod tier_writer;

pub use tier_writer::{TierPolicy, TierWriter};
