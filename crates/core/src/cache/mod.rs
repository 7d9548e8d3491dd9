pub mod builder;
pub mod error;
pub mod lookup;

pub use builder::{build_cache, CacheBuild, CacheInputs, CacheRunSummary};
pub use error::FundComputationError;
pub use lookup::CacheIndex;
