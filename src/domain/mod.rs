//! Domain layer - Core feed logic and models.
//!
//! Pure types and decisions for the simulated price feed: the random-walk
//! mutation engine, the exclusion set, feed configuration and the memory
//! hysteresis policy. No I/O here (hexagonal architecture inner ring).

pub mod exclusion;
pub mod feed;
pub mod memory;
pub mod price;

// Re-export core types for convenience
pub use exclusion::ExclusionSet;
pub use feed::{
    ConfigPatch, ConfigRejection, ConfigureOutcome, FeedConfig, FeedError, FeedPhase,
    TickReport, VariationBounds,
};
pub use memory::{ChunkPressure, MemoryDecision, MemoryPolicy, MemoryStatus};
pub use price::{
    FixedRandom, PriceRecord, RandomSource, SeededRandom, Symbol, ThreadRandom, mutate,
};
