pub mod analyze;
pub mod model;

pub use analyze::{equivalent_addresses, find_equivalent_addresses, pattern_occurrences, reverse_edges, Edge, EdgeKind};
pub use model::{load_rom, Rom};
