pub mod cache;
pub mod xxhash;

pub use cache::HashCache;
pub use xxhash::{hash_data, hash_file, mtime_nanos};
