//! # Cache Providers
//!
//! The individual cache tier implementations.

pub use self::file::FileCache;
pub use self::memory::MemoryCache;
pub use self::provider::CacheProvider;
pub use self::remote::RemoteCache;

pub mod provider;

pub mod file;
pub mod memory;
pub mod remote;
