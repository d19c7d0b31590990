//! Fragment cache for rendered widgets.
//!
//! A widget call is identified by its arguments, the output form, the active
//! locale and the widget's template and type. The [`CacheGate`] turns that
//! identity into a [`CacheKey`] and serves the stored output, or computes and
//! stores it on a miss.
//!
//! Invalidation goes by tag. Drivers that can scope entries by tag flush them
//! directly. For the others each tag carries a token that is mixed into every
//! key; rotating the token orphans the old entries until they expire.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! driver = "memory"        # memory | array | file
//! memory_capacity = 1000
//! file_directory = "storage/fragcache"
//! default_locale = "en"
//! ```

mod backend;
mod config;
mod error;
mod file;
mod finite;
mod flight;
mod gate;
mod keys;
mod locale;
mod lock;
mod memory;
mod policy;
mod tags;
mod widget;

pub use backend::{Backend, CacheBackend, TaggedCache};
pub use config::{CacheConfig, driver_supports_tags};
pub use error::CacheError;
pub use file::FileBackend;
pub use gate::CacheGate;
pub use keys::{CacheKey, KeyDeriver, digest_hex};
pub use locale::{FixedLocale, LocaleProvider, TaskLocale, with_locale};
pub use memory::MemoryBackend;
pub use policy::{CachePolicy, SettingsPolicy};
pub use tags::{TagTokenStore, TokenStorage};
pub use widget::{ArgValue, CallArgs, DependencyFn, KeyFn, OutputForm, Widget};
