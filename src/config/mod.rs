//! Configuration
//!
//! Settings are loaded once at process start and passed by reference into
//! each component's constructor. There is no global configuration state.

mod settings;

pub use settings::{
    ApiSettings, BusSettings, DatabaseSettings, FetchSettings, Settings, StorageSettings,
    StreamSettings, UniverseSettings,
};
