//! Configuration loading, validation and profile management for tomclient.
//!
//! Uses figment to layer `config.json` (and the profile it includes) over
//! sensible defaults, then applies `TOM_*` environment overrides.

mod fs;
pub mod paths;
pub mod profiles;
pub mod schema;

pub use paths::{CONFIG_FILE_NAME, config_dir};
pub use profiles::{
    current_profile, file_name as profile_file_name, list_profiles, load_profile, save_profile,
    set_current_profile,
};
pub use schema::{AuthMode, Config, DEFAULT_API_KEY_HEADER};
