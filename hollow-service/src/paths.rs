use std::path::{Path, PathBuf};

/// Default loopback port when `ServicePort` has never been overridden.
pub const DEFAULT_PORT: u16 = 49374;

pub const SETTINGS_FILE: &str = "settings.xml";

pub fn hollow_root(home: &Path) -> PathBuf {
    home.join(".hollow")
}

pub fn settings_path(home: &Path) -> PathBuf {
    hollow_root(home).join(SETTINGS_FILE)
}
