pub mod database;
pub mod message_store;

pub use message_store::{MessageStore, StoreError};

use std::fs;
use std::path::Path;

/// Ensure the parent directory of a database path exists.
pub fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
