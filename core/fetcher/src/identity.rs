//! Persisted client identifier sent with every slot connection.

use fs_err as fs;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// Reads the identifier stored at `path`, creating one if the file is missing
/// or empty. Returns an empty string if the file can be neither read nor
/// written; the server accepts an empty identifier.
pub fn load_or_create(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => return content.trim().to_string(),
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(error = %err, "Failed to read client identifier");
            return String::new();
        }
    }

    let id = Uuid::new_v4().to_string();
    match store(path, &id) {
        Ok(()) => {
            info!(path = %path.display(), "Created client identifier");
            id
        }
        Err(err) => {
            warn!(error = %err, "Failed to persist client identifier");
            String::new()
        }
    }
}

fn store(path: &Path, id: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, id)
}
