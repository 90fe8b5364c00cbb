use std::path::{Path, PathBuf};

use serde_json::Value;

/// Loads the Dockerflow `version.json` written next to the binary at build
/// time.
///
/// Returns an empty object when the file is missing or unreadable; the
/// `/__version__` endpoint then serves `{}` instead of failing.
pub fn version_info(basedir: Option<&PathBuf>) -> Value {
    let dir = match basedir {
        Some(dir) => dir.clone(),
        None => std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_default(),
    };

    let path = dir.join("version.json");
    match std::fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|error| {
            intake_log::warn!("malformed version.json at {}: {error}", path.display());
            Value::Object(Default::default())
        }),
        Err(_) => Value::Object(Default::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_empty_object() {
        let info = version_info(Some(&PathBuf::from("/nonexistent")));
        assert_eq!(info, serde_json::json!({}));
    }
}
