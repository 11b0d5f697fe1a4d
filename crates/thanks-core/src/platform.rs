use std::path::PathBuf;

/// Default User-Agent for page fetches. The platform serves a stripped page
/// without `ytInitialData` to unknown clients.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/thanks/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("thanks")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thanks")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("thanks")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thanks")
    }
}

/// Default screen capture command for the current OS. `{path}` is replaced
/// with the output file.
pub fn default_capture_command() -> (String, Vec<String>) {
    #[cfg(target_os = "macos")]
    {
        (
            "screencapture".to_string(),
            vec!["-x".to_string(), "{path}".to_string()],
        )
    }
    #[cfg(not(target_os = "macos"))]
    {
        (
            "import".to_string(),
            vec![
                "-window".to_string(),
                "root".to_string(),
                "{path}".to_string(),
            ],
        )
    }
}

/// Write `content` to a sibling temp file, then rename it over `path`.
/// Readers see either the old file or the new one, never a truncated mix.
pub fn write_atomic(path: &std::path::Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = std::fs::write(&tmp, content).and_then(|_| std::fs::rename(&tmp, path));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}
