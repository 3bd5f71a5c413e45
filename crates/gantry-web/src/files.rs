//! Static file service and directory listings.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use serde_json::json;
use tokio::fs::File;

use gantry_core::constants::{
    FOUR04_PAGE_FILE, INDEX_PAGE_FILE, MAX_WEB_FILENAME_LEN, OLD_INDEX_PAGE_FILE,
};

/// A file picked for sending.
pub struct WebFile {
    pub file: File,
    pub length: u64,
    /// Serve with `Content-Encoding: gzip`.
    pub gzipped: bool,
    /// Name the content type is derived from.
    pub name: String,
}

/// Resolve a client-supplied name under `root`. Leading slashes are
/// stripped; parent components are refused.
pub fn resolve(root: &Path, name: &str) -> Option<PathBuf> {
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        return None;
    }
    let relative = Path::new(name);
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            _ => return None,
        }
    }
    Some(root.join(relative))
}

async fn try_open(path: PathBuf) -> Option<(File, u64)> {
    let file = File::open(path).await.ok()?;
    let meta = file.metadata().await.ok()?;
    if !meta.is_file() {
        return None;
    }
    Some((file, meta.len()))
}

fn ends_with_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Find the web file to serve for `requested`.
///
/// The empty name maps to the index page. A gzipped sibling takes
/// precedence unless the name already ends in `.gz`. A missing index
/// falls back to the old index page; a missing dotless name retries as
/// the index; a missing `.htm`/`.html` page serves the 404 page.
/// `None` means nothing could be opened and the request is rejected.
pub async fn open_web_file(web_dir: &Path, requested: &str) -> Option<WebFile> {
    let mut name = requested.trim_start_matches('/').to_string();
    if name.is_empty() {
        name = INDEX_PAGE_FILE.to_string();
    }

    let mut opened = None;
    if name.len() <= MAX_WEB_FILENAME_LEN {
        loop {
            let Some(path) = resolve(web_dir, &name) else {
                break;
            };
            // Try a gzipped version of the file first.
            if !ends_with_ignore_case(&name, ".gz") {
                let mut gz_path = path.clone().into_os_string();
                gz_path.push(".gz");
                if let Some((file, length)) = try_open(gz_path.into()).await {
                    opened = Some((file, length, true));
                    break;
                }
            }

            if let Some((file, length)) = try_open(path).await {
                opened = Some((file, length, false));
                break;
            }

            if name.eq_ignore_ascii_case(INDEX_PAGE_FILE) {
                // The index page is missing; try the old one.
                name = OLD_INDEX_PAGE_FILE.to_string();
            } else if !name.contains('.') {
                // A dotless name falls back to the index page.
                name = INDEX_PAGE_FILE.to_string();
            } else {
                break;
            }
        }
    }

    // An HTML page that could not be found gets the 404 page.
    if opened.is_none()
        && (ends_with_ignore_case(&name, ".html") || ends_with_ignore_case(&name, ".htm"))
    {
        name = FOUR04_PAGE_FILE.to_string();
        if let Some((file, length)) = try_open(web_dir.join(&name)).await {
            opened = Some((file, length, false));
        }
    }

    let (file, length, gzipped) = opened?;
    Some(WebFile {
        file,
        length,
        gzipped,
        name,
    })
}

/// Content type by extension.
pub fn content_type(name: &str) -> &'static str {
    if ends_with_ignore_case(name, ".png") {
        "image/png"
    } else if ends_with_ignore_case(name, ".ico") {
        "image/x-icon"
    } else if ends_with_ignore_case(name, ".js") {
        "application/javascript"
    } else if ends_with_ignore_case(name, ".css") {
        "text/css"
    } else if ends_with_ignore_case(name, ".htm") || ends_with_ignore_case(name, ".html") {
        "text/html"
    } else if ends_with_ignore_case(name, ".zip") {
        // The content encoding here is not gzip; just the type.
        "application/zip"
    } else if ends_with_ignore_case(name, ".g")
        || ends_with_ignore_case(name, ".gc")
        || ends_with_ignore_case(name, ".gcode")
    {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

fn file_date(meta: &std::fs::Metadata) -> String {
    meta.modified()
        .map(|t| {
            DateTime::<Local>::from(t)
                .format("%Y-%m-%dT%H:%M:%S")
                .to_string()
        })
        .unwrap_or_default()
}

/// Detailed directory listing for rr_filelist.
pub fn filelist_json(root: &Path, dir: &str, first: u32) -> String {
    let Some(path) = resolve(root, dir) else {
        return json!({"dir": dir, "err": 1}).to_string();
    };
    let Ok(entries) = std::fs::read_dir(&path) else {
        return json!({"dir": dir, "err": 1}).to_string();
    };

    let mut files = Vec::new();
    for entry in entries.flatten().skip(first as usize) {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        files.push(json!({
            "type": if meta.is_dir() { "d" } else { "f" },
            "name": entry.file_name().to_string_lossy(),
            "size": meta.len(),
            "date": file_date(&meta),
        }));
    }

    json!({"dir": dir, "first": first, "files": files, "next": 0, "err": 0}).to_string()
}

/// Flat name listing for rr_files.
pub fn files_json(root: &Path, dir: &str, first: u32, flag_dirs: bool) -> String {
    let Some(path) = resolve(root, dir) else {
        return json!({"dir": dir, "err": 1}).to_string();
    };
    let Ok(entries) = std::fs::read_dir(&path) else {
        return json!({"dir": dir, "err": 1}).to_string();
    };

    let mut files = Vec::new();
    for entry in entries.flatten().skip(first as usize) {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.metadata().map(|m| m.is_dir()).unwrap_or(false);
        if flag_dirs && is_dir {
            files.push(format!("*{name}"));
        } else {
            files.push(name);
        }
    }

    json!({"dir": dir, "first": first, "files": files, "next": 0, "err": 0}).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_strips_leading_slash() {
        let root = Path::new("/data");
        assert_eq!(resolve(root, "/a/b.g"), Some(PathBuf::from("/data/a/b.g")));
        assert_eq!(resolve(root, "a.g"), Some(PathBuf::from("/data/a.g")));
    }

    #[test]
    fn resolve_refuses_parent_components() {
        let root = Path::new("/data");
        assert_eq!(resolve(root, "../etc/passwd"), None);
        assert_eq!(resolve(root, "a/../../b"), None);
        assert_eq!(resolve(root, "/"), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type("logo.PNG"), "image/png");
        assert_eq!(content_type("favicon.ico"), "image/x-icon");
        assert_eq!(content_type("app.js"), "application/javascript");
        assert_eq!(content_type("style.css"), "text/css");
        assert_eq!(content_type("index.html"), "text/html");
        assert_eq!(content_type("page.htm"), "text/html");
        assert_eq!(content_type("bundle.zip"), "application/zip");
        assert_eq!(content_type("part.gcode"), "text/plain");
        assert_eq!(content_type("part.g"), "text/plain");
        assert_eq!(content_type("unknown.bin"), "application/octet-stream");
    }

    #[tokio::test]
    async fn gzip_sibling_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js"), b"plain").unwrap();
        std::fs::write(dir.path().join("app.js.gz"), b"gzipped").unwrap();

        let found = open_web_file(dir.path(), "/app.js").await.unwrap();
        assert!(found.gzipped);
        assert_eq!(found.length, 7);
    }

    #[tokio::test]
    async fn plain_file_served_without_gz_sibling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js"), b"plain").unwrap();

        let found = open_web_file(dir.path(), "/app.js").await.unwrap();
        assert!(!found.gzipped);
        assert_eq!(found.length, 5);
    }

    #[tokio::test]
    async fn empty_name_serves_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_PAGE_FILE), b"<html>").unwrap();

        let found = open_web_file(dir.path(), "/").await.unwrap();
        assert_eq!(found.name, INDEX_PAGE_FILE);
    }

    #[tokio::test]
    async fn missing_index_falls_back_to_old_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(OLD_INDEX_PAGE_FILE), b"<html>").unwrap();

        let found = open_web_file(dir.path(), "").await.unwrap();
        assert_eq!(found.name, OLD_INDEX_PAGE_FILE);
    }

    #[tokio::test]
    async fn dotless_name_retries_as_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_PAGE_FILE), b"<html>").unwrap();

        let found = open_web_file(dir.path(), "/dashboard").await.unwrap();
        assert_eq!(found.name, INDEX_PAGE_FILE);
    }

    #[tokio::test]
    async fn missing_html_page_serves_404_page() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FOUR04_PAGE_FILE), b"gone").unwrap();

        let found = open_web_file(dir.path(), "/nope.html").await.unwrap();
        assert_eq!(found.name, FOUR04_PAGE_FILE);
    }

    #[tokio::test]
    async fn missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_web_file(dir.path(), "/nope.bin").await.is_none());
    }

    #[tokio::test]
    async fn overlong_name_not_served() {
        let dir = tempfile::tempdir().unwrap();
        let long = format!("/{}.bin", "x".repeat(MAX_WEB_FILENAME_LEN + 1));
        assert!(open_web_file(dir.path(), &long).await.is_none());
    }

    #[test]
    fn filelist_reports_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("gcodes")).unwrap();
        std::fs::write(dir.path().join("gcodes/part.g"), b"G28\n").unwrap();
        std::fs::create_dir(dir.path().join("gcodes/sub")).unwrap();

        let listing = filelist_json(dir.path(), "gcodes", 0);
        let parsed: serde_json::Value = serde_json::from_str(&listing).unwrap();
        assert_eq!(parsed["err"], 0);
        let files = parsed["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f["name"] == "part.g" && f["type"] == "f"));
        assert!(files.iter().any(|f| f["name"] == "sub" && f["type"] == "d"));
    }

    #[test]
    fn filelist_missing_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let listing = filelist_json(dir.path(), "nope", 0);
        let parsed: serde_json::Value = serde_json::from_str(&listing).unwrap();
        assert_eq!(parsed["err"], 1);
    }

    #[test]
    fn files_flags_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("gcodes")).unwrap();
        std::fs::write(dir.path().join("gcodes/a.g"), b"").unwrap();
        std::fs::create_dir(dir.path().join("gcodes/macros")).unwrap();

        let listing = files_json(dir.path(), "gcodes", 0, true);
        let parsed: serde_json::Value = serde_json::from_str(&listing).unwrap();
        let files: Vec<String> = parsed["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(files.contains(&"a.g".to_string()));
        assert!(files.contains(&"*macros".to_string()));
    }
}
