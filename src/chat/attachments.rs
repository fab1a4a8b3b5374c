use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

const ATTACHMENTS_HEADER: &str = "\n\n### User Provided Files:\n";
const SNIFF_BYTES: usize = 1024;

/// Extensions never read as text, whatever their content looks like.
const BINARY_EXTENSIONS: &[&str] = &[
    "dll", "exe", "so", "dylib", "png", "jpg", "jpeg", "tga", "psd", "fbx", "obj", "blend",
    "unity", "asset", "prefab", "mat", "meta", "cache", "pdf", "zip", "7z",
];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

fn resolve(raw: &str, project_root: Option<&str>) -> PathBuf {
    let path = PathBuf::from(raw);
    match project_root {
        Some(root) if !root.trim().is_empty() && path.is_relative() => Path::new(root).join(path),
        _ => path,
    }
}

fn sniff(path: &Path) -> Vec<u8> {
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    if let Ok(file) = fs::File::open(path) {
        let _ = file.take(SNIFF_BYTES as u64).read_to_end(&mut head);
    }
    head
}

fn is_binary(path: &Path) -> bool {
    if let Some(ext) = extension_of(path) {
        if BINARY_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
    }
    let head = sniff(path);
    if head.contains(&0) {
        return true;
    }
    match infer::get(&head) {
        Some(kind) => !kind.mime_type().starts_with("text/"),
        None => false,
    }
}

/// Formats readable text attachments as extra prompt context.
///
/// `raw_paths` are shown to the model as given; relative ones are looked up under
/// `project_root`. Returns an empty string when no file could be included.
pub fn collect_attachment_context(raw_paths: &[String], project_root: Option<&str>) -> String {
    let mut sections = Vec::new();

    for raw in raw_paths {
        let full_path = resolve(raw, project_root);
        if !full_path.is_file() {
            debug!("Skipping attachment that is not a file: {}", full_path.display());
            continue;
        }
        if is_binary(&full_path) {
            warn!("Skipped binary attachment: {}", raw);
            continue;
        }

        let bytes = match fs::read(&full_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Failed to read attachment {}: {}", raw, err);
                continue;
            }
        };
        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(_) => {
                warn!("Skipped non-UTF-8 attachment: {}", raw);
                continue;
            }
        };

        let tag = extension_of(Path::new(raw)).unwrap_or_else(|| "text".to_string());
        sections.push(format!("\nFile: {raw}\n```{tag}\n{content}\n```\n"));
    }

    if sections.is_empty() {
        return String::new();
    }
    format!("{ATTACHMENTS_HEADER}{}", sections.concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn relative_paths_resolve_under_project_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Assets")).unwrap();
        fs::write(dir.path().join("Assets/Player.CS"), "class Player {}").unwrap();

        let root = dir.path().to_string_lossy().to_string();
        let context = collect_attachment_context(&paths(&["Assets/Player.CS"]), Some(&root));
        assert_eq!(
            context,
            "\n\n### User Provided Files:\n\nFile: Assets/Player.CS\n```cs\nclass Player {}\n```\n"
        );
    }

    #[test]
    fn missing_extension_is_tagged_text() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("NOTES");
        fs::write(&file, "remember").unwrap();
        let raw = file.to_string_lossy().to_string();
        let context = collect_attachment_context(&[raw.clone()], None);
        assert!(context.contains(&format!("File: {raw}\n```text\nremember\n```")));
    }

    #[test]
    fn binary_and_missing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tex.png"), "not really a png").unwrap();
        fs::write(dir.path().join("blob.txt"), b"abc\0def").unwrap();
        fs::write(dir.path().join("latin1.txt"), [0x63, 0x61, 0x66, 0xe9]).unwrap();
        fs::write(
            dir.path().join("sneaky.txt"),
            [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3],
        )
        .unwrap();

        let root = dir.path().to_string_lossy().to_string();
        let context = collect_attachment_context(
            &paths(&["tex.png", "blob.txt", "latin1.txt", "sneaky.txt", "gone.cs"]),
            Some(&root),
        );
        assert_eq!(context, "");
    }

    #[test]
    fn only_valid_files_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1").unwrap();
        fs::write(dir.path().join("b.meta"), "guid: 1").unwrap();
        let root = dir.path().to_string_lossy().to_string();

        let context = collect_attachment_context(&paths(&["a.py", "b.meta"]), Some(&root));
        assert!(context.starts_with(ATTACHMENTS_HEADER));
        assert!(context.contains("File: a.py\n```py\nx = 1\n```\n"));
        assert!(!context.contains("b.meta"));
    }

    #[test]
    fn no_paths_yields_empty_context() {
        assert_eq!(collect_attachment_context(&[], None), "");
    }
}
