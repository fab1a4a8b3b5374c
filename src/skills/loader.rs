use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::skills::types::{SkillEntry, SkillFrontmatter};

/// Front-matter is expected within the first lines of a document.
pub const FRONTMATTER_LINE_BUDGET: usize = 30;

const SKILL_EXTENSION: &str = "md";

static HEAD_FRONTMATTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^---[ \t]*\n(.*?)\n---[ \t]*(?:\n|$)").expect("valid head frontmatter regex")
});
static BODY_FRONTMATTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^---[ \t]*\n(.*?)\n---[ \t]*(?:\n(.*))?$")
        .expect("valid body frontmatter regex")
});
static BLANK_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid blank run regex"));

fn normalize_newlines(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').replace("\r\n", "\n")
}

pub fn file_stem_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

/// Reads lines until the closing marker or the line budget, whichever comes first.
fn read_head(path: &Path) -> Result<String> {
    let file = File::open(path)
        .map_err(|err| anyhow!("Failed to open skill file '{}': {}", path.display(), err))?;
    let mut reader = BufReader::new(file);
    let mut head = String::new();
    let mut line = String::new();
    for index in 0..FRONTMATTER_LINE_BUDGET {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|err| anyhow!("Failed to read skill file '{}': {}", path.display(), err))?;
        if read == 0 {
            break;
        }
        head.push_str(&line);
        if index > 0 && line.trim() == "---" {
            break;
        }
    }
    Ok(normalize_newlines(&head))
}

pub fn parse_frontmatter_block(head: &str) -> Result<Option<SkillFrontmatter>> {
    let Some(captures) = HEAD_FRONTMATTER_RE.captures(head) else {
        return Ok(None);
    };
    let yaml_text = captures.get(1).map(|m| m.as_str()).unwrap_or("");
    let frontmatter: SkillFrontmatter = serde_yaml::from_str(yaml_text)
        .map_err(|err| anyhow!("Failed to parse skill frontmatter: {}", err))?;
    Ok(Some(frontmatter))
}

fn read_frontmatter(path: &Path) -> Result<Option<SkillFrontmatter>> {
    let head = read_head(path)?;
    parse_frontmatter_block(&head)
}

/// Never fails: a malformed document is indexed under its file stem with no description.
pub fn load_skill_entry(path: &Path) -> SkillEntry {
    let fallback_name = file_stem_name(path);
    let frontmatter = match read_frontmatter(path) {
        Ok(value) => value.unwrap_or_default(),
        Err(err) => {
            warn!("Failed to parse frontmatter for {}: {}", path.display(), err);
            SkillFrontmatter::default()
        }
    };

    let name = frontmatter
        .name
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or(fallback_name);
    let description = frontmatter
        .description
        .map(|value| value.trim().to_string())
        .unwrap_or_default();

    SkillEntry {
        name,
        description,
        path: path.to_path_buf(),
    }
}

pub fn strip_frontmatter(raw: &str) -> String {
    let normalized = normalize_newlines(raw);
    let body = match BODY_FRONTMATTER_RE.captures(&normalized) {
        Some(captures) => captures
            .get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        None => normalized.clone(),
    };
    BLANK_RUN_RE
        .replace_all(body.trim(), "\n\n")
        .into_owned()
}

pub fn read_skill_body(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(raw) => strip_frontmatter(&raw),
        Err(err) => {
            warn!("Failed to read skill body '{}': {}", path.display(), err);
            String::new()
        }
    }
}

pub fn sorted_skill_paths(skills_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(skills_dir).map_err(|err| {
        anyhow!(
            "Failed to read skills directory '{}': {}",
            skills_dir.display(),
            err
        )
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|err| anyhow!("Failed to read skills directory entry: {}", err))?;
        let path = entry.path();
        let is_skill_document = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(SKILL_EXTENSION))
            .unwrap_or(false);
        if path.is_file() && is_skill_document {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
