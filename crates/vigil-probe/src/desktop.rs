//! Product names from freedesktop `.desktop` entries.
//!
//! Maps a raw process name like `gimp` or `org.gnome.Maps` to the
//! human `Name=` value of a matching desktop entry. Lookups are
//! best-effort and cached, misses included; a resolver falls back to
//! its own normalization when this source stays silent.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use vigil_core::{ProcessId, ProductNameSource};

/// Desktop-entry backed [`ProductNameSource`].
pub struct DesktopEntrySource {
    roots: Vec<PathBuf>,
    cache: RefCell<HashMap<String, Option<String>>>,
}

impl DesktopEntrySource {
    /// Source over the standard application directories, including the
    /// user's own under `$HOME`.
    #[must_use]
    pub fn new() -> Self {
        let mut roots = vec![
            PathBuf::from("/usr/share/applications"),
            PathBuf::from("/usr/local/share/applications"),
        ];
        if let Some(home) = std::env::var_os("HOME") {
            roots.push(PathBuf::from(home).join(".local/share/applications"));
        }
        Self::with_roots(roots)
    }

    /// Source over explicit directories.
    #[must_use]
    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn lookup(&self, process: &str) -> Option<String> {
        let needle = process.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        for root in &self.roots {
            // Exact file names first.
            for candidate in [format!("{process}.desktop"), format!("{needle}.desktop")] {
                if let Some(name) = read_entry_name(&root.join(candidate)) {
                    return Some(name);
                }
            }
            // Reverse-DNS ids like org.gnome.Maps keep the app name in
            // the last segment.
            let Ok(entries) = fs::read_dir(root) else {
                continue;
            };
            for entry in entries.filter_map(Result::ok) {
                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                let Some(stem) = file_name.strip_suffix(".desktop") else {
                    continue;
                };
                let matches = stem
                    .rsplit('.')
                    .next()
                    .is_some_and(|last| last.eq_ignore_ascii_case(&needle));
                if matches {
                    if let Some(name) = read_entry_name(&entry.path()) {
                        return Some(name);
                    }
                }
            }
        }
        None
    }
}

impl Default for DesktopEntrySource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductNameSource for DesktopEntrySource {
    fn product_name(&self, process_name: &str, _pid: Option<ProcessId>) -> Option<String> {
        let key = process_name.trim().to_lowercase();
        if let Some(cached) = self.cache.borrow().get(&key) {
            return cached.clone();
        }
        let found = self.lookup(process_name);
        self.cache.borrow_mut().insert(key, found.clone());
        found
    }
}

fn read_entry_name(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    parse_entry_name(&contents)
}

/// Extracts the unlocalized `Name=` value from the `[Desktop Entry]`
/// section.
fn parse_entry_name(contents: &str) -> Option<String> {
    let mut in_entry = false;
    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_entry = line == "[Desktop Entry]";
            continue;
        }
        if in_entry {
            if let Some(value) = line.strip_prefix("Name=") {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
