//! Spatial memory: persisted `name -> {x, y}` table of device-space element
//! positions.
//!
//! Every operation is a whole-table load (and, for writes, modify + atomic
//! store), so entries taught from another process are visible on the next
//! lookup. A missing or corrupt file reads as an empty table.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{OrdenadorError, OrdenadorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

pub struct SpatialMemory {
    path: PathBuf,
}

impl SpatialMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self, name: &str) -> Option<Point> {
        self.load().get(name.trim()).copied()
    }

    /// Create or overwrite `name`.
    pub fn remember(&self, name: &str, point: Point) -> OrdenadorResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OrdenadorError::Memory("element name must not be empty".into()));
        }
        let mut table = self.load();
        table.insert(name.to_string(), point);
        self.store(&table)?;
        tracing::info!(element = %name, x = point.x, y = point.y, "element position stored");
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub fn forget(&self, name: &str) -> OrdenadorResult<bool> {
        let mut table = self.load();
        let removed = table.remove(name.trim()).is_some();
        if removed {
            self.store(&table)?;
            tracing::info!(element = %name.trim(), "element position forgotten");
        }
        Ok(removed)
    }

    pub fn entries(&self) -> BTreeMap<String, Point> {
        self.load()
    }

    fn load(&self) -> BTreeMap<String, Point> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "spatial memory unreadable");
                return BTreeMap::new();
            }
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map
                .into_iter()
                .filter_map(|(name, coords)| {
                    let x = coords.get("x").and_then(Value::as_f64)?;
                    let y = coords.get("y").and_then(Value::as_f64)?;
                    Some((name, Point::new(x as i32, y as i32)))
                })
                .collect(),
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "spatial memory corrupt, ignoring");
                BTreeMap::new()
            }
        }
    }

    /// Write to a temp file beside the target, then rename over it.
    fn store(&self, table: &BTreeMap<String, Point>) -> OrdenadorResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, table)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| OrdenadorError::Memory(format!("replace {}: {}", self.path.display(), e.error)))?;
        Ok(())
    }
}

/// Best-effort element name from an instruction: the first quoted substring,
/// trying single quotes before double quotes.
pub fn extract_quoted_name(text: &str) -> Option<String> {
    ['\'', '"'].iter().find_map(|quote| {
        let mut parts = text.split(*quote);
        let _before = parts.next()?;
        let inner = parts.next()?;
        parts.next()?;
        let candidate = inner.trim();
        (!candidate.is_empty()).then(|| candidate.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> (tempfile::TempDir, SpatialMemory) {
        let dir = tempfile::tempdir().unwrap();
        let mem = SpatialMemory::new(dir.path().join("nested").join("gui_elements.json"));
        (dir, mem)
    }

    #[test]
    fn missing_file_is_empty() {
        let (_dir, mem) = memory();
        assert!(mem.entries().is_empty());
        assert_eq!(mem.lookup("Start Menu"), None);
    }

    #[test]
    fn remember_then_lookup() {
        let (_dir, mem) = memory();
        mem.remember("Start Menu", Point::new(50, 1050)).unwrap();
        assert_eq!(mem.lookup("Start Menu"), Some(Point::new(50, 1050)));
        assert_eq!(mem.lookup(" Start Menu "), Some(Point::new(50, 1050)));
    }

    #[test]
    fn teaching_twice_keeps_single_latest_entry() {
        let (_dir, mem) = memory();
        mem.remember("Browser", Point::new(1, 2)).unwrap();
        mem.remember("Browser", Point::new(300, 400)).unwrap();
        let entries = mem.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["Browser"], Point::new(300, 400));
    }

    #[test]
    fn corrupt_file_is_discarded() {
        let (_dir, mem) = memory();
        std::fs::create_dir_all(mem.path().parent().unwrap()).unwrap();
        std::fs::write(mem.path(), "{ not json").unwrap();
        assert!(mem.entries().is_empty());

        mem.remember("Mail", Point::new(7, 8)).unwrap();
        assert_eq!(mem.lookup("Mail"), Some(Point::new(7, 8)));
    }

    #[test]
    fn invalid_entries_are_skipped() {
        let (_dir, mem) = memory();
        std::fs::create_dir_all(mem.path().parent().unwrap()).unwrap();
        std::fs::write(
            mem.path(),
            r#"{"ok": {"x": 1.9, "y": 2}, "bad": {"x": "a", "y": 1}, "partial": {"x": 3}}"#,
        )
        .unwrap();
        let entries = mem.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["ok"], Point::new(1, 2));
    }

    #[test]
    fn file_format_is_flat_name_to_xy() {
        let (_dir, mem) = memory();
        mem.remember("Search", Point::new(10, 20)).unwrap();
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(mem.path()).unwrap()).unwrap();
        assert_eq!(raw["Search"]["x"], 10);
        assert_eq!(raw["Search"]["y"], 20);
    }

    #[test]
    fn forget_removes_entry() {
        let (_dir, mem) = memory();
        mem.remember("A", Point::new(1, 1)).unwrap();
        assert!(mem.forget("A").unwrap());
        assert!(!mem.forget("A").unwrap());
        assert_eq!(mem.lookup("A"), None);
    }

    #[test]
    fn empty_name_is_rejected() {
        let (_dir, mem) = memory();
        assert!(mem.remember("  ", Point::new(1, 1)).is_err());
    }

    #[test]
    fn quoted_name_heuristic() {
        assert_eq!(extract_quoted_name("open the 'Start Menu' please"), Some("Start Menu".into()));
        assert_eq!(extract_quoted_name(r#"click "Mail" now"#), Some("Mail".into()));
        assert_eq!(extract_quoted_name("it's broken"), None);
        assert_eq!(extract_quoted_name("no quotes at all"), None);
        assert_eq!(extract_quoted_name("empty '' quotes"), None);
    }
}
