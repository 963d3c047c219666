//! The set of images the operator steps through.

use std::path::{Path, PathBuf};

/// Ordered image paths with a wrap-around cursor.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    items: Vec<PathBuf>,
    index: usize,
}

impl Playlist {
    /// A playlist positioned on the first item.
    pub fn new(items: Vec<PathBuf>) -> Self {
        Self { items, index: 0 }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 0-based cursor position.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&Path> {
        self.items.get(self.index).map(PathBuf::as_path)
    }

    /// Advance, wrapping from the last item to the first.
    pub fn next(&mut self) -> Option<&Path> {
        if self.items.is_empty() {
            return None;
        }
        self.index = (self.index + 1) % self.items.len();
        self.current()
    }

    /// Step back, wrapping from the first item to the last.
    pub fn prev(&mut self) -> Option<&Path> {
        if self.items.is_empty() {
            return None;
        }
        self.index = (self.index + self.items.len() - 1) % self.items.len();
        self.current()
    }

    /// `name (i/n)` for the current item.
    pub fn label(&self) -> Option<String> {
        let path = self.current()?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Some(format!("{name} ({}/{})", self.index + 1, self.items.len()))
    }
}
