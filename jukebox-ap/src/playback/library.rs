//! Music directory listing

use crate::error::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

fn is_mp3(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"))
}

/// Sorted `.mp3` files directly inside `music_dir`
///
/// A missing directory is an empty library.
pub fn list_tracks(music_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(music_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut tracks = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && is_mp3(&path) {
            tracks.push(path);
        }
    }
    tracks.sort();
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lists_only_mp3_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["b.mp3", "a.MP3", "cover.jpg", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.mp3")).unwrap();

        let tracks = list_tracks(dir.path()).unwrap();
        assert_eq!(
            tracks,
            vec![dir.path().join("a.MP3"), dir.path().join("b.mp3")]
        );
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(list_tracks(&dir.path().join("music")).unwrap().is_empty());
    }
}
