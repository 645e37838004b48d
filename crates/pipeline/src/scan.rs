use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use walkdir::WalkDir;
use crate::sidecar;

/// Result of scanning one `.mkv` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// File should be converted (path, size in bytes)
    Candidate(PathBuf, u64),
    /// File is left alone (path, reason)
    Skipped(PathBuf, String),
}

pub fn is_mkv(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case("mkv"))
        .unwrap_or(false)
}

/// Walk library roots for `.mkv` files that still need converting
pub fn scan_library(roots: &[PathBuf]) -> Vec<ScanResult> {
    let mut results = Vec::new();
    let mut files_checked = 0usize;

    for root in roots {
        if !root.exists() {
            warn!("Library root does not exist: {}", root.display());
            continue;
        }

        info!("Scanning directory: {}", root.display());
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() || !is_mkv(path) {
                continue;
            }
            files_checked += 1;

            if path.with_extension("mp4").exists() {
                results.push(ScanResult::Skipped(path.to_path_buf(), "mp4 already exists".to_string()));
                continue;
            }

            if sidecar::has_skip_marker(path) {
                results.push(ScanResult::Skipped(
                    path.to_path_buf(),
                    format!("skip marker (.{}) exists", sidecar::SKIP_MARKER_EXTENSION),
                ));
                continue;
            }

            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    warn!("Failed to stat {}: {}", path.display(), e);
                    continue;
                }
            };
            debug!("Found candidate: {} ({} bytes)", path.display(), size);
            results.push(ScanResult::Candidate(path.to_path_buf(), size));
        }
    }

    let candidates = results
        .iter()
        .filter(|r| matches!(r, ScanResult::Candidate(..)))
        .count();
    info!(
        "Scan complete: {} mkv files checked, {} candidates",
        files_checked, candidates
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_only_unconverted_unmarked_mkv() {
        let dir = tempfile::tempdir().unwrap();
        let movie_dir = dir.path().join("Old Movie (1985)");
        fs::create_dir_all(&movie_dir).unwrap();

        let todo = movie_dir.join("todo.mkv");
        let done = movie_dir.join("done.mkv");
        let refused = movie_dir.join("refused.MKV");
        fs::write(&todo, b"1234").unwrap();
        fs::write(&done, b"x").unwrap();
        fs::write(movie_dir.join("done.mp4"), b"x").unwrap();
        fs::write(&refused, b"x").unwrap();
        sidecar::write_skip(&refused, "AV1").unwrap();
        fs::write(movie_dir.join("notes.txt"), b"x").unwrap();

        let mut results = scan_library(&[dir.path().to_path_buf(), dir.path().join("missing")]);
        results.sort_by_key(|r| match r {
            ScanResult::Candidate(p, _) | ScanResult::Skipped(p, _) => p.clone(),
        });

        assert_eq!(results.len(), 3);
        assert!(results.contains(&ScanResult::Candidate(todo, 4)));
        assert!(results.contains(&ScanResult::Skipped(done, "mp4 already exists".to_string())));
        assert!(results
            .iter()
            .any(|r| matches!(r, ScanResult::Skipped(p, reason) if p == &refused && reason.contains("mkv2mp4skip"))));
    }
}
