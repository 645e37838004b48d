use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

/// Extension of the marker left next to files the planner refused
pub const SKIP_MARKER_EXTENSION: &str = "mkv2mp4skip";

/// Path of the skip marker for a media file (`Movie.mkv` -> `Movie.mkv2mp4skip`)
pub fn skip_marker_path(file_path: &Path) -> PathBuf {
    file_path.with_extension(SKIP_MARKER_EXTENSION)
}

pub fn has_skip_marker(file_path: &Path) -> bool {
    skip_marker_path(file_path).exists()
}

pub fn why_txt_path(file_path: &Path) -> PathBuf {
    file_path.with_extension("why.txt")
}

/// Mark a file as refused: an empty skip marker plus a why.txt carrying the reason
pub fn write_skip(file_path: &Path, reason: &str) -> Result<()> {
    let skip_path = skip_marker_path(file_path);
    fs::write(&skip_path, "")
        .with_context(|| format!("Failed to write skip marker: {}", skip_path.display()))?;

    let why_path = why_txt_path(file_path);
    fs::write(&why_path, format!("{}\n", reason))
        .with_context(|| format!("Failed to write why.txt: {}", why_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_paths_replace_the_extension() {
        let file = Path::new("/m/Film (2001)/Film.2001.AV1-GRP.mkv");
        assert_eq!(
            skip_marker_path(file),
            PathBuf::from("/m/Film (2001)/Film.2001.AV1-GRP.mkv2mp4skip")
        );
        assert_eq!(why_txt_path(file), PathBuf::from("/m/Film (2001)/Film.2001.AV1-GRP.why.txt"));
    }

    #[test]
    fn write_skip_creates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        fs::write(&file, b"x").unwrap();

        assert!(!has_skip_marker(&file));
        write_skip(&file, "AV1 re-encoding too slow (48+ hours)").unwrap();
        assert!(has_skip_marker(&file));
        assert_eq!(
            fs::read_to_string(why_txt_path(&file)).unwrap().trim(),
            "AV1 re-encoding too slow (48+ hours)"
        );
    }
}
