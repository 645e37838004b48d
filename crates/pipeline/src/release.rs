//! Release metadata derived from a media file's path.
//!
//! These are filename heuristics and can be ambiguous (a source token such
//! as `.BluRay.mkv` also looks like a dotted group tag). The pattern order
//! below is the contract; changing it changes which publisher gets blamed
//! in the ledger.

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const UNKNOWN_PUBLISHER: &str = "Unknown";

static TITLE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*\((\d{4})\)").expect("title/year pattern is valid"));

/// Publisher patterns, tried in order; first match wins
static GROUP_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        // Movie.2024.1080p-GROUP.mkv
        Regex::new(r"-([A-Za-z0-9]+)(?:\.\w+)?$").expect("dash group pattern is valid"),
        // Movie.2024.1080p.GROUP.mkv
        Regex::new(r"\.([A-Z][A-Za-z0-9]+)(?:\.\w+)?$").expect("dotted group pattern is valid"),
        // [GROUP] Movie.mkv
        Regex::new(r"\[([A-Za-z0-9]+)\]").expect("bracket group pattern is valid"),
    ]
});

/// Acquisition origin of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    Remux,
    BluRay,
    WebDl,
    WebRip,
    Hdtv,
    DvdRip,
    Unknown,
}

/// Keyword table in priority order; matched case-insensitively against the file name
const SOURCE_KEYWORDS: &[(SourceType, &[&str])] = &[
    (SourceType::Remux, &["REMUX"]),
    (SourceType::BluRay, &["BLURAY", "BLU-RAY"]),
    (SourceType::WebDl, &["WEB-DL", "WEBDL"]),
    (SourceType::WebRip, &["WEBRIP", "WEB-RIP"]),
    (SourceType::Hdtv, &["HDTV"]),
    (SourceType::DvdRip, &["DVDRIP", "DVD-RIP"]),
];

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Remux => "REMUX",
            SourceType::BluRay => "BluRay",
            SourceType::WebDl => "WEB-DL",
            SourceType::WebRip => "WEBRip",
            SourceType::Hdtv => "HDTV",
            SourceType::DvdRip => "DVDRip",
            SourceType::Unknown => "Unknown",
        }
    }

    /// First keyword-table hit in the file name, `Unknown` otherwise
    pub fn detect(file_name: &str) -> Self {
        let upper = file_name.to_uppercase();
        SOURCE_KEYWORDS
            .iter()
            .find(|(_, tokens)| tokens.iter().any(|t| upper.contains(t)))
            .map(|(source, _)| *source)
            .unwrap_or(SourceType::Unknown)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Title and year from the parent directory, `"<Title> (<Year>)"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleYear {
    pub title: String,
    pub year: Option<i32>,
}

/// Everything the path tells us about a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub title: String,
    pub year: Option<i32>,
    pub publisher: String,
    pub source: SourceType,
    pub release_name: String,
}

impl ReleaseInfo {
    pub fn from_path(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        let TitleYear { title, year } = parse_title_year(path);

        ReleaseInfo {
            title,
            year,
            publisher: parse_publisher(&file_name),
            source: SourceType::detect(&file_name),
            release_name: file_name,
        }
    }
}

/// Parse title/year from the parent directory name. When the directory does
/// not follow the pattern the whole directory name becomes the title.
pub fn parse_title_year(path: &Path) -> TitleYear {
    let parent = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("");

    match TITLE_YEAR.captures(parent) {
        Some(caps) => TitleYear {
            title: caps[1].trim().to_string(),
            year: caps[2].parse().ok(),
        },
        None => TitleYear {
            title: parent.to_string(),
            year: None,
        },
    }
}

/// Release group from the file name, `Unknown` when no pattern matches
pub fn parse_publisher(file_name: &str) -> String {
    GROUP_PATTERNS
        .iter()
        .find_map(|re| re.captures(file_name).map(|caps| caps[1].to_string()))
        .unwrap_or_else(|| UNKNOWN_PUBLISHER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_the_reference_release() {
        let info = ReleaseInfo::from_path(Path::new(
            "/media/movies/Old Movie (1985)/Old.Movie.1985.1080p.BluRay-GRP.mkv",
        ));
        assert_eq!(info.title, "Old Movie");
        assert_eq!(info.year, Some(1985));
        assert_eq!(info.publisher, "GRP");
        assert_eq!(info.source, SourceType::BluRay);
        assert_eq!(info.release_name, "Old.Movie.1985.1080p.BluRay-GRP.mkv");
    }

    #[test]
    fn directory_without_year_becomes_title() {
        let ty = parse_title_year(Path::new("/media/Some Film/some.film.mkv"));
        assert_eq!(ty.title, "Some Film");
        assert_eq!(ty.year, None);
    }

    #[test]
    fn year_must_have_four_digits() {
        let ty = parse_title_year(Path::new("/media/Film (85)/film.mkv"));
        assert_eq!(ty.title, "Film (85)");
        assert_eq!(ty.year, None);
    }

    #[test]
    fn publisher_pattern_priority() {
        assert_eq!(parse_publisher("Movie.2024.1080p.WEB-DL-FLUX.mkv"), "FLUX");
        assert_eq!(parse_publisher("Movie.2024.1080p.x265.NTb.mkv"), "NTb");
        assert_eq!(parse_publisher("[YTS] Movie 2024.mkv"), "YTS");
        assert_eq!(parse_publisher("movie 2024.mkv"), UNKNOWN_PUBLISHER);
    }

    #[test]
    fn dotted_source_token_is_taken_as_publisher() {
        // Known ambiguity of the dotted pattern, kept on purpose
        assert_eq!(parse_publisher("Old.Movie.1985.1080p.BluRay.mkv"), "BluRay");
    }

    #[test]
    fn source_detection_follows_table_order() {
        assert_eq!(SourceType::detect("Movie.2160p.BluRay.REMUX-GRP.mkv"), SourceType::Remux);
        assert_eq!(SourceType::detect("movie.blu-ray.x264.mkv"), SourceType::BluRay);
        assert_eq!(SourceType::detect("Movie.WEBDL.mkv"), SourceType::WebDl);
        assert_eq!(SourceType::detect("Movie.web-rip.mkv"), SourceType::WebRip);
        assert_eq!(SourceType::detect("Show.HDTV.mkv"), SourceType::Hdtv);
        assert_eq!(SourceType::detect("Film.DVDRip.avi"), SourceType::DvdRip);
        assert_eq!(SourceType::detect("home_video.mkv"), SourceType::Unknown);
    }

    proptest! {
        #[test]
        fn parsing_never_panics_and_publisher_is_never_empty(
            dir in "[ -~]{0,40}",
            name in "[ -~]{0,60}",
        ) {
            let path = Path::new("/media").join(dir.replace('/', "_")).join(name.replace('/', "_"));
            let info = ReleaseInfo::from_path(&path);
            prop_assert!(!info.publisher.is_empty());
        }
    }
}
