//! Track acquisition: turns a free-text reference or URL into a local file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{
    core::audio::probe_duration,
    error::{RemixError, Result},
    io::net::{download_with_progress, http_client},
    types::AcquiredTrack,
};

/// File extensions considered audio when scanning a library.
pub const AUDIO_EXTENSIONS: [&str; 8] = ["flac", "wav", "mp3", "m4a", "aac", "ogg", "aiff", "aif"];

/// Resolves a track reference to a file inside `dest_dir`.
///
/// Implementations block; the pipeline calls them off the async runtime.
pub trait TrackSource: Send + Sync {
    fn resolve(&self, reference: &str, dest_dir: &Path) -> Result<AcquiredTrack>;
}

/// Trims whitespace and surrounding quotes that chat clients tend to add.
pub fn normalize_reference(reference: &str) -> &str {
    reference.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

fn file_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into())
}

/// Copies `src` into `dest_dir` and probes it.
fn stage_local_file(src: &Path, title: String, dest_dir: &Path) -> Result<AcquiredTrack> {
    let file_name = src
        .file_name()
        .ok_or_else(|| RemixError::Fetch(format!("{} has no file name", src.display())))?;
    fs::create_dir_all(dest_dir).map_err(|e| RemixError::Fetch(e.to_string()))?;
    let local_path = dest_dir.join(file_name);
    fs::copy(src, &local_path)
        .map_err(|e| RemixError::Fetch(format!("copy {} failed: {e}", src.display())))?;

    let duration_secs = probe_duration(&local_path)?;
    Ok(AcquiredTrack {
        local_path,
        title,
        duration_secs,
    })
}

/// Searches a directory tree of audio files by title.
///
/// A reference is either `Title` or `Artist - Title`. Matches are tried in
/// order: exact file stem, then `Title` with `Artist` somewhere in the
/// path, then stem containing the reference. Ties go to the first path in
/// lexical order.
#[derive(Clone, Debug)]
pub struct LocalLibrary {
    root: PathBuf,
}

impl LocalLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn find(&self, reference: &str) -> Result<PathBuf> {
        let query = normalize_reference(reference).to_lowercase();
        if query.is_empty() {
            return Err(RemixError::NotFound(reference.to_string()));
        }

        let mut candidates: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        candidates.sort();
        debug!(
            "Scanning {} audio files under {}",
            candidates.len(),
            self.root.display()
        );

        let stem_of = |p: &Path| file_title(p).to_lowercase();

        if let Some(hit) = candidates.iter().find(|p| stem_of(p) == query) {
            return Ok(hit.clone());
        }

        if let Some((artist, title)) = query.split_once(" - ") {
            let (artist, title) = (artist.trim(), title.trim());
            let hit = candidates.iter().find(|p| {
                stem_of(p) == title && p.to_string_lossy().to_lowercase().contains(artist)
            });
            if let Some(hit) = hit {
                return Ok(hit.clone());
            }
        }

        candidates
            .into_iter()
            .find(|p| stem_of(p).contains(&query))
            .ok_or_else(|| RemixError::NotFound(normalize_reference(reference).to_string()))
    }
}

impl TrackSource for LocalLibrary {
    fn resolve(&self, reference: &str, dest_dir: &Path) -> Result<AcquiredTrack> {
        let found = self.find(reference)?;
        info!("Resolved `{}` to {}", normalize_reference(reference), found.display());
        stage_local_file(&found, file_title(&found), dest_dir)
    }
}

/// Downloads `http(s)://` references.
#[derive(Clone, Debug, Default)]
pub struct HttpSource;

impl HttpSource {
    pub fn new() -> Self {
        Self
    }

    fn file_name_for(url: &str) -> String {
        let without_query = url.split(['?', '#']).next().unwrap_or(url);
        let without_scheme = without_query
            .split_once("://")
            .map_or(without_query, |(_, rest)| rest);
        let path = without_scheme.split_once('/').map_or("", |(_, path)| path);
        path.rsplit('/')
            .find(|seg| !seg.is_empty())
            .filter(|seg| seg.contains('.'))
            .unwrap_or("download.audio")
            .to_string()
    }
}

pub fn is_url(reference: &str) -> bool {
    let r = normalize_reference(reference);
    r.starts_with("http://") || r.starts_with("https://")
}

impl TrackSource for HttpSource {
    fn resolve(&self, reference: &str, dest_dir: &Path) -> Result<AcquiredTrack> {
        let url = normalize_reference(reference);
        if !is_url(url) {
            return Err(RemixError::NotFound(url.to_string()));
        }

        fs::create_dir_all(dest_dir).map_err(|e| RemixError::Fetch(e.to_string()))?;
        let local_path = dest_dir.join(Self::file_name_for(url));

        let client = http_client()?;
        let mut last_logged = 0u64;
        let bytes = download_with_progress(&client, url, &local_path, |done, total| {
            // Log every ~10 MB.
            if done >= last_logged + 10_000_000 || (total > 0 && done == total) {
                debug!("Downloaded {done}/{total} bytes from {url}");
                last_logged = done;
            }
        })?;
        info!("Fetched {bytes} bytes from {url}");

        let duration_secs = probe_duration(&local_path)?;
        Ok(AcquiredTrack {
            title: file_title(&local_path),
            local_path,
            duration_secs,
        })
    }
}

/// Routes URLs to [`HttpSource`] and everything else to the library.
#[derive(Clone, Debug, Default)]
pub struct DefaultSource {
    library: Option<LocalLibrary>,
    http: HttpSource,
}

impl DefaultSource {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self {
            library: library_dir.map(LocalLibrary::new),
            http: HttpSource::new(),
        }
    }
}

impl TrackSource for DefaultSource {
    fn resolve(&self, reference: &str, dest_dir: &Path) -> Result<AcquiredTrack> {
        if is_url(reference) {
            return self.http.resolve(reference, dest_dir);
        }
        match &self.library {
            Some(library) => library.resolve(reference, dest_dir),
            None => {
                let path = Path::new(normalize_reference(reference));
                if path.is_file() {
                    stage_local_file(path, file_title(path), dest_dir)
                } else {
                    Err(RemixError::NotFound(normalize_reference(reference).to_string()))
                }
            }
        }
    }
}
