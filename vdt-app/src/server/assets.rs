//! Static asset scan of the project root

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

use crate::error::ServerError;

/// Directories never scanned or watched
pub const IGNORED_DIRS: [&str; 3] = ["node_modules", "dist", ".git"];

/// Assets under this directory are served from `/`
const PUBLIC_DIR: &str = "public";

/// Bytes read to sniff image dimensions
const IMAGE_HEADER_LEN: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Image,
    Video,
    Audio,
    Font,
    Text,
    Json,
    Wasm,
    Other,
}

const ASSET_PATTERNS: [(AssetType, &str); 8] = [
    (AssetType::Image, "*.{png,jpg,jpeg,gif,svg,webp,avif,ico,bmp,tiff}"),
    (AssetType::Video, "*.{mp4,webm,ogv,mov,avi,mkv,m4v}"),
    (AssetType::Audio, "*.{mp3,wav,ogg,flac,aac,m4a,opus}"),
    (AssetType::Font, "*.{woff,woff2,eot,ttf,otf}"),
    (AssetType::Text, "*.{txt,md,csv,xml,yml,yaml,toml}"),
    (AssetType::Json, "*.{json,json5,jsonc}"),
    (AssetType::Wasm, "*.wasm"),
    (AssetType::Other, "*.{pdf,zip,gz,webmanifest}"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInfo {
    /// Path the dev server serves the asset at
    pub path: String,
    #[serde(rename = "type")]
    pub kind: AssetType,
    pub public_path: String,
    /// Relative to the project root, `/`-separated
    pub relative_path: String,
    pub file_path: String,
    pub size: u64,
    /// Last modification, milliseconds since the epoch
    pub mtime: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMeta {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub size: u64,
}

/// Maps file names to asset types
#[derive(Debug, Clone)]
pub struct AssetClassifier {
    sets: Vec<(AssetType, GlobSet)>,
}

impl AssetClassifier {
    pub fn new() -> Result<Self, ServerError> {
        let sets = ASSET_PATTERNS
            .iter()
            .map(|(kind, pattern)| {
                let glob = GlobBuilder::new(pattern)
                    .case_insensitive(true)
                    .literal_separator(false)
                    .build()?;
                let set = GlobSetBuilder::new().add(glob).build()?;
                Ok((*kind, set))
            })
            .collect::<Result<_, globset::Error>>()?;
        Ok(Self { sets })
    }

    /// `None` for files that are not assets, e.g. source code
    pub fn classify(&self, path: &Path) -> Option<AssetType> {
        let name = path.file_name()?;
        self.sets
            .iter()
            .find(|(_, set)| set.is_match(name))
            .map(|(kind, _)| *kind)
    }
}

pub fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name))
}

/// Whether `path` (relative or absolute) goes through an ignored directory
pub fn in_ignored_dir(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name))
    })
}

/// `path` relative to `root` with forward slashes
pub fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Some(parts.join("/"))
}

/// Every asset under `root`, sorted by path
pub fn scan(root: &Path, classifier: &AssetClassifier) -> Vec<AssetInfo> {
    let mut assets = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_ignored_dir(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = classifier.classify(entry.path()) else {
            continue;
        };
        let Some(relative_path) = relative_id(root, entry.path()) else {
            continue;
        };
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!("No metadata for {}: {}", entry.path().display(), e);
                continue;
            }
        };
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_millis() as u64);

        let public_path = match relative_path.strip_prefix(&format!("{PUBLIC_DIR}/")) {
            Some(rest) => format!("/{rest}"),
            None => format!("/{relative_path}"),
        };
        assets.push(AssetInfo {
            path: public_path.clone(),
            kind,
            public_path,
            relative_path,
            file_path: entry.path().to_string_lossy().into_owned(),
            size: metadata.len(),
            mtime,
        });
    }

    assets.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!("Found {} assets under {}", assets.len(), root.display());
    assets
}

/// Resolve a client-supplied path against `root`, rejecting anything that
/// escapes it. `root` must already be canonical.
pub fn resolve(root: &Path, path: &str) -> Result<PathBuf, ServerError> {
    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() && candidate.starts_with(root) {
        candidate.to_path_buf()
    } else {
        root.join(path.trim_start_matches('/'))
    };
    let resolved = joined.canonicalize()?;
    if !resolved.starts_with(root) {
        return Err(ServerError::OutsideRoot(resolved));
    }
    Ok(resolved)
}

pub fn image_meta(root: &Path, path: &str) -> Result<ImageMeta, ServerError> {
    let path = resolve(root, path)?;
    let size = fs::metadata(&path)?.len();
    let mut header = Vec::new();
    fs::File::open(&path)?
        .take(IMAGE_HEADER_LEN)
        .read_to_end(&mut header)?;

    let (format, dimensions) = match sniff_dimensions(&header) {
        Some((format, width, height)) => (Some(format.to_string()), Some((width, height))),
        None => (None, None),
    };
    Ok(ImageMeta {
        width: dimensions.map(|(w, _)| w),
        height: dimensions.map(|(_, h)| h),
        format,
        size,
    })
}

fn sniff_dimensions(header: &[u8]) -> Option<(&'static str, u32, u32)> {
    const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

    if header.starts_with(PNG_SIGNATURE) && header.len() >= 24 && &header[12..16] == b"IHDR" {
        let width = u32::from_be_bytes(header[16..20].try_into().ok()?);
        let height = u32::from_be_bytes(header[20..24].try_into().ok()?);
        return Some(("png", width, height));
    }
    if (header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a")) && header.len() >= 10 {
        let width = u16::from_le_bytes([header[6], header[7]]);
        let height = u16::from_le_bytes([header[8], header[9]]);
        return Some(("gif", width.into(), height.into()));
    }
    if header.starts_with(&[0xFF, 0xD8]) {
        return jpeg_dimensions(header).map(|(w, h)| ("jpeg", w, h));
    }
    None
}

/// Walk JPEG segments up to the first start-of-frame marker
fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut pos = 2;
    while pos + 9 < data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let is_frame = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame {
            let height = u16::from_be_bytes([data[pos + 5], data[pos + 6]]);
            let width = u16::from_be_bytes([data[pos + 7], data[pos + 8]]);
            return Some((width.into(), height.into()));
        }
        pos += 2 + len;
    }
    None
}

/// The first `limit` characters of a text asset. Invalid UTF-8 is replaced.
pub fn text_content(root: &Path, path: &str, limit: usize) -> Result<String, ServerError> {
    let bytes = fs::read(resolve(root, path)?)?;
    Ok(String::from_utf8_lossy(&bytes).chars().take(limit).collect())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
        bytes
    }

    fn project() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        for sub in ["public", "src/assets", "node_modules/pkg", "dist", "fonts"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        fs::write(root.join("public/logo.png"), png(32, 16)).unwrap();
        fs::write(root.join("src/assets/hero.GIF"), b"GIF89a\x40\x01\xc8\x00").unwrap();
        fs::write(root.join("src/main.ts"), "import './style.css'").unwrap();
        fs::write(root.join("node_modules/pkg/icon.png"), png(1, 1)).unwrap();
        fs::write(root.join("dist/bundle.png"), png(1, 1)).unwrap();
        fs::write(root.join("fonts/inter.woff2"), b"wOF2").unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();
        fs::write(root.join("notes.txt"), "héllo wörld").unwrap();
        (dir, root)
    }

    #[test]
    fn test_scan_classifies_and_skips_ignored_dirs() {
        let (_dir, root) = project();
        let classifier = AssetClassifier::new().unwrap();
        let assets = scan(&root, &classifier);

        let found: Vec<_> = assets.iter().map(|a| (a.path.as_str(), a.kind)).collect();
        assert_eq!(
            found,
            vec![
                ("/fonts/inter.woff2", AssetType::Font),
                ("/logo.png", AssetType::Image),
                ("/notes.txt", AssetType::Text),
                ("/package.json", AssetType::Json),
                ("/src/assets/hero.GIF", AssetType::Image),
            ]
        );
        let logo = &assets[1];
        assert_eq!(logo.relative_path, "public/logo.png");
        assert_eq!(logo.size, png(32, 16).len() as u64);
    }

    #[test]
    fn test_asset_info_wire_shape() {
        let (_dir, root) = project();
        let assets = scan(&root, &AssetClassifier::new().unwrap());
        let value = serde_json::to_value(&assets[0]).unwrap();
        assert_eq!(value["type"], "font");
        assert_eq!(value["publicPath"], "/fonts/inter.woff2");
        assert!(value.get("relativePath").is_some());
    }

    #[test]
    fn test_image_meta() {
        let (_dir, root) = project();
        let meta = image_meta(&root, "public/logo.png").unwrap();
        assert_eq!((meta.width, meta.height), (Some(32), Some(16)));
        assert_eq!(meta.format.as_deref(), Some("png"));

        let meta = image_meta(&root, "/src/assets/hero.GIF").unwrap();
        assert_eq!((meta.width, meta.height), (Some(320), Some(200)));

        let meta = image_meta(&root, "fonts/inter.woff2").unwrap();
        assert_eq!(meta.width, None);
        assert_eq!(meta.size, 4);
    }

    #[test]
    fn test_text_content_limit_counts_chars() {
        let (_dir, root) = project();
        assert_eq!(text_content(&root, "notes.txt", 4).unwrap(), "héll");
        assert_eq!(text_content(&root, "notes.txt", 300).unwrap(), "héllo wörld");
    }

    #[test]
    fn test_paths_outside_root_rejected() {
        let (dir, root) = project();
        let outside = dir.path().parent().unwrap().join("vdt-outside.txt");
        fs::write(&outside, "secret").unwrap();

        let err = text_content(&root, "../vdt-outside.txt", 10).unwrap_err();
        assert!(matches!(err, ServerError::OutsideRoot(_)));
        assert!(matches!(
            text_content(&root, "missing.txt", 10).unwrap_err(),
            ServerError::Io(_)
        ));
        fs::remove_file(outside).unwrap();
    }
}
