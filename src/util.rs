use anyhow::{Context, Result};
use memmap2::Mmap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Package file extensions recognised when scanning a content directory.
pub const PACKAGE_EXTENSIONS: &[&str] = &["uasset", "umap"];

#[derive(Debug, Clone)]
pub struct PackageFile {
    /// Path relative to the scanned root, forward slashes, extension included.
    pub relative_path: String,
    pub full_path: PathBuf,
    /// Lowercased extension without the dot.
    pub extension: String,
    pub size: u64,
}

/// Walk a content tree and collect every package file with its relative path.
/// Paths use forward slashes so asset paths are identical on every host.
pub fn walk_packages(root: &Path) -> Result<Vec<PackageFile>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize path: {}", root.display()))?;

    let mut files = Vec::new();

    for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("Failed to read directory entry in {}", root.display()))?;

        if !entry.file_type().is_file() {
            continue;
        }

        let full_path = entry.path().to_path_buf();
        let extension = match full_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
        {
            Some(ext) if PACKAGE_EXTENSIONS.contains(&ext.as_str()) => ext,
            _ => continue,
        };

        let relative = full_path
            .strip_prefix(&root)
            .with_context(|| "Failed to compute relative path")?;
        let relative_path = relative
            .to_str()
            .with_context(|| format!("Non-UTF8 path: {}", relative.display()))?
            .replace('\\', "/");

        let size = entry
            .metadata()
            .with_context(|| format!("Failed to read metadata: {}", full_path.display()))?
            .len();

        files.push(PackageFile {
            relative_path,
            full_path,
            extension,
            size,
        });
    }

    Ok(files)
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    // SAFETY: We only read from this mapping; content files are not modified during a scan.
    unsafe {
        Mmap::map(&file).with_context(|| format!("Failed to memory-map file: {}", path.display()))
    }
}

/// BLAKE3 of a byte slice as lowercase hex.
pub fn hash_bytes_hex(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Stream-hash a file using BLAKE3.
/// Uses a 256 KB BufReader to reduce syscall overhead vs the default 8 KB.
pub fn hash_file_streaming(path: &Path) -> Result<blake3::Hash> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = std::io::BufReader::with_capacity(256 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut reader, &mut hasher)
        .with_context(|| format!("Failed to hash file: {}", path.display()))?;
    Ok(hasher.finalize())
}

/// Render a path with forward slashes, the form the archiver expects in command files.
pub fn to_forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
