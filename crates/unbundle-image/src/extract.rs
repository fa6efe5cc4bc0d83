//! Path-safe extraction of image layers
//!
//! Layers are tar archives, usually compressed. Every entry goes through
//! [`safe_destination`]: absolute names are rejected, and the lexically cleaned
//! destination must be the target directory itself or lie strictly inside it.
//! Directories, regular files (with their mode bits) and symlinks are written;
//! every other entry type is skipped.
//!
//! Parent directories are also checked after creation, so a symlink extracted
//! earlier cannot be used to write outside the target.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, Entry, EntryType};
use tracing::{debug, warn};

use crate::error::{ImageError, Result};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// How entries interact with content already on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Layers applied oldest-first: later entries overwrite, whiteouts delete
    Overlay,
    /// Layers applied newest-first: existing files win, whiteouts are skipped
    PreferExisting,
}

/// Layer compression, chosen by media type and falling back to magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Gzip,
    Zstd,
    None,
}

impl Compression {
    fn detect(media_type: &str, data: &[u8]) -> Self {
        if media_type.ends_with("gzip") || data.starts_with(&[0x1f, 0x8b]) {
            Compression::Gzip
        } else if media_type.ends_with("zstd") || data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

fn layer_reader<'a>(data: &'a [u8], media_type: &str) -> Result<Box<dyn Read + 'a>> {
    Ok(match Compression::detect(media_type, data) {
        Compression::Gzip => Box::new(GzDecoder::new(data)),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(data)?),
        Compression::None => Box::new(data),
    })
}

/// Normalize a path prefix or archive name for comparison
fn normalize_name(name: &str) -> &str {
    let name = name.trim_start_matches("./").trim_start_matches('/');
    name.trim_end_matches('/')
}

/// True when an archive entry name lies at or below a prefix
pub fn matches_prefix(name: &str, prefix: &str) -> bool {
    let name = normalize_name(name);
    let prefix = normalize_name(prefix);
    if prefix.is_empty() {
        return true;
    }
    name == prefix
        || name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Indices of the prefixes matched by at least one entry header in a layer
///
/// Only headers are inspected; nothing is written to disk.
pub fn matching_prefixes(data: &[u8], media_type: &str, prefixes: &[String]) -> Result<Vec<usize>> {
    let mut archive = Archive::new(layer_reader(data, media_type)?);
    let mut matched = vec![false; prefixes.len()];

    for entry in archive.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        let name = path.to_string_lossy();
        for (i, prefix) in prefixes.iter().enumerate() {
            if !matched[i] && matches_prefix(&name, prefix) {
                matched[i] = true;
            }
        }
        if matched.iter().all(|m| *m) {
            break;
        }
    }

    Ok(matched
        .iter()
        .enumerate()
        .filter_map(|(i, m)| m.then_some(i))
        .collect())
}

/// Extract every entry of a layer into `dest`
///
/// Returns the number of entries written.
pub fn extract_layer(data: &[u8], media_type: &str, dest: &Path, mode: ExtractMode) -> Result<usize> {
    fs::create_dir_all(dest)?;
    let extractor = Extractor {
        root: dest,
        canonical_root: dest.canonicalize()?,
        mode,
    };

    let mut archive = Archive::new(layer_reader(data, media_type)?);
    let mut written = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if extractor.extract_entry(&mut entry)? {
            written += 1;
        }
    }
    Ok(written)
}

/// Lexically normalize a path: drop `.`, resolve `..` against earlier components
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => cleaned.push(".."),
            },
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// Resolve an archive entry name to a destination under `dest`
///
/// Rejects absolute names, and names whose cleaned destination is neither
/// `dest` itself nor strictly inside it.
pub fn safe_destination(dest: &Path, name: &Path) -> Result<PathBuf> {
    if name.has_root() || name.is_absolute() {
        return Err(ImageError::AbsolutePath {
            path: name.display().to_string(),
        });
    }

    let root = clean_path(dest);
    let candidate = clean_path(&dest.join(name));
    if candidate == root || candidate.starts_with(&root) {
        Ok(candidate)
    } else {
        Err(ImageError::IllegalPath {
            path: name.display().to_string(),
        })
    }
}

struct Extractor<'a> {
    root: &'a Path,
    canonical_root: PathBuf,
    mode: ExtractMode,
}

impl Extractor<'_> {
    fn extract_entry<R: Read>(&self, entry: &mut Entry<'_, R>) -> Result<bool> {
        let name = entry.path()?.into_owned();
        let target = safe_destination(self.root, &name)?;

        if let Some(file_name) = name.file_name().and_then(|n| n.to_str()) {
            if file_name.starts_with(WHITEOUT_PREFIX) {
                if self.mode == ExtractMode::Overlay {
                    self.apply_whiteout(&target, file_name, &name)?;
                }
                return Ok(false);
            }
        }

        match entry.header().entry_type() {
            EntryType::Directory => {
                self.create_dirs(&target, &name)?;
                Ok(true)
            }
            EntryType::Regular | EntryType::Continuous => {
                if self.skip_existing(&target) {
                    return Ok(false);
                }
                self.prepare_parent(&target, &name)?;
                remove_non_directory(&target).map_err(|e| extraction_error(&name, e))?;

                let mut file = File::create(&target).map_err(|e| extraction_error(&name, e))?;
                io::copy(entry, &mut file).map_err(|e| extraction_error(&name, e))?;
                set_mode(&target, entry.header().mode()?).map_err(|e| extraction_error(&name, e))?;
                Ok(true)
            }
            EntryType::Symlink => {
                if self.skip_existing(&target) {
                    return Ok(false);
                }
                let Some(link) = entry.link_name()?.map(|l| l.into_owned()) else {
                    warn!(entry = %name.display(), "symlink without target, skipping");
                    return Ok(false);
                };
                self.prepare_parent(&target, &name)?;
                remove_non_directory(&target).map_err(|e| extraction_error(&name, e))?;
                create_symlink(&link, &target).map_err(|e| extraction_error(&name, e))?;
                Ok(true)
            }
            other => {
                debug!(entry = %name.display(), kind = ?other, "skipping unsupported entry type");
                Ok(false)
            }
        }
    }

    fn skip_existing(&self, target: &Path) -> bool {
        self.mode == ExtractMode::PreferExisting && fs::symlink_metadata(target).is_ok()
    }

    fn prepare_parent(&self, target: &Path, name: &Path) -> Result<()> {
        match target.parent() {
            Some(parent) => self.create_dirs(parent, name),
            None => Ok(()),
        }
    }

    /// Create `dir` one component at a time below the root
    ///
    /// Every existing symlink on the way is resolved and checked before
    /// anything is created beneath it.
    fn create_dirs(&self, dir: &Path, name: &Path) -> Result<()> {
        let root = clean_path(self.root);
        let relative = dir.strip_prefix(&root).map_err(|_| ImageError::IllegalPath {
            path: name.display().to_string(),
        })?;

        let mut current = root;
        for component in relative.components() {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    self.ensure_within(&current, name)?;
                    if !current.is_dir() {
                        return Err(not_a_directory(name));
                    }
                }
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(not_a_directory(name)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    fs::create_dir(&current).map_err(|e| extraction_error(name, e))?;
                }
                Err(e) => return Err(extraction_error(name, e)),
            }
        }
        self.ensure_within(dir, name)
    }

    /// Resolve symlinks in `dir` and check it is still under the root
    fn ensure_within(&self, dir: &Path, name: &Path) -> Result<()> {
        let resolved = dir.canonicalize().map_err(|e| extraction_error(name, e))?;
        if resolved.starts_with(&self.canonical_root) {
            Ok(())
        } else {
            Err(ImageError::IllegalPath {
                path: name.display().to_string(),
            })
        }
    }

    fn apply_whiteout(&self, marker: &Path, file_name: &str, name: &Path) -> Result<()> {
        let Some(dir) = marker.parent() else {
            return Ok(());
        };
        if !dir.starts_with(clean_path(self.root)) {
            return Ok(());
        }

        if file_name == OPAQUE_WHITEOUT {
            if dir.is_dir() {
                self.ensure_within(dir, name)?;
                for child in fs::read_dir(dir)? {
                    remove_any(&child?.path()).map_err(|e| extraction_error(name, e))?;
                }
            }
            return Ok(());
        }

        let hidden = &file_name[WHITEOUT_PREFIX.len()..];
        let victim = safe_destination(self.root, &name.with_file_name(hidden))?;
        if !dir.is_dir() {
            return Ok(());
        }
        self.ensure_within(dir, name)?;
        if fs::symlink_metadata(&victim).is_ok() {
            debug!(path = %victim.display(), "applying whiteout");
            remove_any(&victim).map_err(|e| extraction_error(name, e))?;
        }
        Ok(())
    }
}

fn extraction_error(name: &Path, source: io::Error) -> ImageError {
    ImageError::Extraction {
        path: name.display().to_string(),
        source,
    }
}

fn not_a_directory(name: &Path) -> ImageError {
    extraction_error(
        name,
        io::Error::new(io::ErrorKind::AlreadyExists, "parent path is not a directory"),
    )
}

/// Remove a file or symlink at `path` so it is replaced rather than followed
fn remove_non_directory(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(path),
        _ => Ok(()),
    }
}

fn remove_any(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn create_symlink(link: &Path, target: &Path) -> io::Result<()> {
    debug!(link = %link.display(), target = %target.display(), "symlinks unsupported, skipping");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression as GzLevel;
    use flate2::write::GzEncoder;
    use tar::{Builder, Header};

    pub(crate) enum TestEntry<'a> {
        File(&'a str, &'a [u8], u32),
        Dir(&'a str),
        Symlink(&'a str, &'a str),
        Fifo(&'a str),
    }

    /// Build a tar archive, writing names verbatim (including unsafe ones)
    pub(crate) fn tar_bytes(entries: &[TestEntry<'_>]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for entry in entries {
            let mut header = Header::new_gnu();
            let (name, data, kind, mode): (&str, &[u8], EntryType, u32) = match entry {
                TestEntry::File(name, data, mode) => (*name, *data, EntryType::Regular, *mode),
                TestEntry::Dir(name) => (*name, b"".as_slice(), EntryType::Directory, 0o755),
                TestEntry::Symlink(name, _) => (*name, b"".as_slice(), EntryType::Symlink, 0o777),
                TestEntry::Fifo(name) => (*name, b"".as_slice(), EntryType::Fifo, 0o644),
            };
            header.set_entry_type(kind);
            header.set_mode(mode);
            header.set_size(data.len() as u64);
            {
                let raw = header.as_old_mut();
                raw.name.fill(0);
                raw.name[..name.len()].copy_from_slice(name.as_bytes());
            }
            if let TestEntry::Symlink(_, link) = entry {
                header.set_link_name(link).unwrap();
            }
            header.set_cksum();
            builder.append(&header, data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    pub(crate) fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    const GZIP_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
    const TAR_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(clean_path(Path::new("/a/../../etc")), PathBuf::from("/etc"));
        assert_eq!(clean_path(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_safe_destination() {
        let dest = Path::new("/tmp/extract");
        assert_eq!(
            safe_destination(dest, Path::new("configs/pkg/catalog.json")).unwrap(),
            PathBuf::from("/tmp/extract/configs/pkg/catalog.json")
        );
        assert_eq!(
            safe_destination(dest, Path::new("./")).unwrap(),
            PathBuf::from("/tmp/extract")
        );
        assert_eq!(
            safe_destination(dest, Path::new("a/../b")).unwrap(),
            PathBuf::from("/tmp/extract/b")
        );
        assert!(matches!(
            safe_destination(dest, Path::new("../../etc/passwd")),
            Err(ImageError::IllegalPath { .. })
        ));
        assert!(matches!(
            safe_destination(dest, Path::new("a/../../extract-evil/x")),
            Err(ImageError::IllegalPath { .. })
        ));
        assert!(matches!(
            safe_destination(dest, Path::new("/etc/passwd")),
            Err(ImageError::AbsolutePath { .. })
        ));
    }

    #[test]
    fn test_matches_prefix() {
        assert!(matches_prefix("configs/pkg/catalog.json", "/configs"));
        assert!(matches_prefix("./configs/", "configs"));
        assert!(matches_prefix("configs", "/configs/"));
        assert!(!matches_prefix("configs-old/x", "/configs"));
        assert!(!matches_prefix("etc/os-release", "/configs"));
    }

    #[test]
    fn test_extracts_files_dirs_and_symlinks() {
        let dest = tempfile::tempdir().unwrap();
        let layer = gzip(&tar_bytes(&[
            TestEntry::Dir("manifests/"),
            TestEntry::File("manifests/csv.yaml", b"kind: ClusterServiceVersion\n", 0o640),
            TestEntry::File("bin/run", b"#!/bin/sh\n", 0o755),
            TestEntry::Symlink("manifests/link.yaml", "csv.yaml"),
            TestEntry::Fifo("pipe"),
        ]));

        let written = extract_layer(&layer, GZIP_LAYER, dest.path(), ExtractMode::Overlay).unwrap();

        assert_eq!(written, 4);
        let csv = dest.path().join("manifests/csv.yaml");
        assert_eq!(fs::read_to_string(&csv).unwrap(), "kind: ClusterServiceVersion\n");
        assert_eq!(
            fs::read_link(dest.path().join("manifests/link.yaml")).unwrap(),
            PathBuf::from("csv.yaml")
        );
        assert!(!dest.path().join("pipe").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.path().join("bin/run")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
            let mode = fs::metadata(&csv).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o640);
        }
    }

    #[test]
    fn test_rejects_traversal() {
        let parent = tempfile::tempdir().unwrap();
        let dest = parent.path().join("target");
        let layer = tar_bytes(&[TestEntry::File("../../etc/passwd", b"root::0:0", 0o644)]);

        let err = extract_layer(&layer, TAR_LAYER, &dest, ExtractMode::Overlay).unwrap_err();

        assert!(err.to_string().contains("illegal file path in tar"));
        assert!(!parent.path().join("etc").exists());
    }

    #[test]
    fn test_rejects_absolute_path() {
        let dest = tempfile::tempdir().unwrap();
        let layer = tar_bytes(&[TestEntry::File("/etc/passwd", b"root::0:0", 0o644)]);

        let err = extract_layer(&layer, TAR_LAYER, dest.path(), ExtractMode::Overlay).unwrap_err();

        assert!(matches!(err, ImageError::AbsolutePath { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_write_through_symlink() {
        let parent = tempfile::tempdir().unwrap();
        let dest = parent.path().join("target");
        let outside = parent.path().join("outside");
        fs::create_dir_all(&outside).unwrap();

        let layer = tar_bytes(&[
            TestEntry::Symlink("escape", outside.to_str().unwrap()),
            TestEntry::File("escape/owned", b"x", 0o644),
        ]);

        let err = extract_layer(&layer, TAR_LAYER, &dest, ExtractMode::Overlay).unwrap_err();

        assert!(matches!(err, ImageError::IllegalPath { .. }));
        assert!(!outside.join("owned").exists());
    }

    #[test]
    fn test_rejects_mkdir_through_symlink() {
        let parent = tempfile::tempdir().unwrap();
        let dest = parent.path().join("target");
        let outside = parent.path().join("outside");
        fs::create_dir_all(&outside).unwrap();

        let layer = tar_bytes(&[
            TestEntry::Symlink("escape", outside.to_str().unwrap()),
            TestEntry::File("escape/newdir/owned", b"x", 0o644),
        ]);

        let err = extract_layer(&layer, TAR_LAYER, &dest, ExtractMode::Overlay).unwrap_err();

        assert!(matches!(err, ImageError::IllegalPath { .. }));
        assert!(!outside.join("newdir").exists());
    }

    #[test]
    fn test_rejects_directory_entry_through_symlink() {
        let parent = tempfile::tempdir().unwrap();
        let dest = parent.path().join("target");
        let outside = parent.path().join("outside");
        fs::create_dir_all(&outside).unwrap();

        let layer = tar_bytes(&[
            TestEntry::Symlink("escape", outside.to_str().unwrap()),
            TestEntry::Dir("escape/made/"),
        ]);

        let err = extract_layer(&layer, TAR_LAYER, &dest, ExtractMode::Overlay).unwrap_err();

        assert!(matches!(err, ImageError::IllegalPath { .. }));
        assert!(!outside.join("made").exists());
    }

    #[test]
    fn test_symlink_inside_root_is_followed() {
        let dest = tempfile::tempdir().unwrap();
        let layer = tar_bytes(&[
            TestEntry::Dir("real/"),
            TestEntry::Symlink("alias", "real"),
            TestEntry::File("alias/sub/file", b"x", 0o644),
        ]);

        extract_layer(&layer, TAR_LAYER, dest.path(), ExtractMode::Overlay).unwrap();

        assert!(dest.path().join("real/sub/file").is_file());
    }

    #[test]
    fn test_whiteout_does_not_follow_symlink() {
        let parent = tempfile::tempdir().unwrap();
        let dest = parent.path().join("target");
        let outside = parent.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("victim"), b"keep").unwrap();

        let lower = tar_bytes(&[TestEntry::Symlink("etc", outside.to_str().unwrap())]);
        let upper = tar_bytes(&[TestEntry::File("etc/.wh.victim", b"", 0o644)]);

        extract_layer(&lower, TAR_LAYER, &dest, ExtractMode::Overlay).unwrap();
        let err = extract_layer(&upper, TAR_LAYER, &dest, ExtractMode::Overlay).unwrap_err();

        assert!(matches!(err, ImageError::IllegalPath { .. }));
        assert!(outside.join("victim").exists());
    }

    #[test]
    fn test_whiteouts() {
        let dest = tempfile::tempdir().unwrap();
        let lower = tar_bytes(&[
            TestEntry::File("etc/keep", b"1", 0o644),
            TestEntry::File("etc/drop", b"1", 0o644),
            TestEntry::File("opaque/old", b"1", 0o644),
        ]);
        let upper = tar_bytes(&[
            TestEntry::File("etc/.wh.drop", b"", 0o644),
            TestEntry::File("opaque/.wh..wh..opq", b"", 0o644),
            TestEntry::File("opaque/new", b"2", 0o644),
        ]);

        extract_layer(&lower, TAR_LAYER, dest.path(), ExtractMode::Overlay).unwrap();
        extract_layer(&upper, TAR_LAYER, dest.path(), ExtractMode::Overlay).unwrap();

        assert!(dest.path().join("etc/keep").exists());
        assert!(!dest.path().join("etc/drop").exists());
        assert!(!dest.path().join("etc/.wh.drop").exists());
        assert!(!dest.path().join("opaque/old").exists());
        assert!(dest.path().join("opaque/new").exists());
    }

    #[test]
    fn test_prefer_existing_keeps_newer_content() {
        let dest = tempfile::tempdir().unwrap();
        let newer = tar_bytes(&[TestEntry::File("configs/a.json", b"new", 0o644)]);
        let older = tar_bytes(&[
            TestEntry::File("configs/a.json", b"old", 0o644),
            TestEntry::File("configs/b.json", b"old", 0o644),
        ]);

        extract_layer(&newer, TAR_LAYER, dest.path(), ExtractMode::PreferExisting).unwrap();
        extract_layer(&older, TAR_LAYER, dest.path(), ExtractMode::PreferExisting).unwrap();

        assert_eq!(fs::read_to_string(dest.path().join("configs/a.json")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dest.path().join("configs/b.json")).unwrap(), "old");
    }

    #[test]
    fn test_matching_prefixes_reads_headers_only() {
        let layer = gzip(&tar_bytes(&[
            TestEntry::File("etc/os-release", b"ID=base", 0o644),
            TestEntry::File("configs/pkg/catalog.json", b"{}", 0o644),
        ]));
        let prefixes = vec!["/configs".to_string(), "/tmp/cache".to_string()];

        let matched = matching_prefixes(&layer, GZIP_LAYER, &prefixes).unwrap();

        assert_eq!(matched, vec![0]);
    }

    #[test]
    fn test_zstd_layer() {
        let raw = tar_bytes(&[TestEntry::File("configs/x.yaml", b"schema: olm.package", 0o644)]);
        let compressed = zstd::stream::encode_all(&raw[..], 3).unwrap();
        let dest = tempfile::tempdir().unwrap();

        extract_layer(
            &compressed,
            "application/vnd.oci.image.layer.v1.tar+zstd",
            dest.path(),
            ExtractMode::Overlay,
        )
        .unwrap();

        assert!(dest.path().join("configs/x.yaml").exists());
    }
}
