//! Staged archive extraction.
//!
//! Archives are unpacked into a staging directory inside the target root and
//! only merged into the root once every entry has been written. A marker
//! file flags the staging directory as incomplete while extraction runs; a
//! staging directory left behind by an interrupted run is discarded before
//! the next extraction starts.
//!
//! ZIP and gzip-compressed tar archives are supported. The format is detected
//! from the archive's leading bytes, not its file name.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

use crate::error::{is_fatal_local, UpdateError, UpdateResult};

/// Staging directory created inside the target root.
pub const STAGING_DIR_NAME: &str = ".modupdater-staging";

/// Marker present in the staging directory until extraction completes.
pub const INCOMPLETE_MARKER: &str = ".incomplete";

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: [u8; 4] = *b"PK\x05\x06";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Progress callback: `(entries_done, entries_total, entry_name)`.
pub type ExtractProgress<'a> = &'a mut dyn FnMut(usize, usize, &str);

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format from the first bytes of a file.
    pub fn detect(path: &Path) -> io::Result<Option<Self>> {
        let mut magic = [0u8; 4];
        let mut file = File::open(path)?;
        let mut read = 0;
        while read < magic.len() {
            match file.read(&mut magic[read..])? {
                0 => break,
                n => read += n,
            }
        }

        Ok(if read >= 4 && (magic == ZIP_MAGIC || magic == ZIP_EMPTY_MAGIC) {
            Some(Self::Zip)
        } else if read >= 2 && magic[..2] == GZIP_MAGIC {
            Some(Self::TarGz)
        } else {
            None
        })
    }
}

/// Unpacks an archive into a target root.
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` into `target_root`.
    ///
    /// Returns `Ok(false)` for missing or malformed archives and ordinary
    /// write failures; the target root is left untouched in that case.
    ///
    /// # Errors
    ///
    /// Returns an error for local failures that retrying cannot fix: no
    /// space left or permission denied.
    fn try_extract(
        &self,
        archive: &Path,
        target_root: &Path,
        on_progress: ExtractProgress<'_>,
    ) -> UpdateResult<bool>;

    /// Like [`try_extract`](Self::try_extract), with every failure reported
    /// as `false`.
    fn extract(&self, archive: &Path, target_root: &Path, on_progress: ExtractProgress<'_>) -> bool {
        match self.try_extract(archive, target_root, on_progress) {
            Ok(done) => done,
            Err(e) => {
                error!(archive = %archive.display(), error = %e, "Extraction aborted");
                false
            }
        }
    }
}

/// Why extraction stopped.
#[derive(Debug)]
enum ExtractError {
    Malformed(String),
    Io(PathBuf, io::Error),
}

impl ExtractError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |e| Self::Io(path.to_path_buf(), e)
    }
}

/// Extracts through a staging directory inside the target root.
#[derive(Debug, Default, Clone, Copy)]
pub struct StagedExtractor;

impl StagedExtractor {
    /// Create an extractor. It holds no state.
    pub fn new() -> Self {
        Self
    }

    /// Staging directory used for `target_root`.
    pub fn staging_dir(target_root: &Path) -> PathBuf {
        target_root.join(STAGING_DIR_NAME)
    }

    fn run(
        &self,
        archive: &Path,
        target_root: &Path,
        on_progress: ExtractProgress<'_>,
    ) -> Result<usize, ExtractError> {
        let format = ArchiveFormat::detect(archive)
            .map_err(ExtractError::io(archive))?
            .ok_or_else(|| ExtractError::Malformed("unrecognised archive format".to_string()))?;

        fs::create_dir_all(target_root).map_err(ExtractError::io(target_root))?;
        let staging = prepare_staging(target_root)?;

        let unpacked = match format {
            ArchiveFormat::Zip => unpack_zip(archive, &staging, on_progress)?,
            ArchiveFormat::TarGz => unpack_tar_gz(archive, &staging, on_progress)?,
        };

        commit(&staging, target_root)?;
        apply_dir_modes(target_root, unpacked.dir_modes)?;
        Ok(unpacked.entries)
    }
}

impl ArchiveExtractor for StagedExtractor {
    fn try_extract(
        &self,
        archive: &Path,
        target_root: &Path,
        on_progress: ExtractProgress<'_>,
    ) -> UpdateResult<bool> {
        if !archive.is_file() {
            error!(archive = %archive.display(), "Archive not found");
            return Ok(false);
        }

        match self.run(archive, target_root, on_progress) {
            Ok(entries) => {
                info!(
                    archive = %archive.display(),
                    target = %target_root.display(),
                    entries,
                    "Archive extracted"
                );
                Ok(true)
            }
            Err(err) => {
                let staging = Self::staging_dir(target_root);
                if staging.exists() {
                    if let Err(e) = fs::remove_dir_all(&staging) {
                        warn!(path = %staging.display(), error = %e, "Failed to remove staging directory");
                    }
                }

                match err {
                    ExtractError::Io(path, e) if is_fatal_local(&e) => Err(UpdateError::io(path, e)),
                    ExtractError::Io(path, e) => {
                        error!(path = %path.display(), error = %e, "Extraction failed");
                        Ok(false)
                    }
                    ExtractError::Malformed(reason) => {
                        error!(archive = %archive.display(), reason = %reason, "Malformed archive");
                        Ok(false)
                    }
                }
            }
        }
    }
}

/// Create a fresh staging directory, discarding leftovers.
fn prepare_staging(target_root: &Path) -> Result<PathBuf, ExtractError> {
    let staging = StagedExtractor::staging_dir(target_root);
    if staging.exists() {
        warn!(
            path = %staging.display(),
            incomplete = staging.join(INCOMPLETE_MARKER).exists(),
            "Discarding stale staging directory"
        );
        fs::remove_dir_all(&staging).map_err(ExtractError::io(&staging))?;
    }

    fs::create_dir_all(&staging).map_err(ExtractError::io(&staging))?;
    let marker = staging.join(INCOMPLETE_MARKER);
    fs::write(&marker, b"").map_err(ExtractError::io(&marker))?;
    Ok(staging)
}

/// Reject names that are absolute or climb out of the root.
fn safe_relative(name: &Path) -> Result<&Path, ExtractError> {
    let escapes = name.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(ExtractError::Malformed(format!(
            "entry escapes target: {}",
            name.display()
        )));
    }
    Ok(name)
}

/// Result of unpacking into the staging directory.
#[derive(Debug, Default)]
struct Unpacked {
    entries: usize,
    /// Directory modes, relative to the root. Applied after commit, since a
    /// read-only directory cannot receive its children.
    dir_modes: Vec<(PathBuf, u32)>,
}

fn unpack_zip(
    archive: &Path,
    staging: &Path,
    on_progress: ExtractProgress<'_>,
) -> Result<Unpacked, ExtractError> {
    let file = File::open(archive).map_err(ExtractError::io(archive))?;
    let mut zip = ZipArchive::new(file).map_err(|e| ExtractError::Malformed(e.to_string()))?;
    let total = zip.len();
    let mut dir_modes = Vec::new();

    for index in 0..total {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| ExtractError::Malformed(e.to_string()))?;
        let name = entry.name().to_string();

        safe_relative(Path::new(&name))?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ExtractError::Malformed(format!("entry escapes target: {}", name)))?;
        let out = staging.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(ExtractError::io(&out))?;
            if let Some(mode) = entry.unix_mode() {
                dir_modes.push((relative, mode));
            }
        } else {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent).map_err(ExtractError::io(parent))?;
            }
            let mut target = File::create(&out).map_err(ExtractError::io(&out))?;
            io::copy(&mut entry, &mut target).map_err(|e| match e.kind() {
                io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                    ExtractError::Malformed(format!("{}: {}", name, e))
                }
                _ => ExtractError::Io(out.clone(), e),
            })?;
            set_file_mode(&out, entry.unix_mode())?;
        }

        debug!(entry = %name, "Extracted");
        on_progress(index + 1, total, &name);
    }

    Ok(Unpacked {
        entries: total,
        dir_modes,
    })
}

fn unpack_tar_gz(
    archive: &Path,
    staging: &Path,
    on_progress: ExtractProgress<'_>,
) -> Result<Unpacked, ExtractError> {
    let malformed = |e: io::Error| ExtractError::Malformed(e.to_string());

    // Counting pass, so progress has a denominator.
    let file = File::open(archive).map_err(ExtractError::io(archive))?;
    let mut counter = tar::Archive::new(GzDecoder::new(file));
    let mut total = 0;
    for entry in counter.entries().map_err(malformed)? {
        entry.map_err(malformed)?;
        total += 1;
    }

    let file = File::open(archive).map_err(ExtractError::io(archive))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let mut unpacked = Unpacked::default();
    for entry in tar.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;
        let name = entry.path().map_err(malformed)?.into_owned();
        safe_relative(&name)?;

        if entry.header().entry_type().is_dir() {
            let out = staging.join(&name);
            fs::create_dir_all(&out).map_err(ExtractError::io(&out))?;
            if let Ok(mode) = entry.header().mode() {
                unpacked.dir_modes.push((name.clone(), mode));
            }
            unpacked.entries += 1;
            let shown = name.to_string_lossy();
            debug!(entry = %shown, "Extracted");
            on_progress(unpacked.entries, total, &shown);
            continue;
        }

        let written = entry.unpack_in(staging).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => malformed(e),
            _ => ExtractError::Io(staging.join(&name), e),
        })?;
        if !written {
            return Err(ExtractError::Malformed(format!(
                "entry escapes target: {}",
                name.display()
            )));
        }

        unpacked.entries += 1;
        let shown = name.to_string_lossy();
        debug!(entry = %shown, "Extracted");
        on_progress(unpacked.entries, total, &shown);
    }

    Ok(unpacked)
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: Option<u32>) -> Result<(), ExtractError> {
    use std::os::unix::fs::PermissionsExt;
    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(ExtractError::io(path)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: Option<u32>) -> Result<(), ExtractError> {
    Ok(())
}

/// Apply directory modes to the committed tree, deepest first.
#[cfg(unix)]
fn apply_dir_modes(root: &Path, mut modes: Vec<(PathBuf, u32)>) -> Result<(), ExtractError> {
    use std::os::unix::fs::PermissionsExt;
    modes.sort_by_key(|(relative, _)| std::cmp::Reverse(relative.components().count()));
    for (relative, mode) in modes {
        let path = root.join(relative);
        fs::set_permissions(&path, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(ExtractError::io(&path))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_dir_modes(_root: &Path, _modes: Vec<(PathBuf, u32)>) -> Result<(), ExtractError> {
    Ok(())
}

/// Move staged content into the target root, replacing existing files.
fn commit(staging: &Path, target_root: &Path) -> Result<(), ExtractError> {
    merge_into(staging, target_root, true)?;
    fs::remove_dir_all(staging).map_err(ExtractError::io(staging))
}

fn merge_into(src: &Path, dst: &Path, is_staging_root: bool) -> Result<(), ExtractError> {
    for entry in fs::read_dir(src).map_err(ExtractError::io(src))? {
        let entry = entry.map_err(ExtractError::io(src))?;
        let name = entry.file_name();
        if is_staging_root && name == INCOMPLETE_MARKER {
            continue;
        }

        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type().map_err(ExtractError::io(&from))?;

        if file_type.is_dir() {
            if to.exists() && !to.is_dir() {
                fs::remove_file(&to).map_err(ExtractError::io(&to))?;
            }
            fs::create_dir_all(&to).map_err(ExtractError::io(&to))?;
            merge_into(&from, &to, false)?;
        } else {
            if to.is_dir() {
                fs::remove_dir_all(&to).map_err(ExtractError::io(&to))?;
            }
            fs::rename(&from, &to).map_err(ExtractError::io(&to))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    fn make_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let encoder = flate2::write::GzEncoder::new(
            File::create(path).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_detect_formats() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("a.bin");
        make_zip(&zip_path, &[("x.txt", b"x")]);
        let tgz_path = temp.path().join("b.bin");
        make_tar_gz(&tgz_path, &[("x.txt", b"x")]);
        let other = temp.path().join("c.bin");
        fs::write(&other, b"plain text").unwrap();

        assert_eq!(ArchiveFormat::detect(&zip_path).unwrap(), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect(&tgz_path).unwrap(), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(&other).unwrap(), None);
    }

    #[test]
    fn test_extract_zip_in_order() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("update.dep");
        make_zip(
            &archive,
            &[("bin/", b""), ("bin/tool", b"#!/bin/sh\n"), ("etc/os-release", b"v2\n")],
        );
        let target = temp.path().join("root");

        let mut seen = Vec::new();
        let ok = StagedExtractor::new().extract(&archive, &target, &mut |done, total, name| {
            seen.push((done, total, name.to_string()))
        });

        assert!(ok);
        assert_eq!(fs::read(target.join("bin/tool")).unwrap(), b"#!/bin/sh\n");
        assert_eq!(fs::read(target.join("etc/os-release")).unwrap(), b"v2\n");
        assert_eq!(
            seen,
            vec![
                (1, 3, "bin/".to_string()),
                (2, 3, "bin/tool".to_string()),
                (3, 3, "etc/os-release".to_string()),
            ]
        );
        assert!(!StagedExtractor::staging_dir(&target).exists());
    }

    #[test]
    fn test_extract_tar_gz() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("app.tar.gz");
        make_tar_gz(&archive, &[("app/main.py", b"print()\n"), ("app/VERSION", b"1.1\n")]);
        let target = temp.path().join("apps");

        let mut last = None;
        let ok = StagedExtractor::new().extract(&archive, &target, &mut |done, total, _| {
            last = Some((done, total))
        });

        assert!(ok);
        assert_eq!(last, Some((2, 2)));
        assert_eq!(fs::read(target.join("app/VERSION")).unwrap(), b"1.1\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_zip_directory_receives_children() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("app.zip");
        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        writer
            .add_directory("bin/", SimpleFileOptions::default().unix_permissions(0o555))
            .unwrap();
        writer
            .start_file("bin/tool", SimpleFileOptions::default().unix_permissions(0o755))
            .unwrap();
        writer.write_all(b"#!/bin/sh\n").unwrap();
        writer.finish().unwrap();
        let target = temp.path().join("apps");

        assert!(StagedExtractor::new().extract(&archive, &target, &mut |_, _, _| {}));

        let bin = target.join("bin");
        assert_eq!(fs::read(bin.join("tool")).unwrap(), b"#!/bin/sh\n");
        assert_eq!(fs::metadata(&bin).unwrap().permissions().mode() & 0o777, 0o555);
        assert!(!StagedExtractor::staging_dir(&target).exists());
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_tar_directory_receives_children() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("app.tar.gz");
        let encoder = flate2::write::GzEncoder::new(
            File::create(&archive).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o555);
        dir.set_cksum();
        builder.append_data(&mut dir, "bin/", io::empty()).unwrap();
        let mut file = tar::Header::new_gnu();
        file.set_size(4);
        file.set_mode(0o755);
        file.set_cksum();
        builder.append_data(&mut file, "bin/tool", &b"tool"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
        let target = temp.path().join("apps");

        let mut last = None;
        let ok = StagedExtractor::new().extract(&archive, &target, &mut |done, total, _| {
            last = Some((done, total))
        });

        assert!(ok);
        assert_eq!(last, Some((2, 2)));
        let bin = target.join("bin");
        assert_eq!(fs::read(bin.join("tool")).unwrap(), b"tool");
        assert_eq!(fs::metadata(&bin).unwrap().permissions().mode() & 0o777, 0o555);
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_extract_replaces_existing_files() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("root");
        fs::create_dir_all(target.join("etc")).unwrap();
        fs::write(target.join("etc/os-release"), b"v1\n").unwrap();
        fs::write(target.join("etc/keep"), b"untouched").unwrap();

        let archive = temp.path().join("update.dep");
        make_zip(&archive, &[("etc/os-release", b"v2\n")]);

        assert!(StagedExtractor::new().extract(&archive, &target, &mut |_, _, _| {}));
        assert_eq!(fs::read(target.join("etc/os-release")).unwrap(), b"v2\n");
        assert_eq!(fs::read(target.join("etc/keep")).unwrap(), b"untouched");
    }

    #[test]
    fn test_missing_archive() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("root");
        assert!(!StagedExtractor::new().extract(
            &temp.path().join("missing.dep"),
            &target,
            &mut |_, _, _| {}
        ));
        assert!(!target.exists());
    }

    #[test]
    fn test_unrecognised_archive_leaves_target_alone() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("update.dep");
        fs::write(&archive, b"not an archive at all").unwrap();
        let target = temp.path().join("root");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("existing"), b"1").unwrap();

        assert!(!StagedExtractor::new().extract(&archive, &target, &mut |_, _, _| {}));
        let names: Vec<_> = fs::read_dir(&target)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("existing")]);
    }

    #[test]
    fn test_truncated_zip_is_malformed() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("update.dep");
        make_zip(&archive, &[("a.txt", &[1u8; 4096]), ("b.txt", &[2u8; 4096])]);
        let bytes = fs::read(&archive).unwrap();
        fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();
        let target = temp.path().join("root");

        assert!(!StagedExtractor::new().extract(&archive, &target, &mut |_, _, _| {}));
        assert!(!target.join("a.txt").exists());
        assert!(!target.join("b.txt").exists());
    }

    #[test]
    fn test_zip_path_escape_rejected() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("update.dep");
        make_zip(&archive, &[("ok.txt", b"ok"), ("../evil.txt", b"evil")]);
        let target = temp.path().join("root");

        assert!(!StagedExtractor::new().extract(&archive, &target, &mut |_, _, _| {}));
        assert!(!temp.path().join("evil.txt").exists());
        assert!(!target.join("ok.txt").exists());
    }

    #[test]
    fn test_stale_staging_is_discarded() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("root");
        let staging = StagedExtractor::staging_dir(&target);
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join(INCOMPLETE_MARKER), b"").unwrap();
        fs::write(staging.join("leftover"), b"from a crashed run").unwrap();

        let archive = temp.path().join("update.dep");
        make_zip(&archive, &[("fresh.txt", b"new")]);

        assert!(StagedExtractor::new().extract(&archive, &target, &mut |_, _, _| {}));
        assert!(target.join("fresh.txt").exists());
        assert!(!target.join("leftover").exists());
        assert!(!target.join(INCOMPLETE_MARKER).exists());
    }

    #[test]
    fn test_stale_staging_with_bad_archive_fails() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("root");
        let staging = StagedExtractor::staging_dir(&target);
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join(INCOMPLETE_MARKER), b"").unwrap();
        fs::write(staging.join("leftover"), b"x").unwrap();

        let archive = temp.path().join("update.dep");
        fs::write(&archive, b"PK\x03\x04 but broken").unwrap();

        assert!(!StagedExtractor::new().extract(&archive, &target, &mut |_, _, _| {}));
        assert!(!target.join("leftover").exists());
    }
}
