//! Content-addressed on-disk cache of generated artifacts.
//!
//! An artifact lives at `<dir>/<compiler>-<kind>-<fingerprint>`. The
//! fingerprint is a 128-bit digest of everything baked into the artifact
//! body, so a file that already exists under a name is by construction the
//! file we would write, and it is reused without being read back.
//!
//! Files are created once and never rewritten. New files are written to a
//! temporary name in the same directory, marked executable, then hard-linked
//! into place without clobbering, so a concurrent reader never sees a
//! partial or non-executable artifact and racing writers cannot corrupt one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::builder::SnippetCompiler;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::Wrapping;

/// Number of digest bytes kept in a fingerprint.
const FINGERPRINT_BYTES: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Tight loop, reports elapsed seconds.
    Timing,
    /// Single unmeasured run, for looking at real output.
    Whole,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Timing => "time",
            ArtifactKind::Whole => "whole",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub kind: ArtifactKind,
    pub fingerprint: String,
    pub path: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    /// The artifact was already on disk.
    Hit,
    /// This call wrote the artifact.
    Created,
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Cache key for a snippet under `config`.
///
/// Covers setup, snippet, teardown, wrapping and loop count: every input
/// that changes the rendered body. Repetitions and timeout only affect how
/// the artifact is run and are left out. Text fields are length-prefixed so
/// that moving characters across a field boundary changes the key.
pub fn fingerprint(snippet: &str, config: &HarnessConfig) -> String {
    let mut hasher = Sha256::new();
    for field in [config.set_up(), snippet, config.tear_down()] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.update([match config.wrapping() {
        Wrapping::Scoped => 1u8,
        Wrapping::Flat => 0u8,
    }]);
    hasher.update(config.loop_count().to_le_bytes());

    let digest = hasher.finalize();
    hex(&digest[..FINGERPRINT_BYTES])
}

#[cfg(unix)]
fn mark_executable(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o777))
}

#[cfg(not(unix))]
fn mark_executable(_file: &File) -> io::Result<()> {
    Ok(())
}

fn is_readable(path: &Path) -> bool {
    File::open(path).is_ok()
}

/// Artifact cache rooted at one directory, rendering misses with `C`.
#[derive(Clone, Debug)]
pub struct ArtifactCache<C> {
    dir: PathBuf,
    compiler: C,
}

impl<C: SnippetCompiler> ArtifactCache<C> {
    pub fn new(dir: impl Into<PathBuf>, compiler: C) -> Self {
        Self {
            dir: dir.into(),
            compiler,
        }
    }

    /// Cache in the system temp directory, shared across harness runs.
    pub fn in_temp_dir(compiler: C) -> Self {
        Self::new(std::env::temp_dir(), compiler)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn prefix(&self, kind: ArtifactKind) -> String {
        format!("{}-{}-", self.compiler.name(), kind.as_str())
    }

    /// Where the artifact for `snippet` lives, whether or not it exists yet.
    pub fn descriptor(
        &self,
        kind: ArtifactKind,
        snippet: &str,
        config: &HarnessConfig,
    ) -> ArtifactDescriptor {
        let fingerprint = fingerprint(snippet, config);
        let path = self
            .dir
            .join(format!("{}{}", self.prefix(kind), fingerprint));
        ArtifactDescriptor {
            kind,
            fingerprint,
            path,
        }
    }

    /// Path of a ready-to-run artifact, writing it on first use.
    pub fn get_or_create(
        &self,
        kind: ArtifactKind,
        snippet: &str,
        config: &HarnessConfig,
    ) -> Result<PathBuf> {
        let (descriptor, _) = self.materialize(kind, snippet, config)?;
        Ok(descriptor.path)
    }

    /// Like [`get_or_create`](Self::get_or_create), also reporting whether
    /// this call wrote the file.
    pub fn materialize(
        &self,
        kind: ArtifactKind,
        snippet: &str,
        config: &HarnessConfig,
    ) -> Result<(ArtifactDescriptor, CacheStatus)> {
        let descriptor = self.descriptor(kind, snippet, config);
        if is_readable(&descriptor.path) {
            debug!(path = %descriptor.path.display(), "artifact cache hit");
            return Ok((descriptor, CacheStatus::Hit));
        }

        let content = match kind {
            ArtifactKind::Timing => self.compiler.build_timing(snippet, config),
            ArtifactKind::Whole => self.compiler.build_whole(snippet, config),
        };
        let status = self.write_new(&descriptor.path, content.as_bytes())?;
        debug!(path = %descriptor.path.display(), ?status, "artifact materialized");
        Ok((descriptor, status))
    }

    fn write_new(&self, path: &Path, content: &[u8]) -> Result<CacheStatus> {
        let cache_err = |source: io::Error| HarnessError::CacheWrite {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(cache_err)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".snipbench-")
            .tempfile_in(&self.dir)
            .map_err(cache_err)?;
        tmp.write_all(content).map_err(cache_err)?;
        tmp.as_file().sync_all().map_err(cache_err)?;
        mark_executable(tmp.as_file()).map_err(cache_err)?;

        match tmp.persist_noclobber(path) {
            Ok(_) => Ok(CacheStatus::Created),
            // Another writer got there first with identical content.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(CacheStatus::Hit),
            Err(e) => Err(cache_err(e.error)),
        }
    }

    /// Delete every artifact this compiler owns in the cache directory.
    /// Returns how many files were removed.
    pub fn purge(&self) -> Result<usize> {
        let cache_err = |path: &Path, source: io::Error| HarnessError::CacheWrite {
            path: path.to_path_buf(),
            source,
        };

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(cache_err(&self.dir, e)),
        };

        let prefixes = [
            self.prefix(ArtifactKind::Timing),
            self.prefix(ArtifactKind::Whole),
        ];
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| cache_err(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if prefixes.iter().any(|p| name.starts_with(p.as_str())) {
                let path = entry.path();
                fs::remove_file(&path).map_err(|e| cache_err(&path, e))?;
                removed += 1;
            }
        }
        debug!(dir = %self.dir.display(), removed, "artifact cache purged");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PhpCompiler;
    use tempfile::tempdir;

    fn config() -> HarnessConfig {
        HarnessConfig::new().with_loop_count(1000).unwrap()
    }

    #[test]
    fn test_fingerprint_is_128_bit_hex() {
        let fp = fingerprint("$x = 1;", &config());
        assert_eq!(fp.len(), 32);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp, fingerprint("$x = 1;", &config()));
    }

    #[test]
    fn test_fingerprint_covers_every_baked_input() {
        let base = config();
        let fp = fingerprint("$x = 1;", &base);

        assert_ne!(fp, fingerprint("$x = 2;", &base));
        assert_ne!(fp, fingerprint("$x = 1;", &base.clone().with_set_up("$y = 0;")));
        assert_ne!(fp, fingerprint("$x = 1;", &base.clone().with_tear_down("$y = 0;")));
        assert_ne!(
            fp,
            fingerprint("$x = 1;", &base.clone().with_wrapping(Wrapping::Scoped))
        );
        assert_ne!(
            fp,
            fingerprint("$x = 1;", &base.clone().with_loop_count(10).unwrap())
        );
        assert_eq!(
            fp,
            fingerprint("$x = 1;", &base.clone().with_repetitions(3).unwrap())
        );
    }

    #[test]
    fn test_fingerprint_field_boundaries_do_not_alias() {
        let a = config().with_set_up("ab");
        let b = config().with_set_up("a");
        assert_ne!(fingerprint("c", &a), fingerprint("bc", &b));
    }

    #[test]
    fn test_kinds_share_fingerprint_but_not_path() {
        let dir = tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path(), PhpCompiler);
        let timing = cache.descriptor(ArtifactKind::Timing, "$x = 1;", &config());
        let whole = cache.descriptor(ArtifactKind::Whole, "$x = 1;", &config());

        assert_eq!(timing.fingerprint, whole.fingerprint);
        assert_ne!(timing.path, whole.path);
        assert_eq!(
            timing.path,
            dir.path().join(format!("php-time-{}", timing.fingerprint))
        );
        assert_eq!(
            whole.path,
            dir.path().join(format!("php-whole-{}", whole.fingerprint))
        );
    }

    #[test]
    fn test_miss_writes_rendered_content() {
        let dir = tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path(), PhpCompiler);
        let cfg = config();

        let (desc, status) = cache
            .materialize(ArtifactKind::Timing, "$x = 1;", &cfg)
            .unwrap();
        assert_eq!(status, CacheStatus::Created);
        assert_eq!(
            fs::read_to_string(&desc.path).unwrap(),
            PhpCompiler.build_timing("$x = 1;", &cfg)
        );

        let whole = cache
            .get_or_create(ArtifactKind::Whole, "$x = 1;", &cfg)
            .unwrap();
        assert_eq!(
            fs::read_to_string(whole).unwrap(),
            PhpCompiler.build_whole("$x = 1;", &cfg)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_created_artifact_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path(), PhpCompiler);
        let path = cache
            .get_or_create(ArtifactKind::Timing, "$x = 1;", &config())
            .unwrap();
        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }

    #[test]
    fn test_hit_reuses_existing_file_verbatim() {
        let dir = tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path(), PhpCompiler);
        let cfg = config();

        let desc = cache.descriptor(ArtifactKind::Timing, "$x = 1;", &cfg);
        fs::write(&desc.path, "stale but trusted").unwrap();

        let (again, status) = cache
            .materialize(ArtifactKind::Timing, "$x = 1;", &cfg)
            .unwrap();
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(again.path, desc.path);
        assert_eq!(fs::read_to_string(&desc.path).unwrap(), "stale but trusted");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path(), PhpCompiler);
        cache
            .get_or_create(ArtifactKind::Timing, "$x = 1;", &config())
            .unwrap();
        cache
            .get_or_create(ArtifactKind::Timing, "$x = 1;", &config())
            .unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("php-time-"));
    }

    #[test]
    fn test_concurrent_misses_produce_one_intact_file() {
        use rayon::prelude::*;

        let dir = tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path(), PhpCompiler);
        let cfg = config();

        let results: Vec<(ArtifactDescriptor, CacheStatus)> = (0..16)
            .into_par_iter()
            .map(|_| {
                cache
                    .materialize(ArtifactKind::Timing, "$x = 1;", &cfg)
                    .unwrap()
            })
            .collect();

        let created = results
            .iter()
            .filter(|(_, s)| *s == CacheStatus::Created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(
            fs::read_to_string(&results[0].0.path).unwrap(),
            PhpCompiler.build_timing("$x = 1;", &cfg)
        );
    }

    #[test]
    fn test_unwritable_dir_is_cache_write_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        let cache = ArtifactCache::new(blocker.join("cache"), PhpCompiler);
        let err = cache
            .get_or_create(ArtifactKind::Timing, "$x = 1;", &config())
            .unwrap_err();
        assert!(matches!(err, HarnessError::CacheWrite { .. }));
    }

    #[test]
    fn test_purge_removes_only_own_artifacts() {
        let dir = tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path(), PhpCompiler);
        let cfg = config();
        cache
            .get_or_create(ArtifactKind::Timing, "$x = 1;", &cfg)
            .unwrap();
        cache
            .get_or_create(ArtifactKind::Whole, "$x = 1;", &cfg)
            .unwrap();
        fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        assert_eq!(cache.purge().unwrap(), 2);
        assert!(dir.path().join("unrelated.txt").exists());
        assert_eq!(cache.purge().unwrap(), 0);
    }
}
