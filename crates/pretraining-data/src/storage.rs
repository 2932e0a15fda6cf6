//! Dataset upload seam.
//!
//! A [`DatasetStore`] takes a prepared dataset directory and a destination
//! location string (for example `s3://bucket/datasets/wikicorpus`) and returns
//! the location the training job should read from. Only `manifest.json` and
//! the shards it lists are uploaded. Failures are surfaced to the caller as
//! [`StorageError`]; nothing here retries.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::dataset::{DatasetManifest, MANIFEST_FILE};
use crate::errors::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;

pub trait DatasetStore: Send + Sync {
    /// Uploads the dataset in `dataset_dir` and returns its location.
    fn upload(&self, dataset_dir: &Path, destination: &str) -> Result<String>;

    fn backend_type(&self) -> &'static str;
}

/// Mirrors datasets into a local directory tree keyed by destination.
///
/// `s3://bucket/prefix` lands in `<root>/bucket/prefix`; a destination
/// without a scheme is taken relative to the root.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local directory a destination maps to.
    pub fn resolve(&self, destination: &str) -> Result<PathBuf> {
        let (_, key) = split_destination(destination)?;
        Ok(self.root.join(key))
    }
}

impl DatasetStore for LocalStore {
    fn upload(&self, dataset_dir: &Path, destination: &str) -> Result<String> {
        let location = dataset_location(destination)?;
        let manifest = load_manifest(dataset_dir)?;
        let target = self.resolve(destination)?;

        // Copying into the dataset itself would truncate the shards.
        let source_dir = resolve_lenient(dataset_dir)?;
        let resolved_target = resolve_lenient(&target)?;
        if resolved_target.starts_with(&source_dir) {
            return Err(StorageError::Overlap {
                source_dir,
                target: resolved_target,
            });
        }

        let listed: BTreeSet<PathBuf> = manifest
            .shards
            .iter()
            .map(|shard| PathBuf::from(&shard.file))
            .chain([PathBuf::from(MANIFEST_FILE)])
            .collect();
        let ignored: Vec<PathBuf> = collect_files(dataset_dir)?
            .into_iter()
            .filter(|file| !listed.contains(file))
            .collect();
        if !ignored.is_empty() {
            log::warn!(
                "ignoring {} file(s) in {} not listed in the manifest: {:?}",
                ignored.len(),
                dataset_dir.display(),
                ignored
            );
        }

        log::info!(
            "uploading {} shard(s) from {} to {}",
            manifest.shards.len(),
            dataset_dir.display(),
            location
        );
        fs::create_dir_all(&target)?;

        for shard in &manifest.shards {
            let copy = target.join(&shard.file);
            fs::copy(dataset_dir.join(&shard.file), &copy)?;
            verify(&copy, &shard.sha256)?;
            log::debug!("uploaded {} ({})", shard.file, shard.sha256);
        }

        // The manifest goes last so a partial upload is never mistaken for a
        // complete dataset.
        let source = dataset_dir.join(MANIFEST_FILE);
        let expected = sha256_of_file(&source)?;
        let copy = target.join(MANIFEST_FILE);
        fs::copy(&source, &copy)?;
        verify(&copy, &expected)?;

        Ok(location)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

/// Location string a dataset uploaded to `destination` is read back from.
pub fn dataset_location(destination: &str) -> Result<String> {
    split_destination(destination)?;
    Ok(destination.trim_end_matches('/').to_owned())
}

/// Splits `scheme://key` into its parts; the scheme is optional. The key may
/// not be empty, absolute, or climb out of the store with `..`.
pub fn split_destination(destination: &str) -> Result<(Option<&str>, &str)> {
    let invalid = || StorageError::InvalidDestination(destination.to_owned());

    let (scheme, key) = match destination.split_once("://") {
        Some((scheme, key)) if !scheme.is_empty() => (Some(scheme), key),
        Some(_) => return Err(invalid()),
        None => (None, destination),
    };

    let key = key.trim_end_matches('/');
    if key.is_empty() || !is_relative_normal(Path::new(key)) {
        return Err(invalid());
    }

    Ok((scheme, key))
}

fn is_relative_normal(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_)))
}

fn load_manifest(dataset_dir: &Path) -> Result<DatasetManifest> {
    let not_a_dataset = |reason: String| StorageError::NotADataset {
        path: dataset_dir.to_path_buf(),
        reason,
    };

    let path = dataset_dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(not_a_dataset(format!("{MANIFEST_FILE} not found")));
    }
    let manifest: DatasetManifest = serde_json::from_reader(BufReader::new(File::open(&path)?))
        .map_err(|err| not_a_dataset(format!("unreadable {MANIFEST_FILE}: {err}")))?;

    for shard in &manifest.shards {
        let name = Path::new(&shard.file);
        if name.components().count() != 1 || !is_relative_normal(name) {
            return Err(not_a_dataset(format!(
                "shard name '{}' is not a plain file name",
                shard.file
            )));
        }
    }
    Ok(manifest)
}

/// Every file under `dir`, relative to it, sorted.
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file() {
            if let Ok(relative) = entry.path().strip_prefix(dir) {
                files.push(relative.to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Canonical form of `path`, which need not exist yet: the deepest existing
/// ancestor is canonicalized and the missing components are appended.
fn resolve_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(base) => {
                return Ok(missing
                    .iter()
                    .rev()
                    .fold(base, |acc, part| acc.join(part)));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let name = existing.file_name().map(|name| name.to_os_string());
                let parent = existing.parent().map(Path::to_path_buf);
                match (name, parent) {
                    (Some(name), Some(parent)) => {
                        missing.push(name);
                        existing = if parent.as_os_str().is_empty() {
                            PathBuf::from(".")
                        } else {
                            parent
                        };
                    }
                    _ => return Err(err),
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn verify(copy: &Path, expected: &str) -> Result<()> {
    let actual = sha256_of_file(copy)?;
    if actual != expected {
        return Err(StorageError::Integrity {
            path: copy.to_path_buf(),
            expected: expected.to_owned(),
            actual,
        });
    }
    Ok(())
}

fn sha256_of_file(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut reader = BufReader::new(File::open(path)?);
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{Block, ChunkStats};
    use crate::dataset::{DatasetLayout, DatasetWriter};

    fn block(id: u32) -> Block {
        Block {
            input_ids: vec![id, id + 1],
            attention_mask: vec![1, 1],
            labels: vec![id, id + 1],
        }
    }

    /// Writes `blocks` one-block shards into `dir`.
    fn dataset(dir: &Path, blocks: u32) -> DatasetManifest {
        let mut layout = DatasetLayout::new(dir);
        layout.blocks_per_shard = 1;
        let mut writer = DatasetWriter::create(layout).unwrap();
        for id in 0..blocks {
            writer.write(&block(id)).unwrap();
        }
        let stats = ChunkStats {
            block_size: 2,
            blocks: blocks as usize,
            ..ChunkStats::default()
        };
        writer.finish(&stats).unwrap()
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn splits_scheme_and_key() {
        assert_eq!(
            split_destination("s3://bucket/data/").unwrap(),
            (Some("s3"), "bucket/data")
        );
        assert_eq!(split_destination("data/run").unwrap(), (None, "data/run"));
        assert_eq!(
            dataset_location("s3://bucket/data/").unwrap(),
            "s3://bucket/data"
        );
    }

    #[test]
    fn rejects_unsafe_destinations() {
        for bad in ["", "s3://", "://bucket", "/abs/path", "bucket/../escape"] {
            assert!(
                matches!(split_destination(bad), Err(StorageError::InvalidDestination(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn upload_mirrors_dataset_under_root() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("dataset");
        let manifest = dataset(&source, 2);

        let store = LocalStore::new(tmp.path().join("store"));
        let location = store.upload(&source, "s3://bucket/corpus/").unwrap();

        assert_eq!(location, "s3://bucket/corpus");
        let copied = tmp.path().join("store/bucket/corpus");
        assert_eq!(
            file_names(&copied),
            vec!["manifest.json", "train-00000.jsonl", "train-00001.jsonl"]
        );
        for shard in &manifest.shards {
            assert_eq!(
                fs::read(copied.join(&shard.file)).unwrap(),
                fs::read(source.join(&shard.file)).unwrap()
            );
        }
    }

    #[test]
    fn rewritten_dataset_uploads_only_current_shards() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("dataset");
        dataset(&source, 3);
        let manifest = dataset(&source, 1);
        assert_eq!(manifest.shards.len(), 1);

        let store = LocalStore::new(tmp.path().join("store"));
        store.upload(&source, "bucket/x").unwrap();

        assert_eq!(
            file_names(&tmp.path().join("store/bucket/x")),
            vec!["manifest.json", "train-00000.jsonl"]
        );
    }

    #[test]
    fn unlisted_files_are_left_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("dataset");
        dataset(&source, 1);
        fs::create_dir_all(source.join("notes")).unwrap();
        fs::write(source.join("notes/readme.txt"), "scratch").unwrap();

        assert_eq!(
            collect_files(&source).unwrap(),
            vec![
                PathBuf::from("manifest.json"),
                PathBuf::from("notes/readme.txt"),
                PathBuf::from("train-00000.jsonl"),
            ]
        );

        let store = LocalStore::new(tmp.path().join("store"));
        store.upload(&source, "bucket/x").unwrap();
        assert_eq!(
            file_names(&tmp.path().join("store/bucket/x")),
            vec!["manifest.json", "train-00000.jsonl"]
        );
    }

    #[test]
    fn upload_onto_itself_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::new(tmp.path().join("store"));
        let source = tmp.path().join("store/bucket/x");
        dataset(&source, 1);
        let before = fs::read(source.join("train-00000.jsonl")).unwrap();

        let err = store.upload(&source, "s3://bucket/x").unwrap_err();
        assert!(matches!(err, StorageError::Overlap { .. }));

        let err = store.upload(&source, "s3://bucket/x/nested").unwrap_err();
        assert!(matches!(err, StorageError::Overlap { .. }));

        assert_eq!(fs::read(source.join("train-00000.jsonl")).unwrap(), before);
    }

    #[test]
    fn shard_that_no_longer_matches_manifest_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("dataset");
        dataset(&source, 1);
        fs::write(source.join("train-00000.jsonl"), "{\"input_ids\":[9]}\n").unwrap();

        let store = LocalStore::new(tmp.path().join("store"));
        let err = store.upload(&source, "bucket/x").unwrap_err();
        assert!(matches!(err, StorageError::Integrity { .. }));
        assert!(!tmp.path().join("store/bucket/x/manifest.json").exists());
    }

    #[test]
    fn upload_requires_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::new(tmp.path().join("store"));
        let err = store.upload(tmp.path(), "bucket/x").unwrap_err();
        assert!(matches!(err, StorageError::NotADataset { .. }));
    }

    #[test]
    fn manifest_shard_names_must_stay_inside_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("dataset");
        dataset(&source, 1);
        let path = source.join(MANIFEST_FILE);
        let manifest = fs::read_to_string(&path)
            .unwrap()
            .replace("train-00000.jsonl", "../outside.jsonl");
        fs::write(&path, manifest).unwrap();

        let store = LocalStore::new(tmp.path().join("store"));
        let err = store.upload(&source, "bucket/x").unwrap_err();
        assert!(matches!(err, StorageError::NotADataset { .. }));
    }
}
