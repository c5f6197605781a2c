use acqwatch_lifecycle::{ArtifactError, ArtifactGenerator, TrackedItem};
use acqwatch_request_index::RequestId;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

const MANIFEST_SUFFIX: &str = ".manifest.json";

#[derive(Serialize)]
struct RegistrationManifest<'a> {
    dataset: &'a str,
    source_path: &'a Path,
    size_bytes: u64,
    quality_control: bool,
    request_id: Option<RequestId>,
    request_name: Option<&'a str>,
    discovered_at_unix_ms: u64,
    acquired_at_unix_ms: u64,
    generated_at_unix_ms: u64,
}

/// Artifact generator writing one registration manifest per dataset into
/// the output directory. The duplicate-detection list is seeded from the
/// manifests already on disk, so datasets registered out of band are
/// never re-registered.
pub struct ManifestWriter {
    out_dir: PathBuf,
    generated: Mutex<HashSet<String>>,
}

impl ManifestWriter {
    pub fn new(out_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(out_dir)?;
        let mut generated = HashSet::new();
        for entry in std::fs::read_dir(out_dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(MANIFEST_SUFFIX) {
                generated.insert(stem.to_lowercase());
            }
        }
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            generated: Mutex::new(generated),
        })
    }
}

#[async_trait]
impl ArtifactGenerator for ManifestWriter {
    fn already_generated(&self, name: &str) -> bool {
        self.generated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&name.to_lowercase())
    }

    async fn generate(&self, item: &TrackedItem) -> Result<(), ArtifactError> {
        let manifest = RegistrationManifest {
            dataset: &item.name,
            source_path: &item.source_path,
            size_bytes: item.size_bytes,
            quality_control: item.quality_control,
            request_id: item.request_match.as_ref().map(|m| m.request_id),
            request_name: item.request_match.as_ref().map(|m| m.request_name.as_str()),
            discovered_at_unix_ms: unix_ms(item.discovered_at),
            acquired_at_unix_ms: unix_ms(item.last_write),
            generated_at_unix_ms: unix_ms(SystemTime::now()),
        };
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| ArtifactError::Unknown(err.to_string()))?;

        // Stage then rename, so a crash never leaves a half-written
        // manifest that the duplicate scan would trust.
        let target = self.out_dir.join(format!("{}{MANIFEST_SUFFIX}", item.name));
        let staged = self.out_dir.join(format!("{}{MANIFEST_SUFFIX}.tmp", item.name));
        tokio::fs::write(&staged, &body)
            .await
            .map_err(|err| ArtifactError::FileSystem(err.to_string()))?;
        tokio::fs::rename(&staged, &target)
            .await
            .map_err(|err| ArtifactError::FileSystem(err.to_string()))?;

        self.generated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.name.to_lowercase());
        Ok(())
    }
}

fn unix_ms(at: SystemTime) -> u64 {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .and_then(|dur| u64::try_from(dur.as_millis()).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn item(name: &str) -> TrackedItem {
        TrackedItem::new(
            PathBuf::from(format!("/data/{name}.raw")),
            4096,
            SystemTime::now(),
        )
    }

    #[tokio::test]
    async fn writes_a_manifest_and_remembers_it() {
        let out = tempfile::tempdir().unwrap();
        let writer = ManifestWriter::new(out.path()).unwrap();

        assert!(!writer.already_generated("ProjectA_Run1"));
        writer.generate(&item("ProjectA_Run1")).await.unwrap();

        let target = out.path().join("ProjectA_Run1.manifest.json");
        assert!(target.exists());
        assert!(writer.already_generated("ProjectA_Run1"));
        // Duplicate detection is name-based and case-insensitive.
        assert!(writer.already_generated("projecta_run1"));

        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(body["dataset"], "ProjectA_Run1");
        assert_eq!(body["size_bytes"], 4096);
    }

    #[tokio::test]
    async fn seeds_duplicates_from_existing_manifests() {
        let out = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join("QC_Blank_01.manifest.json"), "{}").unwrap();

        let writer = ManifestWriter::new(out.path()).unwrap();
        assert!(writer.already_generated("qc_blank_01"));
        assert!(!writer.already_generated("qc_blank_02"));
    }
}
