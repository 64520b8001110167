//! On-disk face library and the pending-enrollment cache.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::providers::{FaceFeatureMap, FaceInfo};

/// Head pose limits (degrees) for an acceptable enrollment capture.
const MAX_POSE_ANGLE: f32 = 30.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FaceRecord {
    name: String,
    is_host: bool,
    feature: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryFile {
    faces: Vec<FaceRecord>,
}

/// Outcome of the per-iteration face pose quality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseCheck {
    Ok,
    NoFace,
    MultipleFaces,
    BadPose,
}

impl PoseCheck {
    /// Progress result code for this check; 0 is reserved for acceptance.
    pub fn code(&self) -> i32 {
        match self {
            PoseCheck::Ok => 0,
            PoseCheck::NoFace => 1,
            PoseCheck::MultipleFaces => 2,
            PoseCheck::BadPose => 4,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PoseCheck::Ok => "face ok",
            PoseCheck::NoFace => "no face in frame",
            PoseCheck::MultipleFaces => "more than one face in frame",
            PoseCheck::BadPose => "face not frontal enough",
        }
    }
}

/// Exactly one roughly frontal face is required for an enrollment capture.
pub fn check_face_pose(faces: &[FaceInfo]) -> PoseCheck {
    match faces {
        [] => PoseCheck::NoFace,
        [face] => {
            if face.pose.iter().all(|a| a.abs() <= MAX_POSE_ANGLE) {
                PoseCheck::Ok
            } else {
                PoseCheck::BadPose
            }
        }
        _ => PoseCheck::MultipleFaces,
    }
}

#[derive(Debug, Clone)]
struct PendingFace {
    username: String,
    is_host: bool,
    feature: Option<Vec<f32>>,
}

/// The enrolled-faces store: a name to feature-vector map persisted as a
/// YAML snapshot, plus the cache a capture session fills before `confirm`
/// commits it.
pub struct FaceLibrary {
    path: PathBuf,
    records: HashMap<String, FaceRecord>,
    pending: Option<PendingFace>,
}

impl FaceLibrary {
    /// Load the snapshot at `path`; a missing file is an empty library.
    pub fn load(path: PathBuf) -> Result<Self> {
        let records = match fs::read_to_string(&path) {
            Ok(text) => {
                let file: LibraryFile = serde_yaml::from_str(&text)
                    .with_context(|| format!("malformed face library {}", path.display()))?;
                file.faces.into_iter().map(|r| (r.name.clone(), r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading face library {}", path.display()))
            }
        };
        Ok(Self { path, records, pending: None })
    }

    fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let file = LibraryFile { faces: self.records.values().cloned().collect() };
        let text = serde_yaml::to_string(&file)?;
        fs::write(&self.path, text)
            .with_context(|| format!("writing face library {}", self.path.display()))
    }

    /// Snapshot of name -> feature for the recognition provider.
    pub fn features(&self) -> FaceFeatureMap {
        self.records
            .iter()
            .map(|(name, rec)| (name.clone(), rec.feature.clone()))
            .collect()
    }

    /// Stage a new enrollment: remember who is being captured.
    pub fn begin_enrollment(&mut self, username: &str, is_host: bool) {
        self.pending = Some(PendingFace {
            username: username.to_string(),
            is_host,
            feature: None,
        });
    }

    /// Attach the captured feature vector to the staged enrollment.
    pub fn cache_feature(&mut self, feature: Vec<f32>) {
        if let Some(pending) = self.pending.as_mut() {
            pending.feature = Some(feature);
        }
    }

    /// Drop any staged enrollment. Returns whether one existed.
    pub fn cancel_enrollment(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Commit the staged capture to the library under `username` and save.
    pub fn confirm(&mut self, username: &str, is_host: bool) -> Result<()> {
        let pending = match self.pending.take() {
            Some(p) => p,
            None => bail!("no pending enrollment to confirm"),
        };
        let feature = match pending.feature {
            Some(f) => f,
            None => bail!("pending enrollment for '{}' has no captured face", pending.username),
        };
        self.records.insert(
            username.to_string(),
            FaceRecord { name: username.to_string(), is_host, feature },
        );
        self.save()?;
        info!(username, "face enrolled");
        Ok(())
    }

    /// Rename an enrolled face.
    pub fn update_id(&mut self, ori_name: &str, new_name: &str) -> Result<()> {
        let mut record = match self.records.remove(ori_name) {
            Some(r) => r,
            None => bail!("no enrolled face named '{ori_name}'"),
        };
        record.name = new_name.to_string();
        self.records.insert(new_name.to_string(), record);
        self.save()
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        if self.records.remove(name).is_none() {
            bail!("no enrolled face named '{name}'");
        }
        self.save()
    }

    /// Newline-separated `name:is_host` listing of all enrolled faces.
    pub fn list_all(&self) -> String {
        let mut names: Vec<_> = self.records.values().collect();
        names.sort_by(|a, b| a.name.cmp(&b.name));
        names
            .iter()
            .map(|r| format!("{}:{}", r.name, if r.is_host { 1 } else { 0 }))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;

    fn face(pose: [f32; 3]) -> FaceInfo {
        FaceInfo { rect: Rect::new(0, 0, 50, 50), pose, features: vec![0.1; 8] }
    }

    fn temp_library() -> (tempfile::TempDir, FaceLibrary) {
        let dir = tempfile::tempdir().unwrap();
        let lib = FaceLibrary::load(dir.path().join("faceinfo.yaml")).unwrap();
        (dir, lib)
    }

    #[test]
    fn test_pose_check() {
        assert_eq!(check_face_pose(&[]), PoseCheck::NoFace);
        assert_eq!(check_face_pose(&[face([0.0, 5.0, -10.0])]), PoseCheck::Ok);
        assert_eq!(check_face_pose(&[face([45.0, 0.0, 0.0])]), PoseCheck::BadPose);
        assert_eq!(
            check_face_pose(&[face([0.0; 3]), face([0.0; 3])]),
            PoseCheck::MultipleFaces
        );
    }

    #[test]
    fn test_enroll_confirm_persists() {
        let (dir, mut lib) = temp_library();
        lib.begin_enrollment("alice", true);
        lib.cache_feature(vec![1.0, 2.0]);
        lib.confirm("alice", true).unwrap();
        assert_eq!(lib.features().len(), 1);

        // Reload from disk.
        let reloaded = FaceLibrary::load(dir.path().join("faceinfo.yaml")).unwrap();
        assert_eq!(reloaded.features()["alice"], vec![1.0, 2.0]);
    }

    #[test]
    fn test_confirm_without_capture_fails() {
        let (_dir, mut lib) = temp_library();
        lib.begin_enrollment("bob", false);
        assert!(lib.confirm("bob", false).is_err());
    }

    #[test]
    fn test_cancel_clears_pending() {
        let (_dir, mut lib) = temp_library();
        lib.begin_enrollment("bob", false);
        assert!(lib.cancel_enrollment());
        assert!(!lib.cancel_enrollment());
    }

    #[test]
    fn test_update_and_delete() {
        let (_dir, mut lib) = temp_library();
        lib.begin_enrollment("old", false);
        lib.cache_feature(vec![3.0]);
        lib.confirm("old", false).unwrap();

        lib.update_id("old", "new").unwrap();
        assert!(lib.features().contains_key("new"));
        assert!(lib.update_id("old", "newer").is_err());

        lib.delete("new").unwrap();
        assert!(lib.delete("new").is_err());
        assert!(lib.list_all().is_empty());
    }

    #[test]
    fn test_list_all_sorted() {
        let (_dir, mut lib) = temp_library();
        for (name, host) in [("zoe", false), ("amy", true)] {
            lib.begin_enrollment(name, host);
            lib.cache_feature(vec![0.0]);
            lib.confirm(name, host).unwrap();
        }
        assert_eq!(lib.list_all(), "amy:1\nzoe:0");
    }
}
