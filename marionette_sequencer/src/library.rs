//! Sequence library: the named, immutable store of compiled sequences.
//!
//! Loaded once at startup from a directory of JSON definition files.
//! Loading is fail-fast: any unreadable, unparsable, or invalid definition
//! rejects the whole load, so the engine never runs against a partially
//! installed library.

use crate::sequence::{Sequence, SequenceDef, SequenceError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors while building the library.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// Directory or file I/O failure.
    #[error("library I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    /// JSON deserialization failure.
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    /// A definition parsed but failed compilation.
    #[error("invalid sequence in {path}: {source}")]
    Compile {
        path: String,
        source: SequenceError,
    },

    /// Two definitions share a name.
    #[error("duplicate sequence name '{0}'")]
    DuplicateName(String),
}

/// Read-only collection of compiled sequences, keyed by name.
///
/// Sequences are held behind `Arc` so a playback keeps its sequence alive
/// even if the library is later rebuilt.
#[derive(Debug, Default)]
pub struct SequenceLibrary {
    sequences: HashMap<String, Arc<Sequence>>,
}

impl SequenceLibrary {
    /// Empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and install one definition.
    pub fn insert(&mut self, def: SequenceDef) -> Result<(), LibraryError> {
        let sequence = Sequence::compile(def).map_err(|source| LibraryError::Compile {
            path: "<inline>".into(),
            source,
        })?;
        self.install(sequence)
    }

    fn install(&mut self, sequence: Sequence) -> Result<(), LibraryError> {
        let name = sequence.name().to_owned();
        if self.sequences.contains_key(&name) {
            return Err(LibraryError::DuplicateName(name));
        }
        self.sequences.insert(name, Arc::new(sequence));
        Ok(())
    }

    /// Load every `*.json` file in a directory.
    ///
    /// Files are visited in name order so duplicate-name errors are
    /// deterministic.
    pub fn load_dir(dir: &Path) -> Result<Self, LibraryError> {
        let entries = std::fs::read_dir(dir).map_err(|e| LibraryError::Io {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut library = Self::new();
        for path in paths {
            let path_str = path.display().to_string();
            let raw = std::fs::read_to_string(&path).map_err(|e| LibraryError::Io {
                path: path_str.clone(),
                reason: e.to_string(),
            })?;
            let def: SequenceDef =
                serde_json::from_str(&raw).map_err(|e| LibraryError::Parse {
                    path: path_str.clone(),
                    reason: e.to_string(),
                })?;
            let sequence = Sequence::compile(def).map_err(|source| LibraryError::Compile {
                path: path_str.clone(),
                source,
            })?;
            debug!(sequence = sequence.name(), path = %path_str, "loaded sequence");
            library.install(sequence)?;
        }
        Ok(library)
    }

    /// Look up a sequence by name.
    pub fn get(&self, name: &str) -> Option<Arc<Sequence>> {
        self.sequences.get(name).cloned()
    }

    /// Number of installed sequences.
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// True if the library holds no sequences.
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Installed sequence names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.sequences.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::easing::EasingKind;
    use crate::track::{Keyframe, Track};
    use std::io::Write;

    fn def(name: &str) -> SequenceDef {
        SequenceDef {
            name: name.into(),
            duration: 1.0,
            frame_rate: 50,
            looped: false,
            tracks: vec![Track {
                channel_id: 0,
                speed_multiplier: 1.0,
                keyframes: vec![Keyframe {
                    time_offset: 0.0,
                    position_us: 1500.0,
                    easing: EasingKind::Linear,
                }],
            }],
        }
    }

    #[test]
    fn insert_and_lookup() {
        let mut library = SequenceLibrary::new();
        library.insert(def("wave")).unwrap();
        library.insert(def("nod")).unwrap();

        assert_eq!(library.len(), 2);
        assert!(library.get("wave").is_some());
        assert!(library.get("missing").is_none());
        assert_eq!(library.names(), vec!["nod".to_owned(), "wave".to_owned()]);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut library = SequenceLibrary::new();
        library.insert(def("wave")).unwrap();
        assert!(matches!(
            library.insert(def("wave")),
            Err(LibraryError::DuplicateName(_))
        ));
    }

    #[test]
    fn load_dir_reads_json_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["alpha", "beta"] {
            let mut file = std::fs::File::create(dir.path().join(format!("{name}.json"))).unwrap();
            let json = serde_json::to_string(&def(name)).unwrap();
            file.write_all(json.as_bytes()).unwrap();
        }
        // A non-JSON file is ignored.
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let library = SequenceLibrary::load_dir(dir.path()).unwrap();
        assert_eq!(library.len(), 2);
        assert!(library.get("alpha").is_some());
        assert!(library.get("beta").is_some());
    }

    #[test]
    fn load_dir_fails_fast_on_invalid_definition() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = def("bad");
        bad.duration = -1.0;
        std::fs::write(
            dir.path().join("bad.json"),
            serde_json::to_string(&bad).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("good.json"),
            serde_json::to_string(&def("good")).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            SequenceLibrary::load_dir(dir.path()),
            Err(LibraryError::Compile { .. })
        ));
    }

    #[test]
    fn load_dir_rejects_unparsable_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        assert!(matches!(
            SequenceLibrary::load_dir(dir.path()),
            Err(LibraryError::Parse { .. })
        ));
    }
}
