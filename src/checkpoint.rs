use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use machine_learning::ParamState;
use ndarray::{ArrayD, IxDyn};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{Result, SplitErr};

/// Saves and restores segment states, one safetensors file per (participant, segment).
///
/// Files live under `<root>/<dataset>/key_value_mode/model_split<split>/` and are named
/// `client_<id>_<config>_<segment>.safetensors`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    root: PathBuf,
    dataset: String,
    config: String,
    split: usize,
}

impl CheckpointStore {
    pub fn new(
        root: impl Into<PathBuf>,
        dataset: impl Into<String>,
        config: impl Into<String>,
        split: usize,
    ) -> Self {
        Self {
            root: root.into(),
            dataset: dataset.into(),
            config: config.into(),
            split,
        }
    }

    /// The directory holding every file of this run.
    pub fn dir(&self) -> PathBuf {
        self.root
            .join(&self.dataset)
            .join("key_value_mode")
            .join(format!("model_split{}", self.split))
    }

    pub fn path(&self, participant: &str, segment: &str) -> PathBuf {
        self.dir().join(format!(
            "client_{participant}_{}_{segment}.safetensors",
            self.config
        ))
    }

    /// Writes `state` to the file of (`participant`, `segment`).
    pub fn save(&self, participant: &str, segment: &str, state: &ParamState) -> Result<PathBuf> {
        fs::create_dir_all(self.dir())?;
        let path = self.path(participant, segment);

        let metadata = Some(HashMap::from([
            ("participant".to_string(), participant.to_string()),
            ("segment".to_string(), segment.to_string()),
        ]));

        write_state(state, &metadata, &path)?;
        debug!(participant = participant, segment = segment; "saved {}", path.display());
        Ok(path)
    }

    /// Reads the state of (`participant`, `segment`).
    pub fn load(&self, participant: &str, segment: &str) -> Result<ParamState> {
        read_state(&self.path(participant, segment))
    }
}

fn write_state(
    state: &ParamState,
    metadata: &Option<HashMap<String, String>>,
    path: &Path,
) -> Result<()> {
    let buffers: Vec<(&str, Vec<usize>, Vec<f32>)> = state
        .iter()
        .map(|(name, t)| (name.as_str(), t.shape().to_vec(), t.iter().copied().collect()))
        .collect();

    let views = buffers
        .iter()
        .map(|(name, shape, values)| {
            TensorView::new(Dtype::F32, shape.clone(), bytemuck::cast_slice(values.as_slice()))
                .map(|view| (*name, view))
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| checkpoint_err(path, e))?;

    safetensors::serialize_to_file(views, metadata, path).map_err(|e| checkpoint_err(path, e))
}

fn read_state(path: &Path) -> Result<ParamState> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes).map_err(|e| checkpoint_err(path, e))?;

    let mut state = ParamState::new();

    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(checkpoint_err(
                path,
                format!("tensor {name} is {:?}, expected F32", view.dtype()),
            ));
        }

        // The byte buffer isn't guaranteed to be aligned for f32.
        let values: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        let tensor = ArrayD::from_shape_vec(IxDyn(view.shape()), values)
            .map_err(|e| checkpoint_err(path, e))?;

        state.insert(name, tensor);
    }

    Ok(state)
}

fn checkpoint_err(path: &Path, detail: impl ToString) -> SplitErr {
    SplitErr::Checkpoint {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use ndarray::array;

    use super::*;

    fn store(tag: &str) -> CheckpointStore {
        let dir = format!("split_learning_ckpt_{tag}_{}", std::process::id());
        CheckpointStore::new(env::temp_dir().join(dir), "blobs", "mlp_split1", 1)
    }

    #[test]
    fn paths_follow_the_naming_scheme() {
        let store = CheckpointStore::new("saved_models", "blobs", "mlp_split1", 2);

        assert_eq!(
            store.path("ab12", "center_back"),
            Path::new("saved_models/blobs/key_value_mode/model_split2")
                .join("client_ab12_mlp_split1_center_back.safetensors")
        );
    }

    #[test]
    fn save_then_load_is_bit_identical() {
        let store = store("roundtrip");
        let state: ParamState = [
            ("0.weight".to_string(), array![[0.1f32, -2.5], [3.0, 1e-7]].into_dyn()),
            ("0.bias".to_string(), array![f32::MIN_POSITIVE, 0.0].into_dyn()),
        ]
        .into_iter()
        .collect();

        store.save("ab12", "back", &state).unwrap();
        let loaded = store.load("ab12", "back").unwrap();

        assert_eq!(loaded, state);
        fs::remove_dir_all(&store.root).ok();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = store("missing").load("nobody", "front").unwrap_err();
        assert!(matches!(err, SplitErr::Io(_)));
    }
}
