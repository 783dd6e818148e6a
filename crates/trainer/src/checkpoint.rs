//! Per-epoch checkpoints and the history used to pick the best one.
//!
//! Layout under `save_path`:
//!
//! ```text
//! checkpoints/
//!     epoch_0001.safetensors
//!     epoch_0002.safetensors
//!     history.json
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tch::nn;

use factorizer_core::safetensors_util::{load_safetensors, save_safetensors};

use crate::error::{PipelineError, Result};

pub const CHECKPOINT_DIR: &str = "checkpoints";
pub const HISTORY_FILE: &str = "history.json";

pub fn checkpoint_dir(save_path: &Path) -> PathBuf {
    save_path.join(CHECKPOINT_DIR)
}

pub fn checkpoint_file_name(epoch: usize) -> String {
    format!("epoch_{epoch:04}.safetensors")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub test_loss: f64,
    /// File name relative to the checkpoint directory.
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub records: Vec<CheckpointRecord>,
}

impl TrainingHistory {
    /// Loads the history in `dir`. A missing file is an empty history.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(HISTORY_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Writes through a temporary file so a reader never sees a partial history.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(HISTORY_FILE);
        let tmp = dir.join(format!("{HISTORY_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn push(&mut self, record: CheckpointRecord) {
        self.records.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Lowest test loss; ties go to the earliest epoch.
    pub fn best(&self) -> Option<&CheckpointRecord> {
        self.records.iter().min_by(|a, b| by_test_loss(a, b))
    }
}

/// Writes the model weights for `epoch` and returns the file name.
pub fn save_checkpoint(vs: &nn::VarStore, dir: &Path, epoch: usize) -> Result<String> {
    fs::create_dir_all(dir)?;
    let file = checkpoint_file_name(epoch);
    save_safetensors(vs, dir.join(&file))?;
    Ok(file)
}

/// Path of the best checkpoint recorded under `save_path`.
///
/// The result depends only on the recorded history, never on file
/// timestamps or directory order.
pub fn get_target_checkpoint(save_path: &Path) -> Result<PathBuf> {
    let dir = checkpoint_dir(save_path);
    select_best(&TrainingHistory::load(&dir)?, &dir)
}

/// Best record of `history` whose file exists in `dir`.
pub fn select_best(history: &TrainingHistory, dir: &Path) -> Result<PathBuf> {
    let best = history
        .records
        .iter()
        .filter(|record| {
            let present = dir.join(&record.file).is_file();
            if !present {
                log::warn!("Checkpoint {} for epoch {} is missing", record.file, record.epoch);
            }
            present
        })
        .min_by(|a, b| by_test_loss(a, b))
        .ok_or_else(|| PipelineError::NoCheckpointFound(dir.to_path_buf()))?;

    let path = dir.join(&best.file);
    log::info!(
        "Selected checkpoint {:?} (epoch {}, test loss {:.4})",
        path,
        best.epoch,
        best.test_loss
    );
    Ok(path)
}

// Lowest test loss first; ties go to the earliest epoch.
fn by_test_loss(a: &CheckpointRecord, b: &CheckpointRecord) -> Ordering {
    a.test_loss
        .total_cmp(&b.test_loss)
        .then(a.epoch.cmp(&b.epoch))
}

/// Loads `checkpoint` into `vs`. Every parameter must be present with its
/// exact shape.
pub fn restore_checkpoint(vs: &mut nn::VarStore, checkpoint: &Path) -> Result<()> {
    load_safetensors(vs, checkpoint)?;
    Ok(())
}
