use std::fs;
use tch::{nn, Device, Reduction, Tensor};

use factorizer_core::Factorizer;
use tokenizer::Tokenizer;

use crate::build::TrainableModel;
use crate::checkpoint::{save_checkpoint, CheckpointRecord, TrainingHistory};
use crate::config::Config;
use crate::dataset::{Batch, DataLoader};
use crate::error::{require, ConfigError, Result};
use crate::scheduler::LrScheduler;

/// Teacher-forced cross-entropy of `batch`, positions holding `pad_id`
/// ignored.
///
/// The decoder reads `target[:, :-1]` and is scored against `target[:, 1:]`.
pub fn batch_loss(model: &Factorizer, batch: &Batch, pad_id: i64, train: bool) -> Tensor {
    let width = batch.target.size()[1];
    let decoder_input = batch.target.narrow(1, 0, width - 1);
    let labels = batch.target.narrow(1, 1, width - 1);

    let logits = model.forward_t(&batch.input, &decoder_input, train);
    let n_tokens = logits.size()[2];
    logits.view([-1, n_tokens]).cross_entropy_loss::<Tensor>(
        &labels.reshape([-1]),
        None,
        Reduction::Mean,
        pad_id,
        0.0,
    )
}

/// Mean loss per example over `loader`, without gradients.
pub fn evaluate_loss(model: &Factorizer, loader: &DataLoader, pad_id: i64, device: Device) -> f64 {
    let _guard = tch::no_grad_guard();
    let mut total = 0.0;
    let mut count = 0usize;
    for batch in loader.batches(0, device) {
        let rows = batch.numbers.len();
        total += batch_loss(model, &batch, pad_id, false).double_value(&[]) * rows as f64;
        count += rows;
    }
    if count == 0 {
        f64::NAN
    } else {
        total / count as f64
    }
}

/// Runs `scheduler.nb_epochs` epochs, checkpointing after each one.
///
/// The history in the checkpoint directory is replaced, so it only ever
/// describes this run.
pub fn run_training(
    trainable: &TrainableModel,
    optimizer: &mut nn::Optimizer,
    scheduler: &mut LrScheduler,
    tokenizer: &Tokenizer,
    train_loader: &DataLoader,
    test_loader: &DataLoader,
    device: Device,
    config: &Config,
) -> Result<TrainingHistory> {
    let nb_epochs = require(&config.scheduler.nb_epochs, "scheduler.nb_epochs")?;
    let max_grad_norm = config.optimizer.max_grad_norm;
    let log_every = (train_loader.len() / 10).max(1);
    let ckpt_dir = config.checkpoint_dir()?;
    let model = &trainable.model;
    let pad_id = tokenizer.pad_token_id();
    if pad_id != model.config.pad_token_id {
        return Err(ConfigError::InvalidField {
            field: "tokenizer.pad_token_id",
            reason: format!(
                "model was built with pad id {} but the tokenizer pads with {}",
                model.config.pad_token_id, pad_id
            ),
        }
        .into());
    }

    let mut history = TrainingHistory::default();
    fs::create_dir_all(&ckpt_dir)?;
    history.save(&ckpt_dir)?;

    for epoch in 1..=nb_epochs {
        let mut epoch_loss = 0.0;
        let mut n_batches = 0usize;

        for (batch_idx, batch) in train_loader.batches(epoch, device).enumerate() {
            let loss = batch_loss(model, &batch, pad_id, true);
            match max_grad_norm {
                Some(max_norm) => optimizer.backward_step_clip_norm(&loss, max_norm),
                None => optimizer.backward_step(&loss),
            }
            scheduler.step(optimizer);

            let loss_val = loss.double_value(&[]);
            epoch_loss += loss_val;
            n_batches += 1;

            if batch_idx % log_every == 0 {
                log::debug!(
                    "Epoch {} | Batch {}/{} | Loss: {:.4} | LR: {:.2e}",
                    epoch,
                    batch_idx,
                    train_loader.len(),
                    loss_val,
                    scheduler.current_lr()
                );
            }
        }

        let train_loss = finite_or_max(epoch_loss / n_batches.max(1) as f64, "train", epoch);
        let test_loss = evaluate_loss(model, test_loader, pad_id, device);
        let test_loss = finite_or_max(test_loss, "test", epoch);
        log::info!(
            "Epoch {}/{} | train loss {:.4} | test loss {:.4}",
            epoch,
            nb_epochs,
            train_loss,
            test_loss
        );

        let file = save_checkpoint(&trainable.vs, &ckpt_dir, epoch)?;
        history.push(CheckpointRecord {
            epoch,
            train_loss,
            test_loss,
            file,
        });
        history.save(&ckpt_dir)?;
    }

    Ok(history)
}

// JSON has no NaN or infinity; a diverged epoch is recorded as the worst loss.
fn finite_or_max(loss: f64, split: &str, epoch: usize) -> f64 {
    if loss.is_finite() {
        loss
    } else {
        log::warn!("Epoch {epoch}: {split} loss is {loss}, recording it as f64::MAX");
        f64::MAX
    }
}
