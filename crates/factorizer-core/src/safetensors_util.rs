use memmap2::MmapOptions;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use tch::{nn, Device, Kind, Tensor};

use crate::error::ModelError;

/// Writes every variable of `vs` as an F32 tensor, sorted by name.
pub fn save_safetensors<P: AsRef<Path>>(vs: &nn::VarStore, path: P) -> Result<(), ModelError> {
    let variables = vs.variables();
    let mut names: Vec<&String> = variables.keys().collect();
    names.sort();

    let mut buffers = Vec::with_capacity(names.len());
    for name in names {
        let tensor = &variables[name];
        let shape: Vec<usize> = tensor.size().iter().map(|&d| d as usize).collect();
        let values = tch::no_grad(|| {
            Vec::<f32>::try_from(
                &tensor
                    .to_device(Device::Cpu)
                    .to_kind(Kind::Float)
                    .flatten(0, -1),
            )
        })?;
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        buffers.push((name.clone(), shape, bytes));
    }

    let views = buffers
        .iter()
        .map(|(name, shape, bytes)| Ok((name.as_str(), TensorView::new(Dtype::F32, shape.clone(), bytes)?)))
        .collect::<Result<Vec<_>, ModelError>>()?;
    safetensors::serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}

/// Copies a checkpoint into `vs`. The checkpoint must hold exactly the
/// variables of `vs`, each with a matching shape.
pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<(), ModelError> {
    let file = File::open(path)?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();
    let mut seen = HashSet::new();

    for (name, view) in tensors.tensors() {
        let var = variables
            .get_mut(&name)
            .ok_or_else(|| ModelError::UnexpectedTensor(name.clone()))?;

        let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
        if shape != var.size() {
            return Err(ModelError::ShapeMismatch {
                name,
                expected: var.size(),
                found: shape,
            });
        }
        let kind = match view.dtype() {
            Dtype::F32 => Kind::Float,
            Dtype::F64 => Kind::Double,
            Dtype::F16 => Kind::Half,
            Dtype::BF16 => Kind::BFloat16,
            other => return Err(ModelError::UnsupportedDtype(other)),
        };

        let tensor = Tensor::from_data_size(view.data(), &shape, kind)
            .to_device(device)
            .to_kind(var.kind());
        tch::no_grad(|| {
            var.copy_(&tensor);
        });
        seen.insert(name);
    }

    if let Some(missing) = variables.keys().find(|name| !seen.contains(*name)) {
        return Err(ModelError::MissingTensor(missing.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restores_saved_weights_into_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");

        let source = nn::VarStore::new(Device::Cpu);
        let _ = nn::linear(&source.root() / "proj", 3, 2, Default::default());
        save_safetensors(&source, &path).unwrap();

        let mut target = nn::VarStore::new(Device::Cpu);
        let _ = nn::linear(&target.root() / "proj", 3, 2, Default::default());
        load_safetensors(&mut target, &path).unwrap();

        let expected = source.variables();
        for (name, tensor) in target.variables() {
            assert!(tensor.allclose(&expected[&name], 0.0, 0.0, false), "{name}");
        }
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");

        let source = nn::VarStore::new(Device::Cpu);
        let _ = nn::linear(&source.root() / "proj", 3, 2, Default::default());
        save_safetensors(&source, &path).unwrap();

        let mut target = nn::VarStore::new(Device::Cpu);
        let _ = nn::linear(&target.root() / "proj", 4, 2, Default::default());
        assert!(matches!(
            load_safetensors(&mut target, &path),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }
}
