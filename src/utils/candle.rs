use anyhow::{Context, Result as AnyhowResult};
use candle_core::{Device, Tensor};
use once_cell::sync::Lazy;

pub static CANDLE_DEVICE: Lazy<Device> = Lazy::new(|| {
    // Attempt to initialize Metal device (GPU)
    match Device::new_metal(0) {
        Ok(metal_device) => {
            if metal_device.is_metal() {
                log::info!("Successfully initialized Candle Metal device (GPU).");
                metal_device
            } else {
                log::warn!(
                    "Device::new_metal(0) succeeded but device.is_metal() is false. Using CPU."
                );
                Device::Cpu
            }
        }
        Err(err) => {
            // Not compiled with the "metal" feature, or no usable Metal device.
            log::warn!(
                "Failed to initialize Candle Metal device: {:?}. Falling back to CPU device.",
                err
            );
            Device::Cpu
        }
    }
});

/// Scales every row to unit length and flattens it. Zero or non-finite rows
/// become zero vectors, so their similarity to anything is 0.0.
fn unit_rows(rows: &[Vec<f32>], dim: usize) -> AnyhowResult<Vec<f32>> {
    let mut flat = Vec::with_capacity(rows.len() * dim);
    for (idx, row) in rows.iter().enumerate() {
        if row.len() != dim {
            return Err(anyhow::anyhow!(
                "Input vector lengths differ: row {} has {} dimensions, expected {}",
                idx,
                row.len(),
                dim
            ));
        }
        let magnitude = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if magnitude == 0.0 || !magnitude.is_finite() {
            flat.extend(std::iter::repeat(0.0_f32).take(dim));
        } else {
            flat.extend(row.iter().map(|v| v / magnitude));
        }
    }
    Ok(flat)
}

/// Cosine similarity of every query row against every candidate row,
/// computed as one matrix product. `result[i][j]` scores `queries[i]`
/// against `candidates[j]`.
pub fn cosine_similarity_matrix(
    queries: &[Vec<f32>],
    candidates: &[Vec<f32>],
) -> AnyhowResult<Vec<Vec<f32>>> {
    if queries.is_empty() {
        return Ok(Vec::new());
    }
    if candidates.is_empty() {
        return Ok(vec![Vec::new(); queries.len()]);
    }

    let dim = queries[0].len();
    if dim == 0 {
        return Err(anyhow::anyhow!("Input vectors must not be empty"));
    }
    if candidates[0].len() != dim {
        return Err(anyhow::anyhow!(
            "Query and candidate dimensions differ: {} vs {}",
            dim,
            candidates[0].len()
        ));
    }

    let q_flat = unit_rows(queries, dim).context("Failed to prepare query vectors")?;
    let c_flat = unit_rows(candidates, dim).context("Failed to prepare candidate vectors")?;

    let q = Tensor::from_vec(q_flat, (queries.len(), dim), &CANDLE_DEVICE).with_context(|| {
        format!("Failed to create query tensor ({} x {})", queries.len(), dim)
    })?;
    let c = Tensor::from_vec(c_flat, (candidates.len(), dim), &CANDLE_DEVICE).with_context(
        || format!("Failed to create candidate tensor ({} x {})", candidates.len(), dim),
    )?;

    let c_t = c
        .t()
        .with_context(|| "Transposing candidate tensor failed")?
        .contiguous()
        .with_context(|| "Making transposed candidate tensor contiguous failed")?;
    let scores = q
        .matmul(&c_t)
        .with_context(|| "Similarity matrix multiplication failed")?;

    let mut rows = scores
        .to_vec2::<f32>() // Brings data back to CPU if the tensor lives on the GPU
        .with_context(|| "Converting similarity tensor to rows failed")?;

    for row in rows.iter_mut() {
        for score in row.iter_mut() {
            if !score.is_finite() {
                log::warn!("Calculated similarity is NaN or Infinite; treating it as 0.0");
                *score = 0.0;
            }
        }
    }

    Ok(rows)
}
