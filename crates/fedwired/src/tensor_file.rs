//! Tensor files — raw little-endian f32, no header.

use std::path::Path;

use anyhow::{bail, Context, Result};
use bytes::{Buf, BufMut, BytesMut};

use fedwire_core::{Element, OwnedTensor, Tensor};

pub fn read_tensor(path: &Path) -> Result<OwnedTensor<f32>> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read tensor: {}", path.display()))?;
    if data.len() % 4 != 0 {
        bail!(
            "{} is {} bytes, not a whole number of f32 elements",
            path.display(),
            data.len()
        );
    }

    let mut cursor = &data[..];
    let mut elements = Vec::with_capacity(data.len() / 4);
    while cursor.has_remaining() {
        elements.push(f32::get_le(&mut cursor));
    }
    Ok(Tensor::from_vec(elements))
}

pub fn write_tensor(path: &Path, tensor: &Tensor<'_, f32>) -> Result<()> {
    let mut buf = BytesMut::with_capacity(tensor.size() * 4);
    for &x in tensor.data() {
        buf.put_f32_le(x);
    }
    std::fs::write(path, &buf).with_context(|| format!("failed to write tensor: {}", path.display()))
}
