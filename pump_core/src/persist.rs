//! Fixed-layout binary record for the calibration bundle.
//!
//! Layout (little-endian, 64 bytes):
//!
//! | offset | type  | field |
//! |--------|-------|-------|
//! | 0      | u32   | magic `0xC0DEC0DE` |
//! | 4      | f32×15| `scale.a, scale.b, A, B, K, c, t_ref, alpha_static, A2, B2, K2, c2, Kp, Kd, sps_max` |
//!
//! Floats are stored bit-for-bit so a bundle survives save/load unchanged.

use std::{fs, io::Write, path::Path};

use eyre::WrapErr;

use crate::error::{CodecError, Result};
use crate::params::EgcParams;

pub const BLOB_MAGIC: u32 = 0xC0DE_C0DE;
pub const BLOB_LEN: usize = 4 + 4 * EgcParams::FIELD_COUNT;

pub fn encode(p: &EgcParams) -> [u8; BLOB_LEN] {
    let mut out = [0u8; BLOB_LEN];
    out[..4].copy_from_slice(&BLOB_MAGIC.to_le_bytes());
    for (i, v) in p.to_fields().iter().enumerate() {
        let at = 4 + 4 * i;
        out[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode(bytes: &[u8]) -> std::result::Result<EgcParams, CodecError> {
    if bytes.len() != BLOB_LEN {
        return Err(CodecError::Length {
            expected: BLOB_LEN,
            got: bytes.len(),
        });
    }
    let word = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
    let magic = u32::from_le_bytes(word(0));
    if magic != BLOB_MAGIC {
        return Err(CodecError::Magic(magic));
    }
    let mut fields = [0.0f32; EgcParams::FIELD_COUNT];
    for (i, f) in fields.iter_mut().enumerate() {
        *f = f32::from_le_bytes(word(4 + 4 * i));
    }
    Ok(EgcParams::from_fields(fields))
}

/// Write `bytes` to `path` via a sibling temp file so readers never see a torn file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

pub fn save_blob(path: &Path, p: &EgcParams) -> Result<()> {
    write_atomic(path, &encode(p)).wrap_err_with(|| format!("writing params blob {}", path.display()))
}

pub fn load_blob(path: &Path) -> Result<EgcParams> {
    let bytes = fs::read(path).wrap_err_with(|| format!("reading params blob {}", path.display()))?;
    decode(&bytes)
        .map_err(eyre::Report::new)
        .wrap_err_with(|| format!("decoding params blob {}", path.display()))
}
