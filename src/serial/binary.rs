//! Compact binary archive format: a tag byte identifying the distribution
//! kind, little-endian `u64` lengths, and raw `f64` bit patterns.
//!
//! The reader is cursor-based over a byte slice and reports truncation
//! explicitly; it never reads past the end of the input.

use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Append-only binary writer.
pub struct BinWriter {
    buf: Vec<u8>,
}

impl BinWriter {
    pub fn new() -> Self {
        BinWriter { buf: Vec::new() }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Length-prefixed float vector.
    pub fn write_vec(&mut self, v: &ArrayView1<f64>) {
        self.write_u64(v.len() as u64);
        for &x in v.iter() {
            self.write_f64(x);
        }
    }

    /// Shape-prefixed row-major float matrix.
    pub fn write_mat(&mut self, m: &ArrayView2<f64>) {
        self.write_u64(m.nrows() as u64);
        self.write_u64(m.ncols() as u64);
        for &x in m.iter() {
            self.write_f64(x);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for BinWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor-based reader over a binary archive.
pub struct BinReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BinReader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::binary(format!(
                "truncated archive: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )))
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a length, validated against the remaining bytes before any
    /// allocation happens.
    fn read_len(&mut self) -> Result<usize> {
        let n = self.read_u64()? as usize;
        self.ensure(n.checked_mul(8).ok_or_else(|| {
            Error::binary("archive length overflows")
        })?)?;
        Ok(n)
    }

    pub fn read_vec(&mut self) -> Result<Array1<f64>> {
        let n = self.read_len()?;
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(self.read_f64()?);
        }
        Ok(Array1::from_vec(values))
    }

    pub fn read_mat(&mut self) -> Result<Array2<f64>> {
        let rows = self.read_u64()? as usize;
        let cols = self.read_u64()? as usize;
        let total = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::binary("matrix shape overflows"))?;
        self.ensure(total.checked_mul(8).ok_or_else(|| {
            Error::binary("archive length overflows")
        })?)?;
        let mut values = Vec::with_capacity(total);
        for _ in 0..total {
            values.push(self.read_f64()?);
        }
        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| Error::binary(format!("bad matrix shape: {}", e)))
    }

    /// Assert that the archive has been fully consumed.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(Error::binary(format!(
                "{} unexpected trailing bytes",
                self.remaining()
            )))
        }
    }
}
