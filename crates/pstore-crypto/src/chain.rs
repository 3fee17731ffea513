//! Chained fixed-block encryption
//!
//! Ciphertext layout (binary):
//! ```text
//! [B bytes: block 0][B bytes: block 1] ... [B bytes: block n]
//! block i = seal( [padding_bytes zero][W payload bytes ⊕ C(i-1) payload] )
//! C(-1) = all zeros
//! ```
//!
//! Only the payload bytes are chained: the leading `padding_bytes` of every
//! primitive input stay zero, never XORed with the previous block. A sealed
//! block can have any leading byte, and XORing it into the padding could push
//! the next input above the RSA modulus.
//!
//! The final block always carries a short (possibly empty) payload, so a
//! plaintext of length L produces `L / W + 1` blocks. Decryption emits whole
//! `W`-byte payloads and callers truncate to the known plaintext length.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use pstore_core::config::CryptoConfig;
use tracing::debug;

use crate::error::CryptoError;
use crate::primitive::BlockPrimitive;

/// Block geometry shared by both directions of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionContext {
    block_size_bits: usize,
    padding_bytes: usize,
}

impl EncryptionContext {
    pub fn new(block_size_bits: usize, padding_bytes: usize) -> Result<Self, CryptoError> {
        if block_size_bits == 0 || block_size_bits % 8 != 0 {
            return Err(CryptoError::Context(format!(
                "block size must be a positive multiple of 8 bits, got {block_size_bits}"
            )));
        }
        let block_bytes = block_size_bits / 8;
        if padding_bytes == 0 || padding_bytes >= block_bytes {
            return Err(CryptoError::Context(format!(
                "padding must be between 1 and {} bytes, got {padding_bytes}",
                block_bytes - 1
            )));
        }
        Ok(EncryptionContext {
            block_size_bits,
            padding_bytes,
        })
    }

    pub fn from_config(config: &CryptoConfig) -> Result<Self, CryptoError> {
        Self::new(config.block_size_bits, config.padding_bytes)
    }

    pub fn block_size_bits(&self) -> usize {
        self.block_size_bits
    }

    pub fn padding_bytes(&self) -> usize {
        self.padding_bytes
    }

    /// `B`: size of every ciphertext block
    pub fn block_bytes(&self) -> usize {
        self.block_size_bits / 8
    }

    /// `W`: plaintext bytes carried per block
    pub fn writable_bytes(&self) -> usize {
        self.block_bytes() - self.padding_bytes
    }

    /// Exact ciphertext length for a plaintext of `plain_len` bytes.
    pub fn ciphertext_len(&self, plain_len: u64) -> u64 {
        (plain_len / self.writable_bytes() as u64 + 1) * self.block_bytes() as u64
    }

    fn check_primitive<P: BlockPrimitive + ?Sized>(&self, primitive: &P) -> Result<(), CryptoError> {
        if primitive.block_bytes() != self.block_bytes() {
            return Err(CryptoError::KeySize {
                key_bytes: primitive.block_bytes(),
                block_bytes: self.block_bytes(),
            });
        }
        Ok(())
    }
}

impl Default for EncryptionContext {
    fn default() -> Self {
        EncryptionContext {
            block_size_bits: 1024,
            padding_bytes: 1,
        }
    }
}

/// Encrypt everything `reader` yields into `writer`. Returns the block count.
pub fn encrypt_stream<P, R, W>(
    primitive: &P,
    ctx: &EncryptionContext,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, CryptoError>
where
    P: BlockPrimitive + ?Sized,
    R: Read,
    W: Write,
{
    ctx.check_primitive(primitive)?;
    let block_bytes = ctx.block_bytes();
    let pad = ctx.padding_bytes();
    let writable = ctx.writable_bytes();

    let mut previous = vec![0u8; block_bytes];
    let mut buffer = vec![0u8; block_bytes];
    let mut blocks = 0u64;

    loop {
        buffer.fill(0);
        let read = read_up_to(reader, &mut buffer[pad..])?;

        for (b, p) in buffer[pad..].iter_mut().zip(&previous[pad..]) {
            *b ^= p;
        }

        let sealed = primitive.seal_block(&buffer)?;
        if sealed.len() != block_bytes {
            return Err(CryptoError::Primitive(format!(
                "sealed block is {} bytes, expected {block_bytes}",
                sealed.len()
            )));
        }
        writer.write_all(&sealed)?;
        previous = sealed;
        blocks += 1;

        if read < writable {
            break;
        }
    }

    writer.flush()?;
    Ok(blocks)
}

/// Decrypt whole blocks from `reader` into `writer`. Returns the block count.
///
/// Every block yields `W` bytes, so the output is a multiple of `W`.
pub fn decrypt_stream<P, R, W>(
    primitive: &P,
    ctx: &EncryptionContext,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, CryptoError>
where
    P: BlockPrimitive + ?Sized,
    R: Read,
    W: Write,
{
    ctx.check_primitive(primitive)?;
    let block_bytes = ctx.block_bytes();
    let pad = ctx.padding_bytes();

    let mut previous = vec![0u8; block_bytes];
    let mut buffer = vec![0u8; block_bytes];
    let mut blocks = 0u64;

    loop {
        let read = read_up_to(reader, &mut buffer)?;
        if read == 0 {
            break;
        }
        if read < block_bytes {
            return Err(CryptoError::MalformedCiphertext(format!(
                "trailing partial block of {read} bytes after {blocks} blocks"
            )));
        }

        let mut opened = primitive.open_block(&buffer)?;
        for (b, p) in opened[pad..].iter_mut().zip(&previous[pad..]) {
            *b ^= p;
        }
        writer.write_all(&opened[pad..])?;

        previous.copy_from_slice(&buffer);
        blocks += 1;
    }

    writer.flush()?;
    Ok(blocks)
}

pub fn encrypt_file<P: BlockPrimitive + ?Sized>(
    primitive: &P,
    ctx: &EncryptionContext,
    input: &Path,
    output: &Path,
) -> Result<u64, CryptoError> {
    transform_file(input, output, |reader, writer| {
        encrypt_stream(primitive, ctx, reader, writer)
    })
}

pub fn decrypt_file<P: BlockPrimitive + ?Sized>(
    primitive: &P,
    ctx: &EncryptionContext,
    input: &Path,
    output: &Path,
) -> Result<u64, CryptoError> {
    transform_file(input, output, |reader, writer| {
        decrypt_stream(primitive, ctx, reader, writer)
    })
}

/// Run `op` from `input` into a sibling temp file, then rename over `output`.
/// On failure the temp file is removed and `output` is left untouched.
fn transform_file<F>(input: &Path, output: &Path, op: F) -> Result<u64, CryptoError>
where
    F: FnOnce(&mut BufReader<File>, &mut BufWriter<File>) -> Result<u64, CryptoError>,
{
    let tmp = partial_path(output);
    match write_then_rename(input, output, &tmp, op) {
        Ok(blocks) => {
            debug!(input = %input.display(), output = %output.display(), blocks, "chain transform complete");
            Ok(blocks)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn write_then_rename<F>(input: &Path, output: &Path, tmp: &Path, op: F) -> Result<u64, CryptoError>
where
    F: FnOnce(&mut BufReader<File>, &mut BufWriter<File>) -> Result<u64, CryptoError>,
{
    let mut reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(tmp)?);
    let blocks = op(&mut reader, &mut writer)?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())?
        .sync_all()?;
    fs::rename(tmp, output)?;
    Ok(blocks)
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    output.with_file_name(name)
}

/// Fill `buf` from `reader`, stopping early only at EOF.
fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
