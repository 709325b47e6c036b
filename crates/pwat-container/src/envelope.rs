//! Container envelope: tag, salt, iterations, passphrase verifier, wrapped
//! keys and IV. Everything in it is written in the clear.

use pwat_core::{PwatError, PwatResult};
use pwat_crypto::{
    generate_data_key, generate_hmac_key, generate_iv, generate_salt, stretch_key, unwrap_data_key,
    unwrap_hmac_key, wrap_data_key, wrap_hmac_key, DataKey, HmacKey, BLOCK_SIZE, HASH_SIZE, KEY_SIZE,
    SALT_SIZE,
};
use secrecy::SecretString;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;

use crate::format::TAG;

/// Keys recovered from (or generated for) an envelope. The keys scrub
/// themselves when dropped.
#[derive(Debug)]
pub struct Envelope {
    pub iterations: u32,
    pub data_key: DataKey,
    pub hmac_key: HmacKey,
    pub iv: [u8; BLOCK_SIZE],
}

/// Generate fresh keys for a new container and write its envelope.
pub fn write_envelope<W: Write>(
    out: &mut W,
    passphrase: &SecretString,
    iterations: u32,
) -> PwatResult<Envelope> {
    let salt = generate_salt();
    let stretched = stretch_key(passphrase, &salt, iterations)?;
    let data_key = generate_data_key();
    let hmac_key = generate_hmac_key();
    let iv = generate_iv();

    out.write_all(&TAG)?;
    out.write_all(&salt)?;
    out.write_all(&iterations.to_le_bytes())?;
    out.write_all(&stretched.verifier())?;
    out.write_all(&wrap_data_key(&stretched, &data_key)?)?;
    out.write_all(&wrap_hmac_key(&stretched, &hmac_key)?)?;
    out.write_all(&iv)?;

    Ok(Envelope {
        iterations,
        data_key,
        hmac_key,
        iv,
    })
}

/// Parse an envelope and unlock its keys with `passphrase`.
pub fn read_envelope<R: Read>(input: &mut R, passphrase: &SecretString) -> PwatResult<Envelope> {
    let mut tag = [0u8; 4];
    input.read_exact(&mut tag).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => PwatError::NotThisFormat,
        _ => PwatError::Io(e),
    })?;
    if tag != TAG {
        return Err(PwatError::NotThisFormat);
    }

    let salt: [u8; SALT_SIZE] = read_array(input)?;
    let iterations = u32::from_le_bytes(read_array(input)?);
    let verifier: [u8; HASH_SIZE] = read_array(input)?;
    let stretched = stretch_key(passphrase, &salt, iterations)?;
    if !stretched.matches_verifier(&verifier) {
        return Err(PwatError::WrongPassphrase);
    }

    let wrapped_k: [u8; KEY_SIZE] = read_array(input)?;
    let wrapped_l: [u8; KEY_SIZE] = read_array(input)?;
    let iv: [u8; BLOCK_SIZE] = read_array(input)?;

    Ok(Envelope {
        iterations,
        data_key: unwrap_data_key(&stretched, &wrapped_k)?,
        hmac_key: unwrap_hmac_key(&stretched, &wrapped_l)?,
        iv,
    })
}

fn read_array<R: Read, const N: usize>(input: &mut R) -> PwatResult<[u8; N]> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => PwatError::TruncatedStream("envelope cut short".into()),
        _ => PwatError::Io(e),
    })?;
    Ok(buf)
}

/// Check `passphrase` against the container at `path` without reading any
/// field. Returns the container's key-stretch iteration count.
pub fn check_passphrase(path: &Path, passphrase: &SecretString) -> PwatResult<u32> {
    let mut input = BufReader::new(File::open(path)?);
    read_envelope(&mut input, passphrase).map(|env| env.iterations)
}
