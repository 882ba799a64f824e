use crate::rc_err;
use aes::cipher::{
    generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher,
};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cmp::min;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use skm_common::{
    crypto,
    crypto::aes::{CipherMode, GcmMode, Key, BLOCK_SIZE},
    km_err, try_to_vec, vec_try_with_capacity, Error, FallibleAllocExt,
};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

/// [`crypto::Aes`] implementation based on the `aes`, `ctr` and `ghash` crates.
pub struct RustCryptoAes;

impl crypto::Aes for RustCryptoAes {
    fn begin(
        &self,
        key: Key,
        mode: CipherMode,
        dir: crypto::SymmetricOperation,
    ) -> Result<Box<dyn crypto::EmittingOperation + Send>, Error> {
        let cipher = BlockCipher::new(&key);
        Ok(match mode {
            CipherMode::EcbNoPadding => Box::new(BlockModeOperation::new(cipher, dir, None, false)?),
            CipherMode::EcbPkcs7Padding => {
                Box::new(BlockModeOperation::new(cipher, dir, None, true)?)
            }
            CipherMode::CbcNoPadding { nonce } => {
                Box::new(BlockModeOperation::new(cipher, dir, Some(nonce), false)?)
            }
            CipherMode::CbcPkcs7Padding { nonce } => {
                Box::new(BlockModeOperation::new(cipher, dir, Some(nonce), true)?)
            }
            CipherMode::Ctr { nonce } => {
                Box::new(CtrOperation { keystream: Keystream::ctr128(&key, &nonce) })
            }
        })
    }

    fn begin_aead(
        &self,
        key: Key,
        mode: GcmMode,
        dir: crypto::SymmetricOperation,
    ) -> Result<Box<dyn crypto::AadOperation + Send>, Error> {
        let gcm = Gcm::new(&key, mode.nonce())?;
        let tag_len = mode.tag_len();
        Ok(match dir {
            crypto::SymmetricOperation::Encrypt => Box::new(AesGcmEncryptOperation { gcm, tag_len }),
            crypto::SymmetricOperation::Decrypt => Box::new(AesGcmDecryptOperation {
                gcm,
                decrypt_tag_len: tag_len,
                pending_input_tail: vec_try_with_capacity!(tag_len)?,
            }),
        })
    }
}

/// Raw AES block transform for any of the key sizes.
enum BlockCipher {
    Aes128(aes::Aes128),
    Aes192(aes::Aes192),
    Aes256(aes::Aes256),
}

impl BlockCipher {
    fn new(key: &Key) -> Self {
        match key {
            Key::Aes128(k) => Self::Aes128(aes::Aes128::new(GenericArray::from_slice(k))),
            Key::Aes192(k) => Self::Aes192(aes::Aes192::new(GenericArray::from_slice(k))),
            Key::Aes256(k) => Self::Aes256(aes::Aes256::new(GenericArray::from_slice(k))),
        }
    }

    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(&mut block[..]);
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(&mut block[..]);
        match self {
            Self::Aes128(c) => c.decrypt_block(block),
            Self::Aes192(c) => c.decrypt_block(block),
            Self::Aes256(c) => c.decrypt_block(block),
        }
    }
}

/// Streaming ECB/CBC operation.  Input is buffered until whole blocks are available; when
/// decrypting with PKCS#7 padding the final block is held back until `finish()`.
struct BlockModeOperation {
    cipher: BlockCipher,
    dir: crypto::SymmetricOperation,
    /// Chaining value for CBC mode, `None` for ECB.
    chain: Option<[u8; BLOCK_SIZE]>,
    pkcs7: bool,
    pending: Zeroizing<Vec<u8>>,
}

impl BlockModeOperation {
    fn new(
        cipher: BlockCipher,
        dir: crypto::SymmetricOperation,
        chain: Option<[u8; BLOCK_SIZE]>,
        pkcs7: bool,
    ) -> Result<Self, Error> {
        Ok(Self {
            cipher,
            dir,
            chain,
            pkcs7,
            pending: Zeroizing::new(vec_try_with_capacity!(2 * BLOCK_SIZE)?),
        })
    }

    fn process_block(&mut self, block: &mut [u8; BLOCK_SIZE]) {
        match self.dir {
            crypto::SymmetricOperation::Encrypt => {
                if let Some(chain) = &self.chain {
                    xor_into(block, chain);
                }
                self.cipher.encrypt_block(block);
                if let Some(chain) = &mut self.chain {
                    *chain = *block;
                }
            }
            crypto::SymmetricOperation::Decrypt => {
                let ct = *block;
                self.cipher.decrypt_block(block);
                if let Some(chain) = &mut self.chain {
                    xor_into(block, chain);
                    *chain = ct;
                }
            }
        }
    }

    /// Process whole blocks from the front of `pending`, leaving at least `keep` bytes.
    fn drain_blocks(&mut self, keep: usize) -> Result<Vec<u8>, Error> {
        let available = self.pending.len().saturating_sub(keep);
        let whole = available - (available % BLOCK_SIZE);
        let mut output = vec_try_with_capacity!(whole)?;
        let mut block = [0u8; BLOCK_SIZE];
        for offset in (0..whole).step_by(BLOCK_SIZE) {
            block.copy_from_slice(&self.pending[offset..offset + BLOCK_SIZE]);
            self.process_block(&mut block);
            output.try_extend_from_slice(&block)?;
        }
        block.zeroize();
        self.pending.drain(..whole);
        Ok(output)
    }
}

fn xor_into(block: &mut [u8; BLOCK_SIZE], other: &[u8; BLOCK_SIZE]) {
    for (b, o) in block.iter_mut().zip(other.iter()) {
        *b ^= o;
    }
}

impl crypto::EmittingOperation for BlockModeOperation {
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.pending.try_extend_from_slice(data)?;
        let keep = match self.dir {
            crypto::SymmetricOperation::Decrypt if self.pkcs7 => 1,
            _ => 0,
        };
        self.drain_blocks(keep)
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>, Error> {
        match (self.dir, self.pkcs7) {
            (_, false) => {
                if !self.pending.is_empty() {
                    return Err(km_err!(
                        InvalidInputLength,
                        "input length not a multiple of {} ({} bytes left over)",
                        BLOCK_SIZE,
                        self.pending.len()
                    ));
                }
                Ok(Vec::new())
            }
            (crypto::SymmetricOperation::Encrypt, true) => {
                let pad = (BLOCK_SIZE - self.pending.len()) as u8;
                let mut block = [pad; BLOCK_SIZE];
                block[..self.pending.len()].copy_from_slice(&self.pending);
                self.process_block(&mut block);
                let output = try_to_vec(&block)?;
                Ok(output)
            }
            (crypto::SymmetricOperation::Decrypt, true) => {
                if self.pending.len() != BLOCK_SIZE {
                    return Err(km_err!(
                        InvalidInputLength,
                        "padded input length not a multiple of {}",
                        BLOCK_SIZE
                    ));
                }
                let mut block = [0u8; BLOCK_SIZE];
                block.copy_from_slice(&self.pending);
                self.process_block(&mut block);
                let pad = block[BLOCK_SIZE - 1] as usize;
                if pad == 0
                    || pad > BLOCK_SIZE
                    || block[BLOCK_SIZE - pad..].iter().any(|b| *b as usize != pad)
                {
                    block.zeroize();
                    return Err(km_err!(InvalidArgument, "invalid PKCS#7 padding"));
                }
                let output = try_to_vec(&block[..BLOCK_SIZE - pad])?;
                block.zeroize();
                Ok(output)
            }
        }
    }
}

/// AES in counter mode, with either a full 128-bit big-endian counter (CTR mode) or a 32-bit
/// big-endian counter (as used inside GCM).
enum Keystream {
    Ctr128Aes128(ctr::Ctr128BE<aes::Aes128>),
    Ctr128Aes192(ctr::Ctr128BE<aes::Aes192>),
    Ctr128Aes256(ctr::Ctr128BE<aes::Aes256>),
    Ctr32Aes128(ctr::Ctr32BE<aes::Aes128>),
    Ctr32Aes192(ctr::Ctr32BE<aes::Aes192>),
    Ctr32Aes256(ctr::Ctr32BE<aes::Aes256>),
}

impl Keystream {
    fn ctr128(key: &Key, iv: &[u8; BLOCK_SIZE]) -> Self {
        let iv = GenericArray::from_slice(iv);
        match key {
            Key::Aes128(k) => Self::Ctr128Aes128(KeyIvInit::new(GenericArray::from_slice(k), iv)),
            Key::Aes192(k) => Self::Ctr128Aes192(KeyIvInit::new(GenericArray::from_slice(k), iv)),
            Key::Aes256(k) => Self::Ctr128Aes256(KeyIvInit::new(GenericArray::from_slice(k), iv)),
        }
    }

    fn ctr32(key: &Key, iv: &[u8; BLOCK_SIZE]) -> Self {
        let iv = GenericArray::from_slice(iv);
        match key {
            Key::Aes128(k) => Self::Ctr32Aes128(KeyIvInit::new(GenericArray::from_slice(k), iv)),
            Key::Aes192(k) => Self::Ctr32Aes192(KeyIvInit::new(GenericArray::from_slice(k), iv)),
            Key::Aes256(k) => Self::Ctr32Aes256(KeyIvInit::new(GenericArray::from_slice(k), iv)),
        }
    }

    fn apply(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        match self {
            Self::Ctr128Aes128(c) => c.try_apply_keystream(buf),
            Self::Ctr128Aes192(c) => c.try_apply_keystream(buf),
            Self::Ctr128Aes256(c) => c.try_apply_keystream(buf),
            Self::Ctr32Aes128(c) => c.try_apply_keystream(buf),
            Self::Ctr32Aes192(c) => c.try_apply_keystream(buf),
            Self::Ctr32Aes256(c) => c.try_apply_keystream(buf),
        }
        .map_err(rc_err!(InvalidInputLength, "counter space exhausted"))
    }
}

/// AES-CTR operation.
struct CtrOperation {
    keystream: Keystream,
}

impl crypto::EmittingOperation for CtrOperation {
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut output = try_to_vec(data)?;
        self.keystream.apply(&mut output)?;
        Ok(output)
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error> {
        Ok(Vec::new())
    }
}

/// Incremental GCM state shared between encryption and decryption.  GHASH input arrives in
/// arbitrarily sized pieces, so a partial block is kept in `residue` until it fills up or the
/// current section (AAD or ciphertext) ends.
struct Gcm {
    keystream: Keystream,
    ghash: GHash,
    /// Encryption of the initial counter block, XORed into the final GHASH output.
    tag_mask: Zeroizing<[u8; BLOCK_SIZE]>,
    residue: Vec<u8>,
    aad_len: u64,
    data_len: u64,
    data_started: bool,
}

impl Gcm {
    fn new(key: &Key, nonce: &[u8; crypto::aes::GCM_NONCE_SIZE]) -> Result<Self, Error> {
        let cipher = BlockCipher::new(key);
        let mut h = Zeroizing::new([0u8; BLOCK_SIZE]);
        cipher.encrypt_block(&mut h);
        let ghash = GHash::new(GenericArray::from_slice(&h[..]));

        let mut j0 = [0u8; BLOCK_SIZE];
        j0[..nonce.len()].copy_from_slice(nonce);
        j0[BLOCK_SIZE - 1] = 1;
        let mut tag_mask = Zeroizing::new(j0);
        cipher.encrypt_block(&mut tag_mask);

        // Payload keystream starts at inc32(J0).
        j0[BLOCK_SIZE - 1] = 2;
        Ok(Self {
            keystream: Keystream::ctr32(key, &j0),
            ghash,
            tag_mask,
            residue: vec_try_with_capacity!(BLOCK_SIZE)?,
            aad_len: 0,
            data_len: 0,
            data_started: false,
        })
    }

    /// Feed data into GHASH, holding back any trailing partial block.
    fn absorb(&mut self, mut data: &[u8]) {
        if !self.residue.is_empty() {
            let take = min(BLOCK_SIZE - self.residue.len(), data.len());
            self.residue.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.residue.len() < BLOCK_SIZE {
                return;
            }
            self.ghash.update(&[*GenericArray::from_slice(&self.residue[..])]);
            self.residue.clear();
        }
        let mut chunks = data.chunks_exact(BLOCK_SIZE);
        for chunk in &mut chunks {
            self.ghash.update(&[*GenericArray::from_slice(chunk)]);
        }
        self.residue.extend_from_slice(chunks.remainder());
    }

    /// Zero-pad and absorb any partial block.
    fn flush(&mut self) {
        if !self.residue.is_empty() {
            self.ghash.update_padded(&self.residue);
            self.residue.clear();
        }
    }

    fn update_aad(&mut self, aad: &[u8]) -> Result<(), Error> {
        if self.data_started {
            return Err(km_err!(InvalidTag, "AAD provided after data"));
        }
        self.absorb(aad);
        self.aad_len += aad.len() as u64;
        Ok(())
    }

    fn start_data(&mut self) {
        if !self.data_started {
            self.flush();
            self.data_started = true;
        }
    }

    fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.start_data();
        let mut output = try_to_vec(data)?;
        self.keystream.apply(&mut output)?;
        self.absorb(&output);
        self.data_len += data.len() as u64;
        Ok(output)
    }

    fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.start_data();
        self.absorb(data);
        self.data_len += data.len() as u64;
        let mut output = try_to_vec(data)?;
        self.keystream.apply(&mut output)?;
        Ok(output)
    }

    /// Complete the GHASH computation and return the full 16-byte tag.
    fn tag(mut self) -> [u8; BLOCK_SIZE] {
        self.start_data();
        self.flush();
        let mut lengths = [0u8; BLOCK_SIZE];
        lengths[..8].copy_from_slice(&(self.aad_len * 8).to_be_bytes());
        lengths[8..].copy_from_slice(&(self.data_len * 8).to_be_bytes());
        self.ghash.update(&[*GenericArray::from_slice(&lengths[..])]);
        let s = self.ghash.finalize();
        let mut tag = *self.tag_mask;
        for (t, s) in tag.iter_mut().zip(s.iter()) {
            *t ^= s;
        }
        tag
    }
}

/// AES-GCM encryption; the tag is appended to the output of `finish()`.
struct AesGcmEncryptOperation {
    gcm: Gcm,
    tag_len: usize,
}

impl crypto::AadOperation for AesGcmEncryptOperation {
    fn update_aad(&mut self, aad: &[u8]) -> Result<(), Error> {
        self.gcm.update_aad(aad)
    }
}

impl crypto::EmittingOperation for AesGcmEncryptOperation {
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.gcm.encrypt(data)
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error> {
        let tag_len = self.tag_len;
        let tag = self.gcm.tag();
        Ok(try_to_vec(&tag[..tag_len])?)
    }
}

/// AES-GCM decryption.
struct AesGcmDecryptOperation {
    gcm: Gcm,

    // Size of a final tag when decrypting.
    decrypt_tag_len: usize,

    // The last `decrypt_tag_len` bytes of input are the tag, but the overall size of the input
    // is not known in advance, so hold up to `decrypt_tag_len` bytes in reserve until `finish()`.
    pending_input_tail: Vec<u8>, // Capacity = decrypt_tag_len
}

impl crypto::AadOperation for AesGcmDecryptOperation {
    fn update_aad(&mut self, aad: &[u8]) -> Result<(), Error> {
        self.gcm.update_aad(aad)
    }
}

impl crypto::EmittingOperation for AesGcmDecryptOperation {
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        // The current input is the (self.pending_input_tail || data) combination.
        let combined_len = self.pending_input_tail.len() + data.len();
        if combined_len <= self.decrypt_tag_len {
            // Still not enough for more than just a tag.
            self.pending_input_tail.try_extend_from_slice(data)?;
            if !data.is_empty() {
                self.gcm.start_data();
            }
            return Ok(Vec::new());
        }

        let cipherable_len = combined_len - self.decrypt_tag_len;
        let cipherable_from_pending = min(cipherable_len, self.pending_input_tail.len());
        let cipherable_from_data = cipherable_len - cipherable_from_pending;

        let mut output = self.gcm.decrypt(&self.pending_input_tail[..cipherable_from_pending])?;
        output.try_extend_from_slice(&self.gcm.decrypt(&data[..cipherable_from_data])?)?;

        // Reset `self.pending_input_tail` to the unused data.
        let leftover_pending = self.pending_input_tail.len() - cipherable_from_pending;
        self.pending_input_tail.resize(self.decrypt_tag_len, 0);
        self.pending_input_tail.copy_within(cipherable_from_pending.., 0);
        self.pending_input_tail[leftover_pending..].copy_from_slice(&data[cipherable_from_data..]);

        Ok(output)
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error> {
        // Need the entire tag before completion.
        if self.pending_input_tail.len() != self.decrypt_tag_len {
            return Err(km_err!(
                InvalidInputLength,
                "only {} bytes of pending data, need {}",
                self.pending_input_tail.len(),
                self.decrypt_tag_len
            ));
        }
        let this = *self;
        let expected = this.gcm.tag();
        let matches: bool =
            expected[..this.decrypt_tag_len].ct_eq(&this.pending_input_tail[..]).into();
        if !matches {
            return Err(km_err!(VerificationFailed, "AES-GCM tag mismatch"));
        }
        Ok(Vec::new())
    }
}
