//! SHA/AES/MPI entry points forwarded to [`crate::crypto`]. There is no
//! `original_source/emu_crypto.c` to mirror symbol-for-symbol — the original
//! links real mbedtls rather than stubbing it — so the entry-point names
//! here follow mbedtls's own public API (`mbedtls_sha1`, `mbedtls_aes_*`,
//! `mbedtls_mpi_exp_mod`), which is what ESP-IDF firmware actually calls.
//!
//! Every stub copies its guest buffers into host `Vec<u8>`s, runs the real
//! crate, and writes the result back, same shape as the ROM pack's
//! `memcpy`.

use std::sync::Arc;

use crate::crypto::{self, AesKeyLen};
use crate::hooks::HookTable;
use crate::memory::AddressSpace;
use crate::registers::RegisterFile;
use crate::symbols::SymbolTable;

use super::{install, StubContext};

pub fn register(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    register_hashes(ctx, syms, hooks);
    register_aes(ctx, syms, hooks);
    register_mpi(ctx, syms, hooks);
}

fn register_hashes(_ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    install(hooks, syms, "mbedtls_sha1", Box::new(|regs: &mut RegisterFile, mem: &mut AddressSpace| {
        let (input, ilen, output) = (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4));
        let data = mem.read_buf(input, ilen as usize);
        mem.write_buf(output, &crypto::sha1(&data));
        regs.ar_write(2, 0);
    }));

    install(hooks, syms, "mbedtls_sha256", Box::new(|regs: &mut RegisterFile, mem: &mut AddressSpace| {
        // mbedtls_sha256(input, ilen, output, is224) — is224 isn't modeled;
        // every caller in practice wants SHA-256 proper.
        let (input, ilen, output) = (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4));
        let data = mem.read_buf(input, ilen as usize);
        mem.write_buf(output, &crypto::sha256(&data));
        regs.ar_write(2, 0);
    }));
}

fn key_len_for(bits: u32) -> AesKeyLen {
    if bits >= 256 {
        AesKeyLen::Bits256
    } else {
        AesKeyLen::Bits128
    }
}

fn register_aes(_ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    // mbedtls_aes_crypt_ecb(ctx, mode, input[16], output[16]) — the key and
    // its bit length were already set on a prior mbedtls_aes_setkey_enc/dec
    // call in real firmware, but this stub fabric has no persistent AES
    // context object, so the key is instead read back out of the guest's
    // `mbedtls_aes_context` struct at a fixed offset matching mbedtls's
    // layout (`buf[44]`): word 0 holds the bit length, the round-key buffer
    // follows. Only the 128/256-bit key schedules actually used by ESP-IDF
    // firmware are modeled.
    const AES_CTX_KEYBITS_OFFSET: u32 = 0;
    const AES_CTX_KEY_OFFSET: u32 = 4;
    const AES_ENCRYPT: u32 = 1;

    install(hooks, syms, "mbedtls_aes_crypt_ecb", Box::new(|regs: &mut RegisterFile, mem: &mut AddressSpace| {
        let (aes_ctx, mode, input, output) = (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4), regs.ar_read(5));
        let keybits = mem.read32(aes_ctx + AES_CTX_KEYBITS_OFFSET);
        let key_len = key_len_for(keybits);
        let key_bytes = if matches!(key_len, AesKeyLen::Bits256) { 32 } else { 16 };
        let key = mem.read_buf(aes_ctx + AES_CTX_KEY_OFFSET, key_bytes);
        let mut block = mem.read_buf(input, 16);
        crypto::aes_ecb(&key, &mut block, key_len, mode == AES_ENCRYPT);
        mem.write_buf(output, &block);
        regs.ar_write(2, 0);
    }));

    install(hooks, syms, "mbedtls_aes_crypt_cbc", Box::new(|regs: &mut RegisterFile, mem: &mut AddressSpace| {
        let (aes_ctx, mode, length, iv, input, output) =
            (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4), regs.ar_read(5), regs.ar_read(6), regs.ar_read(7));
        let keybits = mem.read32(aes_ctx + AES_CTX_KEYBITS_OFFSET);
        let key_len = key_len_for(keybits);
        let key_bytes = if matches!(key_len, AesKeyLen::Bits256) { 32 } else { 16 };
        let key = mem.read_buf(aes_ctx + AES_CTX_KEY_OFFSET, key_bytes);
        let iv_bytes = mem.read_buf(iv, 16);
        let mut iv_arr = [0u8; 16];
        iv_arr.copy_from_slice(&iv_bytes);
        let mut data = mem.read_buf(input, length as usize);
        crypto::aes_cbc(&key, &iv_arr, &mut data, key_len, mode == AES_ENCRYPT);
        mem.write_buf(output, &data);
        regs.ar_write(2, 0);
    }));

    install(hooks, syms, "mbedtls_aes_crypt_ctr", Box::new(|regs: &mut RegisterFile, mem: &mut AddressSpace| {
        let (aes_ctx, length, nonce_counter, input, output) =
            (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4), regs.ar_read(6), regs.ar_read(7));
        let keybits = mem.read32(aes_ctx + AES_CTX_KEYBITS_OFFSET);
        let key_len = key_len_for(keybits);
        let key_bytes = if matches!(key_len, AesKeyLen::Bits256) { 32 } else { 16 };
        let key = mem.read_buf(aes_ctx + AES_CTX_KEY_OFFSET, key_bytes);
        let nonce_bytes = mem.read_buf(nonce_counter, 16);
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&nonce_bytes);
        let mut data = mem.read_buf(input, length as usize);
        crypto::aes_ctr(&key, &nonce, &mut data, key_len);
        mem.write_buf(output, &data);
        regs.ar_write(2, 0);
    }));
}

fn register_mpi(_ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    // mbedtls_mpi_exp_mod operates on opaque mbedtls_mpi structs rather than
    // flat buffers, and the real signature (base, exponent, modulus, output,
    // plus a precomputed-Barrett-reduction MPI) doesn't fit in a2..a7 at
    // all. Rather than invent a fragile stack-spill convention for a
    // function this fabric has no original to match anyway (see module
    // doc), this entry point takes the flat big-endian-buffer convention
    // SPEC_FULL.md's behavior list actually describes, with the modulus
    // length standing in for the output length — the RSA case this exists
    // for always sizes the result to the modulus.
    install(hooks, syms, "esp_mpi_exp_mod", Box::new(|regs: &mut RegisterFile, mem: &mut AddressSpace| {
        let (base_ptr, base_len, exp_ptr, exp_len, mod_ptr, mod_len) =
            (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4), regs.ar_read(5), regs.ar_read(6), regs.ar_read(7));
        let base = mem.read_buf(base_ptr, base_len as usize);
        let exponent = mem.read_buf(exp_ptr, exp_len as usize);
        let modulus = mem.read_buf(mod_ptr, mod_len as usize);
        let result = crypto::mpi_modexp(&base, &exponent, &modulus);
        let mut padded = vec![0u8; mod_len as usize];
        if result.len() <= padded.len() {
            let start = padded.len() - result.len();
            padded[start..].copy_from_slice(&result);
        }
        // Output overwrites the base buffer in place, matching mbedtls's
        // own in-place MPI convention (the result MPI may alias the input).
        mem.write_buf(base_ptr, &padded);
        regs.ar_write(2, 0);
    }));
}
