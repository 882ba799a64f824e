//! Utility program to parse a soft Keymaster key blob, decrypting or checking it with the
//! default (all-zero) master key and the given application id.

// Explicitly include alloc because macros from `skm_common` assume it.
extern crate alloc;

use skm_common::{crypto, keyblob, keyblob::Format, tag};
use skm_common::wire::keymint::KeyParam;
use skm_crypto_rust::{
    aes::RustCryptoAes, eq::RustCryptoEq, hmac::RustCryptoHmac, sha256::RustCryptoSha256,
};

/// Root-of-trust marker used by the software engine.
const ROOT_OF_TRUST: &[u8] = b"SW";

fn main() {
    let mut hex = false;
    let mut app_id: Option<Vec<u8>> = None;
    let args: Vec<String> = std::env::args().collect();
    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        if arg == "--hex" {
            hex = !hex;
        } else if arg == "--app-id" {
            app_id = iter.next().map(|v| v.as_bytes().to_vec());
        } else {
            process(arg, hex, app_id.as_deref());
        }
    }
}

fn process(filename: &str, hex: bool, app_id: Option<&[u8]>) {
    let _ = env_logger::builder().is_test(true).try_init();

    println!("File: {}", filename);
    let mut data: Vec<u8> = match std::fs::read(filename) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{}: Failed to read: {:?}", filename, e);
            return;
        }
    };
    if hex {
        let hexdata = String::from_utf8_lossy(&data).trim().to_string();
        data = match hex::decode(&hexdata) {
            Ok(v) => v,
            Err(e) => {
                eprintln!(
                    "{}: Failed to parse hex ({:?}): len={} {}",
                    filename,
                    e,
                    hexdata.len(),
                    hexdata
                );
                return;
            }
        };
    }
    let format = match Format::of(&data) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{}: Failed to parse: {:?}", filename, e);
            return;
        }
    };

    let mut params = Vec::new();
    if let Some(app_id) = app_id {
        params.push(KeyParam::ApplicationId(app_id.to_vec()));
    }
    let hidden = match tag::hidden(&params, ROOT_OF_TRUST) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("{}: Failed to build hidden parameters: {:?}", filename, e);
            return;
        }
    };
    let master_key = crypto::aes::Key::Aes256([0; 32]);
    match keyblob::decrypt(
        &RustCryptoAes,
        &RustCryptoSha256,
        &RustCryptoHmac,
        &RustCryptoEq,
        &master_key,
        &data,
        &hidden,
    ) {
        Ok(keyblob) => println!(
            "{}, {:?} KeyBlob {{\n  key_material=...(len {}),\n  hw_enforced={:?},\n  sw_enforced={:?},\n}}",
            filename,
            format,
            keyblob.key_material.len(),
            keyblob.hw_enforced,
            keyblob.sw_enforced
        ),
        Err(e) => eprintln!("{}: Failed to open {:?} key blob: {:?}", filename, format, e),
    }
}
