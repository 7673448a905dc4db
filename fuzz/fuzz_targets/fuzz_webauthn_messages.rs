#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate passkey_rp;

use passkey_rp::webauthn::proto::{cbor, raw_message::*};

fuzz_target!(|data: &[u8]| {
    let _ = cbor::from_slice(data);
    let _ = AttestationObject::from_bytes(data);
    let _ = AuthenticatorData::from_bytes(data);
});
