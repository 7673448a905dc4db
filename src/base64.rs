pub use base64::Engine as _;
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    DecodeError, Engine,
};

const CONFIG_NO_PAD: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_encode_padding(false)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

/// Every binary field crossing the relying-party boundary uses this engine.
pub const BASE64_URLSAFE_NOPAD: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, CONFIG_NO_PAD);

pub fn encode_urlsafe<T: AsRef<[u8]>>(input: T) -> String {
    BASE64_URLSAFE_NOPAD.encode(input)
}

pub fn decode_urlsafe<T: AsRef<[u8]>>(input: T) -> Result<Vec<u8>, DecodeError> {
    BASE64_URLSAFE_NOPAD.decode(input)
}

#[test]
fn test_urlsafe_no_padding() {
    let encoded = encode_urlsafe([0xfb, 0xff, 0x01]);
    assert_eq!(encoded, "-_8B");
    assert_eq!(encode_urlsafe([0xfb]), "-w");
    assert_eq!(decode_urlsafe("-w").unwrap(), vec![0xfb]);
    assert_eq!(decode_urlsafe("-w==").unwrap(), vec![0xfb]);
    assert!(decode_urlsafe("+/").is_err());
}
