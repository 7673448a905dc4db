pub mod cbor;
pub mod constants;
pub mod cose;
pub mod raw_message;
pub mod web_message;
