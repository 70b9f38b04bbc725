//! # BrowserID Types
//!
//! Rust type definitions shared by the BrowserID authority, client and dialog crates:
//! the declaration of support a domain hosts at `/.well-known/browserid`, the public keys
//! found in it, the classification of an email address, and the claims carried by
//! certificates and assertions.

mod address;
mod claims;
mod error;
mod public_key;
mod utils;

pub mod well_known;

pub use self::{
    address::{split_email, AddressInfo, AddressState, AddressType, PrimaryAuthority},
    claims::{AssertionClaims, CertificateClaims, Principal},
    error::DocumentError,
    public_key::PublicKey,
    utils::encoding,
    well_known::{PrimarySupport, SupportDocument},
};
