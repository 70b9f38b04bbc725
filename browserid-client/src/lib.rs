//! # BrowserID Client
//!
//! This crate answers the question every BrowserID participant has to ask first: who vouches for
//! this email address?
//!
//! * A [`DelegationResolver`] fetches the declaration of support of the email's domain at
//!   `/.well-known/browserid` through a [`Fetcher`], follows delegations to other domains while
//!   guarding against cycles and overly long chains, and ends with the [`ResolvedAuthority`] or
//!   with the knowledge that the domain is not supported.
//! * An [`AddressInfoService`] turns resolutions into cached [`AddressInfo`](browserid_types::AddressInfo)
//!   classifications, primary or secondary, and keeps an unreachable authority distinct from an
//!   unsupported one.
//! * A [`Verifier`] checks backed assertions for a relying party, making sure the root issuer is
//!   allowed to speak for the email's domain.
//!
//! This crate does not perform any networking on its own unless the `reqwest` feature is enabled,
//! in which case [`reqwest::Client`](https://docs.rs/reqwest) implements [`Fetcher`].

mod address_info;
mod config;
mod fetcher;
mod resolver;
mod verifier;

#[cfg(test)]
mod tests;

pub use self::{
    address_info::{AddressInfoError, AddressInfoService},
    config::{ConfigError, ResolverConfig, Shim},
    fetcher::{Deduplicated, FetchError, Fetcher, SupportResponse},
    resolver::{DelegationChain, DelegationResolver, Resolution, ResolveError, ResolvedAuthority},
    verifier::{VerifyError, Verifier},
};
