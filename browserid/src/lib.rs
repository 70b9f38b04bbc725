//! # BrowserID
//!
//! BrowserID lets a browser prove to a website that its user controls an email address, without
//! the website having to send a single email. The browser holds a key certified by the
//! authority of the address and signs a short lived assertion with it; the website checks the
//! signatures back to that authority.
//!
//! This crate bundles the four libraries the scheme is built from:
//!
//! - `browserid-types` - the wire types, usable as [`types`]: declarations of support, public
//!   keys, address classifications and the claims of certificates and assertions.
//! - `browserid-client` - usable as [`client`]: discovers who vouches for an address by fetching
//!   `/.well-known/browserid` and following delegations, classifies addresses as primary or
//!   secondary, and verifies assertions for a relying party.
//! - `browserid-authority` - usable as [`authority`]: keys, certificate minting, assertion signing
//!   and certificate chain verification.
//! - `browserid-dialog` - usable as [`dialog`]: the message driven state machine that walks a
//!   user from picking an address to handing an assertion to the relying party.
//!
//! ## Basic Concepts
//!
//! An email address is *primary* when its domain (or a domain it delegates to) publishes a
//! declaration of support with a public key and two endpoints: one to sign users in and one to
//! certify their keys. Every other address is *secondary*: a fallback authority certifies it
//! after a password based sign in.
//!
//! The flow goes like this:
//!
//! RelyingParty <-> [`StateMachine`](dialog::StateMachine) <-> [`AddressInfoService`](client::AddressInfoService) <-> [`Fetcher`](client::Fetcher)
//!
//! and once the dialog produced a backed assertion the relying party checks it with a
//! [`Verifier`](client::Verifier).
//!
//! A runnable demonstration binary is provided in `browserid/examples/usage.rs`.
//!
//! ### Example: certifying a key and verifying an assertion
//!
//! ```
//! use browserid::authority::{
//!     AssertionAuthority, BackedAssertion, KeyPair, TrustedRoots,
//! };
//!
//! let authority = AssertionAuthority::new("example.com", KeyPair::generate());
//!
//! // The browser generates a key and has the authority certify it.
//! let user_key = KeyPair::generate();
//! let certificate = authority.certify("alice@example.com", &user_key.public_key()).unwrap();
//!
//! // Then signs an assertion for the relying party with it.
//! let assertion = authority
//!     .generate_assertion("https://rp.example.org", "alice@example.com", &user_key.to_bytes(), None)
//!     .unwrap();
//! let bundle = BackedAssertion::new(vec![certificate], assertion).to_string();
//!
//! // The relying party trusts example.com.
//! let roots = TrustedRoots::new().with("example.com", authority.public_key());
//! let identity = AssertionAuthority::verify_chain(
//!     &bundle,
//!     &roots,
//!     "https://rp.example.org",
//!     chrono::Utc::now(),
//! )
//! .unwrap();
//! assert_eq!(identity.email, "alice@example.com");
//! ```
//!
//! ### Example: finding the authority of an address
//!
//! ```
//! use browserid::client::{
//!     AddressInfoService, DelegationResolver, FetchError, Fetcher, ResolverConfig,
//!     SupportResponse,
//! };
//! use url::Url;
//!
//! // A network where example.com delegates to idp.example.org, which is a primary.
//! struct Network {
//!     idp_key: String,
//! }
//!
//! impl Fetcher for Network {
//!     async fn fetch_support_document(&self, url: Url) -> Result<SupportResponse, FetchError> {
//!         let document = match url.host_str() {
//!             Some("example.com") => r#"{ "authority": "idp.example.org" }"#.to_owned(),
//!             Some("idp.example.org") => format!(
//!                 r#"{{ "public-key": {}, "authentication": "/sign_in", "provisioning": "/provision" }}"#,
//!                 self.idp_key,
//!             ),
//!             _ => return Ok(SupportResponse::Absent),
//!         };
//!         Ok(SupportResponse::Document(document.into_bytes()))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let idp_key = browserid::authority::KeyPair::generate().public_key().to_jwk_string();
//! let resolver = DelegationResolver::new(Network { idp_key }, ResolverConfig::default());
//! let addresses = AddressInfoService::new(resolver);
//!
//! let alice = addresses.address_info("alice@example.com").await.unwrap();
//! assert!(alice.is_primary());
//! assert_eq!(alice.idp_domain, "idp.example.org");
//!
//! let bob = addresses.address_info("bob@example.net").await.unwrap();
//! assert!(!bob.is_primary());
//! assert_eq!(bob.idp_domain, "login.persona.org");
//! # })
//! ```

pub use browserid_authority as authority;
pub use browserid_client as client;
pub use browserid_dialog as dialog;
pub use browserid_types as types;
