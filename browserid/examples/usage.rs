//! Sample App for BrowserID
use std::collections::HashMap;

use browserid::{
    authority::{AssertionAuthority, BackedAssertion, KeyPair},
    client::{
        AddressInfoService, DelegationResolver, FetchError, Fetcher, ResolveError,
        ResolverConfig, SupportResponse, Verifier,
    },
};
use chrono::Utc;
use serde_json::{json, Value};
use url::Url;

const RELYING_PARTY: &str = "https://news.example.net";

// Network is a stand-in for the internet, answering requests for declarations of support.
struct Network {
    documents: HashMap<String, Value>,
}

impl Fetcher for Network {
    async fn fetch_support_document(&self, url: Url) -> Result<SupportResponse, FetchError> {
        let host = url.host_str().unwrap_or_default();
        match self.documents.get(host) {
            Some(document) => Ok(SupportResponse::Document(document.to_string().into_bytes())),
            None if host == "down.example.org" => {
                Err(FetchError::Network("connection refused".into()))
            }
            None => Ok(SupportResponse::Absent),
        }
    }
}

fn network(idp: &AssertionAuthority) -> Network {
    let documents = HashMap::from([
        // example.com lets its mail provider vouch for its addresses.
        (
            "example.com".to_owned(),
            json!({ "authority": "mail.example.org" }),
        ),
        (
            "mail.example.org".to_owned(),
            json!({
                "public-key": idp.public_key(),
                "authentication": "/browserid/sign_in",
                "provisioning": "/browserid/provision",
            }),
        ),
        // These two keep delegating to each other.
        (
            "loop-a.example.org".to_owned(),
            json!({ "authority": "loop-b.example.org" }),
        ),
        (
            "loop-b.example.org".to_owned(),
            json!({ "authority": "loop-a.example.org" }),
        ),
    ]);
    Network { documents }
}

// Sign in as `email` with a key certified by `idp`, the way the dialog would.
fn sign_in(idp: &AssertionAuthority, email: &str) -> String {
    let user_key = KeyPair::generate();
    let certificate = idp
        .certify(email, &user_key.public_key())
        .expect("Our example should certify.");
    let assertion = idp
        .generate_assertion(RELYING_PARTY, email, &user_key.to_bytes(), None)
        .expect("Our example should sign.");
    BackedAssertion::new(vec![certificate], assertion).to_string()
}

async fn classify(addresses: &AddressInfoService<Network>, email: &str) {
    match addresses.address_info(email).await {
        Ok(info) => println!(
            "{email}: {} address, {}, vouched for by {}",
            info.ty, info.state, info.idp_domain
        ),
        Err(error) => println!("{email}: {error}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), ResolveError> {
    let idp = AssertionAuthority::new("mail.example.org", KeyPair::generate());
    let config = ResolverConfig::default();

    // Who vouches for these addresses?
    let addresses = AddressInfoService::new(DelegationResolver::new(network(&idp), config.clone()));
    let resolution = addresses.resolver().resolve("example.com").await?;
    println!("example.com resolves to {resolution:?}\n");
    for email in [
        "alice@example.com",
        "bob@example.net",
        "carol@down.example.org",
        "dave@loop-a.example.org",
    ] {
        classify(&addresses, email).await;
    }

    // The relying party receives an assertion and checks it all the way back to the authority
    // responsible for the address.
    let verifier = Verifier::new(DelegationResolver::new(network(&idp), config));
    let bundle = sign_in(&idp, "alice@example.com");
    match verifier.verify(&bundle, RELYING_PARTY, Utc::now()).await {
        Ok(identity) => println!(
            "\nVerified {} for {}, certified by {}",
            identity.email, identity.audience, identity.issuer
        ),
        Err(error) => println!("\nRejected: {error}"),
    }

    // mail.example.org does not speak for example.net.
    let forged = sign_in(&idp, "bob@example.net");
    match verifier.verify(&forged, RELYING_PARTY, Utc::now()).await {
        Ok(identity) => println!("Verified {}, this should not happen", identity.email),
        Err(error) => println!("Rejected an assertion for bob@example.net: {error}"),
    }

    Ok(())
}
