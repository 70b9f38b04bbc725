//! The services a dialog relies on. Each is a trait so the flow can be driven by real services in
//! a browser and by mocks in tests.

use std::{fmt, rc::Rc};

use async_trait::async_trait;
use browserid_authority::{
    AssertionAuthority, BackedAssertion, Certificate, IdentityStore, KeyPair, SignedAssertion,
    SigningError,
};
use browserid_client::{AddressInfoError, AddressInfoService, Fetcher};
use browserid_types::{AddressInfo, PrimaryAuthority, PublicKey};
use url::Url;

use crate::{Options, Password, State};

/// A failure of a remote service, other than a refusal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError(pub String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service failure: {}", self.0)
    }
}

impl std::error::Error for ServiceError {}

/// Why the browser cannot run the dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsupported {
    /// Shown to the user.
    pub reason: String,
}

/// Proof of a session with the fallback authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(pub String);

/// Why a password was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// Wrong address or password. The user may try again.
    InvalidCredentials,
    /// The fallback authority could not be asked.
    Service(ServiceError),
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::InvalidCredentials => f.write_str("invalid credentials"),
            AuthFailure::Service(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for AuthFailure {}

/// Why a primary authority did not certify a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// The user has no session with the authority and has to sign in on its pages.
    NotAuthenticated,
    /// The authority did not answer.
    Unreachable,
    /// The authority answered with something unusable.
    Failed(String),
}

/// Why the fallback authority did not certify a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertifyError {
    /// The session does not own the address anymore.
    NotOwned,
    /// The certificate could not be produced.
    Signing(SigningError),
    /// The authority could not be asked.
    Service(ServiceError),
}

impl From<SigningError> for CertifyError {
    fn from(error: SigningError) -> Self {
        CertifyError::Signing(error)
    }
}

/// Classifies addresses as primary or secondary.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
#[async_trait(?Send)]
pub trait Directory {
    /// Classify `email`.
    async fn address_info(&self, email: &str) -> Result<AddressInfo, AddressInfoError>;

    /// Forget what is known about `email`, so the next lookup asks its authority again.
    fn invalidate(&self, email: &str);
}

#[async_trait(?Send)]
impl<F: Fetcher> Directory for AddressInfoService<F> {
    async fn address_info(&self, email: &str) -> Result<AddressInfo, AddressInfoError> {
        AddressInfoService::address_info(self, email).await
    }

    fn invalidate(&self, email: &str) {
        AddressInfoService::invalidate(self, email)
    }
}

/// The password based authentication of the fallback authority.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
#[async_trait(?Send)]
pub trait PasswordAuth {
    /// Is there a session already?
    async fn is_authenticated(&self) -> Result<bool, ServiceError>;

    /// Sign in with `email` and `password`.
    async fn authenticate(
        &self,
        email: &str,
        password: &Password,
    ) -> Result<SessionToken, AuthFailure>;

    /// Register a new address, the authority then mails a confirmation link to it.
    async fn stage_user(&self, email: &str, password: &Password) -> Result<(), ServiceError>;

    /// Does the signed in account need a password before it can own a secondary address? True
    /// for accounts made of primary addresses only.
    async fn password_needed_to_add_email(&self) -> Result<bool, ServiceError>;

    /// Add `email` to the signed in account, with the account's first `password` when it needs
    /// one. The authority mails a confirmation link to the address.
    async fn stage_email(&self, email: &str, password: Option<Password>) -> Result<(), ServiceError>;

    /// Reset the password of `email` to `password` once the user follows the link the authority
    /// mails to it.
    async fn stage_reset_password(
        &self,
        email: &str,
        password: &Password,
    ) -> Result<(), ServiceError>;

    /// Keep the session alive longer, for users on their own computer.
    async fn prolong_session(&self) -> Result<(), ServiceError>;
}

/// The silent provisioning of a primary authority.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
#[async_trait(?Send)]
pub trait Provisioner {
    /// Ask `authority` to certify `public_key` for `email`.
    async fn provision(
        &self,
        email: &str,
        authority: &PrimaryAuthority,
        public_key: &PublicKey,
    ) -> Result<Certificate, ProvisionError>;
}

/// Certifies keys for secondary addresses and signs assertions with certified keys.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
#[async_trait(?Send)]
pub trait Certifier {
    /// Certify `public_key` for `email`.
    async fn certify(&self, email: &str, public_key: &PublicKey)
        -> Result<Certificate, CertifyError>;

    /// Sign an assertion for `audience` with a certified `key_pair`.
    fn generate_assertion(
        &self,
        audience: &str,
        email: &str,
        key_pair: &KeyPair,
    ) -> Result<SignedAssertion, SigningError>;
}

#[async_trait(?Send)]
impl Certifier for AssertionAuthority {
    async fn certify(
        &self,
        email: &str,
        public_key: &PublicKey,
    ) -> Result<Certificate, CertifyError> {
        Ok(AssertionAuthority::certify(self, email, public_key)?)
    }

    fn generate_assertion(
        &self,
        audience: &str,
        email: &str,
        key_pair: &KeyPair,
    ) -> Result<SignedAssertion, SigningError> {
        AssertionAuthority::generate_assertion(self, audience, email, &key_pair.to_bytes(), None)
    }
}

/// Displays the dialog.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
pub trait Screens {
    /// Show the screen of `state`.
    fn render(&self, state: State, options: &Options);

    /// Leave the dialog for `url`. The flow resumes when the user comes back.
    fn navigate(&self, url: &Url) {
        self.render(
            State::RedirectToAuthority,
            &Options::new().with("url", url.as_str()),
        );
    }
}

/// The browser the dialog runs in.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
#[async_trait(?Send)]
pub trait Platform {
    /// Can the dialog run here?
    async fn check_support(&self) -> Result<(), Unsupported>;

    /// Should the signed in user be asked whether this computer is theirs?
    fn should_ask_if_users_computer(&self) -> bool;

    /// Remember the user's answer.
    fn set_users_computer(&self, users_computer: bool);
}

/// Every service a dialog needs.
#[derive(Clone)]
pub struct Collaborators {
    /// Classifies addresses.
    pub directory: Rc<dyn Directory>,
    /// Signs in with the fallback authority.
    pub password_auth: Rc<dyn PasswordAuth>,
    /// Asks primary authorities for certificates.
    pub provisioner: Rc<dyn Provisioner>,
    /// Certifies secondary addresses and signs assertions.
    pub certifier: Rc<dyn Certifier>,
    /// Remembers the user's addresses and keys.
    pub identities: Rc<dyn IdentityStore>,
    /// Displays the dialog.
    pub screens: Rc<dyn Screens>,
    /// The browser.
    pub platform: Rc<dyn Platform>,
}

/// Join `certificate` and `assertion` into the bundle handed to a relying party.
pub(crate) fn backed_assertion(certificate: &Certificate, assertion: SignedAssertion) -> String {
    BackedAssertion::new(vec![certificate.clone()], assertion).to_string()
}
