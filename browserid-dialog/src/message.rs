use std::fmt;

use browserid_authority::{Certificate, KeyPair, KnownIdentity, SigningError};
use browserid_client::AddressInfoError;
use browserid_types::AddressInfo;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{AuthFailure, Options, ServiceError, Unsupported};

/// A password typed in by the user. It is wiped from memory when dropped and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Password(String);

impl Password {
    /// Wrap a password.
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    /// The password itself, to hand to the fallback authority.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// What an error screen is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The address the user typed is not an email address.
    InvalidEmail,
    /// The authority of the address could not be trusted or did not certify the user.
    Provisioning,
    /// A service the dialog depends on failed.
    Network,
    /// An assertion could not be signed.
    Signing,
}

/// Describes an error to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDescriptor {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Details, for the curious.
    pub detail: String,
}

impl ErrorDescriptor {
    /// An error of `kind`.
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// The options the error screen is rendered with.
    pub fn to_options(&self) -> Options {
        Options::new()
            .with("kind", self.kind.to_string())
            .with("detail", self.detail.as_str())
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl From<AddressInfoError> for ErrorDescriptor {
    fn from(error: AddressInfoError) -> Self {
        match error {
            AddressInfoError::InvalidEmail => {
                ErrorDescriptor::new(ErrorKind::InvalidEmail, error.to_string())
            }
            AddressInfoError::Resolve(error) => {
                ErrorDescriptor::new(ErrorKind::Provisioning, error.to_string())
            }
        }
    }
}

impl From<ServiceError> for ErrorDescriptor {
    fn from(error: ServiceError) -> Self {
        ErrorDescriptor::new(ErrorKind::Network, error.to_string())
    }
}

impl From<SigningError> for ErrorDescriptor {
    fn from(error: SigningError) -> Self {
        ErrorDescriptor::new(ErrorKind::Signing, error.to_string())
    }
}

/// Everything that can happen to a dialog. Screens publish what the user did, operations publish
/// what they found out, and handlers publish follow ups.
///
/// The names messages go by on the bus are the snake case variant names, see [`Message::name`].
#[derive(Debug, Clone, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Message {
    /// A relying party at `origin` asked for an assertion. `email` is set when the flow resumes
    /// after the user signed in with their primary authority.
    Start {
        /// The origin of the relying party.
        origin: String,
        /// The primary address the flow resumes with.
        email: Option<String>,
    },
    /// Result of the browser support check.
    CookiesChecked(Result<(), Unsupported>),
    /// Result of the session check.
    AuthenticationChecked {
        /// Whether there is a session with the fallback authority.
        authenticated: bool,
    },
    /// Show the known addresses.
    PickEmail,
    /// Show the new address prompt.
    AddEmail,
    /// The user picked a known address.
    EmailChosen {
        /// The picked address.
        email: String,
    },
    /// The user typed in a new address.
    UserSubmittedEmail {
        /// The new address.
        email: String,
    },
    /// The address was classified.
    AddressInfoResolved(AddressInfo),
    /// Ask for the password of a secondary address.
    Authenticate {
        /// The address to sign in with.
        email: String,
    },
    /// The user typed in the password of a secondary address.
    UserVerified {
        /// The address to sign in with.
        email: String,
        /// Its password.
        password: Password,
    },
    /// The fallback authority accepted the password.
    Authenticated {
        /// The address that signed in.
        email: String,
    },
    /// The fallback authority did not accept the password.
    AuthenticationFailed {
        /// The address that tried to sign in.
        email: String,
        /// Why.
        failure: AuthFailure,
    },
    /// The user forgot the password of a secondary address and wants to choose a new one.
    ForgotPassword {
        /// The address whose password is reset.
        email: String,
    },
    /// The user chose a password, see [`State::SetPassword`](crate::State::SetPassword).
    PasswordSet {
        /// The address the password is for.
        email: String,
        /// The chosen password.
        password: Password,
    },
    /// The fallback authority sent a confirmation link to the new address.
    UserStaged {
        /// The new address.
        email: String,
    },
    /// Add a secondary address to the account the user is signed in to.
    StageEmail {
        /// The address to add.
        email: String,
    },
    /// The account has no password yet and needs one before it can own a secondary address.
    PasswordNeeded {
        /// The address being added.
        email: String,
    },
    /// The fallback authority sent a confirmation link to the added address.
    EmailStaged {
        /// The added address.
        email: String,
    },
    /// The user followed the confirmation link of a new or added address.
    EmailConfirmed {
        /// The confirmed address.
        email: String,
    },
    /// The fallback authority sent a link confirming the password reset.
    ResetPasswordStaged {
        /// The address whose password is reset.
        email: String,
    },
    /// The user followed the link and the new password is in place.
    ResetPasswordConfirmed {
        /// The address whose password was reset.
        email: String,
    },
    /// Continue with a primary address.
    PrimaryUser {
        /// The primary address.
        email: String,
    },
    /// The primary authority certified a fresh key.
    PrimaryUserProvisioned {
        /// The primary address.
        email: String,
        /// The certified key pair.
        key_pair: KeyPair,
        /// Its certificate.
        certificate: Certificate,
    },
    /// The primary authority wants the user to sign in first.
    PrimaryUserUnauthenticated {
        /// The primary address.
        email: String,
        /// Where the user signs in.
        authentication: Url,
    },
    /// The user agreed to go sign in with their primary authority.
    PrimaryUserAuthenticating,
    /// The user came back from signing in with their primary authority.
    PrimaryUserAuthenticated {
        /// The primary address.
        email: String,
    },
    /// The primary address has a valid certificate.
    PrimaryUserReady {
        /// The primary address.
        email: String,
    },
    /// The primary authority did not answer.
    PrimaryOffline {
        /// The primary address.
        email: String,
        /// The authority that did not answer.
        idp: String,
    },
    /// The user wants to try the unreachable authority again.
    RetryPrimary,
    /// The address can be used to sign an assertion.
    EmailValidAndReady {
        /// The ready address.
        email: String,
    },
    /// The user said whether they own this computer.
    UserComputerStatusSet {
        /// Whether they do.
        users_computer: bool,
    },
    /// Sign an assertion.
    GenerateAssertion {
        /// The address to sign for.
        email: String,
    },
    /// The outcome of signing.
    AssertionGenerated {
        /// The address that was signed for.
        email: String,
        /// The backed assertion, `None` when the address can no longer be used.
        assertion: Option<String>,
        /// A freshly certified identity to remember.
        identity: Option<KnownIdentity>,
    },
    /// Something failed.
    Error(ErrorDescriptor),
    /// The user dismissed the error screen.
    ErrorAcknowledged,
    /// The user gave up on the whole dialog.
    Cancel,
    /// The user went back one step.
    CancelState,
}

impl Message {
    /// The name of the message on the bus, e.g. `user_verified`.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}
