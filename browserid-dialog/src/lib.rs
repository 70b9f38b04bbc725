//! # BrowserID Dialog
//!
//! The dialog a browser shows when a relying party asks for an assertion. It walks the user from
//! choosing an email address, through signing in with the address' authority, to handing a
//! backed assertion to the relying party.
//!
//! The flow is a [`StateMachine`] driven by [`Message`]s. Every step it takes installs a
//! [`Command`] in its [`History`], so the user can go back with [`Message::CancelState`] or give
//! up with [`Message::Cancel`] at any time. Everything the dialog talks to is a trait bundled in
//! [`Collaborators`]:
//!
//! * [`Directory`], to classify addresses, implemented by
//!   [`AddressInfoService`](browserid_client::AddressInfoService)
//! * [`PasswordAuth`], the fallback authority's password sign in
//! * [`Provisioner`], the silent provisioning of primary authorities
//! * [`Certifier`], implemented by [`AssertionAuthority`](browserid_authority::AssertionAuthority)
//! * [`IdentityStore`](browserid_authority::IdentityStore), the addresses and keys the browser
//!   remembers
//! * [`Screens`] and [`Platform`], the browser itself
//!
//! Remote services get [`DEFAULT_REQUEST_TIMEOUT`] to answer, see
//! [`StateMachine::request_timeout`]. A primary authority that does not answer in time is treated
//! as offline and the user is offered to try again.

mod collaborators;
mod history;
mod machine;
mod message;
mod state;

pub use self::{
    collaborators::{
        AuthFailure, CertifyError, Certifier, Collaborators, Directory, PasswordAuth, Platform,
        ProvisionError, Provisioner, Screens, ServiceError, SessionToken, Unsupported,
    },
    history::{Command, History, Options},
    machine::{Generation, MessageSender, StateMachine, DEFAULT_REQUEST_TIMEOUT},
    message::{ErrorDescriptor, ErrorKind, Message, Password},
    state::State,
};

#[cfg(any(test, feature = "testable"))]
pub use self::collaborators::{
    MockCertifier, MockDirectory, MockPasswordAuth, MockPlatform, MockProvisioner, MockScreens,
};
