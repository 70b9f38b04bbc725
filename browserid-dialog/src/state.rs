/// The states of the dialog.
///
/// A state is either a screen, rendered through [`Screens`](crate::Screens) while the flow waits
/// for the user, or a unit of work that starts one asynchronous operation and resumes the flow
/// with the message it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum State {
    /// Work: check that the browser can run the dialog at all.
    CheckCookiesAndSupport,
    /// Screen: the browser cannot run the dialog.
    UnsupportedBrowser,
    /// Work: ask whether the user already has a session with the fallback authority.
    CheckAuth,
    /// Screen: choose one of the known addresses.
    PickEmail,
    /// Screen: type in a new address.
    AddEmail,
    /// Work: classify the chosen address.
    AddressInfo,
    /// Screen: password prompt for a secondary address.
    Authenticate,
    /// Screen: choose a password, for a new account, for an account that gets its first secondary
    /// address, or to replace a forgotten one.
    SetPassword,
    /// Work: register a new secondary address with the fallback authority.
    StageUser,
    /// Work: add a secondary address to the account the user is signed in to.
    StageEmail,
    /// Work: ask the fallback authority to reset a forgotten password.
    StageResetPassword,
    /// Screen: waiting for the user to follow the link sent to their address.
    ConfirmEmail,
    /// Work: ask the primary authority to certify a fresh key.
    ProvisionPrimary,
    /// Screen: the primary authority wants the user to sign in on its own pages.
    RedirectToAuthority,
    /// Screen: the primary authority did not answer, offer to try again.
    PrimaryOffline,
    /// Screen: ask a signed in user whether they own this computer.
    IsThisYourComputer,
    /// Work: sign an assertion for the relying party.
    GenerateAssertion,
    /// Terminal screen: the assertion was handed to the relying party.
    Complete,
    /// Terminal screen: the user gave up.
    Cancel,
    /// Screen: something went wrong that the user can only acknowledge.
    Error,
}

impl State {
    /// Does entering this state start an asynchronous operation instead of rendering a screen?
    pub fn is_work(self) -> bool {
        matches!(
            self,
            State::CheckCookiesAndSupport
                | State::CheckAuth
                | State::AddressInfo
                | State::StageUser
                | State::StageEmail
                | State::StageResetPassword
                | State::ProvisionPrimary
                | State::GenerateAssertion
        )
    }

    /// Does the flow end in this state?
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Complete | State::Cancel)
    }
}
