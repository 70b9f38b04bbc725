use std::{collections::VecDeque, fmt, future::Future, pin::Pin, time::Duration};

use browserid_authority::{Certificate, KeyPair, KnownIdentity};
use browserid_types::AddressInfo;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::{
    collaborators::backed_assertion, AuthFailure, CertifyError, Collaborators, ErrorDescriptor,
    ErrorKind, History, Message, Options, Password, ProvisionError, State,
};

/// How long remote services get to answer unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const FALLBACK_AUTHORITY: &str = "the fallback authority";

#[cfg(test)]
mod tests;

/// The asynchronous work of the current command. It resolves to the message that resumes the
/// flow.
type Operation = Pin<Box<dyn Future<Output = Message>>>;

/// Identifies the command that was current when an operation started.
///
/// Every installed command gets a new generation. A message tagged with an older generation
/// answers a question nobody is asking anymore and is dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the dialog knows so far. Each command keeps a snapshot of it, so going back also forgets
/// what was learned since.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlowContext {
    origin: Option<String>,
    email: Option<String>,
    address: Option<AddressInfo>,
    authenticated: bool,
    adding_email: bool,
    resume_primary: Option<String>,
    staging: Option<Staging>,
}

/// What a password chosen on [`State::SetPassword`] is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
enum Staging {
    NewUser,
    AddEmail,
    ResetPassword,
}

struct Envelope {
    message: Message,
    issued_by: Option<Generation>,
}

/// Publishes messages to a [`StateMachine`] from outside of it, typically from screens.
#[derive(Clone)]
pub struct MessageSender {
    inbox: mpsc::UnboundedSender<Envelope>,
}

impl MessageSender {
    /// Publish `message`. It is handled whatever the dialog is doing by then.
    pub fn publish(&self, message: Message) {
        self.send(Envelope {
            message,
            issued_by: None,
        });
    }

    /// Publish `message` as the answer to the command of `generation`. It is dropped if another
    /// command is current by the time it is handled.
    pub fn reply(&self, generation: Generation, message: Message) {
        self.send(Envelope {
            message,
            issued_by: Some(generation),
        });
    }

    fn send(&self, envelope: Envelope) {
        if let Err(mpsc::error::SendError(envelope)) = self.inbox.send(envelope) {
            log::debug!("dialog is gone, dropping {}", envelope.message.name());
        }
    }
}

type Subscriber = Box<dyn FnMut(&Message)>;

/// Drives a dialog from the relying party's request to an assertion.
///
/// Messages are handled one at a time: whatever a handler publishes is queued and handled after
/// it. Entering a state either renders its screen or starts its operation, there is at most one
/// operation at a time and it is dropped as soon as another command is installed.
///
/// The machine is single threaded. [`StateMachine::run`] drives it until the dialog ends,
/// [`StateMachine::settle`] until it waits for the user.
pub struct StateMachine {
    collaborators: Collaborators,
    history: History,
    context: FlowContext,
    generation: Generation,
    pending: Option<(Generation, Operation)>,
    queue: VecDeque<Message>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    outbox: mpsc::UnboundedSender<Envelope>,
    subscribers: Vec<Subscriber>,
    staged_password: Option<Password>,
    registration_complete: bool,
    request_timeout: Duration,
}

enum Event {
    Settled(Envelope),
    Received(Option<Envelope>),
}

impl StateMachine {
    /// A dialog that has not started yet, see [`Message::Start`].
    pub fn new(collaborators: Collaborators) -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Self {
            collaborators,
            history: History::new(),
            context: FlowContext::default(),
            generation: Generation::default(),
            pending: None,
            queue: VecDeque::new(),
            inbox,
            outbox,
            subscribers: Vec::new(),
            staged_password: None,
            registration_complete: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Give up on a remote service that has not answered after `timeout`. A primary authority
    /// that times out is offline, any other service is a network error.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// A sender for screens and other code that cannot borrow the machine.
    pub fn sender(&self) -> MessageSender {
        MessageSender {
            inbox: self.outbox.clone(),
        }
    }

    /// Call `subscriber` with every message the machine accepts, before it is handled.
    pub fn subscribe(&mut self, subscriber: impl FnMut(&Message) + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    /// The current state, `None` before the dialog started.
    pub fn state(&self) -> Option<State> {
        self.history.current().map(|command| command.state())
    }

    /// The generation of the current command.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The commands the user can go back to.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Is an operation outstanding?
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Handle `message` and everything it leads to, up to the next operation or screen.
    ///
    /// Once the dialog is complete or cancelled every message is ignored.
    pub fn publish(&mut self, message: Message) {
        self.queue.push_back(message);
        while let Some(message) = self.queue.pop_front() {
            if let Some(state) = self.state().filter(|state| state.is_terminal()) {
                log::debug!("dialog ended in {state}, ignoring {}", message.name());
                continue;
            }
            for subscriber in &mut self.subscribers {
                subscriber(&message);
            }
            self.handle(message);
        }
    }

    /// Handle published messages and finish outstanding operations until the dialog waits for
    /// the user.
    ///
    /// Dropping the returned future leaves the outstanding operation in place.
    pub async fn settle(&mut self) {
        loop {
            self.drain_inbox();
            let Some((generation, operation)) = self.pending.as_mut() else {
                return;
            };
            let generation = *generation;
            let message = operation.await;
            self.pending = None;
            self.deliver(Envelope {
                message,
                issued_by: Some(generation),
            });
        }
    }

    /// Drive the dialog until it is complete or cancelled, and return that final state.
    pub async fn run(&mut self) -> Option<State> {
        loop {
            self.drain_inbox();
            if let Some(state) = self.state().filter(|state| state.is_terminal()) {
                return Some(state);
            }

            let event = match self.pending.as_mut() {
                Some((generation, operation)) => {
                    let generation = *generation;
                    tokio::select! {
                        message = operation => Event::Settled(Envelope {
                            message,
                            issued_by: Some(generation),
                        }),
                        envelope = self.inbox.recv() => Event::Received(envelope),
                    }
                }
                None => Event::Received(self.inbox.recv().await),
            };

            match event {
                Event::Settled(envelope) => {
                    self.pending = None;
                    self.deliver(envelope);
                }
                Event::Received(Some(envelope)) => self.deliver(envelope),
                Event::Received(None) => return self.state(),
            }
        }
    }

    fn drain_inbox(&mut self) {
        while let Ok(envelope) = self.inbox.try_recv() {
            self.deliver(envelope);
        }
    }

    fn deliver(&mut self, envelope: Envelope) {
        match envelope.issued_by {
            Some(generation) if generation != self.generation => {
                log::debug!(
                    "discarding {} from command {generation}, {} is current",
                    envelope.message.name(),
                    self.generation
                );
            }
            _ => self.publish(envelope.message),
        }
    }

    /// Queue a follow up, handled once the current message is.
    fn redirect(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Start { origin, email } => {
                self.context = FlowContext {
                    origin: Some(origin),
                    resume_primary: email,
                    ..FlowContext::default()
                };
                self.goto_state(false, State::CheckCookiesAndSupport, Options::new());
            }
            Message::CookiesChecked(Err(unsupported)) => self.goto_state(
                true,
                State::UnsupportedBrowser,
                Options::new().with("reason", unsupported.reason),
            ),
            Message::CookiesChecked(Ok(())) => match self.context.resume_primary.take() {
                Some(email) => self.redirect(Message::EmailChosen { email }),
                None => self.goto_state(false, State::CheckAuth, Options::new()),
            },
            Message::AuthenticationChecked { authenticated } => {
                self.context.authenticated = authenticated;
                self.pick_or_add_email();
            }
            Message::PickEmail => {
                let identities: Vec<String> = self
                    .collaborators
                    .identities
                    .known_identities()
                    .into_keys()
                    .collect();
                let origin = self.context.origin.clone().unwrap_or_default();
                let options = Options::new()
                    .with("origin", origin)
                    .with("identities", identities);
                self.goto_state(true, State::PickEmail, options);
            }
            Message::AddEmail => self.goto_state(true, State::AddEmail, Options::new()),
            Message::EmailChosen { email } => {
                self.context.adding_email = false;
                self.look_up(email);
            }
            Message::UserSubmittedEmail { email } => {
                self.context.adding_email = true;
                self.look_up(email);
            }
            Message::AddressInfoResolved(info) => self.address_resolved(info),
            Message::Authenticate { email } => {
                self.goto_state(true, State::Authenticate, Options::email(&email))
            }
            Message::UserVerified { email, password } => {
                let password_auth = self.collaborators.password_auth.clone();
                let timeout = self.request_timeout;
                self.start_operation(Box::pin(async move {
                    let answer =
                        tokio::time::timeout(timeout, password_auth.authenticate(&email, &password))
                            .await;
                    match answer {
                        Ok(Ok(_session)) => Message::Authenticated { email },
                        Ok(Err(failure)) => Message::AuthenticationFailed { email, failure },
                        Err(_elapsed) => Message::Error(timed_out(FALLBACK_AUTHORITY, timeout)),
                    }
                }));
            }
            Message::Authenticated { email } => {
                self.context.authenticated = true;
                self.context.email = Some(email.clone());
                self.redirect(Message::EmailValidAndReady { email });
            }
            Message::EmailConfirmed { email } | Message::ResetPasswordConfirmed { email } => {
                self.registration_complete = true;
                self.context.authenticated = true;
                self.context.staging = None;
                self.context.email = Some(email.clone());
                self.redirect(Message::EmailValidAndReady { email });
            }
            Message::AuthenticationFailed {
                email,
                failure: AuthFailure::InvalidCredentials,
            } => {
                log::debug!("wrong password for {email}");
                self.show_notice(Options::new().with("error", "invalid_credentials"));
            }
            Message::AuthenticationFailed {
                failure: AuthFailure::Service(error),
                ..
            } => self.redirect(Message::Error(error.into())),
            Message::ForgotPassword { email } => {
                if self.address_of(&email).is_some_and(AddressInfo::is_primary) {
                    self.redirect(Message::Error(ErrorDescriptor::new(
                        ErrorKind::InvalidEmail,
                        format!("the password of {email} is kept by its own authority"),
                    )));
                } else {
                    self.context.email = Some(email.clone());
                    self.context.staging = Some(Staging::ResetPassword);
                    self.ask_for_password(&email);
                }
            }
            Message::PasswordSet { email, password } => {
                self.staged_password = Some(password);
                let state = match self.context.staging {
                    Some(Staging::AddEmail) => State::StageEmail,
                    Some(Staging::ResetPassword) => State::StageResetPassword,
                    Some(Staging::NewUser) | None => State::StageUser,
                };
                self.goto_state(false, state, Options::email(&email));
            }
            Message::StageEmail { email } => {
                self.context.staging = Some(Staging::AddEmail);
                self.goto_state(false, State::StageEmail, Options::email(&email));
            }
            Message::PasswordNeeded { email } => self.ask_for_password(&email),
            Message::UserStaged { email }
            | Message::EmailStaged { email }
            | Message::ResetPasswordStaged { email } => {
                let mut options = Options::email(&email);
                if let Some(staging) = self.context.staging {
                    options = options.with("purpose", staging.to_string());
                }
                self.goto_state(true, State::ConfirmEmail, options);
            }
            Message::PrimaryUser { email } => {
                if self.has_primary_certificate(&email) {
                    self.redirect(Message::PrimaryUserReady { email });
                } else {
                    self.goto_state(false, State::ProvisionPrimary, Options::email(&email));
                }
            }
            Message::PrimaryUserProvisioned {
                email,
                key_pair,
                certificate,
            } => self.primary_provisioned(email, key_pair, certificate),
            Message::PrimaryUserUnauthenticated {
                email,
                authentication,
            } => self.goto_state(
                true,
                State::RedirectToAuthority,
                Options::email(&email).with("url", authentication.as_str()),
            ),
            Message::PrimaryUserAuthenticating => {
                let authentication = self
                    .context
                    .address
                    .as_ref()
                    .and_then(|info| info.primary.as_ref())
                    .map(|primary| primary.authentication.clone());
                match authentication {
                    Some(url) => self.collaborators.screens.navigate(&url),
                    None => log::warn!("no primary authority to authenticate with"),
                }
            }
            Message::PrimaryUserAuthenticated { email } => {
                self.redirect(Message::PrimaryUser { email })
            }
            Message::PrimaryUserReady { email } => {
                self.redirect(Message::EmailValidAndReady { email })
            }
            Message::EmailValidAndReady { email } => {
                if self.should_ask_if_users_computer() {
                    self.goto_state(true, State::IsThisYourComputer, Options::email(&email));
                } else {
                    self.redirect(Message::GenerateAssertion { email });
                }
            }
            Message::UserComputerStatusSet { users_computer } => {
                self.users_computer_status_set(users_computer)
            }
            Message::PrimaryOffline { email, idp } => self.goto_state(
                true,
                State::PrimaryOffline,
                Options::email(&email).with("idp", idp),
            ),
            Message::RetryPrimary => match self.context.email.clone() {
                Some(email) => {
                    self.collaborators.directory.invalidate(&email);
                    self.goto_state(false, State::AddressInfo, Options::email(&email));
                }
                None => log::warn!("nothing to retry"),
            },
            Message::GenerateAssertion { email } => {
                self.goto_state(true, State::GenerateAssertion, Options::email(&email))
            }
            Message::AssertionGenerated {
                email,
                assertion: None,
                ..
            } => {
                log::info!("{email} can no longer be used, forgetting it");
                self.collaborators.identities.remove_known_identity(&email);
                self.redirect(Message::PickEmail);
            }
            Message::AssertionGenerated {
                email,
                assertion: Some(assertion),
                identity,
            } => {
                if let Some(identity) = identity {
                    self.collaborators
                        .identities
                        .set_known_identity(&email, identity);
                }
                self.goto_state(
                    true,
                    State::Complete,
                    Options::email(&email).with("assertion", assertion),
                );
            }
            Message::Error(descriptor) => {
                log::warn!("dialog failed: {descriptor}");
                self.goto_state(true, State::Error, descriptor.to_options());
            }
            Message::ErrorAcknowledged => self.pick_or_add_email(),
            Message::Cancel => {
                if let Some(email) = self.context.email.clone() {
                    self.collaborators.directory.invalidate(&email);
                }
                self.goto_state(true, State::Cancel, Options::new());
            }
            Message::CancelState => self.cancel_state(),
        }
    }

    fn pick_or_add_email(&mut self) {
        if self.collaborators.identities.known_identities().is_empty() {
            self.redirect(Message::AddEmail);
        } else {
            self.redirect(Message::PickEmail);
        }
    }

    fn look_up(&mut self, email: String) {
        self.context.email = Some(email.clone());
        self.context.address = None;
        self.context.staging = None;
        self.goto_state(false, State::AddressInfo, Options::email(&email));
    }

    fn ask_for_password(&mut self, email: &str) {
        let staging = self.context.staging.unwrap_or(Staging::NewUser);
        let options = Options::email(email).with("purpose", staging.to_string());
        self.goto_state(true, State::SetPassword, options);
    }

    /// Users who just registered are not asked, neither is anyone without a session.
    fn should_ask_if_users_computer(&self) -> bool {
        self.context.authenticated
            && !self.registration_complete
            && self.collaborators.platform.should_ask_if_users_computer()
    }

    fn users_computer_status_set(&mut self, users_computer: bool) {
        let Some(email) = self.context.email.clone() else {
            log::warn!("no address to continue with");
            return;
        };
        self.collaborators
            .platform
            .set_users_computer(users_computer);
        if !users_computer {
            // Nothing learned about the address outlives the dialog on a shared computer.
            self.collaborators.directory.invalidate(&email);
            self.redirect(Message::GenerateAssertion { email });
            return;
        }

        let password_auth = self.collaborators.password_auth.clone();
        let timeout = self.request_timeout;
        self.start_operation(Box::pin(async move {
            let prolonged = within(timeout, FALLBACK_AUTHORITY, password_auth.prolong_session()).await;
            match prolonged {
                Ok(()) => Message::GenerateAssertion { email },
                Err(error) => Message::Error(error),
            }
        }));
    }

    fn address_resolved(&mut self, info: AddressInfo) {
        let email = info.email.clone();
        let (offline, primary) = (info.is_offline(), info.is_primary());
        let idp = info.idp_domain.clone();
        self.context.email = Some(email.clone());
        self.context.address = Some(info);

        if offline {
            self.redirect(Message::PrimaryOffline { email, idp });
        } else if primary {
            self.redirect(Message::PrimaryUser { email });
        } else if self.context.adding_email && self.context.authenticated {
            self.redirect(Message::StageEmail { email });
        } else if self.context.adding_email {
            self.context.staging = Some(Staging::NewUser);
            self.ask_for_password(&email);
        } else if self.context.authenticated {
            self.redirect(Message::EmailValidAndReady { email });
        } else {
            self.redirect(Message::Authenticate { email });
        }
    }

    /// Is there a valid certificate for `email` from its current primary authority?
    fn has_primary_certificate(&self, email: &str) -> bool {
        let idp = self.address_of(email).map(|info| info.idp_domain.as_str());
        self.collaborators
            .identities
            .known_identity(email)
            .is_some_and(|identity| {
                identity.issuer.as_deref() == idp && identity.certified_key(Utc::now()).is_some()
            })
    }

    fn primary_provisioned(&mut self, email: String, key_pair: KeyPair, certificate: Certificate) {
        let idp = self.address_of(&email).map(|info| info.idp_domain.clone());
        let claims = certificate.claims();
        if claims.principal.email != email
            || claims.public_key != key_pair.public_key()
            || Some(&claims.iss) != idp.as_ref()
        {
            self.redirect(Message::Error(ErrorDescriptor::new(
                ErrorKind::Provisioning,
                "the authority certified something else than what it was asked",
            )));
            return;
        }

        let mut identity = self
            .collaborators
            .identities
            .known_identity(&email)
            .unwrap_or_else(|| KnownIdentity::new(Utc::now()));
        identity.issuer = idp;
        identity.key_pair = Some(key_pair);
        identity.certificate = Some(certificate);
        self.collaborators
            .identities
            .set_known_identity(&email, identity);
        self.redirect(Message::PrimaryUserReady { email });
    }

    fn address_of(&self, email: &str) -> Option<&AddressInfo> {
        self.context
            .address
            .as_ref()
            .filter(|info| info.email == email)
    }

    fn cancel_state(&mut self) {
        if self.history.is_empty() {
            log::debug!("nothing to go back to");
            return;
        }
        self.supersede();
        if let Some(command) = self.history.pop_state() {
            log::debug!("going back to {}", command.state());
            self.context = command.snapshot().clone();
        }
        self.invoke_current();
    }

    /// Install a command and enter its state.
    fn goto_state(&mut self, save: bool, state: State, options: Options) {
        self.supersede();
        self.history
            .create_state(state, options, save, self.context.clone());
        self.invoke_current();
    }

    /// Drop the outstanding operation and start a new generation.
    fn supersede(&mut self) {
        if let Some((generation, _)) = self.pending.take() {
            log::debug!("dropping the operation of command {generation}");
        }
        self.generation = Generation(self.generation.0 + 1);
    }

    fn invoke_current(&mut self) {
        let Some(command) = self.history.current() else {
            return;
        };
        let (state, options) = (command.state(), command.options().clone());
        log::debug!("entering {state} as command {}", self.generation);

        if !state.is_work() {
            self.collaborators.screens.render(state, &options);
            return;
        }
        match self.operation(state, &options) {
            Ok(operation) => self.start_operation(operation),
            Err(message) => self.redirect(message),
        }
    }

    /// Show the current screen again with `notice`, without keeping it in the command.
    fn show_notice(&self, notice: Options) {
        let Some(command) = self.history.current() else {
            return;
        };
        let mut options = command.options().clone();
        options.extend(notice);
        self.collaborators.screens.render(command.state(), &options);
    }

    fn start_operation(&mut self, operation: Operation) {
        self.pending = Some((self.generation, operation));
    }

    /// The operation of a work state, or the message to handle instead when it cannot start.
    fn operation(&mut self, state: State, options: &Options) -> Result<Operation, Message> {
        let email = options.get_str("email").map(str::to_owned);
        match (state, email) {
            (State::CheckCookiesAndSupport, _) => {
                let platform = self.collaborators.platform.clone();
                Ok(Box::pin(async move {
                    Message::CookiesChecked(platform.check_support().await)
                }))
            }
            (State::CheckAuth, _) => {
                let password_auth = self.collaborators.password_auth.clone();
                let timeout = self.request_timeout;
                Ok(Box::pin(async move {
                    let checked =
                        within(timeout, FALLBACK_AUTHORITY, password_auth.is_authenticated()).await;
                    match checked {
                        Ok(authenticated) => Message::AuthenticationChecked { authenticated },
                        Err(error) => Message::Error(error),
                    }
                }))
            }
            (State::AddressInfo, Some(email)) => {
                let directory = self.collaborators.directory.clone();
                Ok(Box::pin(async move {
                    match directory.address_info(&email).await {
                        Ok(info) => Message::AddressInfoResolved(info),
                        Err(error) => Message::Error(error.into()),
                    }
                }))
            }
            (State::StageUser, Some(email)) => {
                let password = self.staged_password.take().ok_or_else(|| {
                    log::warn!("no password to register {email} with");
                    Message::AddEmail
                })?;
                let password_auth = self.collaborators.password_auth.clone();
                let timeout = self.request_timeout;
                Ok(Box::pin(async move {
                    let staged = within(
                        timeout,
                        FALLBACK_AUTHORITY,
                        password_auth.stage_user(&email, &password),
                    )
                    .await;
                    match staged {
                        Ok(()) => Message::UserStaged { email },
                        Err(error) => Message::Error(error),
                    }
                }))
            }
            (State::StageEmail, Some(email)) => Ok(self.stage_email(email)),
            (State::StageResetPassword, Some(email)) => {
                let password = self.staged_password.take().ok_or_else(|| {
                    log::warn!("no new password for {email}");
                    Message::ForgotPassword {
                        email: email.clone(),
                    }
                })?;
                let password_auth = self.collaborators.password_auth.clone();
                let timeout = self.request_timeout;
                Ok(Box::pin(async move {
                    let staged = within(
                        timeout,
                        FALLBACK_AUTHORITY,
                        password_auth.stage_reset_password(&email, &password),
                    )
                    .await;
                    match staged {
                        Ok(()) => Message::ResetPasswordStaged { email },
                        Err(error) => Message::Error(error),
                    }
                }))
            }
            (State::ProvisionPrimary, Some(email)) => self.provision(email),
            (State::GenerateAssertion, Some(email)) => self.generate_assertion(email),
            (state, _) => Err(Message::Error(ErrorDescriptor::new(
                ErrorKind::Provisioning,
                format!("{state} needs an email address"),
            ))),
        }
    }

    /// Accounts made of primaries only choose a password before they get a secondary address.
    fn stage_email(&mut self, email: String) -> Operation {
        let password = self.staged_password.take();
        let password_auth = self.collaborators.password_auth.clone();
        let timeout = self.request_timeout;
        Box::pin(async move {
            if password.is_none() {
                let needed = within(
                    timeout,
                    FALLBACK_AUTHORITY,
                    password_auth.password_needed_to_add_email(),
                )
                .await;
                match needed {
                    Ok(true) => return Message::PasswordNeeded { email },
                    Ok(false) => {}
                    Err(error) => return Message::Error(error),
                }
            }
            let staged = within(
                timeout,
                FALLBACK_AUTHORITY,
                password_auth.stage_email(&email, password),
            )
            .await;
            match staged {
                Ok(()) => Message::EmailStaged { email },
                Err(error) => Message::Error(error),
            }
        })
    }

    fn provision(&self, email: String) -> Result<Operation, Message> {
        let info = self.address_of(&email);
        let (Some(authority), Some(idp)) = (
            info.and_then(|info| info.primary.clone()),
            info.map(|info| info.idp_domain.clone()),
        ) else {
            return Err(Message::Error(ErrorDescriptor::new(
                ErrorKind::Provisioning,
                format!("no primary authority is known for {email}"),
            )));
        };

        let provisioner = self.collaborators.provisioner.clone();
        let key_pair = KeyPair::generate();
        let timeout = self.request_timeout;
        Ok(Box::pin(async move {
            let public_key = key_pair.public_key();
            let result =
                tokio::time::timeout(timeout, provisioner.provision(&email, &authority, &public_key))
                    .await;
            let Ok(result) = result else {
                log::warn!("{idp} did not certify {email} within {timeout:?}");
                return Message::PrimaryOffline { email, idp };
            };
            match result {
                Ok(certificate) => Message::PrimaryUserProvisioned {
                    email,
                    key_pair,
                    certificate,
                },
                Err(ProvisionError::NotAuthenticated) => Message::PrimaryUserUnauthenticated {
                    email,
                    authentication: authority.authentication,
                },
                Err(ProvisionError::Unreachable) => Message::PrimaryOffline { email, idp },
                Err(ProvisionError::Failed(reason)) => {
                    Message::Error(ErrorDescriptor::new(ErrorKind::Provisioning, reason))
                }
            }
        }))
    }

    /// Sign with the stored key of `email` when it is still certified. Otherwise primaries go
    /// back to their authority, and secondaries get a fresh key certified first.
    fn generate_assertion(&self, email: String) -> Result<Operation, Message> {
        let audience = self.context.origin.clone().ok_or_else(|| {
            Message::Error(ErrorDescriptor::new(
                ErrorKind::Signing,
                "no relying party to sign for",
            ))
        })?;
        let primary = self.address_of(&email).is_some_and(AddressInfo::is_primary);
        let known = self.collaborators.identities.known_identity(&email);
        let certifier = self.collaborators.certifier.clone();
        let timeout = self.request_timeout;

        Ok(Box::pin(async move {
            let now = Utc::now();
            if let Some((key_pair, certificate)) =
                known.as_ref().and_then(|identity| identity.certified_key(now))
            {
                return match certifier.generate_assertion(&audience, &email, key_pair) {
                    Ok(assertion) => Message::AssertionGenerated {
                        assertion: Some(backed_assertion(certificate, assertion)),
                        email,
                        identity: None,
                    },
                    Err(error) => Message::Error(error.into()),
                };
            }
            if primary {
                return Message::PrimaryUser { email };
            }

            let key_pair = KeyPair::generate();
            let public_key = key_pair.public_key();
            let certified = tokio::time::timeout(timeout, certifier.certify(&email, &public_key)).await;
            let certificate = match certified {
                Err(_elapsed) => return Message::Error(timed_out(FALLBACK_AUTHORITY, timeout)),
                Ok(Ok(certificate)) => certificate,
                Ok(Err(CertifyError::NotOwned)) => {
                    return Message::AssertionGenerated {
                        email,
                        assertion: None,
                        identity: None,
                    }
                }
                Ok(Err(CertifyError::Signing(error))) => return Message::Error(error.into()),
                Ok(Err(CertifyError::Service(error))) => return Message::Error(error.into()),
            };
            let assertion = match certifier.generate_assertion(&audience, &email, &key_pair) {
                Ok(assertion) => assertion,
                Err(error) => return Message::Error(error.into()),
            };

            let bundle = backed_assertion(&certificate, assertion);
            let mut identity = known.unwrap_or_else(|| KnownIdentity::new(now));
            identity.issuer = None;
            identity.key_pair = Some(key_pair);
            identity.certificate = Some(certificate);
            Message::AssertionGenerated {
                email,
                assertion: Some(bundle),
                identity: Some(identity),
            }
        }))
    }
}

/// Wait for a remote `service`, and give up on it after `timeout`.
async fn within<T, E>(
    timeout: Duration,
    service: &str,
    request: impl Future<Output = Result<T, E>>,
) -> Result<T, ErrorDescriptor>
where
    E: Into<ErrorDescriptor>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(answer) => answer.map_err(Into::into),
        Err(_elapsed) => Err(timed_out(service, timeout)),
    }
}

fn timed_out(service: &str, timeout: Duration) -> ErrorDescriptor {
    log::warn!("{service} did not answer within {timeout:?}");
    ErrorDescriptor::new(ErrorKind::Network, format!("{service} did not answer in time"))
}
