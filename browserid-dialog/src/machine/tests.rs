use std::{
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
    sync::Arc,
    time::Duration as StdDuration,
};

use async_trait::async_trait;
use browserid_authority::{
    AssertionAuthority, Certificate, IdentityStore, KeyPair, KnownIdentity, MemoryStore,
    TrustedRoots,
};
use browserid_client::{AddressInfoError, ResolveError};
use browserid_types::{AddressInfo, AddressType, PrimaryAuthority, PublicKey};
use chrono::{Duration, Utc};
use tokio::{sync::oneshot, time::Instant};
use url::Url;

use super::{StateMachine, DEFAULT_REQUEST_TIMEOUT};
use crate::{
    AuthFailure, Collaborators, ErrorKind, Message, MessageSender, MockDirectory,
    MockPasswordAuth, MockPlatform, MockProvisioner, Options, Password, PasswordAuth,
    ProvisionError, Provisioner, Screens, ServiceError, SessionToken, State, Unsupported,
};

const RP: &str = "https://rp.example";
const FALLBACK: &str = "login.persona.org";
const SECONDARY: &str = "lloyd@secondary.example";
const PRIMARY: &str = "shane@primary.example";
const IDP: &str = "primary.example";

/// Screens that remember what they showed and can play the user's part.
#[derive(Default)]
struct Recorder {
    rendered: RefCell<Vec<(State, Options)>>,
    navigations: RefCell<Vec<Url>>,
    script: RefCell<HashMap<State, Message>>,
    user: RefCell<Option<MessageSender>>,
}

impl Recorder {
    fn states(&self) -> Vec<State> {
        self.rendered.borrow().iter().map(|(state, _)| *state).collect()
    }

    fn last(&self) -> Option<(State, Options)> {
        self.rendered.borrow().last().cloned()
    }

    /// When `state` is rendered, answer with `message`.
    fn answer(&self, state: State, message: Message) {
        self.script.borrow_mut().insert(state, message);
    }
}

impl Screens for Recorder {
    fn render(&self, state: State, options: &Options) {
        self.rendered.borrow_mut().push((state, options.clone()));
        let answer = self.script.borrow_mut().remove(&state);
        if let (Some(answer), Some(user)) = (answer, self.user.borrow().as_ref()) {
            user.publish(answer);
        }
    }

    fn navigate(&self, url: &Url) {
        self.navigations.borrow_mut().push(url.clone());
    }
}

/// A primary authority that takes until the test tells it to answer.
struct SlowProvisioner {
    answer: RefCell<Option<oneshot::Receiver<Result<Certificate, ProvisionError>>>>,
}

#[async_trait(?Send)]
impl Provisioner for SlowProvisioner {
    async fn provision(
        &self,
        _email: &str,
        _authority: &PrimaryAuthority,
        _public_key: &PublicKey,
    ) -> Result<Certificate, ProvisionError> {
        let answer = self.answer.borrow_mut().take();
        match answer {
            Some(answer) => answer.await.unwrap_or(Err(ProvisionError::Unreachable)),
            None => Err(ProvisionError::Unreachable),
        }
    }
}

/// A fallback authority that never answers a sign in.
struct Unresponsive;

#[async_trait(?Send)]
impl PasswordAuth for Unresponsive {
    async fn is_authenticated(&self) -> Result<bool, ServiceError> {
        Ok(false)
    }

    async fn authenticate(
        &self,
        _email: &str,
        _password: &Password,
    ) -> Result<SessionToken, AuthFailure> {
        std::future::pending().await
    }

    async fn stage_user(&self, _email: &str, _password: &Password) -> Result<(), ServiceError> {
        Err(ServiceError("not expected".into()))
    }

    async fn password_needed_to_add_email(&self) -> Result<bool, ServiceError> {
        Err(ServiceError("not expected".into()))
    }

    async fn stage_email(
        &self,
        _email: &str,
        _password: Option<Password>,
    ) -> Result<(), ServiceError> {
        Err(ServiceError("not expected".into()))
    }

    async fn stage_reset_password(
        &self,
        _email: &str,
        _password: &Password,
    ) -> Result<(), ServiceError> {
        Err(ServiceError("not expected".into()))
    }

    async fn prolong_session(&self) -> Result<(), ServiceError> {
        Err(ServiceError("not expected".into()))
    }
}

fn platform(should_ask: bool) -> MockPlatform {
    let mut platform = MockPlatform::new();
    platform.expect_check_support().returning(|| Ok(()));
    platform
        .expect_should_ask_if_users_computer()
        .returning(move || should_ask);
    platform
}

/// The fallback authority already has a session.
fn signed_in() -> MockPasswordAuth {
    let mut password_auth = MockPasswordAuth::new();
    password_auth
        .expect_is_authenticated()
        .returning(|| Ok(true));
    password_auth
}

struct Fixture {
    directory: MockDirectory,
    password_auth: MockPasswordAuth,
    accounts: Option<Rc<dyn PasswordAuth>>,
    platform: MockPlatform,
    provisioner: Rc<dyn Provisioner>,
    fallback: Rc<AssertionAuthority>,
    idp: Arc<AssertionAuthority>,
    identities: Rc<MemoryStore>,
    screens: Rc<Recorder>,
}

impl Fixture {
    fn new() -> Self {
        let mut password_auth = MockPasswordAuth::new();
        password_auth
            .expect_is_authenticated()
            .returning(|| Ok(false));

        Self {
            directory: MockDirectory::new(),
            password_auth,
            accounts: None,
            platform: platform(false),
            provisioner: Rc::new(MockProvisioner::new()),
            fallback: Rc::new(AssertionAuthority::new(FALLBACK, KeyPair::generate())),
            idp: Arc::new(AssertionAuthority::new(IDP, KeyPair::generate())),
            identities: Rc::new(MemoryStore::default()),
            screens: Rc::new(Recorder::default()),
        }
    }

    fn remember(self, email: &str) -> Self {
        self.identities
            .set_known_identity(email, KnownIdentity::new(Utc::now()));
        self
    }

    fn secondary_directory(mut self) -> Self {
        self.directory
            .expect_address_info()
            .returning(|email| Ok(AddressInfo::secondary(email.to_owned(), FALLBACK.into())));
        self
    }

    fn primary_info(&self) -> AddressInfo {
        AddressInfo::primary(
            PRIMARY.into(),
            IDP.into(),
            PrimaryAuthority {
                authentication: Url::parse("https://primary.example/sign_in").unwrap(),
                provisioning: Url::parse("https://primary.example/provision").unwrap(),
                public_key: self.idp.public_key(),
            },
        )
    }

    /// The primary authority signs in and certifies after `refusals` demands to sign in first.
    fn provisioning_primary(mut self, refusals: usize) -> Self {
        let idp = self.idp.clone();
        let mut calls = 0;
        let mut provisioner = MockProvisioner::new();
        provisioner
            .expect_provision()
            .returning(move |email, _authority, public_key| {
                calls += 1;
                if calls <= refusals {
                    return Err(ProvisionError::NotAuthenticated);
                }
                idp.mint_certificate(email, public_key, Duration::hours(1))
                    .map_err(|error| ProvisionError::Failed(error.to_string()))
            });
        self.provisioner = Rc::new(provisioner);
        self
    }

    fn machine(self) -> (StateMachine, Observed) {
        let observed = Observed {
            fallback: self.fallback.clone(),
            idp: self.idp.clone(),
            identities: self.identities.clone(),
            screens: self.screens.clone(),
        };
        let machine = StateMachine::new(Collaborators {
            directory: Rc::new(self.directory),
            password_auth: self
                .accounts
                .unwrap_or_else(|| Rc::new(self.password_auth)),
            provisioner: self.provisioner,
            certifier: self.fallback,
            identities: self.identities,
            screens: self.screens.clone(),
            platform: Rc::new(self.platform),
        });
        *self.screens.user.borrow_mut() = Some(machine.sender());
        (machine, observed)
    }
}

struct Observed {
    fallback: Rc<AssertionAuthority>,
    idp: Arc<AssertionAuthority>,
    identities: Rc<MemoryStore>,
    screens: Rc<Recorder>,
}

impl Observed {
    /// The assertion handed to the relying party, verified against `issuer`.
    fn verified_email(&self, issuer: &str, key: PublicKey) -> String {
        let (state, options) = self.screens.last().expect("nothing was rendered");
        assert_eq!(state, State::Complete);
        let bundle = options.get_str("assertion").expect("no assertion");
        let roots = TrustedRoots::new().with(issuer, key);
        AssertionAuthority::verify_chain(bundle, &roots, RP, Utc::now())
            .expect("the assertion does not verify")
            .email
    }
}

fn start() -> Message {
    Message::Start {
        origin: RP.into(),
        email: None,
    }
}

fn user_verified(password: &str) -> Message {
    Message::UserVerified {
        email: SECONDARY.into(),
        password: Password::new(password),
    }
}

/// Start a dialog for a returning secondary user and stop at the password prompt.
async fn at_password_prompt(fixture: Fixture) -> (StateMachine, Observed) {
    let (mut machine, observed) = fixture.remember(SECONDARY).secondary_directory().machine();
    machine.publish(start());
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::PickEmail));

    machine.publish(Message::EmailChosen {
        email: SECONDARY.into(),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::Authenticate));
    (machine, observed)
}

#[tokio::test]
async fn returning_secondary_user_signs_in_and_completes() {
    let mut fixture = Fixture::new();
    fixture
        .password_auth
        .expect_authenticate()
        .withf(|email, password| email == SECONDARY && password.expose() == "hunter2")
        .times(1)
        .returning(|_, _| Ok(SessionToken("session".into())));
    let (mut machine, observed) = at_password_prompt(fixture).await;

    let names = Rc::new(RefCell::new(Vec::new()));
    let seen = names.clone();
    machine.subscribe(move |message| seen.borrow_mut().push(message.name()));

    machine.publish(user_verified("hunter2"));
    machine.settle().await;

    assert_eq!(machine.state(), Some(State::Complete));
    assert_eq!(
        *names.borrow(),
        [
            "user_verified",
            "authenticated",
            "email_valid_and_ready",
            "generate_assertion",
            "assertion_generated",
        ]
    );
    assert_eq!(
        observed.verified_email(FALLBACK, observed.fallback.public_key()),
        SECONDARY
    );
    let identity = observed.identities.known_identity(SECONDARY).unwrap();
    assert!(identity.certified_key(Utc::now()).is_some());
    assert_eq!(identity.issuer, None);
}

#[tokio::test]
async fn a_wrong_password_shows_the_prompt_again() {
    let mut fixture = Fixture::new();
    fixture
        .password_auth
        .expect_authenticate()
        .returning(|_, _| Err(AuthFailure::InvalidCredentials));
    let (mut machine, observed) = at_password_prompt(fixture).await;

    machine.publish(user_verified("hunter3"));
    machine.settle().await;

    assert_eq!(machine.state(), Some(State::Authenticate));
    let (state, options) = observed.screens.last().unwrap();
    assert_eq!(state, State::Authenticate);
    assert_eq!(options.get_str("email"), Some(SECONDARY));
    assert_eq!(options.get_str("error"), Some("invalid_credentials"));
}

#[tokio::test]
async fn cancel_state_goes_back_exactly_one_step() {
    let (mut machine, observed) = at_password_prompt(Fixture::new()).await;
    assert_eq!(machine.history().len(), 1);

    machine.publish(Message::CancelState);

    assert_eq!(machine.state(), Some(State::PickEmail));
    assert!(machine.history().is_empty());
    assert_eq!(
        observed.screens.states(),
        [State::PickEmail, State::Authenticate, State::PickEmail]
    );

    machine.publish(Message::CancelState);
    assert_eq!(machine.state(), Some(State::PickEmail));
    assert_eq!(observed.screens.states().len(), 3);
}

#[tokio::test]
async fn going_back_forgets_what_was_learned_since() {
    let (mut machine, _observed) = at_password_prompt(Fixture::new()).await;
    machine.publish(Message::CancelState);

    // The address was forgotten with the step, there is nothing to retry.
    machine.publish(Message::RetryPrimary);
    assert_eq!(machine.state(), Some(State::PickEmail));
}

#[tokio::test(start_paused = true)]
async fn cancel_while_provisioning_drops_the_late_certificate() {
    let (answer, pending) = oneshot::channel();
    let mut fixture = Fixture::new();
    fixture.provisioner = Rc::new(SlowProvisioner {
        answer: RefCell::new(Some(pending)),
    });
    let info = fixture.primary_info();
    fixture
        .directory
        .expect_address_info()
        .returning(move |_| Ok(info.clone()));
    fixture
        .directory
        .expect_invalidate()
        .withf(|email| email == PRIMARY)
        .times(1)
        .return_const(());
    let idp = fixture.idp.clone();
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::AddEmail));
    machine.publish(Message::UserSubmittedEmail {
        email: PRIMARY.into(),
    });
    let waited = tokio::time::timeout(StdDuration::from_secs(5), machine.settle()).await;
    assert!(waited.is_err());
    assert_eq!(machine.state(), Some(State::ProvisionPrimary));
    assert!(machine.is_busy());

    machine.publish(Message::Cancel);
    assert_eq!(machine.state(), Some(State::Cancel));
    assert!(!machine.is_busy());

    let certificate = idp
        .mint_certificate(PRIMARY, &KeyPair::generate().public_key(), Duration::hours(1))
        .unwrap();
    assert!(answer.send(Ok(certificate)).is_err());
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::Cancel));
    assert!(observed.identities.known_identity(PRIMARY).is_none());
}

#[tokio::test]
async fn stale_replies_are_discarded() {
    let (mut machine, _observed) = at_password_prompt(Fixture::new()).await;
    let sender = machine.sender();
    let asked = machine.generation();

    machine.publish(Message::CancelState);
    assert_ne!(machine.generation(), asked);

    sender.reply(
        asked,
        Message::Authenticated {
            email: SECONDARY.into(),
        },
    );
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::PickEmail));

    sender.reply(machine.generation(), Message::AddEmail);
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::AddEmail));
}

#[tokio::test]
async fn unreachable_primary_is_retried_on_request() {
    let mut fixture = Fixture::new().provisioning_primary(0);
    let info = fixture.primary_info();
    let mut lookups = 0;
    fixture
        .directory
        .expect_address_info()
        .times(2)
        .returning(move |email| {
            lookups += 1;
            if lookups == 1 {
                Ok(AddressInfo::offline(email.to_owned(), AddressType::Primary, IDP.into()))
            } else {
                Ok(info.clone())
            }
        });
    fixture
        .directory
        .expect_invalidate()
        .withf(|email| email == PRIMARY)
        .times(1)
        .return_const(());
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::UserSubmittedEmail {
        email: PRIMARY.into(),
    });
    machine.settle().await;

    assert_eq!(machine.state(), Some(State::PrimaryOffline));
    let (_, options) = observed.screens.last().unwrap();
    assert_eq!(options.get_str("idp"), Some(IDP));

    machine.publish(Message::RetryPrimary);
    machine.settle().await;

    assert_eq!(machine.state(), Some(State::Complete));
    assert_eq!(observed.verified_email(IDP, observed.idp.public_key()), PRIMARY);
    let identity = observed.identities.known_identity(PRIMARY).unwrap();
    assert_eq!(identity.issuer.as_deref(), Some(IDP));
}

#[tokio::test]
async fn primary_without_a_session_signs_in_with_its_authority() {
    let mut fixture = Fixture::new().provisioning_primary(1);
    let info = fixture.primary_info();
    fixture
        .directory
        .expect_address_info()
        .returning(move |_| Ok(info.clone()));
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::UserSubmittedEmail {
        email: PRIMARY.into(),
    });
    machine.settle().await;

    assert_eq!(machine.state(), Some(State::RedirectToAuthority));
    let (_, options) = observed.screens.last().unwrap();
    assert_eq!(options.get_str("url"), Some("https://primary.example/sign_in"));

    machine.publish(Message::PrimaryUserAuthenticating);
    assert_eq!(
        *observed.screens.navigations.borrow(),
        [Url::parse("https://primary.example/sign_in").unwrap()]
    );

    machine.publish(Message::PrimaryUserAuthenticated {
        email: PRIMARY.into(),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::Complete));
    assert_eq!(observed.verified_email(IDP, observed.idp.public_key()), PRIMARY);
}

#[tokio::test]
async fn known_primary_with_a_valid_certificate_skips_provisioning() {
    let mut fixture = Fixture::new();
    let info = fixture.primary_info();
    let key_pair = KeyPair::generate();
    let certificate = fixture
        .idp
        .mint_certificate(PRIMARY, &key_pair.public_key(), Duration::hours(1))
        .unwrap();
    let mut identity = KnownIdentity::new(Utc::now());
    identity.issuer = Some(IDP.into());
    identity.key_pair = Some(key_pair);
    identity.certificate = Some(certificate);
    fixture.identities.set_known_identity(PRIMARY, identity);
    fixture
        .directory
        .expect_address_info()
        .returning(move |_| Ok(info.clone()));
    // The default provisioner mock has no expectations and would panic if asked.
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::EmailChosen {
        email: PRIMARY.into(),
    });
    machine.settle().await;

    assert_eq!(machine.state(), Some(State::Complete));
    assert_eq!(observed.verified_email(IDP, observed.idp.public_key()), PRIMARY);
}

#[tokio::test]
async fn new_secondary_user_registers_and_confirms() {
    let mut fixture = Fixture::new().secondary_directory();
    fixture
        .password_auth
        .expect_stage_user()
        .withf(|email, password| email == SECONDARY && password.expose() == "correct horse")
        .times(1)
        .returning(|_, _| Ok(()));
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::AddEmail));

    machine.publish(Message::UserSubmittedEmail {
        email: SECONDARY.into(),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::SetPassword));

    machine.publish(Message::PasswordSet {
        email: SECONDARY.into(),
        password: Password::new("correct horse"),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::ConfirmEmail));

    machine.publish(Message::EmailConfirmed {
        email: SECONDARY.into(),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::Complete));
    assert_eq!(
        observed.verified_email(FALLBACK, observed.fallback.public_key()),
        SECONDARY
    );
}

#[tokio::test]
async fn untrustworthy_authority_ends_on_the_error_screen() {
    let mut fixture = Fixture::new().remember(PRIMARY);
    fixture.directory.expect_address_info().returning(|_| {
        Err(AddressInfoError::Resolve(ResolveError::InvalidDomain(
            "evil..example".into(),
        )))
    });
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::EmailChosen {
        email: PRIMARY.into(),
    });
    machine.settle().await;

    assert_eq!(machine.state(), Some(State::Error));
    let (_, options) = observed.screens.last().unwrap();
    assert_eq!(
        options.get_str("kind"),
        Some(ErrorKind::Provisioning.to_string().as_str())
    );

    machine.publish(Message::ErrorAcknowledged);
    assert_eq!(machine.state(), Some(State::PickEmail));
}

#[tokio::test]
async fn unsupported_browsers_stop_right_away() {
    let mut fixture = Fixture::new();
    fixture.platform = MockPlatform::new();
    fixture.platform.expect_check_support().returning(|| {
        Err(Unsupported {
            reason: "cookies are disabled".into(),
        })
    });
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;

    assert_eq!(machine.state(), Some(State::UnsupportedBrowser));
    let (_, options) = observed.screens.last().unwrap();
    assert_eq!(options.get_str("reason"), Some("cookies are disabled"));
}

#[tokio::test]
async fn nothing_happens_after_the_dialog_completed() {
    let mut fixture = Fixture::new();
    fixture.password_auth = MockPasswordAuth::new();
    fixture
        .password_auth
        .expect_is_authenticated()
        .returning(|| Ok(true));
    let (mut machine, observed) = fixture.remember(SECONDARY).secondary_directory().machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::EmailChosen {
        email: SECONDARY.into(),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::Complete));

    machine.publish(Message::Cancel);
    machine.publish(Message::CancelState);
    assert_eq!(machine.state(), Some(State::Complete));
    assert_eq!(
        observed.verified_email(FALLBACK, observed.fallback.public_key()),
        SECONDARY
    );
}

#[tokio::test]
async fn run_follows_the_user_until_the_dialog_ends() {
    let mut fixture = Fixture::new().remember(SECONDARY).secondary_directory();
    fixture
        .password_auth
        .expect_authenticate()
        .returning(|_, _| Ok(SessionToken("session".into())));
    let (mut machine, observed) = fixture.machine();
    observed.screens.answer(
        State::PickEmail,
        Message::EmailChosen {
            email: SECONDARY.into(),
        },
    );
    observed
        .screens
        .answer(State::Authenticate, user_verified("hunter2"));

    machine.sender().publish(start());
    let ended = machine.run().await;

    assert_eq!(ended, Some(State::Complete));
    assert_eq!(
        observed.verified_email(FALLBACK, observed.fallback.public_key()),
        SECONDARY
    );
}

#[tokio::test]
async fn returning_from_the_authority_resumes_with_the_primary_address() {
    let mut fixture = Fixture::new().provisioning_primary(0);
    let info = fixture.primary_info();
    fixture
        .directory
        .expect_address_info()
        .returning(move |_| Ok(info.clone()));
    let (mut machine, observed) = fixture.machine();

    machine.publish(Message::Start {
        origin: RP.into(),
        email: Some(PRIMARY.into()),
    });
    machine.settle().await;

    assert_eq!(machine.state(), Some(State::Complete));
    assert_eq!(observed.screens.states(), [State::Complete]);
}

#[tokio::test(start_paused = true)]
async fn silent_primary_authority_is_offline() {
    let (_answer, pending) = oneshot::channel();
    let mut fixture = Fixture::new();
    fixture.provisioner = Rc::new(SlowProvisioner {
        answer: RefCell::new(Some(pending)),
    });
    let info = fixture.primary_info();
    fixture
        .directory
        .expect_address_info()
        .returning(move |_| Ok(info.clone()));
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::UserSubmittedEmail {
        email: PRIMARY.into(),
    });
    let asked = Instant::now();
    machine.settle().await;

    assert!(asked.elapsed() >= DEFAULT_REQUEST_TIMEOUT);
    assert_eq!(machine.state(), Some(State::PrimaryOffline));
    assert!(!machine.is_busy());
    let (_, options) = observed.screens.last().unwrap();
    assert_eq!(options.get_str("email"), Some(PRIMARY));
    assert_eq!(options.get_str("idp"), Some(IDP));
}

#[tokio::test(start_paused = true)]
async fn silent_fallback_authority_is_a_network_error() {
    let mut fixture = Fixture::new().remember(SECONDARY).secondary_directory();
    fixture.accounts = Some(Rc::new(Unresponsive));
    let (machine, observed) = fixture.machine();
    let mut machine = machine.request_timeout(StdDuration::from_secs(5));

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::EmailChosen {
        email: SECONDARY.into(),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::Authenticate));

    machine.publish(user_verified("hunter2"));
    let asked = Instant::now();
    machine.settle().await;

    assert!(asked.elapsed() >= StdDuration::from_secs(5));
    assert!(asked.elapsed() < DEFAULT_REQUEST_TIMEOUT);
    assert_eq!(machine.state(), Some(State::Error));
    let (_, options) = observed.screens.last().unwrap();
    assert_eq!(
        options.get_str("kind"),
        Some(ErrorKind::Network.to_string().as_str())
    );
}

#[tokio::test]
async fn a_password_error_is_not_shown_again_when_coming_back() {
    let mut fixture = Fixture::new();
    fixture
        .password_auth
        .expect_authenticate()
        .returning(|_, _| Err(AuthFailure::InvalidCredentials));
    let (mut machine, observed) = at_password_prompt(fixture).await;

    machine.publish(user_verified("hunter3"));
    machine.settle().await;
    let (_, options) = observed.screens.last().unwrap();
    assert_eq!(options.get_str("error"), Some("invalid_credentials"));

    machine.publish(Message::ForgotPassword {
        email: SECONDARY.into(),
    });
    assert_eq!(machine.state(), Some(State::SetPassword));
    machine.publish(Message::CancelState);

    let (state, options) = observed.screens.last().unwrap();
    assert_eq!(state, State::Authenticate);
    assert_eq!(options.get_str("email"), Some(SECONDARY));
    assert_eq!(options.get("error"), None);
}

#[tokio::test]
async fn forgotten_password_is_reset_before_signing() {
    let mut fixture = Fixture::new();
    fixture
        .password_auth
        .expect_stage_reset_password()
        .withf(|email, password| email == SECONDARY && password.expose() == "new horse")
        .times(1)
        .returning(|_, _| Ok(()));
    let (mut machine, observed) = at_password_prompt(fixture).await;

    machine.publish(Message::ForgotPassword {
        email: SECONDARY.into(),
    });
    let (state, options) = observed.screens.last().unwrap();
    assert_eq!(state, State::SetPassword);
    assert_eq!(options.get_str("purpose"), Some("reset_password"));

    machine.publish(Message::PasswordSet {
        email: SECONDARY.into(),
        password: Password::new("new horse"),
    });
    machine.settle().await;
    let (state, options) = observed.screens.last().unwrap();
    assert_eq!(state, State::ConfirmEmail);
    assert_eq!(options.get_str("purpose"), Some("reset_password"));

    machine.publish(Message::ResetPasswordConfirmed {
        email: SECONDARY.into(),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::Complete));
    assert_eq!(
        observed.verified_email(FALLBACK, observed.fallback.public_key()),
        SECONDARY
    );
}

#[tokio::test]
async fn primary_addresses_have_no_password_to_reset() {
    let mut fixture = Fixture::new().provisioning_primary(1);
    let info = fixture.primary_info();
    fixture
        .directory
        .expect_address_info()
        .returning(move |_| Ok(info.clone()));
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::UserSubmittedEmail {
        email: PRIMARY.into(),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::RedirectToAuthority));

    machine.publish(Message::ForgotPassword {
        email: PRIMARY.into(),
    });
    assert_eq!(machine.state(), Some(State::Error));
    let (_, options) = observed.screens.last().unwrap();
    assert_eq!(
        options.get_str("kind"),
        Some(ErrorKind::InvalidEmail.to_string().as_str())
    );
}

#[tokio::test]
async fn signed_in_user_adds_a_secondary_address_to_their_account() {
    let mut fixture = Fixture::new().secondary_directory();
    fixture.password_auth = signed_in();
    fixture
        .password_auth
        .expect_password_needed_to_add_email()
        .times(1)
        .returning(|| Ok(false));
    fixture
        .password_auth
        .expect_stage_email()
        .withf(|email, password| email == SECONDARY && password.is_none())
        .times(1)
        .returning(|_, _| Ok(()));
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::AddEmail));
    machine.publish(Message::UserSubmittedEmail {
        email: SECONDARY.into(),
    });
    machine.settle().await;

    let (state, options) = observed.screens.last().unwrap();
    assert_eq!(state, State::ConfirmEmail);
    assert_eq!(options.get_str("purpose"), Some("add_email"));
    assert!(!observed.screens.states().contains(&State::SetPassword));

    machine.publish(Message::EmailConfirmed {
        email: SECONDARY.into(),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::Complete));
}

#[tokio::test]
async fn account_without_a_password_chooses_one_to_add_a_secondary_address() {
    let mut fixture = Fixture::new().secondary_directory();
    fixture.password_auth = signed_in();
    fixture
        .password_auth
        .expect_password_needed_to_add_email()
        .times(1)
        .returning(|| Ok(true));
    fixture
        .password_auth
        .expect_stage_email()
        .withf(|email, password| {
            email == SECONDARY && password.as_ref().map(Password::expose) == Some("correct horse")
        })
        .times(1)
        .returning(|_, _| Ok(()));
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::UserSubmittedEmail {
        email: SECONDARY.into(),
    });
    machine.settle().await;
    let (state, options) = observed.screens.last().unwrap();
    assert_eq!(state, State::SetPassword);
    assert_eq!(options.get_str("purpose"), Some("add_email"));

    machine.publish(Message::PasswordSet {
        email: SECONDARY.into(),
        password: Password::new("correct horse"),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::ConfirmEmail));
}

#[tokio::test]
async fn owners_of_the_computer_keep_their_session() {
    let mut fixture = Fixture::new().remember(SECONDARY).secondary_directory();
    fixture.password_auth = signed_in();
    fixture
        .password_auth
        .expect_prolong_session()
        .times(1)
        .returning(|| Ok(()));
    fixture.platform = platform(true);
    fixture
        .platform
        .expect_set_users_computer()
        .withf(|users_computer| *users_computer)
        .times(1)
        .return_const(());
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::EmailChosen {
        email: SECONDARY.into(),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::IsThisYourComputer));

    machine.publish(Message::UserComputerStatusSet {
        users_computer: true,
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::Complete));
    assert_eq!(
        observed.verified_email(FALLBACK, observed.fallback.public_key()),
        SECONDARY
    );
}

#[tokio::test]
async fn shared_computers_forget_the_address() {
    let mut fixture = Fixture::new().remember(SECONDARY).secondary_directory();
    fixture.password_auth = signed_in();
    fixture.platform = platform(true);
    fixture
        .platform
        .expect_set_users_computer()
        .withf(|users_computer| !*users_computer)
        .times(1)
        .return_const(());
    fixture
        .directory
        .expect_invalidate()
        .withf(|email| email == SECONDARY)
        .times(1)
        .return_const(());
    let (mut machine, _observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::EmailChosen {
        email: SECONDARY.into(),
    });
    machine.settle().await;
    machine.publish(Message::UserComputerStatusSet {
        users_computer: false,
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::Complete));
}

#[tokio::test]
async fn new_users_are_not_asked_about_their_computer() {
    let mut fixture = Fixture::new().secondary_directory();
    fixture.platform = platform(true);
    fixture
        .password_auth
        .expect_stage_user()
        .returning(|_, _| Ok(()));
    let (mut machine, observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::UserSubmittedEmail {
        email: SECONDARY.into(),
    });
    machine.settle().await;
    machine.publish(Message::PasswordSet {
        email: SECONDARY.into(),
        password: Password::new("correct horse"),
    });
    machine.settle().await;
    machine.publish(Message::EmailConfirmed {
        email: SECONDARY.into(),
    });
    machine.settle().await;

    assert_eq!(machine.state(), Some(State::Complete));
    assert!(!observed.screens.states().contains(&State::IsThisYourComputer));
}

#[tokio::test]
async fn acknowledging_an_error_without_known_addresses_asks_for_one() {
    let mut fixture = Fixture::new();
    fixture
        .directory
        .expect_address_info()
        .returning(|_| Err(AddressInfoError::InvalidEmail));
    let (mut machine, _observed) = fixture.machine();

    machine.publish(start());
    machine.settle().await;
    machine.publish(Message::UserSubmittedEmail {
        email: "nobody".into(),
    });
    machine.settle().await;
    assert_eq!(machine.state(), Some(State::Error));

    machine.publish(Message::ErrorAcknowledged);
    assert_eq!(machine.state(), Some(State::AddEmail));
}
