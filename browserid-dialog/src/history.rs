use serde_json::{Map, Value};

use crate::{machine::FlowContext, State};


/// The named parameters a state is entered with. Screens render from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options(Map<String, Value>);

impl Options {
    /// No options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    /// The value of `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The value of `key`, when it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Copy every option of `other` into these, replacing values that are already set.
    pub fn extend(&mut self, other: Options) {
        self.0.extend(other.0);
    }

    pub(crate) fn email(email: &str) -> Self {
        Options::new().with("email", email)
    }
}

impl From<Map<String, Value>> for Options {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A state together with what it needs to be entered again.
#[derive(Debug, Clone)]
pub struct Command {
    state: State,
    options: Options,
    save: bool,
    snapshot: FlowContext,
}

impl Command {
    /// The state this command enters.
    pub fn state(&self) -> State {
        self.state
    }

    /// The options the state is entered with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Is this command kept on the stack once another command supersedes it?
    pub fn is_saved(&self) -> bool {
        self.save
    }

    pub(crate) fn snapshot(&self) -> &FlowContext {
        &self.snapshot
    }
}

/// The commands a dialog went through, so the user can go back.
///
/// The current command lives outside of the stack. When a new command is created the current one
/// is pushed, unless it was created with `save` unset; such commands are dry runs that are
/// forgotten as soon as something else happens.
#[derive(Debug, Default)]
pub struct History {
    stack: Vec<Command>,
    current: Option<Command>,
}

impl History {
    /// An empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new current command.
    pub(crate) fn create_state(
        &mut self,
        state: State,
        options: Options,
        save: bool,
        snapshot: FlowContext,
    ) -> &Command {
        let command = Command {
            state,
            options,
            save,
            snapshot,
        };
        if let Some(previous) = self.current.take().filter(|previous| previous.save) {
            self.stack.push(previous);
        }
        self.current.insert(command)
    }

    /// Push the current command right away, instead of when it is superseded.
    ///
    /// The current command stays current, it will not be pushed a second time.
    pub fn save_state(&mut self) {
        if let Some(current) = self.current.as_mut().filter(|current| current.save) {
            self.stack.push(current.clone());
            current.save = false;
        }
    }

    /// Make the most recently saved command current again, discarding the current one.
    ///
    /// Returns `None`, leaving the current command in place, when there is nothing to go back to.
    pub fn pop_state(&mut self) -> Option<&Command> {
        let top = self.stack.pop()?;
        self.current = Some(top);
        self.current.as_ref()
    }

    /// The most recently saved command.
    pub fn top(&self) -> Option<&Command> {
        self.stack.last()
    }

    /// The current command.
    pub fn current(&self) -> Option<&Command> {
        self.current.as_ref()
    }

    /// Number of saved commands.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Is there nothing to go back to?
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Add `options` to the current command, so re-entering it sees them.
    pub fn extend_current(&mut self, options: Options) {
        if let Some(current) = self.current.as_mut() {
            current.options.extend(options);
        }
    }

    /// Add `options` to the most recently saved command.
    pub fn extend_top(&mut self, options: Options) {
        if let Some(top) = self.stack.last_mut() {
            top.options.extend(options);
        }
    }
}
