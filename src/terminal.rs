//! Text front end: renders activities to a writer, reads commands and
//! credential prompts from a reader, and drives launches through the core
//! launcher.

use crate::config::AppConfig;
use crate::messages;
use anyhow::{Context, Result, anyhow, bail};
use bookmate_core::{
    ActivityHandle, ActivityHost, ActivityKind, ActivityLauncher, AppContext, Background,
    ChangeEvent, CredentialRequest, Credentials, Database, DatabaseError, DatabaseMeta,
    LaunchFailure, LaunchMode, LaunchOutcome, MetaAction, OpenOptions, ProviderRegistry, Record,
    RecordId, RecordKind, UiLoop,
};
use std::collections::HashMap;
use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

/// Resolves a command-line style data-source argument.
///
/// `bookmate.secure:/path/lib.json` selects a provider explicitly; anything
/// else goes to `default_provider`. A prefix only counts when it names a
/// registered provider, so `C:\lib.json` or `file:///lib.json` are left alone.
pub fn resolve_argument(
    registry: &ProviderRegistry,
    default_provider: &str,
    argument: &str,
) -> Result<DatabaseMeta, DatabaseError> {
    if let Some((prefix, rest)) = argument.split_once(':') {
        if registry.get(prefix).is_some() {
            return registry.meta_for(prefix, rest);
        }
    }
    registry.meta_for(default_provider, argument)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Add(RecordKind, String),
    Remove(RecordId),
    Open(String),
    Forget(String),
    Reveal,
    Login,
    Databases,
    Close,
    AutoLogin(bool),
    Quit,
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let command = match word {
        "help" | "?" => Command::Help,
        "list" | "ls" => Command::List,
        "add" => {
            let (kind, title) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("Usage: add book|magazine <title>"))?;
            let kind = match kind {
                "book" => RecordKind::Book,
                "magazine" => RecordKind::Magazine,
                other => bail!("Unknown record kind `{other}`; use book or magazine"),
            };
            let title = title.trim();
            if title.is_empty() {
                bail!("Usage: add book|magazine <title>");
            }
            Command::Add(kind, title.to_string())
        }
        "remove" | "rm" => {
            let id = rest
                .trim_start_matches('#')
                .parse::<RecordId>()
                .map_err(|_| anyhow!("Usage: remove <id>"))?;
            Command::Remove(id)
        }
        "open" => {
            if rest.is_empty() {
                bail!("Usage: open <path>");
            }
            Command::Open(rest.to_string())
        }
        "forget" => {
            if rest.is_empty() {
                bail!("Usage: forget <path>");
            }
            Command::Forget(rest.to_string())
        }
        "reveal" => Command::Reveal,
        "login" => Command::Login,
        "databases" | "dbs" => Command::Databases,
        "close" => Command::Close,
        "autologin" => match rest {
            "on" => Command::AutoLogin(true),
            "off" => Command::AutoLogin(false),
            _ => bail!("Usage: autologin on|off"),
        },
        "quit" | "exit" => Command::Quit,
        _ => bail!("{}", messages::text("shell.unknown_command")),
    };
    Ok(Some(command))
}

struct HostState {
    next_id: u64,
    /// Most recently focused first.
    showing: Vec<ActivityHandle>,
    databases: HashMap<u64, Arc<dyn Database>>,
    entered: HashMap<String, Credentials>,
}

/// [`ActivityHost`] over a line-oriented reader and writer.
pub struct TerminalHost {
    context: Arc<AppContext>,
    state: Mutex<HostState>,
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl TerminalHost {
    pub fn new(
        context: Arc<AppContext>,
        input: Box<dyn BufRead + Send>,
        output: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            context,
            state: Mutex::new(HostState {
                next_id: 0,
                showing: Vec::new(),
                databases: HashMap::new(),
                entered: HashMap::new(),
            }),
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }

    pub fn stdio(context: Arc<AppContext>) -> Self {
        Self::new(
            context,
            Box::new(io::BufReader::new(io::stdin())),
            Box::new(io::stdout()),
        )
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn say(&self, line: impl Display) {
        let mut out = self.output.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            warn!("Failed to write to terminal: {err}");
        }
    }

    fn ask(&self, label: impl Display) -> Option<String> {
        {
            let mut out = self.output.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(err) = write!(out, "{label}").and_then(|_| out.flush()) {
                warn!("Failed to write to terminal: {err}");
            }
        }
        self.read_line()
    }

    /// Next input line without its line ending, or `None` at end of input.
    pub fn read_line(&self) -> Option<String> {
        let mut input = self.input.lock().unwrap_or_else(|e| e.into_inner());
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(err) => {
                warn!("Failed to read from terminal: {err}");
                None
            }
        }
    }

    pub fn current(&self) -> Option<ActivityHandle> {
        self.state().showing.first().cloned()
    }

    /// Database behind the focused main activity.
    pub fn current_database(&self) -> Option<Arc<dyn Database>> {
        let state = self.state();
        let activity = state.showing.first()?;
        state.databases.get(&activity.id).cloned()
    }

    pub fn open_databases(&self) -> Vec<Arc<dyn Database>> {
        self.state().databases.values().cloned().collect()
    }

    /// Drops `activity` from the screen and hands back its database, if any.
    pub fn dismiss(&self, activity: &ActivityHandle) -> Option<Arc<dyn Database>> {
        let mut state = self.state();
        state.showing.retain(|a| a.id != activity.id);
        state.databases.remove(&activity.id)
    }

    /// Credentials last typed for `meta`, used when enabling auto-login.
    pub fn entered_credentials(&self, meta: &DatabaseMeta) -> Option<Credentials> {
        self.state().entered.get(meta.url()).cloned()
    }

    /// Prints record changes of `database` while this host is alive.
    pub fn watch(self: &Arc<Self>, database: &Arc<dyn Database>) {
        let host: Weak<TerminalHost> = Arc::downgrade(self);
        database.add_listener(Arc::new(move |event: &ChangeEvent| {
            let Some(host) = host.upgrade() else {
                return;
            };
            match event {
                ChangeEvent::Inserted(record) => host.say(format!("  added {}", describe(record))),
                ChangeEvent::Updated(record) => {
                    host.say(format!("  updated {}", describe(record)))
                }
                ChangeEvent::Removed(id) => host.say(format!("  removed #{id}")),
            }
        }));
    }

    fn push(&self, kind: ActivityKind, meta: Option<DatabaseMeta>) -> ActivityHandle {
        let mut state = self.state();
        state.next_id += 1;
        let activity = ActivityHandle {
            id: state.next_id,
            kind,
            meta,
        };
        state.showing.insert(0, activity.clone());
        activity
    }

    fn render_login(&self, failure: Option<&LaunchFailure>) {
        self.say(format!("== {} ==", messages::text("login.title")));
        if let Some(failure) = failure {
            self.say(messages::text(failure.message_key));
        }
        let (saved, selected) = {
            let login = self.context.login_data();
            (login.saved_databases().to_vec(), login.selected_database_index())
        };
        if saved.is_empty() {
            self.say(messages::text("login.no_saved_databases"));
        }
        for (idx, meta) in saved.iter().enumerate() {
            let marker = if Some(idx) == selected { '>' } else { ' ' };
            self.say(format!("{marker} {} ({})", meta.name(), meta.url()));
        }
        self.say(messages::text("login.hint"));
    }
}

impl ActivityHost for TerminalHost {
    fn showing(&self) -> Vec<ActivityHandle> {
        self.state().showing.clone()
    }

    fn focus(&self, activity: &ActivityHandle) {
        {
            let mut state = self.state();
            let Some(pos) = state.showing.iter().position(|a| a.id == activity.id) else {
                return;
            };
            let focused = state.showing.remove(pos);
            state.showing.insert(0, focused);
        }
        match &activity.meta {
            Some(meta) => self.say(format!("Switched to {}", meta.name())),
            None => self.render_login(None),
        }
    }

    fn show_login(&self, failure: Option<&LaunchFailure>) -> ActivityHandle {
        let existing = self
            .state()
            .showing
            .iter()
            .find(|a| a.kind == ActivityKind::Login)
            .cloned();
        let activity = match existing {
            Some(activity) => {
                let mut state = self.state();
                state.showing.retain(|a| a.id != activity.id);
                state.showing.insert(0, activity.clone());
                activity
            }
            None => self.push(ActivityKind::Login, None),
        };
        self.render_login(failure);
        activity
    }

    fn show_main(&self, database: Arc<dyn Database>) -> ActivityHandle {
        self.state()
            .showing
            .retain(|a| a.kind != ActivityKind::Login);
        let meta = database.meta().clone();
        let activity = self.push(ActivityKind::Main, Some(meta.clone()));
        self.state()
            .databases
            .insert(activity.id, Arc::clone(&database));
        let count = database.records().map(|r| r.len()).unwrap_or_default();
        self.say(format!("== {} == ({count} records)", meta.name()));
        activity
    }

    fn prompt_credentials(&self, request: CredentialRequest<'_>) -> Option<Credentials> {
        let title = if request.quick { "Quick login" } else { "Log in" };
        self.say(format!("{title}: {}", request.meta.name()));
        if let Some(failure) = request.failure {
            self.say(messages::text(failure.message_key));
        }
        self.say("(leave the first field empty to cancel)");
        let mut credentials = Credentials::new();
        for (idx, field) in request.fields.iter().enumerate() {
            let value = self.ask(format!("{}: ", messages::text(&field.label_key)))?;
            if idx == 0 && value.is_empty() {
                debug!(url = %request.meta.url(), "Credential prompt cancelled");
                return None;
            }
            credentials.insert(field.id.clone(), value);
        }
        self.state()
            .entered
            .insert(request.meta.url().to_string(), credentials.clone());
        Some(credentials)
    }

    fn show_error(&self, failure: &LaunchFailure) {
        self.say(format!(
            "error: {} ({})",
            messages::text(failure.message_key),
            failure.detail
        ));
    }
}

fn describe(record: &Record) -> String {
    let mut line = format!("#{} [{}] {}", record.id, record.kind, record.title);
    if !record.authors.is_empty() {
        line.push_str(" by ");
        line.push_str(&record.authors.join(", "));
    }
    line
}

/// Command loop over a [`TerminalHost`].
///
/// Launches run on the background pool; this thread owns the UI queue and
/// blocks on it until the launch result comes back.
pub struct Shell {
    context: Arc<AppContext>,
    host: Arc<TerminalHost>,
    background: Background,
    ui_loop: UiLoop,
    config: AppConfig,
}

impl Shell {
    pub fn new(
        context: Arc<AppContext>,
        host: Arc<TerminalHost>,
        background: Background,
        ui_loop: UiLoop,
        config: AppConfig,
    ) -> Self {
        Self {
            context,
            host,
            background,
            ui_loop,
            config,
        }
    }

    fn open_options(&self) -> OpenOptions {
        OpenOptions {
            create_if_missing: self.config.create_missing_databases,
            read_only: false,
        }
    }

    pub fn launch(
        &mut self,
        mode: LaunchMode,
        argument: Option<DatabaseMeta>,
    ) -> Result<LaunchOutcome> {
        let ui = self.background.ui().clone();
        let host = Arc::clone(&self.host);
        let launcher = ActivityLauncher::new(
            Arc::clone(&self.context),
            self.host.clone(),
            mode,
            argument,
        )
        .open_options(self.open_options())
        .on_launched(move |activity, database| {
            let activity = activity.clone();
            ui.post(move || {
                info!(activity = activity.id, kind = ?activity.kind, "Activity ready");
                if let Some(database) = database {
                    host.watch(&database);
                }
            });
        });

        let delivered = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&delivered);
        self.background.run(
            move || launcher.launch(),
            move |result| {
                *sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
            },
        );
        loop {
            if let Some(result) = delivered.lock().unwrap_or_else(|e| e.into_inner()).take() {
                return result.context("Launch task failed");
            }
            if !self.ui_loop.run_next_blocking() {
                bail!("UI loop closed during launch");
            }
        }
    }

    /// Cold start with the optional command-line argument.
    pub fn start(&mut self, argument: Option<&str>) -> Result<LaunchOutcome> {
        let meta = match argument {
            Some(argument) => match resolve_argument(
                self.context.registry(),
                &self.config.default_provider,
                argument,
            ) {
                Ok(meta) => Some(meta),
                Err(err) => {
                    warn!(%argument, "Ignoring unusable argument: {err}");
                    self.host.show_error(&LaunchFailure::new(None, &err));
                    None
                }
            },
            None => None,
        };
        self.launch(LaunchMode::Initial, meta)
    }

    /// Reads commands until `quit` or end of input.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let label = match self.host.current().and_then(|a| a.meta) {
                Some(meta) => format!("{}> ", meta.name()),
                None => "bookmate> ".to_string(),
            };
            let Some(line) = self.host.ask(label) else {
                debug!("End of input");
                break;
            };
            match parse_command(&line) {
                Ok(None) => continue,
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.execute(command)?,
                Err(err) => self.host.say(err),
            }
            self.ui_loop.drain();
            if self.config.auto_persist {
                if let Err(err) = self.context.persist() {
                    warn!("Failed to save preferences: {err}");
                }
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, command: Command) -> Result<()> {
        debug!(?command, "Executing command");
        match command {
            Command::Help => self.help(),
            Command::List => self.with_database(|host, db| {
                let records = db.records()?;
                if records.is_empty() {
                    host.say("(empty)");
                }
                for record in &records {
                    host.say(describe(record));
                }
                Ok(())
            }),
            Command::Add(kind, title) => self.with_database(|_, db| {
                db.insert(Record::new(kind, title))?;
                Ok(())
            }),
            Command::Remove(id) => self.with_database(|_, db| db.remove(id)),
            Command::Open(argument) => {
                match resolve_argument(
                    self.context.registry(),
                    &self.config.default_provider,
                    &argument,
                ) {
                    Ok(meta) => {
                        self.launch(LaunchMode::Internal, Some(meta))?;
                    }
                    Err(err) => self.host.show_error(&LaunchFailure::new(None, &err)),
                }
            }
            Command::Forget(argument) => self.forget(&argument),
            Command::Reveal => self.reveal(),
            Command::Login => {
                self.launch(LaunchMode::Internal, None)?;
            }
            Command::Databases => self.list_databases(),
            Command::Close => self.close_current()?,
            Command::AutoLogin(enabled) => self.set_auto_login(enabled),
            Command::Quit => {}
        }
        Ok(())
    }

    fn with_database(
        &self,
        action: impl FnOnce(&TerminalHost, &dyn Database) -> Result<(), DatabaseError>,
    ) {
        let Some(database) = self.host.current_database() else {
            self.host.say(messages::text("shell.no_database"));
            return;
        };
        if let Err(err) = action(self.host.as_ref(), database.as_ref()) {
            self.host.say(format!("error: {}", messages::text(err.message_key())));
        }
    }

    fn help(&self) {
        for line in [
            "list                        show records in the current database",
            "add book|magazine <title>   add a record",
            "remove <id>                 remove a record",
            "open <path>                 open another database",
            "forget <path>               remove a database from the saved list",
            "reveal                      show the current database file in the file manager",
            "login                       show the login screen",
            "databases                   list saved databases",
            "close                       close the current database",
            "autologin on|off            open the current database at startup",
            "quit                        exit",
        ] {
            self.host.say(line);
        }
    }

    fn forget(&self, argument: &str) {
        let meta = match resolve_argument(
            self.context.registry(),
            &self.config.default_provider,
            argument,
        ) {
            Ok(meta) => meta,
            Err(err) => {
                self.host.show_error(&LaunchFailure::new(None, &err));
                return;
            }
        };
        if self.context.forget_database(&meta) {
            self.host.say(format!("Forgot {}", meta.name()));
        } else {
            self.host.say(format!("{} is not saved", meta.url()));
        }
    }

    fn reveal(&self) {
        let Some(database) = self.host.current_database() else {
            self.host.say(messages::text("shell.no_database"));
            return;
        };
        let meta = database.meta();
        let result = if meta.supports(MetaAction::OpenExternally) {
            self.context
                .registry()
                .provider_for(meta)
                .and_then(|provider| provider.open_externally(meta))
        } else {
            Err(DatabaseError::Unsupported(meta.provider_id().to_string()))
        };
        if let Err(err) = result {
            self.host.show_error(&LaunchFailure::new(Some(meta), &err));
        }
    }

    fn list_databases(&self) {
        let tracker = self.context.tracker();
        let selected = self.context.login_data().selected_database().cloned();
        let saved = tracker.saved_databases();
        if saved.is_empty() {
            self.host.say(messages::text("login.no_saved_databases"));
        }
        for meta in saved {
            let mut line = format!(
                "{}{} {} ({})",
                if selected.as_ref() == Some(&meta) { '>' } else { ' ' },
                if tracker.is_database_used(&meta) { '*' } else { ' ' },
                meta.name(),
                meta.url()
            );
            if let Ok(provider) = self.context.registry().provider_for(&meta) {
                if meta.supports(MetaAction::CheckExists) && !provider.exists(&meta) {
                    line.push_str(" [missing]");
                } else if meta.supports(MetaAction::GetSize) {
                    if let Some(size) = provider.size(&meta) {
                        line.push_str(&format!(" [{size} bytes]"));
                    }
                }
            }
            self.host.say(line);
        }
    }

    fn close_current(&mut self) -> Result<()> {
        let Some(activity) = self.host.current().filter(|a| a.kind == ActivityKind::Main) else {
            self.host.say(messages::text("shell.no_database"));
            return Ok(());
        };
        if let Some(database) = self.host.dismiss(&activity) {
            info!(url = %database.meta().url(), "Closing database");
            self.context.close_database(database.as_ref());
        }
        if self.host.showing().is_empty() {
            self.launch(LaunchMode::Internal, None)?;
        }
        Ok(())
    }

    fn set_auto_login(&self, enabled: bool) {
        let mut login = self.context.login_data();
        if !enabled {
            login.set_auto_login(false);
            login.set_auto_login_credentials(Credentials::new());
            self.host.say("Auto-login disabled");
            return;
        }
        let Some(database) = self.host.current_database() else {
            self.host.say(messages::text("shell.no_database"));
            return;
        };
        let meta = database.meta();
        login.remember(meta);
        if let Err(err) = login.set_selected_database(Some(meta)) {
            self.host.say(format!("error: {err}"));
            return;
        }
        let credentials = self.host.entered_credentials(meta).unwrap_or_default();
        login.set_auto_login_credentials(credentials);
        login.set_auto_login(true);
        self.host
            .say(format!("Auto-login enabled for {}", meta.name()));
    }
}

/// Closes every open database and saves preferences.
pub fn shutdown(context: &AppContext, host: &TerminalHost) {
    for database in host.open_databases() {
        context.close_database(database.as_ref());
    }
    match context.persist() {
        Ok(()) => info!("Saved preferences"),
        Err(err) => warn!("Failed to save preferences on shutdown: {err}"),
    }
}
