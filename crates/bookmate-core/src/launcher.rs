//! Decides which activity to present for a launch request.
//!
//! A launch is described by its [`LaunchMode`] and an optional target data
//! source. Depending on what is already showing, the launcher focuses an
//! existing window, opens the data source and shows its main view, asks for
//! credentials, or falls back to the login entry screen. Every path ends in a
//! visible activity except the two explicit no-ops (external launch with
//! nothing showing, and a dismissed quick login over an existing window).
//!
//! `launch` blocks while the data source is constructed; run it on a worker
//! and marshal the callback back to the UI thread (see `executor`).

use crate::context::AppContext;
use crate::database::Database;
use crate::error::DatabaseError;
use crate::meta::DatabaseMeta;
use crate::provider::{Credentials, DatabaseProvider, LoginField, OpenOptions};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Process cold start.
    Initial,
    /// A second process instance forwarded its argument to this one.
    External,
    /// A UI action inside the running process.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Login,
    Main,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityHandle {
    pub id: u64,
    pub kind: ActivityKind,
    pub meta: Option<DatabaseMeta>,
}

/// A construction failure, reduced to what the UI shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchFailure {
    pub meta: Option<DatabaseMeta>,
    pub message_key: &'static str,
    pub detail: String,
}

impl LaunchFailure {
    pub fn new(meta: Option<&DatabaseMeta>, err: &DatabaseError) -> Self {
        Self {
            meta: meta.cloned(),
            message_key: err.message_key(),
            detail: err.to_string(),
        }
    }
}

pub struct CredentialRequest<'a> {
    pub meta: &'a DatabaseMeta,
    pub fields: &'a [LoginField],
    pub failure: Option<&'a LaunchFailure>,
    /// Lightweight prompt over an existing window rather than a full login screen.
    pub quick: bool,
}

/// The UI surface the launcher drives.
pub trait ActivityHost: Send + Sync {
    /// Activities currently showing, most recently focused first.
    fn showing(&self) -> Vec<ActivityHandle>;

    fn focus(&self, activity: &ActivityHandle);

    fn show_login(&self, failure: Option<&LaunchFailure>) -> ActivityHandle;

    fn show_main(&self, database: Arc<dyn Database>) -> ActivityHandle;

    /// Returns `None` when the user dismissed the prompt.
    fn prompt_credentials(&self, request: CredentialRequest<'_>) -> Option<Credentials>;

    fn show_error(&self, failure: &LaunchFailure);
}

#[derive(Debug)]
pub enum LaunchOutcome {
    Opened {
        activity: ActivityHandle,
        database: Arc<dyn Database>,
    },
    Focused(ActivityHandle),
    Entry {
        activity: ActivityHandle,
        failure: Option<LaunchFailure>,
    },
    /// Error shown over the window that requested the launch.
    Failed(LaunchFailure),
    Cancelled,
    Idle,
}

impl LaunchOutcome {
    pub fn activity(&self) -> Option<&ActivityHandle> {
        match self {
            LaunchOutcome::Opened { activity, .. }
            | LaunchOutcome::Focused(activity)
            | LaunchOutcome::Entry { activity, .. } => Some(activity),
            LaunchOutcome::Failed(_) | LaunchOutcome::Cancelled | LaunchOutcome::Idle => None,
        }
    }
}

pub type OnLaunched = Box<dyn FnOnce(&ActivityHandle, Option<Arc<dyn Database>>) + Send>;

pub struct ActivityLauncher {
    context: Arc<AppContext>,
    host: Arc<dyn ActivityHost>,
    mode: LaunchMode,
    argument: Option<DatabaseMeta>,
    options: OpenOptions,
    on_launched: Option<OnLaunched>,
}

impl ActivityLauncher {
    pub fn new(
        context: Arc<AppContext>,
        host: Arc<dyn ActivityHost>,
        mode: LaunchMode,
        argument: Option<DatabaseMeta>,
    ) -> Self {
        Self {
            context,
            host,
            mode,
            argument,
            options: OpenOptions::default(),
            on_launched: None,
        }
    }

    pub fn open_options(mut self, options: OpenOptions) -> Self {
        self.options = options;
        self
    }

    /// Called once with the resulting activity whenever the launch ends in one.
    pub fn on_launched(
        mut self,
        callback: impl FnOnce(&ActivityHandle, Option<Arc<dyn Database>>) + Send + 'static,
    ) -> Self {
        self.on_launched = Some(Box::new(callback));
        self
    }

    pub fn launch(mut self) -> LaunchOutcome {
        let argument = self.argument.take();
        info!(
            mode = ?self.mode,
            argument = argument.as_ref().map(DatabaseMeta::url),
            "Launching activity"
        );
        let outcome = match (self.mode, argument) {
            (LaunchMode::Initial, Some(meta)) => self.open_with_fallback(meta),
            (LaunchMode::Initial, None) => self.auto_login(),
            (LaunchMode::External, Some(meta)) => match self.focus_main_for(&meta) {
                Some(activity) => LaunchOutcome::Focused(activity),
                None => self.open_with_fallback(meta),
            },
            (LaunchMode::External, None) => self.focus_any(),
            (LaunchMode::Internal, Some(meta)) => match self.focus_main_for(&meta) {
                Some(activity) => LaunchOutcome::Focused(activity),
                None => self.open_with_quick_login(meta),
            },
            (LaunchMode::Internal, None) => self.focus_or_show_login(),
        };
        debug!(outcome = ?outcome, "Launch finished");

        if let Some(callback) = self.on_launched.take() {
            match &outcome {
                LaunchOutcome::Opened { activity, database } => {
                    callback(activity, Some(Arc::clone(database)))
                }
                LaunchOutcome::Focused(activity) | LaunchOutcome::Entry { activity, .. } => {
                    callback(activity, None)
                }
                LaunchOutcome::Failed(_) | LaunchOutcome::Cancelled | LaunchOutcome::Idle => {}
            }
        }
        outcome
    }

    /// Adds `meta` to the tracker and to the login data before any open attempt,
    /// so it shows up as known even when opening fails.
    fn record_known(&self, meta: &DatabaseMeta) {
        self.context.tracker().add_database(meta);
        self.context.login_data().remember(meta);
    }

    fn provider_for(&self, meta: &DatabaseMeta) -> Result<Arc<dyn DatabaseProvider>, DatabaseError> {
        self.context.registry().provider_for(meta)
    }

    fn construct(
        &self,
        provider: &dyn DatabaseProvider,
        meta: &DatabaseMeta,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Database>, DatabaseError> {
        let result = provider.open(meta, credentials, self.options);
        if let Err(err) = &result {
            warn!(
                url = %meta.url(),
                provider = %provider.id(),
                key = err.message_key(),
                "Database construction failed: {err}"
            );
        }
        result
    }

    fn show_opened(&self, database: Arc<dyn Database>) -> LaunchOutcome {
        let meta = database.meta().clone();
        self.context.tracker().on_using(&meta);
        {
            let mut login = self.context.login_data();
            if login.saved_databases().contains(&meta) {
                if let Err(err) = login.set_selected_database(Some(&meta)) {
                    warn!("Could not select opened database: {err}");
                }
            }
        }
        let activity = self.host.show_main(Arc::clone(&database));
        info!(url = %meta.url(), activity = activity.id, "Showing main view");
        LaunchOutcome::Opened { activity, database }
    }

    fn fail_to_entry(&self, failure: LaunchFailure) -> LaunchOutcome {
        self.host.show_error(&failure);
        let activity = self.host.show_login(Some(&failure));
        LaunchOutcome::Entry {
            activity,
            failure: Some(failure),
        }
    }

    fn fail_in_place(&self, failure: LaunchFailure) -> LaunchOutcome {
        self.host.show_error(&failure);
        LaunchOutcome::Failed(failure)
    }

    /// Cold-start style open: try without credentials, ask for them only when
    /// that can help, and land on the login screen if nothing works.
    fn open_with_fallback(&self, meta: DatabaseMeta) -> LaunchOutcome {
        self.record_known(&meta);
        let provider = match self.provider_for(&meta) {
            Ok(provider) => provider,
            Err(err) => return self.fail_to_entry(LaunchFailure::new(Some(&meta), &err)),
        };
        let fields = provider.login_fields();
        let mut credentials = Credentials::new();
        loop {
            let err = match self.construct(provider.as_ref(), &meta, &credentials) {
                Ok(database) => return self.show_opened(database),
                Err(err) => err,
            };
            let failure = LaunchFailure::new(Some(&meta), &err);
            if !err.needs_credentials() {
                return self.fail_to_entry(failure);
            }
            let request = CredentialRequest {
                meta: &meta,
                fields: &fields,
                failure: Some(&failure),
                quick: false,
            };
            match self.host.prompt_credentials(request) {
                Some(entered) => credentials = entered,
                None => return self.fail_to_entry(failure),
            }
        }
    }

    fn auto_login(&self) -> LaunchOutcome {
        let (enabled, selected, credentials) = {
            let login = self.context.login_data();
            (
                login.is_auto_login(),
                login.selected_database().cloned(),
                login.auto_login_credentials().clone(),
            )
        };
        if !enabled {
            return LaunchOutcome::Entry {
                activity: self.host.show_login(None),
                failure: None,
            };
        }
        let Some(meta) = selected else {
            warn!("Auto-login enabled without a selected database");
            return LaunchOutcome::Entry {
                activity: self.host.show_login(None),
                failure: None,
            };
        };
        info!(url = %meta.url(), "Attempting auto-login");
        let opened = self
            .provider_for(&meta)
            .and_then(|provider| self.construct(provider.as_ref(), &meta, &credentials));
        match opened {
            Ok(database) => self.show_opened(database),
            Err(err) => self.fail_to_entry(LaunchFailure::new(Some(&meta), &err)),
        }
    }

    /// In-process open: anonymous providers open directly, everything else
    /// goes through the quick login prompt.
    fn open_with_quick_login(&self, meta: DatabaseMeta) -> LaunchOutcome {
        self.record_known(&meta);
        let provider = match self.provider_for(&meta) {
            Ok(provider) => provider,
            Err(err) => return self.fail_in_place(LaunchFailure::new(Some(&meta), &err)),
        };

        let mut failure = None;
        if provider.supports_anonymous() {
            match self.construct(provider.as_ref(), &meta, &Credentials::new()) {
                Ok(database) => return self.show_opened(database),
                Err(err) if err.needs_credentials() => {
                    failure = Some(LaunchFailure::new(Some(&meta), &err));
                }
                Err(err) => return self.fail_in_place(LaunchFailure::new(Some(&meta), &err)),
            }
        }

        let fields = provider.login_fields();
        loop {
            let request = CredentialRequest {
                meta: &meta,
                fields: &fields,
                failure: failure.as_ref(),
                quick: true,
            };
            let Some(credentials) = self.host.prompt_credentials(request) else {
                debug!(url = %meta.url(), "Quick login dismissed");
                return LaunchOutcome::Cancelled;
            };
            match self.construct(provider.as_ref(), &meta, &credentials) {
                Ok(database) => return self.show_opened(database),
                Err(err) if err.needs_credentials() => {
                    failure = Some(LaunchFailure::new(Some(&meta), &err));
                }
                Err(err) => return self.fail_in_place(LaunchFailure::new(Some(&meta), &err)),
            }
        }
    }

    fn focus_main_for(&self, meta: &DatabaseMeta) -> Option<ActivityHandle> {
        let activity = self
            .host
            .showing()
            .into_iter()
            .find(|activity| activity.kind == ActivityKind::Main && activity.meta.as_ref() == Some(meta))?;
        debug!(url = %meta.url(), activity = activity.id, "Database already open; focusing");
        self.host.focus(&activity);
        Some(activity)
    }

    fn focus_any(&self) -> LaunchOutcome {
        match self.host.showing().into_iter().next() {
            Some(activity) => {
                self.host.focus(&activity);
                LaunchOutcome::Focused(activity)
            }
            None => LaunchOutcome::Idle,
        }
    }

    fn focus_or_show_login(&self) -> LaunchOutcome {
        let login = self
            .host
            .showing()
            .into_iter()
            .find(|activity| activity.kind == ActivityKind::Login);
        match login {
            Some(activity) => {
                self.host.focus(&activity);
                LaunchOutcome::Focused(activity)
            }
            None => LaunchOutcome::Entry {
                activity: self.host.show_login(None),
                failure: None,
            },
        }
    }
}
