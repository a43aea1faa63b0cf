//! English text for the message keys used by the core crate and the shell.

pub fn text(key: &str) -> &str {
    match key {
        "database.error.not_found" => "The database file does not exist.",
        "database.error.locked" => "The database is locked by another process.",
        "database.error.corrupt" => "The database file could not be read.",
        "database.error.unsupported_url" => "This location cannot be opened as a database.",
        "database.error.unknown_provider" => "No provider is installed for this database.",
        "database.error.unsupported_action" => "This database does not support that action.",
        "database.error.closed" => "The database has been closed.",
        "database.error.read_only" => "The database was opened read-only.",
        "database.error.record_not_found" => "No record with that id.",
        "database.error.io" => "The database could not be accessed.",
        "login.error.invalid_credentials" => "Wrong user name or password.",
        "login.error.missing_credentials" => "This database requires a login.",
        "login.field.username" => "User name",
        "login.field.password" => "Password",
        "login.title" => "Log in",
        "login.no_saved_databases" => "No saved databases yet.",
        "login.hint" => "Type `open <path>` to open a database, `help` for all commands.",
        "shell.no_database" => "No database is open.",
        "shell.unknown_command" => "Unknown command. Type `help` for a list.",
        other => other,
    }
}
