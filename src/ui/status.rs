use dialoguer::console::style;

pub enum CommandStatus {
    Success,
    Error,
    Warning,
}

impl CommandStatus {
    pub fn from_success(ok: bool) -> Self {
        if ok {
            CommandStatus::Success
        } else {
            CommandStatus::Error
        }
    }
}

/// Status lines go to stderr so `--json` output on stdout stays parseable.
pub fn print_command_status(status: CommandStatus, message: &str) {
    let indicator = match status {
        CommandStatus::Success => style("✓").green(),
        CommandStatus::Error => style("✗").red(),
        CommandStatus::Warning => style("!").yellow(),
    };
    eprintln!("{indicator} {message}");
}
