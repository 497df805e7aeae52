use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "taskdesk")]
#[command(about = "Command-line client for the taskdesk task tracker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Log in with email and password
    Login {
        /// Email to log in with. Prompted for when omitted
        #[arg(long)]
        email: Option<String>,
    },
    /// End the session and remove stored cookies
    Logout,
    /// Show the logged-in user
    Whoami,
    /// List tasks
    Tasks,
    /// List users
    Users,
    /// Drive the work timer of a task
    Timer {
        #[command(subcommand)]
        action: TimerAction,
    },
    /// Print config path and create default file if missing
    ConfigPath,
}

#[derive(Debug, Subcommand)]
pub enum TimerAction {
    /// Show elapsed time
    Status { task_id: String },
    /// Start or resume counting
    Start { task_id: String },
    /// Stop counting, keeping the time so far
    Pause { task_id: String },
    /// Record the time on the task and reset the timer
    Finish { task_id: String },
    /// Reset the timer without recording anything
    Discard { task_id: String },
    /// Follow a running timer until Ctrl-C
    Watch { task_id: String },
}
