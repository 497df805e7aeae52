use anyhow::{bail, Context, Result};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use taskdesk_client::{
    ClientConfig, DurableStore, FileStore, HttpTransport, LoginCredentials, SessionClient, SessionStatus,
    SystemClock, Task, TaskId, TimerPhase, TimerSnapshot, TimerState, User, WorkTimer,
};
use tracing::debug;

use crate::cli::{Commands, TimerAction};
use crate::session_store;

/// Everything a command needs: config, the shared client and where its
/// cookies live between runs.
pub struct App {
    config: ClientConfig,
    client: Arc<SessionClient<HttpTransport>>,
    session_path: PathBuf,
}

impl App {
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let session_path = ClientConfig::session_path()?;
        let cookies = session_store::load_cookies(&session_path)?;
        let transport = HttpTransport::new(&config, &cookies)
            .with_context(|| format!("Failed to set up client for {}", config.api_url))?;
        debug!(api_url = %config.api_url, cookies = cookies.len(), "Client ready");

        Ok(Self {
            config,
            client: Arc::new(SessionClient::new(transport)),
            session_path,
        })
    }

    /// Write the current cookies back, or drop them once the session is gone.
    pub fn persist_session(&self) -> Result<()> {
        match self.client.status() {
            SessionStatus::LoggedOut => session_store::clear_cookies(&self.session_path),
            SessionStatus::Active => {
                session_store::save_cookies(&self.session_path, &self.client.transport().cookies())
            }
        }
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Login { email } => self.login(email).await,
            Commands::Logout => self.logout().await,
            Commands::Whoami => self.whoami().await,
            Commands::Tasks => self.tasks().await,
            Commands::Users => self.users().await,
            Commands::Timer { action } => self.timer(action).await,
            Commands::ConfigPath => config_path(),
        }
    }

    async fn login(&self, email: Option<String>) -> Result<()> {
        let email = match email {
            Some(email) => email,
            None => prompt("Email: ")?,
        };
        let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

        self.client
            .login(&LoginCredentials { email, password })
            .await
            .with_context(|| format!("Login against {} failed", self.config.api_url))?;

        let me = self.client.me().await.context("Logged in, but GET /auth/me failed")?;
        println!("Logged in as {}", me.name.as_deref().unwrap_or(&me.email));
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.client.logout().await;
        println!("Logged out.");
        Ok(())
    }

    async fn whoami(&self) -> Result<()> {
        let me = self.client.me().await.context("Failed to fetch current user")?;
        match (&me.name, &me.role) {
            (Some(name), Some(role)) => println!("{} <{}> ({})", name, me.email, role),
            (Some(name), None) => println!("{} <{}>", name, me.email),
            _ => println!("{}", me.email),
        }
        Ok(())
    }

    async fn tasks(&self) -> Result<()> {
        let tasks = self.client.list_tasks().await.context("Failed to list tasks")?;
        if tasks.is_empty() {
            println!("No tasks.");
        }
        for task in &tasks {
            println!("{}", task_line(task));
        }
        Ok(())
    }

    async fn users(&self) -> Result<()> {
        let users = self.client.list_users().await.context("Failed to list users")?;
        for user in &users {
            println!("{}", user_line(user));
        }
        Ok(())
    }

    fn open_store(&self) -> Result<FileStore> {
        let store_path = ClientConfig::timer_store_path()?;
        FileStore::open(&store_path)
            .with_context(|| format!("Failed to open timer store {}", store_path.display()))
    }

    fn open_timer(&self, task_id: &str) -> Result<WorkTimer> {
        WorkTimer::restore(
            TaskId::new(task_id),
            Arc::new(self.open_store()?),
            self.client.clone(),
            Arc::new(SystemClock),
        )
        .with_context(|| format!("Failed to load timer for task {}", task_id))
    }

    async fn timer(&self, action: TimerAction) -> Result<()> {
        match action {
            TimerAction::Discard { task_id } => {
                discard_timer(&self.open_store()?, &task_id)?;
                println!("Discarded timer for task {}", task_id);
            }
            TimerAction::Status { task_id } => show(&self.open_timer(&task_id)?),
            TimerAction::Start { task_id } => {
                let mut timer = self.open_timer(&task_id)?;
                timer.start()?;
                show(&timer);
            }
            TimerAction::Pause { task_id } => {
                let mut timer = self.open_timer(&task_id)?;
                timer.pause()?;
                show(&timer);
            }
            TimerAction::Finish { task_id } => {
                let mut timer = self.open_timer(&task_id)?;
                let minutes = timer.finish().await?;
                println!("Recorded {} min on task {}", minutes, task_id);
            }
            TimerAction::Watch { task_id } => watch(&self.open_timer(&task_id)?).await?,
        }
        Ok(())
    }
}

/// Clear a task's stored timer without loading it, so values that fail to
/// parse can be cleared too.
fn discard_timer(store: &dyn DurableStore, task_id: &str) -> Result<()> {
    TimerState::clear(store, &TaskId::new(task_id))?;
    Ok(())
}

fn show(timer: &WorkTimer) {
    println!("{}", timer_line(timer.task_id().as_str(), &timer.snapshot()));
}

/// Print config path and create a default file if missing.
pub fn config_path() -> Result<()> {
    let path = ClientConfig::config_path()?;
    if !path.exists() {
        ClientConfig::default().save_to(&path)?;
    }
    println!("{}", path.display());
    Ok(())
}

async fn watch(timer: &WorkTimer) -> Result<()> {
    if !timer.state().is_running() {
        show(timer);
        bail!("Timer for task {} is not running", timer.task_id());
    }

    println!("Watching task {}. Ctrl-C stops watching; the timer keeps running.", timer.task_id());
    let mut snapshots = timer.subscribe();
    print_inline(&timer.snapshot())?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *snapshots.borrow_and_update();
                print_inline(&snapshot)?;
            }
            _ = &mut ctrl_c => break,
        }
    }
    println!();
    Ok(())
}

fn print_inline(snapshot: &TimerSnapshot) -> Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "\r{}", snapshot)?;
    stdout.flush()?;
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line).context("Failed to read input")?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("No input given");
    }
    Ok(value)
}

fn task_line(task: &Task) -> String {
    let status = task.status.as_deref().unwrap_or("-");
    let spent = task
        .time_spent
        .map(|minutes| format!("{}h{:02}m", minutes / 60, minutes % 60))
        .unwrap_or_else(|| "-".to_string());
    format!("{:>6}  {:<12}  {:>7}  {}", task.id, status, spent, task.title)
}

fn user_line(user: &User) -> String {
    let name = user.name.as_deref().unwrap_or("-");
    match &user.email {
        Some(email) => format!("{:>6}  {} <{}>", user.id, name, email),
        None => format!("{:>6}  {}", user.id, name),
    }
}

fn timer_line(task_id: &str, snapshot: &TimerSnapshot) -> String {
    let phase = match snapshot.phase {
        TimerPhase::Running => "running",
        TimerPhase::Idle if snapshot.elapsed_seconds == 0 => "idle",
        TimerPhase::Idle => "paused",
    };
    format!("task {}  {}  {}", task_id, phase, snapshot)
}
