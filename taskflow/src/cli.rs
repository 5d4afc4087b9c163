//! Subcommands of the `taskflow` binary and their execution.

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::mpsc;

use taskflow_proto::notification::{Notification, NotificationId};
use taskflow_proto::task::{NewTask, Priority, SearchQuery, Task, TaskId, TaskStatus};
use taskflow_proto::user::{Role, User};

use crate::api::{ApiError, InviteFailure, TaskFilter};
use crate::channel::ChannelEvent;
use crate::session::{Session, SessionError};

/// Errors surfaced by a subcommand.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Session setup or sign-in failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A REST action failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// An invite failed.
    #[error(transparent)]
    Invite(#[from] InviteFailure),

    /// Waiting for Ctrl-C failed.
    #[error("signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}

/// Writes the top-level help to `out`.
///
/// # Errors
///
/// Returns the write error.
pub fn write_usage(out: &mut impl std::io::Write) -> std::io::Result<()> {
    use clap::CommandFactory;

    crate::config::CliArgs::command().write_help(out)
}

/// Task filters accepted by `tasks --filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FilterArg {
    /// Tasks you created.
    Created,
    /// Tasks assigned to you.
    Assigned,
    /// Tasks past their due date.
    Overdue,
}

impl From<FilterArg> for TaskFilter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::Created => Self::Created,
            FilterArg::Assigned => Self::Assigned,
            FilterArg::Overdue => Self::Overdue,
        }
    }
}

/// Top-level subcommands.
#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Sign in and keep the credential for later commands.
    Login {
        /// Account email.
        #[arg(long)]
        email: String,
        /// Account password.
        #[arg(long, env = "TASKFLOW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in.
    Register {
        /// Display name.
        #[arg(long)]
        username: String,
        /// Account email.
        #[arg(long)]
        email: String,
        /// Account password.
        #[arg(long, env = "TASKFLOW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the credential.
    Logout,
    /// Show the signed-in account.
    Whoami,
    /// List tasks.
    Tasks {
        /// Only show one filtered view.
        #[arg(long, value_enum)]
        filter: Option<FilterArg>,
    },
    /// Search tasks by text, status or priority.
    Search {
        /// Text to match against title and description.
        text: Option<String>,
        /// Restrict to a status (todo, in-progress, completed).
        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,
        /// Restrict to a priority (low, medium, high).
        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,
    },
    /// Show one task.
    Show {
        /// Task id.
        id: String,
    },
    /// Create a task.
    Create {
        /// Task title.
        title: String,
        /// Longer description.
        #[arg(long, default_value = "")]
        description: String,
        /// Priority (low, medium, high).
        #[arg(long, value_parser = parse_priority, default_value = "medium")]
        priority: Priority,
        /// Due date, `YYYY-MM-DD` or RFC 3339.
        #[arg(long, value_parser = parse_due)]
        due: Option<DateTime<Utc>>,
        /// Assignee user id.
        #[arg(long)]
        assign: Option<String>,
    },
    /// Change a task's status.
    Status {
        /// Task id.
        id: String,
        /// New status (todo, in-progress, completed).
        #[arg(value_parser = parse_status)]
        status: TaskStatus,
    },
    /// Delete a task.
    Delete {
        /// Task id.
        id: String,
    },
    /// Invite a registered user to collaborate on a task.
    Invite {
        /// Task id.
        id: String,
        /// Email of the user to invite.
        email: String,
    },
    /// List notifications.
    Notifications {
        /// Only show unread ones.
        #[arg(long)]
        unread: bool,
    },
    /// Mark one notification read.
    Read {
        /// Notification id.
        id: String,
    },
    /// Mark every notification read.
    ReadAll,
    /// Show the number of unread notifications.
    Unread,
    /// Stay connected and print live notifications and task updates.
    Watch,
    /// Account administration.
    #[command(subcommand)]
    Admin(AdminCommand),
}

/// `admin` subcommands.
#[derive(Debug, clap::Subcommand)]
pub enum AdminCommand {
    /// List accounts.
    Users,
    /// Change an account's role.
    Role {
        /// Account id.
        user_id: String,
        /// New role (user, admin).
        #[arg(value_parser = parse_role)]
        role: Role,
    },
    /// Replace an account's permissions.
    Permissions {
        /// Account id.
        user_id: String,
        /// Permission names; none clears them.
        permissions: Vec<String>,
    },
    /// Delete an account.
    DeleteUser {
        /// Account id.
        user_id: String,
    },
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    TaskStatus::parse(&s.to_lowercase())
        .ok_or_else(|| format!("unknown status '{s}' (todo, in-progress, completed)"))
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::parse(&s.to_lowercase())
        .ok_or_else(|| format!("unknown priority '{s}' (low, medium, high)"))
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::parse(&s.to_lowercase()).ok_or_else(|| format!("unknown role '{s}' (user, admin)"))
}

fn parse_due(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| format!("invalid due date '{s}' (YYYY-MM-DD or RFC 3339)"))
}

/// Runs one subcommand against `session`.
///
/// # Errors
///
/// Returns [`CliError`] for anything the user should see on stderr.
pub async fn run(command: Command, session: &Session) -> Result<(), CliError> {
    let actions = session.reconciler();
    match command {
        Command::Login { email, password } => {
            let user = session.sign_in(&email, &password).await?;
            println!("signed in as {}", describe_user(&user));
        }
        Command::Register {
            username,
            email,
            password,
        } => {
            let user = session.register(&username, &email, &password).await?;
            println!("registered and signed in as {}", describe_user(&user));
        }
        Command::Logout => {
            session.sign_out().await;
            println!("signed out");
        }
        Command::Whoami => {
            require_signed_in(session)?;
            let user = session.api().me().await?;
            println!("{}", describe_user(&user));
        }
        Command::Tasks { filter } => {
            require_signed_in(session)?;
            let snapshot = match filter {
                None => {
                    actions.refresh_tasks().await?;
                    session.store().read(|s| s.tasks.all.clone())
                }
                Some(filter) => {
                    actions.refresh_filtered(filter.into()).await?;
                    session.store().read(|s| match filter {
                        FilterArg::Created => s.tasks.created.clone(),
                        FilterArg::Assigned => s.tasks.assigned.clone(),
                        FilterArg::Overdue => s.tasks.overdue.clone(),
                    })
                }
            };
            print_tasks(&snapshot);
        }
        Command::Search {
            text,
            status,
            priority,
        } => {
            require_signed_in(session)?;
            let query = SearchQuery {
                q: text,
                status,
                priority,
            };
            print_tasks(&actions.search(&query).await?);
        }
        Command::Show { id } => {
            require_signed_in(session)?;
            let task = actions.load_task(&TaskId::new(id)).await?;
            print_task_detail(&task);
        }
        Command::Create {
            title,
            description,
            priority,
            due,
            assign,
        } => {
            require_signed_in(session)?;
            let new = NewTask {
                description,
                priority,
                due_date: due,
                assigned_to: assign,
                ..NewTask::titled(title)
            };
            let task = actions.create_task(&new).await?;
            println!("created {}", task_line(&task));
        }
        Command::Status { id, status } => {
            require_signed_in(session)?;
            let task = actions.set_status(&TaskId::new(id), status).await?;
            println!("updated {}", task_line(&task));
        }
        Command::Delete { id } => {
            require_signed_in(session)?;
            actions.delete_task(&TaskId::new(&id)).await?;
            println!("deleted {id}");
        }
        Command::Invite { id, email } => {
            require_signed_in(session)?;
            let task = actions.invite(&TaskId::new(id), &email).await?;
            println!("invited {email} to {}", task_line(&task));
        }
        Command::Notifications { unread } => {
            require_signed_in(session)?;
            actions.refresh_notifications().await?;
            let list = session.store().read(|s| s.notifications.clone());
            for n in list.iter().filter(|n| !unread || !n.read) {
                println!("{}", notification_line(n));
            }
        }
        Command::Read { id } => {
            require_signed_in(session)?;
            actions.refresh_notifications().await?;
            actions.mark_read(&NotificationId::new(id)).await?;
            println!("{} unread", session.store().unread_count());
        }
        Command::ReadAll => {
            require_signed_in(session)?;
            actions.refresh_notifications().await?;
            actions.mark_all_read().await?;
            println!("all notifications read");
        }
        Command::Unread => {
            require_signed_in(session)?;
            println!("{}", actions.remote_unread_count().await?);
        }
        Command::Watch => watch(session).await?,
        Command::Admin(admin) => {
            require_signed_in(session)?;
            run_admin(admin, session).await?;
        }
    }
    Ok(())
}

async fn run_admin(command: AdminCommand, session: &Session) -> Result<(), CliError> {
    let api = session.api();
    match command {
        AdminCommand::Users => {
            for user in api.list_users().await? {
                println!("{}", describe_user(&user));
            }
        }
        AdminCommand::Role { user_id, role } => {
            let user = api.set_user_role(&user_id, role).await?;
            println!("updated {}", describe_user(&user));
        }
        AdminCommand::Permissions {
            user_id,
            permissions,
        } => {
            let user = api.set_user_permissions(&user_id, permissions).await?;
            println!(
                "updated {} permissions: [{}]",
                user.username,
                user.permissions.join(", ")
            );
        }
        AdminCommand::DeleteUser { user_id } => {
            api.delete_user(&user_id).await?;
            println!("deleted user {user_id}");
        }
    }
    Ok(())
}

/// Resumes the stored session and prints live events until Ctrl-C.
async fn watch(session: &Session) -> Result<(), CliError> {
    let Some(user) = session.restore().await? else {
        return Err(SessionError::NotSignedIn.into());
    };
    let actions = session.reconciler();
    if let Err(e) = actions.refresh_notifications().await {
        tracing::warn!(error = %e, "initial notification fetch failed");
    }

    let printer = actions.clone();
    session.router().on_notification(move |n| {
        println!("notification  {}", notification_line(&n));
        printer.apply_notification(n);
    });
    let printer = actions.clone();
    session.router().on_task_update(move |t| {
        println!("task update   {}", task_line(&t));
        printer.apply_task_update(t);
    });

    eprintln!(
        "watching as {} ({} unread), Ctrl-C to stop",
        user.username,
        session.store().unread_count()
    );
    let (_idle, idle_events) = mpsc::channel(1);
    let mut events = session.channel().take_events().unwrap_or(idle_events);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            Some(event) = events.recv() => report(&event),
            else => break,
        }
    }
    session.channel().close();
    Ok(())
}

fn report(event: &ChannelEvent) {
    match event {
        ChannelEvent::Authenticated { .. } => eprintln!("live updates connected"),
        ChannelEvent::AuthRejected { reason, retry_in } => {
            eprintln!("channel rejected credential ({reason}), retrying in {retry_in:?}");
        }
        ChannelEvent::Disconnected { reason } => eprintln!("channel down: {reason:?}"),
        ChannelEvent::Reconnecting {
            attempt,
            max_attempts,
            delay,
        } => eprintln!("reconnecting in {delay:?} (attempt {attempt}/{max_attempts})"),
        ChannelEvent::ReconnectsExhausted { attempts } => {
            eprintln!("gave up reconnecting after {attempts} attempts");
        }
        ChannelEvent::Error(e) => eprintln!("channel error: {e}"),
    }
}

fn require_signed_in(session: &Session) -> Result<(), SessionError> {
    if session.vault().is_signed_in() {
        Ok(())
    } else {
        Err(SessionError::NotSignedIn)
    }
}

fn describe_user(user: &User) -> String {
    format!("{} <{}> [{}] id={}", user.username, user.email, user.role, user.id)
}

fn task_line(task: &Task) -> String {
    let due = task
        .due_date
        .map(|d| format!(" due {}", d.format("%Y-%m-%d")))
        .unwrap_or_default();
    format!(
        "{}  [{}] {:<6} {}{due}",
        task.id, task.status, task.priority, task.title
    )
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("no tasks");
    }
    for task in tasks {
        println!("{}", task_line(task));
    }
}

fn print_task_detail(task: &Task) {
    println!("{}", task_line(task));
    if !task.description.is_empty() {
        println!("  {}", task.description);
    }
    if let Some(assignee) = &task.assigned_to {
        println!("  assigned to {assignee}");
    }
    for c in &task.collaborators {
        println!("  collaborator {} <{}>", c.username, c.email);
    }
}

fn notification_line(n: &Notification) -> String {
    let marker = if n.read { ' ' } else { '*' };
    format!("{marker} {}  {}  {}", n.id, n.kind, n.message)
}
