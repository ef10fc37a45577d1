use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use taskdesk::config::Config;
use taskdesk::editor::{self, TaskEditor};
use taskdesk::models::{Credentials, NewTask, NewUser, Task, TaskStatus, User};
use taskdesk::session::SessionController;
use taskdesk::views::{LoadOutcome, TaskCollectionView};
use taskdesk::{App, Error};

#[derive(Parser)]
#[command(name = "taskdesk", version, about = "Task manager client")]
struct Cli {
    /// Backend base URL (overrides TASKDESK_API_BASE).
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Client data file holding the session (overrides TASKDESK_DATA).
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and keep the session
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Create an account and log in with it
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
        #[arg(long)]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },
    Logout,
    /// Show the logged in user
    Whoami,
    /// List tasks: everyone's by default
    Tasks {
        #[arg(long, conflicts_with_all = ["user", "search"])]
        mine: bool,
        #[arg(long, conflicts_with = "search")]
        user: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    Create {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    Complete {
        id: i64,
    },
    Delete {
        id: i64,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "Command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Error> {
    let mut config = Config::load()?;
    if let Some(api_base) = cli.api_base {
        config.api_base = api_base;
    }
    if let Some(data) = cli.data {
        config.data_path = data;
    }

    let app = App::open(&config)?;
    let session = &app.session;

    match cli.command {
        Command::Login { username, password } => {
            let user = session.login(&Credentials { username, password }).await?;
            println!("Logged in as {}", display_name(&user));
        }
        Command::Register {
            username,
            password,
            first_name,
            last_name,
        } => {
            let new_user = NewUser {
                username,
                password,
                first_name,
                last_name,
            };
            let user = session.register(&new_user).await?;
            println!("Registered and logged in as {}", display_name(&user));
        }
        Command::Logout => {
            session.logout().await;
            println!("Logged out");
        }
        command => {
            let Some(user) = session.startup().await.user().cloned() else {
                println!("Please login to view this content");
                return Ok(ExitCode::FAILURE);
            };
            return authenticated(&app, &user, command).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn authenticated(app: &App, user: &User, command: Command) -> Result<ExitCode, Error> {
    let session = &app.session;

    match command {
        Command::Whoami => println!("{}", display_name(user)),
        Command::Tasks {
            mine,
            user: owner,
            search,
            status,
            page,
        } => {
            let view = if mine {
                TaskCollectionView::my_tasks(session, status)
            } else if let Some(owner) = owner {
                TaskCollectionView::user_tasks(session, owner, status)
            } else if let Some(query) = search {
                TaskCollectionView::search(session, query, status)
            } else {
                TaskCollectionView::all_tasks(session, status)
            };
            return list(view.with_page_size(app.page_size), page, user).await;
        }
        Command::Create { title, description } => {
            let task = editor::create_task(session, &NewTask { title, description }).await?;
            print_task(&task, user);
        }
        Command::Edit {
            id,
            title,
            description,
            status,
        } => {
            let mut editor = open_editor(session, id).await?;
            if let Some(title) = title {
                editor.set_title(title)?;
            }
            if let Some(description) = description {
                editor.set_description(description);
            }
            if let Some(status) = status {
                editor.set_status(status)?;
            }
            match editor.save().await? {
                Some(task) => print_task(&task, user),
                None => println!("No changes"),
            }
        }
        Command::Complete { id } => {
            let mut editor = open_editor(session, id).await?;
            let task = editor.complete().await?;
            print_task(&task, user);
        }
        Command::Delete { id, yes } => {
            let editor = open_editor(session, id).await?;
            let pending = editor.request_delete();
            if !yes && !confirm(&pending.prompt())? {
                println!("Cancelled");
                return Ok(ExitCode::SUCCESS);
            }
            pending.confirm().await?;
            println!("Deleted task #{id}");
        }
        Command::Login { .. } | Command::Register { .. } | Command::Logout => {}
    }

    Ok(ExitCode::SUCCESS)
}

async fn open_editor(session: &SessionController, id: i64) -> Result<TaskEditor, Error> {
    let task = editor::fetch_task(session, id).await?;
    TaskEditor::open(session, task).await
}

async fn list(mut view: TaskCollectionView, page: u32, user: &User) -> Result<ExitCode, Error> {
    match view.load(1).await {
        LoadOutcome::Loaded => {}
        LoadOutcome::Redirect(_) => {
            println!("Nothing to show: a search text or username is required");
            return Ok(ExitCode::FAILURE);
        }
        LoadOutcome::LoginRequired => {
            println!("Please login to view this content");
            return Ok(ExitCode::FAILURE);
        }
        LoadOutcome::Failed => {
            eprintln!("error: {}", view.error().unwrap_or("Failed to fetch tasks"));
            return Ok(ExitCode::FAILURE);
        }
    }

    if page != 1 {
        match view.change_page(page).await {
            None => {
                let total = view.pagination().total_pages;
                eprintln!("error: page {page} is out of range (1-{total})");
                return Ok(ExitCode::FAILURE);
            }
            Some(LoadOutcome::Loaded) => {}
            Some(_) => {
                eprintln!("error: {}", view.error().unwrap_or("Failed to fetch tasks"));
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    let pagination = view.pagination();
    println!(
        "{} (page {}/{}, {} tasks)",
        view.title(),
        pagination.current_page,
        pagination.total_pages,
        pagination.total_items
    );
    if view.tasks().is_empty() {
        println!("No tasks found");
    }
    for task in view.tasks() {
        print_task(task, user);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_task(task: &Task, user: &User) {
    let owner = if task.is_owned_by(user) {
        " (Your task)".to_string()
    } else {
        format!(" by {}", task.user)
    };
    println!(
        "#{:<5} [{}] {}{} - created {}",
        task.id,
        task.status.label(),
        task.title,
        owner,
        task.created_at.date()
    );
    println!(
        "       {}",
        task.description
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or("No description")
    );
}

fn display_name(user: &User) -> String {
    let full = format!("{} {}", user.first_name, user.last_name);
    let full = full.trim();
    if full.is_empty() {
        user.username.clone()
    } else {
        format!("{} ({full})", user.username)
    }
}

fn confirm(prompt: &str) -> Result<bool, Error> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
