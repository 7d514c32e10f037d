//! Todo Book CLI - manage your todo book from the terminal.
//!
//! # Commands
//!
//! - `todobook login --email <EMAIL>`: Sign in and remember the session
//! - `todobook logout`: Sign out and forget the session
//! - `todobook whoami`: Show who is signed in
//! - `todobook list`: List todos, newest first
//! - `todobook add`, `edit`, `toggle`, `delete`: Change todos
//!
//! # Environment Variables
//!
//! See the `config` module of `todobook-client` for available options.

mod render;
mod session_file;

use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Password;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use todobook_client::attachment::{AttachmentUploader, LocalAttachment};
use todobook_client::config::Config;
use todobook_client::repository::TodoRepository;
use todobook_client::session::{IdentityProvider, SessionManager, SessionState};
use todobook_client::supabase::{
    SupabaseAuth, SupabaseClient, SupabaseObjectStore, SupabaseTodoStore,
};
use todobook_client::TodoBook;

use crate::render::{format_list, format_notice};
use crate::session_file::{SessionFile, SessionSync};

/// Todo Book - a personal todo notebook backed by Supabase.
#[derive(Parser, Debug)]
#[command(name = "todobook")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    TODOBOOK_SUPABASE_URL          Supabase project URL (required)
    TODOBOOK_SUPABASE_ANON_KEY     Supabase anon key (required)
    TODOBOOK_TODOS_TABLE           Table name (default: todos)
    TODOBOOK_IMAGE_BUCKET          Storage bucket (default: todo-images)
    TODOBOOK_IMAGE_PREFIX          Key prefix in the bucket (default: todo-images)
    TODOBOOK_REQUEST_TIMEOUT_SECS  Request timeout (default: 10)
    TODOBOOK_SESSION_PATH          Session file (default: ~/.todobook/session.json)
    RUST_LOG                       Log filter (default: warn)

EXAMPLES:
    # Sign in
    todobook login --email me@example.com

    # Add a todo with a picture
    todobook add --title \"Buy milk\" --content 2% --image ./milk.png

    # Check it off
    todobook toggle 3f1c0a52-5b0e-4d43-9a43-1f7b3f1d2c11
")]
struct Cli {
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password.
    ///
    /// The password is prompted for when not given, or read from stdin
    /// when stdin is not a terminal.
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: Option<String>,
    },

    /// Sign out and remove the stored session.
    Logout,

    /// Show the signed-in user.
    Whoami,

    /// List todos, newest first.
    List,

    /// Create a todo.
    Add {
        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        content: String,

        /// Image file to attach.
        #[arg(short, long)]
        image: Option<PathBuf>,
    },

    /// Edit a todo. Fields that are not given keep their value.
    Edit {
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        content: Option<String>,

        /// Image file to attach, replacing any existing one.
        #[arg(short, long, conflicts_with = "remove_image")]
        image: Option<PathBuf>,

        /// Drop the attached image.
        #[arg(long)]
        remove_image: bool,
    },

    /// Check or uncheck a todo.
    Toggle { id: String },

    /// Delete a todo.
    Delete { id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(cli.command))
}

/// Initializes tracing to stderr so stdout stays clean for output.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Wiring shared by every command.
struct CliContext {
    config: Config,
    client: SupabaseClient,
    auth: Arc<SupabaseAuth>,
    sync: SessionSync,
}

impl CliContext {
    fn load() -> Result<Self> {
        let config = Config::from_env().context("Failed to load configuration")?;
        let client = SupabaseClient::from_config(&config).context("Failed to create client")?;

        let file = SessionFile::new(config.session_path.clone());
        let stored = match file.load() {
            Ok(session) => session,
            Err(e) => {
                warn!(path = %file.path().display(), error = %e, "Ignoring unreadable session file");
                None
            }
        };
        debug!(restored = stored.is_some(), "Loaded session file");

        let auth = Arc::new(SupabaseAuth::with_session(client.clone(), stored));
        let sync = SessionSync::new(auth.session_events(), file);

        Ok(Self {
            config,
            client,
            auth,
            sync,
        })
    }

    fn book(&self) -> TodoBook {
        let store = SupabaseTodoStore::new(self.client.clone(), &self.config.todos_table);
        let objects = SupabaseObjectStore::new(self.client.clone()).with_auth(self.auth.clone());

        let session = Arc::new(SessionManager::new(self.auth.clone()));
        // Detached; ends when the provider's event channel closes.
        let _listener = session.listen();

        TodoBook::new(
            session,
            TodoRepository::new(Arc::new(store)),
            AttachmentUploader::new(
                Arc::new(objects),
                &self.config.image_bucket,
                &self.config.image_prefix,
            ),
        )
    }

    /// Builds the shell and loads the collection, requiring a signed-in user.
    async fn open(&self) -> Result<TodoBook> {
        let mut book = self.book();
        let state = book.mount().await;
        print_notices(&mut book);

        if !matches!(state, SessionState::SignedIn(_)) {
            bail!("Not signed in. Run `todobook login --email <EMAIL>` first.");
        }
        if !book.cache().is_loaded() {
            bail!("Could not load todos");
        }
        Ok(book)
    }
}

async fn run(command: Command) -> Result<()> {
    let mut ctx = CliContext::load()?;
    let result = dispatch(&ctx, command).await;

    ctx.sync
        .flush()
        .context("Failed to update the session file")?;
    result
}

async fn dispatch(ctx: &CliContext, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password()?,
            };
            let session = ctx
                .auth
                .sign_in_with_password(&email, &password)
                .await
                .context("Sign in failed")?;
            println!("Signed in as {}", session.user.display_name());
            Ok(())
        }

        Command::Logout => {
            let mut book = ctx.book();
            if book.mount().await.identity().is_none() {
                book.drain_notices();
                println!("Not signed in");
                return Ok(());
            }
            let result = book.sign_out().await;
            print_notices(&mut book);
            result.context("Sign out failed")?;
            println!("Signed out");
            Ok(())
        }

        Command::Whoami => {
            match ctx.auth.current_session().await {
                Ok(Some(session)) => println!("{}", session.user.display_name()),
                Ok(None) => println!("Not signed in"),
                Err(e) => return Err(e).context("Session lookup failed"),
            }
            Ok(())
        }

        Command::List => {
            let book = ctx.open().await?;
            println!("{}", format_list(book.todos()));
            Ok(())
        }

        Command::Add {
            title,
            content,
            image,
        } => {
            let mut book = ctx.open().await?;
            book.new_todo();
            let editor = book.editor_mut();
            editor.set_title(title);
            editor.set_content(content);
            if let Some(path) = image {
                editor.attach(read_attachment(&path).await?);
            }
            save(&mut book).await
        }

        Command::Edit {
            id,
            title,
            content,
            image,
            remove_image,
        } => {
            let mut book = ctx.open().await?;
            book.select(&id)
                .with_context(|| format!("No todo with id {id}"))?;
            let editor = book.editor_mut();
            if let Some(title) = title {
                editor.set_title(title);
            }
            if let Some(content) = content {
                editor.set_content(content);
            }
            if remove_image {
                editor.remove_image();
            }
            if let Some(path) = image {
                editor.attach(read_attachment(&path).await?);
            }
            save(&mut book).await
        }

        Command::Toggle { id } => {
            let mut book = ctx.open().await?;
            let result = book.toggle(&id).await;
            print_notices(&mut book);
            result.context("Toggle failed")?;
            if let Some(todo) = book.todos().iter().find(|t| t.id == id) {
                let status = if todo.completed { "done" } else { "open" };
                println!("{} is now {status}", todo.title);
            }
            Ok(())
        }

        Command::Delete { id } => {
            let mut book = ctx.open().await?;
            let result = book.delete(&id).await;
            print_notices(&mut book);
            result.context("Delete failed")
        }
    }
}

async fn save(book: &mut TodoBook) -> Result<()> {
    let result = book.save().await;
    print_notices(book);
    let outcome = result.context("Save failed")?;
    debug!(?outcome, "Saved");
    Ok(())
}

async fn read_attachment(path: &std::path::Path) -> Result<LocalAttachment> {
    LocalAttachment::from_path(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn print_notices(book: &mut TodoBook) {
    for notice in book.drain_notices() {
        eprintln!("{}", format_notice(&notice));
    }
}

/// Prompts for the password without echo, or reads one line of piped stdin.
fn prompt_password() -> Result<String> {
    if io::stdin().is_terminal() {
        return Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password");
    }
    read_password_line(io::stdin().lock())
}

fn read_password_line(mut input: impl BufRead) -> Result<String> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("Failed to read password")?;

    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Password is required");
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn piped_password_drops_line_ending_only() {
        let password = read_password_line(Cursor::new(" s3cret \r\nnext line\n")).unwrap();
        assert_eq!(password, " s3cret ");
    }

    #[test]
    fn empty_piped_password_is_rejected() {
        assert!(read_password_line(Cursor::new("\n")).is_err());
        assert!(read_password_line(Cursor::new("")).is_err());
    }
}
