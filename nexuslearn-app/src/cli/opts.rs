use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, ValueEnum)]
pub enum StoreKind {
    Json,
    Sqlite,
    /// Volatile, process-local (useful with `serve` for demos)
    Memory,
}

#[derive(Debug, Parser, Clone)]
#[command(name = "nexuslearn", version, about = "NexusLearn study service CLI/API")]
pub struct Cli {
    /// Storage backend
    #[arg(long, value_enum, default_value_t = StoreKind::Json)]
    pub store: StoreKind,

    /// SQLite DB path when --store sqlite (defaults to the data dir)
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Data directory (overrides NEXUSLEARN_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// User accounts and access tokens
    #[command(subcommand)]
    User(UserCmd),
    /// Deck operations
    #[command(subcommand)]
    Deck(DeckCmd),
    /// Card operations
    #[command(subcommand)]
    Card(CardCmd),
    /// Interactive review loop
    Review(ReviewCmd),
    /// Export data
    #[command(subcommand)]
    Export(ExportCmd),
    /// Import data
    #[command(subcommand)]
    Import(ImportCmd),
    /// Run the HTTP API
    Serve(ServeCmd),
}

#[derive(Debug, Subcommand, Clone)]
pub enum UserCmd {
    /// Register a user and print a fresh access token
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Issue another access token
    Token { email: String },
    List,
}

#[derive(Debug, Subcommand, Clone)]
pub enum DeckCmd {
    Add(DeckAdd),
    List {
        /// Owner email
        #[arg(long)]
        owner: Option<String>,
    },
    Show { deck: String },
    Rm { deck: String },
}

#[derive(Debug, Args, Clone)]
pub struct DeckAdd {
    /// Owner email
    #[arg(long)]
    pub owner: String,
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CardCmd {
    Add(CardAdd),
}

#[derive(Debug, Args, Clone)]
pub struct CardAdd {
    #[arg(long)]
    pub deck: String,
    #[arg(long)]
    pub question: String,
    #[arg(long)]
    pub answer: String,
}

#[derive(Debug, Args, Clone)]
pub struct ReviewCmd {
    #[arg(long)]
    pub deck: String,
    #[arg(long, default_value_t = 50)]
    pub max: usize,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ExportCmd {
    Csv {
        path: PathBuf,
        #[arg(long)]
        deck: String,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ImportCmd {
    Csv {
        path: PathBuf,
        /// Owner email
        #[arg(long)]
        owner: String,
        /// Deck title (defaults to the file stem)
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Debug, Args, Clone)]
pub struct ServeCmd {
    /// Bind address (host:port), overrides NEXUSLEARN_ADDR
    #[arg(long)]
    pub addr: Option<String>,
}
