use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// tessera: work with local-first replica files.
///
/// Create documents, write rows, inspect the merged state and sync two
/// SQLite replicas from the command line.
#[derive(Parser)]
#[command(name = "tessera", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a document in a replica file, creating the file if needed.
    Init {
        /// Path to the SQLite replica file.
        db: String,

        /// Document id. A random one is generated if omitted.
        #[arg(long)]
        id: Option<String>,

        /// Metadata as a JSON object.
        #[arg(short, long, default_value = "{}")]
        meta: String,
    },

    /// List the documents in a replica.
    List {
        /// Path to the SQLite replica file.
        db: String,
    },

    /// Insert a row. Prints the generated row id.
    Insert {
        /// Path to the SQLite replica file.
        db: String,

        /// Document id.
        doc: String,

        /// Table name.
        table: String,

        /// Column values as a JSON object.
        values: String,
    },

    /// Overwrite some columns of a row.
    Update {
        /// Path to the SQLite replica file.
        db: String,

        /// Document id.
        doc: String,

        /// Table name.
        table: String,

        /// Row id.
        row: String,

        /// Column values as a JSON object.
        values: String,
    },

    /// Print the merged state of a document as JSON.
    Show {
        /// Path to the SQLite replica file.
        db: String,

        /// Document id.
        doc: String,

        /// Only print this table.
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Sync one document between two replica files.
    Sync {
        /// Replica that starts the exchange.
        from: String,

        /// The other replica. The document is created there if missing.
        to: String,

        /// Document id.
        doc: String,

        /// Give up after this many packets.
        #[arg(long, default_value = "64")]
        max_rounds: usize,
    },

    /// Show replica file status and statistics.
    Status {
        /// Path to the SQLite replica file.
        db: String,
    },
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { db, id, meta } => commands::init(&db, id.as_deref(), &meta).await,
        Commands::List { db } => commands::list(&db).await,
        Commands::Insert {
            db,
            doc,
            table,
            values,
        } => commands::insert(&db, &doc, &table, &values).await,
        Commands::Update {
            db,
            doc,
            table,
            row,
            values,
        } => commands::update(&db, &doc, &table, &row, &values).await,
        Commands::Show { db, doc, table } => commands::show(&db, &doc, table.as_deref()).await,
        Commands::Sync {
            from,
            to,
            doc,
            max_rounds,
        } => commands::sync(&from, &to, &doc, max_rounds).await,
        Commands::Status { db } => commands::status(&db),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}
