use serde_json::{json, Map, Value};
use tessera_session::{sync_pair, Replica, SessionConfig};
use tessera_store::{DocumentStore, SqliteStore};
use tracing::{debug, info};

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

fn replica(db_path: &str) -> std::result::Result<Replica<SqliteStore>, Box<dyn std::error::Error>> {
    Ok(Replica::new(SqliteStore::open(db_path)?, SessionConfig::default()))
}

/// `tessera init <db>`: create a document and print its id.
pub async fn init(db_path: &str, id: Option<&str>, meta: &str) -> Result {
    let metadata = Value::Object(parse_object(meta)?);
    let replica = replica(db_path)?;
    let session = match id {
        Some(id) => {
            if replica.store().get_document(id)?.is_some() {
                return Err(format!("document '{id}' already exists in {db_path}").into());
            }
            replica.open_or_create_document(id, metadata).await?
        }
        None => replica.create_document(metadata).await?,
    };
    info!(db = db_path, document = session.id(), "document created");
    println!("{}", session.id());
    replica.close_all().await;
    Ok(())
}

/// `tessera list <db>`: one line per document.
pub async fn list(db_path: &str) -> Result {
    let replica = replica(db_path)?;
    let documents = replica.documents().await?;

    if documents.is_empty() {
        println!("  (no documents)");
        return Ok(());
    }

    println!("  {:<24} {:<18} {:>10}  {}", "Document", "Node", "Fragments", "Metadata");
    println!("  {}", "-".repeat(70));
    for doc in &documents {
        let count = replica.store().fragment_count(&doc.id)?;
        println!(
            "  {:<24} {:<18} {:>10}  {}",
            truncate(&doc.id, 24),
            doc.node_id,
            format_num(count),
            doc.metadata,
        );
    }
    Ok(())
}

/// `tessera insert <db> <doc> <table> <values>`: print the new row id.
pub async fn insert(db_path: &str, doc: &str, table: &str, values: &str) -> Result {
    let values = parse_object(values)?;
    let replica = replica(db_path)?;
    let session = replica.open_document(doc).await?;
    let row = session.insert(table, values).await?;
    info!(document = doc, table, row = %row, "row inserted");
    println!("{row}");
    replica.close_all().await;
    Ok(())
}

/// `tessera update <db> <doc> <table> <row> <values>`.
pub async fn update(db_path: &str, doc: &str, table: &str, row: &str, values: &str) -> Result {
    let values = parse_object(values)?;
    let replica = replica(db_path)?;
    let session = replica.open_document(doc).await?;
    session.update(table, row, values).await?;
    info!(document = doc, table, row, "row updated");
    replica.close_all().await;
    Ok(())
}

/// `tessera show <db> <doc>`: the merged view as pretty JSON.
pub async fn show(db_path: &str, doc: &str, table: Option<&str>) -> Result {
    let replica = replica(db_path)?;
    let state = replica.open_document(doc).await?.get_state().await?;

    let output = match table {
        Some(name) => match state.data.table(name) {
            Some(rows) => serde_json::to_value(rows)?,
            None => json!({}),
        },
        None => serde_json::to_value(&state)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    replica.close_all().await;
    Ok(())
}

/// `tessera sync <from> <to> <doc>`: reconcile one document across two files.
pub async fn sync(from_path: &str, to_path: &str, doc: &str, max_rounds: usize) -> Result {
    let from = replica(from_path)?;
    let to = replica(to_path)?;

    let metadata = from
        .store()
        .get_document(doc)?
        .map(|d| d.metadata)
        .ok_or_else(|| format!("document '{doc}' not found in {from_path}"))?;
    let a = from.open_document(doc).await?;
    let b = to.open_or_create_document(doc, metadata).await?;
    debug!(from = from_path, to = to_path, document = doc, max_rounds, "sync started");

    let report = sync_pair(&a, &b, max_rounds).await?;
    info!(
        document = doc,
        rounds = report.rounds,
        transferred = report.fragments_transferred,
        converged = report.converged,
        "sync finished"
    );
    println!("Rounds: {}", report.rounds);
    println!("Fragments transferred: {}", format_num(report.fragments_transferred as u64));
    if report.converged {
        println!("Replicas converged");
    } else {
        println!("Replicas still differ (stopped after {max_rounds} rounds or rejected fragments)");
    }

    from.close_all().await;
    to.close_all().await;
    Ok(())
}

/// `tessera status <db>`: file size, journal mode and counts.
pub fn status(db_path: &str) -> Result {
    let store = SqliteStore::open(db_path)?;
    let stats = store.stats()?;
    let size = store.file_size()?;
    let journal = store.journal_mode()?;

    println!("Replica: {db_path} (SQLite, {journal} mode)");
    println!("Size: {}", format_bytes(size));
    println!("Documents: {}", format_num(stats.documents));
    println!("Fragments: {}", format_num(stats.fragments));
    Ok(())
}

fn parse_object(input: &str) -> std::result::Result<Map<String, Value>, Box<dyn std::error::Error>> {
    match serde_json::from_str(input)? {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected a JSON object, got {other}").into()),
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_num(n: u64) -> String {
    if n < 1000 {
        return n.to_string();
    }
    let s = n.to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max - 3).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn numbers_get_separators() {
        assert_eq!(format_num(999), "999");
        assert_eq!(format_num(1_234_567), "1,234,567");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }

    #[test]
    fn only_objects_are_rows() {
        assert_eq!(parse_object(r#"{"a": 1}"#).unwrap()["a"], json!(1));
        assert!(parse_object("[1]").is_err());
        assert!(parse_object("{").is_err());
    }

    #[test]
    fn long_ids_are_shortened() {
        assert_eq!(truncate("short", 24), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }

    #[tokio::test]
    async fn sync_copies_a_document_between_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.db");
        let b = dir.path().join("b.db");
        let (a, b) = (a.to_str().unwrap(), b.to_str().unwrap());

        init(a, Some("groceries"), "{}").await.unwrap();
        insert(a, "groceries", "todos", r#"{"title": "milk"}"#)
            .await
            .unwrap();
        sync(a, b, "groceries", 32).await.unwrap();

        let copy = SqliteStore::open(b).unwrap();
        assert_eq!(copy.fragment_count("groceries").unwrap(), 1);
    }

    #[tokio::test]
    async fn commands_log_writes_and_sync() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter("tessera_cli=debug")
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.db");
        let b = dir.path().join("b.db");
        let (a, b) = (a.to_str().unwrap(), b.to_str().unwrap());

        init(a, Some("notes"), "{}").await.unwrap();
        insert(a, "notes", "todos", r#"{"title": "eggs"}"#)
            .await
            .unwrap();
        update(a, "notes", "todos", "r1", r#"{"done": true}"#)
            .await
            .unwrap();
        sync(a, b, "notes", 32).await.unwrap();

        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        for event in ["document created", "row inserted", "row updated", "sync started", "sync finished"] {
            assert!(log.contains(event), "missing {event:?} in {log}");
        }
    }
}
