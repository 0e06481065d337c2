use clap::{Parser, Subcommand, ValueEnum};
use collectiondb::input::{parse_documents, parse_json};
use collectiondb::{
    CollectionDbError, CollectionTypeUpdate, Config, Document, InsertOutcome, MatchField,
    NewCollectionType, QueryOutcome, QueryRequest, QueryType, Store, ValidationMode,
};
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use std::process;

/// collectiondb CLI: register collection types and work with their documents
#[derive(Parser)]
#[command(name = "collectiondb", version, about)]
struct Cli {
    /// Path to the database file (default: $COLLECTIONDB_PATH or collections.db)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Register a collection type from a JSON definition ("-" reads stdin)
    Register {
        /// {"id", "name", "collection_name", "description", "schema"}
        definition: String,
    },

    /// List registered collection types
    Types,

    /// Show one collection type by id
    Type {
        id: String,
    },

    /// Change a collection type's display name or description
    RenameType {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Remove a collection type from the registry (documents are kept)
    Unregister {
        id: String,
    },

    /// Insert one document ("-" reads stdin)
    Insert {
        /// Collection name
        collection: String,
        /// Document as a JSON object
        document: String,
    },

    /// Insert a JSON array of documents, all or nothing ("-" reads stdin)
    InsertBatch {
        /// Collection name
        collection: String,
        /// Documents as a JSON array
        documents: String,
    },

    /// Soft-delete matching documents
    Delete {
        /// Collection name
        collection: String,
        /// Field to match on: `id` or `_id`
        #[arg(long)]
        attribute: String,
        #[arg(long)]
        value: String,
    },

    /// Show the order the next insert must carry
    NextOrder {
        /// Collection name
        collection: String,
    },

    /// Query live documents
    Query {
        /// Collection name
        collection: String,
        /// count, range, value or value_exact
        #[arg(long = "type")]
        query_type: String,
        /// Dotted field path (value, value_exact)
        #[arg(long)]
        attribute: Option<String>,
        /// Pattern (value) or exact JSON value (value_exact)
        #[arg(long)]
        value: Option<String>,
        /// Maximum records returned (at most 30)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Summarize a collection's live documents
    Summary {
        /// Collection name
        collection: String,
    },

    /// List collections with a live backing store, newest first
    Collections,

    /// Bulk export a collection
    Export {
        /// Collection name
        collection: String,
    },
}

impl Command {
    fn operation(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Types => "types",
            Command::Type { .. } => "type",
            Command::RenameType { .. } => "rename-type",
            Command::Unregister { .. } => "unregister",
            Command::Insert { .. } => "insert",
            Command::InsertBatch { .. } => "insert-batch",
            Command::Delete { .. } => "delete",
            Command::NextOrder { .. } => "next-order",
            Command::Query { .. } => "query",
            Command::Summary { .. } => "summary",
            Command::Collections => "collections",
            Command::Export { .. } => "export",
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let format = cli.format;
    let operation = cli.command.operation();

    if let Err(e) = run(cli) {
        let payload = failure_payload(operation, &e);
        match render(&payload, format) {
            Ok(text) => eprint!("{text}"),
            Err(_) => eprintln!("ERROR:{e}"),
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> collectiondb::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(path) = cli.database {
        config = config.with_database_path(path);
    }
    let store = Store::open(config)?;

    let output = match cli.command {
        Command::Register { definition } => {
            let raw = read_arg(&definition)?;
            let new_type: NewCollectionType = serde_json::from_value(parse_json(&raw)?)
                .map_err(|e| CollectionDbError::MalformedInput(format!("collection type: {e}")))?;
            let created = store.register_type(new_type)?;
            json!({ "success": true, "collection_type": created })
        }

        Command::Types => json!(store.list_types()?),

        Command::Type { id } => match store.get_type(&id)? {
            Some(collection_type) => json!(collection_type),
            None => json!({ "success": false, "message": format!("No collection type with id '{id}'") }),
        },

        Command::RenameType {
            id,
            name,
            description,
        } => {
            let updated = store.update_type(&id, CollectionTypeUpdate { name, description })?;
            json!({ "success": updated.is_some(), "collection_type": updated })
        }

        Command::Unregister { id } => {
            let removed = store.unregister_type(&id)?;
            json!({ "success": true, "removed": removed })
        }

        Command::Insert {
            collection,
            document,
        } => {
            let doc = parse_json(&read_arg(&document)?)?;
            let outcome = store
                .collection(&collection)?
                .insert(doc, ValidationMode::from_env()?)?;
            insert_output(&[outcome])
        }

        Command::InsertBatch {
            collection,
            documents,
        } => {
            let docs = parse_documents(&read_arg(&documents)?)?;
            let outcomes = store
                .collection(&collection)?
                .insert_batch(docs, ValidationMode::from_env()?)?;
            insert_output(&outcomes)
        }

        Command::Delete {
            collection,
            attribute,
            value,
        } => {
            let field: MatchField = attribute.parse()?;
            let deleted = store.collection(&collection)?.soft_delete(field, &value)?;
            json!({ "success": true, "deleted": deleted })
        }

        Command::NextOrder { collection } => {
            let next = store.collection(&collection)?.next_expected_order()?;
            json!({ "collection": collection, "next_order": next })
        }

        Command::Query {
            collection,
            query_type,
            attribute,
            value,
            limit,
        } => {
            let query_type: QueryType = query_type.parse()?;
            if matches!(query_type, QueryType::Value | QueryType::ValueExact)
                && (attribute.is_none() || value.is_none())
            {
                return Err(CollectionDbError::MalformedInput(format!(
                    "--attribute and --value are required for '{query_type}' queries"
                )));
            }

            let mut request = QueryRequest::new(collection, query_type);
            request.attribute = attribute;
            request.value = value.map(|v| query_value(query_type, v));
            request.limit = limit;

            match store.query(&request)? {
                QueryOutcome::Count(count) => json!({ "count": count }),
                QueryOutcome::Records(docs) => render_documents(&docs),
            }
        }

        Command::Summary { collection } => {
            Value::String(store.formatted_summary(&collection)?)
        }

        Command::Collections => json!(store.discover_collections()?),

        Command::Export { collection } => {
            render_documents(&store.collection(&collection)?.export()?)
        }
    };

    print!("{}", render(&output, cli.format)?);
    Ok(())
}

/// `value` takes the raw text as a pattern; `value_exact` compares JSON, so
/// `--value 3` matches the number and `--value '"3"'` the string.
fn query_value(query_type: QueryType, raw: String) -> Value {
    if query_type == QueryType::ValueExact {
        serde_json::from_str(&raw).unwrap_or(Value::String(raw))
    } else {
        Value::String(raw)
    }
}

fn insert_output(outcomes: &[InsertOutcome]) -> Value {
    let mut output = json!({ "success": true, "inserted": outcomes });
    if outcomes.iter().any(|o| o.large_text) {
        output["tip"] = json!(
            "Long text fields render better as Markdown: start them with a '#' heading."
        );
    }
    output
}

fn render_documents(docs: &[Document]) -> Value {
    Value::Array(docs.iter().map(Document::to_json).collect())
}

fn failure_payload(operation: &str, error: &CollectionDbError) -> Value {
    let mut payload = json!({
        "success": false,
        "operation": operation,
        "error": error.kind(),
        "message": error.to_string(),
    });

    let mut cause = error;
    if let CollectionDbError::BatchRejected { index, source } = error {
        payload["index"] = json!(index);
        payload["cause"] = json!(source.kind());
        cause = source.as_ref();
    }
    match cause {
        CollectionDbError::OrderMismatch {
            expected,
            submitted,
            ..
        } => {
            payload["expected"] = json!(expected);
            payload["submitted"] = json!(submitted);
        }
        CollectionDbError::SchemaViolation { violations, .. } => {
            payload["violations"] = json!(violations);
        }
        _ => {}
    }
    payload
}

fn render(value: &Value, format: OutputFormat) -> collectiondb::Result<String> {
    match format {
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(value)?)),
        OutputFormat::Yaml => serde_yaml::to_string(value)
            .map_err(|e| CollectionDbError::MalformedInput(format!("YAML output: {e}"))),
    }
}

/// The argument itself, or stdin when it is "-".
fn read_arg(arg: &str) -> collectiondb::Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut content = String::new();
    std::io::stdin()
        .read_to_string(&mut content)
        .map_err(|e| CollectionDbError::MalformedInput(format!("failed to read stdin: {e}")))?;
    Ok(content)
}
